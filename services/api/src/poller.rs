use crate::infra::EngineOrchestrator;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

/// Spawns the background pass over every subject with open tasks. An interval
/// of zero disables polling.
pub(crate) fn spawn(
    orchestrator: Arc<EngineOrchestrator>,
    interval_seconds: u64,
) -> Option<JoinHandle<()>> {
    if interval_seconds == 0 {
        info!("background poller disabled");
        return None;
    }

    let period = Duration::from_secs(interval_seconds);
    Some(tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(interval_seconds, "background poller started");

        loop {
            ticker.tick().await;
            poll_once(&orchestrator).await;
        }
    }))
}

/// Runs one pass; returns how many subjects were processed.
pub(crate) async fn poll_once(orchestrator: &EngineOrchestrator) -> usize {
    let subjects = match orchestrator.open_subjects() {
        Ok(subjects) => subjects,
        Err(error) => {
            warn!(%error, "could not list open subjects");
            return 0;
        }
    };

    let mut processed = 0;
    for subject_id in subjects {
        match orchestrator.process_subject(&subject_id).await {
            Ok(progress) => {
                processed += 1;
                debug!(
                    %subject_id,
                    status = progress.status_label,
                    percent = progress.percent_complete,
                    "subject polled"
                );
            }
            Err(error) => warn!(%subject_id, %error, "subject poll failed"),
        }
    }
    processed
}
