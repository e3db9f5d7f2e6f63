use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use async_trait::async_trait;
use tracing::debug;

use super::{AdvanceOutcome, ProviderAdapter, ProviderError};
use crate::workflows::verification::domain::{ProviderRef, TaskKind, Verdict, VerificationTask};

/// Deterministic stand-in for a vendor: every accepted task concludes after a
/// fixed number of polls, negatively for the configured kinds.
#[derive(Debug)]
pub struct SimulatedProvider {
    label: &'static str,
    polls_before_conclusion: u32,
    failing_kinds: HashSet<TaskKind>,
    polls: Mutex<HashMap<ProviderRef, u32>>,
}

impl SimulatedProvider {
    pub fn new(label: &'static str, polls_before_conclusion: u32) -> Self {
        Self {
            label,
            polls_before_conclusion,
            failing_kinds: HashSet::new(),
            polls: Mutex::new(HashMap::new()),
        }
    }

    #[cfg(test)]
    fn tracked_references(&self) -> usize {
        self.polls.lock().map(|polls| polls.len()).unwrap_or_default()
    }

    pub fn failing<I>(mut self, kinds: I) -> Self
    where
        I: IntoIterator<Item = TaskKind>,
    {
        self.failing_kinds.extend(kinds);
        self
    }

    fn verdict_for(&self, kind: &TaskKind) -> Verdict {
        if self.failing_kinds.contains(kind) {
            Verdict::Failed
        } else {
            Verdict::Passed
        }
    }
}

#[async_trait]
impl ProviderAdapter for SimulatedProvider {
    async fn initiate(&self, task: &VerificationTask) -> Result<ProviderRef, ProviderError> {
        let reference = ProviderRef::new(format!(
            "{}-{}-{}",
            self.label, task.kind, task.id
        ));
        let mut polls = self
            .polls
            .lock()
            .map_err(|_| ProviderError::Transient("simulator state poisoned".to_string()))?;
        polls.insert(reference.clone(), 0);
        debug!(provider = self.label, %reference, kind = %task.kind, "simulated initiation");
        Ok(reference)
    }

    async fn advance(&self, task: &VerificationTask) -> Result<AdvanceOutcome, ProviderError> {
        let reference = task
            .provider_ref
            .as_ref()
            .ok_or_else(|| ProviderError::Permanent("task was never initiated".to_string()))?;
        let mut polls = self
            .polls
            .lock()
            .map_err(|_| ProviderError::Transient("simulator state poisoned".to_string()))?;
        let seen = polls
            .get_mut(reference)
            .ok_or_else(|| ProviderError::Permanent(format!("unknown reference {reference}")))?;

        *seen += 1;
        if *seen > self.polls_before_conclusion {
            polls.remove(reference);
            Ok(AdvanceOutcome::Concluded(self.verdict_for(&task.kind)))
        } else {
            Ok(AdvanceOutcome::InFlight)
        }
    }

    async fn cancel(&self, task: &VerificationTask) -> Result<(), ProviderError> {
        if let Some(reference) = &task.provider_ref {
            if let Ok(mut polls) = self.polls.lock() {
                polls.remove(reference);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflows::verification::domain::SubjectId;

    #[tokio::test]
    async fn concludes_after_configured_polls() {
        let provider = SimulatedProvider::new("bgv", 1).failing([TaskKind::CRIMINAL_CHECK]);
        let mut task = VerificationTask::pending(SubjectId::new("emp-7"), TaskKind::CRIMINAL_CHECK);

        let reference = provider.initiate(&task).await.expect("initiates");
        task.provider_ref = Some(reference);

        assert_eq!(
            provider.advance(&task).await.expect("first poll"),
            AdvanceOutcome::InFlight
        );
        assert_eq!(
            provider.advance(&task).await.expect("second poll"),
            AdvanceOutcome::Concluded(Verdict::Failed)
        );
    }

    #[tokio::test]
    async fn concluded_references_are_dropped() {
        let provider = SimulatedProvider::new("bgv", 0);
        let mut task = VerificationTask::pending(SubjectId::new("emp-7"), TaskKind::IDENTITY_CHECK);
        task.provider_ref = Some(provider.initiate(&task).await.expect("initiates"));
        assert_eq!(provider.tracked_references(), 1);

        assert_eq!(
            provider.advance(&task).await.expect("poll"),
            AdvanceOutcome::Concluded(Verdict::Passed)
        );
        assert_eq!(provider.tracked_references(), 0);
    }

    #[tokio::test]
    async fn unknown_reference_is_permanent() {
        let provider = SimulatedProvider::new("esign", 0);
        let mut task = VerificationTask::pending(
            SubjectId::new("emp-7"),
            TaskKind::CONFIDENTIALITY_SIGNATURE,
        );
        task.provider_ref = Some(ProviderRef::new("never-issued"));

        match provider.advance(&task).await {
            Err(ProviderError::Permanent(_)) => {}
            other => panic!("expected permanent error, got {other:?}"),
        }
    }
}
