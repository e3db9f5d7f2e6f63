//! End-to-end scenarios for the onboarding verification engine.
//!
//! Everything here goes through the public orchestrator facade and HTTP router,
//! backed by the in-memory store and vendor doubles.

mod common {
    use std::collections::{HashMap, HashSet};
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use async_trait::async_trait;

    use onboarding_engine::config::{EngineConfig, RequirementsConfig};
    use onboarding_engine::workflows::verification::{
        AdvanceOutcome, CompletionNotice, CompletionPublisher, InMemoryTaskStore, ProviderAdapter,
        ProviderError, ProviderRef, ProviderRegistry, PublishError, RequirementCatalog,
        SubjectId, TaskKind, Verdict, VerificationOrchestrator, VerificationTask,
    };

    pub(super) type Orchestrator = VerificationOrchestrator<InMemoryTaskStore, Ledger>;

    /// Vendor double: concludes on the first poll, negatively for kinds in
    /// `negative`, and fails the next poll for kinds listed in `flaky` once.
    #[derive(Default)]
    pub(super) struct Vendor {
        negative: Mutex<HashSet<TaskKind>>,
        flaky: Mutex<HashSet<TaskKind>>,
        initiates: Mutex<HashMap<TaskKind, usize>>,
        polls: Mutex<usize>,
        initiate_delay: Option<Duration>,
    }

    impl Vendor {
        pub(super) fn slow(millis: u64) -> Self {
            Self {
                initiate_delay: Some(Duration::from_millis(millis)),
                ..Self::default()
            }
        }

        pub(super) fn reject(&self, kind: TaskKind) {
            self.negative.lock().expect("vendor mutex").insert(kind);
        }

        pub(super) fn accept_all(&self) {
            self.negative.lock().expect("vendor mutex").clear();
        }

        pub(super) fn flake_once(&self, kind: TaskKind) {
            self.flaky.lock().expect("vendor mutex").insert(kind);
        }

        pub(super) fn initiates(&self, kind: &TaskKind) -> usize {
            self.initiates
                .lock()
                .expect("vendor mutex")
                .get(kind)
                .copied()
                .unwrap_or(0)
        }

        pub(super) fn total_calls(&self) -> usize {
            let initiates: usize = self.initiates.lock().expect("vendor mutex").values().sum();
            initiates + *self.polls.lock().expect("vendor mutex")
        }
    }

    #[async_trait]
    impl ProviderAdapter for Vendor {
        async fn initiate(&self, task: &VerificationTask) -> Result<ProviderRef, ProviderError> {
            let attempt = {
                let mut initiates = self.initiates.lock().expect("vendor mutex");
                let count = initiates.entry(task.kind.clone()).or_default();
                *count += 1;
                *count
            };
            if let Some(delay) = self.initiate_delay {
                tokio::time::sleep(delay).await;
            }
            Ok(ProviderRef::new(format!(
                "vendor-{}-{}-{attempt}",
                task.subject_id, task.kind
            )))
        }

        async fn advance(&self, task: &VerificationTask) -> Result<AdvanceOutcome, ProviderError> {
            *self.polls.lock().expect("vendor mutex") += 1;
            if self.flaky.lock().expect("vendor mutex").remove(&task.kind) {
                return Err(ProviderError::Transient("vendor gateway timeout".to_string()));
            }
            let verdict = if self.negative.lock().expect("vendor mutex").contains(&task.kind) {
                Verdict::Failed
            } else {
                Verdict::Passed
            };
            Ok(AdvanceOutcome::Concluded(verdict))
        }

        async fn cancel(&self, _task: &VerificationTask) -> Result<(), ProviderError> {
            Ok(())
        }
    }

    #[derive(Default)]
    pub(super) struct Ledger {
        notices: Mutex<Vec<CompletionNotice>>,
    }

    impl Ledger {
        pub(super) fn notices(&self) -> Vec<CompletionNotice> {
            self.notices.lock().expect("ledger mutex").clone()
        }
    }

    impl CompletionPublisher for Ledger {
        fn publish(&self, notice: CompletionNotice) -> Result<(), PublishError> {
            self.notices.lock().expect("ledger mutex").push(notice);
            Ok(())
        }
    }

    pub(super) fn subject() -> SubjectId {
        SubjectId::new("emp-1001")
    }

    pub(super) fn required_kinds() -> Vec<TaskKind> {
        TaskKind::background_checks().to_vec()
    }

    pub(super) fn build(vendor: Arc<Vendor>) -> (Arc<Orchestrator>, Arc<Ledger>) {
        let requirements = RequirementsConfig::default();
        let mut providers = ProviderRegistry::new();
        providers.register_all(requirements.employee_kinds.iter().cloned(), vendor.clone());
        providers.register_all(requirements.contractor_kinds.iter().cloned(), vendor);

        let ledger = Arc::new(Ledger::default());
        let config = EngineConfig {
            backoff_base_seconds: 0,
            backoff_max_seconds: 0,
            ..EngineConfig::default()
        };
        let orchestrator = VerificationOrchestrator::from_config(
            Arc::new(InMemoryTaskStore::new()),
            providers,
            ledger.clone(),
            RequirementCatalog::from_config(&requirements).expect("default profiles"),
            &config,
        )
        .expect("every required kind has an adapter");

        (Arc::new(orchestrator), ledger)
    }
}

use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use serde_json::Value;
use tower::ServiceExt;

use common::*;
use onboarding_engine::workflows::verification::{
    verification_router, SubjectStatus, TaskKind, TaskState,
};

#[tokio::test]
async fn seeding_twice_yields_one_task_per_kind() {
    let (orchestrator, _) = build(Arc::new(Vendor::default()));

    let first = orchestrator
        .ensure_tasks_for_subject(&subject(), &required_kinds())
        .expect("seeding");
    let second = orchestrator
        .ensure_tasks_for_subject(&subject(), &required_kinds())
        .expect("seeding");

    assert_eq!(first.len(), 5);
    assert_eq!(second.len(), 5);
    let progress = orchestrator.get_progress(&subject()).expect("progress");
    assert_eq!(progress.summary.total, 5);
    assert_eq!(progress.status, SubjectStatus::NotStarted);
}

#[tokio::test]
async fn all_checks_passing_complete_the_subject_in_one_pass() {
    let (orchestrator, ledger) = build(Arc::new(Vendor::default()));
    orchestrator
        .ensure_tasks_for_subject(&subject(), &required_kinds())
        .expect("seeding");

    let progress = orchestrator
        .process_subject(&subject())
        .await
        .expect("processing");

    assert_eq!(
        (
            progress.summary.total,
            progress.summary.completed,
            progress.summary.passed,
            progress.summary.failed
        ),
        (5, 5, 5, 0)
    );
    assert!(orchestrator.is_complete(&subject()).expect("gate"));
    assert!(ledger.notices().is_empty());

    orchestrator
        .mark_subject_verification_complete(&subject())
        .expect("gate satisfied");
    assert_eq!(ledger.notices().len(), 1);
}

#[tokio::test]
async fn a_failed_check_blocks_completion_until_reset() {
    let vendor = Arc::new(Vendor::default());
    vendor.reject(TaskKind::CRIMINAL_CHECK);
    let (orchestrator, ledger) = build(vendor.clone());
    orchestrator
        .ensure_tasks_for_subject(&subject(), &required_kinds())
        .expect("seeding");

    for _ in 0..3 {
        orchestrator
            .process_subject(&subject())
            .await
            .expect("processing");
        assert!(!orchestrator.is_complete(&subject()).expect("gate"));
    }
    assert!(orchestrator
        .mark_subject_verification_complete(&subject())
        .is_err());
    assert!(ledger.notices().is_empty());

    vendor.accept_all();
    orchestrator
        .retry_task(&subject(), &TaskKind::CRIMINAL_CHECK)
        .await
        .expect("retry");
    let progress = orchestrator
        .process_subject(&subject())
        .await
        .expect("processing");

    assert!(progress.complete);
    assert_eq!(vendor.initiates(&TaskKind::CRIMINAL_CHECK), 2);
}

#[tokio::test]
async fn transient_poll_error_is_retried_without_terminal_failure() {
    let vendor = Arc::new(Vendor::default());
    vendor.flake_once(TaskKind::EMPLOYMENT_CHECK);
    let (orchestrator, _) = build(vendor);
    orchestrator
        .ensure_tasks_for_subject(&subject(), &required_kinds())
        .expect("seeding");

    let first = orchestrator
        .process_subject(&subject())
        .await
        .expect("processing");
    assert_eq!(first.summary.failed, 0);
    assert_eq!(first.summary.in_progress, 1);

    let second = orchestrator
        .process_subject(&subject())
        .await
        .expect("processing");
    assert!(second.complete);
    assert_eq!(second.summary.failed, 0);
}

#[tokio::test]
async fn settled_subject_is_processed_without_vendor_calls() {
    let vendor = Arc::new(Vendor::default());
    let (orchestrator, _) = build(vendor.clone());
    orchestrator
        .ensure_tasks_for_subject(&subject(), &required_kinds())
        .expect("seeding");
    let settled = orchestrator
        .process_subject(&subject())
        .await
        .expect("processing");
    let calls = vendor.total_calls();

    let again = orchestrator
        .process_subject(&subject())
        .await
        .expect("processing");

    assert_eq!(vendor.total_calls(), calls);
    assert_eq!(again.summary, settled.summary);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_processing_never_double_initiates() {
    let vendor = Arc::new(Vendor::slow(25));
    let (orchestrator, _) = build(vendor.clone());
    orchestrator
        .ensure_tasks_for_subject(&subject(), &required_kinds())
        .expect("seeding");

    let handles: Vec<_> = (0..3)
        .map(|_| {
            let orchestrator = orchestrator.clone();
            tokio::spawn(async move { orchestrator.process_subject(&subject()).await })
        })
        .collect();
    for handle in handles {
        handle.await.expect("join").expect("processing");
    }

    for kind in required_kinds() {
        assert!(vendor.initiates(&kind) <= 1, "{kind} initiated more than once");
    }
}

#[tokio::test]
async fn timestamps_track_terminal_state() {
    let vendor = Arc::new(Vendor::default());
    vendor.reject(TaskKind::ADDRESS_CHECK);
    vendor.flake_once(TaskKind::IDENTITY_CHECK);
    let (orchestrator, _) = build(vendor);
    orchestrator
        .ensure_tasks_for_subject(&subject(), &required_kinds())
        .expect("seeding");

    orchestrator
        .process_subject(&subject())
        .await
        .expect("processing");
    orchestrator
        .cancel_subject(&subject())
        .await
        .expect("cancel");

    let progress = orchestrator.get_progress(&subject()).expect("progress");
    for task in &progress.tasks {
        let terminal = matches!(task.state, TaskState::Completed | TaskState::Failed);
        assert_eq!(task.completed_at.is_some(), terminal, "{}", task.kind);
        assert!(task.initiated_at.is_some());
    }
}

#[tokio::test]
async fn contractor_flow_over_http() {
    let (orchestrator, ledger) = build(Arc::new(Vendor::default()));
    let router = verification_router(orchestrator);

    let seed = Request::post("/api/v1/onboarding/subjects/ctr-77/tasks")
        .header("content-type", "application/json")
        .body(Body::from(r#"{"subject_type":"contractor"}"#))
        .expect("request");
    let response = router.clone().oneshot(seed).await.expect("response");
    assert_eq!(response.status(), StatusCode::OK);

    let process = Request::post("/api/v1/onboarding/subjects/ctr-77/process")
        .body(Body::empty())
        .expect("request");
    let response = router.clone().oneshot(process).await.expect("response");
    assert_eq!(response.status(), StatusCode::OK);
    let body = axum::body::to_bytes(response.into_body(), 64 * 1024)
        .await
        .expect("body");
    let progress: Value = serde_json::from_slice(&body).expect("json");
    assert_eq!(progress["summary"]["total"], 4);
    assert_eq!(progress["complete"], true);

    let complete = Request::post("/api/v1/onboarding/subjects/ctr-77/complete")
        .body(Body::empty())
        .expect("request");
    let response = router.oneshot(complete).await.expect("response");
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(ledger.notices().len(), 1);
    assert_eq!(ledger.notices()[0].subject_id.as_str(), "ctr-77");
}
