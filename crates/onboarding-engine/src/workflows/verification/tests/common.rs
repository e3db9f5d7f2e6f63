use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration as StdDuration;

use async_trait::async_trait;
use axum::response::Response;
use chrono::{DateTime, Duration, TimeZone, Utc};
use serde_json::Value;

use crate::config::EngineConfig;
use crate::workflows::verification::{
    AdvanceOutcome, Clock, CompletionNotice, CompletionPublisher, InMemoryTaskStore,
    ProviderAdapter, ProviderError, ProviderRef, ProviderRegistry, PublishError,
    RequirementCatalog, SubjectId, SubjectType, TaskKind, Verdict, VerificationOrchestrator,
    VerificationTask,
};

pub(super) type TestOrchestrator = VerificationOrchestrator<InMemoryTaskStore, RecordingPublisher>;

/// Provider double with per-kind scripts and call counters.
#[derive(Default)]
pub(super) struct ScriptedProvider {
    initiate_script: Mutex<HashMap<TaskKind, VecDeque<ProviderError>>>,
    advance_script: Mutex<HashMap<TaskKind, VecDeque<Result<AdvanceOutcome, ProviderError>>>>,
    negative_kinds: Mutex<Vec<TaskKind>>,
    initiate_delay: Option<StdDuration>,
    initiates: Mutex<HashMap<TaskKind, usize>>,
    advance_calls: AtomicUsize,
    cancel_calls: AtomicUsize,
    initiates_in_flight: AtomicUsize,
    peak_initiates_in_flight: AtomicUsize,
}

impl ScriptedProvider {
    pub(super) fn passing() -> Self {
        Self::default()
    }

    pub(super) fn with_initiate_delay(mut self, millis: u64) -> Self {
        self.initiate_delay = Some(StdDuration::from_millis(millis));
        self
    }

    pub(super) fn failing_initiate(self, kind: TaskKind, errors: Vec<ProviderError>) -> Self {
        self.initiate_script
            .lock()
            .expect("script mutex")
            .insert(kind, errors.into());
        self
    }

    pub(super) fn scripted_advance(
        self,
        kind: TaskKind,
        outcomes: Vec<Result<AdvanceOutcome, ProviderError>>,
    ) -> Self {
        self.advance_script
            .lock()
            .expect("script mutex")
            .insert(kind, outcomes.into());
        self
    }

    /// Unscripted polls for `kind` conclude with a negative result.
    pub(super) fn concluding_negative(self, kind: TaskKind) -> Self {
        self.negative_kinds.lock().expect("script mutex").push(kind);
        self
    }

    pub(super) fn initiate_calls(&self) -> usize {
        self.initiates.lock().expect("counter mutex").values().sum()
    }

    pub(super) fn initiate_calls_for(&self, kind: &TaskKind) -> usize {
        self.initiates
            .lock()
            .expect("counter mutex")
            .get(kind)
            .copied()
            .unwrap_or(0)
    }

    pub(super) fn advance_calls(&self) -> usize {
        self.advance_calls.load(Ordering::SeqCst)
    }

    pub(super) fn cancel_calls(&self) -> usize {
        self.cancel_calls.load(Ordering::SeqCst)
    }

    /// Most initiations the provider ever had open at the same time.
    pub(super) fn peak_concurrent_initiates(&self) -> usize {
        self.peak_initiates_in_flight.load(Ordering::SeqCst)
    }

    pub(super) fn total_calls(&self) -> usize {
        self.initiate_calls() + self.advance_calls() + self.cancel_calls()
    }
}

#[async_trait]
impl ProviderAdapter for ScriptedProvider {
    async fn initiate(&self, task: &VerificationTask) -> Result<ProviderRef, ProviderError> {
        let attempt = {
            let mut initiates = self.initiates.lock().expect("counter mutex");
            let count = initiates.entry(task.kind.clone()).or_default();
            *count += 1;
            *count
        };

        let open = self.initiates_in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_initiates_in_flight.fetch_max(open, Ordering::SeqCst);
        if let Some(delay) = self.initiate_delay {
            tokio::time::sleep(delay).await;
        }
        self.initiates_in_flight.fetch_sub(1, Ordering::SeqCst);

        let scripted = self
            .initiate_script
            .lock()
            .expect("script mutex")
            .get_mut(&task.kind)
            .and_then(VecDeque::pop_front);
        match scripted {
            Some(error) => Err(error),
            None => Ok(ProviderRef::new(format!("scripted-{}-{attempt}", task.kind))),
        }
    }

    async fn advance(&self, task: &VerificationTask) -> Result<AdvanceOutcome, ProviderError> {
        self.advance_calls.fetch_add(1, Ordering::SeqCst);
        let scripted = self
            .advance_script
            .lock()
            .expect("script mutex")
            .get_mut(&task.kind)
            .and_then(VecDeque::pop_front);
        if let Some(outcome) = scripted {
            return outcome;
        }

        let negative = self
            .negative_kinds
            .lock()
            .expect("script mutex")
            .contains(&task.kind);
        let verdict = if negative {
            Verdict::Failed
        } else {
            Verdict::Passed
        };
        Ok(AdvanceOutcome::Concluded(verdict))
    }

    async fn cancel(&self, _task: &VerificationTask) -> Result<(), ProviderError> {
        self.cancel_calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

pub(super) struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub(super) fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    pub(super) fn advance(&self, by: Duration) {
        let mut now = self.now.lock().expect("clock mutex");
        *now += by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().expect("clock mutex")
    }
}

#[derive(Default)]
pub(super) struct RecordingPublisher {
    notices: Mutex<Vec<CompletionNotice>>,
}

impl RecordingPublisher {
    pub(super) fn notices(&self) -> Vec<CompletionNotice> {
        self.notices.lock().expect("publisher mutex").clone()
    }
}

impl CompletionPublisher for RecordingPublisher {
    fn publish(&self, notice: CompletionNotice) -> Result<(), PublishError> {
        self.notices.lock().expect("publisher mutex").push(notice);
        Ok(())
    }
}

pub(super) fn start_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 4, 1, 9, 0, 0)
        .single()
        .expect("valid timestamp")
}

pub(super) fn subject() -> SubjectId {
    SubjectId::new("emp-0042")
}

pub(super) fn bgv_kinds() -> Vec<TaskKind> {
    TaskKind::background_checks().to_vec()
}

/// Engine settings with no backoff so retries happen on the next pass.
pub(super) fn engine_config() -> EngineConfig {
    EngineConfig {
        backoff_base_seconds: 0,
        backoff_max_seconds: 0,
        max_initiate_attempts: 3,
        ..EngineConfig::default()
    }
}

pub(super) fn catalog() -> RequirementCatalog {
    RequirementCatalog::new()
        .with_profile(SubjectType::Employee, bgv_kinds())
        .and_then(|catalog| {
            catalog.with_profile(
                SubjectType::Contractor,
                [TaskKind::IDENTITY_CHECK, TaskKind::CONFIDENTIALITY_SIGNATURE],
            )
        })
        .expect("catalog builds")
}

pub(super) fn registry(provider: Arc<ScriptedProvider>) -> ProviderRegistry {
    let mut registry = ProviderRegistry::new();
    registry.register_all(bgv_kinds(), provider.clone());
    registry.register(TaskKind::CONFIDENTIALITY_SIGNATURE, provider);
    registry
}

pub(super) struct Harness {
    pub(super) orchestrator: Arc<TestOrchestrator>,
    pub(super) store: Arc<InMemoryTaskStore>,
    pub(super) provider: Arc<ScriptedProvider>,
    pub(super) publisher: Arc<RecordingPublisher>,
    pub(super) clock: Arc<ManualClock>,
}

pub(super) fn harness(provider: ScriptedProvider) -> Harness {
    harness_with_config(provider, &engine_config())
}

pub(super) fn harness_with_config(provider: ScriptedProvider, config: &EngineConfig) -> Harness {
    let store = Arc::new(InMemoryTaskStore::new());
    let provider = Arc::new(provider);
    let publisher = Arc::new(RecordingPublisher::default());
    let clock = Arc::new(ManualClock::new(start_time()));

    let orchestrator = VerificationOrchestrator::with_clock(
        store.clone(),
        registry(provider.clone()),
        publisher.clone(),
        catalog(),
        config,
        clock.clone(),
    )
    .expect("every required kind has a provider");

    Harness {
        orchestrator: Arc::new(orchestrator),
        store,
        provider,
        publisher,
        clock,
    }
}

pub(super) async fn read_json_body(response: Response) -> Value {
    let body = axum::body::to_bytes(response.into_body(), 64 * 1024)
        .await
        .expect("read body");
    serde_json::from_slice(&body).expect("json payload")
}
