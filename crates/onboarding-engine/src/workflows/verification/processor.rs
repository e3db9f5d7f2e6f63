use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, PoisonError};

use chrono::{DateTime, Duration, Utc};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tracing::{debug, info, warn};

use super::backoff::RetryPolicy;
use super::clock::Clock;
use super::domain::{
    FailureReason, ProviderRef, TaskId, TaskKind, TaskState, Transition, Verdict,
    VerificationTask,
};
use super::provider::{AdvanceOutcome, ProviderAdapter, ProviderError, ProviderRegistry};
use super::store::{StoreError, TaskStore};
use crate::config::EngineConfig;

/// SLA for in-flight tasks. Stale tasks are always flagged; only the kinds
/// listed in `fail_kinds` are failed when the SLA is breached.
#[derive(Debug, Clone)]
pub struct StalePolicy {
    after: Duration,
    fail_kinds: HashSet<TaskKind>,
}

impl StalePolicy {
    pub fn new(after: Duration, fail_kinds: impl IntoIterator<Item = TaskKind>) -> Self {
        Self {
            after,
            fail_kinds: fail_kinds.into_iter().collect(),
        }
    }

    pub fn after(&self) -> Duration {
        self.after
    }

    pub fn is_stale(&self, task: &VerificationTask, now: DateTime<Utc>) -> bool {
        task.state == TaskState::InProgress
            && task
                .initiated_at
                .map(|started| now - started > self.after)
                .unwrap_or(false)
    }

    pub fn fails_on_timeout(&self, kind: &TaskKind) -> bool {
        self.fail_kinds.contains(kind)
    }
}

impl Default for StalePolicy {
    fn default() -> Self {
        Self::new(Duration::days(3), Vec::new())
    }
}

impl From<&EngineConfig> for StalePolicy {
    fn from(config: &EngineConfig) -> Self {
        Self::new(
            Duration::minutes(i64::from(config.stale_after_minutes)),
            config.timeout_failure_kinds.iter().cloned(),
        )
    }
}

/// Error captured for a single task; never aborts sibling tasks.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TaskError {
    #[error(transparent)]
    Provider(#[from] ProviderError),
    #[error("concurrent update detected; step abandoned until the next pass")]
    Conflict,
    #[error("no provider adapter registered for {0}")]
    MissingProvider(TaskKind),
    #[error("task is {0} and cannot be reset for retry")]
    NotTerminal(&'static str),
    #[error("task store failure: {0}")]
    Store(String),
}

impl TaskError {
    pub const fn label(&self) -> &'static str {
        match self {
            TaskError::Provider(ProviderError::Transient(_)) => "transient_provider_error",
            TaskError::Provider(ProviderError::Permanent(_)) => "permanent_provider_error",
            TaskError::Conflict => "conflict",
            TaskError::MissingProvider(_) => "configuration_error",
            TaskError::NotTerminal(_) => "not_terminal",
            TaskError::Store(_) => "store_error",
        }
    }
}

impl From<StoreError> for TaskError {
    fn from(value: StoreError) -> Self {
        match value {
            StoreError::VersionMismatch { .. } | StoreError::Conflict => TaskError::Conflict,
            other => TaskError::Store(other.to_string()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepAction {
    Initiated,
    /// Polled; the provider is still working.
    Polled,
    Concluded(Verdict),
    GaveUp,
    /// Transient failure recorded; eligible again after `retry_after`.
    RetryScheduled { retry_after: DateTime<Utc> },
    /// Still inside the backoff window from an earlier failure.
    Deferred { until: DateTime<Utc> },
    /// Another processor currently owns this task.
    Busy,
    Unchanged,
}

#[derive(Debug, Clone)]
pub struct StepReport {
    pub task_id: TaskId,
    pub kind: TaskKind,
    pub action: StepAction,
    pub stale: bool,
    pub error: Option<TaskError>,
}

impl StepReport {
    fn new(task: &VerificationTask, action: StepAction) -> Self {
        Self {
            task_id: task.id.clone(),
            kind: task.kind.clone(),
            action,
            stale: false,
            error: None,
        }
    }

    fn failed(task: &VerificationTask, error: TaskError) -> Self {
        Self {
            error: Some(error),
            ..Self::new(task, StepAction::Unchanged)
        }
    }

    fn with_error(mut self, error: TaskError) -> Self {
        self.error = Some(error);
        self
    }
}

#[derive(Debug, Clone, Default)]
struct AttemptTracker {
    consecutive_failures: u32,
    initiate_failures: u32,
    retry_after: Option<DateTime<Utc>>,
}

/// Per-task async locks; holding one serializes every write to that task
/// within this process. Cross-process writers are caught by the version check.
#[derive(Default)]
struct TaskLocks {
    slots: Mutex<HashMap<TaskId, Arc<AsyncMutex<()>>>>,
}

impl TaskLocks {
    fn slot(&self, id: &TaskId) -> Arc<AsyncMutex<()>> {
        let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        slots.entry(id.clone()).or_default().clone()
    }

    fn try_acquire(&self, id: &TaskId) -> Option<OwnedMutexGuard<()>> {
        self.slot(id).try_lock_owned().ok()
    }

    async fn acquire(&self, id: &TaskId) -> OwnedMutexGuard<()> {
        self.slot(id).lock_owned().await
    }

    /// Drops the slot of a settled task. A step racing on the old slot only
    /// observes the terminal row, and any later writer is still held to the
    /// version check.
    fn release(&self, id: &TaskId) {
        let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        slots.remove(id);
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner).len()
    }
}

/// Advances one task at a time through its state machine.
///
/// Each step reloads the task under its lock, decides exactly one of
/// initiate / advance / nothing, and persists the result with a version
/// check. Re-running a step on an unchanged terminal task is a no-op.
pub struct TaskProcessor<S> {
    store: Arc<S>,
    providers: Arc<ProviderRegistry>,
    retry: RetryPolicy,
    stale: StalePolicy,
    clock: Arc<dyn Clock>,
    locks: TaskLocks,
    attempts: Mutex<HashMap<TaskId, AttemptTracker>>,
}

impl<S> TaskProcessor<S>
where
    S: TaskStore + 'static,
{
    pub fn new(
        store: Arc<S>,
        providers: Arc<ProviderRegistry>,
        retry: RetryPolicy,
        stale: StalePolicy,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            providers,
            retry,
            stale,
            clock,
            locks: TaskLocks::default(),
            attempts: Mutex::new(HashMap::new()),
        }
    }

    pub fn providers(&self) -> &ProviderRegistry {
        &self.providers
    }

    pub fn stale_policy(&self) -> &StalePolicy {
        &self.stale
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// Runs a single processing step for `task`.
    pub async fn step(&self, task: &VerificationTask) -> StepReport {
        let Some(_guard) = self.locks.try_acquire(&task.id) else {
            debug!(task_id = %task.id, kind = %task.kind, "task busy in another processor");
            return StepReport::new(task, StepAction::Busy);
        };

        let current = match self.reload(task) {
            Ok(current) => current,
            Err(error) => return StepReport::failed(task, error),
        };

        if current.is_terminal() {
            self.locks.release(&current.id);
            return StepReport::new(&current, StepAction::Unchanged);
        }

        let Some(adapter) = self.providers.get(&current.kind) else {
            return StepReport::failed(&current, TaskError::MissingProvider(current.kind.clone()));
        };

        let now = self.clock.now();
        if current.needs_initiation() {
            return match self.deferred_until(&current.id, now) {
                Some(until) => StepReport::new(&current, StepAction::Deferred { until }),
                None => self.initiate(current, adapter.as_ref()).await,
            };
        }

        // The SLA still applies inside a backoff window.
        let stale = self.stale.is_stale(&current, now);
        if stale {
            warn!(
                subject_id = %current.subject_id,
                task_id = %current.id,
                kind = %current.kind,
                initiated_at = ?current.initiated_at,
                "task exceeded its provider SLA"
            );

            if self.stale.fails_on_timeout(&current.kind) {
                if let Err(error) = adapter.cancel(&current).await {
                    warn!(task_id = %current.id, %error, "provider cancel failed after timeout");
                }
                let reason = FailureReason::TimedOut {
                    after_minutes: self.stale.after().num_minutes(),
                };
                let mut report = self.give_up(current, reason);
                report.stale = true;
                return report;
            }
        }

        let mut report = match self.deferred_until(&current.id, now) {
            Some(until) => StepReport::new(&current, StepAction::Deferred { until }),
            None => self.advance(current, adapter.as_ref(), now).await,
        };
        report.stale = stale;
        report
    }

    async fn initiate(
        &self,
        current: VerificationTask,
        adapter: &dyn ProviderAdapter,
    ) -> StepReport {
        match adapter.initiate(&current).await {
            Ok(reference) => {
                self.clear_failures(&current.id);
                match self.commit(&current, Transition::Initiated(reference.clone())) {
                    Ok(saved) => StepReport::new(&saved, StepAction::Initiated),
                    Err(error) => {
                        warn!(
                            subject_id = %current.subject_id,
                            task_id = %current.id,
                            kind = %current.kind,
                            %reference,
                            %error,
                            "provider accepted work but the initiation could not be recorded"
                        );
                        self.withdraw(&current, reference, adapter).await;
                        StepReport::failed(&current, error)
                    }
                }
            }
            Err(ProviderError::Transient(message)) => {
                let tracker = self.record_failure(&current.id, true);
                let error = TaskError::Provider(ProviderError::Transient(message));

                if self.retry.initiation_exhausted(tracker.initiate_failures) {
                    let reason = FailureReason::AttemptsExhausted {
                        attempts: tracker.initiate_failures,
                    };
                    self.give_up(current, reason).with_error(error)
                } else {
                    warn!(
                        task_id = %current.id,
                        kind = %current.kind,
                        attempt = tracker.initiate_failures,
                        %error,
                        "initiation failed, retry scheduled"
                    );
                    let retry_after = tracker.retry_after.unwrap_or_else(|| self.clock.now());
                    StepReport::new(&current, StepAction::RetryScheduled { retry_after })
                        .with_error(error)
                }
            }
            Err(ProviderError::Permanent(detail)) => {
                let error = TaskError::Provider(ProviderError::Permanent(detail.clone()));
                self.give_up(current, FailureReason::ProviderRejected { detail })
                    .with_error(error)
            }
        }
    }

    /// Best-effort cancel of provider work whose initiation was never
    /// recorded, so the next attempt does not leave it running.
    async fn withdraw(
        &self,
        current: &VerificationTask,
        reference: ProviderRef,
        adapter: &dyn ProviderAdapter,
    ) {
        let mut orphan = current.clone();
        orphan.provider_ref = Some(reference);
        if let Err(error) = adapter.cancel(&orphan).await {
            warn!(task_id = %current.id, %error, "orphaned provider work could not be cancelled");
        }
    }

    async fn advance(
        &self,
        current: VerificationTask,
        adapter: &dyn ProviderAdapter,
        now: DateTime<Utc>,
    ) -> StepReport {
        match adapter.advance(&current).await {
            Ok(AdvanceOutcome::InFlight) => {
                self.clear_failures(&current.id);
                StepReport::new(&current, StepAction::Polled)
            }
            Ok(AdvanceOutcome::Concluded(verdict)) => {
                self.clear_failures(&current.id);
                match self.commit(&current, Transition::Concluded(verdict)) {
                    Ok(saved) => StepReport::new(&saved, StepAction::Concluded(verdict)),
                    Err(error) => StepReport::failed(&current, error),
                }
            }
            Err(ProviderError::Transient(message)) => {
                let tracker = self.record_failure(&current.id, false);
                let error = TaskError::Provider(ProviderError::Transient(message));
                warn!(
                    task_id = %current.id,
                    kind = %current.kind,
                    failures = tracker.consecutive_failures,
                    %error,
                    "poll failed, task stays in progress"
                );
                let retry_after = tracker.retry_after.unwrap_or(now);
                StepReport::new(&current, StepAction::RetryScheduled { retry_after })
                    .with_error(error)
            }
            Err(ProviderError::Permanent(detail)) => {
                let error = TaskError::Provider(ProviderError::Permanent(detail.clone()));
                self.give_up(current, FailureReason::ProviderRejected { detail })
                    .with_error(error)
            }
        }
    }

    /// Applies an outcome pushed by the provider for an in-flight task.
    /// Terminal tasks are returned unchanged.
    pub async fn apply_outcome(
        &self,
        task: &VerificationTask,
        outcome: Result<AdvanceOutcome, ProviderError>,
    ) -> Result<VerificationTask, TaskError> {
        let _guard = self.locks.acquire(&task.id).await;
        let current = self.reload(task)?;

        if current.is_terminal() || current.provider_ref != task.provider_ref {
            debug!(task_id = %current.id, "ignoring update for a settled or superseded attempt");
            return Ok(current);
        }

        match outcome {
            Ok(AdvanceOutcome::InFlight) => Ok(current),
            Ok(AdvanceOutcome::Concluded(verdict)) => {
                self.clear_failures(&current.id);
                self.commit(&current, Transition::Concluded(verdict))
            }
            Err(ProviderError::Permanent(detail)) => self.commit(
                &current,
                Transition::GaveUp(FailureReason::ProviderRejected { detail }),
            ),
            Err(error @ ProviderError::Transient(_)) => Err(TaskError::Provider(error)),
        }
    }

    /// Re-enters `in_progress` on a terminal task so the next pass
    /// re-initiates it with the provider.
    pub async fn reset_for_retry(
        &self,
        task: &VerificationTask,
    ) -> Result<VerificationTask, TaskError> {
        let _guard = self.locks.acquire(&task.id).await;
        let current = self.reload(task)?;
        if !current.is_terminal() {
            return Err(TaskError::NotTerminal(current.state.label()));
        }

        let saved = self.commit(&current, Transition::ResetForRetry)?;
        self.forget(&saved.id);
        Ok(saved)
    }

    /// Cancels a non-terminal task; completed and failed tasks are untouched.
    pub async fn cancel(&self, task: &VerificationTask) -> Result<VerificationTask, TaskError> {
        let _guard = self.locks.acquire(&task.id).await;
        let current = self.reload(task)?;
        if current.is_terminal() {
            return Ok(current);
        }

        if current.provider_ref.is_some() {
            if let Some(adapter) = self.providers.get(&current.kind) {
                if let Err(error) = adapter.cancel(&current).await {
                    warn!(
                        task_id = %current.id,
                        kind = %current.kind,
                        %error,
                        "provider cancel failed"
                    );
                }
            }
        }

        self.commit(&current, Transition::GaveUp(FailureReason::Cancelled))
    }

    fn give_up(&self, current: VerificationTask, reason: FailureReason) -> StepReport {
        match self.commit(&current, Transition::GaveUp(reason)) {
            Ok(saved) => StepReport::new(&saved, StepAction::GaveUp),
            Err(error) => StepReport::failed(&current, error),
        }
    }

    /// Persists `transition` against the observed row. On a version mismatch
    /// the row is reloaded and the transition retried once if it still
    /// applies to the same attempt; otherwise nothing is written.
    fn commit(
        &self,
        observed: &VerificationTask,
        transition: Transition,
    ) -> Result<VerificationTask, TaskError> {
        let now = self.clock.now();
        let mut next = observed.clone();
        transition.apply(&mut next, now);

        let saved = match self.store.save(next) {
            Ok(saved) => saved,
            Err(StoreError::VersionMismatch { expected, found }) => {
                debug!(task_id = %observed.id, expected, found, "version mismatch, reloading once");
                let reloaded = self.reload(observed)?;
                if !(reloaded.same_attempt(observed) && transition.applies_to(&reloaded)) {
                    warn!(
                        task_id = %observed.id,
                        transition = transition.label(),
                        "task moved underneath the processor; step abandoned"
                    );
                    return Err(TaskError::Conflict);
                }

                let mut retried = reloaded;
                transition.apply(&mut retried, now);
                self.store.save(retried)?
            }
            Err(other) => return Err(other.into()),
        };

        info!(
            subject_id = %saved.subject_id,
            task_id = %saved.id,
            kind = %saved.kind,
            transition = transition.label(),
            state = saved.state.label(),
            result = saved.result.label(),
            "task transition recorded"
        );
        if saved.is_terminal() {
            self.forget(&saved.id);
            self.locks.release(&saved.id);
        }
        Ok(saved)
    }

    fn reload(&self, task: &VerificationTask) -> Result<VerificationTask, TaskError> {
        self.store
            .get_by_kind(&task.subject_id, &task.kind)?
            .filter(|stored| stored.id == task.id)
            .ok_or_else(|| TaskError::Store(format!("task {} no longer stored", task.id)))
    }

    fn deferred_until(&self, id: &TaskId, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let attempts = self.attempts.lock().unwrap_or_else(PoisonError::into_inner);
        attempts
            .get(id)
            .and_then(|tracker| tracker.retry_after)
            .filter(|until| *until > now)
    }

    fn record_failure(&self, id: &TaskId, during_initiation: bool) -> AttemptTracker {
        let now = self.clock.now();
        let mut attempts = self.attempts.lock().unwrap_or_else(PoisonError::into_inner);
        let tracker = attempts.entry(id.clone()).or_default();
        tracker.consecutive_failures += 1;
        if during_initiation {
            tracker.initiate_failures += 1;
        }
        tracker.retry_after = Some(now + self.retry.delay_after(tracker.consecutive_failures));
        tracker.clone()
    }

    fn clear_failures(&self, id: &TaskId) {
        let mut attempts = self.attempts.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(tracker) = attempts.get_mut(id) {
            tracker.consecutive_failures = 0;
            tracker.initiate_failures = 0;
            tracker.retry_after = None;
        }
    }

    fn forget(&self, id: &TaskId) {
        let mut attempts = self.attempts.lock().unwrap_or_else(PoisonError::into_inner);
        attempts.remove(id);
    }

    #[cfg(test)]
    pub(crate) fn lock_slots(&self) -> usize {
        self.locks.len()
    }
}
