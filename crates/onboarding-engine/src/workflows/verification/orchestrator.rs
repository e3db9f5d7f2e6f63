use std::sync::Arc;

use futures::stream::{self, StreamExt};
use tracing::{debug, info, warn};

use super::backoff::RetryPolicy;
use super::clock::{Clock, SystemClock};
use super::completion::{CompletionNotice, CompletionPublisher};
use super::domain::{SubjectId, SubjectType, TaskKind, VerificationTask};
use super::error::VerificationError;
use super::processor::{StalePolicy, StepAction, StepReport, TaskProcessor};
use super::progress::{ProgressSummary, SubjectProgress, TaskIssue, STALE_ISSUE};
use super::provider::{ConfigurationError, ProviderRegistry, ProviderUpdate};
use super::requirements::RequirementCatalog;
use super::store::TaskStore;
use crate::config::EngineConfig;

/// Entry point for the surrounding application: seeds task sets, fans
/// processing out across a subject's open tasks, and reports readiness.
///
/// The orchestrator never marks the onboarding record itself; it hands a
/// [`CompletionNotice`] to the publisher only when asked to and only when
/// the completion gate holds.
pub struct VerificationOrchestrator<S, P> {
    store: Arc<S>,
    processor: Arc<TaskProcessor<S>>,
    publisher: Arc<P>,
    requirements: Arc<RequirementCatalog>,
    concurrency_limit: usize,
}

impl<S, P> VerificationOrchestrator<S, P>
where
    S: TaskStore + 'static,
    P: CompletionPublisher + 'static,
{
    pub fn new(
        store: Arc<S>,
        processor: Arc<TaskProcessor<S>>,
        publisher: Arc<P>,
        requirements: Arc<RequirementCatalog>,
        concurrency_limit: usize,
    ) -> Self {
        Self {
            store,
            processor,
            publisher,
            requirements,
            concurrency_limit: concurrency_limit.max(1),
        }
    }

    /// Wires a processor from engine settings after checking that every
    /// required kind has an adapter.
    pub fn from_config(
        store: Arc<S>,
        providers: ProviderRegistry,
        publisher: Arc<P>,
        requirements: RequirementCatalog,
        config: &EngineConfig,
    ) -> Result<Self, ConfigurationError> {
        Self::with_clock(
            store,
            providers,
            publisher,
            requirements,
            config,
            Arc::new(SystemClock),
        )
    }

    pub fn with_clock(
        store: Arc<S>,
        providers: ProviderRegistry,
        publisher: Arc<P>,
        requirements: RequirementCatalog,
        config: &EngineConfig,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, ConfigurationError> {
        providers.ensure_covers(&requirements)?;

        let processor = Arc::new(TaskProcessor::new(
            store.clone(),
            Arc::new(providers),
            RetryPolicy::from(config),
            StalePolicy::from(config),
            clock,
        ));

        Ok(Self::new(
            store,
            processor,
            publisher,
            Arc::new(requirements),
            config.concurrency_limit,
        ))
    }

    pub fn requirements(&self) -> &RequirementCatalog {
        &self.requirements
    }

    pub fn processor(&self) -> &TaskProcessor<S> {
        &self.processor
    }

    /// Idempotently creates one task per kind. Kinds without an adapter are
    /// rejected before anything is written.
    pub fn ensure_tasks_for_subject(
        &self,
        subject_id: &SubjectId,
        kinds: &[TaskKind],
    ) -> Result<Vec<VerificationTask>, VerificationError> {
        self.processor.providers().ensure_registered(kinds)?;
        let tasks = self.store.ensure_tasks(subject_id, kinds)?;
        debug!(%subject_id, tasks = tasks.len(), "verification tasks ensured");
        Ok(tasks)
    }

    /// Seeds the configured requirement profile for `subject_type`.
    pub fn ensure_tasks_for_subject_type(
        &self,
        subject_id: &SubjectId,
        subject_type: SubjectType,
    ) -> Result<Vec<VerificationTask>, VerificationError> {
        let kinds = self.requirements.kinds_for(subject_type).ok_or(
            ConfigurationError::EmptyRequirements {
                subject_type: subject_type.label(),
            },
        )?;
        self.ensure_tasks_for_subject(subject_id, kinds)
    }

    /// Runs one processing pass over every non-terminal task of the subject.
    ///
    /// Per-task failures are returned as issues on the progress; only store
    /// failures while loading the task set abort the pass.
    pub async fn process_subject(
        &self,
        subject_id: &SubjectId,
    ) -> Result<SubjectProgress, VerificationError> {
        let tasks = self.store.get(subject_id)?;
        let open: Vec<VerificationTask> =
            tasks.into_iter().filter(|task| !task.is_terminal()).collect();

        if open.is_empty() {
            debug!(%subject_id, "no open tasks, nothing to process");
            return self.get_progress(subject_id);
        }

        let reports: Vec<Vec<StepReport>> = stream::iter(open)
            .map(|task| self.drive(task))
            .buffer_unordered(self.concurrency_limit)
            .collect()
            .await;

        let issues = self.issues_from(reports.into_iter().flatten());
        let tasks = self.store.get(subject_id)?;
        let progress = SubjectProgress::from_tasks(subject_id.clone(), &tasks, issues);

        info!(
            %subject_id,
            total = progress.summary.total,
            completed = progress.summary.completed,
            passed = progress.summary.passed,
            failed = progress.summary.failed,
            issues = progress.issues.len(),
            status = progress.status_label,
            "subject processing pass finished"
        );
        Ok(progress)
    }

    /// A freshly initiated task is polled once more in the same pass so fast
    /// providers can conclude without waiting for the next orchestration call.
    async fn drive(&self, task: VerificationTask) -> Vec<StepReport> {
        let first = self.processor.step(&task).await;
        if first.action != StepAction::Initiated {
            return vec![first];
        }

        let follow_up = self.processor.step(&task).await;
        vec![first, follow_up]
    }

    fn issues_from(&self, reports: impl Iterator<Item = StepReport>) -> Vec<TaskIssue> {
        let stale_minutes = self.processor.stale_policy().after().num_minutes();
        let mut issues = Vec::new();

        for report in reports {
            if report.stale {
                issues.push(TaskIssue {
                    task_id: report.task_id.clone(),
                    kind: report.kind.clone(),
                    issue: STALE_ISSUE,
                    detail: format!("in progress for more than {stale_minutes} minutes"),
                });
            }
            if let Some(error) = report.error {
                issues.push(TaskIssue {
                    task_id: report.task_id,
                    kind: report.kind,
                    issue: error.label(),
                    detail: error.to_string(),
                });
            }
        }

        issues
    }

    pub fn get_progress(
        &self,
        subject_id: &SubjectId,
    ) -> Result<SubjectProgress, VerificationError> {
        let tasks = self.store.get(subject_id)?;
        Ok(SubjectProgress::from_tasks(subject_id.clone(), &tasks, Vec::new()))
    }

    pub fn is_complete(&self, subject_id: &SubjectId) -> Result<bool, VerificationError> {
        let tasks = self.store.get(subject_id)?;
        Ok(ProgressSummary::summarize(&tasks).gate_satisfied())
    }

    /// Publishes a completion notice when, and only when, every task has
    /// completed with a passing result.
    pub fn mark_subject_verification_complete(
        &self,
        subject_id: &SubjectId,
    ) -> Result<CompletionNotice, VerificationError> {
        let tasks = self.store.get(subject_id)?;
        let summary = ProgressSummary::summarize(&tasks);
        if !summary.gate_satisfied() {
            return Err(VerificationError::GateNotSatisfied {
                subject_id: subject_id.clone(),
                summary,
            });
        }

        let notice = CompletionNotice {
            subject_id: subject_id.clone(),
            verified_at: self.processor.now(),
            kinds: tasks.into_iter().map(|task| task.kind).collect(),
        };
        self.publisher.publish(notice.clone())?;

        info!(%subject_id, kinds = notice.kinds.len(), "subject verification completed");
        Ok(notice)
    }

    /// Abandons every open task of the subject. Completed and failed tasks
    /// keep their outcome.
    pub async fn cancel_subject(
        &self,
        subject_id: &SubjectId,
    ) -> Result<SubjectProgress, VerificationError> {
        let tasks = self.store.get(subject_id)?;
        let mut issues = Vec::new();

        for task in tasks.iter().filter(|task| !task.is_terminal()) {
            if let Err(error) = self.processor.cancel(task).await {
                warn!(%subject_id, task_id = %task.id, %error, "task could not be cancelled");
                issues.push(TaskIssue {
                    task_id: task.id.clone(),
                    kind: task.kind.clone(),
                    issue: error.label(),
                    detail: error.to_string(),
                });
            }
        }

        let tasks = self.store.get(subject_id)?;
        info!(%subject_id, "subject verification cancelled");
        Ok(SubjectProgress::from_tasks(subject_id.clone(), &tasks, issues))
    }

    /// Re-opens a terminal task; the next pass re-initiates it.
    pub async fn retry_task(
        &self,
        subject_id: &SubjectId,
        kind: &TaskKind,
    ) -> Result<VerificationTask, VerificationError> {
        let task = self.store.get_by_kind(subject_id, kind)?.ok_or_else(|| {
            VerificationError::TaskNotFound {
                subject_id: subject_id.clone(),
                kind: kind.clone(),
            }
        })?;

        let reset = self.processor.reset_for_retry(&task).await?;
        info!(%subject_id, %kind, retry_count = reset.retry_count, "task reset for retry");
        Ok(reset)
    }

    /// Applies a status pushed by a provider for the task holding its
    /// reference.
    pub async fn apply_provider_update(
        &self,
        update: &ProviderUpdate,
    ) -> Result<VerificationTask, VerificationError> {
        let reference = update.provider_ref();
        let task = self
            .store
            .find_by_provider_ref(reference)?
            .ok_or_else(|| VerificationError::UnknownProviderRef(reference.clone()))?;

        let saved = self.processor.apply_outcome(&task, update.outcome()).await?;
        debug!(
            subject_id = %saved.subject_id,
            %reference,
            state = saved.state.label(),
            "provider update applied"
        );
        Ok(saved)
    }

    /// Subjects with at least one task still open, for background polling.
    pub fn open_subjects(&self) -> Result<Vec<SubjectId>, VerificationError> {
        Ok(self.store.open_subjects()?)
    }
}
