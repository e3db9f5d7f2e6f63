use super::completion::PublishError;
use super::domain::{ProviderRef, SubjectId, TaskKind};
use super::processor::TaskError;
use super::progress::ProgressSummary;
use super::provider::ConfigurationError;
use super::store::StoreError;

/// Operation-level failure surfaced by the orchestrator. Failures of an
/// individual task during a pass are reported inside the progress instead.
#[derive(Debug, thiserror::Error)]
pub enum VerificationError {
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("subject {subject_id} has no {kind} task")]
    TaskNotFound { subject_id: SubjectId, kind: TaskKind },
    #[error("no task is waiting on provider reference {0}")]
    UnknownProviderRef(ProviderRef),
    #[error(
        "verification incomplete for {subject_id}: {passed}/{total} tasks passed",
        passed = summary.passed,
        total = summary.total
    )]
    GateNotSatisfied {
        subject_id: SubjectId,
        summary: ProgressSummary,
    },
    #[error(transparent)]
    Task(#[from] TaskError),
    #[error(transparent)]
    Publish(#[from] PublishError),
}
