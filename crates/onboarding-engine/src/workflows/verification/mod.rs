//! Onboarding verification engine: background checks, identity KYC, and
//! document signatures tracked as independent tasks per subject.
//!
//! The orchestrator fans processing out across a subject's open tasks, the
//! processor advances each task through its state machine against a provider
//! adapter, and the progress roll-up decides whether the onboarding record
//! may be marked verified.

pub mod backoff;
pub mod clock;
pub mod completion;
pub mod domain;
pub mod error;
pub mod orchestrator;
pub mod processor;
pub mod progress;
pub mod provider;
pub mod requirements;
pub mod router;
pub mod store;

#[cfg(test)]
mod tests;

pub use backoff::RetryPolicy;
pub use clock::{Clock, SystemClock};
pub use completion::{CompletionNotice, CompletionPublisher, PublishError};
pub use domain::{
    FailureReason, ProviderRef, SubjectId, SubjectType, TaskCategory, TaskId, TaskKind,
    TaskResult, TaskState, TaskView, Transition, Verdict, VerificationTask,
};
pub use error::VerificationError;
pub use orchestrator::VerificationOrchestrator;
pub use processor::{StalePolicy, StepAction, StepReport, TaskError, TaskProcessor};
pub use progress::{CategoryProgress, ProgressSummary, SubjectProgress, SubjectStatus, TaskIssue};
pub use provider::{
    AdvanceOutcome, CheckStatus, CheckVerdict, ConfigurationError, ProviderAdapter,
    ProviderError, ProviderRegistry, ProviderUpdate, SignatureStatus, SimulatedProvider,
};
pub use requirements::RequirementCatalog;
pub use router::verification_router;
pub use store::{InMemoryTaskStore, StoreError, TaskStore};
