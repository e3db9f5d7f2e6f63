use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::domain::{SubjectId, TaskKind};

/// Receiver for completion notices; the onboarding record owner performs the
/// actual record transition.
pub trait CompletionPublisher: Send + Sync {
    fn publish(&self, notice: CompletionNotice) -> Result<(), PublishError>;
}

/// Payload handed to the record owner once every required task has passed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompletionNotice {
    pub subject_id: SubjectId,
    pub verified_at: DateTime<Utc>,
    pub kinds: Vec<TaskKind>,
}

#[derive(Debug, thiserror::Error)]
pub enum PublishError {
    #[error("completion sink unavailable: {0}")]
    Transport(String),
}
