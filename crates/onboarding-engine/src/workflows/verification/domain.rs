use std::borrow::Cow;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Person or record undergoing verification (employee or contractor).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SubjectId(pub String);

impl SubjectId {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SubjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(pub String);

impl TaskId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Opaque token handed back by a provider adapter on initiation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProviderRef(pub String);

impl ProviderRef {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ProviderRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Kind of verification work. The set is open: configuration may name kinds
/// beyond the constants below as long as a provider adapter is registered.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskKind(Cow<'static, str>);

impl TaskKind {
    pub const IDENTITY_CHECK: Self = Self::from_static("identity_check");
    pub const ADDRESS_CHECK: Self = Self::from_static("address_check");
    pub const EDUCATION_CHECK: Self = Self::from_static("education_check");
    pub const EMPLOYMENT_CHECK: Self = Self::from_static("employment_check");
    pub const CRIMINAL_CHECK: Self = Self::from_static("criminal_check");

    pub const AADHAAR_VERIFICATION: Self = Self::from_static("aadhaar_verification");
    pub const PAN_VERIFICATION: Self = Self::from_static("pan_verification");
    pub const BANK_ACCOUNT_VERIFICATION: Self = Self::from_static("bank_account_verification");

    pub const DOCUMENT_SIGNATURE: Self = Self::from_static("document_signature");
    pub const EMPLOYMENT_AGREEMENT_SIGNATURE: Self =
        Self::from_static("employment_agreement_signature");
    pub const CONFIDENTIALITY_SIGNATURE: Self = Self::from_static("confidentiality_signature");
    pub const IP_ASSIGNMENT_SIGNATURE: Self = Self::from_static("ip_assignment_signature");
    pub const NON_COMPETE_SIGNATURE: Self = Self::from_static("non_compete_signature");

    pub const fn from_static(name: &'static str) -> Self {
        Self(Cow::Borrowed(name))
    }

    /// Builds a kind from free-form input, normalizing case and separators.
    pub fn parse(raw: &str) -> Option<Self> {
        let normalized = raw
            .trim()
            .to_ascii_lowercase()
            .replace(|c: char| c == '-' || c == ' ', "_");
        if normalized.is_empty() {
            return None;
        }
        Some(Self(Cow::Owned(normalized)))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn category(&self) -> TaskCategory {
        let name = self.as_str();
        if name.ends_with("_check") {
            TaskCategory::BackgroundCheck
        } else if name.ends_with("_verification") {
            TaskCategory::IdentityKyc
        } else if name.ends_with("_signature") {
            TaskCategory::DocumentSignature
        } else {
            TaskCategory::Other
        }
    }

    pub fn background_checks() -> [Self; 5] {
        [
            Self::IDENTITY_CHECK,
            Self::ADDRESS_CHECK,
            Self::EDUCATION_CHECK,
            Self::EMPLOYMENT_CHECK,
            Self::CRIMINAL_CHECK,
        ]
    }

    pub fn onboarding_agreements() -> [Self; 4] {
        [
            Self::EMPLOYMENT_AGREEMENT_SIGNATURE,
            Self::CONFIDENTIALITY_SIGNATURE,
            Self::IP_ASSIGNMENT_SIGNATURE,
            Self::NON_COMPETE_SIGNATURE,
        ]
    }
}

impl fmt::Display for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskCategory {
    BackgroundCheck,
    IdentityKyc,
    DocumentSignature,
    Other,
}

impl TaskCategory {
    pub const fn ordered() -> [Self; 4] {
        [
            Self::BackgroundCheck,
            Self::IdentityKyc,
            Self::DocumentSignature,
            Self::Other,
        ]
    }

    pub const fn label(self) -> &'static str {
        match self {
            Self::BackgroundCheck => "Background Verification",
            Self::IdentityKyc => "Identity (eKYC)",
            Self::DocumentSignature => "Document Signatures",
            Self::Other => "Other",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubjectType {
    Employee,
    Contractor,
}

impl SubjectType {
    pub const fn label(self) -> &'static str {
        match self {
            Self::Employee => "employee",
            Self::Contractor => "contractor",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "employee" => Some(Self::Employee),
            "contractor" => Some(Self::Contractor),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    Pending,
    InProgress,
    Completed,
    Failed,
}

impl TaskState {
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    pub const fn label(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::InProgress => "in_progress",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskResult {
    Pending,
    Passed,
    Failed,
}

impl TaskResult {
    pub const fn label(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Passed => "passed",
            Self::Failed => "failed",
        }
    }
}

/// Conclusive provider outcome for a finished check or signature.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    Passed,
    Failed,
}

impl From<Verdict> for TaskResult {
    fn from(value: Verdict) -> Self {
        match value {
            Verdict::Passed => TaskResult::Passed,
            Verdict::Failed => TaskResult::Failed,
        }
    }
}

/// Why the engine gave up on a task (`state = failed`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum FailureReason {
    ProviderRejected { detail: String },
    AttemptsExhausted { attempts: u32 },
    TimedOut { after_minutes: i64 },
    Cancelled,
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureReason::ProviderRejected { detail } => {
                write!(f, "provider rejected the request: {detail}")
            }
            FailureReason::AttemptsExhausted { attempts } => {
                write!(f, "gave up after {attempts} initiation attempts")
            }
            FailureReason::TimedOut { after_minutes } => {
                write!(f, "no provider conclusion within {after_minutes} minutes")
            }
            FailureReason::Cancelled => write!(f, "onboarding cancelled"),
        }
    }
}

/// One atomic check or signature requirement for a subject.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VerificationTask {
    pub id: TaskId,
    pub subject_id: SubjectId,
    pub kind: TaskKind,
    pub state: TaskState,
    pub result: TaskResult,
    pub initiated_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub provider_ref: Option<ProviderRef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<FailureReason>,
    #[serde(default)]
    pub retry_count: u32,
    pub version: u64,
}

impl VerificationTask {
    pub fn pending(subject_id: SubjectId, kind: TaskKind) -> Self {
        Self {
            id: TaskId::generate(),
            subject_id,
            kind,
            state: TaskState::Pending,
            result: TaskResult::Pending,
            initiated_at: None,
            completed_at: None,
            provider_ref: None,
            failure_reason: None,
            retry_count: 0,
            version: 0,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }

    pub fn is_passed(&self) -> bool {
        self.state == TaskState::Completed && self.result == TaskResult::Passed
    }

    /// The provider has not accepted work for the current attempt yet.
    pub fn needs_initiation(&self) -> bool {
        match self.state {
            TaskState::Pending => true,
            TaskState::InProgress => self.provider_ref.is_none(),
            TaskState::Completed | TaskState::Failed => false,
        }
    }

    /// `completed_at` iff terminal, `initiated_at` iff not pending.
    pub fn timestamps_consistent(&self) -> bool {
        self.completed_at.is_some() == self.is_terminal()
            && self.initiated_at.is_some() == (self.state != TaskState::Pending)
    }

    /// Whether `other` is the same persisted attempt observed earlier.
    pub(crate) fn same_attempt(&self, other: &VerificationTask) -> bool {
        self.state == other.state
            && self.provider_ref == other.provider_ref
            && self.retry_count == other.retry_count
    }

    pub fn to_view(&self) -> TaskView {
        TaskView {
            id: self.id.clone(),
            kind: self.kind.clone(),
            category: self.kind.category(),
            category_label: self.kind.category().label(),
            state: self.state,
            state_label: self.state.label(),
            result: self.result,
            result_label: self.result.label(),
            initiated_at: self.initiated_at,
            completed_at: self.completed_at,
            failure: self.failure_reason.as_ref().map(ToString::to_string),
            retry_count: self.retry_count,
        }
    }
}

/// Reporting projection of a task for status collaborators.
#[derive(Debug, Clone, Serialize)]
pub struct TaskView {
    pub id: TaskId,
    pub kind: TaskKind,
    pub category: TaskCategory,
    pub category_label: &'static str,
    pub state: TaskState,
    pub state_label: &'static str,
    pub result: TaskResult,
    pub result_label: &'static str,
    pub initiated_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure: Option<String>,
    pub retry_count: u32,
}

/// A single persisted state change. Applying one is pure; the processor pairs
/// it with a version check so a lost race never produces a partial write.
#[derive(Debug, Clone, PartialEq)]
pub enum Transition {
    Initiated(ProviderRef),
    Concluded(Verdict),
    GaveUp(FailureReason),
    ResetForRetry,
}

impl Transition {
    pub fn applies_to(&self, task: &VerificationTask) -> bool {
        match self {
            Transition::Initiated(_) => task.needs_initiation(),
            Transition::Concluded(_) => {
                task.state == TaskState::InProgress && task.provider_ref.is_some()
            }
            Transition::GaveUp(_) => !task.is_terminal(),
            Transition::ResetForRetry => task.is_terminal(),
        }
    }

    pub fn apply(&self, task: &mut VerificationTask, now: DateTime<Utc>) {
        match self {
            Transition::Initiated(reference) => {
                task.state = TaskState::InProgress;
                task.provider_ref = Some(reference.clone());
                task.initiated_at.get_or_insert(now);
            }
            Transition::Concluded(verdict) => {
                task.state = TaskState::Completed;
                task.result = (*verdict).into();
                task.completed_at = Some(now);
            }
            Transition::GaveUp(reason) => {
                task.state = TaskState::Failed;
                task.result = TaskResult::Failed;
                task.initiated_at.get_or_insert(now);
                task.completed_at = Some(now);
                task.failure_reason = Some(reason.clone());
            }
            Transition::ResetForRetry => {
                task.state = TaskState::InProgress;
                task.result = TaskResult::Pending;
                task.initiated_at = Some(now);
                task.completed_at = None;
                task.provider_ref = None;
                task.failure_reason = None;
                task.retry_count += 1;
            }
        }
    }

    pub const fn label(&self) -> &'static str {
        match self {
            Transition::Initiated(_) => "initiated",
            Transition::Concluded(_) => "concluded",
            Transition::GaveUp(_) => "gave_up",
            Transition::ResetForRetry => "reset_for_retry",
        }
    }
}
