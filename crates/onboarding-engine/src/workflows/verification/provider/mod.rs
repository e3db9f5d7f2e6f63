//! Capability interface for external verification and signature vendors.
//!
//! The processor drives every kind through the same three calls; vendor
//! latency and retry quirks stay inside the adapter implementations.

pub mod simulated;
pub mod status;

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;

use super::domain::{ProviderRef, TaskKind, Verdict, VerificationTask};
use super::requirements::RequirementCatalog;

pub use simulated::SimulatedProvider;
pub use status::{CheckStatus, CheckVerdict, ProviderUpdate, SignatureStatus};

/// Result of polling an in-flight task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", content = "verdict", rename_all = "snake_case")]
pub enum AdvanceOutcome {
    InFlight,
    Concluded(Verdict),
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProviderError {
    /// Network failures, timeouts, throttling. Retried with backoff.
    #[error("transient provider failure: {0}")]
    Transient(String),
    /// The request itself is invalid or was refused for good.
    #[error("provider rejected the request: {0}")]
    Permanent(String),
}

#[async_trait]
pub trait ProviderAdapter: Send + Sync {
    /// Starts external work. Called once per task attempt.
    async fn initiate(&self, task: &VerificationTask) -> Result<ProviderRef, ProviderError>;

    /// Non-blocking poll of an in-flight task; safe to repeat.
    async fn advance(&self, task: &VerificationTask) -> Result<AdvanceOutcome, ProviderError>;

    /// Best-effort withdrawal when onboarding is abandoned.
    async fn cancel(&self, task: &VerificationTask) -> Result<(), ProviderError>;
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigurationError {
    #[error("no provider adapter registered for kinds: {}", join_kinds(.missing))]
    MissingProviders { missing: Vec<TaskKind> },
    #[error("requirement profile for {subject_type} lists no kinds")]
    EmptyRequirements { subject_type: &'static str },
}

fn join_kinds(kinds: &[TaskKind]) -> String {
    kinds
        .iter()
        .map(TaskKind::as_str)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Maps each kind to the adapter responsible for it.
#[derive(Default, Clone)]
pub struct ProviderRegistry {
    adapters: HashMap<TaskKind, Arc<dyn ProviderAdapter>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, kind: TaskKind, adapter: Arc<dyn ProviderAdapter>) -> &mut Self {
        self.adapters.insert(kind, adapter);
        self
    }

    pub fn register_all<I>(&mut self, kinds: I, adapter: Arc<dyn ProviderAdapter>) -> &mut Self
    where
        I: IntoIterator<Item = TaskKind>,
    {
        for kind in kinds {
            self.adapters.insert(kind, adapter.clone());
        }
        self
    }

    pub fn get(&self, kind: &TaskKind) -> Option<Arc<dyn ProviderAdapter>> {
        self.adapters.get(kind).cloned()
    }

    pub fn kinds(&self) -> BTreeSet<TaskKind> {
        self.adapters.keys().cloned().collect()
    }

    /// Fails with every kind lacking an adapter, not just the first one.
    pub fn ensure_registered(&self, kinds: &[TaskKind]) -> Result<(), ConfigurationError> {
        let missing: BTreeSet<TaskKind> = kinds
            .iter()
            .filter(|kind| !self.adapters.contains_key(*kind))
            .cloned()
            .collect();

        if missing.is_empty() {
            Ok(())
        } else {
            Err(ConfigurationError::MissingProviders {
                missing: missing.into_iter().collect(),
            })
        }
    }

    /// Startup validation of every configured requirement profile.
    pub fn ensure_covers(&self, catalog: &RequirementCatalog) -> Result<(), ConfigurationError> {
        let kinds: Vec<TaskKind> = catalog.all_kinds().into_iter().collect();
        self.ensure_registered(&kinds)
    }
}

impl std::fmt::Debug for ProviderRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderRegistry")
            .field("kinds", &self.kinds())
            .finish()
    }
}
