use metrics_exporter_prometheus::PrometheusHandle;
use onboarding_engine::config::EngineConfig;
use onboarding_engine::workflows::verification::{
    CompletionNotice, CompletionPublisher, ConfigurationError, InMemoryTaskStore,
    ProviderRegistry, PublishError, RequirementCatalog, SimulatedProvider, TaskCategory,
    TaskKind, VerificationOrchestrator,
};
use std::sync::atomic::AtomicBool;
use std::sync::{Arc, Mutex};
use tracing::info;

pub(crate) type EngineOrchestrator =
    VerificationOrchestrator<InMemoryTaskStore, InMemoryCompletionLedger>;

#[derive(Clone)]
pub(crate) struct AppState {
    pub(crate) readiness: Arc<AtomicBool>,
    pub(crate) metrics: Arc<PrometheusHandle>,
}

/// Stands in for the onboarding-record service: keeps every completion
/// notice it is handed.
#[derive(Default, Clone)]
pub(crate) struct InMemoryCompletionLedger {
    notices: Arc<Mutex<Vec<CompletionNotice>>>,
}

impl CompletionPublisher for InMemoryCompletionLedger {
    fn publish(&self, notice: CompletionNotice) -> Result<(), PublishError> {
        let mut guard = self
            .notices
            .lock()
            .map_err(|_| PublishError::Transport("completion ledger poisoned".to_string()))?;
        info!(subject_id = %notice.subject_id, kinds = notice.kinds.len(), "subject ready to complete");
        guard.push(notice);
        Ok(())
    }
}

impl InMemoryCompletionLedger {
    pub(crate) fn notices(&self) -> Vec<CompletionNotice> {
        self.notices
            .lock()
            .map(|guard| guard.clone())
            .unwrap_or_default()
    }
}

/// How the simulated vendors behave.
#[derive(Debug, Clone, Default)]
pub(crate) struct Simulation {
    pub(crate) polls_before_conclusion: u32,
    pub(crate) failing_kinds: Vec<TaskKind>,
}

/// Registers a background-check vendor and an e-signature vendor for every
/// kind the catalog requires.
pub(crate) fn build_registry(catalog: &RequirementCatalog, simulation: &Simulation) -> ProviderRegistry {
    let checks = Arc::new(
        SimulatedProvider::new("bgv", simulation.polls_before_conclusion)
            .failing(simulation.failing_kinds.iter().cloned()),
    );
    let signatures = Arc::new(
        SimulatedProvider::new("esign", simulation.polls_before_conclusion)
            .failing(simulation.failing_kinds.iter().cloned()),
    );

    let (documents, others): (Vec<TaskKind>, Vec<TaskKind>) = catalog
        .all_kinds()
        .into_iter()
        .partition(|kind| kind.category() == TaskCategory::DocumentSignature);

    let mut registry = ProviderRegistry::new();
    registry
        .register_all(others, checks)
        .register_all(documents, signatures);
    registry
}

pub(crate) fn build_orchestrator(
    catalog: RequirementCatalog,
    engine: &EngineConfig,
    simulation: &Simulation,
) -> Result<(Arc<EngineOrchestrator>, InMemoryCompletionLedger), ConfigurationError> {
    let ledger = InMemoryCompletionLedger::default();
    let registry = build_registry(&catalog, simulation);
    let orchestrator = VerificationOrchestrator::from_config(
        Arc::new(InMemoryTaskStore::new()),
        registry,
        Arc::new(ledger.clone()),
        catalog,
        engine,
    )?;
    Ok((Arc::new(orchestrator), ledger))
}
