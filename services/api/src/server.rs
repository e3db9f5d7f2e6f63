use crate::cli::ServeArgs;
use crate::infra::{build_orchestrator, AppState, Simulation};
use crate::poller;
use crate::routes::with_verification_routes;
use axum::Extension;
use axum_prometheus::PrometheusMetricLayer;
use onboarding_engine::config::AppConfig;
use onboarding_engine::error::AppError;
use onboarding_engine::telemetry;
use onboarding_engine::workflows::verification::RequirementCatalog;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tracing::info;

pub(crate) async fn run(mut args: ServeArgs) -> Result<(), AppError> {
    let mut config = AppConfig::load()?;

    if let Some(host) = args.host.take() {
        config.server.host = host;
    }
    if let Some(port) = args.port.take() {
        config.server.port = port;
    }

    telemetry::init(&config.telemetry)?;

    let (prometheus_layer, prometheus_handle) = PrometheusMetricLayer::pair();
    let readiness_flag = Arc::new(std::sync::atomic::AtomicBool::new(false));
    let app_state = AppState {
        readiness: readiness_flag.clone(),
        metrics: Arc::new(prometheus_handle),
    };

    let catalog = RequirementCatalog::from_config(&config.requirements)?;
    let simulation = Simulation {
        polls_before_conclusion: 1,
        failing_kinds: Vec::new(),
    };
    let (orchestrator, _ledger) = build_orchestrator(catalog, &config.engine, &simulation)?;
    let _poller = poller::spawn(orchestrator.clone(), config.engine.poll_interval_seconds);

    let app = with_verification_routes(orchestrator)
        .layer(Extension(app_state))
        .layer(prometheus_layer);

    let addr = config.server.socket_addr()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    readiness_flag.store(true, Ordering::Release);

    info!(?config.environment, %addr, "onboarding verification engine ready");

    axum::serve(listener, app).await?;
    Ok(())
}
