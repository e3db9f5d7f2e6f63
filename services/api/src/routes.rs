use crate::demo::write_task_csv;
use crate::infra::{AppState, EngineOrchestrator};
use axum::extract::Path;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Extension;
use axum::Json;
use onboarding_engine::error::AppError;
use onboarding_engine::workflows::verification::{verification_router, SubjectId};
use serde_json::json;
use std::sync::Arc;

pub(crate) fn with_verification_routes(orchestrator: Arc<EngineOrchestrator>) -> axum::Router {
    verification_router(orchestrator.clone())
        .route("/health", axum::routing::get(healthcheck))
        .route("/ready", axum::routing::get(readiness_endpoint))
        .route("/metrics", axum::routing::get(metrics_endpoint))
        .route(
            "/api/v1/onboarding/subjects/:subject_id/report.csv",
            axum::routing::get(task_report_endpoint).layer(Extension(orchestrator)),
        )
}

pub(crate) async fn healthcheck() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}

pub(crate) async fn readiness_endpoint(Extension(state): Extension<AppState>) -> impl IntoResponse {
    let ready = state.readiness.load(std::sync::atomic::Ordering::Relaxed);
    let status = if ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    let payload = if ready {
        json!({ "status": "ready" })
    } else {
        json!({ "status": "initializing" })
    };

    (status, Json(payload))
}

pub(crate) async fn metrics_endpoint(Extension(state): Extension<AppState>) -> impl IntoResponse {
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        state.metrics.render(),
    )
}

/// Per-task CSV export of a subject's current progress.
pub(crate) async fn task_report_endpoint(
    Extension(orchestrator): Extension<Arc<EngineOrchestrator>>,
    Path(subject_id): Path<String>,
) -> Result<Response, AppError> {
    let progress = orchestrator.get_progress(&SubjectId::new(subject_id))?;
    let mut buffer = Vec::new();
    write_task_csv(&mut buffer, &progress)?;

    Ok((
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/csv; charset=utf-8")],
        buffer,
    )
        .into_response())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infra::{build_orchestrator, Simulation};
    use axum::body::Body;
    use axum::http::Request;
    use onboarding_engine::config::{EngineConfig, RequirementsConfig};
    use onboarding_engine::workflows::verification::{RequirementCatalog, SubjectType};
    use tower::ServiceExt;

    fn orchestrator() -> Arc<EngineOrchestrator> {
        let catalog =
            RequirementCatalog::from_config(&RequirementsConfig::default()).expect("catalog");
        let (orchestrator, _) =
            build_orchestrator(catalog, &EngineConfig::default(), &Simulation::default())
                .expect("engine");
        orchestrator
    }

    #[tokio::test]
    async fn healthcheck_reports_ok() {
        let Json(body) = healthcheck().await;
        assert_eq!(body["status"], "ok");
    }

    #[tokio::test]
    async fn health_route_is_mounted_next_to_verification_routes() {
        let router = with_verification_routes(orchestrator());

        let response = router
            .oneshot(Request::get("/health").body(Body::empty()).expect("request"))
            .await
            .expect("response");

        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn task_report_streams_csv_rows() {
        let orchestrator = orchestrator();
        let subject = SubjectId::new("ctr-5");
        orchestrator
            .ensure_tasks_for_subject_type(&subject, SubjectType::Contractor)
            .expect("seeding");
        orchestrator
            .process_subject(&subject)
            .await
            .expect("processing");

        let response = with_verification_routes(orchestrator)
            .oneshot(
                Request::get("/api/v1/onboarding/subjects/ctr-5/report.csv")
                    .body(Body::empty())
                    .expect("request"),
            )
            .await
            .expect("response");

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers()[header::CONTENT_TYPE],
            "text/csv; charset=utf-8"
        );
        let body = axum::body::to_bytes(response.into_body(), 64 * 1024)
            .await
            .expect("body");
        let text = String::from_utf8(body.to_vec()).expect("utf8");
        assert_eq!(text.lines().count(), 5);
        assert!(text.contains("ctr-5,identity_check,Background Verification,completed,passed"));
    }
}
