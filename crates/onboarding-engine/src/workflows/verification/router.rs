use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use serde_json::json;

use super::completion::CompletionPublisher;
use super::domain::{SubjectId, SubjectType, TaskKind, TaskView};
use super::error::VerificationError;
use super::processor::TaskError;
use super::provider::ProviderUpdate;
use super::store::TaskStore;
use super::VerificationOrchestrator;

/// Seeding request: either explicit kinds or a configured subject profile.
#[derive(Debug, Default, Deserialize)]
pub struct EnsureTasksRequest {
    #[serde(default)]
    pub kinds: Option<Vec<String>>,
    #[serde(default)]
    pub subject_type: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct SubjectTasksView {
    pub subject_id: SubjectId,
    pub tasks: Vec<TaskView>,
}

/// Router builder exposing the inbound verification operations.
pub fn verification_router<S, P>(orchestrator: Arc<VerificationOrchestrator<S, P>>) -> Router
where
    S: TaskStore + 'static,
    P: CompletionPublisher + 'static,
{
    Router::new()
        .route(
            "/api/v1/onboarding/subjects/:subject_id/tasks",
            post(ensure_tasks_handler::<S, P>),
        )
        .route(
            "/api/v1/onboarding/subjects/:subject_id/process",
            post(process_handler::<S, P>),
        )
        .route(
            "/api/v1/onboarding/subjects/:subject_id/progress",
            get(progress_handler::<S, P>),
        )
        .route(
            "/api/v1/onboarding/subjects/:subject_id/complete",
            post(complete_handler::<S, P>),
        )
        .route(
            "/api/v1/onboarding/subjects/:subject_id/cancel",
            post(cancel_handler::<S, P>),
        )
        .route(
            "/api/v1/onboarding/subjects/:subject_id/tasks/:kind/retry",
            post(retry_handler::<S, P>),
        )
        .route(
            "/api/v1/onboarding/provider-updates",
            post(provider_update_handler::<S, P>),
        )
        .with_state(orchestrator)
}

pub(crate) async fn ensure_tasks_handler<S, P>(
    State(orchestrator): State<Arc<VerificationOrchestrator<S, P>>>,
    Path(subject_id): Path<String>,
    axum::Json(request): axum::Json<EnsureTasksRequest>,
) -> Response
where
    S: TaskStore + 'static,
    P: CompletionPublisher + 'static,
{
    let subject_id = SubjectId::new(subject_id);

    let seeded = match (request.kinds, request.subject_type) {
        (Some(raw_kinds), _) => match parse_kinds(&raw_kinds) {
            Ok(kinds) => orchestrator.ensure_tasks_for_subject(&subject_id, &kinds),
            Err(payload) => return unprocessable(payload),
        },
        (None, Some(raw_type)) => match SubjectType::parse(&raw_type) {
            Some(subject_type) => {
                orchestrator.ensure_tasks_for_subject_type(&subject_id, subject_type)
            }
            None => {
                return unprocessable(json!({
                    "error": format!("unknown subject type '{raw_type}'"),
                }))
            }
        },
        (None, None) => {
            return unprocessable(json!({
                "error": "request must name kinds or a subject_type",
            }))
        }
    };

    match seeded {
        Ok(tasks) => {
            let view = SubjectTasksView {
                subject_id,
                tasks: tasks.iter().map(|task| task.to_view()).collect(),
            };
            (StatusCode::OK, axum::Json(view)).into_response()
        }
        Err(error) => error_response(error),
    }
}

pub(crate) async fn process_handler<S, P>(
    State(orchestrator): State<Arc<VerificationOrchestrator<S, P>>>,
    Path(subject_id): Path<String>,
) -> Response
where
    S: TaskStore + 'static,
    P: CompletionPublisher + 'static,
{
    let subject_id = SubjectId::new(subject_id);
    match orchestrator.process_subject(&subject_id).await {
        Ok(progress) => (StatusCode::OK, axum::Json(progress)).into_response(),
        Err(error) => error_response(error),
    }
}

pub(crate) async fn progress_handler<S, P>(
    State(orchestrator): State<Arc<VerificationOrchestrator<S, P>>>,
    Path(subject_id): Path<String>,
) -> Response
where
    S: TaskStore + 'static,
    P: CompletionPublisher + 'static,
{
    match orchestrator.get_progress(&SubjectId::new(subject_id)) {
        Ok(progress) => (StatusCode::OK, axum::Json(progress)).into_response(),
        Err(error) => error_response(error),
    }
}

pub(crate) async fn complete_handler<S, P>(
    State(orchestrator): State<Arc<VerificationOrchestrator<S, P>>>,
    Path(subject_id): Path<String>,
) -> Response
where
    S: TaskStore + 'static,
    P: CompletionPublisher + 'static,
{
    match orchestrator.mark_subject_verification_complete(&SubjectId::new(subject_id)) {
        Ok(notice) => (StatusCode::OK, axum::Json(notice)).into_response(),
        Err(error) => error_response(error),
    }
}

pub(crate) async fn cancel_handler<S, P>(
    State(orchestrator): State<Arc<VerificationOrchestrator<S, P>>>,
    Path(subject_id): Path<String>,
) -> Response
where
    S: TaskStore + 'static,
    P: CompletionPublisher + 'static,
{
    let subject_id = SubjectId::new(subject_id);
    match orchestrator.cancel_subject(&subject_id).await {
        Ok(progress) => (StatusCode::OK, axum::Json(progress)).into_response(),
        Err(error) => error_response(error),
    }
}

pub(crate) async fn retry_handler<S, P>(
    State(orchestrator): State<Arc<VerificationOrchestrator<S, P>>>,
    Path((subject_id, raw_kind)): Path<(String, String)>,
) -> Response
where
    S: TaskStore + 'static,
    P: CompletionPublisher + 'static,
{
    let Some(kind) = TaskKind::parse(&raw_kind) else {
        return unprocessable(json!({ "error": "task kind must not be empty" }));
    };

    match orchestrator
        .retry_task(&SubjectId::new(subject_id), &kind)
        .await
    {
        Ok(task) => (StatusCode::OK, axum::Json(task.to_view())).into_response(),
        Err(error) => error_response(error),
    }
}

pub(crate) async fn provider_update_handler<S, P>(
    State(orchestrator): State<Arc<VerificationOrchestrator<S, P>>>,
    axum::Json(update): axum::Json<ProviderUpdate>,
) -> Response
where
    S: TaskStore + 'static,
    P: CompletionPublisher + 'static,
{
    match orchestrator.apply_provider_update(&update).await {
        Ok(task) => (StatusCode::OK, axum::Json(task.to_view())).into_response(),
        Err(error) => error_response(error),
    }
}

fn parse_kinds(raw: &[String]) -> Result<Vec<TaskKind>, serde_json::Value> {
    let mut kinds = Vec::with_capacity(raw.len());
    for value in raw {
        match TaskKind::parse(value) {
            Some(kind) => kinds.push(kind),
            None => return Err(json!({ "error": "task kinds must not be empty" })),
        }
    }
    Ok(kinds)
}

fn unprocessable(payload: serde_json::Value) -> Response {
    (StatusCode::UNPROCESSABLE_ENTITY, axum::Json(payload)).into_response()
}

pub(crate) fn error_response(error: VerificationError) -> Response {
    let status = match &error {
        VerificationError::Configuration(_)
        | VerificationError::Task(TaskError::MissingProvider(_)) => {
            StatusCode::UNPROCESSABLE_ENTITY
        }
        VerificationError::TaskNotFound { .. } | VerificationError::UnknownProviderRef(_) => {
            StatusCode::NOT_FOUND
        }
        VerificationError::GateNotSatisfied { .. }
        | VerificationError::Task(TaskError::Conflict)
        | VerificationError::Task(TaskError::NotTerminal(_)) => StatusCode::CONFLICT,
        VerificationError::Task(TaskError::Provider(_)) => StatusCode::BAD_GATEWAY,
        VerificationError::Store(_)
        | VerificationError::Task(TaskError::Store(_))
        | VerificationError::Publish(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };

    let payload = match &error {
        VerificationError::GateNotSatisfied { summary, .. } => json!({
            "error": error.to_string(),
            "summary": summary,
        }),
        _ => json!({ "error": error.to_string() }),
    };

    (status, axum::Json(payload)).into_response()
}
