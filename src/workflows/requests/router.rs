use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Extension, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::json;

use super::access::{Caller, StaffDirectory};
use super::domain::{Action, ActionCommand, Event, EventId, NewRequest, RequestId, RequestView};
use super::events::Audience;
use super::lifecycle::{LifecycleEngine, LifecycleError, NotificationReceipt};
use super::notifications::NotificationDispatcher;
use super::store::RequestRepository;

/// Router builder exposing request intake, timelines, actions and the deadline report.
///
/// Callers are identified against `staff`; the request body never names the actor.
pub fn request_router<R, D>(engine: Arc<LifecycleEngine<R, D>>, staff: StaffDirectory) -> Router
where
    R: RequestRepository + 'static,
    D: NotificationDispatcher + 'static,
{
    Router::new()
        .route("/api/v1/requests", post(submit_handler::<R, D>))
        .route("/api/v1/requests/:request_id", get(request_handler::<R, D>))
        .route(
            "/api/v1/requests/:request_id/events",
            get(events_handler::<R, D>),
        )
        .route(
            "/api/v1/requests/:request_id/actions",
            post(action_handler::<R, D>),
        )
        .route("/api/v1/reports/deadlines", get(deadlines_handler::<R, D>))
        .with_state(engine)
        .layer(Extension(Arc::new(staff)))
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct EventsParams {
    #[serde(default)]
    pub(crate) after: Option<u64>,
    #[serde(default)]
    pub(crate) limit: Option<usize>,
    #[serde(default)]
    pub(crate) audience: Audience,
}

/// Action body; the request id comes from the path and the actor from the caller.
#[derive(Debug, Deserialize)]
pub(crate) struct ActionSubmission {
    #[serde(default)]
    pub(crate) expected_revision: Option<u64>,
    pub(crate) action: Action,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub(crate) enum ReportFormat {
    #[default]
    Json,
    Csv,
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct ReportParams {
    #[serde(default)]
    pub(crate) format: ReportFormat,
}

#[derive(Debug, Serialize)]
struct TransitionView {
    request: RequestView,
    events: Vec<Event>,
    notifications: Vec<NotificationReceipt>,
}

pub(crate) async fn submit_handler<R, D>(
    State(engine): State<Arc<LifecycleEngine<R, D>>>,
    axum::Json(submission): axum::Json<NewRequest>,
) -> Response
where
    R: RequestRepository + 'static,
    D: NotificationDispatcher + 'static,
{
    match engine.submit(submission) {
        Ok(request) => {
            let view = request.view(engine.now());
            (StatusCode::CREATED, axum::Json(view)).into_response()
        }
        Err(err) => error_response(err),
    }
}

pub(crate) async fn request_handler<R, D>(
    State(engine): State<Arc<LifecycleEngine<R, D>>>,
    Path(request_id): Path<String>,
) -> Response
where
    R: RequestRepository + 'static,
    D: NotificationDispatcher + 'static,
{
    match engine.get(&RequestId(request_id)) {
        Ok(request) => {
            let view = request.view(engine.now());
            (StatusCode::OK, axum::Json(view)).into_response()
        }
        Err(err) => error_response(err),
    }
}

pub(crate) async fn events_handler<R, D>(
    State(engine): State<Arc<LifecycleEngine<R, D>>>,
    caller: Caller,
    Path(request_id): Path<String>,
    Query(params): Query<EventsParams>,
) -> Response
where
    R: RequestRepository + 'static,
    D: NotificationDispatcher + 'static,
{
    let audience = match caller.audience(params.audience) {
        Ok(audience) => audience,
        Err(err) => return error_response(err),
    };
    let id = RequestId(request_id);
    match engine.events(&id, params.after.map(EventId), params.limit, audience) {
        Ok(page) => (StatusCode::OK, axum::Json(page)).into_response(),
        Err(err) => error_response(err),
    }
}

pub(crate) async fn action_handler<R, D>(
    State(engine): State<Arc<LifecycleEngine<R, D>>>,
    caller: Caller,
    Path(request_id): Path<String>,
    axum::Json(submission): axum::Json<ActionSubmission>,
) -> Response
where
    R: RequestRepository + 'static,
    D: NotificationDispatcher + 'static,
{
    let command = ActionCommand {
        request_id: RequestId(request_id),
        actor: caller.actor(),
        expected_revision: submission.expected_revision,
        action: submission.action,
    };

    match engine.apply(command) {
        Ok(outcome) => {
            let view = TransitionView {
                request: outcome.request.view(engine.now()),
                events: outcome.events,
                notifications: outcome.notifications,
            };
            (StatusCode::OK, axum::Json(view)).into_response()
        }
        Err(err) => error_response(err),
    }
}

pub(crate) async fn deadlines_handler<R, D>(
    State(engine): State<Arc<LifecycleEngine<R, D>>>,
    Query(params): Query<ReportParams>,
) -> Response
where
    R: RequestRepository + 'static,
    D: NotificationDispatcher + 'static,
{
    let report = match engine.deadlines() {
        Ok(report) => report,
        Err(err) => return error_response(err),
    };

    match params.format {
        ReportFormat::Json => (StatusCode::OK, axum::Json(report.summary())).into_response(),
        ReportFormat::Csv => match report.to_csv_string() {
            Ok(body) => (
                StatusCode::OK,
                [(header::CONTENT_TYPE, "text/csv; charset=utf-8")],
                body,
            )
                .into_response(),
            Err(err) => {
                let payload = json!({
                    "error": format!("failed to render deadline report: {err}"),
                });
                (StatusCode::INTERNAL_SERVER_ERROR, axum::Json(payload)).into_response()
            }
        },
    }
}

pub(crate) fn status_for(err: &LifecycleError) -> StatusCode {
    match err {
        LifecycleError::NotFound(_) => StatusCode::NOT_FOUND,
        LifecycleError::Conflict { .. } | LifecycleError::InvalidTransition { .. } => {
            StatusCode::CONFLICT
        }
        LifecycleError::Forbidden(_) => StatusCode::FORBIDDEN,
        LifecycleError::InvalidExtension { .. }
        | LifecycleError::MissingExplanation
        | LifecycleError::TooManyFiles { .. }
        | LifecycleError::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
        LifecycleError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn error_response(err: LifecycleError) -> Response {
    let status = status_for(&err);
    let mut payload = json!({
        "error": err.to_string(),
    });
    if let LifecycleError::Conflict { actual, .. } = err {
        payload["current_revision"] = json!(actual);
    }
    (status, axum::Json(payload)).into_response()
}
