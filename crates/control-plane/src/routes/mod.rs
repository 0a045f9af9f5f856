//! HTTP route handlers for the control plane.

use axum::{
    Json, Router,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::Serialize;
use tower_http::trace::TraceLayer;

use control_common::ControlPlaneError;

use crate::state::AppState;

mod clusters;
mod health;
mod logs;
mod subscriptions;
mod workflows;

/// Create the main application router
pub fn create_router(state: AppState) -> Router {
    Router::new()
        // Health & Status
        .route("/health", get(health::health_check))
        .route("/ready", get(health::ready_check))
        .route("/stats", get(health::stats))

        // Cluster lifecycle
        .route("/clusters/register", post(clusters::register))
        .route("/clusters/confirm", post(clusters::confirm))
        .route("/clusters/events", post(clusters::publish_event))
        .route("/clusters/delete", post(clusters::delete_cluster))
        .route("/clusters/token/{token}", get(clusters::resolve_token))

        // Agent reports
        .route("/workflows/runs", post(workflows::workflow_run))
        .route("/logs", post(logs::pod_log))
        .route("/logs/request", post(logs::request_log))

        // Live channels
        .route("/subscribe/clusters", get(subscriptions::global_cluster_events))
        .route("/subscribe/clusters/{project_id}", get(subscriptions::cluster_events))
        .route("/subscribe/workflows/{project_id}", get(subscriptions::workflow_runs))
        .route("/agents/connect", get(subscriptions::agent_connect))

        .layer(TraceLayer::new_for_http().make_span_with(request_span))
        .with_state(state)
}

/// Request span without the query string, which may carry identifiers
fn request_span(request: &axum::extract::Request) -> tracing::Span {
    tracing::debug_span!(
        "request",
        method = %request.method(),
        path = %request.uri().path(),
    )
}

/// Error body returned by every handler
#[derive(Serialize)]
struct ErrorBody {
    error: String,
}

/// Maps domain errors onto HTTP responses
#[derive(Debug)]
pub struct ApiError(ControlPlaneError);

impl From<ControlPlaneError> for ApiError {
    fn from(err: ControlPlaneError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.0.status_code())
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        if status.is_server_error() {
            tracing::error!(error = %self.0, retryable = self.0.is_retryable(), "Request failed");
        }
        (status, Json(ErrorBody { error: self.0.to_string() })).into_response()
    }
}

pub type ApiResult<T> = Result<Json<T>, ApiError>;
