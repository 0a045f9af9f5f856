//! Pod log request and delivery endpoints.

use axum::{Json, extract::State};

use control_common::{PodLog, PodLogRequest, PodLogResponse, StatusResponse};

use super::ApiResult;
use crate::state::AppState;

/// Agent answer to an earlier log request
pub async fn pod_log(
    State(state): State<AppState>,
    Json(pod_log): Json<PodLog>,
) -> ApiResult<StatusResponse> {
    let outcome = state.logs.deliver(pod_log).await?;
    Ok(Json(StatusResponse::new(outcome.status())))
}

/// Dashboard side: blocks until the agent answers or the request times out
pub async fn request_log(
    State(state): State<AppState>,
    Json(request): Json<PodLogRequest>,
) -> ApiResult<PodLogResponse> {
    let timeout = state.config.log_requests.timeout();
    Ok(Json(state.logs.request(request, timeout).await?))
}
