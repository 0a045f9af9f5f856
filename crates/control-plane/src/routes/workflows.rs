//! Workflow run reports from agents.

use axum::{Json, extract::State};

use control_common::{StatusResponse, WorkflowRunInput};

use super::ApiResult;
use crate::state::AppState;

pub async fn workflow_run(
    State(state): State<AppState>,
    Json(input): Json<WorkflowRunInput>,
) -> ApiResult<StatusResponse> {
    let outcome = state.ingester.handle(input).await?;
    Ok(Json(StatusResponse::new(outcome.status())))
}
