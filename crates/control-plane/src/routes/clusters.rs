//! Cluster lifecycle endpoints.

use axum::{
    Json,
    extract::{Path, State},
};

use control_common::{
    ClusterConfirmResponse, ClusterEventInput, ClusterIdentity, ClusterInput,
    ClusterRegResponse, ClusterSnapshot, DeleteClusterInput, StatusResponse,
};

use super::ApiResult;
use crate::state::AppState;

/// Create a cluster record and hand back its install token
pub async fn register(
    State(state): State<AppState>,
    Json(input): Json<ClusterInput>,
) -> ApiResult<ClusterRegResponse> {
    Ok(Json(state.registry.register(input).await?))
}

/// Agent first contact: swaps the bootstrap key for a fresh one
pub async fn confirm(
    State(state): State<AppState>,
    Json(identity): Json<ClusterIdentity>,
) -> ApiResult<ClusterConfirmResponse> {
    let outcome = state.registry.confirm(&identity).await?;
    Ok(Json(outcome.into()))
}

pub async fn publish_event(
    State(state): State<AppState>,
    Json(input): Json<ClusterEventInput>,
) -> ApiResult<StatusResponse> {
    let status = state.registry.publish_event(&input).await?;
    Ok(Json(StatusResponse::new(status)))
}

pub async fn delete_cluster(
    State(state): State<AppState>,
    Json(input): Json<DeleteClusterInput>,
) -> ApiResult<StatusResponse> {
    let status = state.teardown.teardown(&input.cluster_id).await?;
    Ok(Json(StatusResponse::new(status)))
}

/// Install manifests look their cluster up through the registration token
pub async fn resolve_token(
    State(state): State<AppState>,
    Path(token): Path<String>,
) -> ApiResult<ClusterSnapshot> {
    Ok(Json(state.registry.resolve_registration_token(&token).await?))
}
