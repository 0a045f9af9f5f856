//! Health check endpoints.

use axum::{Json, extract::State, http::StatusCode};
use serde::Serialize;

use crate::broadcast::BroadcastStats;
use crate::state::AppState;

#[derive(Serialize)]
pub struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

/// Basic health check (is the server running?)
pub async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

#[derive(Serialize)]
pub struct ReadyResponse {
    status: &'static str,
    redis: Option<bool>,
}

/// Readiness check; memory storage has nothing to ping
pub async fn ready_check(
    State(state): State<AppState>,
) -> Result<Json<ReadyResponse>, StatusCode> {
    let Some(conn) = state.redis.clone() else {
        return Ok(Json(ReadyResponse {
            status: "ready",
            redis: None,
        }));
    };

    if check_redis(conn).await {
        Ok(Json(ReadyResponse {
            status: "ready",
            redis: Some(true),
        }))
    } else {
        Err(StatusCode::SERVICE_UNAVAILABLE)
    }
}

async fn check_redis(mut conn: redis::aio::ConnectionManager) -> bool {
    let result: Result<String, _> = redis::cmd("PING").query_async(&mut conn).await;
    result.is_ok()
}

#[derive(Serialize)]
pub struct StatsResponse {
    #[serde(flatten)]
    connections: BroadcastStats,
    pending_log_requests: usize,
}

/// Connection and pending-request counts for monitoring
pub async fn stats(State(state): State<AppState>) -> Json<StatsResponse> {
    Json(StatsResponse {
        connections: state.broadcaster.stats().await,
        pending_log_requests: state.pending_logs.len().await,
    })
}
