//! WebSocket channels: event streams for dashboards and the directed
//! request channel for agents.

use axum::{
    extract::{
        Path, Query, State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    http::{HeaderMap, header::AUTHORIZATION},
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use control_common::{ClusterIdentity, ControlPlaneError};

use super::ApiError;
use crate::broadcast::Scope;
use crate::state::AppState;

/// Every cluster event regardless of project
pub async fn global_cluster_events(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
) -> Response {
    ws.on_upgrade(move |socket| cluster_event_socket(socket, state, Scope::Global))
}

pub async fn cluster_events(
    ws: WebSocketUpgrade,
    Path(project_id): Path<String>,
    State(state): State<AppState>,
) -> Response {
    ws.on_upgrade(move |socket| cluster_event_socket(socket, state, Scope::Project(project_id)))
}

pub async fn workflow_runs(
    ws: WebSocketUpgrade,
    Path(project_id): Path<String>,
    State(state): State<AppState>,
) -> Response {
    ws.on_upgrade(move |mut socket| async move {
        let mut subscription = state
            .broadcaster
            .subscribe_workflow_runs(Scope::Project(project_id))
            .await;
        forward(&mut socket, &mut subscription.receiver).await;
        state.broadcaster.unsubscribe_workflow_runs(&subscription).await;
    })
}

async fn cluster_event_socket(mut socket: WebSocket, state: AppState, scope: Scope) {
    let mut subscription = state.broadcaster.subscribe(scope).await;
    forward(&mut socket, &mut subscription.receiver).await;
    state.broadcaster.unsubscribe(&subscription).await;
}

#[derive(Deserialize)]
pub struct AgentQuery {
    #[serde(rename = "ClusterID")]
    cluster_id: String,
}

/// Pair the cluster named in the query with the key from
/// `Authorization: Bearer <key>`. The key never travels in the URL.
fn agent_identity(
    query: AgentQuery,
    headers: &HeaderMap,
) -> Result<ClusterIdentity, ControlPlaneError> {
    let access_key = headers
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|key| !key.is_empty())
        .ok_or_else(|| {
            ControlPlaneError::AuthMismatch(format!(
                "cluster {}: missing bearer key",
                query.cluster_id
            ))
        })?;

    Ok(ClusterIdentity {
        cluster_id: query.cluster_id,
        access_key: access_key.to_string(),
    })
}

/// Agent side of the directed channel. The agent authenticates with its
/// current key before the upgrade.
pub async fn agent_connect(
    ws: WebSocketUpgrade,
    Query(query): Query<AgentQuery>,
    headers: HeaderMap,
    State(state): State<AppState>,
) -> Response {
    let identity = match agent_identity(query, &headers) {
        Ok(identity) => identity,
        Err(e) => return ApiError::from(e).into_response(),
    };
    if let Err(e) = state.registry.authenticate(&identity).await {
        return ApiError::from(e).into_response();
    }

    ws.on_upgrade(move |mut socket| async move {
        let mut channel = state.broadcaster.connect_agent(&identity.cluster_id).await;
        tracing::info!(cluster_id = %identity.cluster_id, "Agent connected");

        forward(&mut socket, &mut channel.receiver).await;
        state.broadcaster.disconnect_agent(&channel).await;
    })
}

/// Pump items from `receiver` to the socket until either side goes away
async fn forward<T: Serialize>(socket: &mut WebSocket, receiver: &mut mpsc::Receiver<T>) {
    loop {
        tokio::select! {
            item = receiver.recv() => {
                // Replaced or unsubscribed
                let Some(item) = item else { break };

                let json = match serde_json::to_string(&item) {
                    Ok(json) => json,
                    Err(e) => {
                        tracing::error!(error = %e, "Failed to encode outgoing message");
                        continue;
                    }
                };
                if socket.send(Message::Text(json.into())).await.is_err() {
                    break;
                }
            }
            msg = socket.recv() => {
                match msg {
                    Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                    // Inbound traffic is ignored; pings are answered by axum
                    Some(Ok(_)) => {}
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn query() -> AgentQuery {
        AgentQuery {
            cluster_id: "c1".into(),
        }
    }

    #[test]
    fn test_agent_identity_from_bearer_header() {
        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, HeaderValue::from_static("Bearer k1"));

        let identity = agent_identity(query(), &headers).unwrap();
        assert_eq!(identity.cluster_id, "c1");
        assert_eq!(identity.access_key, "k1");
    }

    #[test]
    fn test_agent_identity_requires_key() {
        assert!(matches!(
            agent_identity(query(), &HeaderMap::new()),
            Err(ControlPlaneError::AuthMismatch(_))
        ));

        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, HeaderValue::from_static("Basic k1"));
        assert!(agent_identity(query(), &headers).is_err());
    }
}
