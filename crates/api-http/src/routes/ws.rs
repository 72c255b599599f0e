//! Collaborative editing upgrades: serve locally or bridge to the owning node

use crate::context::context_from;
use crate::error::ApiResult;
use crate::forwarder::{
    bridge, connect_peer, from_axum, to_axum, PeerHandshake, FORWARDED_HEADER, SEC_WEBSOCKET_KEY,
};
use crate::state::AppState;
use apihub_core::domain::{ForwardedSession, SessionKey, WsFrame, WsTarget};
use apihub_core::error::{AppError, ErrorCode};
use axum::extract::ws::rejection::WebSocketUpgradeRejection;
use axum::extract::ws::{WebSocket, WebSocketUpgrade};
use axum::extract::{Path, State};
use axum::http::{HeaderMap, Uri};
use axum::response::Response;
use futures::{future, SinkExt, StreamExt};
use tracing::{debug, info, warn};

pub(crate) async fn connect_branch(
    State(state): State<AppState>,
    Path((project_id, branch)): Path<(String, String)>,
    headers: HeaderMap,
    uri: Uri,
    ws: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> ApiResult<Response> {
    let key = SessionKey::new(project_id, branch, None).map_err(invalid_key)?;
    open_session(state, key, headers, uri, ws).await
}

pub(crate) async fn connect_file(
    State(state): State<AppState>,
    Path((project_id, branch, file_id)): Path<(String, String, String)>,
    headers: HeaderMap,
    uri: Uri,
    ws: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> ApiResult<Response> {
    let key = SessionKey::new(project_id, branch, Some(file_id)).map_err(invalid_key)?;
    open_session(state, key, headers, uri, ws).await
}

fn invalid_key(err: apihub_core::domain::DomainError) -> AppError {
    AppError::invalid_value("sessionKey", err.to_string())
}

async fn open_session(
    state: AppState,
    key: SessionKey,
    headers: HeaderMap,
    uri: Uri,
    ws: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> ApiResult<Response> {
    let ws = ws.map_err(|rejection| {
        AppError::coded(ErrorCode::ConnectionNotUpgraded, rejection.body_text())
    })?;
    let ctx = context_from(&headers, &uri)?;

    match state.balancer.select(&key).await? {
        WsTarget::Local => Ok(ws.on_upgrade(move |socket| serve_local(state, key, ctx.user_id, socket))),
        WsTarget::Remote(owner) if headers.contains_key(FORWARDED_HEADER) => {
            // Already forwarded once
            warn!(session_key = %key.ws_path(), owner = %owner, "Forwarded upgrade does not own the key");
            Err(AppError::coded(
                ErrorCode::UnableToSelectWsServer,
                format!("Node {} does not own the session key", state.balancer.node_addr()),
            )
            .with_param("node", owner)
            .into())
        }
        WsTarget::Remote(owner) => {
            let handshake = PeerHandshake {
                token: ctx.token.clone(),
                client_key: headers
                    .get(SEC_WEBSOCKET_KEY)
                    .and_then(|v| v.to_str().ok())
                    .map(str::to_string),
                user_id: ctx.user_id.clone(),
            };
            let peer = connect_peer(&owner, &key, &handshake).await?;
            info!(session_key = %key.ws_path(), owner = %owner, "Forwarding WS session");
            Ok(ws.on_upgrade(move |socket| async move {
                let session_id = state.ids.generate_id();
                state
                    .balancer
                    .track_forwarded(ForwardedSession {
                        session_id: session_id.clone(),
                        key: key.clone(),
                        remote_addr: owner,
                        created_at: state.time.now_millis(),
                    })
                    .await;
                let (upstream, downstream) = bridge(socket, peer).await;
                debug!(session_id = %session_id, upstream, downstream, "Forwarded session finished");
                state.balancer.untrack_forwarded(&session_id).await;
            }))
        }
    }
}

async fn serve_local(state: AppState, key: SessionKey, user_id: Option<String>, socket: WebSocket) {
    let (tx, rx) = socket.split();
    let sink = tx.with(|frame: WsFrame| future::ready(Ok::<_, axum::Error>(to_axum(frame))));
    let stream = rx.map(|r| r.map(from_axum));
    match state.sessions.connect(key.clone(), user_id, sink, stream).await {
        Ok(handle) => {
            if let Err(e) = handle.join.await {
                warn!(session_id = %handle.session_id, error = %e, "WS session task failed");
            }
        }
        Err(e) => {
            warn!(session_key = %key.ws_path(), error = %e, "Attaching WS session failed");
        }
    }
}
