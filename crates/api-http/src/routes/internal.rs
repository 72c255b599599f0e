//! Operator endpoints, liveness and readiness

use crate::error::ApiResult;
use crate::extract::{parse_json, ApiBody, ApiQuery};
use crate::state::AppState;
use apihub_core::domain::{ForwardedSession, NodeInfo, SessionKey, WsSessionInfo};
use apihub_core::error::AppError;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use tracing::info;

pub(crate) async fn list_sessions(
    State(state): State<AppState>,
) -> ApiResult<Json<Vec<WsSessionInfo>>> {
    Ok(Json(state.balancer.list_sessions().await?))
}

pub(crate) async fn list_nodes(State(state): State<AppState>) -> ApiResult<Json<Vec<NodeInfo>>> {
    Ok(Json(state.balancer.list_nodes().await?))
}

pub(crate) async fn list_forwarded(State(state): State<AppState>) -> Json<Vec<ForwardedSession>> {
    Json(state.balancer.list_forwarded().await)
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct BindAddr {
    node_addr: String,
}

pub(crate) async fn bind_addr(State(state): State<AppState>) -> Json<BindAddr> {
    Json(BindAddr {
        node_addr: state.balancer.node_addr().to_string(),
    })
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct DisconnectQuery {
    file_id: Option<String>,
}

#[derive(Debug, Serialize)]
pub(crate) struct Disconnected {
    disconnected: usize,
}

/// disconnectAll
pub(crate) async fn disconnect_all(
    State(state): State<AppState>,
    Path((project_id, branch)): Path<(String, String)>,
    ApiQuery(query): ApiQuery<DisconnectQuery>,
) -> ApiResult<Json<Disconnected>> {
    let key = SessionKey::new(project_id, branch, query.file_id)
        .map_err(|e| AppError::invalid_value("sessionKey", e.to_string()))?;
    Ok(Json(Disconnected {
        disconnected: state.sessions.disconnect_all(&key),
    }))
}

#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct LogLevel {
    level: String,
}

fn log_control(
    state: &AppState,
) -> Result<&std::sync::Arc<dyn crate::state::LogLevelControl>, AppError> {
    state
        .log_level
        .as_ref()
        .ok_or_else(|| AppError::Internal("log level control is not installed".to_string()))
}

pub(crate) async fn get_log_level(State(state): State<AppState>) -> ApiResult<Json<LogLevel>> {
    Ok(Json(LogLevel {
        level: log_control(&state)?.current(),
    }))
}

pub(crate) async fn set_log_level(
    State(state): State<AppState>,
    ApiBody(body): ApiBody,
) -> ApiResult<Json<LogLevel>> {
    let req: LogLevel = parse_json(&body)?;
    let control = log_control(&state)?;
    control
        .set(req.level.trim())
        .map_err(|reason| AppError::invalid_value("level", reason))?;
    info!(level = %req.level, "Log level changed");
    Ok(Json(LogLevel {
        level: control.current(),
    }))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TransitionBody {
    old_package_id: Option<String>,
    new_package_id: Option<String>,
}

pub(crate) async fn record_transition(
    State(state): State<AppState>,
    ApiBody(body): ApiBody,
) -> ApiResult<StatusCode> {
    let req: TransitionBody = parse_json(&body)?;
    let old = req
        .old_package_id
        .filter(|p| !p.is_empty())
        .ok_or_else(|| AppError::missing("oldPackageId"))?;
    let new = req
        .new_package_id
        .filter(|p| !p.is_empty())
        .ok_or_else(|| AppError::missing("newPackageId"))?;
    state.catalog.record_transition(&old, &new).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub(crate) async fn live() -> StatusCode {
    StatusCode::OK
}

pub(crate) async fn ready(State(state): State<AppState>) -> Response {
    if state.ready.is_ready() {
        StatusCode::OK.into_response()
    } else {
        StatusCode::SERVICE_UNAVAILABLE.into_response()
    }
}
