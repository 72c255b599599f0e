//! Route Table

mod builds;
mod catalog;
mod comparison;
mod internal;
mod ws;

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;
use apihub_core::application::dispatcher::SubmitOutcome;
use apihub_core::domain::{BuildConfig, BuildConfigRequest, BuildId, BuildStatus};
use apihub_core::error::AppError;
use axum::extract::DefaultBodyLimit;
use axum::http::{StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Serialize;
use tower_http::trace::TraceLayer;
use tracing::warn;

const VERSION_PATH: &str = "/api/v2/packages/:package_id/versions/:version";

/// Cap on buffered JSON bodies; multipart routes enforce their own limits
pub const JSON_BODY_LIMIT: usize = 1024 * 1024;

pub fn router(state: AppState) -> Router {
    let groups = format!("{}/:api_type/groups", VERSION_PATH);
    let group = format!("{}/:group_name", groups);

    Router::new()
        // Build pipeline
        .route(
            "/api/v2/packages/:package_id/publish",
            post(builds::submit_publish).layer(DefaultBodyLimit::disable()),
        )
        .route(
            "/api/v2/publish/:build_id/status",
            get(builds::get_status)
                .post(builds::report_status)
                .layer(DefaultBodyLimit::disable()),
        )
        .route("/api/v2/publish/statuses", post(builds::get_statuses))
        .route("/api/v2/free-build", get(builds::pull_free_build))
        .route("/api/v2/builds/changelog", post(builds::submit_changelog))
        // Published versions and operation groups
        .route(VERSION_PATH, get(catalog::get_version))
        .route(
            &format!("{}/documents", VERSION_PATH),
            get(catalog::list_documents),
        )
        .route(
            &format!("{}/operations", VERSION_PATH),
            get(catalog::list_operations),
        )
        .route(
            &groups,
            get(catalog::list_groups)
                .post(catalog::create_group)
                .layer(DefaultBodyLimit::disable()),
        )
        .route(
            &group,
            get(catalog::get_group)
                .patch(catalog::update_group)
                .delete(catalog::delete_group)
                .layer(DefaultBodyLimit::disable()),
        )
        .route(&format!("{}/template", group), get(catalog::get_template))
        .route(
            &format!("{}/transformation", group),
            post(catalog::submit_transformation),
        )
        .route(
            &format!("{}/transformation/documents", group),
            get(catalog::get_transformed),
        )
        // Comparisons
        .route("/api/v2/compare", post(comparison::ensure_comparison))
        .route(
            &format!("{}/comparison-summary", VERSION_PATH),
            get(comparison::get_summary),
        )
        .route(
            &format!("{}/changes", VERSION_PATH),
            get(comparison::get_changes),
        )
        // Collaborative editing
        .route(
            "/ws/v1/projects/:project_id/branches/:branch",
            get(ws::connect_branch),
        )
        .route(
            "/ws/v1/projects/:project_id/branches/:branch/files/:file_id",
            get(ws::connect_file),
        )
        // Observability and operations
        .route("/api/internal/ws/sessions", get(internal::list_sessions))
        .route("/api/internal/ws/nodes", get(internal::list_nodes))
        .route("/api/internal/ws/forwarded", get(internal::list_forwarded))
        .route("/api/internal/ws/bind-addr", get(internal::bind_addr))
        .route(
            "/api/internal/ws/projects/:project_id/branches/:branch/disconnect",
            post(internal::disconnect_all),
        )
        .route(
            "/api/internal/log-level",
            get(internal::get_log_level).put(internal::set_log_level),
        )
        .route(
            "/api/internal/package-transitions",
            post(internal::record_transition),
        )
        .route("/live", get(internal::live))
        .route("/ready", get(internal::ready))
        .layer(DefaultBodyLimit::max(JSON_BODY_LIMIT))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// 202 body
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct AcceptedBody {
    pub build_id: BuildId,
    pub status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// 201 body: build id plus the config the caller must execute
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct ClientBuildBody {
    pub build_id: BuildId,
    #[serde(flatten)]
    pub config: BuildConfigRequest,
}

/// Queued work reports as running until it finishes
pub(crate) fn accepted_status(status: BuildStatus) -> &'static str {
    match status {
        BuildStatus::NotStarted | BuildStatus::Running => "running",
        BuildStatus::Complete => "complete",
        BuildStatus::Error => "error",
    }
}

pub(crate) fn accepted(build_id: BuildId, status: BuildStatus, message: Option<String>) -> Response {
    (
        StatusCode::ACCEPTED,
        Json(AcceptedBody {
            build_id,
            status: accepted_status(status),
            message,
        }),
    )
        .into_response()
}

pub(crate) fn client_build(build_id: BuildId, config: &BuildConfig) -> Response {
    (
        StatusCode::CREATED,
        Json(ClientBuildBody {
            build_id,
            config: config.to_request(),
        }),
    )
        .into_response()
}

pub(crate) fn submit_response(outcome: SubmitOutcome) -> Response {
    match outcome {
        SubmitOutcome::Reused { .. } => StatusCode::NO_CONTENT.into_response(),
        SubmitOutcome::Queued {
            build_id,
            status,
            details,
        } => accepted(build_id, status, details),
        SubmitOutcome::ClientBuild {
            build_id, config, ..
        } => client_build(build_id, &config),
    }
}

/// Path of `uri` with the segment after `/packages/` swapped to `new_id`
pub(crate) fn rewrite_package_path(uri: &Uri, old_id: &str, new_id: &str) -> String {
    let mut replaced = false;
    let mut previous = "";
    let segments: Vec<&str> = uri
        .path()
        .split('/')
        .map(|segment| {
            let out = if !replaced && previous == "packages" && segment == old_id {
                replaced = true;
                new_id
            } else {
                segment
            };
            previous = segment;
            out
        })
        .collect();
    let mut location = segments.join("/");
    if let Some(query) = uri.query() {
        location.push('?');
        location.push_str(query);
    }
    location
}

/// Turn a package lookup miss on a moved package into a redirect
pub(crate) async fn moved<T>(
    state: &AppState,
    package_id: &str,
    uri: &Uri,
    result: Result<T, AppError>,
) -> ApiResult<T> {
    let err = match result {
        Ok(value) => return Ok(value),
        Err(err) => err,
    };
    if !err.code().is_package_lookup_miss() {
        return Err(err.into());
    }
    match state.catalog.resolve_transition(package_id).await {
        Ok(Some(new_id)) => Err(ApiError::Moved {
            location: rewrite_package_path(uri, package_id, &new_id),
        }),
        Ok(None) => Err(err.into()),
        Err(lookup) => {
            warn!(package_id = %package_id, error = %lookup, "Package transition lookup failed");
            Err(err.into())
        }
    }
}
