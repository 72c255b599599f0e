//! Build submission, status polling and the remote builder protocol

use super::submit_response;
use crate::context::Ctx;
use crate::error::ApiResult;
use crate::extract::{parse_json, ApiBody, ApiQuery};
use crate::multipart::{check_content_length, read_form};
use crate::state::AppState;
use apihub_core::application::coordinator::StatusReport;
use apihub_core::application::dispatcher::{BuildStatusView, PublishRequest, SubmitOptions};
use apihub_core::domain::{
    BuildConfig, BuildConfigRequest, BuildId, BuildStatus, BuildType, PackageRef,
};
use apihub_core::error::AppError;
use axum::extract::multipart::MultipartRejection;
use axum::extract::{Multipart, Path, State};
use axum::http::{header, HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};

/// Carries the claimed build id next to the ZIP body
pub const BUILD_ID_HEADER: &str = "x-build-id";

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct SubmitQuery {
    pub builder_id: Option<String>,
    #[serde(default)]
    pub client_build: bool,
}

impl SubmitQuery {
    pub fn options(self) -> SubmitOptions {
        submit_options(self.client_build, self.builder_id)
    }
}

fn submit_options(client_build: bool, builder_id: Option<String>) -> SubmitOptions {
    SubmitOptions {
        client_build,
        builder_id: builder_id.filter(|b| !b.trim().is_empty()),
        deadline_ms: None,
        allow_reuse: true,
    }
}

/// Fill in the build type a route implies when the body leaves it out
fn typed_config(mut req: BuildConfigRequest, default: BuildType) -> Result<BuildConfig, AppError> {
    if req.build_type.as_deref().map_or(true, str::is_empty) {
        req.build_type = Some(default.as_str().to_string());
    }
    BuildConfig::try_from(req)
}

/// submitPublish
pub(crate) async fn submit_publish(
    State(state): State<AppState>,
    Ctx(ctx): Ctx,
    Path(package_id): Path<String>,
    headers: HeaderMap,
    multipart: Result<Multipart, MultipartRejection>,
) -> ApiResult<Response> {
    state.limiter.acquire()?;
    let limit = state.limits.publish_archive_bytes;
    check_content_length(&headers, limit)?;
    let mut form = read_form(multipart, &headers, limit).await?;

    let config: BuildConfigRequest = form
        .json("config")?
        .ok_or_else(|| AppError::missing("config"))?;
    let config = typed_config(config, BuildType::Publish)?;
    let dependencies: Vec<PackageRef> = form.json("dependencies")?.unwrap_or_default();
    let options = submit_options(form.flag("clientBuild")?, form.text("builderId")?);

    let request = PublishRequest {
        config,
        path_package_id: Some(package_id),
        sources: form.take_bytes("sources"),
        dependencies,
        resolve_refs: form.flag("resolveRefs")?,
        resolve_conflicts: form.flag("resolveConflicts")?,
        options,
    };
    let outcome = state.dispatcher.submit_publish(&ctx, request).await?;
    Ok(submit_response(outcome))
}

/// submitChangelog
pub(crate) async fn submit_changelog(
    State(state): State<AppState>,
    Ctx(ctx): Ctx,
    ApiQuery(query): ApiQuery<SubmitQuery>,
    ApiBody(body): ApiBody,
) -> ApiResult<Response> {
    state.limiter.acquire()?;
    let config = typed_config(parse_json(&body)?, BuildType::Changelog)?;
    let outcome = state
        .dispatcher
        .submit_changelog(&ctx, config, query.options())
        .await?;
    Ok(submit_response(outcome))
}

/// getStatus
pub(crate) async fn get_status(
    State(state): State<AppState>,
    Path(build_id): Path<String>,
) -> ApiResult<Json<BuildStatusView>> {
    Ok(Json(state.dispatcher.get_status(&build_id).await?))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StatusesRequest {
    #[serde(default)]
    publish_ids: Vec<BuildId>,
}

/// getStatuses
pub(crate) async fn get_statuses(
    State(state): State<AppState>,
    ApiBody(body): ApiBody,
) -> ApiResult<Json<Vec<BuildStatusView>>> {
    let req: StatusesRequest = parse_json(&body)?;
    if req.publish_ids.is_empty() {
        return Err(AppError::missing("publishIds").into());
    }
    Ok(Json(state.dispatcher.get_statuses(&req.publish_ids).await?))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct FreeBuildQuery {
    pub builder_id: Option<String>,
}

/// pullFreeBuild
pub(crate) async fn pull_free_build(
    State(state): State<AppState>,
    ApiQuery(query): ApiQuery<FreeBuildQuery>,
) -> ApiResult<Response> {
    let builder_id = query.builder_id.unwrap_or_default();
    let Some(build) = state.coordinator.pull_free_build(&builder_id).await? else {
        return Ok(StatusCode::NO_CONTENT.into_response());
    };
    let mut response = (
        [
            (header::CONTENT_TYPE, HeaderValue::from_static("application/zip")),
            (
                header::CONTENT_DISPOSITION,
                HeaderValue::from_static("attachment; filename=\"build.zip\""),
            ),
        ],
        build.archive,
    )
        .into_response();
    if let Ok(value) = HeaderValue::from_str(&build.build_id) {
        response.headers_mut().insert(BUILD_ID_HEADER, value);
    }
    Ok(response)
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct ReportResponse {
    pub publish_id: BuildId,
    pub status: BuildStatus,
}

/// reportStatus (multipart: status, builderId, errors?, data?)
pub(crate) async fn report_status(
    State(state): State<AppState>,
    Path(build_id): Path<String>,
    headers: HeaderMap,
    multipart: Result<Multipart, MultipartRejection>,
) -> ApiResult<Json<ReportResponse>> {
    let limit = state.limits.publish_archive_bytes;
    check_content_length(&headers, limit)?;
    let mut form = read_form(multipart, &headers, limit).await?;

    let raw_status = form
        .text("status")?
        .filter(|s| !s.is_empty())
        .ok_or_else(|| AppError::missing("status"))?;
    let status = BuildStatus::parse(&raw_status)
        .filter(|s| *s != BuildStatus::NotStarted)
        .ok_or_else(|| {
            AppError::invalid_value("status", format!("Unsupported status '{}'", raw_status))
        })?;
    let builder_id = form
        .text("builderId")?
        .filter(|b| !b.is_empty())
        .ok_or_else(|| AppError::missing("builderId"))?;

    let report = StatusReport {
        build_id: build_id.clone(),
        builder_id,
        status,
        details: form.text("errors")?.filter(|e| !e.is_empty()),
        data: form.take_bytes("data"),
    };
    let status = state.coordinator.report_status(report).await?;
    Ok(Json(ReportResponse {
        publish_id: build_id,
        status,
    }))
}
