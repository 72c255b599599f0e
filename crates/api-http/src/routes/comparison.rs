//! Version comparisons and changelogs

use super::{accepted, client_build, moved};
use crate::context::Ctx;
use crate::error::ApiResult;
use crate::extract::{parse_json, ApiBody, ApiQuery};
use crate::state::AppState;
use apihub_core::application::comparison::{CompareRequest, ComparisonOutcome};
use apihub_core::application::dispatcher::SubmitOptions;
use apihub_core::domain::{ChangelogEntry, ComparisonResult};
use apihub_core::error::AppError;
use axum::extract::{Path, State};
use axum::http::Uri;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Deserialize;

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct EnsureQuery {
    builder_id: Option<String>,
    #[serde(default)]
    client_build: bool,
    #[serde(default, rename = "reCalculate")]
    recalculate: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CompareBody {
    package_id: Option<String>,
    version: Option<String>,
    previous_version_package_id: Option<String>,
    previous_version: Option<String>,
}

fn required(value: Option<String>, name: &str) -> Result<String, AppError> {
    value
        .filter(|v| !v.trim().is_empty())
        .ok_or_else(|| AppError::missing(name))
}

impl TryFrom<CompareBody> for CompareRequest {
    type Error = AppError;

    fn try_from(body: CompareBody) -> Result<Self, AppError> {
        let package_id = required(body.package_id, "packageId")?;
        Ok(CompareRequest {
            version: required(body.version, "version")?,
            previous_version_package_id: body
                .previous_version_package_id
                .filter(|p| !p.is_empty())
                .unwrap_or_else(|| package_id.clone()),
            previous_version: required(body.previous_version, "previousVersion")?,
            package_id,
        })
    }
}

/// ensureComparison
pub(crate) async fn ensure_comparison(
    State(state): State<AppState>,
    Ctx(ctx): Ctx,
    ApiQuery(query): ApiQuery<EnsureQuery>,
    ApiBody(body): ApiBody,
) -> ApiResult<Response> {
    state.limiter.acquire()?;
    let req = CompareRequest::try_from(parse_json::<CompareBody>(&body)?)?;
    let options = SubmitOptions {
        client_build: query.client_build,
        builder_id: query.builder_id.filter(|b| !b.trim().is_empty()),
        deadline_ms: None,
        allow_reuse: false,
    };
    let outcome = state
        .comparisons
        .ensure_comparison(&ctx, &req, query.recalculate, options)
        .await?;
    Ok(match outcome {
        ComparisonOutcome::Ready(result) => Json(result).into_response(),
        ComparisonOutcome::Accepted {
            build_id,
            status,
            message,
        } => accepted(build_id, status, message),
        ComparisonOutcome::ClientBuild { build_id, config } => client_build(build_id, &config),
    })
}

#[derive(Debug, Deserialize)]
pub(crate) struct VersionPath {
    package_id: String,
    version: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct PreviousQuery {
    previous_version: Option<String>,
    previous_version_package_id: Option<String>,
}

fn compare_request(path: &VersionPath, query: PreviousQuery) -> Result<CompareRequest, AppError> {
    Ok(CompareRequest {
        package_id: path.package_id.clone(),
        version: path.version.clone(),
        previous_version_package_id: query
            .previous_version_package_id
            .filter(|p| !p.is_empty())
            .unwrap_or_else(|| path.package_id.clone()),
        previous_version: required(query.previous_version, "previousVersion")?,
    })
}

/// getSummary
pub(crate) async fn get_summary(
    State(state): State<AppState>,
    Path(path): Path<VersionPath>,
    ApiQuery(query): ApiQuery<PreviousQuery>,
    uri: Uri,
) -> ApiResult<Json<ComparisonResult>> {
    let req = compare_request(&path, query)?;
    let result = state.comparisons.get_summary(&req).await;
    Ok(Json(moved(&state, &path.package_id, &uri, result).await?))
}

pub(crate) async fn get_changes(
    State(state): State<AppState>,
    Path(path): Path<VersionPath>,
    ApiQuery(query): ApiQuery<PreviousQuery>,
    uri: Uri,
) -> ApiResult<Json<Vec<ChangelogEntry>>> {
    let req = compare_request(&path, query)?;
    let result = state.comparisons.get_changes(&req).await;
    Ok(Json(moved(&state, &path.package_id, &uri, result).await?))
}
