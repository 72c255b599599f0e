//! Published versions, operation groups and group transformations

use super::builds::SubmitQuery;
use super::{moved, submit_response};
use crate::context::Ctx;
use crate::error::ApiResult;
use crate::extract::ApiQuery;
use crate::multipart::{check_content_length, read_form, Form};
use crate::state::AppState;
use apihub_core::application::catalog::{GroupAddress, GroupPatch, TemplateUpdate};
use apihub_core::application::dispatcher::transform_format;
use apihub_core::domain::{
    ApiType, BuildConfig, BuildConfigRequest, BuildType, Document, Operation, OperationGroup,
    VersionInfo,
};
use apihub_core::error::AppError;
use axum::extract::multipart::MultipartRejection;
use axum::extract::{Multipart, Path, State};
use axum::http::{header, HeaderMap, HeaderValue, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Deserialize;

#[derive(Debug, Deserialize)]
pub(crate) struct VersionPath {
    package_id: String,
    version: String,
}

#[derive(Debug, Deserialize)]
pub(crate) struct GroupsPath {
    package_id: String,
    version: String,
    api_type: String,
}

#[derive(Debug, Deserialize)]
pub(crate) struct GroupPath {
    package_id: String,
    version: String,
    api_type: String,
    group_name: String,
}

impl GroupPath {
    fn address(&self) -> Result<GroupAddress, AppError> {
        Ok(GroupAddress {
            package_id: self.package_id.clone(),
            version: self.version.clone(),
            api_type: ApiType::parse(&self.api_type)?,
            group_name: self.group_name.clone(),
        })
    }

    /// Group transformation config for this address
    fn config(&self, build_type: Option<String>, format: Option<String>) -> Result<BuildConfig, AppError> {
        BuildConfig::try_from(BuildConfigRequest {
            build_type: Some(
                build_type
                    .filter(|b| !b.is_empty())
                    .unwrap_or_else(|| BuildType::DocumentGroup.as_str().to_string()),
            ),
            package_id: Some(self.package_id.clone()),
            version: Some(self.version.clone()),
            api_type: Some(self.api_type.clone()),
            group_name: Some(self.group_name.clone()),
            format: format.filter(|f| !f.is_empty()),
            ..BuildConfigRequest::default()
        })
        .and_then(|config| {
            if config.build_type().is_group_transform() {
                Ok(config)
            } else {
                Err(AppError::invalid_value(
                    "buildType",
                    format!("'{}' is not a group transformation", config.build_type()),
                ))
            }
        })
    }
}

pub(crate) async fn get_version(
    State(state): State<AppState>,
    Path(path): Path<VersionPath>,
    uri: Uri,
) -> ApiResult<Json<VersionInfo>> {
    let result = state.catalog.get_version(&path.package_id, &path.version).await;
    Ok(Json(moved(&state, &path.package_id, &uri, result).await?))
}

pub(crate) async fn list_documents(
    State(state): State<AppState>,
    Path(path): Path<VersionPath>,
    uri: Uri,
) -> ApiResult<Json<Vec<Document>>> {
    let result = state
        .catalog
        .list_documents(&path.package_id, &path.version)
        .await;
    Ok(Json(moved(&state, &path.package_id, &uri, result).await?))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct OperationsQuery {
    api_type: Option<String>,
}

pub(crate) async fn list_operations(
    State(state): State<AppState>,
    Path(path): Path<VersionPath>,
    ApiQuery(query): ApiQuery<OperationsQuery>,
    uri: Uri,
) -> ApiResult<Json<Vec<Operation>>> {
    let api_type = query.api_type.as_deref().map(ApiType::parse).transpose()?;
    let result = state
        .catalog
        .list_operations(&path.package_id, &path.version, api_type)
        .await;
    Ok(Json(moved(&state, &path.package_id, &uri, result).await?))
}

pub(crate) async fn list_groups(
    State(state): State<AppState>,
    Path(path): Path<GroupsPath>,
    uri: Uri,
) -> ApiResult<Json<Vec<OperationGroup>>> {
    let api_type = ApiType::parse(&path.api_type)?;
    let result = state
        .catalog
        .list_groups(&path.package_id, &path.version, api_type)
        .await;
    Ok(Json(moved(&state, &path.package_id, &uri, result).await?))
}

pub(crate) async fn get_group(
    State(state): State<AppState>,
    Path(path): Path<GroupPath>,
    uri: Uri,
) -> ApiResult<Json<OperationGroup>> {
    let result = state.catalog.get_group(&path.address()?).await;
    Ok(Json(moved(&state, &path.package_id, &uri, result).await?))
}

pub(crate) async fn get_template(
    State(state): State<AppState>,
    Path(path): Path<GroupPath>,
    uri: Uri,
) -> ApiResult<Response> {
    let result = state.catalog.get_template(&path.address()?).await;
    let (file_name, content) = moved(&state, &path.package_id, &uri, result).await?;
    let disposition = HeaderValue::from_str(&format!("attachment; filename=\"{}\"", file_name))
        .unwrap_or_else(|_| HeaderValue::from_static("attachment"));
    Ok((
        [
            (
                header::CONTENT_TYPE,
                HeaderValue::from_static("application/octet-stream"),
            ),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        content,
    )
        .into_response())
}

async fn group_form(
    state: &AppState,
    headers: &HeaderMap,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Form, AppError> {
    let limit = state.limits.publish_file_bytes;
    check_content_length(headers, limit)?;
    read_form(multipart, headers, limit).await
}

/// Absent part keeps the template, an empty part clears it
fn template_update(form: &mut Form) -> TemplateUpdate {
    if !form.contains("template") {
        return TemplateUpdate::Keep;
    }
    let file_name = form.file_name("template").unwrap_or("template").to_string();
    match form.take_bytes("template") {
        None => TemplateUpdate::Clear,
        Some(content) => TemplateUpdate::Replace { file_name, content },
    }
}

/// Create a group (multipart: groupName, description?, operationIds?, template?)
pub(crate) async fn create_group(
    State(state): State<AppState>,
    Ctx(ctx): Ctx,
    Path(path): Path<GroupsPath>,
    headers: HeaderMap,
    multipart: Result<Multipart, MultipartRejection>,
) -> ApiResult<Response> {
    let mut form = group_form(&state, &headers, multipart).await?;
    let group_name = form
        .text("groupName")?
        .filter(|g| !g.is_empty())
        .ok_or_else(|| AppError::missing("groupName"))?;
    let addr = GroupAddress {
        package_id: path.package_id,
        version: path.version,
        api_type: ApiType::parse(&path.api_type)?,
        group_name,
    };
    let description = form.text("description")?.filter(|d| !d.is_empty());
    let operation_ids: Vec<String> = form.json("operationIds")?.unwrap_or_default();
    let template = template_update(&mut form);

    let group = state
        .catalog
        .create_group(&ctx, &addr, description, operation_ids, template)
        .await?;
    Ok((StatusCode::CREATED, Json(group)).into_response())
}

/// Partial update of a group (multipart)
pub(crate) async fn update_group(
    State(state): State<AppState>,
    Ctx(ctx): Ctx,
    Path(path): Path<GroupPath>,
    headers: HeaderMap,
    multipart: Result<Multipart, MultipartRejection>,
) -> ApiResult<Json<OperationGroup>> {
    let addr = path.address()?;
    let mut form = group_form(&state, &headers, multipart).await?;
    let patch = GroupPatch {
        description: form.text("description")?,
        operation_ids: form.json("operationIds")?,
        template: template_update(&mut form),
    };
    Ok(Json(state.catalog.update_group(&ctx, &addr, patch).await?))
}

pub(crate) async fn delete_group(
    State(state): State<AppState>,
    Ctx(ctx): Ctx,
    Path(path): Path<GroupPath>,
) -> ApiResult<StatusCode> {
    state.catalog.delete_group(&ctx, &path.address()?).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct TransformQuery {
    build_type: Option<String>,
    format: Option<String>,
    builder_id: Option<String>,
    #[serde(default)]
    client_build: bool,
}

/// submitGroupTransform
pub(crate) async fn submit_transformation(
    State(state): State<AppState>,
    Ctx(ctx): Ctx,
    Path(path): Path<GroupPath>,
    ApiQuery(query): ApiQuery<TransformQuery>,
) -> ApiResult<Response> {
    state.limiter.acquire()?;
    let config = path.config(query.build_type, query.format)?;
    let options = SubmitQuery {
        builder_id: query.builder_id,
        client_build: query.client_build,
    }
    .options();
    let outcome = state
        .dispatcher
        .submit_group_transform(&ctx, config, options)
        .await?;
    Ok(submit_response(outcome))
}

/// Transformed documents bundle (ZIP)
pub(crate) async fn get_transformed(
    State(state): State<AppState>,
    Path(path): Path<GroupPath>,
    ApiQuery(query): ApiQuery<TransformQuery>,
    uri: Uri,
) -> ApiResult<Response> {
    let config = path.config(query.build_type, query.format)?;
    let addr = path.address()?;
    let result = state
        .catalog
        .get_transformed(&addr, config.build_type(), &transform_format(&config))
        .await;
    let (docs, bundle) = moved(&state, &path.package_id, &uri, result).await?;

    let mut response = (
        [(header::CONTENT_TYPE, HeaderValue::from_static("application/zip"))],
        bundle,
    )
        .into_response();
    if let Ok(value) = HeaderValue::from_str(&docs.build_id) {
        response
            .headers_mut()
            .insert(super::builds::BUILD_ID_HEADER, value);
    }
    Ok(response)
}
