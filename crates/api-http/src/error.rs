//! HTTP Error Envelope
//!
//! Maps application errors to `{status, code, message, params?, debug?}`.

use apihub_core::error::{AppError, ErrorCategory, ErrorCode};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use std::collections::BTreeMap;
use tracing::error;

const INTERNAL_MESSAGE: &str = "Internal server error";

/// Error returned by every handler
#[derive(Debug)]
pub enum ApiError {
    App(AppError),
    /// Package moved; answer with a 301 to the rewritten location
    Moved { location: String },
}

impl From<AppError> for ApiError {
    fn from(err: AppError) -> Self {
        ApiError::App(err)
    }
}

impl ApiError {
    pub fn code(&self) -> Option<ErrorCode> {
        match self {
            ApiError::App(err) => Some(err.code()),
            ApiError::Moved { .. } => None,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorEnvelope {
    pub status: u16,
    pub code: ErrorCode,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<BTreeMap<String, String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub debug: Option<String>,
}

/// HTTP status for a code
pub fn status_for(code: ErrorCode) -> StatusCode {
    match code {
        ErrorCode::UserIdNotFound | ErrorCode::ApiKeyHeaderEmpty => StatusCode::UNAUTHORIZED,
        ErrorCode::BuildPruned => StatusCode::GONE,
        ErrorCode::RateLimited => StatusCode::TOO_MANY_REQUESTS,
        ErrorCode::ConnectionNotUpgraded => StatusCode::BAD_REQUEST,
        _ => match code.category() {
            ErrorCategory::Validation | ErrorCategory::Capacity => StatusCode::BAD_REQUEST,
            ErrorCategory::Authorization => StatusCode::FORBIDDEN,
            ErrorCategory::Resource => StatusCode::NOT_FOUND,
            ErrorCategory::Cluster => StatusCode::SERVICE_UNAVAILABLE,
            ErrorCategory::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        },
    }
}

impl ErrorEnvelope {
    pub fn from_app(err: &AppError) -> Self {
        let code = err.code();
        let status = status_for(code);
        match err {
            AppError::Coded { message, .. } => Self {
                status: status.as_u16(),
                code,
                message: message.clone(),
                params: err.params().cloned(),
                debug: None,
            },
            other => Self {
                status: status.as_u16(),
                code,
                message: INTERNAL_MESSAGE.to_string(),
                params: None,
                debug: Some(other.to_string()),
            },
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::Moved { location } => (
                StatusCode::MOVED_PERMANENTLY,
                [(header::LOCATION, location)],
            )
                .into_response(),
            ApiError::App(err) => {
                let envelope = ErrorEnvelope::from_app(&err);
                if envelope.code == ErrorCode::Internal {
                    error!(error = %err, "Request failed");
                }
                let status = StatusCode::from_u16(envelope.status)
                    .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
                (status, Json(envelope)).into_response()
            }
        }
    }
}

pub type ApiResult<T> = std::result::Result<T, ApiError>;
