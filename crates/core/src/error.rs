// Central Error Type for the Application

use serde::Serialize;
use std::collections::BTreeMap;
use thiserror::Error;

/// Stable machine-readable error codes surfaced to API clients
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum ErrorCode {
    // Validation
    InvalidParameter,
    InvalidParameterValue,
    IncorrectParamType,
    #[serde(rename = "invalidURLEscape")]
    InvalidUrlEscape,
    RequiredParamsMissing,
    BadRequestBody,
    OverlappingQueryParameter,
    UnsupportedFormat,
    UnsupportedApiType,
    UnsupportedSourceType,
    AliasContainsForbiddenChars,
    PackageIdMismatch,
    InvalidStatusTransition,

    // Authorization
    InsufficientPrivileges,
    UserIdNotFound,
    ApiKeyHeaderEmpty,
    NotOwner,

    // Resource
    PackageNotFound,
    PublishedVersionNotFound,
    PublishedPackageVersionNotFound,
    OperationGroupNotFound,
    TransformedDocumentsNotFound,
    ChangesAreEmpty,
    OperationsAreEmpty,
    ApiKeyNotFound,
    BuildNotFound,
    BuildPruned,
    ComparisonNotFound,

    // Capacity
    ArchiveSizeExceeded,
    BranchContentSizeExceeded,
    RateLimited,

    // Cluster / WS
    UnableToSelectWsServer,
    ConnectionNotUpgraded,

    // Anything else
    Internal,
}

/// Coarse classification of an [`ErrorCode`], used by transports to pick a status
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Validation,
    Authorization,
    Resource,
    Capacity,
    Cluster,
    Internal,
}

impl ErrorCode {
    pub fn category(&self) -> ErrorCategory {
        use ErrorCode::*;
        match self {
            InvalidParameter
            | InvalidParameterValue
            | IncorrectParamType
            | InvalidUrlEscape
            | RequiredParamsMissing
            | BadRequestBody
            | OverlappingQueryParameter
            | UnsupportedFormat
            | UnsupportedApiType
            | UnsupportedSourceType
            | AliasContainsForbiddenChars
            | PackageIdMismatch
            | InvalidStatusTransition => ErrorCategory::Validation,
            InsufficientPrivileges | UserIdNotFound | ApiKeyHeaderEmpty | NotOwner => {
                ErrorCategory::Authorization
            }
            PackageNotFound
            | PublishedVersionNotFound
            | PublishedPackageVersionNotFound
            | OperationGroupNotFound
            | TransformedDocumentsNotFound
            | ChangesAreEmpty
            | OperationsAreEmpty
            | ApiKeyNotFound
            | BuildNotFound
            | BuildPruned
            | ComparisonNotFound => ErrorCategory::Resource,
            ArchiveSizeExceeded | BranchContentSizeExceeded | RateLimited => {
                ErrorCategory::Capacity
            }
            UnableToSelectWsServer | ConnectionNotUpgraded => ErrorCategory::Cluster,
            Internal => ErrorCategory::Internal,
        }
    }

    /// Codes that make a package-scoped request eligible for a package-transition redirect
    pub fn is_package_lookup_miss(&self) -> bool {
        matches!(
            self,
            ErrorCode::PackageNotFound
                | ErrorCode::PublishedVersionNotFound
                | ErrorCode::PublishedPackageVersionNotFound
        )
    }
}

/// Application-level error type
#[derive(Error, Debug)]
pub enum AppError {
    /// Error with a stable code, safe to surface to clients as-is
    #[error("{message}")]
    Coded {
        code: ErrorCode,
        message: String,
        params: BTreeMap<String, String>,
    },

    #[error("Domain error: {0}")]
    Domain(#[from] crate::domain::DomainError),

    #[error("Database error: {0}")]
    Database(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Archive error: {0}")]
    Archive(#[from] zip::result::ZipError),

    #[error("Configuration error: {0}")]
    Config(String),

    /// Unique-key collision reported by a store (e.g. fingerprint gate)
    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Execution error: {0}")]
    Execution(#[from] crate::port::ExecutionError),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl AppError {
    pub fn coded(code: ErrorCode, message: impl Into<String>) -> Self {
        AppError::Coded {
            code,
            message: message.into(),
            params: BTreeMap::new(),
        }
    }

    /// Attach a named parameter to a coded error (no-op for other variants)
    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        if let AppError::Coded { params, .. } = &mut self {
            params.insert(key.into(), value.into());
        }
        self
    }

    pub fn code(&self) -> ErrorCode {
        match self {
            AppError::Coded { code, .. } => *code,
            _ => ErrorCode::Internal,
        }
    }

    pub fn params(&self) -> Option<&BTreeMap<String, String>> {
        match self {
            AppError::Coded { params, .. } if !params.is_empty() => Some(params),
            _ => None,
        }
    }

    pub fn is_code(&self, code: ErrorCode) -> bool {
        self.code() == code
    }

    pub fn invalid_value(param: &str, message: impl Into<String>) -> Self {
        Self::coded(ErrorCode::InvalidParameterValue, message).with_param("param", param)
    }

    pub fn missing(param: &str) -> Self {
        Self::coded(
            ErrorCode::RequiredParamsMissing,
            format!("Required parameter '{}' is missing", param),
        )
        .with_param("params", param)
    }
}

/// Result type alias using AppError
pub type Result<T> = std::result::Result<T, AppError>;

// Note: sqlx::Error conversion is handled in infra-sqlite crate
// by converting to AppError::Database(String) or AppError::Conflict(String)

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_code_serializes_camel_case() {
        let json = serde_json::to_string(&ErrorCode::ArchiveSizeExceeded).unwrap();
        assert_eq!(json, "\"archiveSizeExceeded\"");
        let json = serde_json::to_string(&ErrorCode::InvalidUrlEscape).unwrap();
        assert_eq!(json, "\"invalidURLEscape\"");
    }

    #[test]
    fn test_uncoded_errors_are_internal() {
        let err = AppError::Database("locked".to_string());
        assert_eq!(err.code(), ErrorCode::Internal);
        assert_eq!(err.code().category(), ErrorCategory::Internal);
    }

    #[test]
    fn test_params_attached_only_to_coded() {
        let err = AppError::missing("packageId");
        assert_eq!(err.code(), ErrorCode::RequiredParamsMissing);
        assert_eq!(err.params().unwrap().get("params").unwrap(), "packageId");

        let err = AppError::Internal("x".into()).with_param("a", "b");
        assert!(err.params().is_none());
    }

    #[test]
    fn test_package_lookup_miss_codes() {
        assert!(ErrorCode::PackageNotFound.is_package_lookup_miss());
        assert!(ErrorCode::PublishedPackageVersionNotFound.is_package_lookup_miss());
        assert!(!ErrorCode::OperationGroupNotFound.is_package_lookup_miss());
    }
}
