//! Security Context Extraction
//!
//! The upstream gateway authenticates callers and injects the user id header.
//! The bearer token is only carried along for peer forwarding.

use crate::error::ApiError;
use apihub_core::domain::SecurityContext;
use apihub_core::error::{AppError, ErrorCode};
use axum::async_trait;
use axum::extract::{FromRequestParts, Query};
use axum::http::request::Parts;
use axum::http::{header, HeaderMap, Uri};
use std::collections::HashMap;

pub const USER_HEADER: &str = "x-authenticated-user";
pub const API_KEY_HEADER: &str = "api-key";

/// Per-request [`SecurityContext`]
#[derive(Debug, Clone)]
pub struct Ctx(pub SecurityContext);

/// Token from `Authorization: Bearer …`, else the `token` query parameter
pub fn bearer_token(headers: &HeaderMap, uri: &Uri) -> Option<String> {
    let from_header = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty());
    from_header.or_else(|| {
        Query::<HashMap<String, String>>::try_from_uri(uri)
            .ok()
            .and_then(|Query(q)| q.get("token").cloned())
            .filter(|t| !t.is_empty())
    })
}

pub fn context_from(headers: &HeaderMap, uri: &Uri) -> Result<SecurityContext, AppError> {
    if let Some(key) = headers.get(API_KEY_HEADER) {
        if key.as_bytes().iter().all(u8::is_ascii_whitespace) {
            return Err(AppError::coded(
                ErrorCode::ApiKeyHeaderEmpty,
                "api-key header is empty",
            ));
        }
    }
    let user_id = headers
        .get(USER_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty());
    Ok(SecurityContext {
        user_id,
        ..SecurityContext::default()
    }
    .with_token(bearer_token(headers, uri))
    .with_step(uri.path().to_string()))
}

#[async_trait]
impl<S> FromRequestParts<S> for Ctx
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(Ctx(context_from(&parts.headers, &parts.uri)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn test_user_and_bearer() {
        let mut headers = HeaderMap::new();
        headers.insert(USER_HEADER, HeaderValue::from_static("alice"));
        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Bearer abc"));
        let uri: Uri = "/api/v2/compare?token=ignored".parse().unwrap();

        let ctx = context_from(&headers, &uri).unwrap();
        assert_eq!(ctx.user_id.as_deref(), Some("alice"));
        assert_eq!(ctx.token.as_deref(), Some("abc"));
        assert_eq!(ctx.trail(), "/api/v2/compare");
    }

    #[test]
    fn test_query_token_fallback() {
        let uri: Uri = "/ws/v1/projects/p/branches/main?token=xyz".parse().unwrap();
        let ctx = context_from(&HeaderMap::new(), &uri).unwrap();
        assert_eq!(ctx.token.as_deref(), Some("xyz"));
        assert!(ctx.user_id.is_none());
    }

    #[test]
    fn test_empty_api_key_rejected() {
        let mut headers = HeaderMap::new();
        headers.insert(API_KEY_HEADER, HeaderValue::from_static(""));
        let uri: Uri = "/".parse().unwrap();
        let err = context_from(&headers, &uri).unwrap_err();
        assert_eq!(err.code(), ErrorCode::ApiKeyHeaderEmpty);
    }
}
