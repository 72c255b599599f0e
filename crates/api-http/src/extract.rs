//! Extractors that reject with the error envelope

use crate::error::ApiError;
use apihub_core::error::{AppError, ErrorCode};
use axum::async_trait;
use axum::body::Bytes;
use axum::extract::{FromRequest, FromRequestParts, Query, Request};
use axum::http::request::Parts;
use serde::de::DeserializeOwned;

/// Typed query string
#[derive(Debug, Clone)]
pub struct ApiQuery<T>(pub T);

#[async_trait]
impl<T, S> FromRequestParts<S> for ApiQuery<T>
where
    T: DeserializeOwned,
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Query::<T>::try_from_uri(&parts.uri)
            .map(|Query(value)| ApiQuery(value))
            .map_err(|rejection| {
                AppError::coded(ErrorCode::InvalidParameter, rejection.body_text()).into()
            })
    }
}

/// Buffered request body, bounded by the router's `DefaultBodyLimit`
#[derive(Debug, Clone)]
pub struct ApiBody(pub Bytes);

#[async_trait]
impl<S> FromRequest<S> for ApiBody
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        Bytes::from_request(req, state)
            .await
            .map(ApiBody)
            .map_err(|rejection| {
                AppError::coded(ErrorCode::BadRequestBody, rejection.body_text()).into()
            })
    }
}

/// Deserialize a JSON request body
pub fn parse_json<T: DeserializeOwned>(body: &Bytes) -> Result<T, AppError> {
    serde_json::from_slice(body).map_err(|e| {
        AppError::coded(
            ErrorCode::BadRequestBody,
            format!("Request body is not valid JSON: {}", e),
        )
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Deserialize)]
    #[serde(rename_all = "camelCase")]
    struct Flags {
        #[serde(default)]
        client_build: bool,
    }

    #[tokio::test]
    async fn test_query_rejection_is_coded() {
        let (mut parts, _) = axum::http::Request::builder()
            .uri("/x?clientBuild=maybe")
            .body(())
            .unwrap()
            .into_parts();
        let err = ApiQuery::<Flags>::from_request_parts(&mut parts, &())
            .await
            .unwrap_err();
        assert_eq!(err.code(), Some(ErrorCode::InvalidParameter));

        let (mut parts, _) = axum::http::Request::builder()
            .uri("/x?clientBuild=true")
            .body(())
            .unwrap()
            .into_parts();
        let ApiQuery(flags) = ApiQuery::<Flags>::from_request_parts(&mut parts, &())
            .await
            .unwrap();
        assert!(flags.client_build);
    }

    #[test]
    fn test_parse_json_bad_body() {
        let err = parse_json::<serde_json::Value>(&Bytes::from_static(b"{nope")).unwrap_err();
        assert_eq!(err.code(), ErrorCode::BadRequestBody);
    }
}
