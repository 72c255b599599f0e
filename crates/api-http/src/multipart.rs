//! Multipart Form Reading
//!
//! Buffers form fields under a byte budget and honors
//! `Content-Transfer-Encoding: base64` per part or for the whole request.

use apihub_core::error::{AppError, ErrorCode};
use axum::extract::multipart::{Multipart, MultipartError, MultipartRejection};
use axum::http::{header, HeaderMap};
use base64::Engine;
use serde::de::DeserializeOwned;
use std::collections::HashMap;

pub const TRANSFER_ENCODING: &str = "content-transfer-encoding";

#[derive(Debug, Clone, Default)]
pub struct FormField {
    pub bytes: Vec<u8>,
    pub file_name: Option<String>,
}

/// Buffered multipart form
#[derive(Debug, Default)]
pub struct Form {
    fields: HashMap<String, FormField>,
}

fn bad_body(err: MultipartError) -> AppError {
    AppError::coded(
        ErrorCode::BadRequestBody,
        format!("Malformed multipart body: {}", err),
    )
}

pub fn size_exceeded(limit: u64) -> AppError {
    AppError::coded(
        ErrorCode::ArchiveSizeExceeded,
        format!("Request exceeds the {} byte limit", limit),
    )
    .with_param("limit", limit.to_string())
}

fn is_base64(headers: &HeaderMap) -> bool {
    headers
        .get(TRANSFER_ENCODING)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.trim().eq_ignore_ascii_case("base64"))
}

/// Reject early when the declared length is already over `limit`
pub fn check_content_length(headers: &HeaderMap, limit: u64) -> Result<(), AppError> {
    let declared = headers
        .get(header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<u64>().ok());
    match declared {
        Some(len) if len > limit => Err(size_exceeded(limit)),
        _ => Ok(()),
    }
}

pub fn decode_base64(name: &str, raw: &[u8]) -> Result<Vec<u8>, AppError> {
    let compact: Vec<u8> = raw
        .iter()
        .copied()
        .filter(|b| !b.is_ascii_whitespace())
        .collect();
    base64::engine::general_purpose::STANDARD
        .decode(compact)
        .map_err(|e| {
            AppError::coded(
                ErrorCode::BadRequestBody,
                format!("Field '{}' is not valid base64: {}", name, e),
            )
            .with_param("field", name)
        })
}

/// Read every part of `multipart`, failing once more than `limit` bytes arrive
pub async fn read_form(
    multipart: Result<Multipart, MultipartRejection>,
    request_headers: &HeaderMap,
    limit: u64,
) -> Result<Form, AppError> {
    let mut multipart = multipart.map_err(|rejection| {
        AppError::coded(ErrorCode::BadRequestBody, rejection.body_text())
    })?;
    let whole_request_base64 = is_base64(request_headers);
    let mut form = Form::default();
    let mut total: u64 = 0;

    while let Some(mut field) = multipart.next_field().await.map_err(bad_body)? {
        let Some(name) = field.name().map(str::to_string) else {
            continue;
        };
        let file_name = field.file_name().map(str::to_string);
        let base64 = whole_request_base64 || is_base64(field.headers());

        let mut bytes = Vec::new();
        while let Some(chunk) = field.chunk().await.map_err(bad_body)? {
            total += chunk.len() as u64;
            if total > limit {
                return Err(size_exceeded(limit));
            }
            bytes.extend_from_slice(&chunk);
        }
        if base64 {
            bytes = decode_base64(&name, &bytes)?;
        }
        form.fields.insert(name, FormField { bytes, file_name });
    }
    Ok(form)
}

impl Form {
    pub fn contains(&self, name: &str) -> bool {
        self.fields.contains_key(name)
    }

    pub fn file_name(&self, name: &str) -> Option<&str> {
        self.fields.get(name).and_then(|f| f.file_name.as_deref())
    }

    /// Raw bytes of a part; empty parts count as absent
    pub fn take_bytes(&mut self, name: &str) -> Option<Vec<u8>> {
        self.fields
            .remove(name)
            .map(|f| f.bytes)
            .filter(|b| !b.is_empty())
    }

    pub fn text(&self, name: &str) -> Result<Option<String>, AppError> {
        match self.fields.get(name) {
            None => Ok(None),
            Some(field) => String::from_utf8(field.bytes.clone())
                .map(|s| Some(s.trim().to_string()))
                .map_err(|_| {
                    AppError::coded(
                        ErrorCode::IncorrectParamType,
                        format!("Field '{}' must be UTF-8 text", name),
                    )
                    .with_param("field", name)
                }),
        }
    }

    /// Boolean part; absent means false
    pub fn flag(&self, name: &str) -> Result<bool, AppError> {
        match self.text(name)?.as_deref() {
            None | Some("") | Some("false") | Some("0") => Ok(false),
            Some("true") | Some("1") => Ok(true),
            Some(other) => Err(AppError::coded(
                ErrorCode::IncorrectParamType,
                format!("Field '{}' must be a boolean, got '{}'", name, other),
            )
            .with_param("field", name)),
        }
    }

    pub fn json<T: DeserializeOwned>(&self, name: &str) -> Result<Option<T>, AppError> {
        match self.fields.get(name) {
            None => Ok(None),
            Some(field) if field.bytes.iter().all(u8::is_ascii_whitespace) => Ok(None),
            Some(field) => serde_json::from_slice(&field.bytes).map(Some).map_err(|e| {
                AppError::coded(
                    ErrorCode::BadRequestBody,
                    format!("Field '{}' is not valid JSON: {}", name, e),
                )
                .with_param("field", name)
            }),
        }
    }

    #[cfg(test)]
    pub fn insert(&mut self, name: &str, bytes: &[u8]) {
        self.fields.insert(
            name.to_string(),
            FormField {
                bytes: bytes.to_vec(),
                file_name: None,
            },
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn test_content_length_precheck() {
        let mut headers = HeaderMap::new();
        headers.insert(header::CONTENT_LENGTH, HeaderValue::from_static("2048"));
        assert!(check_content_length(&headers, 4096).is_ok());
        let err = check_content_length(&headers, 1024).unwrap_err();
        assert_eq!(err.code(), ErrorCode::ArchiveSizeExceeded);
        assert!(check_content_length(&HeaderMap::new(), 1).is_ok());
    }

    #[test]
    fn test_base64_ignores_line_breaks() {
        assert_eq!(decode_base64("data", b"aGVs\r\nbG8=").unwrap(), b"hello");
        assert_eq!(
            decode_base64("data", b"***").unwrap_err().code(),
            ErrorCode::BadRequestBody
        );
    }

    #[test]
    fn test_form_accessors() {
        let mut form = Form::default();
        form.insert("clientBuild", b"true");
        form.insert("resolveRefs", b"yes");
        form.insert("dependencies", br#"[{"refId":"a","version":"v1"}]"#);
        form.insert("sources", b"");

        assert!(form.flag("clientBuild").unwrap());
        assert!(!form.flag("missing").unwrap());
        assert_eq!(
            form.flag("resolveRefs").unwrap_err().code(),
            ErrorCode::IncorrectParamType
        );
        let deps: Vec<serde_json::Value> = form.json("dependencies").unwrap().unwrap();
        assert_eq!(deps.len(), 1);
        assert!(form.contains("sources"));
        assert!(form.take_bytes("sources").is_none());
    }
}
