use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

use carrel_blob::error::BlobError;
use carrel_core::FileError;
use carrel_state::error::StateError;

/// Errors that can occur when running the Carrel server.
#[derive(Debug, Error)]
pub enum ServerError {
    /// A configuration error.
    #[error("configuration error: {0}")]
    Config(String),

    /// An I/O error (e.g. binding the listener).
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// A protocol-level failure surfaced through the API.
    #[error(transparent)]
    File(#[from] FileError),

    /// A state backend failure.
    #[error("state error: {0}")]
    State(#[from] StateError),

    /// An object store failure.
    #[error("blob store error: {0}")]
    Blob(#[from] BlobError),
}

/// Quota ceiling header, value in mebibytes.
pub const QUOTA_HEADER: &str = "X-Storage-Quota";
/// Identity whose quota was exceeded.
pub const QUOTA_OWNER_HEADER: &str = "X-Storage-UserID";

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let (status, message, quota) = match &self {
            Self::File(err) => match err {
                FileError::BadRequest(_)
                | FileError::ContentMismatch { .. }
                | FileError::SizeMismatch { .. } => {
                    (StatusCode::BAD_REQUEST, err.to_string(), None)
                }
                FileError::PreconditionRequired => {
                    (StatusCode::PRECONDITION_REQUIRED, err.to_string(), None)
                }
                FileError::PreconditionFailed => {
                    (StatusCode::PRECONDITION_FAILED, err.to_string(), None)
                }
                FileError::QuotaExceeded {
                    ceiling_bytes,
                    owner,
                } => (
                    StatusCode::PAYLOAD_TOO_LARGE,
                    err.to_string(),
                    Some((*ceiling_bytes, owner.clone())),
                ),
                FileError::NotFound => (StatusCode::NOT_FOUND, err.to_string(), None),
                FileError::Forbidden(_) => (StatusCode::FORBIDDEN, err.to_string(), None),
            },
            Self::Blob(BlobError::NotFound(_)) => {
                (StatusCode::NOT_FOUND, "not found".to_owned(), None)
            }
            Self::Blob(
                err @ (BlobError::ContentMismatch { .. } | BlobError::SizeMismatch { .. }),
            ) => (StatusCode::BAD_REQUEST, err.to_string(), None),
            Self::Config(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg.clone(), None),
            Self::Io(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string(), None),
            Self::State(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string(), None),
            Self::Blob(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string(), None),
        };

        let body = serde_json::json!({ "error": message });
        let mut response = (status, axum::Json(body)).into_response();

        if let Some((ceiling_bytes, owner)) = quota {
            let mebibytes = ceiling_bytes.div_ceil(1024 * 1024);
            if let Ok(value) = axum::http::HeaderValue::from_str(&mebibytes.to_string()) {
                response.headers_mut().insert(QUOTA_HEADER, value);
            }
            if let Ok(value) = axum::http::HeaderValue::from_str(owner.as_str()) {
                response.headers_mut().insert(QUOTA_OWNER_HEADER, value);
            }
        }

        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use carrel_core::OwnerId;

    #[test]
    fn quota_error_carries_headers() {
        let response = ServerError::File(FileError::QuotaExceeded {
            ceiling_bytes: 300 * 1024 * 1024,
            owner: OwnerId::new("user-9"),
        })
        .into_response();

        assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
        assert_eq!(response.headers()[QUOTA_HEADER], "300");
        assert_eq!(response.headers()[QUOTA_OWNER_HEADER], "user-9");
    }

    #[test]
    fn blob_validation_failures_are_bad_requests() {
        let response = ServerError::Blob(BlobError::ContentMismatch {
            expected: "aa".into(),
            actual: "bb".into(),
        })
        .into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let response = ServerError::Blob(BlobError::Storage("disk full".into())).into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn precondition_statuses_are_distinct() {
        let required = ServerError::File(FileError::PreconditionRequired).into_response();
        assert_eq!(required.status(), StatusCode::PRECONDITION_REQUIRED);

        let failed = ServerError::File(FileError::PreconditionFailed).into_response();
        assert_eq!(failed.status(), StatusCode::PRECONDITION_FAILED);
        assert!(!failed.headers().contains_key("Last-Modified-Version"));
    }
}
