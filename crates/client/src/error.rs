use thiserror::Error;

use carrel_core::{FileError, OwnerId};

/// Errors returned by the Carrel client.
#[derive(Debug, Error)]
pub enum Error {
    /// Client construction failed.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// The server could not be reached.
    #[error("connection error: {0}")]
    Connection(String),

    /// A response body could not be decoded.
    #[error("deserialization error: {0}")]
    Deserialization(String),

    /// A protocol-level rejection, decoded back into the shared taxonomy.
    #[error(transparent)]
    Protocol(#[from] FileError),

    /// An HTTP failure outside the protocol taxonomy.
    #[error("http error {status}: {message}")]
    Http {
        /// Response status code.
        status: u16,
        /// Error message from the response body, if any.
        message: String,
    },
}

/// Decode a non-success response into the protocol taxonomy where possible.
pub(crate) async fn from_response(response: reqwest::Response) -> Error {
    let status = response.status();

    // Quota context travels in headers, not the body.
    if status == reqwest::StatusCode::PAYLOAD_TOO_LARGE {
        let ceiling_bytes = response
            .headers()
            .get("X-Storage-Quota")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<u64>().ok())
            .map_or(0, |mebibytes| mebibytes * 1024 * 1024);
        let owner = response
            .headers()
            .get("X-Storage-UserID")
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_owned();
        return FileError::QuotaExceeded {
            ceiling_bytes,
            owner: OwnerId::new(owner),
        }
        .into();
    }

    let message = match response.json::<serde_json::Value>().await {
        Ok(body) => body["error"].as_str().unwrap_or_default().to_owned(),
        Err(_) => String::new(),
    };

    match status.as_u16() {
        400 => FileError::BadRequest(message).into(),
        403 => FileError::Forbidden(message).into(),
        404 => FileError::NotFound.into(),
        412 => FileError::PreconditionFailed.into(),
        428 => FileError::PreconditionRequired.into(),
        code => Error::Http {
            status: code,
            message,
        },
    }
}
