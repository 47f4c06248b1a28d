use thiserror::Error;

/// Errors surfaced by state store backends.
#[derive(Debug, Error)]
pub enum StateError {
    /// A backend-level failure (storage engine, I/O).
    #[error("state backend error: {0}")]
    Backend(String),

    /// The backend could not be reached or initialized.
    #[error("state connection error: {0}")]
    Connection(String),

    /// A stored value could not be (de)serialized.
    #[error("state serialization error: {0}")]
    Serialization(String),
}

impl From<serde_json::Error> for StateError {
    fn from(e: serde_json::Error) -> Self {
        Self::Serialization(e.to_string())
    }
}
