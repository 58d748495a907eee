use thiserror::Error;

/// Shared error taxonomy. Handler code maps these onto HTTP status codes:
/// Validation → 400, Unauthorized → 401, NotFound → 404, everything else → 500.
#[derive(Error, Debug)]
pub enum SentinelError {
    #[error("validation error: {0}")]
    Validation(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialize(String),

    #[error("{0}")]
    Other(String),
}

impl From<serde_json::Error> for SentinelError {
    fn from(e: serde_json::Error) -> Self {
        SentinelError::Serialize(e.to_string())
    }
}
