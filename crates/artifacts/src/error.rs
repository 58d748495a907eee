use thiserror::Error;

use sentinel_store::StoreError;

#[derive(Error, Debug)]
pub enum ArtifactError {
    #[error("invalid semantic version: {0}")]
    InvalidVersion(String),

    #[error("artifact not found: {0}")]
    NotFound(String),

    #[error("compression failed for {0}: {1}")]
    Compression(String, String),

    #[error("manifest validation failed: {0}")]
    Validation(String),

    #[error("dispatch to '{consumer}' failed: {message}")]
    Dispatch { consumer: String, message: String },

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("serialization error: {0}")]
    Serialize(String),
}

impl From<serde_json::Error> for ArtifactError {
    fn from(e: serde_json::Error) -> Self {
        ArtifactError::Serialize(e.to_string())
    }
}
