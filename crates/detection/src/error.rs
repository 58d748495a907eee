use thiserror::Error;

use sentinel_store::StoreError;

#[derive(Error, Debug)]
pub enum DetectionError {
    #[error("validation error: {0}")]
    Validation(String),

    #[error("invalid cursor: {0}")]
    Cursor(String),

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("serialization error: {0}")]
    Serialize(String),
}

impl From<serde_json::Error> for DetectionError {
    fn from(e: serde_json::Error) -> Self {
        DetectionError::Serialize(e.to_string())
    }
}
