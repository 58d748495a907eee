use async_trait::async_trait;
use serde_json::Value;

use crate::error::StoreError;
use crate::types::{BulkOperation, BulkResponse, GetResponse, SearchRequest, SearchResponse};

/// The contract this core needs from the underlying search/storage engine.
///
/// All calls are async and may fail with [`StoreError::Timeout`]; callers
/// surface timeouts as retryable and let the next scheduled tick retry from
/// scratch.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Execute a paginated, sorted search.
    async fn search(&self, request: &SearchRequest) -> Result<SearchResponse, StoreError>;

    /// Write a batch of documents, returning per-document status.
    async fn bulk_index(&self, ops: Vec<BulkOperation>) -> Result<BulkResponse, StoreError>;

    /// Fetch a document by id.
    async fn get(&self, index: &str, id: &str) -> Result<GetResponse, StoreError>;

    /// Merge `patch` into the document with the given id.
    async fn update(&self, index: &str, id: &str, patch: Value) -> Result<(), StoreError>;

    /// Remove a document by id.
    async fn delete(&self, index: &str, id: &str) -> Result<(), StoreError>;

    /// Whether the current credentials can read all of `indices`.
    async fn has_read_privileges(&self, indices: &[String]) -> Result<bool, StoreError>;

    /// Whether all of `indices` map `field` as a timestamp.
    async fn has_timestamp_field(&self, indices: &[String], field: &str)
        -> Result<bool, StoreError>;
}
