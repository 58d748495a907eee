//! Batched signal writes.
//!
//! Persists a batch of alert documents and classifies the per-document
//! outcomes: created, duplicate (an id we already wrote in an earlier run),
//! or error. Duplicates are expected under deterministic ids and never fail
//! the batch; distinct error messages are aggregated into a histogram so one
//! repeated mapping failure does not flood the logs.

use std::collections::BTreeMap;
use std::time::Instant;

use serde::Serialize;
use serde_json::Value;
use tracing::{debug, error};

use sentinel_core::AlertDocument;
use sentinel_store::{BulkOperation, DocumentStore};

use crate::error::DetectionError;

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct CreatedItem {
    pub id: String,
    pub index: String,
    /// The fields the caller submitted, echoed back alongside the
    /// storage-assigned id.
    pub document: Value,
}

/// One distinct failure message with its occurrence count.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct BulkCreateError {
    pub message: String,
    pub status: u16,
    pub count: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct BulkCreateResult {
    /// False only when a non-duplicate error occurred.
    pub success: bool,
    /// Wall-clock write duration in milliseconds, float-formatted.
    pub took: String,
    pub created_items: Vec<CreatedItem>,
    pub duplicate_count: usize,
    pub errors: Vec<BulkCreateError>,
}

impl BulkCreateResult {
    fn empty() -> Self {
        Self {
            success: true,
            took: float_string(0.0),
            created_items: Vec::new(),
            duplicate_count: 0,
            errors: Vec::new(),
        }
    }

    pub fn created_count(&self) -> usize {
        self.created_items.len()
    }
}

fn float_string(ms: f64) -> String {
    format!("{ms:.2}")
}

/// Write a batch of alerts under caller-assigned ids.
///
/// An empty batch short-circuits without touching the store.
pub async fn bulk_create(
    store: &dyn DocumentStore,
    index: &str,
    alerts: Vec<(String, AlertDocument)>,
) -> Result<BulkCreateResult, DetectionError> {
    if alerts.is_empty() {
        return Ok(BulkCreateResult::empty());
    }

    let started = Instant::now();
    let mut submitted: BTreeMap<String, Value> = BTreeMap::new();
    let ops = alerts
        .into_iter()
        .map(|(id, doc)| {
            let document = serde_json::to_value(&doc)?;
            submitted.insert(id.clone(), document.clone());
            Ok(BulkOperation {
                index: index.to_string(),
                id: Some(id),
                document,
            })
        })
        .collect::<Result<Vec<_>, DetectionError>>()?;

    let response = store.bulk_index(ops).await?;
    let took = float_string(started.elapsed().as_secs_f64() * 1000.0);

    let mut created_items = Vec::new();
    let mut duplicate_count = 0usize;
    let mut histogram: BTreeMap<(String, u16), usize> = BTreeMap::new();

    for item in response.items {
        match item.status {
            201 => {
                let document = submitted.remove(&item.id).unwrap_or(Value::Null);
                created_items.push(CreatedItem {
                    id: item.id,
                    index: item.index,
                    document,
                });
            }
            409 => duplicate_count += 1,
            status => {
                let message = item
                    .error
                    .unwrap_or_else(|| "unknown bulk failure".to_string());
                *histogram.entry((message, status)).or_insert(0) += 1;
            }
        }
    }

    if duplicate_count > 0 {
        debug!(duplicate_count, index, "skipped already-written alerts");
    }

    let errors: Vec<BulkCreateError> = histogram
        .into_iter()
        .map(|((message, status), count)| BulkCreateError {
            message,
            status,
            count,
        })
        .collect();

    for e in &errors {
        error!(
            message = %e.message,
            status = e.status,
            count = e.count,
            "bulk alert write failed"
        );
    }

    Ok(BulkCreateResult {
        success: errors.is_empty(),
        took,
        created_items,
        duplicate_count,
        errors,
    })
}
