//! Threshold rule evaluation.
//!
//! A threshold rule alerts on counts rather than individual events: either
//! the total number of matches in the execution window, or per-value counts
//! over a grouping field. Signal ids are derived deterministically from the
//! rule, the execution start time, and the bucket key, so re-running the
//! same window writes the same ids and the store's duplicate handling makes
//! the evaluation idempotent.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde_json::Value;
use uuid::Uuid;

use sentinel_store::{field_value, SearchHit};

use crate::rule::ThresholdConfig;

/// Fixed namespace for v5 signal ids.
pub const SIGNAL_ID_NAMESPACE: Uuid = Uuid::from_u128(0x0684ec03_7201_4ee0_8ee0_3a3f6b2479b2);

/// One bucket that met or exceeded the configured threshold.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThresholdMatch {
    /// Grouping value, absent for ungrouped thresholds.
    pub key: Option<String>,
    pub count: u64,
    /// Deterministic signal id for this bucket and execution window.
    pub signal_id: String,
}

/// Deterministic id for a threshold signal.
///
/// Keyed by rule, window start, grouping field, and bucket key so that the
/// same window always produces the same id while distinct buckets never
/// collide.
pub fn threshold_signal_id(
    rule_id: &str,
    started_at: DateTime<Utc>,
    field: Option<&str>,
    key: Option<&str>,
) -> String {
    let seed = format!(
        "{rule_id}:{}:{}:{}",
        started_at.to_rfc3339(),
        field.unwrap_or(""),
        key.unwrap_or(""),
    );
    Uuid::new_v5(&SIGNAL_ID_NAMESPACE, seed.as_bytes()).to_string()
}

fn bucket_key(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Evaluate a threshold over the window's hits.
///
/// `total` is the store-reported match count and drives ungrouped
/// thresholds; grouped thresholds count the returned hits per field value
/// (hits missing the field are ignored). Buckets come back in key order so
/// execution output is stable.
pub fn evaluate_threshold(
    config: &ThresholdConfig,
    rule_id: &str,
    started_at: DateTime<Utc>,
    total: u64,
    hits: &[SearchHit],
) -> Vec<ThresholdMatch> {
    match &config.field {
        None => {
            if total >= config.value {
                vec![ThresholdMatch {
                    key: None,
                    count: total,
                    signal_id: threshold_signal_id(rule_id, started_at, None, None),
                }]
            } else {
                Vec::new()
            }
        }
        Some(field) => {
            let mut buckets: BTreeMap<String, u64> = BTreeMap::new();
            for hit in hits {
                if let Some(v) = field_value(&hit.source, field) {
                    *buckets.entry(bucket_key(v)).or_insert(0) += 1;
                }
            }
            buckets
                .into_iter()
                .filter(|(_, count)| *count >= config.value)
                .map(|(key, count)| ThresholdMatch {
                    signal_id: threshold_signal_id(
                        rule_id,
                        started_at,
                        Some(field),
                        Some(&key),
                    ),
                    key: Some(key),
                    count,
                })
                .collect()
        }
    }
}
