//! Detection rule execution engine.
//!
//! Periodically runs user-defined detection queries against the document
//! store and persists resulting alerts with lifecycle tracking:
//! - [`rule`]: rule definitions (query, threshold, custom) and intervals
//! - [`scheduler`]: per-rule interval bookkeeping for the tick loop
//! - [`cursor`]: opaque forward/backward page cursor codec
//! - [`search`]: the alert list query builder with before/after semantics
//! - [`bulk`]: batched signal writes with partial-failure aggregation
//! - [`threshold`]: aggregation-bucket evaluation with deterministic ids
//! - [`engine`]: the per-execution state machine (open/active/closed)
//! - [`status`]: per-rule execution status records

pub mod bulk;
pub mod cursor;
pub mod engine;
pub mod error;
pub mod rule;
pub mod scheduler;
pub mod search;
pub mod status;
pub mod threshold;

pub use bulk::{bulk_create, BulkCreateError, BulkCreateResult, CreatedItem};
pub use cursor::{decode_cursor, encode_cursor};
pub use engine::{
    CandidateEvent, CustomRuleExecutor, DetectionEngine, ExecutionWindow, RuleExecutionOutcome,
};
pub use error::DetectionError;
pub use rule::{parse_interval, Rule, RuleType, ThresholdConfig};
pub use scheduler::RuleScheduler;
pub use search::{search_alerts, AlertListRequest, AlertPage, DateRange};
pub use status::{RuleExecutionState, RuleStatus, RuleStatusTracker};
pub use threshold::{evaluate_threshold, threshold_signal_id, ThresholdMatch};
