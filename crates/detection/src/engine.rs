//! Per-execution rule evaluation with alert lifecycle tracking.
//!
//! One execution covers the window `[now − interval − lookback, now]`. The
//! engine gathers candidate alerts for the rule type, then reconciles them
//! against the alerts currently open for the rule:
//! - candidates without an open alert are written as new `open` alerts,
//! - candidates that match an open alert refresh it to `active`,
//! - open alerts with no matching candidate are `closed` with a duration.
//!
//! Candidate ids are v5 uuids over the rule and source event, so repeated
//! or overlapping windows converge on the same documents and duplicates are
//! absorbed by the store's 409 handling. Execution never returns an error
//! to the scheduler; every failure lands in the rule's status record.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::{json, Map, Value};
use tracing::{debug, info, warn};
use uuid::Uuid;

use sentinel_core::{AlertDocument, RuleMeta};
use sentinel_store::{DocumentStore, QueryClause, SearchRequest, SortClause};

use crate::bulk::bulk_create;
use crate::error::DetectionError;
use crate::rule::{Rule, RuleType};
use crate::status::{Outcome, RuleExecutionState};
use crate::threshold::{evaluate_threshold, SIGNAL_ID_NAMESPACE};

/// Upper bound on open alerts reconciled per execution.
const OPEN_ALERTS_PAGE: usize = 10_000;

/// A source event (or synthetic aggregate) that should be an open alert.
#[derive(Debug, Clone)]
pub struct CandidateEvent {
    /// Deterministic alert document id.
    pub alert_id: String,
    /// Fields carried onto the alert document.
    pub source: Map<String, Value>,
}

impl CandidateEvent {
    /// Candidate derived from a concrete source event. The alert id is a v5
    /// uuid over the rule and event ids, stable across executions.
    pub fn from_source_event(rule_id: &str, event_id: &str, source: Map<String, Value>) -> Self {
        let seed = format!("{rule_id}:{event_id}");
        Self {
            alert_id: Uuid::new_v5(&SIGNAL_ID_NAMESPACE, seed.as_bytes()).to_string(),
            source,
        }
    }
}

/// The execution window a custom executor evaluates over.
#[derive(Debug, Clone, Copy)]
pub struct ExecutionWindow {
    pub from: DateTime<Utc>,
    pub to: DateTime<Utc>,
}

/// Pluggable rule logic, registered by name and referenced from
/// [`RuleType::Custom`].
#[async_trait]
pub trait CustomRuleExecutor: Send + Sync {
    fn name(&self) -> &str;

    async fn execute(
        &self,
        rule: &Rule,
        window: ExecutionWindow,
        store: &dyn DocumentStore,
    ) -> Result<Vec<CandidateEvent>, DetectionError>;
}

/// What one execution did, as recorded in the rule's status.
#[derive(Debug, Clone)]
pub struct RuleExecutionOutcome {
    pub rule_id: String,
    pub state: RuleExecutionState,
    pub message: Option<String>,
    /// Seconds of source data the schedule slipped past, if any.
    pub gap_secs: Option<i64>,
    pub created: usize,
    pub reactivated: usize,
    pub closed: usize,
}

pub struct DetectionEngine {
    store: Arc<dyn DocumentStore>,
    alert_index: String,
    max_signals: usize,
    executors: HashMap<String, Arc<dyn CustomRuleExecutor>>,
    sequence: AtomicU64,
}

impl DetectionEngine {
    pub fn new(store: Arc<dyn DocumentStore>, alert_index: impl Into<String>, max_signals: usize) -> Self {
        // `event.sequence` must keep growing across restarts; seeding from
        // the clock in microseconds keeps it ahead of anything a previous
        // process wrote.
        let sequence_base = Utc::now().timestamp_micros().max(0) as u64;
        Self {
            store,
            alert_index: alert_index.into(),
            max_signals: max_signals.max(1),
            executors: HashMap::new(),
            sequence: AtomicU64::new(sequence_base),
        }
    }

    pub fn register_executor(&mut self, executor: Arc<dyn CustomRuleExecutor>) {
        self.executors.insert(executor.name().to_string(), executor);
    }

    pub fn alert_index(&self) -> &str {
        &self.alert_index
    }

    /// Run one execution of `rule` at `started_at`.
    ///
    /// `last_started` feeds gap detection; a gap is reported as a warning
    /// and the execution continues over its normal window.
    pub async fn execute(
        &self,
        rule: &Rule,
        started_at: DateTime<Utc>,
        last_started: Option<DateTime<Utc>>,
    ) -> RuleExecutionOutcome {
        let mut outcome = Outcome::default();

        let window = match self.execution_window(rule, started_at) {
            Ok(w) => w,
            Err(e) => {
                return self.fail(rule, None, format!("invalid rule schedule: {e}"));
            }
        };
        let gap_secs = self.detect_gap(rule, started_at, last_started, &mut outcome);

        self.preflight_checks(rule, &mut outcome).await;

        let candidates = match self.gather_candidates(rule, window, &mut outcome).await {
            Ok(c) => c,
            Err(e) => {
                return self.fail(rule, gap_secs, format!("candidate search failed: {e}"));
            }
        };

        let (created, reactivated, closed) =
            match self.reconcile(rule, started_at, candidates, &mut outcome).await {
                Ok(counts) => counts,
                Err(e) => {
                    return self.fail(rule, gap_secs, format!("alert reconciliation failed: {e}"));
                }
            };

        let (state, message) = outcome.resolve();
        info!(
            rule_id = %rule.id,
            ?state,
            created,
            reactivated,
            closed,
            "rule execution finished"
        );
        RuleExecutionOutcome {
            rule_id: rule.id.clone(),
            state,
            message,
            gap_secs,
            created,
            reactivated,
            closed,
        }
    }

    fn fail(
        &self,
        rule: &Rule,
        gap_secs: Option<i64>,
        message: String,
    ) -> RuleExecutionOutcome {
        warn!(rule_id = %rule.id, message = %message, "rule execution failed");
        RuleExecutionOutcome {
            rule_id: rule.id.clone(),
            state: RuleExecutionState::Failed,
            message: Some(message),
            gap_secs,
            created: 0,
            reactivated: 0,
            closed: 0,
        }
    }

    fn execution_window(
        &self,
        rule: &Rule,
        started_at: DateTime<Utc>,
    ) -> Result<ExecutionWindow, DetectionError> {
        let span = rule.interval_duration()? + rule.lookback_duration()?;
        Ok(ExecutionWindow {
            from: started_at - span,
            to: started_at,
        })
    }

    /// A gap exists when more time passed since the last start than the
    /// window covers; those events fall outside every execution.
    fn detect_gap(
        &self,
        rule: &Rule,
        started_at: DateTime<Utc>,
        last_started: Option<DateTime<Utc>>,
        outcome: &mut Outcome,
    ) -> Option<i64> {
        let last = last_started?;
        let covered = rule.interval_duration().ok()? + rule.lookback_duration().ok()?;
        let elapsed = started_at.signed_duration_since(last);
        if elapsed <= covered {
            return None;
        }
        let gap = (elapsed - covered).num_seconds();
        outcome.report(
            RuleExecutionState::Warning,
            format!("{gap} seconds of source data were not covered by any execution"),
        );
        Some(gap)
    }

    /// Privilege and mapping checks degrade to warnings; the execution goes
    /// on and surfaces whatever the store lets it read.
    async fn preflight_checks(&self, rule: &Rule, outcome: &mut Outcome) {
        match self.store.has_read_privileges(&rule.indices).await {
            Ok(true) => {}
            Ok(false) => outcome.report(
                RuleExecutionState::Warning,
                format!("missing read privileges on {:?}", rule.indices),
            ),
            Err(e) => outcome.report(
                RuleExecutionState::Warning,
                format!("privilege check failed: {e}"),
            ),
        }
        match self
            .store
            .has_timestamp_field(&rule.indices, &rule.timestamp_field)
            .await
        {
            Ok(true) => {}
            Ok(false) => outcome.report(
                RuleExecutionState::Warning,
                format!("field '{}' is not mapped as a timestamp", rule.timestamp_field),
            ),
            Err(e) => outcome.report(
                RuleExecutionState::Warning,
                format!("timestamp mapping check failed: {e}"),
            ),
        }
    }

    async fn gather_candidates(
        &self,
        rule: &Rule,
        window: ExecutionWindow,
        outcome: &mut Outcome,
    ) -> Result<Vec<CandidateEvent>, DetectionError> {
        let mut candidates = match &rule.rule_type {
            RuleType::Query => self.query_candidates(rule, window, outcome).await?,
            RuleType::Threshold(config) => {
                let response = self.search_window(rule, window).await?;
                evaluate_threshold(
                    config,
                    &rule.id,
                    window.to,
                    response.total.value,
                    &response.hits,
                )
                .into_iter()
                .map(|m| {
                    let mut source = Map::new();
                    source.insert(
                        "threshold_result".to_string(),
                        json!({
                            "field": config.field,
                            "key": m.key,
                            "count": m.count,
                        }),
                    );
                    CandidateEvent {
                        alert_id: m.signal_id,
                        source,
                    }
                })
                .collect()
            }
            RuleType::Custom { executor } => {
                let Some(executor) = self.executors.get(executor) else {
                    return Err(DetectionError::Validation(format!(
                        "no executor registered under '{executor}'"
                    )));
                };
                executor.execute(rule, window, self.store.as_ref()).await?
            }
        };

        if candidates.len() > self.max_signals {
            outcome.report(
                RuleExecutionState::Warning,
                format!(
                    "execution produced {} candidates; keeping the first {}",
                    candidates.len(),
                    self.max_signals
                ),
            );
            candidates.truncate(self.max_signals);
        }
        Ok(candidates)
    }

    async fn query_candidates(
        &self,
        rule: &Rule,
        window: ExecutionWindow,
        outcome: &mut Outcome,
    ) -> Result<Vec<CandidateEvent>, DetectionError> {
        let response = self.search_window(rule, window).await?;
        if response.total.value as usize > self.max_signals {
            outcome.report(
                RuleExecutionState::Warning,
                format!(
                    "{} events matched but only {} alerts are written per execution",
                    response.total.value, self.max_signals
                ),
            );
        }
        Ok(response
            .hits
            .into_iter()
            .map(|hit| {
                let source = match hit.source {
                    Value::Object(map) => map,
                    other => {
                        let mut map = Map::new();
                        map.insert("source".to_string(), other);
                        map
                    }
                };
                CandidateEvent::from_source_event(&rule.id, &hit.id, source)
            })
            .collect())
    }

    async fn search_window(
        &self,
        rule: &Rule,
        window: ExecutionWindow,
    ) -> Result<sentinel_store::SearchResponse, DetectionError> {
        let query = QueryClause::Bool {
            must: vec![
                rule.query.clone(),
                QueryClause::Range {
                    field: rule.timestamp_field.clone(),
                    gte: Some(Value::String(window.from.to_rfc3339())),
                    lte: Some(Value::String(window.to.to_rfc3339())),
                },
            ],
        };
        let mut hits = Vec::new();
        let mut total = sentinel_store::TotalHits {
            value: 0,
            is_lower_bound: false,
        };
        // One page per index; rules rarely span more than a handful.
        for index in &rule.indices {
            let response = self
                .store
                .search(&SearchRequest {
                    index: index.clone(),
                    query: query.clone(),
                    sort: vec![SortClause::new(
                        rule.timestamp_field.clone(),
                        sentinel_core::Direction::Asc,
                    )],
                    size: self.max_signals,
                    from: None,
                    search_after: None,
                    track_total_hits: self.max_signals + 1,
                })
                .await?;
            total.value += response.total.value;
            total.is_lower_bound |= response.total.is_lower_bound;
            hits.extend(response.hits);
        }
        Ok(sentinel_store::SearchResponse { hits, total })
    }

    /// Reconcile candidates against the rule's currently-open alerts.
    async fn reconcile(
        &self,
        rule: &Rule,
        started_at: DateTime<Utc>,
        candidates: Vec<CandidateEvent>,
        outcome: &mut Outcome,
    ) -> Result<(usize, usize, usize), DetectionError> {
        let open = self.open_alerts(rule).await?;
        let candidate_ids: HashSet<&str> =
            candidates.iter().map(|c| c.alert_id.as_str()).collect();

        let rule_meta = RuleMeta {
            id: rule.id.clone(),
            name: rule.name.clone(),
        };

        let mut new_alerts = Vec::new();
        let mut reactivated = 0usize;
        for candidate in &candidates {
            if open.contains_key(candidate.alert_id.as_str()) {
                self.store
                    .update(
                        &self.alert_index,
                        &candidate.alert_id,
                        json!({
                            "@timestamp": started_at.to_rfc3339(),
                            "event": { "action": "active" },
                        }),
                    )
                    .await?;
                reactivated += 1;
            } else {
                let sequence = self.sequence.fetch_add(1, Ordering::Relaxed);
                new_alerts.push((
                    candidate.alert_id.clone(),
                    AlertDocument::open(
                        rule_meta.clone(),
                        sequence,
                        started_at,
                        candidate.source.clone(),
                    ),
                ));
            }
        }

        let result = bulk_create(self.store.as_ref(), &self.alert_index, new_alerts).await?;
        if !result.success {
            let detail = result
                .errors
                .first()
                .map(|e| e.message.clone())
                .unwrap_or_else(|| "unknown bulk failure".to_string());
            outcome.report(
                RuleExecutionState::Failed,
                format!("failed to write alerts: {detail}"),
            );
        }

        let mut closed = 0usize;
        for (id, doc) in &open {
            if candidate_ids.contains(id.as_str()) {
                continue;
            }
            match serde_json::from_value::<AlertDocument>(doc.clone()) {
                Ok(alert) => {
                    let patch = serde_json::to_value(alert.closed(started_at))?;
                    self.store.update(&self.alert_index, id, patch).await?;
                    closed += 1;
                }
                Err(e) => {
                    debug!(alert_id = %id, error = %e, "skipping malformed open alert");
                }
            }
        }

        Ok((result.created_count(), reactivated, closed))
    }

    async fn open_alerts(&self, rule: &Rule) -> Result<HashMap<String, Value>, DetectionError> {
        let response = self
            .store
            .search(&SearchRequest {
                index: self.alert_index.clone(),
                query: QueryClause::Bool {
                    must: vec![
                        QueryClause::term("rule.id", rule.id.clone()),
                        QueryClause::term("alert.status", "open"),
                    ],
                },
                sort: vec![SortClause::new(
                    "event.sequence",
                    sentinel_core::Direction::Asc,
                )],
                size: OPEN_ALERTS_PAGE,
                from: None,
                search_after: None,
                track_total_hits: OPEN_ALERTS_PAGE,
            })
            .await?;
        Ok(response
            .hits
            .into_iter()
            .map(|hit| (hit.id, hit.source))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    use sentinel_store::{BulkOperation, MemoryStore};

    use crate::rule::ThresholdConfig;

    fn query_rule(id: &str) -> Rule {
        Rule {
            id: id.into(),
            name: "netcat spawned".into(),
            enabled: true,
            indices: vec!["events".into()],
            interval: "5m".into(),
            lookback: "1m".into(),
            query: QueryClause::term("process.name", "nc"),
            rule_type: RuleType::Query,
            timestamp_field: "@timestamp".into(),
        }
    }

    async fn seed_event(store: &MemoryStore, id: &str, ts: &str, process: &str) {
        store
            .bulk_index(vec![BulkOperation {
                index: "events".to_string(),
                id: Some(id.to_string()),
                document: json!({
                    "@timestamp": ts,
                    "process": { "name": process },
                }),
            }])
            .await
            .unwrap();
    }

    fn t(s: &str) -> DateTime<Utc> {
        s.parse().unwrap()
    }

    #[tokio::test]
    async fn new_match_opens_an_alert() {
        let store = Arc::new(MemoryStore::new());
        seed_event(&store, "ev-1", "2024-03-01T00:04:00Z", "nc").await;
        seed_event(&store, "ev-2", "2024-03-01T00:04:00Z", "bash").await;

        let engine = DetectionEngine::new(store.clone(), "alerts", 100);
        let outcome = engine
            .execute(&query_rule("r-1"), t("2024-03-01T00:05:00Z"), None)
            .await;

        assert_eq!(outcome.state, RuleExecutionState::Succeeded);
        assert_eq!(outcome.created, 1);
        assert_eq!(outcome.reactivated, 0);
        assert_eq!(outcome.closed, 0);
        assert_eq!(store.count("alerts"), 1);
    }

    #[tokio::test]
    async fn lifecycle_open_active_closed() {
        let store = Arc::new(MemoryStore::new());
        let engine = DetectionEngine::new(store.clone(), "alerts", 100);
        let rule = query_rule("r-1");

        // T0: event matches, alert opens.
        seed_event(&store, "ev-1", "2024-03-01T00:04:00Z", "nc").await;
        let t0 = engine.execute(&rule, t("2024-03-01T00:05:00Z"), None).await;
        assert_eq!((t0.created, t0.reactivated, t0.closed), (1, 0, 0));

        // T1: still in window, alert refreshes to active.
        let t1 = engine
            .execute(&rule, t("2024-03-01T00:08:00Z"), Some(t("2024-03-01T00:05:00Z")))
            .await;
        assert_eq!((t1.created, t1.reactivated, t1.closed), (0, 1, 0));

        // T2: event aged out of the window, alert closes.
        let t2 = engine
            .execute(&rule, t("2024-03-01T00:15:00Z"), Some(t("2024-03-01T00:08:00Z")))
            .await;
        assert_eq!((t2.created, t2.reactivated, t2.closed), (0, 0, 1));

        let alert_id = CandidateEvent::from_source_event("r-1", "ev-1", Map::new()).alert_id;
        let doc = store.get("alerts", &alert_id).await.unwrap();
        assert_eq!(doc.source["alert"]["status"], json!("closed"));
        assert_eq!(doc.source["event"]["action"], json!("close"));
        assert!(doc.source["alert"]["duration_us"].as_i64().unwrap() > 0);
    }

    #[tokio::test]
    async fn sequence_keeps_growing_across_engine_restarts() {
        let store = Arc::new(MemoryStore::new());
        let before = Utc::now().timestamp_micros() as u64;
        seed_event(&store, "ev-1", "2024-03-01T00:04:00Z", "nc").await;

        let first = DetectionEngine::new(store.clone(), "alerts", 100);
        first
            .execute(&query_rule("r-1"), t("2024-03-01T00:05:00Z"), None)
            .await;
        let id1 = CandidateEvent::from_source_event("r-1", "ev-1", Map::new()).alert_id;
        let seq1 = store.get("alerts", &id1).await.unwrap().source["event"]["sequence"]
            .as_u64()
            .unwrap();
        assert!(seq1 >= before);

        // A fresh engine over the same store must not restart from zero.
        seed_event(&store, "ev-2", "2024-03-01T00:04:30Z", "nc").await;
        let second = DetectionEngine::new(store.clone(), "alerts", 100);
        second
            .execute(&query_rule("r-1"), t("2024-03-01T00:05:00Z"), None)
            .await;
        let id2 = CandidateEvent::from_source_event("r-1", "ev-2", Map::new()).alert_id;
        let seq2 = store.get("alerts", &id2).await.unwrap().source["event"]["sequence"]
            .as_u64()
            .unwrap();
        assert!(seq2 >= seq1);
    }

    #[tokio::test]
    async fn schedule_gap_is_a_warning_not_a_failure() {
        let store = Arc::new(MemoryStore::new());
        let engine = DetectionEngine::new(store, "alerts", 100);
        let outcome = engine
            .execute(
                &query_rule("r-1"),
                t("2024-03-01T01:00:00Z"),
                Some(t("2024-03-01T00:00:00Z")),
            )
            .await;
        assert_eq!(outcome.state, RuleExecutionState::Warning);
        // One hour elapsed, six minutes covered.
        assert_eq!(outcome.gap_secs, Some(3240));
    }

    #[tokio::test]
    async fn missing_privileges_degrade_to_warning() {
        let store = Arc::new(MemoryStore::new());
        store.deny_read("events");
        seed_event(&store, "ev-1", "2024-03-01T00:04:00Z", "nc").await;

        let engine = DetectionEngine::new(store, "alerts", 100);
        let outcome = engine
            .execute(&query_rule("r-1"), t("2024-03-01T00:05:00Z"), None)
            .await;
        assert_eq!(outcome.state, RuleExecutionState::Warning);
        assert!(outcome.message.unwrap().contains("privileges"));
        assert_eq!(outcome.created, 1);
    }

    #[tokio::test]
    async fn threshold_rule_writes_one_alert_per_bucket() {
        let store = Arc::new(MemoryStore::new());
        for (i, host) in ["a", "a", "a", "b"].iter().enumerate() {
            store
                .bulk_index(vec![BulkOperation {
                    index: "events".to_string(),
                    id: Some(format!("ev-{i}")),
                    document: json!({
                        "@timestamp": "2024-03-01T00:04:00Z",
                        "process": { "name": "nc" },
                        "host": { "name": host },
                    }),
                }])
                .await
                .unwrap();
        }

        let mut rule = query_rule("r-t");
        rule.rule_type = RuleType::Threshold(ThresholdConfig {
            field: Some("host.name".to_string()),
            value: 3,
        });

        let engine = DetectionEngine::new(store.clone(), "alerts", 100);
        let outcome = engine.execute(&rule, t("2024-03-01T00:05:00Z"), None).await;
        assert_eq!(outcome.created, 1);

        // Re-running the same window is idempotent via deterministic ids.
        let again = engine.execute(&rule, t("2024-03-01T00:05:00Z"), None).await;
        assert_eq!(again.created, 0);
        assert_eq!(again.reactivated, 1);
        assert_eq!(store.count("alerts"), 1);
    }

    #[tokio::test]
    async fn unknown_custom_executor_fails_the_execution() {
        let store = Arc::new(MemoryStore::new());
        let engine = DetectionEngine::new(store, "alerts", 100);
        let mut rule = query_rule("r-c");
        rule.rule_type = RuleType::Custom {
            executor: "nonexistent".to_string(),
        };
        let outcome = engine.execute(&rule, t("2024-03-01T00:05:00Z"), None).await;
        assert_eq!(outcome.state, RuleExecutionState::Failed);
    }

    #[tokio::test]
    async fn custom_executor_candidates_flow_through_lifecycle() {
        struct Fixed;
        #[async_trait]
        impl CustomRuleExecutor for Fixed {
            fn name(&self) -> &str {
                "fixed"
            }
            async fn execute(
                &self,
                rule: &Rule,
                _window: ExecutionWindow,
                _store: &dyn DocumentStore,
            ) -> Result<Vec<CandidateEvent>, DetectionError> {
                Ok(vec![CandidateEvent::from_source_event(
                    &rule.id,
                    "synthetic-1",
                    Map::new(),
                )])
            }
        }

        let store = Arc::new(MemoryStore::new());
        let mut engine = DetectionEngine::new(store.clone(), "alerts", 100);
        engine.register_executor(Arc::new(Fixed));

        let mut rule = query_rule("r-c");
        rule.rule_type = RuleType::Custom {
            executor: "fixed".to_string(),
        };
        let outcome = engine.execute(&rule, t("2024-03-01T00:05:00Z"), None).await;
        assert_eq!(outcome.created, 1);
        assert_eq!(store.count("alerts"), 1);
    }

    #[tokio::test]
    async fn max_signals_truncates_with_warning() {
        let store = Arc::new(MemoryStore::new());
        for i in 0..5 {
            seed_event(&store, &format!("ev-{i}"), "2024-03-01T00:04:00Z", "nc").await;
        }
        let engine = DetectionEngine::new(store.clone(), "alerts", 2);
        let outcome = engine
            .execute(&query_rule("r-1"), t("2024-03-01T00:05:00Z"), None)
            .await;
        assert_eq!(outcome.state, RuleExecutionState::Warning);
        assert_eq!(outcome.created, 2);
        assert_eq!(store.count("alerts"), 2);
    }
}
