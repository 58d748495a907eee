//! Per-rule execution status.
//!
//! Every execution moves its rule through `going to run` and then lands on
//! exactly one terminal state. Failure outranks warning outranks success, so
//! an execution that both warned and failed is recorded as failed with the
//! failure message.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleExecutionState {
    GoingToRun,
    Succeeded,
    Warning,
    Failed,
}

impl RuleExecutionState {
    fn rank(self) -> u8 {
        match self {
            RuleExecutionState::GoingToRun => 0,
            RuleExecutionState::Succeeded => 1,
            RuleExecutionState::Warning => 2,
            RuleExecutionState::Failed => 3,
        }
    }
}

/// The current status record for one rule.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuleStatus {
    pub rule_id: String,
    pub state: RuleExecutionState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// How far behind schedule the execution started, in seconds.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gap_secs: Option<i64>,
    pub status_date: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_success_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_failure_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_success_message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_failure_message: Option<String>,
}

impl RuleStatus {
    fn new(rule_id: &str, now: DateTime<Utc>) -> Self {
        Self {
            rule_id: rule_id.to_string(),
            state: RuleExecutionState::GoingToRun,
            message: None,
            gap_secs: None,
            status_date: now,
            last_success_at: None,
            last_failure_at: None,
            last_success_message: None,
            last_failure_message: None,
        }
    }
}

/// Accumulates the terminal state of a single execution.
///
/// Callers report warnings and failures as they happen; [`Outcome::resolve`]
/// applies the precedence and yields the state plus message to record.
#[derive(Debug, Default)]
pub struct Outcome {
    state: Option<RuleExecutionState>,
    message: Option<String>,
}

impl Outcome {
    pub fn report(&mut self, state: RuleExecutionState, message: impl Into<String>) {
        let rank = self.state.map(RuleExecutionState::rank).unwrap_or(0);
        if state.rank() >= rank {
            self.state = Some(state);
            self.message = Some(message.into());
        }
    }

    pub fn resolve(self) -> (RuleExecutionState, Option<String>) {
        match self.state {
            Some(state) => (state, self.message),
            None => (RuleExecutionState::Succeeded, None),
        }
    }
}

/// In-memory registry of per-rule statuses, read by the HTTP layer.
#[derive(Debug, Default)]
pub struct RuleStatusTracker {
    statuses: HashMap<String, RuleStatus>,
}

impl RuleStatusTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark an execution as starting, recording schedule gap when present.
    pub fn going_to_run(&mut self, rule_id: &str, now: DateTime<Utc>, gap_secs: Option<i64>) {
        let status = self
            .statuses
            .entry(rule_id.to_string())
            .or_insert_with(|| RuleStatus::new(rule_id, now));
        status.state = RuleExecutionState::GoingToRun;
        status.message = None;
        status.gap_secs = gap_secs;
        status.status_date = now;
        if let Some(gap) = gap_secs {
            debug!(rule_id, gap_secs = gap, "rule execution starting behind schedule");
        }
    }

    /// Attach gap metadata discovered during the execution itself.
    pub fn record_gap(&mut self, rule_id: &str, gap_secs: i64) {
        if let Some(status) = self.statuses.get_mut(rule_id) {
            status.gap_secs = Some(gap_secs);
        }
    }

    /// Record the terminal state of an execution.
    pub fn finish(
        &mut self,
        rule_id: &str,
        state: RuleExecutionState,
        message: Option<String>,
        now: DateTime<Utc>,
    ) {
        let status = self
            .statuses
            .entry(rule_id.to_string())
            .or_insert_with(|| RuleStatus::new(rule_id, now));
        status.state = state;
        status.message = message.clone();
        status.status_date = now;
        match state {
            RuleExecutionState::Failed => {
                status.last_failure_at = Some(now);
                status.last_failure_message = message;
            }
            RuleExecutionState::Succeeded | RuleExecutionState::Warning => {
                status.last_success_at = Some(now);
                status.last_success_message = message;
            }
            RuleExecutionState::GoingToRun => {}
        }
    }

    pub fn get(&self, rule_id: &str) -> Option<&RuleStatus> {
        self.statuses.get(rule_id)
    }

    pub fn all(&self) -> impl Iterator<Item = &RuleStatus> {
        self.statuses.values()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failure_outranks_warning_outranks_success() {
        let mut outcome = Outcome::default();
        outcome.report(RuleExecutionState::Warning, "missing privileges");
        outcome.report(RuleExecutionState::Failed, "search timed out");
        outcome.report(RuleExecutionState::Warning, "late warning");
        let (state, message) = outcome.resolve();
        assert_eq!(state, RuleExecutionState::Failed);
        assert_eq!(message.as_deref(), Some("search timed out"));
    }

    #[test]
    fn clean_execution_resolves_to_success() {
        let (state, message) = Outcome::default().resolve();
        assert_eq!(state, RuleExecutionState::Succeeded);
        assert!(message.is_none());
    }

    #[test]
    fn tracker_keeps_last_success_across_a_failure() {
        let mut tracker = RuleStatusTracker::new();
        let t0 = Utc::now();
        tracker.going_to_run("rule-1", t0, None);
        tracker.finish("rule-1", RuleExecutionState::Succeeded, None, t0);
        tracker.finish(
            "rule-1",
            RuleExecutionState::Failed,
            Some("boom".to_string()),
            t0,
        );

        let status = tracker.get("rule-1").unwrap();
        assert_eq!(status.state, RuleExecutionState::Failed);
        assert_eq!(status.last_success_at, Some(t0));
        assert_eq!(status.last_failure_message.as_deref(), Some("boom"));
    }

    #[test]
    fn gap_is_recorded_on_start() {
        let mut tracker = RuleStatusTracker::new();
        let now = Utc::now();
        tracker.going_to_run("rule-1", now, Some(42));
        assert_eq!(tracker.get("rule-1").unwrap().gap_secs, Some(42));
    }
}
