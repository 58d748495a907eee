//! Per-rule interval scheduling.
//!
//! Tracks when each rule last started and decides which rules are due on a
//! scheduler tick. Rules run as independent tasks; this bookkeeping is the
//! only shared scheduling state and is owned by the tick loop.

use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use tracing::warn;

use crate::rule::Rule;

/// Scheduling state for a single rule.
#[derive(Debug, Clone)]
pub struct RuleScheduleEntry {
    pub rule_id: String,
    pub interval: Duration,
    /// When the rule last started executing.
    pub last_started: Option<DateTime<Utc>>,
    pub enabled: bool,
}

/// Manages scheduling state for all loaded rules.
///
/// Call [`sync_rules`](RuleScheduler::sync_rules) whenever the rule set
/// changes; use [`due_rules`](RuleScheduler::due_rules) from the tick loop.
pub struct RuleScheduler {
    entries: HashMap<String, RuleScheduleEntry>,
}

impl RuleScheduler {
    pub fn new() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }

    /// Synchronize entries with the current rule set: adds new, updates
    /// changed (preserving `last_started`), removes deleted.
    pub fn sync_rules(&mut self, rules: &[Rule]) {
        let current_ids: std::collections::HashSet<&str> =
            rules.iter().map(|r| r.id.as_str()).collect();
        self.entries.retain(|id, _| current_ids.contains(id.as_str()));

        for rule in rules {
            let interval = match rule.interval_duration() {
                Ok(d) => d,
                Err(e) => {
                    warn!(rule_id = %rule.id, error = %e, "invalid rule interval");
                    continue;
                }
            };
            match self.entries.get_mut(&rule.id) {
                Some(entry) => {
                    entry.interval = interval;
                    entry.enabled = rule.enabled;
                }
                None => {
                    self.entries.insert(
                        rule.id.clone(),
                        RuleScheduleEntry {
                            rule_id: rule.id.clone(),
                            interval,
                            last_started: None,
                            enabled: rule.enabled,
                        },
                    );
                }
            }
        }
    }

    /// Whether a rule should run at `now`: enabled, and either never run or
    /// past its interval since the last start.
    pub fn should_run(&self, rule_id: &str, now: DateTime<Utc>) -> bool {
        let Some(entry) = self.entries.get(rule_id) else {
            return false;
        };
        if !entry.enabled {
            return false;
        }
        match entry.last_started {
            None => true,
            Some(last) => now.signed_duration_since(last) >= entry.interval,
        }
    }

    /// Ids of all rules due at `now`.
    pub fn due_rules(&self, now: DateTime<Utc>) -> Vec<&str> {
        self.entries
            .values()
            .filter(|e| self.should_run(&e.rule_id, now))
            .map(|e| e.rule_id.as_str())
            .collect()
    }

    /// When the rule last started, for gap computation.
    pub fn last_started(&self, rule_id: &str) -> Option<DateTime<Utc>> {
        self.entries.get(rule_id).and_then(|e| e.last_started)
    }

    /// Record that a rule started executing at `now`.
    pub fn record_start(&mut self, rule_id: &str, now: DateTime<Utc>) {
        if let Some(entry) = self.entries.get_mut(rule_id) {
            entry.last_started = Some(now);
        }
    }
}

impl Default for RuleScheduler {
    fn default() -> Self {
        Self::new()
    }
}
