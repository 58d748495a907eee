//! Detection rule definitions.

use chrono::Duration;
use serde::{Deserialize, Serialize};

use sentinel_store::QueryClause;

use crate::error::DetectionError;

/// Threshold configuration: alert when a count crosses `value`, optionally
/// bucketed by `field`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThresholdConfig {
    /// Aggregation field; `None` means a single count over all matches.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
    pub value: u64,
}

/// Type-specific execution logic for a rule.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RuleType {
    /// Every matching source event becomes a candidate alert.
    Query,
    /// Aggregate counting with per-bucket thresholds.
    Threshold(ThresholdConfig),
    /// Delegates to a registered custom executor.
    Custom { executor: String },
}

/// A scheduled detection rule.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Rule {
    pub id: String,
    pub name: String,
    pub enabled: bool,
    /// Source indices the rule queries.
    pub indices: Vec<String>,
    /// Execution interval, e.g. `"5m"`.
    pub interval: String,
    /// Additional look-behind beyond the interval, e.g. `"1m"`.
    #[serde(default = "default_lookback")]
    pub lookback: String,
    /// Match clause applied to the source indices.
    pub query: QueryClause,
    #[serde(flatten)]
    pub rule_type: RuleType,
    /// Timestamp field for range restriction (default `@timestamp`).
    #[serde(default = "default_timestamp_field")]
    pub timestamp_field: String,
}

fn default_lookback() -> String {
    "1m".to_string()
}

fn default_timestamp_field() -> String {
    "@timestamp".to_string()
}

impl Rule {
    pub fn interval_duration(&self) -> Result<Duration, DetectionError> {
        parse_interval(&self.interval)
    }

    pub fn lookback_duration(&self) -> Result<Duration, DetectionError> {
        parse_interval(&self.lookback)
    }
}

/// Parse an interval string of the form `"30s"`, `"5m"`, or `"1h"`.
pub fn parse_interval(input: &str) -> Result<Duration, DetectionError> {
    let input = input.trim();
    if input.len() < 2 {
        return Err(DetectionError::Validation(format!(
            "invalid interval: '{input}'"
        )));
    }
    let (value, unit) = input.split_at(input.len() - 1);
    let value: i64 = value
        .parse()
        .map_err(|_| DetectionError::Validation(format!("invalid interval: '{input}'")))?;
    if value <= 0 {
        return Err(DetectionError::Validation(format!(
            "interval must be positive: '{input}'"
        )));
    }
    match unit {
        "s" => Ok(Duration::seconds(value)),
        "m" => Ok(Duration::minutes(value)),
        "h" => Ok(Duration::hours(value)),
        _ => Err(DetectionError::Validation(format!(
            "unknown interval unit: '{input}'"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_interval_units() {
        assert_eq!(parse_interval("30s").unwrap(), Duration::seconds(30));
        assert_eq!(parse_interval("5m").unwrap(), Duration::minutes(5));
        assert_eq!(parse_interval("2h").unwrap(), Duration::hours(2));
    }

    #[test]
    fn parse_interval_rejects_garbage() {
        assert!(parse_interval("").is_err());
        assert!(parse_interval("5x").is_err());
        assert!(parse_interval("-5m").is_err());
        assert!(parse_interval("m").is_err());
    }

    #[test]
    fn rule_deserializes_with_defaults() {
        let rule: Rule = serde_json::from_value(serde_json::json!({
            "id": "r-1",
            "name": "suspicious process",
            "enabled": true,
            "indices": ["events"],
            "interval": "5m",
            "query": { "term": { "field": "process.name", "value": "nc" } },
            "type": "query",
        }))
        .unwrap();
        assert_eq!(rule.lookback, "1m");
        assert_eq!(rule.timestamp_field, "@timestamp");
        assert!(matches!(rule.rule_type, RuleType::Query));
    }

    #[test]
    fn threshold_rule_round_trips() {
        let rule = Rule {
            id: "r-2".into(),
            name: "too many failures".into(),
            enabled: true,
            indices: vec!["events".into()],
            interval: "1m".into(),
            lookback: "1m".into(),
            query: QueryClause::MatchAll,
            rule_type: RuleType::Threshold(ThresholdConfig {
                field: Some("host.name".into()),
                value: 10,
            }),
            timestamp_field: "@timestamp".into(),
        };
        let json = serde_json::to_value(&rule).unwrap();
        assert_eq!(json["type"], "threshold");
        let back: Rule = serde_json::from_value(json).unwrap();
        assert!(matches!(back.rule_type, RuleType::Threshold(_)));
    }
}
