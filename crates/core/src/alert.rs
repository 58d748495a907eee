//! Alert/signal document model.
//!
//! An alert is a derived document created when a rule execution matches a
//! source event. It carries its own lifecycle (open → active → closed)
//! independent of the source event, plus enough of the source fields to be
//! searchable on its own.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

/// Sort direction for alert list queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Asc,
    Desc,
}

impl Direction {
    pub fn reversed(self) -> Self {
        match self {
            Direction::Asc => Direction::Desc,
            Direction::Desc => Direction::Asc,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Direction::Asc => "asc",
            Direction::Desc => "desc",
        }
    }
}

/// Lifecycle status stored on the alert itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertStatus {
    Open,
    Closed,
}

/// What the most recent rule execution did to this alert.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventAction {
    /// First time this alert was observed.
    Open,
    /// Still matching on a subsequent execution.
    Active,
    /// No longer matching; the alert recovered.
    Close,
}

/// `event.*` metadata on an alert document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventMeta {
    /// Always `"alert"` for documents written by the detection engine.
    pub kind: String,
    pub action: EventAction,
    /// Monotonic sequence id used as the pagination tie-breaker.
    pub sequence: u64,
}

/// `alert.*` metadata with the lifecycle state machine fields.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertMeta {
    /// Stable across the alert's lifetime once assigned.
    pub uuid: Uuid,
    /// Fixed at creation time.
    pub start: DateTime<Utc>,
    /// Stamped when the alert closes.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end: Option<DateTime<Utc>>,
    pub status: AlertStatus,
    /// (end − start) in microseconds, present once closed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_us: Option<i64>,
    /// Operator-toggled flag (PATCH /alerts/{id}).
    pub active: bool,
}

/// `rule.*` provenance on an alert document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuleMeta {
    pub id: String,
    pub name: String,
}

/// A full alert document as persisted in the alert index.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertDocument {
    #[serde(rename = "@timestamp")]
    pub timestamp: DateTime<Utc>,
    pub event: EventMeta,
    pub alert: AlertMeta,
    pub rule: RuleMeta,
    /// Fields copied from the matched source event.
    #[serde(flatten)]
    pub source: Map<String, Value>,
}

impl AlertDocument {
    /// Construct a brand-new open alert at `now` for a matched source event.
    pub fn open(
        rule: RuleMeta,
        sequence: u64,
        now: DateTime<Utc>,
        source: Map<String, Value>,
    ) -> Self {
        Self {
            timestamp: now,
            event: EventMeta {
                kind: "alert".to_string(),
                action: EventAction::Open,
                sequence,
            },
            alert: AlertMeta {
                uuid: Uuid::new_v4(),
                start: now,
                end: None,
                status: AlertStatus::Open,
                duration_us: None,
                active: true,
            },
            rule,
            source,
        }
    }

    /// Transition to `active`: still matching on a later execution.
    /// The uuid and start time are preserved.
    pub fn reactivated(mut self, now: DateTime<Utc>) -> Self {
        self.timestamp = now;
        self.event.action = EventAction::Active;
        self.alert.status = AlertStatus::Open;
        self
    }

    /// Transition to `closed`: no longer matching at `now`.
    pub fn closed(mut self, now: DateTime<Utc>) -> Self {
        self.timestamp = now;
        self.event.action = EventAction::Close;
        self.alert.status = AlertStatus::Closed;
        self.alert.end = Some(now);
        self.alert.duration_us = Some(
            now.signed_duration_since(self.alert.start)
                .num_microseconds()
                .unwrap_or(i64::MAX),
        );
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn rule_meta() -> RuleMeta {
        RuleMeta {
            id: "rule-1".into(),
            name: "test rule".into(),
        }
    }

    #[test]
    fn open_alert_starts_open_and_active() {
        let now = Utc::now();
        let a = AlertDocument::open(rule_meta(), 7, now, Map::new());
        assert_eq!(a.alert.status, AlertStatus::Open);
        assert_eq!(a.event.action, EventAction::Open);
        assert_eq!(a.alert.start, now);
        assert!(a.alert.end.is_none());
        assert!(a.alert.active);
    }

    #[test]
    fn reactivate_preserves_uuid_and_start() {
        let t0 = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let t1 = Utc.with_ymd_and_hms(2024, 1, 1, 0, 5, 0).unwrap();
        let a = AlertDocument::open(rule_meta(), 1, t0, Map::new());
        let uuid = a.alert.uuid;
        let b = a.reactivated(t1);
        assert_eq!(b.alert.uuid, uuid);
        assert_eq!(b.alert.start, t0);
        assert_eq!(b.event.action, EventAction::Active);
        assert_eq!(b.alert.status, AlertStatus::Open);
    }

    #[test]
    fn close_stamps_end_and_duration() {
        let t0 = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let t2 = Utc.with_ymd_and_hms(2024, 1, 1, 0, 10, 0).unwrap();
        let a = AlertDocument::open(rule_meta(), 1, t0, Map::new());
        let c = a.closed(t2);
        assert_eq!(c.alert.status, AlertStatus::Closed);
        assert_eq!(c.event.action, EventAction::Close);
        assert_eq!(c.alert.end, Some(t2));
        assert_eq!(c.alert.duration_us, Some(600 * 1_000_000));
    }

    #[test]
    fn timestamp_field_serializes_as_ecs_name() {
        let a = AlertDocument::open(rule_meta(), 1, Utc::now(), Map::new());
        let v = serde_json::to_value(&a).unwrap();
        assert!(v.get("@timestamp").is_some());
        assert_eq!(v["event"]["kind"], "alert");
    }
}
