//! Background loops: the rule runner tick loop and the singleton manifest
//! packaging task.
//!
//! Both loops run for the life of the process and never return errors to the
//! caller; failures land in rule status records or the log and the next tick
//! retries from scratch.

use std::path::Path;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tokio::time::{interval, Duration};
use tracing::{debug, info, warn};

use sentinel_artifacts::{ArtifactError, ArtifactSource, InternalArtifact, ManifestDispatcher, ManifestSpec};
use sentinel_detection::Rule;

use crate::state::{AppState, SharedRules};

/// Identifier under which the rule set is distributed to agents.
pub const RULES_ARTIFACT_IDENTIFIER: &str = "sentinel-rules-v1";

/// Builds the artifact set from the currently-installed rules: one artifact
/// whose decoded body is the enabled rules as canonical JSON. Byte-stable
/// for an unchanged rule set, so repeated packaging produces no diff.
pub struct RuleSetSource {
    rules: SharedRules,
}

impl RuleSetSource {
    pub fn new(rules: SharedRules) -> Self {
        Self { rules }
    }
}

#[async_trait]
impl ArtifactSource for RuleSetSource {
    async fn build_artifacts(&self) -> Result<Vec<InternalArtifact>, ArtifactError> {
        let mut enabled: Vec<Rule> = self
            .rules
            .read()
            .expect("rules lock poisoned")
            .iter()
            .filter(|r| r.enabled)
            .cloned()
            .collect();
        enabled.sort_by(|a, b| a.id.cmp(&b.id));

        let body = serde_json::to_vec(&enabled)
            .map_err(|e| ArtifactError::Serialize(e.to_string()))?;
        Ok(vec![InternalArtifact::from_decoded(
            RULES_ARTIFACT_IDENTIFIER,
            body,
        )])
    }
}

/// Dispatcher that records committed manifest versions in the log. Stands in
/// for a real push channel; agents pull via the download endpoint either way.
pub struct LogDispatcher;

#[async_trait]
impl ManifestDispatcher for LogDispatcher {
    fn name(&self) -> &str {
        "log"
    }

    async fn dispatch(&self, spec: &ManifestSpec) -> Result<(), ArtifactError> {
        info!(
            version = %spec.manifest_version,
            artifacts = spec.artifacts.len(),
            "manifest available to agents"
        );
        Ok(())
    }
}

/// Load the rule set from a JSON file.
pub fn load_rules(path: &Path) -> anyhow::Result<Vec<Rule>> {
    let raw = std::fs::read(path)?;
    let rules: Vec<Rule> = serde_json::from_slice(&raw)?;
    Ok(rules)
}

/// Execute every due rule once and record the outcomes.
pub async fn run_due_rules(state: &AppState) {
    let now = Utc::now();

    let due: Vec<(Rule, Option<chrono::DateTime<Utc>>)> = {
        let rules = state.rules.read().expect("rules lock poisoned");
        let mut scheduler = state.scheduler.lock().expect("scheduler lock poisoned");
        let mut due = Vec::new();
        for r in rules.iter() {
            if scheduler.should_run(&r.id, now) {
                let last = scheduler.last_started(&r.id);
                scheduler.record_start(&r.id, now);
                due.push((r.clone(), last));
            }
        }
        due
    };

    for (rule, last_started) in due {
        {
            let mut statuses = state.statuses.write().expect("statuses lock poisoned");
            statuses.going_to_run(&rule.id, now, None);
        }

        let outcome = state.engine.execute(&rule, now, last_started).await;

        let mut statuses = state.statuses.write().expect("statuses lock poisoned");
        if let Some(gap) = outcome.gap_secs {
            statuses.record_gap(&rule.id, gap);
        }
        statuses.finish(&rule.id, outcome.state, outcome.message, Utc::now());
    }
}

/// Rule runner tick loop.
pub async fn run_rule_loop(state: Arc<AppState>) {
    let mut ticker = interval(Duration::from_secs(state.config.detection.tick_interval_secs));
    info!(
        tick_secs = state.config.detection.tick_interval_secs,
        "rule runner started"
    );
    loop {
        ticker.tick().await;
        run_due_rules(&state).await;
    }
}

/// One packaging run under a claimed generation. A run that sees a newer
/// generation live stands down without touching the store.
pub async fn package_once(
    state: &AppState,
    generation: u64,
    initialize: bool,
) -> Result<Option<String>, ArtifactError> {
    if state.packaging_generation.load(Ordering::SeqCst) != generation {
        info!(generation, "packaging run superseded by a newer one");
        return Ok(None);
    }
    state.manifest_manager.package(initialize).await
}

/// Manifest packaging tick loop.
pub async fn run_packaging_loop(state: Arc<AppState>) {
    let mut ticker = interval(Duration::from_secs(
        state.config.artifacts.packaging_interval_secs,
    ));
    info!(
        tick_secs = state.config.artifacts.packaging_interval_secs,
        "manifest packaging task started"
    );
    let mut initialize = true;
    loop {
        ticker.tick().await;
        let generation = state.packaging_generation.fetch_add(1, Ordering::SeqCst) + 1;
        match package_once(&state, generation, initialize).await {
            Ok(Some(version)) => info!(%version, "manifest committed"),
            Ok(None) => debug!("manifest unchanged"),
            Err(e) => warn!(error = %e, "manifest packaging failed; will retry next tick"),
        }
        initialize = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::RwLock;

    use serde_json::json;

    use sentinel_core::Config;
    use sentinel_detection::{RuleExecutionState, RuleType};
    use sentinel_store::{BulkOperation, DocumentStore, MemoryStore, QueryClause};

    fn test_config() -> Config {
        // from_env falls back to defaults when the variables are unset
        Config::from_env()
    }

    fn rule(id: &str) -> Rule {
        Rule {
            id: id.into(),
            name: id.into(),
            enabled: true,
            indices: vec!["events".into()],
            interval: "5m".into(),
            lookback: "1m".into(),
            query: QueryClause::term("process.name", "nc"),
            rule_type: RuleType::Query,
            timestamp_field: "@timestamp".into(),
        }
    }

    #[tokio::test]
    async fn rule_set_source_is_byte_stable() {
        let rules: SharedRules = Arc::new(RwLock::new(vec![rule("b"), rule("a")]));
        let source = RuleSetSource::new(rules.clone());
        let first = source.build_artifacts().await.unwrap();
        let second = source.build_artifacts().await.unwrap();
        assert_eq!(first[0].decoded_sha256, second[0].decoded_sha256);
        assert_eq!(first[0].identifier, RULES_ARTIFACT_IDENTIFIER);
    }

    #[tokio::test]
    async fn disabled_rules_are_excluded_from_the_artifact() {
        let mut disabled = rule("a");
        disabled.enabled = false;
        let all: SharedRules = Arc::new(RwLock::new(vec![rule("b"), disabled]));
        let only_enabled: SharedRules = Arc::new(RwLock::new(vec![rule("b")]));
        let a = RuleSetSource::new(all).build_artifacts().await.unwrap();
        let b = RuleSetSource::new(only_enabled)
            .build_artifacts()
            .await
            .unwrap();
        assert_eq!(a[0].decoded_sha256, b[0].decoded_sha256);
    }

    #[tokio::test]
    async fn due_rules_run_and_record_status() {
        let store = Arc::new(MemoryStore::new());
        store
            .bulk_index(vec![BulkOperation {
                index: "events".to_string(),
                id: Some("ev-1".to_string()),
                document: json!({
                    "@timestamp": chrono::Utc::now().to_rfc3339(),
                    "process": { "name": "nc" },
                }),
            }])
            .await
            .unwrap();

        let state = AppState::new(test_config(), store.clone(), vec![Arc::new(LogDispatcher)]);
        state.install_rules(vec![rule("r-1")]);

        run_due_rules(&state).await;

        let statuses = state.statuses.read().unwrap();
        let status = statuses.get("r-1").unwrap();
        assert_eq!(status.state, RuleExecutionState::Succeeded);
        assert_eq!(store.count(&state.config.alerts.index), 1);

        // Within the interval the rule is not due again.
        drop(statuses);
        run_due_rules(&state).await;
        assert_eq!(store.count(&state.config.alerts.index), 1);
    }

    #[tokio::test]
    async fn packaging_commits_and_stale_generation_stands_down() {
        let store = Arc::new(MemoryStore::new());
        let state = AppState::new(test_config(), store.clone(), vec![Arc::new(LogDispatcher)]);
        state.install_rules(vec![rule("r-1")]);

        let generation = state.packaging_generation.fetch_add(1, Ordering::SeqCst) + 1;
        let version = package_once(&state, generation, true).await.unwrap();
        assert_eq!(version.as_deref(), Some("1.0.1"));

        // A run holding an old generation must not touch the store.
        state.packaging_generation.fetch_add(1, Ordering::SeqCst);
        let stale = package_once(&state, generation, false).await.unwrap();
        assert!(stale.is_none());
    }
}
