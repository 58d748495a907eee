use std::sync::atomic::AtomicU64;
use std::sync::{Arc, Mutex, RwLock};

use sentinel_artifacts::{ArtifactCache, ManifestDispatcher, ManifestManager};
use sentinel_core::Config;
use sentinel_detection::{DetectionEngine, Rule, RuleScheduler, RuleStatusTracker};
use sentinel_store::DocumentStore;

use crate::background::RuleSetSource;
use crate::identity::{ApiTokenIdentity, CallerIdentity};

pub type SharedRules = Arc<RwLock<Vec<Rule>>>;

pub struct AppState {
    pub config: Config,
    pub store: Arc<dyn DocumentStore>,
    pub engine: Arc<DetectionEngine>,
    pub scheduler: Mutex<RuleScheduler>,
    pub statuses: RwLock<RuleStatusTracker>,
    pub rules: SharedRules,
    pub manifest_manager: Arc<ManifestManager>,
    pub artifact_cache: ArtifactCache,
    pub identity: Arc<dyn CallerIdentity>,
    /// Monotonic generation counter for the packaging task; a run that
    /// observes a newer generation than its own is stale and stands down.
    pub packaging_generation: AtomicU64,
}

impl AppState {
    pub fn new(
        config: Config,
        store: Arc<dyn DocumentStore>,
        dispatchers: Vec<Arc<dyn ManifestDispatcher>>,
    ) -> Self {
        let rules: SharedRules = Arc::new(RwLock::new(Vec::new()));
        let engine = Arc::new(DetectionEngine::new(
            store.clone(),
            config.alerts.index.clone(),
            config.detection.max_signals,
        ));
        let manifest_manager = Arc::new(ManifestManager::new(
            store.clone(),
            Arc::new(RuleSetSource::new(rules.clone())),
            dispatchers,
        ));
        let artifact_cache = ArtifactCache::new(config.artifacts.cache_size);
        let identity: Arc<dyn CallerIdentity> =
            Arc::new(ApiTokenIdentity::new(config.server.api_token.clone()));
        Self {
            config,
            store,
            engine,
            scheduler: Mutex::new(RuleScheduler::new()),
            statuses: RwLock::new(RuleStatusTracker::new()),
            rules,
            manifest_manager,
            artifact_cache,
            identity,
            packaging_generation: AtomicU64::new(0),
        }
    }

    /// Replace the rule set and resync the scheduler.
    pub fn install_rules(&self, rules: Vec<Rule>) {
        self.scheduler
            .lock()
            .expect("scheduler lock poisoned")
            .sync_rules(&rules);
        *self.rules.write().expect("rules lock poisoned") = rules;
    }
}
