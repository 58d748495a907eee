use std::env;

use serde::{Deserialize, Serialize};

/// Load .env file (silently ignores if missing).
pub fn load_dotenv() {
    dotenvy::dotenv().ok();
}

fn env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_opt(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.is_empty())
}

fn env_u16(key: &str, default: u16) -> u16 {
    env::var(key).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}

fn env_u64(key: &str, default: u64) -> u64 {
    env::var(key).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}

fn env_usize(key: &str, default: usize) -> usize {
    env::var(key).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}

// ── Top-level config ──────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub alerts: AlertListConfig,
    pub detection: DetectionConfig,
    pub artifacts: ArtifactConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Bearer token required for artifact downloads; `None` disables auth.
    pub api_token: Option<String>,
}

/// Defaults that the alert list endpoint applies when the request omits them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertListConfig {
    /// Index the alert documents are written to and listed from.
    pub index: String,
    pub default_page_size: usize,
    pub default_sort: String,
    /// "asc" or "desc".
    pub default_order: String,
    /// Hard cap on hits fetched in one search.
    pub max_per_search: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectionConfig {
    /// Seconds between rule-runner scheduler ticks.
    pub tick_interval_secs: u64,
    /// Maximum signals a single rule execution may persist.
    pub max_signals: usize,
    /// JSON file the rule set is loaded from at startup.
    pub rules_path: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArtifactConfig {
    /// Seconds between manifest packaging task runs.
    pub packaging_interval_secs: u64,
    /// Bounded entry count for the in-memory download cache.
    pub cache_size: usize,
}

impl Config {
    /// Build config from environment variables (call `load_dotenv()` first).
    pub fn from_env() -> Self {
        Self {
            server: ServerConfig {
                host: env_or("SENTINEL_HOST", "0.0.0.0"),
                port: env_u16("SENTINEL_PORT", 7700),
                api_token: env_opt("SENTINEL_API_TOKEN"),
            },
            alerts: AlertListConfig {
                index: env_or("ALERT_INDEX", "alerts"),
                default_page_size: env_usize("ALERT_DEFAULT_PAGE_SIZE", 10),
                default_sort: env_or("ALERT_DEFAULT_SORT", "@timestamp"),
                default_order: env_or("ALERT_DEFAULT_ORDER", "desc"),
                max_per_search: env_usize("ALERT_MAX_PER_SEARCH", 10_000),
            },
            detection: DetectionConfig {
                tick_interval_secs: env_u64("DETECTION_TICK_INTERVAL_SECS", 60),
                max_signals: env_usize("DETECTION_MAX_SIGNALS", 100),
                rules_path: env_opt("DETECTION_RULES_PATH"),
            },
            artifacts: ArtifactConfig {
                packaging_interval_secs: env_u64("ARTIFACT_PACKAGING_INTERVAL_SECS", 60),
                cache_size: env_usize("ARTIFACT_CACHE_SIZE", 100),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let config = Config::from_env();
        assert!(!config.alerts.index.is_empty());
        assert!(config.alerts.default_page_size > 0);
        assert!(config.artifacts.cache_size > 0);
    }
}
