//! Server readiness and rule status endpoints.

use std::sync::Arc;

use axum::extract::State;
use axum::Json;
use serde::Serialize;

use sentinel_detection::RuleStatus;

use crate::state::AppState;

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub rules_loaded: usize,
}

pub async fn health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    let rules_loaded = state.rules.read().expect("rules lock poisoned").len();
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        rules_loaded,
    })
}

/// Current execution status of every known rule, for operator visibility.
pub async fn rule_statuses(State(state): State<Arc<AppState>>) -> Json<Vec<RuleStatus>> {
    let statuses = state.statuses.read().expect("statuses lock poisoned");
    let mut all: Vec<RuleStatus> = statuses.all().cloned().collect();
    all.sort_by(|a, b| a.rule_id.cmp(&b.rule_id));
    Json(all)
}
