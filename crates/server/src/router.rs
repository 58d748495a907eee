//! HTTP router construction.

use std::sync::Arc;

use axum::routing::get;
use axum::Router;
use tower_http::cors::CorsLayer;

use crate::api;
use crate::state::AppState;

/// Build the complete application router with all routes and middleware.
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(api::health::health))
        .route("/rules/statuses", get(api::health::rule_statuses))
        .route("/alerts", get(api::alerts::list_alerts))
        .route(
            "/alerts/{id}",
            get(api::alerts::get_alert).patch(api::alerts::patch_alert),
        )
        .route(
            "/artifacts/download/{identifier}/{sha256}",
            get(api::artifacts::download),
        )
        // The manifest wire format hands agents /api/-prefixed URLs.
        .route(
            "/api/artifacts/download/{identifier}/{sha256}",
            get(api::artifacts::download),
        )
        .layer(CorsLayer::permissive())
        .with_state(state)
}
