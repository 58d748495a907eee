use std::path::Path;
use std::sync::Arc;

use tracing::{info, warn};

use sentinel_artifacts::ManifestDispatcher;
use sentinel_server::background::{self, LogDispatcher};
use sentinel_server::{build_router, AppState};
use sentinel_store::MemoryStore;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with_target(false)
        .init();

    sentinel_core::config::load_dotenv();
    let config = sentinel_core::Config::from_env();

    let store = Arc::new(MemoryStore::new());
    let dispatchers: Vec<Arc<dyn ManifestDispatcher>> = vec![Arc::new(LogDispatcher)];
    let state = Arc::new(AppState::new(config.clone(), store, dispatchers));

    match &config.detection.rules_path {
        Some(path) => {
            let rules = background::load_rules(Path::new(path))?;
            info!(count = rules.len(), path = %path, "loaded rule set");
            state.install_rules(rules);
        }
        None => warn!("DETECTION_RULES_PATH not set; starting with no rules"),
    }

    tokio::spawn(background::run_rule_loop(state.clone()));
    tokio::spawn(background::run_packaging_loop(state.clone()));

    let app = build_router(state);
    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("Server listening on http://{}", addr);
    axum::serve(listener, app).await?;

    Ok(())
}
