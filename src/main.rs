//! feedrelay — Binary Entrypoint
//! Loads configuration, opens the article store, registers built-in adapter
//! classes, arms the getter registry, and boots the Axum control API with
//! the Prometheus exporter merged in.

use std::path::Path;
use std::sync::Arc;

use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use feedrelay::adapter::builtin::register_builtins;
use feedrelay::adapter::directory::AdapterDirectory;
use feedrelay::config::{AppConfig, ConfigHandle};
use feedrelay::engine::Engine;
use feedrelay::metrics::Metrics;
use feedrelay::store::SqliteStore;
use feedrelay::{api, store::ArticleStore};

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("feedrelay=info,warn"));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().compact())
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env in local/dev; no-op in prod environments.
    let _ = dotenvy::dotenv();
    init_tracing();

    let config_path = std::env::var("FEEDRELAY_CONFIG")
        .unwrap_or_else(|_| "config/feedrelay.toml".to_string());
    let config = if Path::new(&config_path).exists() {
        ConfigHandle::load(&config_path)?
    } else {
        warn!(path = %config_path, "config file not found, starting with defaults");
        ConfigHandle::new(AppConfig::default())
    };

    let data_dir = std::env::var("FEEDRELAY_DATA").unwrap_or_else(|_| "data".to_string());
    std::fs::create_dir_all(&data_dir)?;
    let store: Arc<dyn ArticleStore> =
        Arc::new(SqliteStore::open(Path::new(&data_dir).join("feedrelay.db"))?);

    let directory = Arc::new(AdapterDirectory::new());
    register_builtins(&directory)?;

    let engine = Engine::new(config.clone(), directory, store);
    engine.update_getters();

    let metrics = Metrics::init();
    let app = api::create_router(engine.clone()).merge(metrics.router());

    let port = config.snapshot().api.port;
    let listener = tokio::net::TcpListener::bind(("0.0.0.0", port)).await?;
    info!(port, "feedrelay listening");
    axum::serve(listener, app).await?;

    Ok(())
}
