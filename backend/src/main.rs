//! Photo Download - runs the download queue behind a local web API

use anyhow::Result;
use photo_download::config;
use photo_download::db::Database;
use photo_download::download::DownloadManager;
use photo_download::{logging, server, AppState};
use std::sync::Arc;
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration
    let app_config = config::load_or_create_default()?;
    logging::init(&app_config.log_level);

    info!(
        target: logging::APPLICATION,
        "Starting Photo Download v{}",
        env!("CARGO_PKG_VERSION")
    );
    info!(target: logging::APPLICATION, "Configuration loaded from {:?}", config::config_path());

    // Initialize database
    let db_path = app_config
        .storage
        .database_path
        .clone()
        .unwrap_or_else(Database::default_path);
    let db = Database::open(&db_path)?;
    info!(target: logging::PERSISTENCE, "Database opened at {:?}", db_path);

    let download_manager = DownloadManager::start(Arc::new(db), app_config.engine.clone())?;
    let state = Arc::new(AppState::new(app_config, download_manager.clone()));

    server::run(state, shutdown_signal()).await?;

    download_manager.shutdown().await;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(target: logging::APPLICATION, "Failed to listen for Ctrl-C: {}", e);
        std::future::pending::<()>().await;
    }
    info!(target: logging::APPLICATION, "Shutdown requested");
}
