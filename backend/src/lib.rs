//! Photo Download - a resumable download queue
//!
//! The [`download::DownloadManager`] owns every download record, admits work
//! up to the configured parallelism and writes each state change through to
//! a [`db::Store`]. The binary wraps it in a small local web API.

pub mod config;
pub mod db;
pub mod download;
pub mod error;
pub mod logging;
pub mod server;

use crate::config::AppConfig;
use crate::download::DownloadManager;

/// Application state shared by the web handlers
pub struct AppState {
    pub config: AppConfig,
    pub download_manager: DownloadManager,
}

impl AppState {
    pub fn new(config: AppConfig, download_manager: DownloadManager) -> Self {
        Self {
            config,
            download_manager,
        }
    }
}
