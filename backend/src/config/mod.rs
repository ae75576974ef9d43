//! Configuration management for Photo Download

mod settings;

pub use settings::*;

use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};

/// Get the configuration directory path
pub fn config_dir() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("photo-download")
}

/// Get the configuration file path
pub fn config_path() -> PathBuf {
    config_dir().join("config.toml")
}

/// Load configuration from the default location or create it
pub fn load_or_create_default() -> Result<AppConfig> {
    load_or_create(&config_path())
}

/// Load configuration from `path`, writing the defaults there if it is missing
pub fn load_or_create(path: &Path) -> Result<AppConfig> {
    if path.exists() {
        let content = fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        let mut config: AppConfig = toml::from_str(&content)
            .with_context(|| format!("parsing {}", path.display()))?;
        if config.log_level.is_empty() {
            config.log_level = "info".to_string();
        }
        Ok(config)
    } else {
        let config = AppConfig {
            log_level: "info".to_string(),
            ..AppConfig::default()
        };
        save(path, &config)?;
        Ok(config)
    }
}

/// Save configuration to file
pub fn save(path: &Path, config: &AppConfig) -> Result<()> {
    // Ensure config directory exists
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }

    let content = toml::to_string_pretty(config)?;
    fs::write(path, content)?;

    Ok(())
}
