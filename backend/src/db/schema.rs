//! Persisted record types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};

use crate::error::ManagerError;

/// Download status enum
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DownloadStatus {
    Queued,
    Downloading,
    Paused,
    Completed,
    Failed,
    Cancelled,
}

impl DownloadStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Downloading => "downloading",
            Self::Paused => "paused",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }

    /// Parse a stored status string. Unknown values are reported as `None`
    /// so the caller can treat the record as corrupt.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "queued" => Some(Self::Queued),
            "downloading" => Some(Self::Downloading),
            "paused" => Some(Self::Paused),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            "cancelled" => Some(Self::Cancelled),
            _ => None,
        }
    }
}

impl fmt::Display for DownloadStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A download record stored in the database
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DownloadItem {
    pub id: String,
    pub url: String,
    pub filename: String,
    /// Folder the file is written into
    pub destination: PathBuf,
    pub status: DownloadStatus,
    /// Fraction in `[0.0, 1.0]`
    pub progress: f64,
    pub bytes_downloaded: u64,
    /// `None` when the server did not advertise a length
    pub size: Option<u64>,
    /// Bytes per second
    pub speed: u64,
    /// Seconds remaining
    pub eta: Option<u64>,
    pub retry_count: u32,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl DownloadItem {
    /// Create a new queued download record
    pub fn new(url: String, filename: String, destination: PathBuf) -> Self {
        let now = Utc::now();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            url,
            filename,
            destination,
            status: DownloadStatus::Queued,
            progress: 0.0,
            bytes_downloaded: 0,
            size: None,
            speed: 0,
            eta: None,
            retry_count: 0,
            error_message: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Final location of the downloaded file
    pub fn file_path(&self) -> PathBuf {
        self.destination.join(&self.filename)
    }

    /// Location of the partial file while the transfer is unfinished
    pub fn part_path(&self) -> PathBuf {
        part_path(&self.destination, &self.filename)
    }

    /// Record a new byte count and transfer rate, keeping `progress` and
    /// `eta` consistent with them.
    pub fn set_transfer_stats(&mut self, bytes_downloaded: u64, speed: u64) {
        self.bytes_downloaded = bytes_downloaded;
        self.speed = speed;
        self.progress = match self.size {
            Some(total) if total > 0 => (bytes_downloaded as f64 / total as f64).min(1.0),
            _ => 0.0,
        };
        self.eta = match self.size {
            Some(total) if speed > 0 => Some(total.saturating_sub(bytes_downloaded).div_ceil(speed)),
            _ => None,
        };
    }

    /// Reset the live rate fields once the item stops transferring
    pub fn clear_rate(&mut self) {
        let bytes = self.bytes_downloaded;
        self.set_transfer_stats(bytes, 0);
    }

    /// FIFO ordering key used for admission
    pub fn queue_key(&self) -> (DateTime<Utc>, &str) {
        (self.created_at, self.id.as_str())
    }
}

pub fn part_path(destination: &Path, filename: &str) -> PathBuf {
    destination.join(format!("{}.part", filename))
}

/// User-configurable limits, stored as a single record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    pub default_download_folder: PathBuf,
    pub max_parallel_downloads: u32,
    pub max_retry_attempts: u32,
    /// Combined bytes/sec cap for all transfers, 0 = unlimited
    pub speed_throttle: u64,
    pub updated_at: DateTime<Utc>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            default_download_folder: dirs::download_dir()
                .unwrap_or_else(|| PathBuf::from("./downloads")),
            max_parallel_downloads: 2,
            max_retry_attempts: 3,
            speed_throttle: 0,
            updated_at: Utc::now(),
        }
    }
}

impl Settings {
    pub fn validate(&self) -> Result<(), ManagerError> {
        if self.max_parallel_downloads == 0 {
            return Err(ManagerError::Configuration(
                "max_parallel_downloads must be at least 1".into(),
            ));
        }
        if self.default_download_folder.as_os_str().is_empty() {
            return Err(ManagerError::Configuration(
                "default_download_folder must not be empty".into(),
            ));
        }
        Ok(())
    }

    /// Produce the settings that would result from applying `update`.
    /// Validation is left to the caller.
    pub fn merged(&self, update: &SettingsUpdate) -> Settings {
        let mut next = self.clone();
        if let Some(folder) = &update.default_download_folder {
            next.default_download_folder = folder.clone();
        }
        if let Some(max) = update.max_parallel_downloads {
            next.max_parallel_downloads = max;
        }
        if let Some(attempts) = update.max_retry_attempts {
            next.max_retry_attempts = attempts;
        }
        if let Some(throttle) = update.speed_throttle {
            next.speed_throttle = throttle;
        }
        next
    }
}

/// Partial settings change; `None` fields are left untouched
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SettingsUpdate {
    pub default_download_folder: Option<PathBuf>,
    pub max_parallel_downloads: Option<u32>,
    pub max_retry_attempts: Option<u32>,
    pub speed_throttle: Option<u64>,
}
