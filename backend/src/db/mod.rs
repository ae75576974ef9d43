//! Database module for persisting download records and settings

mod memory;
mod schema;

pub use memory::MemoryStore;
pub use schema::*;

use crate::error::{StoreError, StoreResult};
use crate::logging;
use chrono::{DateTime, SecondsFormat, Utc};
use parking_lot::Mutex;
use rusqlite::{Connection, OptionalExtension, Row};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

/// Durable record store consumed by the download manager.
///
/// Each write must be atomic with respect to a single record: readers see
/// either the previous record or the full new one.
pub trait Store: Send + Sync {
    /// All download records ordered by creation time
    fn load_all_items(&self) -> StoreResult<Vec<DownloadItem>>;

    fn load_settings(&self) -> StoreResult<Option<Settings>>;

    fn upsert_item(&self, item: &DownloadItem) -> StoreResult<()>;

    fn upsert_settings(&self, settings: &Settings) -> StoreResult<()>;

    fn delete_item(&self, id: &str) -> StoreResult<()>;
}

/// SQLite-backed store
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

const ITEM_COLUMNS: &str = "id, url, filename, destination, status, progress, \
    bytes_downloaded, size, speed, eta, retry_count, error_message, created_at, updated_at";

impl Database {
    /// Open (or create) the database file at `path`
    pub fn open(path: &Path) -> StoreResult<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| StoreError::Unavailable(format!("{}: {}", parent.display(), e)))?;
        }

        let conn = Connection::open(path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;
        Self::with_connection(conn)
    }

    /// Open a private in-memory database
    pub fn open_in_memory() -> StoreResult<Self> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> StoreResult<Self> {
        let db = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        db.initialize_schema()?;
        Ok(db)
    }

    /// Default database location inside the config directory
    pub fn default_path() -> PathBuf {
        crate::config::config_dir().join("downloads.db")
    }

    fn initialize_schema(&self) -> StoreResult<()> {
        let conn = self.conn.lock();

        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS downloads (
                id TEXT PRIMARY KEY,
                url TEXT NOT NULL,
                filename TEXT NOT NULL,
                destination TEXT NOT NULL,
                status TEXT NOT NULL DEFAULT 'queued',
                progress REAL NOT NULL DEFAULT 0,
                bytes_downloaded INTEGER NOT NULL DEFAULT 0,
                size INTEGER,
                speed INTEGER NOT NULL DEFAULT 0,
                eta INTEGER,
                retry_count INTEGER NOT NULL DEFAULT 0,
                error_message TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_downloads_created_at ON downloads(created_at);

            CREATE TABLE IF NOT EXISTS settings (
                id INTEGER PRIMARY KEY CHECK (id = 1),
                default_download_folder TEXT NOT NULL,
                max_parallel_downloads INTEGER NOT NULL,
                max_retry_attempts INTEGER NOT NULL,
                speed_throttle INTEGER NOT NULL,
                updated_at TEXT NOT NULL
            );
            "#,
        )?;

        Ok(())
    }
}

impl Store for Database {
    fn load_all_items(&self) -> StoreResult<Vec<DownloadItem>> {
        let conn = self.conn.lock();

        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM downloads ORDER BY created_at ASC, id ASC",
            ITEM_COLUMNS
        ))?;

        let raw = stmt
            .query_map([], RawItem::from_row)?
            .collect::<Result<Vec<_>, _>>()?;

        let items = raw
            .into_iter()
            .map(RawItem::into_item)
            .collect::<StoreResult<Vec<_>>>()?;

        debug!(target: logging::PERSISTENCE, "Loaded {} download records", items.len());
        Ok(items)
    }

    fn load_settings(&self) -> StoreResult<Option<Settings>> {
        let conn = self.conn.lock();

        let raw = conn
            .query_row(
                "SELECT default_download_folder, max_parallel_downloads, max_retry_attempts,
                        speed_throttle, updated_at
                 FROM settings WHERE id = 1",
                [],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, u32>(1)?,
                        row.get::<_, u32>(2)?,
                        row.get::<_, u64>(3)?,
                        row.get::<_, String>(4)?,
                    ))
                },
            )
            .optional()?;

        raw.map(|(folder, max_parallel, max_retry, throttle, updated_at)| {
            Ok(Settings {
                default_download_folder: PathBuf::from(folder),
                max_parallel_downloads: max_parallel,
                max_retry_attempts: max_retry,
                speed_throttle: throttle,
                updated_at: parse_timestamp("settings", &updated_at)?,
            })
        })
        .transpose()
    }

    fn upsert_item(&self, item: &DownloadItem) -> StoreResult<()> {
        let conn = self.conn.lock();

        conn.execute(
            &format!(
                r#"
                INSERT INTO downloads ({})
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)
                ON CONFLICT(id) DO UPDATE SET
                    url = excluded.url,
                    filename = excluded.filename,
                    destination = excluded.destination,
                    status = excluded.status,
                    progress = excluded.progress,
                    bytes_downloaded = excluded.bytes_downloaded,
                    size = excluded.size,
                    speed = excluded.speed,
                    eta = excluded.eta,
                    retry_count = excluded.retry_count,
                    error_message = excluded.error_message,
                    created_at = excluded.created_at,
                    updated_at = excluded.updated_at
                "#,
                ITEM_COLUMNS
            ),
            rusqlite::params![
                item.id,
                item.url,
                item.filename,
                item.destination.to_string_lossy(),
                item.status.as_str(),
                item.progress,
                item.bytes_downloaded,
                item.size,
                item.speed,
                item.eta,
                item.retry_count,
                item.error_message,
                format_timestamp(&item.created_at),
                format_timestamp(&item.updated_at),
            ],
        )?;

        Ok(())
    }

    fn upsert_settings(&self, settings: &Settings) -> StoreResult<()> {
        let conn = self.conn.lock();

        conn.execute(
            r#"
            INSERT INTO settings (id, default_download_folder, max_parallel_downloads,
                                  max_retry_attempts, speed_throttle, updated_at)
            VALUES (1, ?1, ?2, ?3, ?4, ?5)
            ON CONFLICT(id) DO UPDATE SET
                default_download_folder = excluded.default_download_folder,
                max_parallel_downloads = excluded.max_parallel_downloads,
                max_retry_attempts = excluded.max_retry_attempts,
                speed_throttle = excluded.speed_throttle,
                updated_at = excluded.updated_at
            "#,
            rusqlite::params![
                settings.default_download_folder.to_string_lossy(),
                settings.max_parallel_downloads,
                settings.max_retry_attempts,
                settings.speed_throttle,
                format_timestamp(&settings.updated_at),
            ],
        )?;

        Ok(())
    }

    fn delete_item(&self, id: &str) -> StoreResult<()> {
        let conn = self.conn.lock();
        conn.execute("DELETE FROM downloads WHERE id = ?1", [id])?;
        Ok(())
    }
}

/// Row as read from SQLite, before the text columns are validated
struct RawItem {
    id: String,
    url: String,
    filename: String,
    destination: String,
    status: String,
    progress: f64,
    bytes_downloaded: u64,
    size: Option<u64>,
    speed: u64,
    eta: Option<u64>,
    retry_count: u32,
    error_message: Option<String>,
    created_at: String,
    updated_at: String,
}

impl RawItem {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            url: row.get(1)?,
            filename: row.get(2)?,
            destination: row.get(3)?,
            status: row.get(4)?,
            progress: row.get(5)?,
            bytes_downloaded: row.get(6)?,
            size: row.get(7)?,
            speed: row.get(8)?,
            eta: row.get(9)?,
            retry_count: row.get(10)?,
            error_message: row.get(11)?,
            created_at: row.get(12)?,
            updated_at: row.get(13)?,
        })
    }

    fn into_item(self) -> StoreResult<DownloadItem> {
        let status = DownloadStatus::parse(&self.status).ok_or_else(|| StoreError::Corrupt {
            id: self.id.clone(),
            message: format!("unknown status '{}'", self.status),
        })?;

        Ok(DownloadItem {
            created_at: parse_timestamp(&self.id, &self.created_at)?,
            updated_at: parse_timestamp(&self.id, &self.updated_at)?,
            id: self.id,
            url: self.url,
            filename: self.filename,
            destination: PathBuf::from(self.destination),
            status,
            progress: self.progress,
            bytes_downloaded: self.bytes_downloaded,
            size: self.size,
            speed: self.speed,
            eta: self.eta,
            retry_count: self.retry_count,
            error_message: self.error_message,
        })
    }
}

// Fixed-width so that text ordering matches chronological ordering
fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

fn parse_timestamp(id: &str, value: &str) -> StoreResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| StoreError::Corrupt {
            id: id.to_string(),
            message: format!("bad timestamp '{}': {}", value, e),
        })
}
