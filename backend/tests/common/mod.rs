//! Shared helpers for the integration tests

#![allow(dead_code)]

use photo_download::config::{EngineConfig, RetryConfig, TransferConfig};
use photo_download::db::{DownloadItem, DownloadStatus, Settings, Store};
use photo_download::download::DownloadManager;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

/// Engine settings with short delays so tests finish quickly
pub fn engine_config() -> EngineConfig {
    EngineConfig {
        transfer: TransferConfig {
            chunk_size: 1024,
            progress_interval_ms: 20,
            progress_byte_threshold: 4096,
            stall_timeout_ms: 2000,
            connect_timeout_secs: 5,
            ..Default::default()
        },
        retry: RetryConfig {
            base_delay_ms: 10,
            max_delay_ms: 50,
        },
        store_retry_ms: 20,
        shutdown_grace_secs: 5,
    }
}

pub fn settings(folder: &Path, max_parallel: u32) -> Settings {
    Settings {
        default_download_folder: folder.to_path_buf(),
        max_parallel_downloads: max_parallel,
        max_retry_attempts: 3,
        speed_throttle: 0,
        ..Default::default()
    }
}

/// Engine settings that give up on a silent source after `stall_ms`
pub fn stalling_config(stall_ms: u64) -> EngineConfig {
    let mut config = engine_config();
    config.transfer.stall_timeout_ms = stall_ms;
    config
}

/// Seed `store` with settings and start a manager on it
pub fn start_manager(store: Arc<dyn Store>, folder: &Path, max_parallel: u32) -> DownloadManager {
    start_manager_with(store, folder, max_parallel, engine_config())
}

pub fn start_manager_with(
    store: Arc<dyn Store>,
    folder: &Path,
    max_parallel: u32,
    config: EngineConfig,
) -> DownloadManager {
    store
        .upsert_settings(&settings(folder, max_parallel))
        .expect("seed settings");
    DownloadManager::start(store, config).expect("manager starts")
}

/// Accept connections and read the request, then never answer.
/// Returns the base URL.
pub async fn silent_server() -> String {
    serve_raw(None).await
}

/// Answer with a `Content-Length` of `total` but send only `sent` bytes of
/// body, keeping the connection open. Returns the base URL.
pub async fn stalling_server(total: usize, sent: usize) -> String {
    serve_raw(Some((total, sent))).await
}

async fn serve_raw(reply: Option<(usize, usize)>) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("local addr");

    tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            tokio::spawn(async move {
                let mut request = [0u8; 4096];
                let _ = socket.read(&mut request).await;
                if let Some((total, sent)) = reply {
                    let head = format!(
                        "HTTP/1.1 200 OK\r\nContent-Length: {}\r\nContent-Type: image/jpeg\r\n\r\n",
                        total
                    );
                    let _ = socket.write_all(head.as_bytes()).await;
                    let _ = socket.write_all(&payload(sent)).await;
                    let _ = socket.flush().await;
                }
                tokio::time::sleep(Duration::from_secs(60)).await;
            });
        }
    });

    format!("http://{}", addr)
}

/// Deterministic test payload
pub fn payload(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}

/// Poll until the item satisfies `pred`, failing the test after 10 seconds
pub async fn wait_for(
    manager: &DownloadManager,
    id: &str,
    pred: impl Fn(&DownloadItem) -> bool,
) -> DownloadItem {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
    loop {
        if let Some(item) = manager.get(id) {
            if pred(&item) {
                return item;
            }
        }
        if tokio::time::Instant::now() > deadline {
            panic!("timed out waiting on {}: {:?}", id, manager.get(id));
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

pub async fn wait_for_status(
    manager: &DownloadManager,
    id: &str,
    status: DownloadStatus,
) -> DownloadItem {
    wait_for(manager, id, |item| item.status == status).await
}

/// Replay a store's write history and return the most items that were
/// Downloading at the same time
pub fn peak_downloading(history: &[(String, DownloadStatus)]) -> usize {
    let mut current: HashMap<&str, DownloadStatus> = HashMap::new();
    let mut peak = 0;
    for (id, status) in history {
        current.insert(id.as_str(), *status);
        let downloading = current
            .values()
            .filter(|s| **s == DownloadStatus::Downloading)
            .count();
        peak = peak.max(downloading);
    }
    peak
}
