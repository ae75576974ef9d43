//! Single-item byte transfer

use crate::config::TransferConfig;
use crate::download::{classify_status, ProgressGate, ThrottleController};
use crate::error::TransferError;
use crate::logging;
use futures_util::StreamExt;
use reqwest::header::{CONTENT_RANGE, RANGE};
use reqwest::{Client, Response, StatusCode};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info};

/// Control signal delivered to a running worker
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    Run,
    Pause,
    Cancel,
    /// Manager is stopping; keep partial data and hand the item back
    Shutdown,
}

/// Everything a worker needs to know about the item it transfers
#[derive(Debug, Clone)]
pub struct TransferJob {
    pub id: String,
    pub worker_id: u64,
    pub url: String,
    pub part_path: PathBuf,
    pub final_path: PathBuf,
    /// Try to continue from the bytes already in `part_path`
    pub resume: bool,
}

/// How a transfer attempt ended, other than by failing
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransferOutcome {
    Completed { bytes: u64 },
    Paused { bytes: u64 },
    Cancelled,
    Interrupted { bytes: u64 },
}

/// Reports sent from workers to the manager, in order per worker
#[derive(Debug, Clone)]
pub enum TransferEvent {
    /// Source opened; `offset` is where writing resumed
    Started {
        id: String,
        worker_id: u64,
        offset: u64,
        size: Option<u64>,
    },
    Progress {
        id: String,
        worker_id: u64,
        bytes: u64,
        speed: u64,
    },
    Finished {
        id: String,
        worker_id: u64,
        result: Result<TransferOutcome, TransferError>,
    },
    /// Retry backoff ended, or was cut short by `signal`
    BackoffEnded {
        id: String,
        worker_id: u64,
        signal: Signal,
    },
}

/// Drives the byte transfer of one item at a time
pub struct TransferExecutor {
    client: Client,
    throttle: Arc<ThrottleController>,
    config: TransferConfig,
}

impl TransferExecutor {
    pub fn new(config: TransferConfig, throttle: Arc<ThrottleController>) -> Result<Self, TransferError> {
        let client = Client::builder()
            .user_agent(config.user_agent.clone())
            .connect_timeout(config.connect_timeout())
            .build()
            .map_err(|e| TransferError::Terminal(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            throttle,
            config,
        })
    }

    /// Run one transfer attempt.
    ///
    /// Errors are classified but never retried here.
    pub async fn run(
        &self,
        job: &TransferJob,
        signal: &mut watch::Receiver<Signal>,
        events: &mpsc::UnboundedSender<TransferEvent>,
    ) -> Result<TransferOutcome, TransferError> {
        let url = url::Url::parse(&job.url)
            .map_err(|e| TransferError::Terminal(format!("invalid URL '{}': {}", job.url, e)))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(TransferError::Terminal(format!(
                "unsupported URL scheme '{}'",
                url.scheme()
            )));
        }

        if let Some(parent) = job.part_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let existing = if job.resume {
            partial_len(&job.part_path).await
        } else {
            0
        };

        let (response, offset, size) = tokio::select! {
            biased;
            stop = wait_for_stop(signal) => {
                return stopped_before_open(stop, &job.part_path, existing).await;
            }
            opened = tokio::time::timeout(self.config.stall_timeout(), self.open(url, existing)) => {
                opened.map_err(|_| {
                    TransferError::Transient(format!(
                        "no response received for {:?}",
                        self.config.stall_timeout()
                    ))
                })??
            }
        };
        info!(
            target: logging::NETWORK,
            "Transfer {} started at offset {} (size {:?})",
            job.id,
            offset,
            size
        );

        let mut file = if offset > 0 {
            OpenOptions::new().append(true).open(&job.part_path).await?
        } else {
            File::create(&job.part_path).await?
        };

        let _ = events.send(TransferEvent::Started {
            id: job.id.clone(),
            worker_id: job.worker_id,
            offset,
            size,
        });

        let mut downloaded = offset;
        let mut stream = response.bytes_stream();
        let mut gate = ProgressGate::new(
            self.config.progress_interval(),
            self.config.progress_byte_threshold,
            Instant::now(),
        );

        loop {
            let next = tokio::select! {
                biased;
                stop = wait_for_stop(signal) => {
                    return finish_stopped(stop, file, &job.part_path, downloaded).await;
                }
                next = tokio::time::timeout(self.config.stall_timeout(), stream.next()) => next,
            };

            let bytes = match next {
                Err(_) => {
                    return Err(TransferError::Transient(format!(
                        "no data received for {:?}",
                        self.config.stall_timeout()
                    )))
                }
                Ok(None) => break,
                Ok(Some(Err(e))) => return Err(TransferError::from(e)),
                Ok(Some(Ok(bytes))) => bytes,
            };

            for piece in bytes.chunks(self.config.chunk_size.max(1)) {
                let current = *signal.borrow();
                if current != Signal::Run {
                    return finish_stopped(current, file, &job.part_path, downloaded).await;
                }

                tokio::select! {
                    biased;
                    stop = wait_for_stop(signal) => {
                        return finish_stopped(stop, file, &job.part_path, downloaded).await;
                    }
                    _ = self.throttle.acquire(piece.len()) => {}
                }

                let len = piece.len() as u64;
                if let Some(total) = size {
                    if downloaded + len > total {
                        return Err(TransferError::Terminal(format!(
                            "source sent more than the advertised {} bytes",
                            total
                        )));
                    }
                }

                file.write_all(piece).await?;
                downloaded += len;

                if let Some(speed) = gate.record(len, Instant::now()) {
                    let _ = events.send(TransferEvent::Progress {
                        id: job.id.clone(),
                        worker_id: job.worker_id,
                        bytes: downloaded,
                        speed,
                    });
                }
            }
        }

        file.flush().await?;
        file.sync_all().await?;
        drop(file);

        if let Some(total) = size {
            if downloaded != total {
                return Err(TransferError::Transient(format!(
                    "connection closed after {} of {} bytes",
                    downloaded, total
                )));
            }
        }

        // Move the finished file into place in one step
        tokio::fs::rename(&job.part_path, &job.final_path).await?;
        info!(target: logging::NETWORK, "Transfer {} complete: {} bytes", job.id, downloaded);

        Ok(TransferOutcome::Completed { bytes: downloaded })
    }

    /// Send the request, resuming at `existing` when the source allows it.
    ///
    /// Returns the response, the offset the body starts at and the total size.
    async fn open(
        &self,
        url: url::Url,
        existing: u64,
    ) -> Result<(Response, u64, Option<u64>), TransferError> {
        if existing > 0 {
            let response = self
                .client
                .get(url.clone())
                .header(RANGE, format!("bytes={}-", existing))
                .send()
                .await?;

            match response.status() {
                StatusCode::PARTIAL_CONTENT => {
                    let range = response
                        .headers()
                        .get(CONTENT_RANGE)
                        .and_then(|v| v.to_str().ok())
                        .and_then(parse_content_range);

                    match range {
                        Some((start, total)) if start == existing => {
                            let size = total.or_else(|| {
                                response.content_length().map(|len| existing + len)
                            });
                            return Ok((response, existing, size));
                        }
                        _ => {
                            debug!(
                                target: logging::NETWORK,
                                "Unusable Content-Range for {}, restarting from zero",
                                url
                            );
                        }
                    }
                }
                StatusCode::RANGE_NOT_SATISFIABLE => {
                    debug!(target: logging::NETWORK, "Range rejected for {}, restarting", url);
                }
                status if status.is_success() => {
                    // Source ignored the range and is sending the whole body
                    debug!(target: logging::NETWORK, "No resume support for {}", url);
                    let size = response.content_length();
                    return Ok((response, 0, size));
                }
                status => {
                    return Err(classify_status(status.as_u16(), format!("HTTP error: {}", status)))
                }
            }
        }

        let response = self.client.get(url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(classify_status(status.as_u16(), format!("HTTP error: {}", status)));
        }

        let size = response.content_length();
        Ok((response, 0, size))
    }
}

/// Resolve once the signal leaves `Run`.
///
/// A dropped sender means the manager is gone, which is handled as shutdown.
pub(crate) async fn wait_for_stop(signal: &mut watch::Receiver<Signal>) -> Signal {
    match signal.wait_for(|s| *s != Signal::Run).await {
        Ok(current) => *current,
        Err(_) => Signal::Shutdown,
    }
}

async fn finish_stopped(
    signal: Signal,
    mut file: File,
    part_path: &Path,
    downloaded: u64,
) -> Result<TransferOutcome, TransferError> {
    match signal {
        Signal::Cancel => {
            drop(file);
            remove_partial(part_path).await;
            Ok(TransferOutcome::Cancelled)
        }
        Signal::Pause => {
            file.flush().await?;
            Ok(TransferOutcome::Paused { bytes: downloaded })
        }
        Signal::Shutdown | Signal::Run => {
            file.flush().await?;
            Ok(TransferOutcome::Interrupted { bytes: downloaded })
        }
    }
}

async fn stopped_before_open(
    signal: Signal,
    part_path: &Path,
    existing: u64,
) -> Result<TransferOutcome, TransferError> {
    match signal {
        Signal::Cancel => {
            remove_partial(part_path).await;
            Ok(TransferOutcome::Cancelled)
        }
        Signal::Pause => Ok(TransferOutcome::Paused { bytes: existing }),
        Signal::Shutdown | Signal::Run => Ok(TransferOutcome::Interrupted { bytes: existing }),
    }
}

async fn partial_len(path: &Path) -> u64 {
    tokio::fs::metadata(path).await.map(|m| m.len()).unwrap_or(0)
}

/// Delete a partial file, ignoring a file that is already gone
pub async fn remove_partial(path: &Path) {
    if let Err(e) = tokio::fs::remove_file(path).await {
        if e.kind() != std::io::ErrorKind::NotFound {
            tracing::warn!(target: logging::DOWNLOAD, "Failed to remove {:?}: {}", path, e);
        }
    }
}

/// Parse `bytes <start>-<end>/<total>`; total may be `*`
fn parse_content_range(value: &str) -> Option<(u64, Option<u64>)> {
    let rest = value.trim().strip_prefix("bytes ")?;
    let (range, total) = rest.split_once('/')?;
    let (start, _end) = range.split_once('-')?;
    let start = start.trim().parse().ok()?;
    let total = match total.trim() {
        "*" => None,
        t => Some(t.parse().ok()?),
    };
    Some((start, total))
}

/// Derive a filename from the last URL path segment, or generate one
pub fn extract_filename(url: &str) -> String {
    if let Ok(parsed) = url::Url::parse(url) {
        if let Some(last) = parsed.path_segments().and_then(|mut s| s.next_back()) {
            let decoded = urlencoding::decode(last)
                .map(|s| s.into_owned())
                .unwrap_or_else(|_| last.to_string());
            if let Some(name) = sanitize_filename(&decoded) {
                return name;
            }
        }
    }

    // Last resort: generate a name
    format!("download_{}", uuid::Uuid::new_v4())
}

/// Keep the name inside its destination folder.
///
/// Returns `None` for names that cannot stand for a file of their own.
pub(crate) fn sanitize_filename(name: &str) -> Option<String> {
    let name = name.trim().replace(['/', '\\'], "_");
    match name.as_str() {
        "" | "." | ".." => None,
        _ => Some(name),
    }
}
