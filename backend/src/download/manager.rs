//! Download manager for handling concurrent downloads with queue
//!
//! All state lives in one [`Registry`] behind a single lock. User commands
//! take the lock directly; workers never touch it and instead report through
//! one ordered channel that a pump task drains. A transition is written to the
//! store before it becomes visible in the registry or on the event channel.

use crate::config::EngineConfig;
use crate::db::{part_path, DownloadItem, DownloadStatus, Settings, SettingsUpdate, Store};
use crate::download::transfer::{sanitize_filename, wait_for_stop};
use crate::download::{
    extract_filename, FailureClass, RetryDecision, RetryPolicy, Signal, ThrottleController,
    TransferEvent, TransferExecutor, TransferJob, TransferOutcome,
};
use crate::error::{ManagerError, Result, TransferError};
use crate::logging;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, watch};
use tracing::{debug, info, warn};

/// Change notification for observers (web UI, CLI, tests)
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DownloadEvent {
    /// The item was created or its persisted state changed
    Changed { item: DownloadItem },
    Removed { id: String },
}

/// Request to add a download
#[derive(Debug, Clone, Deserialize)]
pub struct NewDownload {
    pub url: String,
    /// Derived from the URL when absent
    pub filename: Option<String>,
    /// Defaults to the configured download folder
    pub destination: Option<PathBuf>,
}

impl NewDownload {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            filename: None,
            destination: None,
        }
    }

    pub fn filename(mut self, filename: impl Into<String>) -> Self {
        self.filename = Some(filename.into());
        self
    }

    pub fn destination(mut self, destination: impl Into<PathBuf>) -> Self {
        self.destination = Some(destination.into());
        self
    }
}

/// Download statistics
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DownloadStats {
    pub active: usize,
    pub queued: usize,
    pub paused: usize,
    pub completed: usize,
    pub failed: usize,
    pub cancelled: usize,
    pub max_parallel: u32,
}

/// Worker slot held by a Downloading item
struct ActiveWorker {
    worker_id: u64,
    signal: watch::Sender<Signal>,
    /// Remove the record once the worker acknowledges
    delete_on_finish: bool,
}

struct Registry {
    items: HashMap<String, DownloadItem>,
    active: HashMap<String, ActiveWorker>,
    settings: Settings,
    next_worker_id: u64,
    last_created_at: Option<DateTime<Utc>>,
    shutting_down: bool,
}

struct ManagerInner {
    store: Arc<dyn Store>,
    registry: Mutex<Registry>,
    executor: Arc<TransferExecutor>,
    throttle: Arc<ThrottleController>,
    retry_policy: RetryPolicy,
    config: EngineConfig,
    events_tx: mpsc::UnboundedSender<TransferEvent>,
    notify_tx: broadcast::Sender<DownloadEvent>,
    active_count: watch::Sender<usize>,
    weak_self: Weak<ManagerInner>,
}

/// Download manager that handles concurrent downloads and queuing
#[derive(Clone)]
pub struct DownloadManager {
    inner: Arc<ManagerInner>,
}

impl DownloadManager {
    /// Load state from `store`, recover interrupted items and start admitting.
    ///
    /// Items recorded as Downloading were cut off by a crash or shutdown; they
    /// are written back as Queued before any worker starts. Must be called
    /// from within a Tokio runtime.
    pub fn start(store: Arc<dyn Store>, config: EngineConfig) -> Result<Self> {
        let settings = match store.load_settings()? {
            Some(settings) => settings,
            None => {
                let settings = Settings::default();
                store.upsert_settings(&settings)?;
                settings
            }
        };
        settings.validate()?;

        let mut items = store.load_all_items()?;
        let mut recovered = 0;
        for item in items
            .iter_mut()
            .filter(|i| i.status == DownloadStatus::Downloading)
        {
            let mut queued = item.clone();
            queued.status = DownloadStatus::Queued;
            queued.clear_rate();
            queued.updated_at = Utc::now();
            store.upsert_item(&queued)?;
            *item = queued;
            recovered += 1;
        }
        if recovered > 0 {
            info!(
                target: logging::DOWNLOAD,
                "Recovered {} interrupted downloads as queued",
                recovered
            );
        }

        let throttle = Arc::new(ThrottleController::new(settings.speed_throttle));
        let executor = TransferExecutor::new(config.transfer.clone(), Arc::clone(&throttle))
            .map_err(|e| ManagerError::Configuration(e.to_string()))?;

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (notify_tx, _) = broadcast::channel(1024);
        let (active_count, _) = watch::channel(0);

        let registry = Registry {
            last_created_at: items.iter().map(|i| i.created_at).max(),
            items: items.into_iter().map(|i| (i.id.clone(), i)).collect(),
            active: HashMap::new(),
            settings,
            next_worker_id: 0,
            shutting_down: false,
        };

        let inner = Arc::new_cyclic(|weak_self| ManagerInner {
            store,
            registry: Mutex::new(registry),
            executor: Arc::new(executor),
            throttle,
            retry_policy: RetryPolicy::from_config(&config.retry),
            config,
            events_tx,
            notify_tx,
            active_count,
            weak_self: weak_self.clone(),
        });

        tokio::spawn(pump(Arc::downgrade(&inner), events_rx));

        {
            let mut reg = inner.registry.lock();
            inner.schedule(&mut reg);
        }

        Ok(Self { inner })
    }

    /// Subscribe to item change notifications
    pub fn subscribe(&self) -> broadcast::Receiver<DownloadEvent> {
        self.inner.notify_tx.subscribe()
    }

    /// Add a download; it starts right away if a worker slot is free
    pub fn enqueue(&self, request: NewDownload) -> Result<DownloadItem> {
        let inner = &self.inner;
        let mut reg = inner.registry.lock();
        if reg.shutting_down {
            return Err(ManagerError::ShuttingDown);
        }

        let filename = request
            .filename
            .as_deref()
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .and_then(sanitize_filename)
            .unwrap_or_else(|| extract_filename(&request.url));
        let destination = request
            .destination
            .unwrap_or_else(|| reg.settings.default_download_folder.clone());
        let filename = unique_filename(&reg, &destination, &filename);

        let mut item = DownloadItem::new(request.url, filename, destination);
        item.created_at = next_created_at(&mut reg);

        let item = inner.commit(&mut reg, item)?;
        info!(target: logging::DOWNLOAD, "Queued {} ({})", item.filename, item.id);

        inner.schedule(&mut reg);
        Ok(reg.items.get(&item.id).cloned().unwrap_or(item))
    }

    /// Ask the worker of a Downloading item to pause.
    ///
    /// The item becomes Paused once the worker has stopped and the partial
    /// offset is stored.
    pub fn pause(&self, id: &str) -> Result<()> {
        let reg = self.inner.registry.lock();
        let item = reg.items.get(id).ok_or_else(|| not_found(id))?;
        match (item.status, reg.active.get(id)) {
            (DownloadStatus::Downloading, Some(worker)) => {
                worker
                    .signal
                    .send_if_modified(|s| replace_signal(s, &[Signal::Run], Signal::Pause));
                Ok(())
            }
            (status, _) => Err(ManagerError::InvalidState {
                action: "pause",
                status,
            }),
        }
    }

    /// Put a Paused item back in the queue
    pub fn resume(&self, id: &str) -> Result<DownloadItem> {
        self.requeue(id, "resume", DownloadStatus::Paused, |_| {})
    }

    /// Re-queue a Failed item with a fresh retry budget
    pub fn retry(&self, id: &str) -> Result<DownloadItem> {
        self.requeue(id, "retry", DownloadStatus::Failed, |item| {
            item.retry_count = 0;
            item.error_message = None;
        })
    }

    fn requeue(
        &self,
        id: &str,
        action: &'static str,
        from: DownloadStatus,
        reset: impl FnOnce(&mut DownloadItem),
    ) -> Result<DownloadItem> {
        let inner = &self.inner;
        let mut reg = inner.registry.lock();
        if reg.shutting_down {
            return Err(ManagerError::ShuttingDown);
        }

        let mut item = reg.items.get(id).cloned().ok_or_else(|| not_found(id))?;
        if item.status != from {
            return Err(ManagerError::InvalidState {
                action,
                status: item.status,
            });
        }

        reset(&mut item);
        item.status = DownloadStatus::Queued;
        inner.commit(&mut reg, item)?;
        info!(target: logging::DOWNLOAD, "{} requested for {}", action, id);

        inner.schedule(&mut reg);
        reg.items.get(id).cloned().ok_or_else(|| not_found(id))
    }

    /// Cancel a Queued, Paused or Downloading item and discard its partial file
    pub fn cancel(&self, id: &str) -> Result<()> {
        let inner = &self.inner;
        let mut reg = inner.registry.lock();
        let mut item = reg.items.get(id).cloned().ok_or_else(|| not_found(id))?;

        match item.status {
            DownloadStatus::Downloading => {
                if let Some(worker) = reg.active.get(id) {
                    worker.signal.send_if_modified(|s| {
                        replace_signal(s, &[Signal::Run, Signal::Pause], Signal::Cancel)
                    });
                }
                Ok(())
            }
            DownloadStatus::Queued | DownloadStatus::Paused => {
                item.status = DownloadStatus::Cancelled;
                item.error_message = None;
                item.set_transfer_stats(0, 0);
                let item = inner.commit(&mut reg, item)?;
                discard_partial(&item.part_path());
                info!(target: logging::DOWNLOAD, "Cancelled {}", id);
                Ok(())
            }
            status => Err(ManagerError::InvalidState {
                action: "cancel",
                status,
            }),
        }
    }

    /// Remove an item. A Downloading item is cancelled first and removed
    /// when its worker stops. Completed files stay on disk.
    pub fn delete(&self, id: &str) -> Result<()> {
        let inner = &self.inner;
        let mut reg = inner.registry.lock();
        if !reg.items.contains_key(id) {
            return Err(not_found(id));
        }

        if let Some(worker) = reg.active.get_mut(id) {
            worker.delete_on_finish = true;
            worker.signal.send_if_modified(|s| {
                replace_signal(s, &[Signal::Run, Signal::Pause], Signal::Cancel)
            });
            return Ok(());
        }

        inner.remove_record(&mut reg, id)
    }

    /// Validate and apply a settings change.
    ///
    /// Lowering the parallelism never stops running transfers; it only holds
    /// back admissions until the bound is met again.
    pub fn update_settings(&self, update: SettingsUpdate) -> Result<Settings> {
        let inner = &self.inner;
        let mut reg = inner.registry.lock();

        let mut next = reg.settings.merged(&update);
        next.validate()?;
        next.updated_at = Utc::now();
        inner.store.upsert_settings(&next)?;

        let previous = std::mem::replace(&mut reg.settings, next.clone());
        inner.throttle.set_rate(next.speed_throttle);
        info!(
            target: logging::DOWNLOAD,
            "Settings updated: parallel={} retries={} throttle={}B/s",
            next.max_parallel_downloads,
            next.max_retry_attempts,
            next.speed_throttle
        );

        if previous.default_download_folder != next.default_download_folder {
            inner.move_waiting_items(
                &mut reg,
                &previous.default_download_folder,
                &next.default_download_folder,
            );
        }

        inner.schedule(&mut reg);
        Ok(next)
    }

    pub fn settings(&self) -> Settings {
        self.inner.registry.lock().settings.clone()
    }

    pub fn get(&self, id: &str) -> Option<DownloadItem> {
        self.inner.registry.lock().items.get(id).cloned()
    }

    /// All items in queue order
    pub fn list(&self) -> Vec<DownloadItem> {
        let reg = self.inner.registry.lock();
        let mut items: Vec<_> = reg.items.values().cloned().collect();
        items.sort_by(|a, b| a.queue_key().cmp(&b.queue_key()));
        items
    }

    pub fn stats(&self) -> DownloadStats {
        let reg = self.inner.registry.lock();
        let mut stats = DownloadStats {
            active: reg.active.len(),
            max_parallel: reg.settings.max_parallel_downloads,
            ..Default::default()
        };
        for item in reg.items.values() {
            match item.status {
                DownloadStatus::Queued => stats.queued += 1,
                DownloadStatus::Paused => stats.paused += 1,
                DownloadStatus::Completed => stats.completed += 1,
                DownloadStatus::Failed => stats.failed += 1,
                DownloadStatus::Cancelled => stats.cancelled += 1,
                DownloadStatus::Downloading => {}
            }
        }
        stats
    }

    /// Stop admitting work and hand running transfers back to the queue.
    ///
    /// Waits up to the configured grace period for workers to acknowledge.
    pub async fn shutdown(&self) {
        {
            let mut reg = self.inner.registry.lock();
            reg.shutting_down = true;
            for worker in reg.active.values() {
                worker
                    .signal
                    .send_if_modified(|s| replace_signal(s, &[Signal::Run], Signal::Shutdown));
            }
        }

        let mut active = self.inner.active_count.subscribe();
        let grace = self.inner.config.shutdown_grace();
        let stopped = tokio::time::timeout(grace, active.wait_for(|n| *n == 0))
            .await
            .is_ok();
        if stopped {
            info!(target: logging::DOWNLOAD, "Download manager stopped");
        } else {
            warn!(
                target: logging::DOWNLOAD,
                "{} transfers still running after {:?}",
                *active.borrow(),
                grace
            );
        }
    }
}

impl ManagerInner {
    /// Persist `item`, then publish it. Nothing changes if the store fails.
    fn commit(&self, reg: &mut Registry, mut item: DownloadItem) -> Result<DownloadItem> {
        item.updated_at = Utc::now();
        self.store.upsert_item(&item)?;
        reg.items.insert(item.id.clone(), item.clone());
        let _ = self.notify_tx.send(DownloadEvent::Changed { item: item.clone() });
        Ok(item)
    }

    fn remove_record(&self, reg: &mut Registry, id: &str) -> Result<()> {
        self.store.delete_item(id)?;
        if let Some(item) = reg.items.remove(id) {
            if item.status != DownloadStatus::Completed {
                discard_partial(&item.part_path());
            }
        }
        info!(target: logging::DOWNLOAD, "Deleted {}", id);
        let _ = self.notify_tx.send(DownloadEvent::Removed { id: id.to_string() });
        Ok(())
    }

    /// Admit Queued items, oldest first, until every worker slot is taken
    fn schedule(&self, reg: &mut Registry) {
        if reg.shutting_down {
            return;
        }

        while reg.active.len() < reg.settings.max_parallel_downloads as usize {
            let next = reg
                .items
                .values()
                .filter(|i| i.status == DownloadStatus::Queued)
                .min_by(|a, b| a.queue_key().cmp(&b.queue_key()))
                .cloned();
            let Some(mut item) = next else { break };

            item.status = DownloadStatus::Downloading;
            item.error_message = None;
            item.clear_rate();

            match self.commit(reg, item) {
                Ok(item) => self.spawn_worker(reg, &item),
                Err(e) => {
                    warn!(target: logging::PERSISTENCE, "Could not admit next download: {}", e);
                    self.schedule_later();
                    break;
                }
            }
        }
    }

    fn schedule_later(&self) {
        let weak = self.weak_self.clone();
        let delay = self.config.store_retry();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if let Some(inner) = weak.upgrade() {
                let mut reg = inner.registry.lock();
                inner.schedule(&mut reg);
            }
        });
    }

    fn spawn_worker(&self, reg: &mut Registry, item: &DownloadItem) {
        reg.next_worker_id += 1;
        let worker_id = reg.next_worker_id;
        let (signal_tx, mut signal_rx) = watch::channel(Signal::Run);
        reg.active.insert(
            item.id.clone(),
            ActiveWorker {
                worker_id,
                signal: signal_tx,
                delete_on_finish: false,
            },
        );
        self.active_count.send_replace(reg.active.len());

        let job = TransferJob {
            id: item.id.clone(),
            worker_id,
            url: item.url.clone(),
            part_path: item.part_path(),
            final_path: item.file_path(),
            resume: item.bytes_downloaded > 0,
        };
        debug!(target: logging::DOWNLOAD, "Worker {} assigned to {}", worker_id, item.id);

        let executor = Arc::clone(&self.executor);
        let events = self.events_tx.clone();
        tokio::spawn(async move {
            let result = executor.run(&job, &mut signal_rx, &events).await;
            let _ = events.send(TransferEvent::Finished {
                id: job.id,
                worker_id,
                result,
            });
        });
    }

    fn release_worker(&self, reg: &mut Registry, id: &str) {
        reg.active.remove(id);
        self.active_count.send_replace(reg.active.len());
    }

    fn handle_event(&self, event: TransferEvent) {
        let mut reg = self.registry.lock();

        let (id, worker_id) = match &event {
            TransferEvent::Started { id, worker_id, .. }
            | TransferEvent::Progress { id, worker_id, .. }
            | TransferEvent::Finished { id, worker_id, .. }
            | TransferEvent::BackoffEnded { id, worker_id, .. } => (id.clone(), *worker_id),
        };
        if reg.active.get(&id).map(|w| w.worker_id) != Some(worker_id) {
            debug!(target: logging::DOWNLOAD, "Dropping report from retired worker {}", worker_id);
            return;
        }
        let Some(mut item) = reg.items.get(&id).cloned() else {
            return;
        };

        let outcome = match event.clone() {
            TransferEvent::Started { offset, size, .. } => {
                item.size = size;
                item.set_transfer_stats(offset, 0);
                self.commit(&mut reg, item).map(|_| ())
            }
            TransferEvent::Progress { bytes, speed, .. } => {
                item.set_transfer_stats(bytes, speed);
                self.commit(&mut reg, item).map(|_| ())
            }
            TransferEvent::Finished { result, .. } => {
                self.apply_finished(&mut reg, item, worker_id, result)
            }
            TransferEvent::BackoffEnded { signal, .. } => {
                self.apply_backoff_ended(&mut reg, item, signal)
            }
        };

        if let Err(e) = outcome {
            match event {
                TransferEvent::Started { .. } | TransferEvent::Progress { .. } => {
                    debug!(target: logging::PERSISTENCE, "Progress for {} not stored: {}", id, e);
                }
                // The worker slot stays held until the store takes the outcome
                _ => {
                    warn!(
                        target: logging::PERSISTENCE,
                        "Could not record outcome for {}: {}; retrying",
                        id,
                        e
                    );
                    self.redeliver_later(event);
                }
            }
        }
    }

    fn redeliver_later(&self, event: TransferEvent) {
        let events = self.events_tx.clone();
        let delay = self.config.store_retry();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = events.send(event);
        });
    }

    fn apply_finished(
        &self,
        reg: &mut Registry,
        mut item: DownloadItem,
        worker_id: u64,
        result: std::result::Result<TransferOutcome, TransferError>,
    ) -> Result<()> {
        if self.pending_delete(reg, &item.id) {
            return self.finish_delete(reg, &item.id);
        }

        match result {
            Ok(TransferOutcome::Completed { bytes }) => {
                item.status = DownloadStatus::Completed;
                item.size = Some(item.size.unwrap_or(bytes));
                item.set_transfer_stats(bytes, 0);
                item.error_message = None;
                info!(target: logging::DOWNLOAD, "Completed {} ({} bytes)", item.id, bytes);
            }
            Ok(TransferOutcome::Paused { bytes }) => {
                item.status = DownloadStatus::Paused;
                item.set_transfer_stats(bytes, 0);
                info!(target: logging::DOWNLOAD, "Paused {} at {} bytes", item.id, bytes);
            }
            Ok(TransferOutcome::Cancelled) => {
                item.status = DownloadStatus::Cancelled;
                item.set_transfer_stats(0, 0);
                item.error_message = None;
                info!(target: logging::DOWNLOAD, "Cancelled {}", item.id);
            }
            Ok(TransferOutcome::Interrupted { bytes }) => {
                item.status = DownloadStatus::Queued;
                item.set_transfer_stats(bytes, 0);
            }
            Err(error) => {
                let class = FailureClass::of(&error);
                let max_attempts = reg.settings.max_retry_attempts;
                match self.retry_policy.decide(class, item.retry_count, max_attempts) {
                    RetryDecision::Retry { delay } => {
                        item.retry_count += 1;
                        item.clear_rate();
                        let item = self.commit(reg, item)?;
                        warn!(
                            target: logging::DOWNLOAD,
                            "Attempt for {} failed ({}); retry {}/{} in {:?}",
                            item.id,
                            error,
                            item.retry_count,
                            max_attempts,
                            delay
                        );
                        self.spawn_backoff(reg, &item.id, worker_id, delay);
                        return Ok(());
                    }
                    RetryDecision::Fail => {
                        item.status = DownloadStatus::Failed;
                        item.clear_rate();
                        item.error_message = Some(error.to_string());
                        warn!(target: logging::DOWNLOAD, "Download {} failed: {}", item.id, error);
                    }
                }
            }
        }

        let id = item.id.clone();
        self.commit(reg, item)?;
        self.release_worker(reg, &id);
        self.schedule(reg);
        Ok(())
    }

    /// Hold the worker slot for `delay`, then hand the item back to the queue
    fn spawn_backoff(&self, reg: &Registry, id: &str, worker_id: u64, delay: Duration) {
        let Some(worker) = reg.active.get(id) else {
            return;
        };
        let mut signal = worker.signal.subscribe();
        let events = self.events_tx.clone();
        let id = id.to_string();

        tokio::spawn(async move {
            let signal = tokio::select! {
                _ = tokio::time::sleep(delay) => Signal::Run,
                stop = wait_for_stop(&mut signal) => stop,
            };
            let _ = events.send(TransferEvent::BackoffEnded {
                id,
                worker_id,
                signal,
            });
        });
    }

    fn apply_backoff_ended(
        &self,
        reg: &mut Registry,
        mut item: DownloadItem,
        signal: Signal,
    ) -> Result<()> {
        if self.pending_delete(reg, &item.id) {
            return self.finish_delete(reg, &item.id);
        }

        let discard = match signal {
            Signal::Run | Signal::Shutdown => {
                item.status = DownloadStatus::Queued;
                item.clear_rate();
                false
            }
            Signal::Pause => {
                item.status = DownloadStatus::Paused;
                item.clear_rate();
                false
            }
            Signal::Cancel => {
                item.status = DownloadStatus::Cancelled;
                item.set_transfer_stats(0, 0);
                true
            }
        };

        let item = self.commit(reg, item)?;
        if discard {
            discard_partial(&item.part_path());
        }
        self.release_worker(reg, &item.id);
        self.schedule(reg);
        Ok(())
    }

    fn pending_delete(&self, reg: &Registry, id: &str) -> bool {
        reg.active.get(id).is_some_and(|w| w.delete_on_finish)
    }

    fn finish_delete(&self, reg: &mut Registry, id: &str) -> Result<()> {
        self.remove_record(reg, id)?;
        self.release_worker(reg, id);
        self.schedule(reg);
        Ok(())
    }

    /// Point untouched queued items at a new default folder
    fn move_waiting_items(&self, reg: &mut Registry, from: &Path, to: &Path) {
        let movable: Vec<_> = reg
            .items
            .values()
            .filter(|i| {
                i.status == DownloadStatus::Queued && i.bytes_downloaded == 0 && i.destination == from
            })
            .cloned()
            .collect();

        for mut item in movable {
            item.filename = unique_filename(reg, to, &item.filename);
            item.destination = to.to_path_buf();
            if let Err(e) = self.commit(reg, item) {
                warn!(target: logging::PERSISTENCE, "Could not move queued item: {}", e);
            }
        }
    }
}

/// Apply worker reports one at a time, in the order they were sent
async fn pump(inner: Weak<ManagerInner>, mut events: mpsc::UnboundedReceiver<TransferEvent>) {
    while let Some(event) = events.recv().await {
        let Some(inner) = inner.upgrade() else {
            break;
        };
        inner.handle_event(event);
    }
}

fn replace_signal(current: &mut Signal, from: &[Signal], to: Signal) -> bool {
    if from.contains(current) {
        *current = to;
        true
    } else {
        false
    }
}

/// Creation timestamps are kept strictly increasing so queue order is stable
fn next_created_at(reg: &mut Registry) -> DateTime<Utc> {
    let now = Utc::now();
    let created_at = match reg.last_created_at {
        Some(last) if now <= last => last + chrono::Duration::microseconds(1),
        _ => now,
    };
    reg.last_created_at = Some(created_at);
    created_at
}

/// Pick a name in `destination` that no other record and no file on disk
/// already uses, numbering it `name (1).ext`, `name (2).ext`, ...
fn unique_filename(reg: &Registry, destination: &Path, name: &str) -> String {
    let taken = |candidate: &str| {
        reg.items
            .values()
            .any(|i| i.destination == destination && i.filename == candidate)
            || destination.join(candidate).exists()
            || part_path(destination, candidate).exists()
    };
    if !taken(name) {
        return name.to_string();
    }

    let (stem, extension) = match name.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() => (stem, Some(ext)),
        _ => (name, None),
    };
    let mut counter = 1;
    loop {
        let candidate = match extension {
            Some(ext) => format!("{} ({}).{}", stem, counter, ext),
            None => format!("{} ({})", stem, counter),
        };
        if !taken(&candidate) {
            return candidate;
        }
        counter += 1;
    }
}

fn discard_partial(path: &Path) {
    if let Err(e) = std::fs::remove_file(path) {
        if e.kind() != std::io::ErrorKind::NotFound {
            warn!(target: logging::DOWNLOAD, "Failed to remove {:?}: {}", path, e);
        }
    }
}

fn not_found(id: &str) -> ManagerError {
    ManagerError::NotFound(id.to_string())
}
