//! In-memory store for tests and embedding

use super::{DownloadItem, DownloadStatus, Settings, Store};
use crate::error::{StoreError, StoreResult};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};

/// Non-durable [`Store`] backed by hash maps.
///
/// Every accepted item write is appended to a history log so callers can
/// check the order in which states reached the store. Writes can be made to
/// fail with [`MemoryStore::set_unavailable`].
#[derive(Debug, Default)]
pub struct MemoryStore {
    items: RwLock<HashMap<String, DownloadItem>>,
    settings: RwLock<Option<Settings>>,
    history: RwLock<Vec<(String, DownloadStatus)>>,
    unavailable: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a store pre-populated with records, as if left by a previous run
    pub fn with_items(items: impl IntoIterator<Item = DownloadItem>) -> Self {
        let store = Self::new();
        store
            .items
            .write()
            .extend(items.into_iter().map(|item| (item.id.clone(), item)));
        store
    }

    /// Make every subsequent write fail until switched back
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// `(id, status)` of every item write, oldest first
    pub fn history(&self) -> Vec<(String, DownloadStatus)> {
        self.history.read().clone()
    }

    pub fn get(&self, id: &str) -> Option<DownloadItem> {
        self.items.read().get(id).cloned()
    }

    fn check_available(&self) -> StoreResult<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("memory store switched off".into()));
        }
        Ok(())
    }
}

impl Store for MemoryStore {
    fn load_all_items(&self) -> StoreResult<Vec<DownloadItem>> {
        self.check_available()?;
        let mut items: Vec<_> = self.items.read().values().cloned().collect();
        items.sort_by(|a, b| a.queue_key().cmp(&b.queue_key()));
        Ok(items)
    }

    fn load_settings(&self) -> StoreResult<Option<Settings>> {
        self.check_available()?;
        Ok(self.settings.read().clone())
    }

    fn upsert_item(&self, item: &DownloadItem) -> StoreResult<()> {
        self.check_available()?;
        self.items.write().insert(item.id.clone(), item.clone());
        self.history.write().push((item.id.clone(), item.status));
        Ok(())
    }

    fn upsert_settings(&self, settings: &Settings) -> StoreResult<()> {
        self.check_available()?;
        *self.settings.write() = Some(settings.clone());
        Ok(())
    }

    fn delete_item(&self, id: &str) -> StoreResult<()> {
        self.check_available()?;
        self.items.write().remove(id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn sample_item() -> DownloadItem {
        DownloadItem::new(
            "https://example.com/test.zip".into(),
            "test.zip".into(),
            PathBuf::from("/tmp"),
        )
    }

    #[test]
    fn test_memory_store() {
        let store = MemoryStore::new();
        let item = sample_item();
        let id = item.id.clone();

        store.upsert_item(&item).unwrap();
        assert_eq!(store.load_all_items().unwrap(), vec![item]);

        store.delete_item(&id).unwrap();
        assert!(store.load_all_items().unwrap().is_empty());
        assert_eq!(store.history(), vec![(id, DownloadStatus::Queued)]);
    }

    #[test]
    fn test_unavailable_store_rejects_writes() {
        let store = MemoryStore::new();
        store.set_unavailable(true);

        assert!(matches!(
            store.upsert_item(&sample_item()),
            Err(StoreError::Unavailable(_))
        ));
        assert!(store.history().is_empty());

        store.set_unavailable(false);
        assert!(store.upsert_item(&sample_item()).is_ok());
    }
}
