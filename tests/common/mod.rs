//! Shared test harness: a store wrapper that counts reads and injects
//! failures on demand.

#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use list_sync::{Backend, Collection, Entry, InMemoryStore, StorageError, Store};

/// Wraps an [`InMemoryStore`] with failure injection.
///
/// - `fail_entry(id)`: saving that entry fails with a backend error
/// - `set_unavailable(true)`: every call fails with `Unavailable`
/// - `set_lossy(true)`: writes report success but store nothing
/// - `set_write_delay(d)`: every write (and delete) sleeps `d` first
pub struct ChaosStore {
    inner: Arc<InMemoryStore>,
    fail_entries: Mutex<Vec<String>>,
    unavailable: AtomicBool,
    lossy: AtomicBool,
    reads: AtomicU64,
    writes: AtomicU64,
    write_delay_ms: AtomicU64,
}

impl ChaosStore {
    pub fn new(inner: Arc<InMemoryStore>) -> Self {
        Self {
            inner,
            fail_entries: Mutex::new(Vec::new()),
            unavailable: AtomicBool::new(false),
            lossy: AtomicBool::new(false),
            reads: AtomicU64::new(0),
            writes: AtomicU64::new(0),
            write_delay_ms: AtomicU64::new(0),
        }
    }

    pub fn local() -> Self {
        Self::new(Arc::new(InMemoryStore::local()))
    }

    pub fn cloud() -> Self {
        Self::new(Arc::new(InMemoryStore::cloud()))
    }

    pub fn inner(&self) -> &Arc<InMemoryStore> {
        &self.inner
    }

    pub fn fail_entry(&self, id: &str) {
        self.fail_entries.lock().push(id.to_string());
    }

    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    pub fn set_lossy(&self, lossy: bool) {
        self.lossy.store(lossy, Ordering::SeqCst);
    }

    pub fn set_write_delay(&self, delay: Duration) {
        self.write_delay_ms.store(delay.as_millis() as u64, Ordering::SeqCst);
    }

    pub fn reads(&self) -> u64 {
        self.reads.load(Ordering::SeqCst)
    }

    pub fn writes(&self) -> u64 {
        self.writes.load(Ordering::SeqCst)
    }

    fn read(&self) -> Result<(), StorageError> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        self.check()
    }

    async fn write(&self) -> Result<bool, StorageError> {
        let delay = self.write_delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }
        self.writes.fetch_add(1, Ordering::SeqCst);
        self.check()?;
        Ok(!self.lossy.load(Ordering::SeqCst))
    }

    fn check(&self) -> Result<(), StorageError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StorageError::Unavailable("injected outage".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl Store for ChaosStore {
    fn backend(&self) -> Backend {
        self.inner.backend()
    }

    async fn get_all_collections(&self) -> Result<Vec<Collection>, StorageError> {
        self.read()?;
        self.inner.get_all_collections().await
    }

    async fn get_collection(&self, id: &str) -> Result<Option<Collection>, StorageError> {
        self.read()?;
        self.inner.get_collection(id).await
    }

    async fn save_collection(&self, collection: &Collection) -> Result<(), StorageError> {
        if self.write().await? {
            self.inner.save_collection(collection).await?;
        }
        Ok(())
    }

    async fn update_collection(&self, collection: &Collection) -> Result<(), StorageError> {
        if self.write().await? {
            self.inner.update_collection(collection).await?;
        }
        Ok(())
    }

    async fn delete_collection(&self, id: &str) -> Result<(), StorageError> {
        if self.write().await? {
            self.inner.delete_collection(id).await?;
        }
        Ok(())
    }

    async fn get_all_entries(&self) -> Result<Vec<Entry>, StorageError> {
        self.read()?;
        self.inner.get_all_entries().await
    }

    async fn get_entry(&self, id: &str) -> Result<Option<Entry>, StorageError> {
        self.read()?;
        self.inner.get_entry(id).await
    }

    async fn save_entry(&self, entry: &Entry) -> Result<(), StorageError> {
        if self.fail_entries.lock().iter().any(|id| id == &entry.id) {
            self.writes.fetch_add(1, Ordering::SeqCst);
            return Err(StorageError::Backend(format!("injected failure for {}", entry.id)));
        }
        if self.write().await? {
            self.inner.save_entry(entry).await?;
        }
        Ok(())
    }

    async fn update_entry(&self, entry: &Entry) -> Result<(), StorageError> {
        if self.write().await? {
            self.inner.update_entry(entry).await?;
        }
        Ok(())
    }

    async fn delete_entry(&self, id: &str) -> Result<(), StorageError> {
        if self.write().await? {
            self.inner.delete_entry(id).await?;
        }
        Ok(())
    }

    async fn get_entries_by_collection(&self, collection_id: &str) -> Result<Vec<Entry>, StorageError> {
        self.read()?;
        self.inner.get_entries_by_collection(collection_id).await
    }
}

/// A collection plus `n` entries, wired together.
pub fn list_with_entries(name: &str, list_type: &str, n: usize) -> Collection {
    let collection = Collection::new(name, list_type);
    let entries = (0..n)
        .map(|i| Entry::new(&collection.id, format!("{} item {}", name, i)))
        .collect();
    collection.with_entries(entries)
}

/// Save a collection and its entries straight into a store.
pub async fn seed(store: &dyn Store, collection: &Collection) {
    store.save_collection(&collection.header()).await.unwrap();
    for entry in &collection.entries {
        store.save_entry(entry).await.unwrap();
    }
}
