// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Persistence coordinator.
//!
//! The [`PersistenceCoordinator`] runs CRUD calls against exactly one
//! [`Store`] and adds what the raw adapter does not give you:
//! - post-write verification (read-back before success is reported)
//! - compensating rollback for bulk entry saves
//! - per-operation timing, success/failure counters and structured logs
//!
//! It holds no entity state between calls: two coordinators over the same
//! store are interchangeable.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use list_sync::{PersistenceCoordinator, InMemoryStore, Collection, Entry};
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), list_sync::PersistenceError> {
//! let coordinator = PersistenceCoordinator::new(Arc::new(InMemoryStore::local()), true);
//!
//! let list = Collection::new("Groceries", "shopping");
//! coordinator.save_collection(&list).await?;
//! coordinator.save_entries_bulk(&[Entry::new(&list.id, "Milk"), Entry::new(&list.id, "Eggs")]).await?;
//!
//! let all = coordinator.load_all().await?;
//! assert_eq!(all[0].entries.len(), 2);
//! # Ok(())
//! # }
//! ```

mod bulk;
mod verify;
mod writes;

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::error::{PersistenceError, Result};
use crate::metrics::{self, LatencyTimer};
use crate::model::{Backend, Collection, Entry};
use crate::storage::traits::Store;

/// Stateless pass-through over one store.
#[derive(Clone)]
pub struct PersistenceCoordinator {
    pub(super) store: Arc<dyn Store>,
    pub(super) backend: Backend,
    /// Read each single-record write back before reporting success.
    /// Bulk saves are always verified.
    pub(super) verify_writes: bool,
}

impl std::fmt::Debug for PersistenceCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PersistenceCoordinator")
            .field("backend", &self.backend)
            .field("verify_writes", &self.verify_writes)
            .finish()
    }
}

impl PersistenceCoordinator {
    pub fn new(store: Arc<dyn Store>, verify_writes: bool) -> Self {
        let backend = store.backend();
        Self {
            store,
            backend,
            verify_writes,
        }
    }

    /// Same store with read-back verification forced on.
    #[must_use]
    pub fn verified(&self) -> Self {
        Self {
            verify_writes: true,
            ..self.clone()
        }
    }

    /// Which backend this coordinator is bound to.
    #[must_use]
    pub fn backend(&self) -> Backend {
        self.backend
    }

    /// The underlying store (for health probes).
    #[must_use]
    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    /// Run a write body on its own task and wait for it.
    ///
    /// Dropping the returned future does not cancel the body: a caller that
    /// stops waiting leaves the write (and any rollback) to finish.
    pub(super) async fn detached<T, F, Fut>(&self, operation: &'static str, body: F) -> Result<T>
    where
        F: FnOnce(Self) -> Fut,
        Fut: Future<Output = Result<T>> + Send + 'static,
        T: Send + 'static,
    {
        let backend = self.backend;
        tokio::spawn(body(self.clone())).await.map_err(|e| PersistenceError::WriteFailed {
            backend,
            operation,
            id: "*".into(),
            reason: format!("write task did not complete: {e}"),
        })?
    }

    /// Time `fut`, count its outcome and log it under `operation`.
    pub(super) async fn instrumented<T, Fut>(&self, operation: &'static str, id: &str, fut: Fut) -> Result<T>
    where
        Fut: Future<Output = Result<T>>,
    {
        let backend = self.backend.as_str();
        let timer = LatencyTimer::new(backend, operation);
        let result = fut.await;
        let duration_ms = timer.elapsed().as_secs_f64() * 1000.0;

        match &result {
            Ok(_) => {
                metrics::record_operation(backend, operation, "success");
                debug!(context = "persistence", backend, operation, id, duration_ms, "Operation succeeded");
            }
            Err(e) => {
                metrics::record_operation(backend, operation, "error");
                metrics::record_error(backend, operation, e.kind());
                warn!(context = "persistence", backend, operation, id, duration_ms, error = %e, "Operation failed");
            }
        }
        result
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Reads
    // ═══════════════════════════════════════════════════════════════════════

    /// Every collection with its entries populated.
    ///
    /// Fails with `BackendUnavailable` if the collection list cannot be read.
    /// A collection whose entries fail to load comes back with an empty
    /// entry set instead of failing the whole load.
    pub async fn load_all(&self) -> Result<Vec<Collection>> {
        self.instrumented("load_all", "*", async {
            let mut collections = self
                .store
                .get_all_collections()
                .await
                .map_err(|e| PersistenceError::read(self.backend, "load_all", e))?;

            for collection in collections.iter_mut() {
                collection.entries = self.entries_or_empty(collection).await;
            }
            Ok(collections)
        })
        .await
    }

    /// Full reload straight from the backend.
    ///
    /// The coordinator keeps nothing between calls, so this is `load_all`
    /// with a log line; callers that keep snapshots drop them first.
    pub async fn force_reload(&self) -> Result<Vec<Collection>> {
        info!(context = "persistence", backend = %self.backend, "Forced reload from backend");
        self.load_all().await
    }

    async fn entries_or_empty(&self, collection: &Collection) -> Vec<Entry> {
        match self.store.get_entries_by_collection(&collection.id).await {
            Ok(entries) => order_entries(&collection.entry_ids, entries),
            Err(e) => {
                warn!(
                    context = "persistence",
                    backend = %self.backend,
                    collection_id = %collection.id,
                    error = %e,
                    "Failed to load entries, continuing with an empty set"
                );
                metrics::record_error(self.backend.as_str(), "load_entries", "degraded_read");
                Vec::new()
            }
        }
    }

    /// One collection with its entries, if present.
    pub async fn get_collection(&self, id: &str) -> Result<Option<Collection>> {
        self.instrumented("get_collection", id, async {
            let collection = self
                .store
                .get_collection(id)
                .await
                .map_err(|e| PersistenceError::read(self.backend, "get_collection", e))?;
            match collection {
                Some(mut c) => {
                    c.entries = self.entries_or_empty(&c).await;
                    Ok(Some(c))
                }
                None => Ok(None),
            }
        })
        .await
    }

    pub async fn get_entry(&self, id: &str) -> Result<Option<Entry>> {
        self.store
            .get_entry(id)
            .await
            .map_err(|e| PersistenceError::read(self.backend, "get_entry", e))
    }

    /// Entries of one collection, in the collection's order.
    pub async fn get_entries(&self, collection_id: &str) -> Result<Vec<Entry>> {
        self.instrumented("get_entries", collection_id, async {
            self.store
                .get_entries_by_collection(collection_id)
                .await
                .map_err(|e| PersistenceError::read(self.backend, "get_entries", e))
        })
        .await
    }

    /// Collection headers without entries (cheaper than `load_all`).
    pub async fn list_collections(&self) -> Result<Vec<Collection>> {
        self.store
            .get_all_collections()
            .await
            .map_err(|e| PersistenceError::read(self.backend, "list_collections", e))
    }

    /// Every entry regardless of owner.
    pub async fn list_entries(&self) -> Result<Vec<Entry>> {
        self.store
            .get_all_entries()
            .await
            .map_err(|e| PersistenceError::read(self.backend, "list_entries", e))
    }

    /// `(collections, entries)` currently stored.
    pub async fn counts(&self) -> Result<(usize, usize)> {
        let collections = self.list_collections().await?.len();
        let entries = self.list_entries().await?.len();
        Ok((collections, entries))
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Wipe
    // ═══════════════════════════════════════════════════════════════════════

    /// Delete every entry and every collection (account reset / logout wipe).
    ///
    /// Stops at the first failed delete and reports it. Runs to completion
    /// even if the caller stops waiting.
    pub async fn clear_all(&self) -> Result<()> {
        self.detached("clear_all", |this| async move {
            this.instrumented("clear_all", "*", async {
                let entries = this.list_entries().await?;
                for entry in &entries {
                    this.store
                        .delete_entry(&entry.id)
                        .await
                        .map_err(|e| PersistenceError::write(this.backend, "clear_all", &entry.id, e))?;
                }

                let collections = this.list_collections().await?;
                for collection in &collections {
                    this.store
                        .delete_collection(&collection.id)
                        .await
                        .map_err(|e| PersistenceError::write(this.backend, "clear_all", &collection.id, e))?;
                }

                info!(
                    context = "persistence",
                    backend = %this.backend,
                    collections = collections.len(),
                    entries = entries.len(),
                    "Store cleared"
                );
                Ok(())
            })
            .await
        })
        .await
    }
}

/// Sort entries by their position in `entry_ids`; unreferenced entries
/// follow, oldest first.
fn order_entries(entry_ids: &[String], mut entries: Vec<Entry>) -> Vec<Entry> {
    let position: HashMap<&str, usize> = entry_ids
        .iter()
        .enumerate()
        .map(|(i, id)| (id.as_str(), i))
        .collect();

    entries.sort_by(|a, b| {
        let pa = position.get(a.id.as_str()).copied().unwrap_or(usize::MAX);
        let pb = position.get(b.id.as_str()).copied().unwrap_or(usize::MAX);
        pa.cmp(&pb)
            .then_with(|| a.created_at.cmp(&b.created_at))
            .then_with(|| a.id.cmp(&b.id))
    });
    entries
}
