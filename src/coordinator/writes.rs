// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Single-record writes for collections and entries.
//!
//! Every write is instrumented and, when `verify_writes` is on, read back
//! before success is returned. Bodies run detached, so dropping the call
//! does not stop a write halfway. Updates refuse to move `updated_at`
//! backwards over what the store already holds.

use crate::error::{PersistenceError, Result};
use crate::model::{Collection, Entry};

use super::PersistenceCoordinator;

impl PersistenceCoordinator {
    // ═══════════════════════════════════════════════════════════════════════
    // Collections
    // ═══════════════════════════════════════════════════════════════════════

    pub async fn save_collection(&self, collection: &Collection) -> Result<()> {
        let collection = collection.header();
        self.detached("save_collection", |this| async move {
            this.instrumented("save_collection", &collection.id, async {
                this.store
                    .save_collection(&collection)
                    .await
                    .map_err(|e| PersistenceError::write(this.backend, "save_collection", &collection.id, e))?;
                if this.verify_writes {
                    this.verify_collection(&collection.id).await?;
                }
                Ok(())
            })
            .await
        })
        .await
    }

    pub async fn update_collection(&self, collection: &Collection) -> Result<()> {
        let collection = collection.header();
        self.detached("update_collection", |this| async move {
            this.instrumented("update_collection", &collection.id, async {
                let existing = this
                    .store
                    .get_collection(&collection.id)
                    .await
                    .map_err(|e| PersistenceError::read(this.backend, "update_collection", e))?
                    .ok_or_else(|| PersistenceError::NotFound {
                        backend: this.backend,
                        kind: "collection",
                        id: collection.id.clone(),
                    })?;
                if existing.updated_at > collection.updated_at {
                    return Err(PersistenceError::InvalidData(format!(
                        "collection '{}' update would move updated_at back from {} to {}",
                        collection.id, existing.updated_at, collection.updated_at
                    )));
                }

                this.store
                    .update_collection(&collection)
                    .await
                    .map_err(|e| PersistenceError::write(this.backend, "update_collection", &collection.id, e))?;
                if this.verify_writes {
                    this.verify_collection(&collection.id).await?;
                }
                Ok(())
            })
            .await
        })
        .await
    }

    /// Delete a collection and every entry it owns (entries first).
    pub async fn delete_collection(&self, id: &str) -> Result<()> {
        let id = id.to_string();
        self.detached("delete_collection", |this| async move {
            this.instrumented("delete_collection", &id, async {
                let entries = this
                    .store
                    .get_entries_by_collection(&id)
                    .await
                    .map_err(|e| PersistenceError::read(this.backend, "delete_collection", e))?;
                for entry in &entries {
                    this.store
                        .delete_entry(&entry.id)
                        .await
                        .map_err(|e| PersistenceError::write(this.backend, "delete_collection", &entry.id, e))?;
                }
                this.store
                    .delete_collection(&id)
                    .await
                    .map_err(|e| PersistenceError::write(this.backend, "delete_collection", &id, e))
            })
            .await
        })
        .await
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Entries
    // ═══════════════════════════════════════════════════════════════════════

    pub async fn save_entry(&self, entry: &Entry) -> Result<()> {
        entry.validate().map_err(PersistenceError::InvalidData)?;
        let entry = entry.clone();
        self.detached("save_entry", |this| async move {
            this.instrumented("save_entry", &entry.id, async {
                this.store
                    .save_entry(&entry)
                    .await
                    .map_err(|e| PersistenceError::write(this.backend, "save_entry", &entry.id, e))?;
                if this.verify_writes {
                    this.verify_entry(&entry.id).await?;
                }
                Ok(())
            })
            .await
        })
        .await
    }

    pub async fn update_entry(&self, entry: &Entry) -> Result<()> {
        entry.validate().map_err(PersistenceError::InvalidData)?;
        let entry = entry.clone();
        self.detached("update_entry", |this| async move {
            this.instrumented("update_entry", &entry.id, async {
                let existing = this
                    .store
                    .get_entry(&entry.id)
                    .await
                    .map_err(|e| PersistenceError::read(this.backend, "update_entry", e))?
                    .ok_or_else(|| PersistenceError::NotFound {
                        backend: this.backend,
                        kind: "entry",
                        id: entry.id.clone(),
                    })?;
                if existing.collection_id != entry.collection_id {
                    return Err(PersistenceError::InvalidData(format!(
                        "entry '{}' cannot move from collection '{}' to '{}'",
                        entry.id, existing.collection_id, entry.collection_id
                    )));
                }
                if existing.updated_at > entry.updated_at {
                    return Err(PersistenceError::InvalidData(format!(
                        "entry '{}' update would move updated_at back from {} to {}",
                        entry.id, existing.updated_at, entry.updated_at
                    )));
                }

                this.store
                    .update_entry(&entry)
                    .await
                    .map_err(|e| PersistenceError::write(this.backend, "update_entry", &entry.id, e))?;
                if this.verify_writes {
                    this.verify_entry(&entry.id).await?;
                }
                Ok(())
            })
            .await
        })
        .await
    }

    pub async fn delete_entry(&self, id: &str) -> Result<()> {
        let id = id.to_string();
        self.detached("delete_entry", |this| async move {
            this.instrumented("delete_entry", &id, async {
                this.store
                    .delete_entry(&id)
                    .await
                    .map_err(|e| PersistenceError::write(this.backend, "delete_entry", &id, e))
            })
            .await
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use crate::coordinator::PersistenceCoordinator;
    use crate::error::PersistenceError;
    use crate::model::{Collection, Entry};
    use crate::storage::memory::InMemoryStore;
    use crate::storage::traits::Store;

    fn coordinator() -> (PersistenceCoordinator, Arc<InMemoryStore>) {
        let store = Arc::new(InMemoryStore::cloud());
        (PersistenceCoordinator::new(store.clone(), true), store)
    }

    #[tokio::test]
    async fn test_save_and_update_collection() {
        let (coordinator, store) = coordinator();
        let mut list = Collection::new("Movies", "movies");
        coordinator.save_collection(&list).await.unwrap();

        list.rename("Films");
        coordinator.update_collection(&list).await.unwrap();

        let stored = store.get_collection(&list.id).await.unwrap().unwrap();
        assert_eq!(stored.name, "Films");
    }

    #[tokio::test]
    async fn test_update_rejects_stale_timestamp() {
        let (coordinator, _) = coordinator();
        let list = Collection::new("Movies", "movies").with_timestamps(100, 200);
        coordinator.save_collection(&list).await.unwrap();

        let stale = list.clone().with_timestamps(100, 150);
        let err = coordinator.update_collection(&stale).await.unwrap_err();
        assert!(matches!(err, PersistenceError::InvalidData(_)));
    }

    #[tokio::test]
    async fn test_update_missing_entry_is_not_found() {
        let (coordinator, _) = coordinator();
        let err = coordinator.update_entry(&Entry::new("c", "ghost")).await.unwrap_err();
        assert!(matches!(err, PersistenceError::NotFound { kind: "entry", .. }));
    }

    #[tokio::test]
    async fn test_entry_cannot_change_owner() {
        let (coordinator, _) = coordinator();
        let entry = Entry::new("c1", "Milk");
        coordinator.save_entry(&entry).await.unwrap();

        let mut moved = entry.clone();
        moved.collection_id = "c2".into();
        let err = coordinator.update_entry(&moved).await.unwrap_err();
        assert!(matches!(err, PersistenceError::InvalidData(_)));
    }

    #[tokio::test]
    async fn test_invalid_entry_never_reaches_store() {
        let (coordinator, store) = coordinator();
        let mut entry = Entry::new("c1", "Milk");
        entry.is_completed = true;
        let err = coordinator.save_entry(&entry).await.unwrap_err();
        assert!(matches!(err, PersistenceError::InvalidData(_)));
        assert_eq!(store.entry_count(), 0);
    }

    #[tokio::test]
    async fn test_delete_collection_cascades() {
        let (coordinator, store) = coordinator();
        let list = Collection::new("Work", "tasks");
        coordinator.save_collection(&list).await.unwrap();
        coordinator.save_entry(&Entry::new(&list.id, "a")).await.unwrap();
        coordinator.save_entry(&Entry::new(&list.id, "b")).await.unwrap();
        coordinator.save_entry(&Entry::new("other", "c")).await.unwrap();

        coordinator.delete_collection(&list.id).await.unwrap();
        assert_eq!(store.collection_count(), 0);
        assert_eq!(store.entry_count(), 1);
    }
}
