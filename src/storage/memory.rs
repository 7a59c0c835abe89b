// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use crate::model::{Backend, Collection, Entry};
use super::traits::{Store, StorageError};

/// DashMap-backed store. Plays either role; used for tests and for
/// sessions that opt out of on-disk persistence explicitly.
pub struct InMemoryStore {
    backend: Backend,
    collections: DashMap<String, Collection>,
    entries: DashMap<String, Entry>,
    /// Collection ids in insertion order, so `get_all_collections` is stable
    order: Mutex<Vec<String>>,
}

impl InMemoryStore {
    #[must_use]
    pub fn new(backend: Backend) -> Self {
        Self {
            backend,
            collections: DashMap::new(),
            entries: DashMap::new(),
            order: Mutex::new(Vec::new()),
        }
    }

    #[must_use]
    pub fn local() -> Self {
        Self::new(Backend::Local)
    }

    #[must_use]
    pub fn cloud() -> Self {
        Self::new(Backend::Cloud)
    }

    /// Number of stored collections
    #[must_use]
    pub fn collection_count(&self) -> usize {
        self.collections.len()
    }

    /// Number of stored entries
    #[must_use]
    pub fn entry_count(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.collections.is_empty() && self.entries.is_empty()
    }

    /// Clear all records
    pub fn clear(&self) {
        self.collections.clear();
        self.entries.clear();
        self.order.lock().clear();
    }
}

#[async_trait]
impl Store for InMemoryStore {
    fn backend(&self) -> Backend {
        self.backend
    }

    async fn get_all_collections(&self) -> Result<Vec<Collection>, StorageError> {
        let order = self.order.lock().clone();
        Ok(order
            .iter()
            .filter_map(|id| self.collections.get(id).map(|r| r.value().clone()))
            .collect())
    }

    async fn get_collection(&self, id: &str) -> Result<Option<Collection>, StorageError> {
        Ok(self.collections.get(id).map(|r| r.value().clone()))
    }

    async fn save_collection(&self, collection: &Collection) -> Result<(), StorageError> {
        let is_new = self
            .collections
            .insert(collection.id.clone(), collection.header())
            .is_none();
        if is_new {
            self.order.lock().push(collection.id.clone());
        }
        Ok(())
    }

    async fn update_collection(&self, collection: &Collection) -> Result<(), StorageError> {
        match self.collections.get_mut(&collection.id) {
            Some(mut existing) => {
                *existing = collection.header();
                Ok(())
            }
            None => Err(StorageError::NotFound),
        }
    }

    async fn delete_collection(&self, id: &str) -> Result<(), StorageError> {
        if self.collections.remove(id).is_some() {
            self.order.lock().retain(|c| c != id);
        }
        Ok(())
    }

    async fn get_all_entries(&self) -> Result<Vec<Entry>, StorageError> {
        Ok(self.entries.iter().map(|r| r.value().clone()).collect())
    }

    async fn get_entry(&self, id: &str) -> Result<Option<Entry>, StorageError> {
        Ok(self.entries.get(id).map(|r| r.value().clone()))
    }

    async fn save_entry(&self, entry: &Entry) -> Result<(), StorageError> {
        self.entries.insert(entry.id.clone(), entry.clone());
        Ok(())
    }

    async fn update_entry(&self, entry: &Entry) -> Result<(), StorageError> {
        match self.entries.get_mut(&entry.id) {
            Some(mut existing) => {
                *existing = entry.clone();
                Ok(())
            }
            None => Err(StorageError::NotFound),
        }
    }

    async fn delete_entry(&self, id: &str) -> Result<(), StorageError> {
        self.entries.remove(id);
        Ok(())
    }

    async fn get_entries_by_collection(&self, collection_id: &str) -> Result<Vec<Entry>, StorageError> {
        let mut entries: Vec<Entry> = self
            .entries
            .iter()
            .filter(|r| r.value().collection_id == collection_id)
            .map(|r| r.value().clone())
            .collect();
        entries.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        Ok(entries)
    }
}
