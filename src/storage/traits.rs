// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

use async_trait::async_trait;
use crate::model::{Backend, Collection, Entry};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StorageError {
    #[error("Record not found")]
    NotFound,
    #[error("Storage backend unreachable: {0}")]
    Unavailable(String),
    #[error("Storage backend error: {0}")]
    Backend(String),
    #[error("Failed to encode or decode record '{id}': {reason}")]
    Serialization { id: String, reason: String },
}

/// CRUD contract every backend implements.
///
/// Collections are stored without their transient `entries`; entries are
/// stored separately and looked up by owning collection.
#[async_trait]
pub trait Store: Send + Sync {
    /// Which role this store plays.
    fn backend(&self) -> Backend;

    async fn get_all_collections(&self) -> Result<Vec<Collection>, StorageError>;
    async fn get_collection(&self, id: &str) -> Result<Option<Collection>, StorageError>;
    async fn save_collection(&self, collection: &Collection) -> Result<(), StorageError>;
    async fn update_collection(&self, collection: &Collection) -> Result<(), StorageError>;
    async fn delete_collection(&self, id: &str) -> Result<(), StorageError>;

    async fn get_all_entries(&self) -> Result<Vec<Entry>, StorageError>;
    async fn get_entry(&self, id: &str) -> Result<Option<Entry>, StorageError>;
    async fn save_entry(&self, entry: &Entry) -> Result<(), StorageError>;
    async fn update_entry(&self, entry: &Entry) -> Result<(), StorageError>;
    async fn delete_entry(&self, id: &str) -> Result<(), StorageError>;
    async fn get_entries_by_collection(&self, collection_id: &str) -> Result<Vec<Entry>, StorageError>;

    /// Cheap liveness probe. Default reads a sentinel id.
    async fn ping(&self) -> Result<(), StorageError> {
        self.get_collection("__health_check__").await.map(|_| ())
    }
}
