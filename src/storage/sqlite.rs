// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! SQLite storage backend (the on-device local store).
//!
//! Records are stored as JSON payloads next to the few columns queries need:
//! ```sql
//! CREATE TABLE collections (
//!   id TEXT PRIMARY KEY,
//!   updated_at INTEGER NOT NULL,
//!   payload TEXT NOT NULL      -- Collection header as JSON
//! )
//! CREATE TABLE entries (
//!   id TEXT PRIMARY KEY,
//!   collection_id TEXT NOT NULL,
//!   created_at INTEGER NOT NULL,
//!   updated_at INTEGER NOT NULL,
//!   payload TEXT NOT NULL      -- Entry as JSON
//! )
//! ```
//!
//! Saves are upserts (`ON CONFLICT DO UPDATE`), which keeps the rowid and so
//! keeps `get_all_collections` in creation order. Updates report
//! [`StorageError::NotFound`] when no row matched.
//!
//! ## sqlx Any Driver Quirks
//!
//! The `Any` driver may hand TEXT back as bytes, so payload columns are read
//! as `String` first and `Vec<u8>` second.

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use sqlx::any::{AnyPoolOptions, AnyRow};
use sqlx::{AnyPool, Row};
use std::sync::Once;
use std::time::Duration;
use tracing::info;

use super::traits::{StorageError, Store};
use crate::model::{Backend, Collection, Entry};
use crate::resilience::retry::{retry, RetryConfig};

// SQLx `Any` driver requires runtime installation
static INSTALL_DRIVERS: Once = Once::new();

fn install_drivers() {
    INSTALL_DRIVERS.call_once(|| {
        sqlx::any::install_default_drivers();
    });
}

pub struct SqliteStore {
    pool: AnyPool,
    backend: Backend,
}

impl SqliteStore {
    /// Open (creating if needed) the database at `url`, with connect-mode retry.
    pub async fn new(url: &str) -> Result<Self, StorageError> {
        install_drivers();
        if !url.starts_with("sqlite:") {
            return Err(StorageError::Backend(format!("not a sqlite url: {url}")));
        }

        let pool = retry("sqlite_connect", &RetryConfig::connect(), || async {
            AnyPoolOptions::new()
                .max_connections(4)
                .acquire_timeout(Duration::from_secs(10))
                .idle_timeout(Duration::from_secs(300))
                .connect(url)
                .await
                .map_err(map_sqlx)
        })
        .await?;

        let store = Self {
            pool,
            backend: Backend::Local,
        };
        store.enable_wal_mode().await?;
        store.init_schema().await?;
        info!(context = "persistence", backend = "local", "SQLite store ready");
        Ok(store)
    }

    /// Play the cloud role instead (tests and single-machine setups).
    pub fn with_backend(mut self, backend: Backend) -> Self {
        self.backend = backend;
        self
    }

    /// Readers don't block the writer, one fsync per commit.
    async fn enable_wal_mode(&self) -> Result<(), StorageError> {
        sqlx::query("PRAGMA journal_mode = WAL")
            .execute(&self.pool)
            .await
            .map_err(|e| StorageError::Backend(format!("Failed to enable WAL mode: {}", e)))?;

        sqlx::query("PRAGMA synchronous = NORMAL")
            .execute(&self.pool)
            .await
            .map_err(|e| StorageError::Backend(format!("Failed to set synchronous mode: {}", e)))?;
        Ok(())
    }

    async fn init_schema(&self) -> Result<(), StorageError> {
        const SCHEMA: [&str; 3] = [
            r#"
            CREATE TABLE IF NOT EXISTS collections (
                id TEXT PRIMARY KEY,
                updated_at INTEGER NOT NULL,
                payload TEXT NOT NULL
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS entries (
                id TEXT PRIMARY KEY,
                collection_id TEXT NOT NULL,
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL,
                payload TEXT NOT NULL
            )
            "#,
            "CREATE INDEX IF NOT EXISTS idx_entries_collection ON entries (collection_id)",
        ];

        for sql in SCHEMA {
            retry("sqlite_init_schema", &RetryConfig::connect(), || async {
                sqlx::query(sql).execute(&self.pool).await.map_err(map_sqlx)
            })
            .await?;
        }
        Ok(())
    }

    /// Close the pool; later calls fail with `Unavailable`.
    pub async fn close(&self) {
        self.pool.close().await;
    }
}

fn map_sqlx(e: sqlx::Error) -> StorageError {
    match e {
        sqlx::Error::RowNotFound => StorageError::NotFound,
        sqlx::Error::Io(_) | sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::WorkerCrashed => {
            StorageError::Unavailable(e.to_string())
        }
        other => StorageError::Backend(other.to_string()),
    }
}

/// Read a TEXT column as String (SQLite) or bytes (Any driver fallback).
fn text_column(row: &AnyRow, column: &str) -> Option<String> {
    row.try_get::<String, _>(column).ok().or_else(|| {
        row.try_get::<Vec<u8>, _>(column)
            .ok()
            .and_then(|bytes| String::from_utf8(bytes).ok())
    })
}

fn decode<T: DeserializeOwned>(row: &AnyRow) -> Result<T, StorageError> {
    let id = text_column(row, "id").unwrap_or_default();
    let payload = text_column(row, "payload").ok_or_else(|| StorageError::Serialization {
        id: id.clone(),
        reason: "no payload in row".into(),
    })?;
    serde_json::from_str(&payload).map_err(|e| StorageError::Serialization {
        id,
        reason: e.to_string(),
    })
}

fn encode<T: serde::Serialize>(id: &str, value: &T) -> Result<String, StorageError> {
    serde_json::to_string(value).map_err(|e| StorageError::Serialization {
        id: id.to_string(),
        reason: e.to_string(),
    })
}

#[async_trait]
impl Store for SqliteStore {
    fn backend(&self) -> Backend {
        self.backend
    }

    async fn get_all_collections(&self) -> Result<Vec<Collection>, StorageError> {
        let rows = sqlx::query("SELECT id, payload FROM collections ORDER BY rowid")
            .fetch_all(&self.pool)
            .await
            .map_err(map_sqlx)?;
        rows.iter().map(decode::<Collection>).collect()
    }

    async fn get_collection(&self, id: &str) -> Result<Option<Collection>, StorageError> {
        let row = sqlx::query("SELECT id, payload FROM collections WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(map_sqlx)?;
        row.as_ref().map(decode::<Collection>).transpose()
    }

    async fn save_collection(&self, collection: &Collection) -> Result<(), StorageError> {
        let payload = encode(&collection.id, &collection.header())?;
        sqlx::query(
            "INSERT INTO collections (id, updated_at, payload) VALUES (?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
                updated_at = excluded.updated_at,
                payload = excluded.payload",
        )
        .bind(&collection.id)
        .bind(collection.updated_at)
        .bind(&payload)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx)?;
        Ok(())
    }

    async fn update_collection(&self, collection: &Collection) -> Result<(), StorageError> {
        let payload = encode(&collection.id, &collection.header())?;
        let result = sqlx::query("UPDATE collections SET updated_at = ?, payload = ? WHERE id = ?")
            .bind(collection.updated_at)
            .bind(&payload)
            .bind(&collection.id)
            .execute(&self.pool)
            .await
            .map_err(map_sqlx)?;
        if result.rows_affected() == 0 {
            return Err(StorageError::NotFound);
        }
        Ok(())
    }

    async fn delete_collection(&self, id: &str) -> Result<(), StorageError> {
        sqlx::query("DELETE FROM collections WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(map_sqlx)?;
        Ok(())
    }

    async fn get_all_entries(&self) -> Result<Vec<Entry>, StorageError> {
        let rows = sqlx::query("SELECT id, payload FROM entries ORDER BY created_at, id")
            .fetch_all(&self.pool)
            .await
            .map_err(map_sqlx)?;
        rows.iter().map(decode::<Entry>).collect()
    }

    async fn get_entry(&self, id: &str) -> Result<Option<Entry>, StorageError> {
        let row = sqlx::query("SELECT id, payload FROM entries WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(map_sqlx)?;
        row.as_ref().map(decode::<Entry>).transpose()
    }

    async fn save_entry(&self, entry: &Entry) -> Result<(), StorageError> {
        let payload = encode(&entry.id, entry)?;
        sqlx::query(
            "INSERT INTO entries (id, collection_id, created_at, updated_at, payload) VALUES (?, ?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
                collection_id = excluded.collection_id,
                created_at = excluded.created_at,
                updated_at = excluded.updated_at,
                payload = excluded.payload",
        )
        .bind(&entry.id)
        .bind(&entry.collection_id)
        .bind(entry.created_at)
        .bind(entry.updated_at)
        .bind(&payload)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx)?;
        Ok(())
    }

    async fn update_entry(&self, entry: &Entry) -> Result<(), StorageError> {
        let payload = encode(&entry.id, entry)?;
        let result = sqlx::query("UPDATE entries SET updated_at = ?, payload = ? WHERE id = ?")
            .bind(entry.updated_at)
            .bind(&payload)
            .bind(&entry.id)
            .execute(&self.pool)
            .await
            .map_err(map_sqlx)?;
        if result.rows_affected() == 0 {
            return Err(StorageError::NotFound);
        }
        Ok(())
    }

    async fn delete_entry(&self, id: &str) -> Result<(), StorageError> {
        sqlx::query("DELETE FROM entries WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(map_sqlx)?;
        Ok(())
    }

    async fn get_entries_by_collection(&self, collection_id: &str) -> Result<Vec<Entry>, StorageError> {
        let rows = sqlx::query("SELECT id, payload FROM entries WHERE collection_id = ? ORDER BY created_at, id")
            .bind(collection_id)
            .fetch_all(&self.pool)
            .await
            .map_err(map_sqlx)?;
        rows.iter().map(decode::<Entry>).collect()
    }

    async fn ping(&self) -> Result<(), StorageError> {
        sqlx::query("SELECT 1").execute(&self.pool).await.map_err(map_sqlx)?;
        Ok(())
    }
}
