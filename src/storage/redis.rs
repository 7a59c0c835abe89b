// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Redis storage backend (the remote cloud store).
//!
//! Records are JSON strings; small index structures make the by-owner and
//! list-all reads cheap:
//!
//! ```text
//! {prefix}collection:{id}           STRING  Collection header JSON
//! {prefix}collections               ZSET    collection ids, scored by created_at
//! {prefix}entry:{id}                STRING  Entry JSON
//! {prefix}entries                   SET     every entry id
//! {prefix}collection_entries:{id}   SET     entry ids owned by one collection
//! ```
//!
//! Record and index writes go out in one `MULTI` pipeline. Updates use
//! `SET .. XX` so a missing record is reported as [`StorageError::NotFound`]
//! instead of being created.

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{cmd, pipe, AsyncCommands, Client, RedisError};
use serde::de::DeserializeOwned;
use tracing::{debug, info, warn};

use super::traits::{StorageError, Store};
use crate::model::{Backend, Collection, Entry};
use crate::resilience::retry::{retry, RetryConfig};

pub struct RedisStore {
    connection: ConnectionManager,
    /// Key prefix for namespacing (e.g. "list_sync:" → "list_sync:entry:42")
    prefix: String,
    backend: Backend,
}

impl RedisStore {
    /// Connect with connect-mode retry (fails fast if the URL is wrong).
    ///
    /// # Example
    ///
    /// ```rust,no_run
    /// # use list_sync::storage::redis::RedisStore;
    /// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
    /// // Keys will be prefixed: "myapp:collection:...", "myapp:entry:..."
    /// let store = RedisStore::new("redis://localhost", "myapp:").await?;
    /// # Ok(())
    /// # }
    /// ```
    pub async fn new(connection_string: &str, prefix: &str) -> Result<Self, StorageError> {
        let client = Client::open(connection_string).map_err(|e| StorageError::Backend(e.to_string()))?;

        let connection = retry("redis_connect", &RetryConfig::connect(), || async {
            ConnectionManager::new(client.clone()).await
        })
        .await
        .map_err(map_redis)?;

        info!(context = "persistence", backend = "cloud", prefix, "Redis store ready");
        Ok(Self {
            connection,
            prefix: prefix.to_string(),
            backend: Backend::Cloud,
        })
    }

    #[must_use]
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    fn collection_key(&self, id: &str) -> String {
        format!("{}collection:{}", self.prefix, id)
    }

    fn collections_index(&self) -> String {
        format!("{}collections", self.prefix)
    }

    fn entry_key(&self, id: &str) -> String {
        format!("{}entry:{}", self.prefix, id)
    }

    fn entries_index(&self) -> String {
        format!("{}entries", self.prefix)
    }

    fn owner_index(&self, collection_id: &str) -> String {
        format!("{}collection_entries:{}", self.prefix, collection_id)
    }

    /// MGET `keys` and decode what is there. Index members whose record is
    /// gone are skipped (logged) rather than failing the whole read.
    async fn load_many<T: DeserializeOwned>(&self, keys: Vec<String>) -> Result<Vec<T>, StorageError> {
        if keys.is_empty() {
            return Ok(Vec::new());
        }
        let mut conn = self.connection.clone();
        let values: Vec<Option<String>> = cmd("MGET").arg(&keys).query_async(&mut conn).await.map_err(map_redis)?;

        let mut out = Vec::with_capacity(values.len());
        for (key, value) in keys.iter().zip(values) {
            match value {
                Some(json) => out.push(decode(key, &json)?),
                None => warn!(context = "persistence", backend = "cloud", key = %key, "Index points at a missing record"),
            }
        }
        Ok(out)
    }

    async fn load_one<T: DeserializeOwned>(&self, key: String) -> Result<Option<T>, StorageError> {
        let mut conn = self.connection.clone();
        let value: Option<String> = conn.get(&key).await.map_err(map_redis)?;
        value.map(|json| decode(&key, &json)).transpose()
    }

    /// `SET key json XX`; NotFound when the key did not exist.
    async fn replace(&self, key: &str, json: &str) -> Result<(), StorageError> {
        let mut conn = self.connection.clone();
        let reply: Option<String> = cmd("SET")
            .arg(key)
            .arg(json)
            .arg("XX")
            .query_async(&mut conn)
            .await
            .map_err(map_redis)?;
        match reply {
            Some(_) => Ok(()),
            None => Err(StorageError::NotFound),
        }
    }
}

fn map_redis(e: RedisError) -> StorageError {
    if e.is_io_error() || e.is_connection_dropped() || e.is_connection_refusal() || e.is_timeout() {
        StorageError::Unavailable(e.to_string())
    } else {
        StorageError::Backend(e.to_string())
    }
}

fn decode<T: DeserializeOwned>(key: &str, json: &str) -> Result<T, StorageError> {
    serde_json::from_str(json).map_err(|e| StorageError::Serialization {
        id: key.to_string(),
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
impl Store for RedisStore {
    fn backend(&self) -> Backend {
        self.backend
    }

    async fn get_all_collections(&self) -> Result<Vec<Collection>, StorageError> {
        let mut conn = self.connection.clone();
        let ids: Vec<String> = conn.zrange(self.collections_index(), 0, -1).await.map_err(map_redis)?;
        let keys = ids.iter().map(|id| self.collection_key(id)).collect();
        self.load_many(keys).await
    }

    async fn get_collection(&self, id: &str) -> Result<Option<Collection>, StorageError> {
        self.load_one(self.collection_key(id)).await
    }

    async fn save_collection(&self, collection: &Collection) -> Result<(), StorageError> {
        let json = encode(&collection.id, &collection.header())?;
        let mut conn = self.connection.clone();
        let _: () = pipe()
            .atomic()
            .set(self.collection_key(&collection.id), json)
            .ignore()
            .cmd("ZADD")
            .arg(self.collections_index())
            .arg("NX")
            .arg(collection.created_at)
            .arg(&collection.id)
            .ignore()
            .query_async(&mut conn)
            .await
            .map_err(map_redis)?;
        Ok(())
    }

    async fn update_collection(&self, collection: &Collection) -> Result<(), StorageError> {
        let json = encode(&collection.id, &collection.header())?;
        self.replace(&self.collection_key(&collection.id), &json).await
    }

    async fn delete_collection(&self, id: &str) -> Result<(), StorageError> {
        let mut conn = self.connection.clone();
        let _: () = pipe()
            .atomic()
            .del(self.collection_key(id))
            .ignore()
            .zrem(self.collections_index(), id)
            .ignore()
            .query_async(&mut conn)
            .await
            .map_err(map_redis)?;
        Ok(())
    }

    async fn get_all_entries(&self) -> Result<Vec<Entry>, StorageError> {
        let mut conn = self.connection.clone();
        let ids: Vec<String> = conn.smembers(self.entries_index()).await.map_err(map_redis)?;
        let keys = ids.iter().map(|id| self.entry_key(id)).collect();
        let mut entries: Vec<Entry> = self.load_many(keys).await?;
        entries.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        Ok(entries)
    }

    async fn get_entry(&self, id: &str) -> Result<Option<Entry>, StorageError> {
        self.load_one(self.entry_key(id)).await
    }

    /// Upsert. An entry saved under a new owner leaves the old owner's index
    /// in the same transaction.
    async fn save_entry(&self, entry: &Entry) -> Result<(), StorageError> {
        let json = encode(&entry.id, entry)?;
        let previous_owner = self
            .get_entry(&entry.id)
            .await?
            .map(|previous| previous.collection_id)
            .filter(|owner| owner != &entry.collection_id);

        let mut pipeline = pipe();
        pipeline
            .atomic()
            .set(self.entry_key(&entry.id), json)
            .ignore()
            .sadd(self.entries_index(), &entry.id)
            .ignore()
            .sadd(self.owner_index(&entry.collection_id), &entry.id)
            .ignore();
        if let Some(owner) = &previous_owner {
            debug!(
                context = "persistence",
                backend = "cloud",
                entry_id = %entry.id,
                from = %owner,
                to = %entry.collection_id,
                "Entry changed owner"
            );
            pipeline.srem(self.owner_index(owner), &entry.id).ignore();
        }

        let mut conn = self.connection.clone();
        let _: () = pipeline.query_async(&mut conn).await.map_err(map_redis)?;
        Ok(())
    }

    async fn update_entry(&self, entry: &Entry) -> Result<(), StorageError> {
        let json = encode(&entry.id, entry)?;
        self.replace(&self.entry_key(&entry.id), &json).await
    }

    async fn delete_entry(&self, id: &str) -> Result<(), StorageError> {
        let Some(entry) = self.get_entry(id).await? else {
            return Ok(());
        };
        let mut conn = self.connection.clone();
        let _: () = pipe()
            .atomic()
            .del(self.entry_key(id))
            .ignore()
            .srem(self.entries_index(), id)
            .ignore()
            .srem(self.owner_index(&entry.collection_id), id)
            .ignore()
            .query_async(&mut conn)
            .await
            .map_err(map_redis)?;
        Ok(())
    }

    async fn get_entries_by_collection(&self, collection_id: &str) -> Result<Vec<Entry>, StorageError> {
        let mut conn = self.connection.clone();
        let ids: Vec<String> = conn.smembers(self.owner_index(collection_id)).await.map_err(map_redis)?;
        let keys = ids.iter().map(|id| self.entry_key(id)).collect();
        let mut entries: Vec<Entry> = self.load_many(keys).await?;
        entries.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        Ok(entries)
    }

    async fn ping(&self) -> Result<(), StorageError> {
        let mut conn = self.connection.clone();
        let _: String = cmd("PING").query_async(&mut conn).await.map_err(map_redis)?;
        Ok(())
    }
}
