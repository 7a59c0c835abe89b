// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Configuration for the persistence layer.
//!
//! # Example
//!
//! ```
//! use list_sync::{PersistenceConfig, StorageStrategy};
//!
//! // Offline-only app: defaults are enough
//! let config = PersistenceConfig::default();
//! assert_eq!(config.strategy, StorageStrategy::Automatic);
//! assert_eq!(config.cache_ttl_secs, 300);
//!
//! // Signed-in sync with a local mirror
//! let config = PersistenceConfig {
//!     strategy: StorageStrategy::Hybrid,
//!     redis_url: Some("redis://sync.example.com:6379".into()),
//!     ..Default::default()
//! };
//! assert!(config.validate().is_ok());
//! ```

use serde::Deserialize;
use std::time::Duration;

use crate::error::PersistenceError;
use crate::mode::StorageStrategy;

/// Configuration for the persistence layer.
///
/// All fields have defaults. A cloud URL is only required by strategies
/// that can route to the cloud.
#[derive(Debug, Clone, Deserialize)]
pub struct PersistenceConfig {
    /// Backend selection strategy
    #[serde(default)]
    pub strategy: StorageStrategy,

    /// Local SQLite connection string (e.g., "sqlite:lists.db?mode=rwc")
    #[serde(default = "default_sqlite_url")]
    pub sqlite_url: String,

    /// Cloud Redis connection string (e.g., "redis://host:6379")
    #[serde(default)]
    pub redis_url: Option<String>,

    /// Key prefix for the cloud store, usually per user ("user:42:")
    #[serde(default = "default_redis_prefix")]
    pub redis_prefix: String,

    /// Read every write back before reporting success
    #[serde(default = "default_verify_writes")]
    pub verify_writes: bool,

    /// Filter cache entry lifetime in seconds
    #[serde(default = "default_cache_ttl_secs")]
    pub cache_ttl_secs: u64,

    /// Filter cache bound
    #[serde(default = "default_cache_max_entries")]
    pub cache_max_entries: usize,

    /// Inputs above this many collections take the search-first path
    #[serde(default = "default_large_collection_threshold")]
    pub large_collection_threshold: usize,

    /// After a sign-in migration in a non-mirroring strategy, remove the
    /// uploaded collections from the local store
    #[serde(default = "default_purge_local_after_upload")]
    pub purge_local_after_upload: bool,
}

fn default_sqlite_url() -> String { "sqlite:list_sync.db?mode=rwc".to_string() }
fn default_redis_prefix() -> String { "list_sync:".to_string() }
fn default_verify_writes() -> bool { true }
fn default_cache_ttl_secs() -> u64 { 300 } // 5 minutes
fn default_cache_max_entries() -> usize { 100 }
fn default_large_collection_threshold() -> usize { 1000 }
fn default_purge_local_after_upload() -> bool { true }

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            strategy: StorageStrategy::default(),
            sqlite_url: default_sqlite_url(),
            redis_url: None,
            redis_prefix: default_redis_prefix(),
            verify_writes: default_verify_writes(),
            cache_ttl_secs: default_cache_ttl_secs(),
            cache_max_entries: default_cache_max_entries(),
            large_collection_threshold: default_large_collection_threshold(),
            purge_local_after_upload: default_purge_local_after_upload(),
        }
    }
}

impl PersistenceConfig {
    /// Parse from JSON (settings file or remote config payload).
    pub fn from_json(json: &str) -> Result<Self, PersistenceError> {
        let config: Self = serde_json::from_str(json)
            .map_err(|e| PersistenceError::Configuration(format!("invalid config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    #[must_use]
    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }

    /// Reject configurations that cannot serve their strategy.
    pub fn validate(&self) -> Result<(), PersistenceError> {
        if self.strategy.requires_cloud() && self.redis_url.is_none() {
            return Err(PersistenceError::Configuration(format!(
                "strategy '{}' needs a cloud store but redis_url is not set",
                self.strategy
            )));
        }
        if self.sqlite_url.is_empty() {
            return Err(PersistenceError::Configuration("sqlite_url is empty".into()));
        }
        if self.cache_max_entries == 0 {
            return Err(PersistenceError::Configuration("cache_max_entries must be > 0".into()));
        }
        if self.large_collection_threshold == 0 {
            return Err(PersistenceError::Configuration(
                "large_collection_threshold must be > 0".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = PersistenceConfig::default();
        assert_eq!(config.cache_ttl(), Duration::from_secs(300));
        assert_eq!(config.cache_max_entries, 100);
        assert_eq!(config.large_collection_threshold, 1000);
        assert!(config.verify_writes);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_from_json_partial() {
        let config = PersistenceConfig::from_json(
            r#"{"strategy": "force_local", "cache_ttl_secs": 60}"#,
        )
        .unwrap();
        assert_eq!(config.strategy, StorageStrategy::ForceLocal);
        assert_eq!(config.cache_ttl_secs, 60);
        assert_eq!(config.cache_max_entries, 100);
    }

    #[test]
    fn test_force_cloud_requires_url() {
        let config = PersistenceConfig {
            strategy: StorageStrategy::ForceCloud,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(PersistenceError::Configuration(_))));
    }

    #[test]
    fn test_invalid_json() {
        let err = PersistenceConfig::from_json("{ not json").unwrap_err();
        assert!(err.to_string().contains("invalid config"));
    }

    #[test]
    fn test_unknown_strategy_rejected() {
        assert!(PersistenceConfig::from_json(r#"{"strategy": "sometimes"}"#).is_err());
    }
}
