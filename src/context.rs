// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Application-lifetime wiring: stores, coordinators, cache, selector.
//!
//! Startup sequence:
//! 1. Validate the configuration
//! 2. Open the local SQLite store (required)
//! 3. Connect the cloud Redis store, if a URL is configured
//! 4. Build coordinators, the filter cache and the mode selector
//! 5. Resolve the initial mode from the current auth value
//! 6. Spawn the auth listener
//!
//! There is no global instance: build one at start, pass it (or its
//! [`ModeSelector`]) to whatever needs persistence, and call
//! [`teardown()`](PersistenceContext::teardown) on the way out.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::cache::FilterCache;
use crate::config::PersistenceConfig;
use crate::coordinator::PersistenceCoordinator;
use crate::error::{PersistenceError, Result};
use crate::metrics;
use crate::mode::ModeSelector;
use crate::model::Backend;
use crate::storage::redis::RedisStore;
use crate::storage::sqlite::SqliteStore;
use crate::storage::traits::Store;

/// Owns the persistence stack for one application run.
pub struct PersistenceContext {
    selector: Arc<ModeSelector>,
    listener: Mutex<Option<JoinHandle<()>>>,
    /// Tells the listener to stop after its current transition
    stop: watch::Sender<bool>,
    /// Kept to close the pool on teardown
    sqlite: Option<Arc<SqliteStore>>,
    torn_down: AtomicBool,
}

impl std::fmt::Debug for PersistenceContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PersistenceContext")
            .field("selector", &self.selector)
            .field("torn_down", &self.torn_down.load(Ordering::Relaxed))
            .finish()
    }
}

impl PersistenceContext {
    /// Connect the configured stores and bring the selector up.
    ///
    /// A missing or unreachable local store is fatal. An unreachable cloud
    /// store is fatal only when the strategy cannot run without it.
    #[tracing::instrument(skip(config, auth_rx), fields(strategy = %config.strategy, has_cloud))]
    pub async fn initialize(config: PersistenceConfig, auth_rx: watch::Receiver<bool>) -> Result<Self> {
        let startup = Instant::now();
        config.validate()?;

        let phase = Instant::now();
        let sqlite = SqliteStore::new(&config.sqlite_url).await.map_err(|e| {
            metrics::record_error("local", "connect", "sqlite");
            PersistenceError::read(Backend::Local, "connect", e)
        })?;
        let sqlite = Arc::new(sqlite);
        metrics::record_startup_phase("local_connect", phase.elapsed());
        info!(context = "persistence", url = %config.sqlite_url, "Local store connected");

        let phase = Instant::now();
        let cloud: Option<Arc<dyn Store>> = match config.redis_url.as_deref() {
            Some(url) => match RedisStore::new(url, &config.redis_prefix).await {
                Ok(store) => {
                    metrics::record_startup_phase("cloud_connect", phase.elapsed());
                    info!(context = "persistence", url, "Cloud store connected");
                    Some(Arc::new(store))
                }
                Err(e) if config.strategy.requires_cloud() => {
                    error!(context = "persistence", url, error = %e, "Cloud store required but unreachable");
                    metrics::record_error("cloud", "connect", "redis");
                    sqlite.close().await;
                    return Err(PersistenceError::read(Backend::Cloud, "connect", e));
                }
                Err(e) => {
                    warn!(context = "persistence", url, error = %e, "Cloud store unreachable, continuing local-only");
                    metrics::record_error("cloud", "connect", "redis");
                    None
                }
            },
            None => None,
        };
        tracing::Span::current().record("has_cloud", cloud.is_some());

        let local: Arc<dyn Store> = sqlite.clone();
        let mut context = match Self::with_stores(local, cloud, &config, auth_rx).await {
            Ok(context) => context,
            Err(e) => {
                sqlite.close().await;
                return Err(e);
            }
        };
        context.sqlite = Some(sqlite);

        metrics::record_startup_phase("total", startup.elapsed());
        info!(
            context = "persistence",
            elapsed_ms = startup.elapsed().as_millis() as u64,
            mode = %context.selector.current_mode(),
            "Persistence ready"
        );
        Ok(context)
    }

    /// Build from already-open stores (tests, embedders with their own stores).
    pub async fn with_stores(
        local: Arc<dyn Store>,
        cloud: Option<Arc<dyn Store>>,
        config: &PersistenceConfig,
        auth_rx: watch::Receiver<bool>,
    ) -> Result<Self> {
        let local = PersistenceCoordinator::new(local, config.verify_writes);
        let cloud = cloud.map(|store| PersistenceCoordinator::new(store, config.verify_writes));
        let cache = Arc::new(
            FilterCache::new(config.cache_ttl(), config.cache_max_entries)
                .with_large_threshold(config.large_collection_threshold),
        );

        let selector = ModeSelector::new(local, cloud, config.strategy, cache)?
            .with_purge_local_after_upload(config.purge_local_after_upload);
        let selector = Arc::new(selector);

        let authenticated = *auth_rx.borrow();
        selector.initialize(authenticated).await?;

        let (stop, stop_rx) = watch::channel(false);
        let listener = {
            let selector = Arc::clone(&selector);
            tokio::spawn(async move { selector.listen(auth_rx, stop_rx).await })
        };

        Ok(Self {
            selector,
            listener: Mutex::new(Some(listener)),
            stop,
            sqlite: None,
            torn_down: AtomicBool::new(false),
        })
    }

    /// The unified persistence API.
    #[must_use]
    pub fn selector(&self) -> &Arc<ModeSelector> {
        &self.selector
    }

    #[must_use]
    pub fn is_torn_down(&self) -> bool {
        self.torn_down.load(Ordering::Acquire)
    }

    /// Stop the auth listener, shut the selector down and close the local
    /// pool. Safe to call more than once.
    ///
    /// A migration the listener is running is allowed to finish; teardown
    /// waits for it rather than cutting it off mid-purge.
    #[tracing::instrument(skip(self))]
    pub async fn teardown(&self) {
        if self.torn_down.swap(true, Ordering::AcqRel) {
            debug!(context = "persistence", "Already torn down");
            return;
        }

        self.stop.send_replace(true);
        let listener = self.listener.lock().take();
        if let Some(handle) = listener {
            if let Err(e) = handle.await {
                warn!(context = "persistence", error = %e, "Auth listener ended abnormally");
            }
        }
        self.selector.shutdown().await;
        if let Some(sqlite) = &self.sqlite {
            sqlite.close().await;
        }
        info!(context = "persistence", "Persistence torn down");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mode::{ActiveMode, StorageStrategy};
    use crate::storage::memory::InMemoryStore;
    use crate::model::Collection;
    use std::time::Duration;

    fn hybrid_config() -> PersistenceConfig {
        PersistenceConfig {
            strategy: StorageStrategy::Hybrid,
            redis_url: Some("redis://unused".into()),
            ..Default::default()
        }
    }

    async fn wait_for_mode(selector: &ModeSelector, mode: ActiveMode) {
        let mut rx = selector.mode_receiver();
        tokio::time::timeout(Duration::from_secs(5), rx.wait_for(|m| *m == mode))
            .await
            .expect("mode change timed out")
            .expect("mode channel closed");
    }

    #[tokio::test]
    async fn test_with_stores_resolves_initial_mode() {
        let (_tx, rx) = watch::channel(false);
        let context = PersistenceContext::with_stores(
            Arc::new(InMemoryStore::local()),
            Some(Arc::new(InMemoryStore::cloud())),
            &PersistenceConfig::default(),
            rx,
        )
        .await
        .unwrap();

        assert_eq!(context.selector().current_mode(), ActiveMode::LocalOnly);
        context.teardown().await;
    }

    #[tokio::test]
    async fn test_listener_migrates_on_sign_in() {
        let local = Arc::new(InMemoryStore::local());
        let cloud = Arc::new(InMemoryStore::cloud());
        let (tx, rx) = watch::channel(false);
        let context = PersistenceContext::with_stores(local.clone(), Some(cloud.clone()), &hybrid_config(), rx)
            .await
            .unwrap();

        context.selector().save_collection(&Collection::new("Groceries", "shopping")).await.unwrap();
        tx.send(true).unwrap();
        wait_for_mode(context.selector(), ActiveMode::CloudActive).await;

        assert_eq!(cloud.collection_count(), 1);
        assert_eq!(local.collection_count(), 1);
        context.teardown().await;
    }

    #[tokio::test]
    async fn test_teardown_is_idempotent() {
        let (_tx, rx) = watch::channel(false);
        let context = PersistenceContext::with_stores(
            Arc::new(InMemoryStore::local()),
            None,
            &PersistenceConfig::default(),
            rx,
        )
        .await
        .unwrap();

        context.teardown().await;
        context.teardown().await;
        assert!(context.is_torn_down());
        assert_eq!(context.selector().current_mode(), ActiveMode::Uninitialized);
        assert!(context.selector().load_all().await.is_err());
    }

    #[tokio::test]
    async fn test_force_cloud_without_store_is_configuration_error() {
        let (_tx, rx) = watch::channel(true);
        let config = PersistenceConfig {
            strategy: StorageStrategy::ForceCloud,
            redis_url: Some("redis://unused".into()),
            ..Default::default()
        };
        let err = PersistenceContext::with_stores(Arc::new(InMemoryStore::local()), None, &config, rx)
            .await
            .unwrap_err();
        assert!(matches!(err, PersistenceError::Configuration(_)));
    }

    #[tokio::test]
    async fn test_initialize_rejects_invalid_config() {
        let (_tx, rx) = watch::channel(false);
        let config = PersistenceConfig {
            cache_max_entries: 0,
            ..Default::default()
        };
        let err = PersistenceContext::initialize(config, rx).await.unwrap_err();
        assert!(matches!(err, PersistenceError::Configuration(_)));
    }

    #[tokio::test]
    async fn test_initialize_with_sqlite_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let url = format!("sqlite:{}?mode=rwc", dir.path().join("lists.db").display());
        let (_tx, rx) = watch::channel(false);
        let config = PersistenceConfig {
            sqlite_url: url,
            ..Default::default()
        };

        let context = PersistenceContext::initialize(config, rx).await.unwrap();
        let list = Collection::new("Work", "tasks");
        context.selector().save_collection(&list).await.unwrap();
        assert_eq!(context.selector().load_all().await.unwrap().len(), 1);
        context.teardown().await;
    }
}
