// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Backend mode selection.
//!
//! The [`ModeSelector`] decides, per call, which [`PersistenceCoordinator`]
//! is authoritative and forwards the call to it. It owns nothing but that
//! decision (plus a read snapshot for filtered views).
//!
//! # Transitions
//!
//! Authentication changes and strategy changes are serialized by a
//! transition lock. Moving from the local backend to the cloud backend runs a
//! [`MigrationEngine`] first; while it runs:
//! - writes wait on the migration gate (a write landing on local mid-run
//!   would miss the upload, or be purged with its collection)
//! - reads wait too under [`StorageStrategy::Hybrid`], and are served from
//!   the pre-transition backend otherwise
//!
//! Nothing is ever served from a half-migrated backend. Serving flips to
//! cloud once the upload is written and checked; reads still running
//! against local are drained, and only then does the run mirror into or
//! purge the local store.
//!
//! Writes run on their own task holding the gate, so a caller that stops
//! waiting neither cancels the write nor lets a migration start under it.
//!
//! # Hybrid
//!
//! Cloud is authoritative and verified. Successful writes are repeated
//! against local on a best-effort basis; a failed mirror write is logged and
//! counted, never returned.

mod types;

pub use types::{ActiveMode, AuthTransition, StorageStrategy};

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::cache::{FilterCache, FilterCacheStats, FilterSpec};
use crate::coordinator::PersistenceCoordinator;
use crate::error::{PersistenceError, Result};
use crate::metrics;
use crate::migration::{MigrationEngine, MigrationOptions, MigrationProgress, MigrationReport};
use crate::model::{Backend, Collection, Entry};
use crate::resilience::health::{Availability, BackendHealth};

#[derive(Debug, Clone, Copy)]
struct RoutingState {
    strategy: StorageStrategy,
    authenticated: bool,
    initialized: bool,
    /// Backend calls currently go to
    serving: Backend,
}

/// Loaded collection set plus the generation it was loaded under.
struct Snapshot {
    backend: Backend,
    generation: u64,
    loaded_at: Instant,
    collections: Arc<Vec<Collection>>,
}

/// Routes every call to the authoritative backend.
pub struct ModeSelector {
    local: PersistenceCoordinator,
    cloud: Option<PersistenceCoordinator>,
    state: RwLock<RoutingState>,
    mode: watch::Sender<ActiveMode>,
    /// Serializes auth and strategy transitions
    transition_lock: tokio::sync::Mutex<()>,
    /// Held for writing while a migration runs; writes hold an owned read guard
    gate: Arc<tokio::sync::RwLock<()>>,
    /// Held by reads served from local; drained before a migration touches local
    local_readers: tokio::sync::RwLock<()>,
    progress: Arc<watch::Sender<MigrationProgress>>,
    cache: Arc<FilterCache>,
    snapshot: RwLock<Option<Snapshot>>,
    /// Bumped on every invalidation so a slow load cannot store a stale set
    generation: Arc<AtomicU64>,
    local_health: BackendHealth,
    cloud_health: BackendHealth,
    purge_local_after_upload: bool,
    last_migration_error: Mutex<Option<PersistenceError>>,
}

impl std::fmt::Debug for ModeSelector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModeSelector")
            .field("state", &*self.state.read())
            .field("mode", &*self.mode.borrow())
            .field("has_cloud", &self.cloud.is_some())
            .finish()
    }
}

impl ModeSelector {
    /// Build a selector. Fails if `strategy` needs a cloud store and none is given.
    pub fn new(
        local: PersistenceCoordinator,
        cloud: Option<PersistenceCoordinator>,
        strategy: StorageStrategy,
        cache: Arc<FilterCache>,
    ) -> Result<Self> {
        if strategy.requires_cloud() && cloud.is_none() {
            return Err(PersistenceError::Configuration(format!(
                "strategy '{}' requires a cloud store",
                strategy
            )));
        }
        let (mode, _) = watch::channel(ActiveMode::Uninitialized);
        let (progress, _) = watch::channel(MigrationProgress::idle());

        Ok(Self {
            local,
            cloud,
            state: RwLock::new(RoutingState {
                strategy,
                authenticated: false,
                initialized: false,
                serving: Backend::Local,
            }),
            mode,
            transition_lock: tokio::sync::Mutex::new(()),
            gate: Arc::new(tokio::sync::RwLock::new(())),
            local_readers: tokio::sync::RwLock::new(()),
            progress: Arc::new(progress),
            cache,
            snapshot: RwLock::new(None),
            generation: Arc::new(AtomicU64::new(0)),
            local_health: BackendHealth::new(Backend::Local),
            cloud_health: BackendHealth::new(Backend::Cloud),
            purge_local_after_upload: true,
            last_migration_error: Mutex::new(None),
        })
    }

    pub fn with_purge_local_after_upload(mut self, purge: bool) -> Self {
        self.purge_local_after_upload = purge;
        self
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Lifecycle and transitions
    // ═══════════════════════════════════════════════════════════════════════

    /// Set the initial routing decision. Never migrates.
    #[tracing::instrument(skip(self))]
    pub async fn initialize(&self, authenticated: bool) -> Result<()> {
        let _transition = self.transition_lock.lock().await;
        let strategy = self.state.read().strategy;
        let target = strategy.target(authenticated);
        self.require_backend(target, strategy)?;

        {
            let mut state = self.state.write();
            state.authenticated = authenticated;
            state.initialized = true;
            state.serving = target;
        }
        self.invalidate_snapshot();
        self.set_mode(ActiveMode::for_backend(target));
        info!(context = "mode", strategy = %strategy, authenticated, backend = %target, "Mode selector initialized");
        Ok(())
    }

    /// React to an authentication change.
    ///
    /// Returns the migration report when the change moved serving from local
    /// to cloud. A transition that does not change the stored auth state
    /// (including a racing repeat of one already handled) is a no-op.
    pub async fn handle_auth_transition(&self, transition: AuthTransition) -> Result<Option<MigrationReport>> {
        if !transition.is_change() {
            return Ok(None);
        }
        let _transition = self.transition_lock.lock().await;

        let state = self.require_initialized()?;
        if state.authenticated == transition.current {
            debug!(context = "mode", current = transition.current, "Auth transition already applied");
            return Ok(None);
        }

        let target = state.strategy.target(transition.current);
        self.require_backend(target, state.strategy)?;
        self.state.write().authenticated = transition.current;
        info!(
            context = "mode",
            previous = transition.previous,
            current = transition.current,
            from = %state.serving,
            to = %target,
            "Authentication changed"
        );

        self.switch_to(state.serving, target, state.strategy).await
    }

    /// Re-run a migration that failed, if the selector is still waiting on one.
    pub async fn retry_migration(&self) -> Result<Option<MigrationReport>> {
        let _transition = self.transition_lock.lock().await;
        let state = self.require_initialized()?;
        let target = state.strategy.target(state.authenticated);
        if state.serving == Backend::Local && target == Backend::Cloud {
            return self.migrate_to_cloud(state.strategy).await.map(Some);
        }
        Ok(None)
    }

    /// Change strategy at runtime; migrates if this moves serving to cloud.
    pub async fn set_strategy(&self, strategy: StorageStrategy) -> Result<Option<MigrationReport>> {
        let _transition = self.transition_lock.lock().await;
        if strategy.requires_cloud() && self.cloud.is_none() {
            return Err(PersistenceError::Configuration(format!(
                "strategy '{}' requires a cloud store",
                strategy
            )));
        }

        let state = *self.state.read();
        if !state.initialized {
            self.state.write().strategy = strategy;
            return Ok(None);
        }

        let target = strategy.target(state.authenticated);
        self.require_backend(target, strategy)?;
        self.state.write().strategy = strategy;
        info!(context = "mode", from = %state.strategy, to = %strategy, backend = %target, "Storage strategy changed");

        self.switch_to(state.serving, target, strategy).await
    }

    /// Drive transitions from an authentication signal until its sender
    /// drops or `stop` fires. A transition already under way completes first.
    pub async fn listen(&self, mut auth_rx: watch::Receiver<bool>, mut stop: watch::Receiver<bool>) {
        let mut previous = self.state.read().authenticated;
        loop {
            if *stop.borrow_and_update() {
                break;
            }
            let current = *auth_rx.borrow_and_update();
            if current != previous {
                let transition = AuthTransition { previous, current };
                if let Err(e) = self.handle_auth_transition(transition).await {
                    error!(context = "mode", error = %e, current, "Auth transition failed");
                }
                previous = current;
            }
            tokio::select! {
                changed = auth_rx.changed() => {
                    if changed.is_err() {
                        debug!(context = "mode", "Auth signal closed, listener stopping");
                        break;
                    }
                }
                stopped = stop.changed() => {
                    if stopped.is_err() {
                        break;
                    }
                }
            }
        }
        debug!(context = "mode", "Auth listener stopped");
    }

    /// Back to `Uninitialized`; every call fails until `initialize()` again.
    pub async fn shutdown(&self) {
        let _transition = self.transition_lock.lock().await;
        let _gate = self.gate.write().await;
        {
            let mut state = self.state.write();
            state.initialized = false;
            state.authenticated = false;
            state.serving = Backend::Local;
        }
        self.invalidate_snapshot();
        self.cache.clear();
        self.set_mode(ActiveMode::Uninitialized);
        info!(context = "mode", "Mode selector shut down");
    }

    async fn switch_to(&self, from: Backend, to: Backend, strategy: StorageStrategy) -> Result<Option<MigrationReport>> {
        if from == Backend::Local && to == Backend::Cloud {
            return self.migrate_to_cloud(strategy).await.map(Some);
        }
        let _gate = self.gate.write().await;
        self.state.write().serving = to;
        self.invalidate_snapshot();
        self.set_mode(ActiveMode::for_backend(to));
        Ok(None)
    }

    /// Caller holds the transition lock.
    ///
    /// Serving flips to cloud between the engine's upload and finish steps,
    /// so local is never read while it is being mirrored into or purged.
    async fn migrate_to_cloud(&self, strategy: StorageStrategy) -> Result<MigrationReport> {
        let cloud = self.cloud_coordinator()?;
        let _gate = self.gate.write().await;
        self.set_mode(ActiveMode::Migrating);

        let options = MigrationOptions::for_strategy(strategy, self.purge_local_after_upload);
        let engine = MigrationEngine::new(self.local.clone(), cloud, options).with_progress(self.progress.clone());

        let uploaded = match engine.upload().await {
            Ok(uploaded) => uploaded,
            Err(e) => {
                self.state.write().serving = Backend::Local;
                self.invalidate_snapshot();
                self.cache.clear();
                if e.is_unavailable() {
                    self.cloud_health.record_failure(e.to_string());
                }
                *self.last_migration_error.lock() = Some(e.clone());
                self.set_mode(ActiveMode::LocalOnly);
                warn!(context = "mode", error = %e, "Migration failed, staying on local");
                return Err(e);
            }
        };

        self.state.write().serving = Backend::Cloud;
        self.invalidate_snapshot();
        self.cache.clear();
        self.cloud_health.record_success();
        // Reads that resolved to local before the flip finish first
        drop(self.local_readers.write().await);
        debug!(context = "mode", purge = uploaded.pending_purge(), "Serving from cloud, finishing local side");

        let result = engine.finish(uploaded).await;
        self.invalidate_snapshot();
        self.cache.clear();
        self.set_mode(ActiveMode::CloudActive);

        match result {
            Ok(report) => {
                *self.last_migration_error.lock() = None;
                Ok(report)
            }
            Err(e) => {
                *self.last_migration_error.lock() = Some(e.clone());
                warn!(context = "mode", error = %e, "Local side of migration failed, cloud holds every record");
                Err(e)
            }
        }
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Routing
    // ═══════════════════════════════════════════════════════════════════════

    fn require_initialized(&self) -> Result<RoutingState> {
        let state = *self.state.read();
        if !state.initialized {
            return Err(PersistenceError::Configuration(
                "mode selector used before initialize()".into(),
            ));
        }
        Ok(state)
    }

    fn require_backend(&self, backend: Backend, strategy: StorageStrategy) -> Result<()> {
        if backend == Backend::Cloud && self.cloud.is_none() {
            return Err(PersistenceError::Configuration(format!(
                "strategy '{}' resolved to cloud but no cloud store is configured",
                strategy
            )));
        }
        Ok(())
    }

    fn cloud_coordinator(&self) -> Result<PersistenceCoordinator> {
        self.cloud
            .clone()
            .ok_or_else(|| PersistenceError::Configuration("no cloud store configured".into()))
    }

    /// Coordinator for the backend currently serving calls.
    fn resolve(&self) -> Result<PersistenceCoordinator> {
        match self.require_initialized()?.serving {
            Backend::Local => Ok(self.local.clone()),
            Backend::Cloud => self.cloud_coordinator(),
        }
    }

    fn health(&self, backend: Backend) -> &BackendHealth {
        match backend {
            Backend::Local => &self.local_health,
            Backend::Cloud => &self.cloud_health,
        }
    }

    fn observe<T>(&self, backend: Backend, result: &Result<T>) {
        match result {
            Ok(_) => self.health(backend).record_success(),
            Err(e) if e.is_unavailable() => self.health(backend).record_failure(e.to_string()),
            Err(_) => {}
        }
    }

    async fn read<T, F, Fut>(&self, op: F) -> Result<T>
    where
        F: FnOnce(PersistenceCoordinator) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let _gate = if self.state.read().strategy == StorageStrategy::Hybrid {
            Some(self.gate.read().await)
        } else {
            None
        };
        let readers = self.local_readers.read().await;
        let coordinator = self.resolve()?;
        let backend = coordinator.backend();
        let _readers = (backend == Backend::Local).then_some(readers);
        let result = op(coordinator).await;
        self.observe(backend, &result);
        result
    }

    /// Run `op` on the serving backend, then `mirror` on local when Hybrid
    /// is serving from cloud.
    ///
    /// Both run on a spawned task that owns a gate guard: dropping this
    /// future leaves the write (and its mirror) to finish.
    async fn write<F, Fut, M, MFut>(&self, operation: &'static str, op: F, mirror: M) -> Result<()>
    where
        F: FnOnce(PersistenceCoordinator) -> Fut,
        Fut: Future<Output = Result<()>> + Send + 'static,
        M: FnOnce(PersistenceCoordinator) -> MFut + Send + 'static,
        MFut: Future<Output = Result<()>> + Send + 'static,
    {
        let gate = Arc::clone(&self.gate).read_owned().await;
        let state = self.require_initialized()?;
        let coordinator = self.resolve()?;
        let backend = coordinator.backend();
        let mirror_to = (state.strategy.mirrors_local() && backend == Backend::Cloud).then(|| self.local.clone());
        let generation = Arc::clone(&self.generation);
        let write = op(coordinator);

        let task = tokio::spawn(async move {
            let _gate = gate;
            let result = write.await;
            generation.fetch_add(1, Ordering::AcqRel);
            if result.is_ok() {
                if let Some(local) = mirror_to {
                    if let Err(e) = mirror(local).await {
                        metrics::record_error(Backend::Local.as_str(), operation, "mirror_failed");
                        warn!(context = "mode", operation, error = %e, "Hybrid mirror write to local failed");
                    }
                }
            }
            result
        });

        let result = match task.await {
            Ok(result) => result,
            Err(e) => Err(PersistenceError::WriteFailed {
                backend,
                operation,
                id: "*".into(),
                reason: format!("write task did not complete: {e}"),
            }),
        };
        self.observe(backend, &result);
        self.invalidate_snapshot();
        result
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Coordinator surface
    // ═══════════════════════════════════════════════════════════════════════

    /// Every collection with entries, straight from the serving backend.
    pub async fn load_all(&self) -> Result<Vec<Collection>> {
        let generation = self.generation.load(Ordering::Acquire);
        let collections = self.read(|c| async move { c.load_all().await }).await?;
        self.store_snapshot(generation, Arc::new(collections.clone()));
        Ok(collections)
    }

    /// Drop the read snapshot and reload.
    pub async fn force_reload(&self) -> Result<Vec<Collection>> {
        self.invalidate_snapshot();
        let generation = self.generation.load(Ordering::Acquire);
        let collections = self.read(|c| async move { c.force_reload().await }).await?;
        self.store_snapshot(generation, Arc::new(collections.clone()));
        Ok(collections)
    }

    pub async fn get_collection(&self, id: &str) -> Result<Option<Collection>> {
        self.read(|c| async move { c.get_collection(id).await }).await
    }

    pub async fn get_entry(&self, id: &str) -> Result<Option<Entry>> {
        self.read(|c| async move { c.get_entry(id).await }).await
    }

    pub async fn get_entries(&self, collection_id: &str) -> Result<Vec<Entry>> {
        self.read(|c| async move { c.get_entries(collection_id).await }).await
    }

    pub async fn counts(&self) -> Result<(usize, usize)> {
        self.read(|c| async move { c.counts().await }).await
    }

    pub async fn verify_collection(&self, id: &str) -> Result<Collection> {
        self.read(|c| async move { c.verify_collection(id).await }).await
    }

    pub async fn verify_entry(&self, id: &str) -> Result<Entry> {
        self.read(|c| async move { c.verify_entry(id).await }).await
    }

    pub async fn save_collection(&self, collection: &Collection) -> Result<()> {
        let (saved, mirrored) = (collection.clone(), collection.clone());
        self.write(
            "save_collection",
            move |c| async move { c.save_collection(&saved).await },
            move |l| async move { l.save_collection(&mirrored).await },
        )
        .await
    }

    pub async fn update_collection(&self, collection: &Collection) -> Result<()> {
        let (updated, mirrored) = (collection.clone(), collection.clone());
        self.write(
            "update_collection",
            move |c| async move { c.update_collection(&updated).await },
            move |l| async move { l.save_collection(&mirrored).await },
        )
        .await
    }

    pub async fn delete_collection(&self, id: &str) -> Result<()> {
        let (deleted, mirrored) = (id.to_string(), id.to_string());
        self.write(
            "delete_collection",
            move |c| async move { c.delete_collection(&deleted).await },
            move |l| async move { l.delete_collection(&mirrored).await },
        )
        .await
    }

    pub async fn save_entry(&self, entry: &Entry) -> Result<()> {
        let (saved, mirrored) = (entry.clone(), entry.clone());
        self.write(
            "save_entry",
            move |c| async move { c.save_entry(&saved).await },
            move |l| async move { l.save_entry(&mirrored).await },
        )
        .await
    }

    pub async fn update_entry(&self, entry: &Entry) -> Result<()> {
        let (updated, mirrored) = (entry.clone(), entry.clone());
        self.write(
            "update_entry",
            move |c| async move { c.update_entry(&updated).await },
            move |l| async move { l.save_entry(&mirrored).await },
        )
        .await
    }

    pub async fn delete_entry(&self, id: &str) -> Result<()> {
        let (deleted, mirrored) = (id.to_string(), id.to_string());
        self.write(
            "delete_entry",
            move |c| async move { c.delete_entry(&deleted).await },
            move |l| async move { l.delete_entry(&mirrored).await },
        )
        .await
    }

    pub async fn save_entries_bulk(&self, entries: &[Entry]) -> Result<()> {
        let (saved, mirrored) = (entries.to_vec(), entries.to_vec());
        self.write(
            "save_entries_bulk",
            move |c| async move { c.save_entries_bulk(&saved).await },
            move |l| async move { l.save_entries_bulk(&mirrored).await },
        )
        .await
    }

    pub async fn clear_all(&self) -> Result<()> {
        self.write(
            "clear_all",
            |c| async move { c.clear_all().await },
            |l| async move { l.clear_all().await },
        )
        .await
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Filtered views
    // ═══════════════════════════════════════════════════════════════════════

    /// Filtered, sorted view of the serving backend's collections.
    ///
    /// Repeated calls reuse the read snapshot, so an unchanged backend is
    /// not read again until a write, a transition, `force_reload()` or the
    /// cache TTL passes (which picks up writes made by other devices).
    pub async fn filtered(&self, spec: &FilterSpec) -> Result<Arc<Vec<Collection>>> {
        let collections = self.collections_snapshot().await?;
        Ok(self.cache.apply(&collections, spec))
    }

    async fn collections_snapshot(&self) -> Result<Arc<Vec<Collection>>> {
        let serving = self.require_initialized()?.serving;
        let generation = self.generation.load(Ordering::Acquire);
        if let Some(snapshot) = self.snapshot.read().as_ref() {
            if snapshot.backend == serving
                && snapshot.generation == generation
                && snapshot.loaded_at.elapsed() < self.cache.ttl()
            {
                return Ok(snapshot.collections.clone());
            }
        }

        let collections = Arc::new(self.read(|c| async move { c.load_all().await }).await?);
        self.store_snapshot(generation, collections.clone());
        Ok(collections)
    }

    fn store_snapshot(&self, generation: u64, collections: Arc<Vec<Collection>>) {
        let serving = self.state.read().serving;
        let mut snapshot = self.snapshot.write();
        if self.generation.load(Ordering::Acquire) == generation {
            *snapshot = Some(Snapshot {
                backend: serving,
                generation,
                loaded_at: Instant::now(),
                collections,
            });
        }
    }

    fn invalidate_snapshot(&self) {
        self.generation.fetch_add(1, Ordering::AcqRel);
        *self.snapshot.write() = None;
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Observation
    // ═══════════════════════════════════════════════════════════════════════

    fn set_mode(&self, mode: ActiveMode) {
        let previous = self.mode.send_replace(mode);
        if previous != mode {
            metrics::record_mode_transition(&mode.to_string());
            debug!(context = "mode", from = %previous, to = %mode, "Mode changed");
        }
    }

    #[must_use]
    pub fn current_mode(&self) -> ActiveMode {
        *self.mode.borrow()
    }

    #[must_use]
    pub fn current_strategy(&self) -> StorageStrategy {
        self.state.read().strategy
    }

    #[must_use]
    pub fn is_authenticated(&self) -> bool {
        self.state.read().authenticated
    }

    /// Backend calls go to right now, `None` before `initialize()`.
    #[must_use]
    pub fn serving_backend(&self) -> Option<Backend> {
        let state = self.state.read();
        state.initialized.then_some(state.serving)
    }

    pub fn mode_receiver(&self) -> watch::Receiver<ActiveMode> {
        self.mode.subscribe()
    }

    #[must_use]
    pub fn migration_progress(&self) -> MigrationProgress {
        *self.progress.borrow()
    }

    pub fn progress_receiver(&self) -> watch::Receiver<MigrationProgress> {
        self.progress.subscribe()
    }

    #[must_use]
    pub fn availability(&self, backend: Backend) -> Availability {
        self.health(backend).availability()
    }

    pub fn availability_receiver(&self, backend: Backend) -> watch::Receiver<Availability> {
        self.health(backend).subscribe()
    }

    /// Probe every configured store; true if all answered.
    pub async fn check_health(&self) -> bool {
        let local = self.local_health.check(self.local.store().as_ref()).await;
        let cloud = match &self.cloud {
            Some(cloud) => self.cloud_health.check(cloud.store().as_ref()).await,
            None => true,
        };
        local && cloud
    }

    #[must_use]
    pub fn last_migration_error(&self) -> Option<PersistenceError> {
        self.last_migration_error.lock().clone()
    }

    #[must_use]
    pub fn cache_stats(&self) -> FilterCacheStats {
        self.cache.stats()
    }
}
