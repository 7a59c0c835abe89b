// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! # List Sync
//!
//! Dual-backend persistence for a list-management app: an on-device store
//! that always works, and a cloud store used once the user signs in.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                        ModeSelector                         │
//! │  • Resolves the authoritative backend per call             │
//! │  • Auth signal (watch<bool>) drives transitions            │
//! │  • Filtered views via FilterCache                          │
//! └─────────────────────────────────────────────────────────────┘
//!              │                                   │
//!              │                  (Local → Cloud: MigrationEngine)
//!              ▼                                   ▼
//! ┌───────────────────────────┐     ┌───────────────────────────┐
//! │  PersistenceCoordinator   │     │  PersistenceCoordinator   │
//! │  • Write verification     │     │  • Always verified in     │
//! │  • Bulk rollback          │     │    migration              │
//! └───────────────────────────┘     └───────────────────────────┘
//!              │                                   │
//!              ▼                                   ▼
//! ┌───────────────────────────┐     ┌───────────────────────────┐
//! │   Local: SQLite (sqlx)    │     │   Cloud: Redis            │
//! └───────────────────────────┘     └───────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use list_sync::{Collection, Entry, FilterSpec, PersistenceConfig, PersistenceContext, StorageStrategy};
//! use tokio::sync::watch;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), list_sync::PersistenceError> {
//!     let config = PersistenceConfig {
//!         strategy: StorageStrategy::Hybrid,
//!         redis_url: Some("redis://localhost:6379".into()),
//!         ..Default::default()
//!     };
//!
//!     // Flip to `true` when the user signs in
//!     let (auth_tx, auth_rx) = watch::channel(false);
//!     let context = PersistenceContext::initialize(config, auth_rx).await?;
//!     let lists = context.selector();
//!
//!     let groceries = Collection::new("Groceries", "shopping");
//!     lists.save_collection(&groceries).await?;
//!     lists.save_entry(&Entry::new(&groceries.id, "Milk")).await?;
//!
//!     // Signing in uploads everything to the cloud
//!     let _ = auth_tx.send(true);
//!
//!     let shopping = lists.filtered(&FilterSpec::default().of_type("shopping")).await?;
//!     println!("{} shopping lists", shopping.len());
//!
//!     context.teardown().await;
//!     Ok(())
//! }
//! ```
//!
//! ## Strategies
//!
//! | Strategy     | Signed out | Signed in | Local copy kept |
//! |--------------|------------|-----------|-----------------|
//! | `Automatic`  | local      | cloud     | purged (configurable) |
//! | `ForceLocal` | local      | local     | n/a             |
//! | `ForceCloud` | cloud      | cloud     | n/a             |
//! | `Hybrid`     | local      | cloud     | mirrored        |
//!
//! ## Modules
//!
//! - [`context`]: [`PersistenceContext`], startup and teardown
//! - [`mode`]: [`ModeSelector`] and the strategy state machine
//! - [`migration`]: local → cloud reconciliation
//! - [`coordinator`]: verified CRUD over one store
//! - [`storage`]: store backends (SQLite, Redis, memory)
//! - [`cache`]: filter chain and its memoizing cache
//! - [`resilience`]: retry and backend health

pub mod cache;
pub mod config;
pub mod context;
pub mod coordinator;
pub mod error;
pub mod metrics;
pub mod migration;
pub mod mode;
pub mod model;
pub mod resilience;
pub mod storage;

pub use cache::{DateRange, FilterCache, FilterCacheStats, FilterSpec, SortDirection, SortField};
pub use config::PersistenceConfig;
pub use context::PersistenceContext;
pub use coordinator::PersistenceCoordinator;
pub use error::{PersistenceError, Result};
pub use migration::{
    MigrationEngine, MigrationOptions, MigrationPhase, MigrationProgress, MigrationReport, UploadedMigration,
};
pub use mode::{ActiveMode, AuthTransition, ModeSelector, StorageStrategy};
pub use model::{Backend, Collection, Entry, SyncMetadata};
pub use resilience::health::Availability;
pub use resilience::retry::RetryConfig;
pub use storage::memory::InMemoryStore;
pub use storage::redis::RedisStore;
pub use storage::sqlite::SqliteStore;
pub use storage::traits::{StorageError, Store};
pub use metrics::LatencyTimer;
