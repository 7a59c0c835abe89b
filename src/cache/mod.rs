// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Filter Result Cache
//!
//! Memoizes filtered/sorted views of a collection set.
//!
//! # Keys
//!
//! key = (fingerprint(input), spec). The fingerprint is a SHA-256 over every
//! field of every collection and entry in the input. Timestamps alone are
//! not enough: an update may keep `updated_at` unchanged, and the cached
//! view hands back the records themselves, not just their ids. Stale views
//! are never served; they simply stop being looked up and age out.
//!
//! # Flow
//!
//! ```text
//! apply(collections, spec)
//!       │
//!       ▼
//! ┌──────────────────────────────┐
//! │  key = (fingerprint, spec)   │
//! │  hit and age < TTL?          │
//! └──────────────────────────────┘
//!       │
//!       ├─→ yes → return cached view
//!       │
//!       └─→ no  → run filter chain, cache, return
//! ```
//!
//! Bounded: inserting over the bound first drops expired views, then the
//! oldest ones.

pub mod filter;

use dashmap::DashMap;
use parking_lot::Mutex;
use sha2::{Digest, Sha256};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::metrics;
use crate::model::{now_millis, Collection};

pub use filter::{DateRange, FilterError, FilterSpec, SortDirection, SortField};

pub const DEFAULT_TTL: Duration = Duration::from_secs(300);
pub const DEFAULT_MAX_ENTRIES: usize = 100;
pub const DEFAULT_LARGE_THRESHOLD: usize = 1000;

/// Cache key: (input fingerprint, spec)
type CacheKey = (String, FilterSpec);

#[derive(Clone, Debug)]
struct CacheEntry {
    view: Arc<Vec<Collection>>,
    created_at: Instant,
}

/// Filter cache with TTL expiry and oldest-first eviction.
pub struct FilterCache {
    cache: DashMap<CacheKey, CacheEntry>,
    /// Insertion order for eviction (oldest first)
    order: Mutex<VecDeque<CacheKey>>,
    ttl: Duration,
    max_entries: usize,
    /// Inputs above this size take the search-first path
    large_threshold: usize,
    hits: AtomicU64,
    misses: AtomicU64,
    expired: AtomicU64,
    evictions: AtomicU64,
}

/// Cache statistics
#[derive(Debug, Clone, PartialEq)]
pub struct FilterCacheStats {
    pub hits: u64,
    pub misses: u64,
    /// Lookups that found a view older than the TTL
    pub expired: u64,
    /// Views dropped to stay within the bound
    pub evictions: u64,
    pub entry_count: usize,
    /// Hit rate (0.0 - 1.0)
    pub hit_rate: f64,
}

impl FilterCache {
    pub fn new(ttl: Duration, max_entries: usize) -> Self {
        Self {
            cache: DashMap::new(),
            order: Mutex::new(VecDeque::new()),
            ttl,
            max_entries: max_entries.max(1),
            large_threshold: DEFAULT_LARGE_THRESHOLD,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            expired: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
        }
    }

    pub fn with_large_threshold(mut self, threshold: usize) -> Self {
        self.large_threshold = threshold.max(1);
        self
    }

    /// Filtered + sorted view of `collections`.
    ///
    /// On a filter error the unfiltered input is returned (and not cached).
    pub fn apply(&self, collections: &[Collection], spec: &FilterSpec) -> Arc<Vec<Collection>> {
        let key = (fingerprint(collections), spec.clone());

        if let Some(view) = self.lookup(&key) {
            return view;
        }

        let start = std::time::Instant::now();
        let large = collections.len() > self.large_threshold;
        let result = if large {
            self.large_path(collections, spec)
        } else {
            filter::run(collections, spec, now_millis()).map(|v| (v, true))
        };
        metrics::record_filter_latency(if large { "large" } else { "standard" }, start.elapsed());

        match result {
            Ok((view, cacheable)) => {
                let view: Arc<Vec<Collection>> = Arc::new(view.into_iter().cloned().collect());
                if cacheable {
                    self.insert(key, view.clone());
                } else {
                    debug!(
                        context = "filter_cache",
                        size = view.len(),
                        threshold = self.large_threshold,
                        "Filtered view above threshold, not cached"
                    );
                }
                view
            }
            Err(e) => {
                warn!(context = "filter_cache", error = %e, "Filtering failed, returning unfiltered input");
                Arc::new(collections.to_vec())
            }
        }
    }

    /// Search first; the rest of the chain runs on whatever survives.
    /// Returns whether the result is small enough to cache.
    fn large_path<'a>(
        &self,
        collections: &'a [Collection],
        spec: &FilterSpec,
    ) -> Result<(Vec<&'a Collection>, bool), FilterError> {
        let searched = filter::search(collections.iter().collect(), spec);
        let small = searched.len() <= self.large_threshold;
        debug!(
            context = "filter_cache",
            input = collections.len(),
            after_search = searched.len(),
            "Large input, searched first"
        );
        let refined = filter::refine(searched, spec, now_millis())?;
        Ok((refined, small))
    }

    fn lookup(&self, key: &CacheKey) -> Option<Arc<Vec<Collection>>> {
        if let Some(entry) = self.cache.get(key) {
            if entry.created_at.elapsed() < self.ttl {
                self.hits.fetch_add(1, Ordering::Relaxed);
                metrics::record_filter_cache(true);
                return Some(entry.view.clone());
            }
            self.expired.fetch_add(1, Ordering::Relaxed);
            drop(entry); // Release read lock before removing
            self.cache.remove(key);
            self.order.lock().retain(|k| k != key);
        }

        self.misses.fetch_add(1, Ordering::Relaxed);
        metrics::record_filter_cache(false);
        None
    }

    fn insert(&self, key: CacheKey, view: Arc<Vec<Collection>>) {
        if !self.cache.contains_key(&key) && self.cache.len() >= self.max_entries {
            let mut order = self.order.lock();

            // Expired views first
            let before = order.len();
            order.retain(|k| match self.cache.get(k) {
                Some(entry) if entry.created_at.elapsed() >= self.ttl => {
                    drop(entry);
                    self.cache.remove(k);
                    false
                }
                Some(_) => true,
                None => false,
            });
            let swept = before - order.len();
            if swept > 0 {
                metrics::record_filter_cache_eviction("expired", swept);
            }

            // Then oldest-first down to the bound
            let mut evicted = 0;
            while self.cache.len() >= self.max_entries {
                let Some(old_key) = order.pop_front() else {
                    break;
                };
                if self.cache.remove(&old_key).is_some() {
                    evicted += 1;
                }
            }
            if evicted > 0 {
                self.evictions.fetch_add(evicted as u64, Ordering::Relaxed);
                metrics::record_filter_cache_eviction("capacity", evicted);
            }
        }

        let is_new = self
            .cache
            .insert(key.clone(), CacheEntry { view, created_at: Instant::now() })
            .is_none();
        if is_new {
            self.order.lock().push_back(key);
        }

        let stats = self.stats();
        metrics::set_filter_cache_stats(stats.entry_count, stats.hit_rate);
    }

    /// Get cache statistics
    pub fn stats(&self) -> FilterCacheStats {
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let total = hits + misses;

        FilterCacheStats {
            hits,
            misses,
            expired: self.expired.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            entry_count: self.cache.len(),
            hit_rate: if total > 0 { hits as f64 / total as f64 } else { 0.0 },
        }
    }

    /// Drop every cached view (counters are kept).
    pub fn clear(&self) {
        self.cache.clear();
        self.order.lock().clear();
        metrics::set_filter_cache_stats(0, self.stats().hit_rate);
    }

    #[must_use]
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.cache.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.cache.is_empty()
    }
}

impl Default for FilterCache {
    fn default() -> Self {
        Self::new(DEFAULT_TTL, DEFAULT_MAX_ENTRIES)
    }
}

/// Content-sensitive identity of a collection set (hex SHA-256).
#[must_use]
pub fn fingerprint(collections: &[Collection]) -> String {
    let mut hasher = Sha256::new();
    for c in collections {
        text(&mut hasher, &c.id);
        text(&mut hasher, &c.name);
        optional(&mut hasher, c.description.as_deref());
        text(&mut hasher, &c.list_type);
        hasher.update(c.created_at.to_le_bytes());
        hasher.update(c.updated_at.to_le_bytes());
        hasher.update((c.entry_ids.len() as u64).to_le_bytes());
        for id in &c.entry_ids {
            text(&mut hasher, id);
        }
        hasher.update((c.entries.len() as u64).to_le_bytes());
        for e in &c.entries {
            text(&mut hasher, &e.id);
            text(&mut hasher, &e.collection_id);
            text(&mut hasher, &e.title);
            optional(&mut hasher, e.description.as_deref());
            optional(&mut hasher, e.category.as_deref());
            hasher.update(e.score.to_bits().to_le_bytes());
            hasher.update([u8::from(e.is_completed)]);
            hasher.update(e.completed_at.unwrap_or(i64::MIN).to_le_bytes());
            hasher.update(e.created_at.to_le_bytes());
            hasher.update(e.updated_at.to_le_bytes());
        }
    }
    hex::encode(hasher.finalize())
}

/// Length-prefixed, so adjacent fields cannot run together.
fn text(hasher: &mut Sha256, value: &str) {
    hasher.update((value.len() as u64).to_le_bytes());
    hasher.update(value.as_bytes());
}

fn optional(hasher: &mut Sha256, value: Option<&str>) {
    match value {
        Some(v) => {
            hasher.update([1]);
            text(hasher, v);
        }
        None => hasher.update([0]),
    }
}
