// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Backend availability tracking.
//!
//! A backend that stops answering is reported as [`Availability::Degraded`]
//! on a watch channel the UI can subscribe to. Nothing here ever swaps in a
//! different store: degraded means "calls are failing", not "calls are going
//! somewhere else".

use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::watch;
use tracing::{info, warn};

use crate::model::Backend;
use crate::storage::traits::Store;
use super::retry::{retry, RetryConfig};

/// Consecutive failures before a backend is reported degraded.
pub const DEGRADED_AFTER_FAILURES: u64 = 1;

/// Observable availability of one backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Availability {
    Available,
    Degraded { reason: String },
}

impl Availability {
    #[must_use]
    pub fn is_available(&self) -> bool {
        matches!(self, Self::Available)
    }
}

impl std::fmt::Display for Availability {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Available => write!(f, "available"),
            Self::Degraded { reason } => write!(f, "degraded ({})", reason),
        }
    }
}

/// Failure counter plus a watch channel per backend.
pub struct BackendHealth {
    backend: Backend,
    failures: AtomicU64,
    tx: watch::Sender<Availability>,
}

impl BackendHealth {
    pub fn new(backend: Backend) -> Self {
        let (tx, _rx) = watch::channel(Availability::Available);
        Self {
            backend,
            failures: AtomicU64::new(0),
            tx,
        }
    }

    pub fn record_success(&self) {
        let previous = self.failures.swap(0, Ordering::AcqRel);
        if previous >= DEGRADED_AFTER_FAILURES {
            info!(backend = %self.backend, "Backend recovered");
            crate::metrics::set_backend_healthy(self.backend.as_str(), true);
        }
        self.tx.send_if_modified(|current| {
            if current.is_available() {
                false
            } else {
                *current = Availability::Available;
                true
            }
        });
    }

    pub fn record_failure(&self, reason: impl Into<String>) {
        let failures = self.failures.fetch_add(1, Ordering::AcqRel) + 1;
        if failures >= DEGRADED_AFTER_FAILURES {
            let reason = reason.into();
            warn!(backend = %self.backend, failures, reason = %reason, "Backend degraded");
            crate::metrics::set_backend_healthy(self.backend.as_str(), false);
            self.tx.send_replace(Availability::Degraded { reason });
        }
    }

    #[must_use]
    pub fn availability(&self) -> Availability {
        self.tx.borrow().clone()
    }

    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<Availability> {
        self.tx.subscribe()
    }

    #[must_use]
    pub fn failure_count(&self) -> u64 {
        self.failures.load(Ordering::Acquire)
    }

    /// Probe the store and update state accordingly.
    pub async fn check(&self, store: &dyn Store) -> bool {
        match retry("health_probe", &RetryConfig::probe(), || store.ping()).await {
            Ok(()) => {
                self.record_success();
                true
            }
            Err(e) => {
                self.record_failure(e.to_string());
                false
            }
        }
    }
}
