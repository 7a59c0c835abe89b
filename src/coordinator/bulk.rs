// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Bulk entry saves with compensating rollback.
//!
//! There is no cross-record transaction in either backend, so a bulk save is
//! a strictly sequential series of single saves. On the first failure every
//! entry already saved by this call is deleted again (best effort) and the
//! original error is returned. A delete that fails during rollback is logged
//! as [`RollbackFailed`] and counted; it never replaces the original error.
//!
//! ```text
//! save e1 ──ok──► save e2 ──ok──► save e3 ──ERR──┐
//!                                                 ▼
//!                             delete e2, delete e1 (logged on failure)
//!                                                 │
//!                                   return e3's original error
//! ```

use tracing::{error, info, warn};

use crate::error::{PersistenceError, Result, RollbackFailed};
use crate::metrics;
use crate::model::Entry;

use super::PersistenceCoordinator;

impl PersistenceCoordinator {
    /// Save `entries` in order, all or (best effort) nothing.
    ///
    /// Every entry is validated before the first write, and every saved entry
    /// is read back once the loop completes; a verification miss rolls the
    /// whole call back too. The loop and its rollback run on their own task:
    /// a caller that gives up waiting never leaves a partial batch behind.
    pub async fn save_entries_bulk(&self, entries: &[Entry]) -> Result<()> {
        for entry in entries {
            entry.validate().map_err(PersistenceError::InvalidData)?;
        }

        let entries = entries.to_vec();
        self.detached("save_entries_bulk", |this| async move {
            this.instrumented("save_entries_bulk", "*", this.save_all(&entries)).await
        })
        .await
    }

    async fn save_all(&self, entries: &[Entry]) -> Result<()> {
        let mut saved: Vec<&str> = Vec::with_capacity(entries.len());

        for entry in entries {
            if let Err(e) = self.store.save_entry(entry).await {
                let err = PersistenceError::write(self.backend, "save_entries_bulk", &entry.id, e);
                self.rollback_entries(&saved, &err).await;
                return Err(err);
            }
            saved.push(&entry.id);
        }

        for id in &saved {
            if let Err(err) = self.verify_entry(id).await {
                self.rollback_entries(&saved, &err).await;
                return Err(err);
            }
        }

        info!(
            context = "persistence",
            backend = %self.backend,
            count = saved.len(),
            "Bulk save completed and verified"
        );
        Ok(())
    }

    /// Delete `saved` in reverse order. Failures are logged, not returned.
    async fn rollback_entries(&self, saved: &[&str], cause: &PersistenceError) {
        if saved.is_empty() {
            return;
        }
        warn!(
            context = "persistence",
            backend = %self.backend,
            count = saved.len(),
            cause = %cause,
            "Rolling back bulk save"
        );

        let mut failed = 0;
        for id in saved.iter().rev() {
            if let Err(e) = self.store.delete_entry(id).await {
                failed += 1;
                let rollback = RollbackFailed {
                    backend: self.backend,
                    entry_id: id.to_string(),
                    reason: e.to_string(),
                };
                error!(context = "persistence", error = %rollback, "Rollback delete failed");
            }
        }
        metrics::record_rollback(self.backend.as_str(), saved.len() - failed, failed);
    }
}
