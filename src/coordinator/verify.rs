// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Post-write verification gate.

use tracing::error;

use crate::error::{PersistenceError, Result};
use crate::metrics;
use crate::model::{Collection, Entry};

use super::PersistenceCoordinator;

impl PersistenceCoordinator {
    /// Read a collection back; `VerificationFailed` if the store lost it.
    pub async fn verify_collection(&self, id: &str) -> Result<Collection> {
        let found = self
            .store
            .get_collection(id)
            .await
            .map_err(|e| PersistenceError::read(self.backend, "verify_collection", e))?;
        found.ok_or_else(|| self.verification_failed("collection", id))
    }

    /// Read an entry back; `VerificationFailed` if the store lost it.
    pub async fn verify_entry(&self, id: &str) -> Result<Entry> {
        let found = self
            .store
            .get_entry(id)
            .await
            .map_err(|e| PersistenceError::read(self.backend, "verify_entry", e))?;
        found.ok_or_else(|| self.verification_failed("entry", id))
    }

    fn verification_failed(&self, kind: &'static str, id: &str) -> PersistenceError {
        metrics::record_verification_failure(self.backend.as_str(), kind);
        error!(
            context = "persistence",
            backend = %self.backend,
            kind,
            id,
            "Write accepted but record missing on read-back"
        );
        PersistenceError::VerificationFailed {
            backend: self.backend,
            kind,
            id: id.to_string(),
        }
    }
}
