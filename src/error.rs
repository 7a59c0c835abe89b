// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Errors surfaced to the application layer.

use thiserror::Error;

use crate::model::Backend;
use crate::storage::traits::StorageError;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum PersistenceError {
    /// Backend could not be reached or a read failed
    #[error("{backend} backend unavailable during '{operation}': {reason}")]
    BackendUnavailable {
        backend: Backend,
        operation: &'static str,
        reason: String,
    },

    /// A write was rejected by the backend
    #[error("{backend} write '{operation}' failed for '{id}': {reason}")]
    WriteFailed {
        backend: Backend,
        operation: &'static str,
        id: String,
        reason: String,
    },

    /// Read-back after a write did not find the record
    #[error("verification failed on {backend}: {kind} '{id}' not found after write")]
    VerificationFailed {
        backend: Backend,
        kind: &'static str,
        id: String,
    },

    /// Post-migration counts disagree
    #[error("migration integrity check failed ({phase}): {detail}")]
    MigrationIntegrity { phase: &'static str, detail: String },

    /// No backend configured, or strategy cannot be served
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("{kind} '{id}' not found on {backend}")]
    NotFound {
        backend: Backend,
        kind: &'static str,
        id: String,
    },

    /// Record failed a model invariant before reaching the store
    #[error("invalid data: {0}")]
    InvalidData(String),
}

impl PersistenceError {
    /// Map a store failure on a read path.
    pub fn read(backend: Backend, operation: &'static str, err: StorageError) -> Self {
        Self::BackendUnavailable {
            backend,
            operation,
            reason: err.to_string(),
        }
    }

    /// Map a store failure on a write path.
    pub fn write(backend: Backend, operation: &'static str, id: &str, err: StorageError) -> Self {
        match err {
            StorageError::NotFound => Self::NotFound {
                backend,
                kind: if operation.contains("entry") { "entry" } else { "collection" },
                id: id.to_string(),
            },
            other => Self::WriteFailed {
                backend,
                operation,
                id: id.to_string(),
                reason: other.to_string(),
            },
        }
    }

    /// Short label for metrics.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::BackendUnavailable { .. } => "backend_unavailable",
            Self::WriteFailed { .. } => "write_failed",
            Self::VerificationFailed { .. } => "verification_failed",
            Self::MigrationIntegrity { .. } => "migration_integrity",
            Self::Configuration(_) => "configuration",
            Self::NotFound { .. } => "not_found",
            Self::InvalidData(_) => "invalid_data",
        }
    }

    #[must_use]
    pub fn is_unavailable(&self) -> bool {
        matches!(self, Self::BackendUnavailable { .. })
    }
}

/// A compensating delete that failed during bulk rollback.
///
/// Logged and counted, never returned: the error that triggered the
/// rollback is the one the caller sees.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("rollback of entry '{entry_id}' on {backend} failed: {reason}")]
pub struct RollbackFailed {
    pub backend: Backend,
    pub entry_id: String,
    pub reason: String,
}

pub type Result<T, E = PersistenceError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_maps_not_found() {
        let err = PersistenceError::write(Backend::Local, "update_entry", "e1", StorageError::NotFound);
        assert_eq!(
            err,
            PersistenceError::NotFound { backend: Backend::Local, kind: "entry", id: "e1".into() }
        );
    }

    #[test]
    fn test_write_maps_backend_error() {
        let err = PersistenceError::write(
            Backend::Cloud,
            "save_collection",
            "c1",
            StorageError::Backend("disk full".into()),
        );
        assert_eq!(err.kind(), "write_failed");
        assert!(err.to_string().contains("disk full"));
        assert!(err.to_string().contains("cloud"));
    }

    #[test]
    fn test_read_maps_to_unavailable() {
        let err = PersistenceError::read(Backend::Cloud, "load_all", StorageError::Unavailable("timeout".into()));
        assert!(err.is_unavailable());
    }
}
