// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Public types for local ⇄ cloud migration.

use std::time::Duration;

use crate::mode::StorageStrategy;

/// What a migration run is allowed to do to the local store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MigrationOptions {
    /// Copy cloud-only records down and keep local identical to cloud
    pub mirror_local: bool,
    /// Delete uploaded collections from local afterwards (ignored when mirroring)
    pub purge_local_after_upload: bool,
}

impl MigrationOptions {
    #[must_use]
    pub fn for_strategy(strategy: StorageStrategy, purge_local_after_upload: bool) -> Self {
        let mirror_local = strategy.mirrors_local();
        Self {
            mirror_local,
            purge_local_after_upload: purge_local_after_upload && !mirror_local,
        }
    }

    /// Records present on both sides get the winning copy written locally
    /// unless the local copy is about to be purged anyway.
    #[must_use]
    pub fn corrects_local(&self) -> bool {
        self.mirror_local || !self.purge_local_after_upload
    }
}

impl Default for MigrationOptions {
    fn default() -> Self {
        Self::for_strategy(StorageStrategy::Automatic, true)
    }
}

/// Where a run currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MigrationPhase {
    Idle,
    /// Loading both sides and classifying records
    Planning,
    /// Writing to the cloud store
    Uploading,
    VerifyingCloud,
    /// Writing to the local store
    Mirroring,
    /// Removing uploaded collections from local
    Purging,
    VerifyingLocal,
    Completed,
    Failed,
}

impl std::fmt::Display for MigrationPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Idle => "idle",
            Self::Planning => "planning",
            Self::Uploading => "uploading",
            Self::VerifyingCloud => "verifying_cloud",
            Self::Mirroring => "mirroring",
            Self::Purging => "purging",
            Self::VerifyingLocal => "verifying_local",
            Self::Completed => "completed",
            Self::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Progress of the current (or last) run.
///
/// `total` is fixed when planning finishes; records written elsewhere while
/// the run is in flight are left for the next run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MigrationProgress {
    pub phase: MigrationPhase,
    pub processed: usize,
    pub total: usize,
}

impl MigrationProgress {
    #[must_use]
    pub fn idle() -> Self {
        Self { phase: MigrationPhase::Idle, processed: 0, total: 0 }
    }

    /// processed / total, in [0.0, 1.0]. An empty completed run is 1.0.
    #[must_use]
    pub fn ratio(&self) -> f64 {
        if self.total == 0 {
            return if self.phase == MigrationPhase::Completed { 1.0 } else { 0.0 };
        }
        (self.processed.min(self.total)) as f64 / self.total as f64
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        !matches!(self.phase, MigrationPhase::Idle | MigrationPhase::Completed | MigrationPhase::Failed)
    }
}

impl Default for MigrationProgress {
    fn default() -> Self {
        Self::idle()
    }
}

/// What a finished run did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MigrationReport {
    pub collections_uploaded: usize,
    pub entries_uploaded: usize,
    pub collections_downloaded: usize,
    pub entries_downloaded: usize,
    /// Records present on both sides with differing content
    pub conflicts_resolved: usize,
    pub collections_purged: usize,
    /// Every write issued, purge deletes included
    pub writes: usize,
    /// Entities discovered at planning time
    pub total_entities: usize,
    pub duration: Duration,
}

impl MigrationReport {
    #[must_use]
    pub fn is_noop(&self) -> bool {
        self.writes == 0
    }
}
