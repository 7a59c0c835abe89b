// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Local ⇄ cloud migration.
//!
//! A run moves everything the local store holds into the cloud store and,
//! for mirroring strategies, copies cloud state back down. It is safe to
//! re-run: a second run over an already-migrated pair issues no writes.
//!
//! # Phases
//!
//! ```text
//!            upload()                    │            finish()
//! Planning ─► Uploading ─► VerifyingCloud │ ─┬─► Mirroring ─► VerifyingLocal ─► Completed
//!                                         │  └─► Purging ───► VerifyingLocal ─► Completed
//! ```
//!
//! Local data is not touched until the cloud copy has been written and
//! checked, so a failure in [`upload`](MigrationEngine::upload) leaves the
//! local store exactly as it was. The split lets a caller move readers to
//! cloud before [`finish`](MigrationEngine::finish) starts modifying local.
//! Every write goes through a verifying [`PersistenceCoordinator`]
//! regardless of configuration.

pub(crate) mod plan;
pub mod types;

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Instant;

use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::coordinator::PersistenceCoordinator;
use crate::error::{PersistenceError, Result};
use crate::metrics;
use crate::model::Collection;

use plan::{MigrationPlan, Write};
pub use types::{MigrationOptions, MigrationPhase, MigrationProgress, MigrationReport};

/// A run whose cloud side is written and checked.
///
/// Local data has not been modified yet; hand this back to
/// [`MigrationEngine::finish`] to complete the run.
#[derive(Debug)]
pub struct UploadedMigration {
    plan: MigrationPlan,
    report: MigrationReport,
    progress: MigrationProgress,
    start: Instant,
}

impl UploadedMigration {
    /// Collections `finish` will delete from local.
    #[must_use]
    pub fn pending_purge(&self) -> usize {
        self.plan.purge.len()
    }
}

/// Runs one local → cloud migration.
pub struct MigrationEngine {
    local: PersistenceCoordinator,
    cloud: PersistenceCoordinator,
    options: MigrationOptions,
    progress: Arc<watch::Sender<MigrationProgress>>,
    progress_rx: watch::Receiver<MigrationProgress>,
}

impl MigrationEngine {
    pub fn new(local: PersistenceCoordinator, cloud: PersistenceCoordinator, options: MigrationOptions) -> Self {
        let (tx, rx) = watch::channel(MigrationProgress::idle());
        Self {
            local: local.verified(),
            cloud: cloud.verified(),
            options,
            progress: Arc::new(tx),
            progress_rx: rx,
        }
    }

    /// Publish progress on a channel owned by the caller.
    pub fn with_progress(mut self, progress: Arc<watch::Sender<MigrationProgress>>) -> Self {
        self.progress_rx = progress.subscribe();
        self.progress = progress;
        self
    }

    #[must_use]
    pub fn options(&self) -> MigrationOptions {
        self.options
    }

    #[must_use]
    pub fn progress(&self) -> MigrationProgress {
        *self.progress_rx.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<MigrationProgress> {
        self.progress_rx.clone()
    }

    /// Run every phase. Returns what was written; on error the progress
    /// channel is left in [`MigrationPhase::Failed`].
    pub async fn migrate(&self) -> Result<MigrationReport> {
        let uploaded = self.upload().await?;
        self.finish(uploaded).await
    }

    /// Plan, upload and check the cloud copy. Local is only read.
    ///
    /// The returned [`UploadedMigration`] carries what [`finish`](Self::finish)
    /// still has to do on the local side.
    #[tracing::instrument(skip(self), fields(mirror = self.options.mirror_local, purge = self.options.purge_local_after_upload))]
    pub async fn upload(&self) -> Result<UploadedMigration> {
        let start = Instant::now();
        let mut progress = MigrationProgress::idle();
        self.publish(&mut progress, MigrationPhase::Planning);

        match self.run_upload(&mut progress).await {
            Ok((plan, report)) => Ok(UploadedMigration {
                plan,
                report,
                progress,
                start,
            }),
            Err(e) => Err(self.fail(&mut progress, start, e)),
        }
    }

    /// Mirror winners to local, purge uploaded collections and check the
    /// local side, then publish [`MigrationPhase::Completed`].
    #[tracing::instrument(skip_all, fields(purge = uploaded.plan.purge.len()))]
    pub async fn finish(&self, uploaded: UploadedMigration) -> Result<MigrationReport> {
        let UploadedMigration {
            plan,
            mut report,
            mut progress,
            start,
        } = uploaded;

        if let Err(e) = self.run_local(&plan, &mut report, &mut progress).await {
            return Err(self.fail(&mut progress, start, e));
        }

        report.duration = start.elapsed();
        self.publish(&mut progress, MigrationPhase::Completed);
        metrics::record_migration("success", report.writes, report.conflicts_resolved, report.duration);
        info!(
            context = "migration",
            total = report.total_entities,
            writes = report.writes,
            uploaded = report.collections_uploaded + report.entries_uploaded,
            downloaded = report.collections_downloaded + report.entries_downloaded,
            conflicts = report.conflicts_resolved,
            purged = report.collections_purged,
            duration_ms = report.duration.as_millis() as u64,
            "Migration completed"
        );
        Ok(report)
    }

    fn fail(&self, progress: &mut MigrationProgress, start: Instant, e: PersistenceError) -> PersistenceError {
        let failed_in = progress.phase;
        self.publish(progress, MigrationPhase::Failed);
        metrics::record_migration("failure", 0, 0, start.elapsed());
        error!(
            context = "migration",
            phase = %failed_in,
            processed = progress.processed,
            total = progress.total,
            error = %e,
            "Migration failed"
        );
        e
    }

    async fn run_upload(&self, progress: &mut MigrationProgress) -> Result<(MigrationPlan, MigrationReport)> {
        let local = snapshot(&self.local).await?;
        let cloud = snapshot(&self.cloud).await?;
        let plan = plan::build(&local, &cloud, self.options);

        progress.total = plan.total();
        let mut report = MigrationReport {
            total_entities: plan.total(),
            conflicts_resolved: plan.items.iter().filter(|i| i.conflict).count(),
            ..MigrationReport::default()
        };
        debug!(
            context = "migration",
            total = plan.total(),
            cloud_writes = plan.cloud_writes(),
            local_writes = plan.local_writes(),
            purge = plan.purge.len(),
            "Migration planned"
        );

        self.publish(progress, MigrationPhase::Uploading);
        for item in &plan.items {
            if let Some(write) = &item.cloud {
                apply(&self.cloud, write).await?;
                report.writes += 1;
                match write {
                    Write::Collection(_) => report.collections_uploaded += 1,
                    Write::Entry(_) => report.entries_uploaded += 1,
                }
            }
            if item.local.is_none() {
                self.advance(progress);
            }
        }

        self.publish(progress, MigrationPhase::VerifyingCloud);
        self.check_cloud(&plan).await?;
        Ok((plan, report))
    }

    async fn run_local(
        &self,
        plan: &MigrationPlan,
        report: &mut MigrationReport,
        progress: &mut MigrationProgress,
    ) -> Result<()> {
        if plan.local_writes() > 0 {
            self.publish(progress, MigrationPhase::Mirroring);
            for item in &plan.items {
                if let Some(write) = &item.local {
                    apply(&self.local, write).await?;
                    report.writes += 1;
                    match write {
                        Write::Collection(_) => report.collections_downloaded += 1,
                        Write::Entry(_) => report.entries_downloaded += 1,
                    }
                    self.advance(progress);
                }
            }
        }

        if !plan.purge.is_empty() {
            self.publish(progress, MigrationPhase::Purging);
            for id in &plan.purge {
                self.local.delete_collection(id).await?;
                report.collections_purged += 1;
                report.writes += 1;
            }
        }

        if self.options.mirror_local || !plan.purge.is_empty() {
            self.publish(progress, MigrationPhase::VerifyingLocal);
            self.check_local(plan).await?;
        }
        Ok(())
    }

    /// Every planned collection and entry must now be in the cloud store.
    async fn check_cloud(&self, plan: &MigrationPlan) -> Result<()> {
        let cloud = entry_sets(&snapshot(&self.cloud).await?);

        for expected in &plan.expected {
            let Some(found) = cloud.get(&expected.collection_id) else {
                return Err(integrity("cloud", format!("collection '{}' missing after upload", expected.collection_id)));
            };
            let missing: Vec<&String> = expected.entry_ids.difference(found).collect();
            if !missing.is_empty() {
                return Err(integrity(
                    "cloud",
                    format!(
                        "collection '{}' holds {} of {} expected entries (missing {:?})",
                        expected.collection_id,
                        expected.entry_ids.len() - missing.len(),
                        expected.entry_ids.len(),
                        missing
                    ),
                ));
            }
            if found.len() > expected.entry_ids.len() {
                // Written by another device while this run was in flight.
                warn!(
                    context = "migration",
                    collection_id = %expected.collection_id,
                    expected = expected.entry_ids.len(),
                    found = found.len(),
                    "Cloud holds entries this run did not plan"
                );
            }
        }
        Ok(())
    }

    /// Mirrored collections match cloud; purged collections are gone.
    async fn check_local(&self, plan: &MigrationPlan) -> Result<()> {
        let local = entry_sets(&snapshot(&self.local).await?);

        for id in &plan.purge {
            if local.contains_key(id) {
                return Err(integrity("local", format!("collection '{id}' still present after purge")));
            }
        }
        if !self.options.mirror_local {
            return Ok(());
        }

        let cloud = entry_sets(&snapshot(&self.cloud).await?);
        for expected in &plan.expected {
            let (Some(l), Some(c)) = (local.get(&expected.collection_id), cloud.get(&expected.collection_id)) else {
                return Err(integrity("local", format!("collection '{}' not present on both sides", expected.collection_id)));
            };
            if l.len() != c.len() || !expected.entry_ids.is_subset(l) {
                return Err(integrity(
                    "local",
                    format!(
                        "collection '{}' has {} local and {} cloud entries",
                        expected.collection_id,
                        l.len(),
                        c.len()
                    ),
                ));
            }
        }
        Ok(())
    }

    fn advance(&self, progress: &mut MigrationProgress) {
        progress.processed = (progress.processed + 1).min(progress.total);
        let _ = self.progress.send(*progress);
        metrics::set_migration_progress(progress.ratio());
    }

    fn publish(&self, progress: &mut MigrationProgress, phase: MigrationPhase) {
        progress.phase = phase;
        let _ = self.progress.send(*progress);
        metrics::set_migration_progress(progress.ratio());
        debug!(context = "migration", phase = %phase, processed = progress.processed, total = progress.total, "Migration phase");
    }
}

/// Headers plus entries, failing on any read error.
///
/// Unlike `load_all`, a collection whose entries cannot be read aborts the
/// snapshot: an empty set here would look like "nothing to upload".
async fn snapshot(coordinator: &PersistenceCoordinator) -> Result<Vec<Collection>> {
    let mut collections = coordinator.list_collections().await?;
    for collection in collections.iter_mut() {
        collection.entries = coordinator.get_entries(&collection.id).await?;
    }
    Ok(collections)
}

fn entry_sets(collections: &[Collection]) -> HashMap<String, BTreeSet<String>> {
    collections
        .iter()
        .map(|c| (c.id.clone(), c.entries.iter().map(|e| e.id.clone()).collect()))
        .collect()
}

async fn apply(coordinator: &PersistenceCoordinator, write: &Write) -> Result<()> {
    match write {
        Write::Collection(c) => coordinator.save_collection(c).await,
        Write::Entry(e) => coordinator.save_entry(e).await,
    }
}

fn integrity(phase: &'static str, detail: String) -> PersistenceError {
    PersistenceError::MigrationIntegrity { phase, detail }
}
