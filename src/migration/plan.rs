// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Migration planning: classify every record and decide who writes what.
//!
//! Planning is pure: it takes full snapshots of both stores and produces an
//! ordered list of [`EntityPlan`]s, one per discovered collection or entry.
//!
//! | present on    | cloud write         | local write                     |
//! |---------------|---------------------|---------------------------------|
//! | local only    | upload              | -                               |
//! | cloud only    | -                   | download when mirroring         |
//! | both, equal   | -                   | -                               |
//! | both, differ  | if local wins (LWW) | if cloud wins and local is kept |
//!
//! Conflicting collection headers additionally merge their entry references:
//! the winner's order first, then whatever only the loser referenced.
//! Timestamps are never bumped by planning, so a second plan over the
//! result of the first contains no writes.

use std::collections::{BTreeSet, HashMap, HashSet};

use crate::model::{Backend, Collection, Entry, SyncMetadata};

use super::types::MigrationOptions;

/// A record to write to one side.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Write {
    Collection(Collection),
    Entry(Entry),
}

/// What happens to one discovered record.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct EntityPlan {
    pub id: String,
    pub cloud: Option<Write>,
    pub local: Option<Write>,
    /// Present on both sides with differing content
    pub conflict: bool,
}

impl EntityPlan {
    fn new(id: &str) -> Self {
        Self {
            id: id.to_string(),
            cloud: None,
            local: None,
            conflict: false,
        }
    }
}

/// Entry ids a collection must hold once the run finishes.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Expected {
    pub collection_id: String,
    pub entry_ids: BTreeSet<String>,
}

#[derive(Debug, Clone, Default)]
pub(crate) struct MigrationPlan {
    /// Headers before their entries, local discovery order first
    pub items: Vec<EntityPlan>,
    pub expected: Vec<Expected>,
    /// Local collections to delete once cloud integrity is confirmed
    pub purge: Vec<String>,
}

impl MigrationPlan {
    pub fn total(&self) -> usize {
        self.items.len()
    }

    pub fn cloud_writes(&self) -> usize {
        self.items.iter().filter(|i| i.cloud.is_some()).count()
    }

    pub fn local_writes(&self) -> usize {
        self.items.iter().filter(|i| i.local.is_some()).count()
    }
}

/// Build a plan from full snapshots (`entries` populated on every collection).
pub(crate) fn build(local: &[Collection], cloud: &[Collection], options: MigrationOptions) -> MigrationPlan {
    let cloud_by_id: HashMap<&str, &Collection> = cloud.iter().map(|c| (c.id.as_str(), c)).collect();
    let local_ids: HashSet<&str> = local.iter().map(|c| c.id.as_str()).collect();

    let mut plan = MigrationPlan::default();

    for l in local {
        match cloud_by_id.get(l.id.as_str()) {
            None => plan_local_only(&mut plan, l),
            Some(c) => plan_both(&mut plan, l, c, options),
        }
        if options.purge_local_after_upload {
            plan.purge.push(l.id.clone());
        }
    }
    for c in cloud.iter().filter(|c| !local_ids.contains(c.id.as_str())) {
        plan_cloud_only(&mut plan, c, options);
    }
    plan
}

fn plan_local_only(plan: &mut MigrationPlan, local: &Collection) {
    let mut header = EntityPlan::new(&local.id);
    header.cloud = Some(Write::Collection(local.header()));
    plan.items.push(header);

    for entry in &local.entries {
        let mut item = EntityPlan::new(&entry.id);
        item.cloud = Some(Write::Entry(entry.clone()));
        plan.items.push(item);
    }
    plan.expected.push(Expected {
        collection_id: local.id.clone(),
        entry_ids: local.entries.iter().map(|e| e.id.clone()).collect(),
    });
}

fn plan_cloud_only(plan: &mut MigrationPlan, cloud: &Collection, options: MigrationOptions) {
    let mut header = EntityPlan::new(&cloud.id);
    if options.mirror_local {
        header.local = Some(Write::Collection(cloud.header()));
    }
    plan.items.push(header);

    for entry in &cloud.entries {
        let mut item = EntityPlan::new(&entry.id);
        if options.mirror_local {
            item.local = Some(Write::Entry(entry.clone()));
        }
        plan.items.push(item);
    }
    plan.expected.push(Expected {
        collection_id: cloud.id.clone(),
        entry_ids: cloud.entries.iter().map(|e| e.id.clone()).collect(),
    });
}

fn plan_both(plan: &mut MigrationPlan, local: &Collection, cloud: &Collection, options: MigrationOptions) {
    let merged = merge_headers(local, cloud);
    let mut header = EntityPlan::new(&local.id);
    header.conflict = !local.same_header(cloud);
    if !merged.same_header(cloud) {
        header.cloud = Some(Write::Collection(merged.clone()));
    }
    if options.corrects_local() && !merged.same_header(local) {
        header.local = Some(Write::Collection(merged));
    }
    plan.items.push(header);

    let cloud_entries: HashMap<&str, &Entry> = cloud.entries.iter().map(|e| (e.id.as_str(), e)).collect();
    let mut seen: HashSet<&str> = HashSet::new();

    for le in &local.entries {
        seen.insert(le.id.as_str());
        let mut item = EntityPlan::new(&le.id);
        match cloud_entries.get(le.id.as_str()) {
            None => item.cloud = Some(Write::Entry(le.clone())),
            Some(ce) if *ce == le => {}
            Some(ce) => {
                item.conflict = true;
                if local_wins_entry(le, ce) {
                    item.cloud = Some(Write::Entry(le.clone()));
                } else if options.corrects_local() {
                    item.local = Some(Write::Entry((*ce).clone()));
                }
            }
        }
        plan.items.push(item);
    }

    for ce in cloud.entries.iter().filter(|e| !seen.contains(e.id.as_str())) {
        let mut item = EntityPlan::new(&ce.id);
        if options.mirror_local {
            item.local = Some(Write::Entry(ce.clone()));
        }
        plan.items.push(item);
    }

    let entry_ids = local
        .entries
        .iter()
        .chain(cloud.entries.iter())
        .map(|e| e.id.clone())
        .collect();
    plan.expected.push(Expected {
        collection_id: local.id.clone(),
        entry_ids,
    });
}

fn local_wins_entry(local: &Entry, cloud: &Entry) -> bool {
    SyncMetadata::for_entry(local, Backend::Local, true).wins_over(&SyncMetadata::for_entry(cloud, Backend::Cloud, false))
}

/// LWW on the header fields, union on the entry references.
pub(crate) fn merge_headers(local: &Collection, cloud: &Collection) -> Collection {
    let local_wins = SyncMetadata::for_collection(local, Backend::Local, true)
        .wins_over(&SyncMetadata::for_collection(cloud, Backend::Cloud, false));
    let (winner, loser) = if local_wins { (local, cloud) } else { (cloud, local) };

    let mut merged = winner.header();
    for id in &loser.entry_ids {
        if !merged.entry_ids.contains(id) {
            merged.entry_ids.push(id.clone());
        }
    }
    merged
}
