// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Collection and entry data structures.
//!
//! A [`Collection`] is a user-created list; an [`Entry`] is one item in it.
//! Both carry epoch-millisecond timestamps, which is what every store
//! persists and what last-writer-wins conflict resolution compares.
//!
//! # Example
//!
//! ```
//! use list_sync::{Collection, Entry};
//!
//! let list = Collection::new("Groceries", "shopping");
//! let mut milk = Entry::new(&list.id, "Milk");
//! assert!(!milk.is_completed);
//!
//! milk.complete();
//! assert!(milk.is_completed);
//! assert!(milk.completed_at.is_some());
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;

/// Current wall-clock time as epoch millis.
#[must_use]
pub fn now_millis() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64
}

/// The two interchangeable storage backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Backend {
    /// On-device embedded store (offline-first)
    Local,
    /// Remote multi-device service
    Cloud,
}

impl Backend {
    /// Label used in logs and metrics.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Local => "local",
            Self::Cloud => "cloud",
        }
    }
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A named, user-created grouping of entries (a "list").
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Collection {
    /// Immutable once created
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Free-form type tag ("shopping", "movies", "tasks", ...)
    pub list_type: String,
    pub created_at: i64,
    /// Never moves backwards, see [`Collection::touch`]
    pub updated_at: i64,
    /// Ordered entry references
    #[serde(default)]
    pub entry_ids: Vec<String>,
    /// Populated by `load_all()`; never persisted with the collection row
    #[serde(skip)]
    pub entries: Vec<Entry>,
}

impl Collection {
    pub fn new(name: impl Into<String>, list_type: impl Into<String>) -> Self {
        let now = now_millis();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            name: name.into(),
            description: None,
            list_type: list_type.into(),
            created_at: now,
            updated_at: now,
            entry_ids: Vec::new(),
            entries: Vec::new(),
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_timestamps(mut self, created_at: i64, updated_at: i64) -> Self {
        self.created_at = created_at;
        self.updated_at = updated_at.max(created_at);
        self
    }

    /// Attach entries (and their ids, in order).
    pub fn with_entries(mut self, entries: Vec<Entry>) -> Self {
        self.entry_ids = entries.iter().map(|e| e.id.clone()).collect();
        self.entries = entries;
        self
    }

    /// Bump `updated_at` to now without ever moving it backwards.
    pub fn touch(&mut self) {
        self.updated_at = self.updated_at.max(now_millis());
    }

    pub fn rename(&mut self, name: impl Into<String>) {
        self.name = name.into();
        self.touch();
    }

    /// Add an entry reference if not already present.
    pub fn add_entry_id(&mut self, entry_id: impl Into<String>) {
        let entry_id = entry_id.into();
        if !self.entry_ids.contains(&entry_id) {
            self.entry_ids.push(entry_id);
            self.touch();
        }
    }

    pub fn remove_entry_id(&mut self, entry_id: &str) {
        let before = self.entry_ids.len();
        self.entry_ids.retain(|id| id != entry_id);
        if self.entry_ids.len() != before {
            self.touch();
        }
    }

    /// Number of completed entries over total entries (0.0 when empty).
    #[must_use]
    pub fn completion_ratio(&self) -> f64 {
        if self.entries.is_empty() {
            return 0.0;
        }
        let done = self.entries.iter().filter(|e| e.is_completed).count();
        done as f64 / self.entries.len() as f64
    }

    /// True when the collection has entries and every one is completed.
    #[must_use]
    pub fn is_fully_completed(&self) -> bool {
        !self.entries.is_empty() && self.entries.iter().all(|e| e.is_completed)
    }

    /// Header equality: every persisted field except the transient entries.
    #[must_use]
    pub fn same_header(&self, other: &Collection) -> bool {
        self.id == other.id
            && self.name == other.name
            && self.description == other.description
            && self.list_type == other.list_type
            && self.created_at == other.created_at
            && self.updated_at == other.updated_at
            && self.entry_ids == other.entry_ids
    }

    /// Copy without the transient entries, as stores persist it.
    #[must_use]
    pub fn header(&self) -> Collection {
        Collection {
            entries: Vec::new(),
            ..self.clone()
        }
    }
}

/// A single item belonging to a collection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entry {
    pub id: String,
    /// Owning collection (immutable)
    pub collection_id: String,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Ranking score (ELO-style, defaults to 1200)
    pub score: f64,
    pub is_completed: bool,
    pub created_at: i64,
    pub updated_at: i64,
    /// Set iff `is_completed`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
}

pub const DEFAULT_SCORE: f64 = 1200.0;

impl Entry {
    pub fn new(collection_id: impl Into<String>, title: impl Into<String>) -> Self {
        let now = now_millis();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            collection_id: collection_id.into(),
            title: title.into(),
            description: None,
            score: DEFAULT_SCORE,
            is_completed: false,
            created_at: now,
            updated_at: now,
            completed_at: None,
            category: None,
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = Some(category.into());
        self
    }

    pub fn with_score(mut self, score: f64) -> Self {
        self.score = score;
        self
    }

    pub fn with_updated_at(mut self, updated_at: i64) -> Self {
        self.updated_at = updated_at;
        self
    }

    /// Mark completed, keeping the flag and the timestamp in lockstep.
    pub fn complete(&mut self) {
        let now = now_millis().max(self.updated_at);
        self.is_completed = true;
        self.completed_at = Some(now);
        self.updated_at = now;
    }

    pub fn reopen(&mut self) {
        self.is_completed = false;
        self.completed_at = None;
        self.updated_at = now_millis().max(self.updated_at);
    }

    /// Builder form of [`Entry::complete`] for fixtures.
    pub fn completed(mut self) -> Self {
        self.complete();
        self
    }

    /// Check the completion invariant.
    pub fn validate(&self) -> Result<(), String> {
        if self.is_completed != self.completed_at.is_some() {
            return Err(format!(
                "entry '{}': is_completed={} but completed_at={:?}",
                self.id, self.is_completed, self.completed_at
            ));
        }
        if self.collection_id.is_empty() {
            return Err(format!("entry '{}' has no owning collection", self.id));
        }
        Ok(())
    }
}

/// Per-record sync bookkeeping, derived on demand by the migration engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncMetadata {
    /// Backend the record was read from
    pub origin: Backend,
    /// Last-modified timestamp (epoch millis)
    pub last_modified: i64,
    /// Whether the record still has to reach the other backend
    pub pending_sync: bool,
}

impl SyncMetadata {
    #[must_use]
    pub fn for_collection(collection: &Collection, origin: Backend, pending_sync: bool) -> Self {
        Self {
            origin,
            last_modified: collection.updated_at,
            pending_sync,
        }
    }

    #[must_use]
    pub fn for_entry(entry: &Entry, origin: Backend, pending_sync: bool) -> Self {
        Self {
            origin,
            last_modified: entry.updated_at,
            pending_sync,
        }
    }

    /// Last-writer-wins against `other`; equal timestamps go to the cloud copy.
    #[must_use]
    pub fn wins_over(&self, other: &SyncMetadata) -> bool {
        match self.last_modified.cmp(&other.last_modified) {
            std::cmp::Ordering::Greater => true,
            std::cmp::Ordering::Less => false,
            std::cmp::Ordering::Equal => self.origin == Backend::Cloud,
        }
    }
}
