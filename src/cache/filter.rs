// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Filter settings and the fixed filter chain.
//!
//! ```text
//! text search ─► type ─► completion visibility ─► date range ─► sort
//! ```
//!
//! Steps run most-discriminating first so the later (and more expensive)
//! steps see as few collections as possible.

use std::cmp::Ordering;

use thiserror::Error;

use crate::model::Collection;

const DAY_MS: i64 = 24 * 60 * 60 * 1000;

/// Rolling window over `created_at`, relative to now.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum DateRange {
    #[default]
    All,
    /// Last 24 hours
    Today,
    /// Last 7 days
    Week,
    /// Last 30 days
    Month,
    /// Last 365 days
    Year,
}

impl DateRange {
    fn window_ms(&self) -> Option<i64> {
        match self {
            Self::All => None,
            Self::Today => Some(DAY_MS),
            Self::Week => Some(7 * DAY_MS),
            Self::Month => Some(30 * DAY_MS),
            Self::Year => Some(365 * DAY_MS),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum SortField {
    Name,
    #[default]
    Created,
    CompletionRatio,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum SortDirection {
    Ascending,
    #[default]
    Descending,
}

/// What to show and in which order. Part of the cache key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FilterSpec {
    /// Case-insensitive substring over name, description and entry titles
    pub search_text: Option<String>,
    /// Exact `list_type` match (case-insensitive)
    pub type_filter: Option<String>,
    /// Keep collections whose entries are all completed
    pub show_completed: bool,
    /// Keep collections that are empty or have open entries
    pub show_in_progress: bool,
    pub date_range: DateRange,
    pub sort_field: SortField,
    pub sort_direction: SortDirection,
}

impl Default for FilterSpec {
    fn default() -> Self {
        Self {
            search_text: None,
            type_filter: None,
            show_completed: true,
            show_in_progress: true,
            date_range: DateRange::All,
            sort_field: SortField::default(),
            sort_direction: SortDirection::default(),
        }
    }
}

impl FilterSpec {
    pub fn search(mut self, text: impl Into<String>) -> Self {
        self.search_text = Some(text.into());
        self
    }

    pub fn of_type(mut self, list_type: impl Into<String>) -> Self {
        self.type_filter = Some(list_type.into());
        self
    }

    pub fn completion(mut self, show_completed: bool, show_in_progress: bool) -> Self {
        self.show_completed = show_completed;
        self.show_in_progress = show_in_progress;
        self
    }

    pub fn within(mut self, range: DateRange) -> Self {
        self.date_range = range;
        self
    }

    pub fn sorted_by(mut self, field: SortField, direction: SortDirection) -> Self {
        self.sort_field = field;
        self.sort_direction = direction;
        self
    }

    /// Lowercased, trimmed search needle; `None` when there is nothing to match.
    fn needle(&self) -> Option<String> {
        self.search_text
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_lowercase)
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum FilterError {
    #[error("date window {range:?} underflows at now={now}")]
    DateWindow { range: DateRange, now: i64 },

    /// Completion and ratios would count another collection's entry
    /// (e.g. a stale owner index on the backend)
    #[error("collection '{collection_id}' holds entry '{entry_id}' owned by another collection")]
    ForeignEntry { collection_id: String, entry_id: String },
}

/// Text search step.
pub fn search<'a>(collections: Vec<&'a Collection>, spec: &FilterSpec) -> Vec<&'a Collection> {
    let Some(needle) = spec.needle() else {
        return collections;
    };
    collections
        .into_iter()
        .filter(|c| matches_text(c, &needle))
        .collect()
}

fn matches_text(collection: &Collection, needle: &str) -> bool {
    collection.name.to_lowercase().contains(needle)
        || collection
            .description
            .as_deref()
            .is_some_and(|d| d.to_lowercase().contains(needle))
        || collection
            .entries
            .iter()
            .any(|e| e.title.to_lowercase().contains(needle))
}

/// Type, completion, date and sort steps, on an already searched set.
pub fn refine<'a>(
    collections: Vec<&'a Collection>,
    spec: &FilterSpec,
    now: i64,
) -> Result<Vec<&'a Collection>, FilterError> {
    check_owners(&collections)?;
    let mut out: Vec<&Collection> = collections
        .into_iter()
        .filter(|c| match &spec.type_filter {
            Some(t) => c.list_type.eq_ignore_ascii_case(t),
            None => true,
        })
        .filter(|c| {
            if c.is_fully_completed() {
                spec.show_completed
            } else {
                spec.show_in_progress
            }
        })
        .collect();

    if let Some(window) = spec.date_range.window_ms() {
        let since = now.checked_sub(window).ok_or(FilterError::DateWindow {
            range: spec.date_range,
            now,
        })?;
        out.retain(|c| c.created_at >= since);
    }

    sort(&mut out, spec.sort_field, spec.sort_direction);
    Ok(out)
}

fn check_owners(collections: &[&Collection]) -> Result<(), FilterError> {
    for c in collections {
        if let Some(e) = c.entries.iter().find(|e| e.collection_id != c.id) {
            return Err(FilterError::ForeignEntry {
                collection_id: c.id.clone(),
                entry_id: e.id.clone(),
            });
        }
    }
    Ok(())
}

/// The whole chain.
pub fn run<'a>(collections: &'a [Collection], spec: &FilterSpec, now: i64) -> Result<Vec<&'a Collection>, FilterError> {
    refine(search(collections.iter().collect(), spec), spec, now)
}

fn sort(collections: &mut [&Collection], field: SortField, direction: SortDirection) {
    collections.sort_by(|a, b| {
        let primary = compare(a, b, field);
        let primary = match direction {
            SortDirection::Ascending => primary,
            SortDirection::Descending => primary.reverse(),
        };
        primary.then_with(|| a.id.cmp(&b.id))
    });
}

/// Primary ordering for `field`, ascending.
pub fn compare(a: &Collection, b: &Collection, field: SortField) -> Ordering {
    match field {
        SortField::Name => a.name.to_lowercase().cmp(&b.name.to_lowercase()),
        SortField::Created => a.created_at.cmp(&b.created_at),
        SortField::CompletionRatio => a.completion_ratio().total_cmp(&b.completion_ratio()),
    }
}
