// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Public types for backend mode selection.

use serde::Deserialize;

use crate::model::Backend;

/// How the authoritative backend is chosen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StorageStrategy {
    /// Cloud when authenticated, local otherwise
    #[default]
    Automatic,
    /// Always local, whatever the authentication state
    ForceLocal,
    /// Always cloud
    ForceCloud,
    /// Cloud authoritative when authenticated, mirrored to local
    Hybrid,
}

impl StorageStrategy {
    /// Backend that should serve calls for this strategy.
    #[must_use]
    pub fn target(&self, authenticated: bool) -> Backend {
        match self {
            Self::Automatic | Self::Hybrid => {
                if authenticated {
                    Backend::Cloud
                } else {
                    Backend::Local
                }
            }
            Self::ForceLocal => Backend::Local,
            Self::ForceCloud => Backend::Cloud,
        }
    }

    /// Strategies that cannot run without a cloud store.
    #[must_use]
    pub fn requires_cloud(&self) -> bool {
        matches!(self, Self::ForceCloud | Self::Hybrid)
    }

    /// Whether cloud state is copied down to the local store.
    #[must_use]
    pub fn mirrors_local(&self) -> bool {
        matches!(self, Self::Hybrid)
    }
}

impl std::fmt::Display for StorageStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Automatic => write!(f, "automatic"),
            Self::ForceLocal => write!(f, "force_local"),
            Self::ForceCloud => write!(f, "force_cloud"),
            Self::Hybrid => write!(f, "hybrid"),
        }
    }
}

/// Per-session routing state.
///
/// ```text
/// LocalOnly ──sign-in──► Migrating ──ok──► CloudActive
///     ▲                      │                  │
///     └──────failure─────────┘                  │
///     └──────────────sign-out───────────────────┘
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActiveMode {
    /// `initialize()` not called yet (or torn down)
    Uninitialized,
    LocalOnly,
    Migrating,
    CloudActive,
}

impl ActiveMode {
    #[must_use]
    pub fn for_backend(backend: Backend) -> Self {
        match backend {
            Backend::Local => Self::LocalOnly,
            Backend::Cloud => Self::CloudActive,
        }
    }
}

impl std::fmt::Display for ActiveMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Uninitialized => write!(f, "uninitialized"),
            Self::LocalOnly => write!(f, "local_only"),
            Self::Migrating => write!(f, "migrating"),
            Self::CloudActive => write!(f, "cloud_active"),
        }
    }
}

/// One change of the authentication signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AuthTransition {
    pub previous: bool,
    pub current: bool,
}

impl AuthTransition {
    #[must_use]
    pub fn sign_in() -> Self {
        Self { previous: false, current: true }
    }

    #[must_use]
    pub fn sign_out() -> Self {
        Self { previous: true, current: false }
    }

    #[must_use]
    pub fn is_change(&self) -> bool {
        self.previous != self.current
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strategy_targets() {
        assert_eq!(StorageStrategy::Automatic.target(false), Backend::Local);
        assert_eq!(StorageStrategy::Automatic.target(true), Backend::Cloud);
        assert_eq!(StorageStrategy::ForceLocal.target(true), Backend::Local);
        assert_eq!(StorageStrategy::ForceLocal.target(false), Backend::Local);
        assert_eq!(StorageStrategy::ForceCloud.target(false), Backend::Cloud);
        assert_eq!(StorageStrategy::Hybrid.target(true), Backend::Cloud);
        assert_eq!(StorageStrategy::Hybrid.target(false), Backend::Local);
    }

    #[test]
    fn test_strategy_display_matches_serde() {
        for strategy in [
            StorageStrategy::Automatic,
            StorageStrategy::ForceLocal,
            StorageStrategy::ForceCloud,
            StorageStrategy::Hybrid,
        ] {
            let parsed: StorageStrategy =
                serde_json::from_str(&format!("\"{}\"", strategy)).unwrap();
            assert_eq!(parsed, strategy);
        }
    }

    #[test]
    fn test_mode_display() {
        assert_eq!(ActiveMode::Migrating.to_string(), "migrating");
        assert_eq!(ActiveMode::for_backend(Backend::Cloud), ActiveMode::CloudActive);
    }

    #[test]
    fn test_transition_change() {
        assert!(AuthTransition::sign_in().is_change());
        assert!(!AuthTransition { previous: true, current: true }.is_change());
    }
}
