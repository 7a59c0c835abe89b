// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Storage backends behind the [`Store`](traits::Store) trait.
//!
//! - [`sqlite::SqliteStore`]: the on-device local store
//! - [`redis::RedisStore`]: the remote cloud store
//! - [`memory::InMemoryStore`]: either role, for tests and embedding

pub mod memory;
pub mod redis;
pub mod sqlite;
pub mod traits;
