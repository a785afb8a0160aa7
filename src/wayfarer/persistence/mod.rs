// SPDX-License-Identifier: MIT

//! Checkpoint persistence: the store contract and its backends, plus the
//! lookup result cache sharing the same database

pub mod cache;
pub mod checkpoint;
pub mod memory;
pub mod pool;
pub mod schema;
pub mod sqlite;

pub use cache::{cache_key, CacheStats, MemoryQueryCache, QueryCache, SqliteQueryCache};
pub use checkpoint::{Checkpoint, CheckpointStore, LoadedCheckpoint, ResumableSession};
pub use memory::MemoryCheckpointStore;
pub use pool::DatabasePool;
pub use sqlite::SqliteCheckpointStore;
