//! Persistence Module
//!
//! Keeps the cache store across restarts: the whole store is written to a
//! single checksummed snapshot file and read back at startup.

pub mod snapshot;
pub mod types;

pub use snapshot::SnapshotManager;
pub use types::{EntryRecord, PersistenceError, SnapshotConfig, SnapshotStats};
