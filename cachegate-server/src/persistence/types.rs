use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

/// Persistence error types
#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("Snapshot corrupted: {0:?}")]
    SnapshotCorrupted(PathBuf),

    #[error("Checksum mismatch: expected {expected:#010x}, got {actual:#010x}")]
    ChecksumMismatch { expected: u32, actual: u32 },

    #[error("Unsupported snapshot version {0}")]
    UnsupportedVersion(u8),

    #[error("IO error: {0}")]
    IOError(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    SerializationError(String),
}

impl From<bincode::error::EncodeError> for PersistenceError {
    fn from(e: bincode::error::EncodeError) -> Self {
        PersistenceError::SerializationError(e.to_string())
    }
}

impl From<bincode::error::DecodeError> for PersistenceError {
    fn from(e: bincode::error::DecodeError) -> Self {
        PersistenceError::SerializationError(e.to_string())
    }
}

impl From<PersistenceError> for crate::core::CacheGateError {
    fn from(e: PersistenceError) -> Self {
        crate::core::CacheGateError::Snapshot(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, PersistenceError>;

/// Snapshot configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SnapshotConfig {
    pub enabled: bool,
    /// File the cache store is written to
    pub path: PathBuf,
}

impl Default for SnapshotConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            path: PathBuf::from("./data/cachegate.snapshot"),
        }
    }
}

/// One stored response as written to disk
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct EntryRecord {
    pub method: String,
    pub url: String,
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

/// Snapshot statistics
#[derive(Debug, Clone, Serialize)]
pub struct SnapshotStats {
    pub partitions: usize,
    pub entries: usize,
    pub bytes_written: u64,
    pub timestamp: i64,
}
