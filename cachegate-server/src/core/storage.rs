use super::partition::CachePartition;
use super::types::{RequestKey, StoredResponse};
use parking_lot::RwLock;
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info};

/// Summary of one partition
#[derive(Debug, Clone, Serialize)]
pub struct PartitionInfo {
    pub name: String,
    pub entries: usize,
    pub body_bytes: usize,
}

/// Named set of cache partitions
///
/// Partitions are kept in creation order; `match_request` searches them
/// in that order and returns the first hit.
#[derive(Debug, Clone, Default)]
pub struct CacheStorage {
    partitions: Arc<RwLock<Vec<CachePartition>>>,
}

impl CacheStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a partition, creating it if it does not exist
    pub fn open(&self, name: &str) -> CachePartition {
        if let Some(existing) = self.get(name) {
            return existing;
        }

        let mut partitions = self.partitions.write();
        // Re-check under the write lock; another caller may have created it
        if let Some(existing) = partitions.iter().find(|p| p.name() == name) {
            return existing.clone();
        }

        let partition = CachePartition::new(name);
        partitions.push(partition.clone());
        debug!("Created cache partition '{}'", name);
        partition
    }

    /// Get an existing partition without creating it
    pub fn get(&self, name: &str) -> Option<CachePartition> {
        self.partitions
            .read()
            .iter()
            .find(|p| p.name() == name)
            .cloned()
    }

    pub fn has(&self, name: &str) -> bool {
        self.partitions.read().iter().any(|p| p.name() == name)
    }

    /// Delete a partition and everything in it
    pub fn delete(&self, name: &str) -> bool {
        let mut partitions = self.partitions.write();
        let before = partitions.len();
        partitions.retain(|p| p.name() != name);
        let removed = partitions.len() != before;
        if removed {
            info!("Deleted cache partition '{}'", name);
        }
        removed
    }

    /// Partition names in creation order
    pub fn names(&self) -> Vec<String> {
        self.partitions
            .read()
            .iter()
            .map(|p| p.name().to_string())
            .collect()
    }

    /// Search every partition for a stored response
    pub fn match_request(&self, key: &RequestKey) -> Option<StoredResponse> {
        let partitions = self.partitions.read();
        partitions.iter().find_map(|p| p.get(key))
    }

    /// Delete every partition whose name is not in `keep`.
    /// Returns the deleted names.
    pub fn retain_only(&self, keep: &[&str]) -> Vec<String> {
        let stale: Vec<String> = self
            .names()
            .into_iter()
            .filter(|name| !keep.contains(&name.as_str()))
            .collect();

        for name in &stale {
            self.delete(name);
        }
        stale
    }

    /// Attach an already populated partition (snapshot restore).
    /// Replaces any partition with the same name.
    pub fn insert_partition(&self, partition: CachePartition) {
        let mut partitions = self.partitions.write();
        partitions.retain(|p| p.name() != partition.name());
        partitions.push(partition);
    }

    /// Snapshot of all partitions, creation order
    pub fn partitions(&self) -> Vec<CachePartition> {
        self.partitions.read().clone()
    }

    pub fn info(&self) -> Vec<PartitionInfo> {
        self.partitions
            .read()
            .iter()
            .map(|p| PartitionInfo {
                name: p.name().to_string(),
                entries: p.len(),
                body_bytes: p.body_bytes(),
            })
            .collect()
    }

    pub fn total_entries(&self) -> usize {
        self.partitions.read().iter().map(|p| p.len()).sum()
    }
}
