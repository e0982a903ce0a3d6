use super::types::{EntryRecord, PersistenceError, Result, SnapshotConfig, SnapshotStats};
use crate::core::{CachePartition, CacheStorage, RequestKey, StoredResponse};
use std::io::Cursor;
use std::path::Path;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tracing::{debug, info, warn};

const SNAPSHOT_MAGIC: &[u8; 8] = b"CGATE001";
const SNAPSHOT_VERSION: u8 = 1;

/// Writes and restores the whole cache store
///
/// Layout (big-endian integers):
/// magic, version u8, timestamp i64, partition count u32, then per
/// partition: name (u32 len + bytes), entry count u64, entries
/// (u32 len + bincode `EntryRecord`). A CRC32 of everything before it
/// closes the file. Partitions and entries keep their order, so FIFO
/// eviction continues where it left off.
pub struct SnapshotManager {
    config: SnapshotConfig,
}

impl SnapshotManager {
    pub fn new(config: SnapshotConfig) -> Self {
        Self { config }
    }

    pub fn path(&self) -> &Path {
        &self.config.path
    }

    /// Serialize the store to bytes
    pub fn encode(storage: &CacheStorage, timestamp: i64) -> Result<(Vec<u8>, usize)> {
        let bincode_config = bincode::config::standard();
        let mut buf = Vec::new();
        let mut entry_total = 0;

        buf.extend_from_slice(SNAPSHOT_MAGIC);
        buf.push(SNAPSHOT_VERSION);
        buf.extend_from_slice(&timestamp.to_be_bytes());

        let partitions = storage.partitions();
        buf.extend_from_slice(&(partitions.len() as u32).to_be_bytes());

        for partition in &partitions {
            let name = partition.name().as_bytes();
            buf.extend_from_slice(&(name.len() as u32).to_be_bytes());
            buf.extend_from_slice(name);

            let entries = partition.entries();
            buf.extend_from_slice(&(entries.len() as u64).to_be_bytes());
            entry_total += entries.len();

            for (key, response) in entries {
                let record = EntryRecord {
                    method: key.method,
                    url: key.url,
                    status: response.status,
                    headers: response.headers,
                    body: response.body.to_vec(),
                };
                let bytes = bincode::serde::encode_to_vec(&record, bincode_config)?;
                buf.extend_from_slice(&(bytes.len() as u32).to_be_bytes());
                buf.extend_from_slice(&bytes);
            }
        }

        let checksum = crc32fast::hash(&buf);
        buf.extend_from_slice(&checksum.to_be_bytes());
        Ok((buf, entry_total))
    }

    /// Rebuild a store from bytes produced by `encode`
    pub async fn decode(bytes: &[u8]) -> Result<(CacheStorage, i64)> {
        if bytes.len() < SNAPSHOT_MAGIC.len() + 1 + 8 + 4 + 4 {
            return Err(PersistenceError::SerializationError(
                "snapshot truncated".to_string(),
            ));
        }

        let (body, tail) = bytes.split_at(bytes.len() - 4);
        let expected = u32::from_be_bytes([tail[0], tail[1], tail[2], tail[3]]);
        let actual = crc32fast::hash(body);
        if expected != actual {
            return Err(PersistenceError::ChecksumMismatch { expected, actual });
        }

        let mut reader = Cursor::new(body);
        let mut magic = [0u8; 8];
        reader.read_exact(&mut magic).await?;
        if &magic != SNAPSHOT_MAGIC {
            return Err(PersistenceError::SerializationError(
                "bad snapshot magic".to_string(),
            ));
        }

        let version = reader.read_u8().await?;
        if version != SNAPSHOT_VERSION {
            return Err(PersistenceError::UnsupportedVersion(version));
        }
        let timestamp = reader.read_i64().await?;

        let bincode_config = bincode::config::standard();
        let storage = CacheStorage::new();
        let partition_count = reader.read_u32().await?;

        for _ in 0..partition_count {
            let name_len = reader.read_u32().await? as usize;
            let mut name_bytes = vec![0u8; name_len];
            reader.read_exact(&mut name_bytes).await?;
            let name = String::from_utf8(name_bytes)
                .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;

            let partition = CachePartition::new(name);
            let entry_count = reader.read_u64().await?;
            for _ in 0..entry_count {
                let len = reader.read_u32().await? as usize;
                let mut record_bytes = vec![0u8; len];
                reader.read_exact(&mut record_bytes).await?;
                let (record, _): (EntryRecord, usize) =
                    bincode::serde::decode_from_slice(&record_bytes, bincode_config)?;

                partition.put(
                    RequestKey {
                        method: record.method,
                        url: record.url,
                    },
                    StoredResponse::new(record.status, record.headers, record.body),
                );
            }

            debug!(
                "Restored partition '{}' ({} entries)",
                partition.name(),
                partition.len()
            );
            storage.insert_partition(partition);
        }

        Ok((storage, timestamp))
    }

    /// Write the store atomically (temp file + rename)
    pub async fn save(&self, storage: &CacheStorage) -> Result<SnapshotStats> {
        let timestamp = chrono::Utc::now().timestamp();
        let (bytes, entries) = Self::encode(storage, timestamp)?;

        if let Some(parent) = self
            .config
            .path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
        {
            tokio::fs::create_dir_all(parent).await?;
        }

        let tmp_path = self.config.path.with_extension("tmp");
        let mut file = tokio::fs::File::create(&tmp_path).await?;
        file.write_all(&bytes).await?;
        file.sync_all().await?;
        drop(file);
        tokio::fs::rename(&tmp_path, &self.config.path).await?;

        let stats = SnapshotStats {
            partitions: storage.names().len(),
            entries,
            bytes_written: bytes.len() as u64,
            timestamp,
        };
        info!(
            "Snapshot written to {:?}: {} partitions, {} entries, {} bytes",
            self.config.path, stats.partitions, stats.entries, stats.bytes_written
        );
        Ok(stats)
    }

    /// Load the snapshot; `None` when no file exists
    pub async fn load(&self) -> Result<Option<CacheStorage>> {
        let bytes = match tokio::fs::read(&self.config.path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!("No snapshot at {:?}", self.config.path);
                return Ok(None);
            }
            Err(e) => return Err(e.into()),
        };

        let (storage, timestamp) = Self::decode(&bytes).await.map_err(|e| {
            warn!("Snapshot {:?} unreadable: {}", self.config.path, e);
            match e {
                PersistenceError::IOError(_) | PersistenceError::SerializationError(_) => {
                    PersistenceError::SnapshotCorrupted(self.config.path.clone())
                }
                other => other,
            }
        })?;

        info!(
            "Snapshot loaded from {:?}: timestamp={}, partitions={:?}",
            self.config.path,
            timestamp,
            storage.names()
        );
        Ok(Some(storage))
    }

    /// Load the snapshot, falling back to an empty store on any problem
    pub async fn load_or_empty(&self) -> CacheStorage {
        match self.load().await {
            Ok(Some(storage)) => storage,
            Ok(None) => CacheStorage::new(),
            Err(e) => {
                warn!("Starting with an empty cache: {}", e);
                CacheStorage::new()
            }
        }
    }
}
