//! Snapshot implementation for store compaction
//!
//! A snapshot is a full copy of the tables tagged with the WAL sequence it covers. Recovery
//! loads the newest snapshot and replays only the WAL entries written after it, which also
//! lets compaction delete the WAL files the snapshot makes redundant.

use crate::config::SnapshotConfig;
use crate::error::{PersistenceError, Result};
use crate::tables::Tables;
use chrono::{DateTime, Utc};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use uuid::Uuid;

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

/// A snapshot of the store state
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Snapshot {
    /// Unique identifier for this snapshot
    pub id: Uuid,

    /// Timestamp when the snapshot was created
    pub timestamp: DateTime<Utc>,

    /// Last WAL sequence folded into `tables`
    pub sequence: u64,

    /// The store state at this point in the log
    pub tables: Tables,

    /// Metadata about the snapshot
    pub metadata: SnapshotMetadata,
}

/// Snapshot metadata
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotMetadata {
    /// Snapshot format version
    pub version: String,

    /// Compression used
    pub compression: Option<String>,
}

/// Snapshot file information
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotFileInfo {
    /// File path
    pub path: PathBuf,

    /// File size in bytes
    pub size: u64,

    /// WAL sequence covered, parsed from the file name
    pub sequence: u64,
}

/// Snapshot manager
pub struct SnapshotManager {
    config: SnapshotConfig,
    snapshots_dir: PathBuf,
}

impl SnapshotManager {
    /// Create a new snapshot manager
    pub fn new(config: SnapshotConfig, snapshots_dir: PathBuf) -> Result<Self> {
        // Ensure snapshots directory exists
        std::fs::create_dir_all(&snapshots_dir).map_err(PersistenceError::Io)?;

        Ok(Self { config, snapshots_dir })
    }

    /// Write a snapshot of `tables` covering the log up to `sequence`
    pub async fn create_snapshot(&self, tables: &Tables, sequence: u64) -> Result<Uuid> {
        let start_time = std::time::Instant::now();

        let snapshot = Snapshot {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            sequence,
            tables: tables.clone(),
            metadata: SnapshotMetadata {
                version: "1.0".to_string(),
                compression: if self.config.compress { Some("gzip".to_string()) } else { None },
            },
        };

        let file_path = self.write_snapshot_file(&snapshot)?;
        let file_size = std::fs::metadata(&file_path).map_err(PersistenceError::Io)?.len();

        tracing::info!(
            "Created snapshot {} at sequence {} ({}ms, {} bytes)",
            snapshot.id,
            sequence,
            start_time.elapsed().as_millis(),
            file_size
        );

        // Clean up old snapshots AFTER creating new one
        self.cleanup_old_snapshots().await?;

        Ok(snapshot.id)
    }

    /// Load the most recent readable snapshot
    pub async fn load_latest_snapshot(&self) -> Result<Option<Snapshot>> {
        let snapshots = self.list_snapshots().await?;

        if snapshots.is_empty() {
            tracing::info!("No snapshots found, starting with clean state");
            return Ok(None);
        }

        // Newest first; fall back to older ones if the newest cannot be decoded
        for info in snapshots.iter().rev() {
            match self.load_snapshot(&info.path) {
                Ok(mut snapshot) => {
                    snapshot.tables.rebuild_index();
                    tracing::info!(
                        "Loaded snapshot {} at sequence {} from {:?}",
                        snapshot.id,
                        snapshot.sequence,
                        info.path
                    );
                    return Ok(Some(snapshot));
                }
                Err(e) => {
                    tracing::warn!("Skipping unreadable snapshot {:?}: {}", info.path, e);
                }
            }
        }

        Err(PersistenceError::corruption("no readable snapshot found"))
    }

    /// Get information about all snapshots, oldest first
    pub async fn list_snapshots(&self) -> Result<Vec<SnapshotFileInfo>> {
        let mut snapshots = Vec::new();

        let entries = std::fs::read_dir(&self.snapshots_dir).map_err(PersistenceError::Io)?;

        for entry in entries {
            let entry = entry.map_err(PersistenceError::Io)?;
            let path = entry.path();

            if path.extension().and_then(|s| s.to_str()) != Some("snapshot") {
                continue;
            }

            let Some(sequence) = Self::sequence_from_path(&path) else {
                tracing::warn!("Ignoring snapshot with unexpected name: {:?}", path);
                continue;
            };

            let size = entry.metadata().map_err(PersistenceError::Io)?.len();
            snapshots.push(SnapshotFileInfo { path, size, sequence });
        }

        snapshots.sort_by_key(|s| s.sequence);

        Ok(snapshots)
    }

    /// Clean up old snapshots based on retention policy
    pub async fn cleanup_old_snapshots(&self) -> Result<()> {
        let snapshots = self.list_snapshots().await?;

        if snapshots.len() <= self.config.max_snapshots {
            return Ok(());
        }

        let snapshots_to_remove = snapshots.len() - self.config.max_snapshots;

        // Remove the oldest snapshots (first ones in the sorted list)
        for snapshot in snapshots.iter().take(snapshots_to_remove) {
            std::fs::remove_file(&snapshot.path).map_err(PersistenceError::Io)?;

            tracing::info!("Removed old snapshot: {:?}", snapshot.path);
        }

        Ok(())
    }

    // Private methods

    fn sequence_from_path(path: &Path) -> Option<u64> {
        let stem = path.file_stem()?.to_str()?;
        let hex = stem.strip_prefix("snapshot_")?;
        u64::from_str_radix(hex, 16).ok()
    }

    fn write_snapshot_file(&self, snapshot: &Snapshot) -> Result<PathBuf> {
        let filename = format!("snapshot_{:016x}.snapshot", snapshot.sequence);
        let file_path = self.snapshots_dir.join(filename);
        // Write next to the target and rename, so a crash never leaves a half-written snapshot
        let tmp_path = file_path.with_extension("snapshot.tmp");

        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&tmp_path)
            .map_err(PersistenceError::Io)?;

        let writer = BufWriter::new(file);

        let file = if self.config.compress {
            let mut encoder = GzEncoder::new(writer, Compression::default());
            serde_json::to_writer(&mut encoder, snapshot)
                .map_err(PersistenceError::Serialization)?;
            encoder.finish().map_err(PersistenceError::Io)?
        } else {
            let mut writer = writer;
            serde_json::to_writer(&mut writer, snapshot)
                .map_err(PersistenceError::Serialization)?;
            writer
        };

        let file = file.into_inner().map_err(|e| PersistenceError::Io(e.into_error()))?;
        file.sync_all().map_err(PersistenceError::Io)?;

        std::fs::rename(&tmp_path, &file_path).map_err(PersistenceError::Io)?;

        Ok(file_path)
    }

    fn load_snapshot(&self, path: &Path) -> Result<Snapshot> {
        let mut file = File::open(path).map_err(PersistenceError::Io)?;

        let mut magic = [0u8; 2];
        let read = file.read(&mut magic).map_err(PersistenceError::Io)?;
        let file = File::open(path).map_err(PersistenceError::Io)?;
        let reader = BufReader::new(file);

        let snapshot: Snapshot = if read == 2 && magic == GZIP_MAGIC {
            serde_json::from_reader(GzDecoder::new(reader))
                .map_err(PersistenceError::Serialization)?
        } else {
            serde_json::from_reader(reader).map_err(PersistenceError::Serialization)?
        };

        Ok(snapshot)
    }
}
