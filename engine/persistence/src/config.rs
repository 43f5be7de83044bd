//! Configuration for the event store

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Configuration for the event store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PersistenceConfig {
    /// Base directory for WAL and snapshot files
    pub data_dir: PathBuf,

    /// WAL configuration
    pub wal: WalConfig,

    /// Snapshot configuration
    pub snapshot: SnapshotConfig,
}

/// Write-Ahead Log configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WalConfig {
    /// Maximum size of a single WAL file before rotation
    pub max_file_size: u64,

    /// Whether to fsync on every write (for maximum durability)
    pub fsync_every_write: bool,
}

/// Snapshot configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SnapshotConfig {
    /// Maximum number of snapshots to keep
    pub max_snapshots: usize,

    /// Whether to gzip snapshots
    pub compress: bool,

    /// Compact (snapshot + WAL truncation) once this many WAL entries accumulate; 0 disables
    pub compact_every_entries: u64,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./analytics_data"),
            wal: WalConfig::default(),
            snapshot: SnapshotConfig::default(),
        }
    }
}

impl Default for WalConfig {
    fn default() -> Self {
        Self {
            max_file_size: 64 * 1024 * 1024, // 64MB
            fsync_every_write: false,
        }
    }
}

impl Default for SnapshotConfig {
    fn default() -> Self {
        Self { max_snapshots: 3, compress: true, compact_every_entries: 50_000 }
    }
}

impl PersistenceConfig {
    /// Create a new configuration with custom data directory
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self { data_dir: data_dir.into(), ..Default::default() }
    }

    /// Get the WAL directory path
    pub fn wal_dir(&self) -> PathBuf {
        self.data_dir.join("wal")
    }

    /// Get the snapshots directory path
    pub fn snapshots_dir(&self) -> PathBuf {
        self.data_dir.join("snapshots")
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.wal.max_file_size == 0 {
            return Err("WAL max_file_size must be greater than 0".to_string());
        }

        if self.snapshot.max_snapshots == 0 {
            return Err("Snapshot max_snapshots must be greater than 0".to_string());
        }

        Ok(())
    }
}
