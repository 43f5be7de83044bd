//! Write-Ahead Log (WAL) implementation
//!
//! Every mutation of the store is appended here, one JSON document per line, before it is
//! applied to the in-memory tables. Replaying the log on top of the latest snapshot rebuilds
//! the exact state the process had before it stopped.

use crate::config::WalConfig;
use crate::error::{PersistenceError, Result};
use crate::records::{CostEntry, ErrorLog, PerformanceMetric, Session, UsageEvent};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Mutex;
use uuid::Uuid;

/// A single entry in the Write-Ahead Log
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WalEntry {
    /// Unique identifier for this entry
    pub id: Uuid,

    /// Timestamp when the entry was created
    pub timestamp: DateTime<Utc>,

    /// The operation type
    pub operation: WalOperation,

    /// Sequence number for ordering
    pub sequence: u64,
}

/// Types of operations that can be logged. Records carry their full after-image.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", content = "data", rename_all = "snake_case")]
pub enum WalOperation {
    RecordUsageEvent(UsageEvent),
    RecordPerformanceMetric(PerformanceMetric),
    RecordErrorLog(ErrorLog),
    RecordCostEntry(CostEntry),
    CreateSession(Session),
    UpdateSession(Session),
    ResolveErrorLog { id: u64, resolved_at: DateTime<Utc> },
    /// Retention sweep: drop immutable records older than `cutoff`
    Purge { cutoff: DateTime<Utc> },
}

/// WAL file metadata
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WalFileInfo {
    /// File path
    pub path: PathBuf,

    /// File size in bytes
    pub size: u64,

    /// First sequence number in this file
    pub first_sequence: u64,

    /// Last sequence number in this file
    pub last_sequence: u64,
}

/// Write-Ahead Log implementation
pub struct Wal {
    config: WalConfig,
    wal_dir: PathBuf,
    current_file: Arc<Mutex<Option<WalFile>>>,
    sequence_counter: Arc<Mutex<u64>>,
}

/// Current WAL file being written to
struct WalFile {
    writer: BufWriter<File>,
    current_size: u64,
}

impl Wal {
    /// Open the WAL in `wal_dir`. Sequence numbers continue after the highest one found on
    /// disk, and never restart below `sequence_floor` (the sequence covered by the latest
    /// snapshot, whose WAL files may already be gone).
    pub fn open(config: WalConfig, wal_dir: PathBuf, sequence_floor: u64) -> Result<Self> {
        // Ensure WAL directory exists
        std::fs::create_dir_all(&wal_dir).map_err(PersistenceError::Io)?;

        let sequence_counter = Self::find_highest_sequence(&wal_dir)?.max(sequence_floor);

        Ok(Self {
            config,
            wal_dir,
            current_file: Arc::new(Mutex::new(None)),
            sequence_counter: Arc::new(Mutex::new(sequence_counter)),
        })
    }

    /// Append an entry and flush it; returns its sequence number
    pub async fn write_entry(&self, operation: WalOperation) -> Result<u64> {
        let mut counter = self.sequence_counter.lock().await;
        let sequence = *counter + 1;

        let entry = WalEntry { id: Uuid::new_v4(), timestamp: Utc::now(), operation, sequence };

        self.write_to_file(&entry, sequence).await?;
        // Only advance once the entry is on disk, so a failed append leaves no gap
        *counter = sequence;
        drop(counter);

        self.check_rotation().await;

        Ok(sequence)
    }

    /// Highest sequence number written so far
    pub async fn last_sequence(&self) -> u64 {
        *self.sequence_counter.lock().await
    }

    /// Flush all pending writes to disk
    pub async fn flush(&self) -> Result<()> {
        let mut current_file = self.current_file.lock().await;
        if let Some(ref mut file) = *current_file {
            file.writer.flush().map_err(PersistenceError::Io)?;

            if self.config.fsync_every_write {
                file.writer.get_ref().sync_all().map_err(PersistenceError::Io)?;
            }
        }

        Ok(())
    }

    /// Read every entry with a sequence number above `after`, in order
    pub async fn read_entries_after(&self, after: u64) -> Result<Vec<WalEntry>> {
        let files = self.list_files().await?;
        let mut entries = Vec::new();

        for file in &files {
            if file.last_sequence != 0 && file.last_sequence <= after {
                continue;
            }

            let content = std::fs::read_to_string(&file.path).map_err(PersistenceError::Io)?;
            // Complete entries always end in a newline
            let unterminated = !content.is_empty() && !content.ends_with('\n');
            let lines: Vec<&str> = content.lines().filter(|l| !l.trim().is_empty()).collect();
            let line_count = lines.len();

            for (line_idx, line) in lines.into_iter().enumerate() {
                match serde_json::from_str::<WalEntry>(line) {
                    Ok(entry) if entry.sequence > after => entries.push(entry),
                    Ok(_) => {}
                    Err(e) if unterminated && line_idx + 1 == line_count => {
                        // A crash mid-append can leave a partial final line
                        tracing::warn!("Skipping torn WAL tail in {:?}: {}", file.path, e);
                    }
                    Err(e) => {
                        return Err(PersistenceError::corruption(format!(
                            "{:?} line {}: {}",
                            file.path,
                            line_idx + 1,
                            e
                        )));
                    }
                }
            }
        }

        entries.sort_by_key(|e| e.sequence);
        Ok(entries)
    }

    /// Get information about all WAL files
    pub async fn list_files(&self) -> Result<Vec<WalFileInfo>> {
        let mut files = Vec::new();

        let entries = std::fs::read_dir(&self.wal_dir).map_err(PersistenceError::Io)?;

        for entry in entries {
            let entry = entry.map_err(PersistenceError::Io)?;
            let path = entry.path();

            if path.extension().and_then(|s| s.to_str()) == Some("wal") {
                let metadata = entry.metadata().map_err(PersistenceError::Io)?;
                let size = metadata.len();

                // Read first and last sequence from file
                let (first_sequence, last_sequence) = Wal::read_sequence_range(&path)?;

                files.push(WalFileInfo { path, size, first_sequence, last_sequence });
            }
        }

        // File names embed the first sequence, so name order is log order
        files.sort_by(|a, b| a.path.cmp(&b.path));

        Ok(files)
    }

    /// Remove WAL files whose entries are all covered by a snapshot at `sequence`
    pub async fn remove_files_through(&self, sequence: u64) -> Result<usize> {
        // Start a fresh file so the one being appended to can be removed too
        {
            let mut current_file = self.current_file.lock().await;
            if let Some(ref mut file) = *current_file {
                file.writer.flush().map_err(PersistenceError::Io)?;
            }
            *current_file = None;
        }

        let mut removed = 0;
        for file in self.list_files().await? {
            if file.last_sequence <= sequence {
                std::fs::remove_file(&file.path).map_err(PersistenceError::Io)?;
                tracing::info!("Removed compacted WAL file: {:?}", file.path);
                removed += 1;
            }
        }

        Ok(removed)
    }

    // Private methods

    async fn write_to_file(&self, entry: &WalEntry, sequence: u64) -> Result<()> {
        let mut current_file = self.current_file.lock().await;

        // Open new file if needed
        if current_file.is_none() {
            *current_file = Some(self.create_new_file(sequence)?);
        }
        let Some(file) = current_file.as_mut() else {
            return Err(PersistenceError::invalid_operation("WAL file is not open"));
        };

        // Serialize entry to JSON
        let json = serde_json::to_string(entry).map_err(PersistenceError::Serialization)?;

        // Write entry (one per line)
        match Self::append_line(file, &json, self.config.fsync_every_write) {
            Ok(()) => {
                file.current_size += json.len() as u64 + 1; // +1 for newline
                Ok(())
            }
            Err(e) => {
                if let Some(file) = current_file.take() {
                    Self::discard_partial(file);
                }
                Err(PersistenceError::Io(e))
            }
        }
    }

    fn append_line(file: &mut WalFile, json: &str, fsync: bool) -> std::io::Result<()> {
        writeln!(file.writer, "{json}")?;
        file.writer.flush()?;
        if fsync {
            file.writer.get_ref().sync_data()?;
        }
        Ok(())
    }

    /// Cut a file back to its last complete entry after a failed append. The file is closed,
    /// so the next append starts from a clean state.
    fn discard_partial(file: WalFile) {
        let (inner, _unwritten) = file.writer.into_parts();
        if let Err(e) = inner.set_len(file.current_size) {
            tracing::error!("Failed to truncate WAL file after a failed append: {}", e);
        }
    }

    fn create_new_file(&self, sequence: u64) -> Result<WalFile> {
        let filename = format!("wal_{sequence:016x}.wal");
        let path = self.wal_dir.join(filename);

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(PersistenceError::Io)?;

        let current_size = file.metadata().map_err(PersistenceError::Io)?.len();
        let writer = BufWriter::new(file);

        Ok(WalFile { writer, current_size })
    }

    /// Runs after the entry is durable, so it never fails the append
    async fn check_rotation(&self) {
        let mut current_file = self.current_file.lock().await;

        let full = current_file
            .as_ref()
            .is_some_and(|file| file.current_size >= self.config.max_file_size);
        if full {
            // Entries are flushed on append; the next write opens a new file
            *current_file = None;
        }
    }

    fn find_highest_sequence(wal_dir: &Path) -> Result<u64> {
        let mut highest = 0u64;

        if !wal_dir.exists() {
            return Ok(highest);
        }

        let entries = std::fs::read_dir(wal_dir).map_err(PersistenceError::Io)?;

        for entry in entries {
            let entry = entry.map_err(PersistenceError::Io)?;
            let path = entry.path();

            if path.extension().and_then(|s| s.to_str()) == Some("wal") {
                let (_, last_sequence) = Self::read_sequence_range(&path)?;
                highest = highest.max(last_sequence);
            }
        }

        Ok(highest)
    }

    fn read_sequence_range(path: &Path) -> Result<(u64, u64)> {
        let content = std::fs::read_to_string(path).map_err(PersistenceError::Io)?;

        let mut first_sequence = None;
        let mut last_sequence = 0u64;

        for line in content.lines() {
            if let Ok(entry) = serde_json::from_str::<WalEntry>(line) {
                if first_sequence.is_none() {
                    first_sequence = Some(entry.sequence);
                }
                last_sequence = entry.sequence;
            }
        }

        Ok((first_sequence.unwrap_or(0), last_sequence))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::records::NewUsageEvent;
    use tempfile::TempDir;

    fn event(id: u64) -> WalOperation {
        WalOperation::RecordUsageEvent(NewUsageEvent::new("tool_call").into_record(id, Utc::now()))
    }

    #[tokio::test]
    async fn test_sequences_continue_across_reopen() {
        let temp_dir = TempDir::new().unwrap();
        let dir = temp_dir.path().join("wal");

        let wal = Wal::open(WalConfig::default(), dir.clone(), 0).unwrap();
        assert_eq!(wal.write_entry(event(1)).await.unwrap(), 1);
        assert_eq!(wal.write_entry(event(2)).await.unwrap(), 2);
        drop(wal);

        let wal = Wal::open(WalConfig::default(), dir, 0).unwrap();
        assert_eq!(wal.last_sequence().await, 2);
        assert_eq!(wal.write_entry(event(3)).await.unwrap(), 3);

        let entries = wal.read_entries_after(1).await.unwrap();
        let sequences: Vec<u64> = entries.iter().map(|e| e.sequence).collect();
        assert_eq!(sequences, vec![2, 3]);
    }

    #[tokio::test]
    async fn test_sequence_floor_applies_when_log_is_empty() {
        let temp_dir = TempDir::new().unwrap();
        let wal = Wal::open(WalConfig::default(), temp_dir.path().to_path_buf(), 41).unwrap();
        assert_eq!(wal.write_entry(event(1)).await.unwrap(), 42);
    }

    #[tokio::test]
    async fn test_rotation_and_removal() {
        let temp_dir = TempDir::new().unwrap();
        let config = WalConfig { max_file_size: 1, ..Default::default() };
        let wal = Wal::open(config, temp_dir.path().to_path_buf(), 0).unwrap();

        for id in 1..=3 {
            wal.write_entry(event(id)).await.unwrap();
        }
        assert_eq!(wal.list_files().await.unwrap().len(), 3);

        assert_eq!(wal.remove_files_through(2).await.unwrap(), 2);
        let entries = wal.read_entries_after(0).await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].sequence, 3);
    }

    #[tokio::test]
    async fn test_torn_tail_is_skipped() {
        let temp_dir = TempDir::new().unwrap();
        let dir = temp_dir.path().to_path_buf();
        let wal = Wal::open(WalConfig::default(), dir.clone(), 0).unwrap();
        wal.write_entry(event(1)).await.unwrap();
        drop(wal);

        let path = std::fs::read_dir(&dir).unwrap().next().unwrap().unwrap().path();
        let mut file = OpenOptions::new().append(true).open(&path).unwrap();
        write!(file, "{{\"id\":\"trunc").unwrap();

        let wal = Wal::open(WalConfig::default(), dir, 0).unwrap();
        let entries = wal.read_entries_after(0).await.unwrap();
        assert_eq!(entries.len(), 1);
    }

    #[tokio::test]
    async fn test_failed_append_leaves_no_partial_line() {
        let temp_dir = TempDir::new().unwrap();
        let dir = temp_dir.path().to_path_buf();
        let wal = Wal::open(WalConfig::default(), dir.clone(), 0).unwrap();
        wal.write_entry(event(1)).await.unwrap();

        // Half an entry reaches the file before the append gives up
        {
            let mut current_file = wal.current_file.lock().await;
            let file = current_file.as_mut().unwrap();
            write!(file.writer, "{{\"id\":\"half").unwrap();
            file.writer.flush().unwrap();
            Wal::discard_partial(current_file.take().unwrap());
        }

        assert_eq!(wal.write_entry(event(2)).await.unwrap(), 2);
        drop(wal);

        let wal = Wal::open(WalConfig::default(), dir, 0).unwrap();
        let entries = wal.read_entries_after(0).await.unwrap();
        let sequences: Vec<u64> = entries.iter().map(|e| e.sequence).collect();
        assert_eq!(sequences, vec![1, 2]);
    }
}
