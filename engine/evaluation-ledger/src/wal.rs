//! Write-ahead log for evaluation records
//!
//! Every evaluation is appended as one JSON line before it becomes visible to
//! readers. Files rotate by size; the log is replayed in sequence order on open.

use crate::config::WalConfig;
use crate::error::Result;
use crate::types::EvaluationRecord;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;
use uuid::Uuid;

/// A single line in the evaluation log
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WalEntry {
    pub id: Uuid,

    /// Monotonic ledger sequence, starting at 1
    pub sequence: u64,

    /// When the entry was appended (not when the drill was measured)
    pub appended_at: DateTime<Utc>,

    pub record: EvaluationRecord,
}

/// Evaluation write-ahead log
pub struct Wal {
    config: WalConfig,
    wal_dir: PathBuf,
    state: Mutex<WalState>,
}

struct WalState {
    last_sequence: u64,
    current_file: Option<WalFile>,
}

/// File currently being appended to
struct WalFile {
    writer: BufWriter<File>,
    current_size: u64,
}

impl WalFile {
    fn write_line(&mut self, json: &str, fsync: bool) -> std::io::Result<()> {
        writeln!(self.writer, "{json}")?;
        self.writer.flush()?;
        if fsync {
            self.writer.get_ref().sync_data()?;
        }
        self.current_size += json.len() as u64 + 1;
        Ok(())
    }

    /// Close without flushing whatever is still buffered
    fn abandon(self) {
        let (_file, unwritten) = self.writer.into_parts();
        if let Ok(buffered) = unwritten {
            tracing::warn!("Discarded {} unwritten bytes of the evaluation log", buffered.len());
        }
    }
}

impl Wal {
    /// Open (or create) the log in `wal_dir`.
    ///
    /// Returns the log together with every entry already on disk, in sequence order.
    pub fn open(config: WalConfig, wal_dir: PathBuf) -> Result<(Self, Vec<WalEntry>)> {
        std::fs::create_dir_all(&wal_dir)?;

        let entries = Self::read_all(&wal_dir)?;
        let last_sequence = entries.last().map_or(0, |e| e.sequence);

        tracing::info!(
            "Opened evaluation log at {:?} ({} entries, last sequence {})",
            wal_dir,
            entries.len(),
            last_sequence
        );

        let wal = Self {
            config,
            wal_dir,
            state: Mutex::new(WalState { last_sequence, current_file: None }),
        };
        Ok((wal, entries))
    }

    /// Append a record, returning its sequence number.
    ///
    /// A failed write burns its sequence and abandons the current file, so a
    /// half-written line is never followed by a second line with the same sequence.
    pub async fn append(&self, record: &EvaluationRecord) -> Result<u64> {
        let mut state = self.state.lock().await;
        let sequence = state.last_sequence + 1;

        let entry = WalEntry { id: Uuid::new_v4(), sequence, appended_at: Utc::now(), record: record.clone() };
        let json = serde_json::to_string(&entry)?;

        if state.current_file.is_none() {
            state.current_file = Some(self.create_file(sequence)?);
        }

        let written = match state.current_file.as_mut() {
            Some(file) => file.write_line(&json, self.config.fsync_every_write),
            None => Ok(()),
        };
        state.last_sequence = sequence;

        if let Err(e) = written {
            tracing::error!("Evaluation log write of sequence {} failed: {}", sequence, e);
            if let Some(file) = state.current_file.take() {
                file.abandon();
            }
            return Err(e.into());
        }

        if state.current_file.as_ref().map_or(false, |f| f.current_size >= self.config.max_file_size) {
            tracing::debug!("Rotating evaluation log after sequence {}", sequence);
            state.current_file = None;
        }

        Ok(sequence)
    }

    /// Highest sequence written so far
    pub async fn last_sequence(&self) -> u64 {
        self.state.lock().await.last_sequence
    }

    fn create_file(&self, first_sequence: u64) -> Result<WalFile> {
        let path = self.wal_dir.join(format!("ledger_{first_sequence:016x}.wal"));
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        Ok(WalFile { writer: BufWriter::new(file), current_size: 0 })
    }

    fn read_all(wal_dir: &Path) -> Result<Vec<WalEntry>> {
        let mut entries = Vec::new();

        if !wal_dir.exists() {
            return Ok(entries);
        }

        let mut paths = Vec::new();
        for dir_entry in std::fs::read_dir(wal_dir)? {
            let path = dir_entry?.path();
            if path.extension().and_then(|s| s.to_str()) == Some("wal") {
                paths.push(path);
            }
        }
        // File names carry the first sequence, so this is append order
        paths.sort();

        for path in paths {
            let content = std::fs::read_to_string(&path)?;
            for (line_no, line) in content.lines().enumerate() {
                if line.trim().is_empty() {
                    continue;
                }
                match serde_json::from_str::<WalEntry>(line) {
                    Ok(entry) => entries.push(entry),
                    Err(e) => {
                        tracing::warn!(
                            "Skipping unreadable line {} in {:?}: {}",
                            line_no + 1,
                            path,
                            e
                        );
                    }
                }
            }
        }

        // Stable: the first copy of a sequence survives
        entries.sort_by_key(|e| e.sequence);
        entries.dedup_by(|later, first| {
            let duplicate = later.sequence == first.sequence;
            if duplicate {
                tracing::warn!(
                    "Ignoring duplicate ledger sequence {} (entry {}, keeping {})",
                    later.sequence,
                    later.id,
                    first.id
                );
            }
            duplicate
        });

        Ok(entries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn record(player: &str, value: f64) -> EvaluationRecord {
        EvaluationRecord::new("evt-1", player, "sprint", "coach-a", value, "sec")
    }

    fn open(dir: &TempDir) -> (Wal, Vec<WalEntry>) {
        Wal::open(WalConfig::default(), dir.path().to_path_buf()).unwrap()
    }

    fn players(entries: &[WalEntry]) -> Vec<&str> {
        entries.iter().map(|e| e.record.player_id.as_str()).collect()
    }

    #[tokio::test]
    async fn test_append_assigns_sequences() {
        let temp_dir = TempDir::new().unwrap();
        let (wal, entries) = open(&temp_dir);
        assert!(entries.is_empty());

        assert_eq!(wal.append(&record("p1", 5.0)).await.unwrap(), 1);
        assert_eq!(wal.append(&record("p2", 6.0)).await.unwrap(), 2);
        assert_eq!(wal.last_sequence().await, 2);
    }

    #[tokio::test]
    async fn test_reopen_recovers_sequence_and_entries() {
        let temp_dir = TempDir::new().unwrap();
        {
            let (wal, _) = open(&temp_dir);
            wal.append(&record("p1", 5.0)).await.unwrap();
            wal.append(&record("p2", 6.0)).await.unwrap();
        }

        let (wal, entries) = open(&temp_dir);
        assert_eq!(players(&entries), vec!["p1", "p2"]);
        assert_eq!(wal.last_sequence().await, 2);
        assert_eq!(wal.append(&record("p3", 7.0)).await.unwrap(), 3);

        let (_, entries) = open(&temp_dir);
        assert_eq!(players(&entries), vec!["p1", "p2", "p3"]);
    }

    #[tokio::test]
    async fn test_rotation_spreads_entries_across_files() {
        let temp_dir = TempDir::new().unwrap();
        let config = WalConfig { max_file_size: 1, fsync_every_write: false };
        let (wal, _) = Wal::open(config, temp_dir.path().to_path_buf()).unwrap();

        for i in 0..3 {
            wal.append(&record(&format!("p{i}"), 5.0)).await.unwrap();
        }

        let files = std::fs::read_dir(temp_dir.path()).unwrap().count();
        assert_eq!(files, 3);
        assert_eq!(open(&temp_dir).1.len(), 3);
    }

    #[tokio::test]
    async fn test_garbage_lines_are_skipped() {
        let temp_dir = TempDir::new().unwrap();
        {
            let (wal, _) = open(&temp_dir);
            wal.append(&record("p1", 5.0)).await.unwrap();
        }
        let path = temp_dir.path().join(format!("ledger_{:016x}.wal", 1));
        let mut file = OpenOptions::new().append(true).open(path).unwrap();
        writeln!(file, "{{not json").unwrap();

        assert_eq!(open(&temp_dir).1.len(), 1);
    }

    #[tokio::test]
    async fn test_duplicate_sequence_keeps_first_copy() {
        let temp_dir = TempDir::new().unwrap();
        {
            let (wal, _) = open(&temp_dir);
            wal.append(&record("p1", 5.0)).await.unwrap();
            wal.append(&record("p2", 6.0)).await.unwrap();
        }

        // A later file repeating sequence 2
        let (_, entries) = open(&temp_dir);
        let mut repeat = entries[1].clone();
        repeat.id = Uuid::new_v4();
        repeat.record = record("p2-again", 9.0);
        let path = temp_dir.path().join(format!("ledger_{:016x}.wal", 3));
        std::fs::write(path, format!("{}\n", serde_json::to_string(&repeat).unwrap())).unwrap();

        let (wal, entries) = open(&temp_dir);
        assert_eq!(players(&entries), vec!["p1", "p2"]);
        assert_eq!(wal.append(&record("p3", 7.0)).await.unwrap(), 3);
    }

    #[cfg(target_os = "linux")]
    #[tokio::test]
    async fn test_failed_write_burns_sequence_and_starts_new_file() {
        let temp_dir = TempDir::new().unwrap();
        let (wal, _) = open(&temp_dir);
        wal.append(&record("p1", 5.0)).await.unwrap();

        // Writes to /dev/full fail with ENOSPC on flush
        {
            let full = OpenOptions::new().write(true).open("/dev/full").unwrap();
            let mut state = wal.state.lock().await;
            state.current_file = Some(WalFile { writer: BufWriter::new(full), current_size: 0 });
        }
        assert!(wal.append(&record("lost", 6.0)).await.is_err());
        assert_eq!(wal.last_sequence().await, 2);

        assert_eq!(wal.append(&record("p3", 7.0)).await.unwrap(), 3);
        drop(wal);

        let (wal, entries) = open(&temp_dir);
        assert_eq!(players(&entries), vec!["p1", "p3"]);
        assert_eq!(wal.last_sequence().await, 3);
    }
}
