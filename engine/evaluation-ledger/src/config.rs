//! Configuration for the evaluation ledger

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Configuration for the on-disk ledger
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerConfig {
    /// Base directory for ledger files
    pub data_dir: PathBuf,

    /// Write-ahead log configuration
    pub wal: WalConfig,
}

/// Write-ahead log configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WalConfig {
    /// Maximum size of a single log file before rotation
    pub max_file_size: u64,

    /// Whether to fsync on every append
    pub fsync_every_write: bool,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self { data_dir: PathBuf::from("./data"), wal: WalConfig::default() }
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

impl LedgerConfig {
    /// Create a new configuration with a custom data directory
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self { data_dir: data_dir.into(), ..Default::default() }
    }

    /// Directory holding the evaluation log files
    pub fn wal_dir(&self) -> PathBuf {
        self.data_dir.join("evaluations")
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.wal.max_file_size == 0 {
            return Err("WAL max_file_size must be greater than 0".to_string());
        }

        if self.data_dir.as_os_str().is_empty() {
            return Err("data_dir must not be empty".to_string());
        }

        Ok(())
    }
}
