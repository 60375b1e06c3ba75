//! # Evaluation Ledger
//!
//! Append-only storage for combine drill evaluations, plus the identifier and
//! drill schema types shared by the ranking crates.
//!
//! ## Architecture
//!
//! - **EvaluationStore**: async trait over the ledger
//! - **LocalEvaluationStore**: JSON-lines write-ahead log, replayed into memory on open
//! - **InMemoryEvaluationStore**: volatile store for tests
//! - **SchemaRegistry**: built-in drill templates per sport
//!
//! ## Usage
//!
//! ```rust
//! use evaluation_ledger::{EvaluationRecord, EvaluationStore, LocalEvaluationStore};
//! use tempfile::TempDir;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let temp_dir = TempDir::new()?;
//!     let store = LocalEvaluationStore::with_default_config(temp_dir.path())?;
//!
//!     let record = EvaluationRecord::new("spring-combine", "p-17", "40m_dash", "coach-1", 4.82, "sec");
//!     let sequence = store.append(record).await?;
//!     assert_eq!(sequence, 1);
//!
//!     Ok(())
//! }
//! ```

pub mod backend;
pub mod config;
pub mod error;
pub mod schema;
pub mod types;
pub mod wal;

pub use backend::{EvaluationStore, InMemoryEvaluationStore, LocalEvaluationStore};
pub use config::{LedgerConfig, WalConfig};
pub use error::{LedgerError, Result};
pub use schema::{Direction, DrillDefinition, DrillSchema, SchemaRegistry, WeightPreset};
pub use types::{AgeGroup, DrillId, EvaluationRecord, EvaluatorId, EventId, PlayerId, RecordKey};

pub use chrono::{DateTime, Utc};
