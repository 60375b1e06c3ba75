//! Evaluation store trait and implementations

use crate::config::LedgerConfig;
use crate::error::{LedgerError, Result};
use crate::types::{EvaluationRecord, EventId, RecordKey};
use crate::wal::Wal;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};

/// Append-only store of raw evaluation records
#[async_trait::async_trait]
pub trait EvaluationStore: Send + Sync {
    /// Append a record and return its ledger sequence
    async fn append(&self, record: EvaluationRecord) -> Result<u64>;

    /// Snapshot of every record for a (event, player, drill) key
    async fn records_for(&self, key: &RecordKey) -> Result<Vec<EvaluationRecord>>;

    /// Snapshot of every record for an event
    async fn records_for_event(&self, event_id: &EventId) -> Result<Vec<EvaluationRecord>>;

    /// Every event with at least one record, in id order
    async fn event_ids(&self) -> Result<Vec<EventId>>;

    /// Total number of records held
    async fn len(&self) -> usize;

    async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

/// Records grouped by key. A key's vector only ever grows.
#[derive(Default)]
struct RecordIndex {
    by_key: RwLock<HashMap<RecordKey, Vec<EvaluationRecord>>>,
    count: AtomicU64,
}

impl RecordIndex {
    fn insert(&self, record: EvaluationRecord) {
        self.by_key.write().entry(record.key()).or_default().push(record);
        self.count.fetch_add(1, Ordering::Relaxed);
    }

    fn records_for(&self, key: &RecordKey) -> Vec<EvaluationRecord> {
        self.by_key.read().get(key).cloned().unwrap_or_default()
    }

    fn records_for_event(&self, event_id: &EventId) -> Vec<EvaluationRecord> {
        let by_key = self.by_key.read();
        let mut keys: Vec<&RecordKey> = by_key.keys().filter(|k| &k.event_id == event_id).collect();
        keys.sort();
        keys.into_iter().flat_map(|k| by_key[k].iter().cloned()).collect()
    }

    fn event_ids(&self) -> Vec<EventId> {
        let by_key = self.by_key.read();
        let events: std::collections::BTreeSet<&EventId> = by_key.keys().map(|k| &k.event_id).collect();
        events.into_iter().cloned().collect()
    }

    fn len(&self) -> usize {
        self.count.load(Ordering::Relaxed) as usize
    }
}

fn check_record(record: &EvaluationRecord) -> Result<()> {
    if record.event_id.is_empty() || record.player_id.is_empty() || record.drill_id.is_empty() {
        return Err(LedgerError::invalid_operation(format!(
            "evaluation record is missing an identifier: {}",
            record.key()
        )));
    }
    if !record.value.is_finite() {
        return Err(LedgerError::invalid_operation(format!(
            "non-finite value {} for {}",
            record.value,
            record.key()
        )));
    }
    Ok(())
}

/// Local file-backed store: every append goes to the log before it is indexed
pub struct LocalEvaluationStore {
    config: LedgerConfig,
    wal: Wal,
    index: RecordIndex,
}

impl LocalEvaluationStore {
    /// Open the store, replaying any existing log into memory
    pub fn open(config: LedgerConfig) -> Result<Self> {
        config.validate().map_err(LedgerError::config)?;

        std::fs::create_dir_all(&config.data_dir)?;
        let (wal, entries) = Wal::open(config.wal.clone(), config.wal_dir())?;

        let index = RecordIndex::default();
        let replayed = entries.len();
        for entry in entries {
            index.insert(entry.record);
        }

        tracing::info!(
            "Evaluation ledger opened at {:?} with {} records",
            config.data_dir,
            replayed
        );

        Ok(Self { config, wal, index })
    }

    /// Open with default settings under `data_dir`
    pub fn with_default_config(data_dir: impl Into<PathBuf>) -> Result<Self> {
        Self::open(LedgerConfig::new(data_dir))
    }

    pub fn config(&self) -> &LedgerConfig {
        &self.config
    }

    pub fn data_dir(&self) -> &PathBuf {
        &self.config.data_dir
    }
}

#[async_trait::async_trait]
impl EvaluationStore for LocalEvaluationStore {
    async fn append(&self, record: EvaluationRecord) -> Result<u64> {
        check_record(&record)?;
        let sequence = self.wal.append(&record).await?;
        tracing::debug!("Ledger #{} {} = {}", sequence, record.key(), record.value);
        self.index.insert(record);
        Ok(sequence)
    }

    async fn records_for(&self, key: &RecordKey) -> Result<Vec<EvaluationRecord>> {
        Ok(self.index.records_for(key))
    }

    async fn records_for_event(&self, event_id: &EventId) -> Result<Vec<EvaluationRecord>> {
        Ok(self.index.records_for_event(event_id))
    }

    async fn event_ids(&self) -> Result<Vec<EventId>> {
        Ok(self.index.event_ids())
    }

    async fn len(&self) -> usize {
        self.index.len()
    }
}

/// In-memory store for tests and ephemeral deployments
#[derive(Default)]
pub struct InMemoryEvaluationStore {
    index: RecordIndex,
    sequence: AtomicU64,
}

impl InMemoryEvaluationStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl EvaluationStore for InMemoryEvaluationStore {
    async fn append(&self, record: EvaluationRecord) -> Result<u64> {
        check_record(&record)?;
        let sequence = self.sequence.fetch_add(1, Ordering::SeqCst) + 1;
        self.index.insert(record);
        Ok(sequence)
    }

    async fn records_for(&self, key: &RecordKey) -> Result<Vec<EvaluationRecord>> {
        Ok(self.index.records_for(key))
    }

    async fn records_for_event(&self, event_id: &EventId) -> Result<Vec<EvaluationRecord>> {
        Ok(self.index.records_for_event(event_id))
    }

    async fn event_ids(&self) -> Result<Vec<EventId>> {
        Ok(self.index.event_ids())
    }

    async fn len(&self) -> usize {
        self.index.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn record(player: &str, drill: &str, value: f64) -> EvaluationRecord {
        EvaluationRecord::new("evt-1", player, drill, "coach-a", value, "sec")
    }

    #[tokio::test]
    async fn test_in_memory_append_and_lookup() {
        let store = InMemoryEvaluationStore::new();
        assert!(store.is_empty().await);

        store.append(record("p1", "sprint", 5.0)).await.unwrap();
        store.append(record("p1", "sprint", 5.2)).await.unwrap();
        store.append(record("p2", "sprint", 6.0)).await.unwrap();

        let key = RecordKey::new("evt-1".into(), "p1".into(), "sprint".into());
        let values: Vec<f64> =
            store.records_for(&key).await.unwrap().iter().map(|r| r.value).collect();
        assert_eq!(values, vec![5.0, 5.2]);
        assert_eq!(store.len().await, 3);
        assert_eq!(store.records_for_event(&EventId::from("evt-1")).await.unwrap().len(), 3);
        assert!(store.records_for_event(&EventId::from("other")).await.unwrap().is_empty());
        assert_eq!(store.event_ids().await.unwrap(), vec![EventId::from("evt-1")]);
    }

    #[tokio::test]
    async fn test_rejects_non_finite_and_blank_ids() {
        let store = InMemoryEvaluationStore::new();
        assert!(store.append(record("p1", "sprint", f64::NAN)).await.is_err());
        assert!(store.append(record("", "sprint", 5.0)).await.is_err());
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn test_local_store_replays_on_open() {
        let temp_dir = TempDir::new().unwrap();
        {
            let store = LocalEvaluationStore::with_default_config(temp_dir.path()).unwrap();
            assert_eq!(store.append(record("p1", "sprint", 5.0)).await.unwrap(), 1);
            assert_eq!(store.append(record("p2", "sprint", 6.0)).await.unwrap(), 2);
        }

        let store = LocalEvaluationStore::with_default_config(temp_dir.path()).unwrap();
        assert_eq!(store.len().await, 2);
        assert_eq!(store.append(record("p3", "sprint", 7.0)).await.unwrap(), 3);

        let key = RecordKey::new("evt-1".into(), "p2".into(), "sprint".into());
        assert_eq!(store.records_for(&key).await.unwrap()[0].value, 6.0);
    }

    #[tokio::test]
    async fn test_concurrent_appends_are_all_kept() {
        let store = std::sync::Arc::new(InMemoryEvaluationStore::new());
        let mut handles = Vec::new();
        for i in 0..16 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                store.append(record("p1", "sprint", 5.0 + i as f64)).await.unwrap()
            }));
        }
        let mut sequences = Vec::new();
        for handle in handles {
            sequences.push(handle.await.unwrap());
        }
        sequences.sort();
        assert_eq!(sequences, (1..=16).collect::<Vec<u64>>());

        let key = RecordKey::new("evt-1".into(), "p1".into(), "sprint".into());
        assert_eq!(store.records_for(&key).await.unwrap().len(), 16);
    }
}
