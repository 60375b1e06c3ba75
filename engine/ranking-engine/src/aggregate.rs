//! Per-(player, drill) statistical rollup
//!
//! Every aggregate is recomputed from the full record set of its key. Values
//! are sorted before reduction, so the result does not depend on the order in
//! which records arrived.

use crate::error::Result;
use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use evaluation_ledger::{
    DrillId, EvaluationRecord, EvaluationStore, EvaluatorId, EventId, PlayerId, RecordKey,
};
use serde::{Deserialize, Serialize};
use statrs::statistics::{Data, Distribution};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Rollup of every attempt a player made at one drill
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DrillAggregate {
    pub key: RecordKey,
    pub mean: f64,
    pub median: f64,

    /// Sample (Bessel-corrected) variance, 0 for a single attempt
    pub variance: f64,

    pub attempt_count: usize,

    /// Value of the most recently recorded attempt
    pub latest_value: f64,

    /// Timestamp of the most recently recorded attempt
    pub last_updated: DateTime<Utc>,

    /// Distinct evaluators who contributed, sorted
    pub evaluators: Vec<EvaluatorId>,
}

impl DrillAggregate {
    /// Compute an aggregate from the complete record set of one key
    pub fn from_records(key: RecordKey, records: &[EvaluationRecord]) -> Option<Self> {
        let latest = records.iter().max_by(|a, b| {
            a.recorded_at
                .cmp(&b.recorded_at)
                .then_with(|| a.evaluator_id.cmp(&b.evaluator_id))
                .then_with(|| a.value.total_cmp(&b.value))
        })?;

        let mut values: Vec<f64> = records.iter().map(|r| r.value).collect();
        values.sort_by(f64::total_cmp);

        let attempt_count = values.len();
        let median = median_of_sorted(&values);

        let data = Data::new(values);
        let mean = data.mean().unwrap_or(median);
        let variance = if attempt_count < 2 {
            0.0
        } else {
            data.variance().filter(|v| v.is_finite()).unwrap_or(0.0)
        };

        let mut evaluators: Vec<EvaluatorId> =
            records.iter().map(|r| r.evaluator_id.clone()).collect();
        evaluators.sort();
        evaluators.dedup();

        Some(Self {
            key,
            mean,
            median,
            variance,
            attempt_count,
            latest_value: latest.value,
            last_updated: latest.recorded_at,
            evaluators,
        })
    }
}

fn median_of_sorted(values: &[f64]) -> f64 {
    let n = values.len();
    if n == 0 {
        return 0.0;
    }
    if n % 2 == 1 {
        values[n / 2]
    } else {
        (values[n / 2 - 1] + values[n / 2]) / 2.0
    }
}

/// Emitted after an aggregate has been rewritten
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AggregateUpdated {
    pub event_id: EventId,
    pub player_id: PlayerId,
    pub drill_id: DrillId,

    /// Ledger sequence of the record that triggered the update
    pub sequence: u64,

    pub attempt_count: usize,
}

/// Owns the drill aggregate table
pub struct Aggregator {
    store: Arc<dyn EvaluationStore>,
    aggregates: DashMap<RecordKey, Arc<DrillAggregate>>,
}

impl Aggregator {
    pub fn new(store: Arc<dyn EvaluationStore>) -> Self {
        Self { store, aggregates: DashMap::new() }
    }

    /// Append a record and rewrite the aggregate of its key
    pub async fn record_evaluation(&self, record: EvaluationRecord) -> Result<AggregateUpdated> {
        let key = record.key();
        let sequence = self.store.append(record).await?;

        let records = self.store.records_for(&key).await?;
        let attempt_count = match DrillAggregate::from_records(key.clone(), &records) {
            Some(aggregate) => self.persist(aggregate),
            None => 0,
        };

        tracing::debug!("Aggregate {} now has {} attempts", key, attempt_count);

        Ok(AggregateUpdated {
            event_id: key.event_id,
            player_id: key.player_id,
            drill_id: key.drill_id,
            sequence,
            attempt_count,
        })
    }

    /// Recompute every aggregate of an event from the ledger
    pub async fn rebuild_event(&self, event_id: &EventId) -> Result<usize> {
        let mut grouped: BTreeMap<RecordKey, Vec<EvaluationRecord>> = BTreeMap::new();
        for record in self.store.records_for_event(event_id).await? {
            grouped.entry(record.key()).or_default().push(record);
        }

        let rebuilt = grouped.len();
        for (key, records) in grouped {
            if let Some(aggregate) = DrillAggregate::from_records(key, &records) {
                self.persist(aggregate);
            }
        }

        tracing::info!("Rebuilt {} drill aggregates for event {}", rebuilt, event_id);
        Ok(rebuilt)
    }

    /// Rebuild every event found in the ledger
    pub async fn rebuild_all(&self) -> Result<Vec<EventId>> {
        let events = self.store.event_ids().await?;
        for event_id in &events {
            self.rebuild_event(event_id).await?;
        }
        Ok(events)
    }

    /// Store an aggregate unless a newer one (built from more records) is already present.
    /// Returns the attempt count of the aggregate left in the table.
    fn persist(&self, aggregate: DrillAggregate) -> usize {
        match self.aggregates.entry(aggregate.key.clone()) {
            Entry::Occupied(mut existing) => {
                if existing.get().attempt_count <= aggregate.attempt_count {
                    existing.insert(Arc::new(aggregate));
                }
                existing.get().attempt_count
            }
            Entry::Vacant(slot) => {
                let count = aggregate.attempt_count;
                slot.insert(Arc::new(aggregate));
                count
            }
        }
    }

    pub fn get(&self, key: &RecordKey) -> Option<Arc<DrillAggregate>> {
        self.aggregates.get(key).map(|entry| entry.value().clone())
    }

    /// Drop all aggregates of an event, returning how many were held
    pub fn remove_event(&self, event_id: &EventId) -> usize {
        let before = self.aggregates.len();
        self.aggregates.retain(|key, _| &key.event_id != event_id);
        before.saturating_sub(self.aggregates.len())
    }

    pub fn len(&self) -> usize {
        self.aggregates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.aggregates.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use evaluation_ledger::InMemoryEvaluationStore;

    fn at(second: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 5, 2, 9, 0, second).unwrap()
    }

    fn attempt(evaluator: &str, value: f64, second: u32) -> EvaluationRecord {
        EvaluationRecord::new("evt", "p1", "40m_dash", evaluator, value, "sec").recorded_at(at(second))
    }

    fn key() -> RecordKey {
        RecordKey::new("evt".into(), "p1".into(), "40m_dash".into())
    }

    #[test]
    fn test_single_attempt_has_zero_variance() {
        let aggregate = DrillAggregate::from_records(key(), &[attempt("a", 4.8, 0)]).unwrap();
        assert_eq!(aggregate.mean, 4.8);
        assert_eq!(aggregate.median, 4.8);
        assert_eq!(aggregate.variance, 0.0);
        assert_eq!(aggregate.attempt_count, 1);
    }

    #[test]
    fn test_sample_variance_and_median() {
        let records = [attempt("a", 2.0, 0), attempt("b", 4.0, 1), attempt("a", 6.0, 2), attempt("c", 8.0, 3)];
        let aggregate = DrillAggregate::from_records(key(), &records).unwrap();
        assert_eq!(aggregate.mean, 5.0);
        assert_eq!(aggregate.median, 5.0);
        // sum of squared deviations 20 over n - 1 = 3
        assert!((aggregate.variance - 20.0 / 3.0).abs() < 1e-12);
        assert_eq!(aggregate.latest_value, 8.0);
        assert_eq!(aggregate.last_updated, at(3));
        let expected: Vec<EvaluatorId> = ["a", "b", "c"].into_iter().map(EvaluatorId::from).collect();
        assert_eq!(aggregate.evaluators, expected);
    }

    #[test]
    fn test_empty_record_set_has_no_aggregate() {
        assert!(DrillAggregate::from_records(key(), &[]).is_none());
    }

    #[tokio::test]
    async fn test_record_evaluation_rewrites_aggregate() {
        let aggregator = Aggregator::new(Arc::new(InMemoryEvaluationStore::new()));

        let first = aggregator.record_evaluation(attempt("a", 5.0, 0)).await.unwrap();
        assert_eq!(first.attempt_count, 1);
        assert_eq!(first.sequence, 1);

        let second = aggregator.record_evaluation(attempt("b", 6.0, 1)).await.unwrap();
        assert_eq!(second.attempt_count, 2);

        let aggregate = aggregator.get(&key()).unwrap();
        assert_eq!(aggregate.mean, 5.5);
        assert_eq!(aggregate.latest_value, 6.0);
    }

    #[tokio::test]
    async fn test_rebuild_matches_incremental() {
        let store = Arc::new(InMemoryEvaluationStore::new());
        let live = Aggregator::new(store.clone());
        for (i, value) in [5.1, 4.9, 5.3].into_iter().enumerate() {
            live.record_evaluation(attempt("a", value, i as u32)).await.unwrap();
        }

        let rebuilt = Aggregator::new(store);
        assert_eq!(rebuilt.rebuild_all().await.unwrap(), vec![EventId::from("evt")]);
        assert_eq!(rebuilt.get(&key()), live.get(&key()));
    }

    #[tokio::test]
    async fn test_remove_event_then_rebuild() {
        let aggregator = Aggregator::new(Arc::new(InMemoryEvaluationStore::new()));
        aggregator.record_evaluation(attempt("a", 5.0, 0)).await.unwrap();
        aggregator
            .record_evaluation(EvaluationRecord::new("other", "p1", "40m_dash", "a", 5.5, "sec"))
            .await
            .unwrap();

        assert_eq!(aggregator.remove_event(&"evt".into()), 1);
        assert!(aggregator.get(&key()).is_none());
        assert_eq!(aggregator.len(), 1);

        assert_eq!(aggregator.rebuild_event(&"evt".into()).await.unwrap(), 1);
        assert_eq!(aggregator.get(&key()).unwrap().attempt_count, 1);
    }

    #[tokio::test]
    async fn test_smaller_snapshot_never_overwrites_larger() {
        let aggregator = Aggregator::new(Arc::new(InMemoryEvaluationStore::new()));
        let records = [attempt("a", 5.0, 0), attempt("b", 6.0, 1)];
        let full = DrillAggregate::from_records(key(), &records).unwrap();
        let partial = DrillAggregate::from_records(key(), &records[..1]).unwrap();

        assert_eq!(aggregator.persist(full), 2);
        assert_eq!(aggregator.persist(partial), 2);
        assert_eq!(aggregator.get(&key()).unwrap().attempt_count, 2);
    }

    #[tokio::test]
    async fn test_concurrent_writers_converge() {
        let aggregator = Arc::new(Aggregator::new(Arc::new(InMemoryEvaluationStore::new())));
        let handles: Vec<_> = (0..20)
            .map(|i| {
                let aggregator = aggregator.clone();
                tokio::spawn(async move {
                    aggregator.record_evaluation(attempt("a", 4.0 + i as f64 * 0.1, i)).await.unwrap()
                })
            })
            .collect();
        futures::future::join_all(handles).await;

        assert_eq!(aggregator.get(&key()).unwrap().attempt_count, 20);
    }
}
