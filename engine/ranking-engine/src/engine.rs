//! Ranking engine facade
//!
//! Wires the aggregator, statistics builder, scorer and cache together and
//! exposes the write path (evaluations, roster and import signals) and the
//! read path (rankings, single scores, event statistics, subscriptions).

use crate::aggregate::{AggregateUpdated, Aggregator};
use crate::cache::{
    CacheManager, Freshness, InvalidationReason, PartitionBuilder, PartitionKey, RankingCacheEntry,
};
use crate::catalog::{EventCatalog, EventSetup};
use crate::config::RankingConfig;
use crate::error::{RankingError, Result};
use crate::metrics::CacheMetricsSnapshot;
use crate::partition::{PartitionStats, PartitionStatsBuilder, PlayerValues};
use crate::roster::RosterService;
use crate::scoring::{CompositeScore, RankedPlayer, Scorer, WeightVector};
use chrono::{DateTime, Utc};
use evaluation_ledger::{
    AgeGroup, Direction, DrillId, DrillSchema, EvaluationRecord, EvaluationStore, EventId,
    PlayerId, SchemaRegistry,
};
use serde::{Deserialize, Serialize};
use statrs::statistics::{Data, Distribution};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tokio::sync::watch;
use uuid::Uuid;

/// Which weights a ranking query uses
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum WeightSelection {
    /// Default weights declared by the event's schema
    #[default]
    Default,
    Preset(String),
    Custom(BTreeMap<DrillId, f64>),
}

/// Answer to a rankings query
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RankingsResponse {
    pub event_id: EventId,
    pub age_group: AgeGroup,
    pub version: u64,

    /// Together with `version`, identifies what the client has seen. Nil when nothing is cached.
    pub epoch: Uuid,

    pub freshness: Freshness,
    pub computed_at: DateTime<Utc>,

    /// Effective weights as percentages
    pub weights: BTreeMap<DrillId, f64>,

    pub players: Vec<RankedPlayer>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Performer {
    pub player_id: PlayerId,
    pub value: f64,
}

/// Summary of one drill across an event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DrillSummary {
    pub drill_id: DrillId,
    pub label: String,
    pub unit: String,
    pub direction: Direction,
    pub count: usize,
    pub missing: usize,
    pub min: Option<f64>,
    pub max: Option<f64>,
    pub mean: Option<f64>,

    /// Best three current values, best first
    pub top_performers: Vec<Performer>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventStats {
    pub event_id: EventId,
    pub sport: String,
    pub participant_count: usize,
    pub drills: Vec<DrillSummary>,
}

const TOP_PERFORMERS: usize = 3;

/// Builds cache entries from the statistics pipeline
struct RankingPipeline {
    statistics: Arc<PartitionStatsBuilder>,
    scorer: Scorer,
    precompute_default_scores: bool,
}

#[async_trait::async_trait]
impl PartitionBuilder for RankingPipeline {
    async fn build(&self, key: &PartitionKey, version: u64) -> Result<RankingCacheEntry> {
        let values = self.statistics.event_values(&key.event_id).await?;
        let stats = self.statistics.partition_stats(&values, &key.age_group);
        let players: Vec<PlayerValues> = values.members(&key.age_group).cloned().collect();

        let default_scores = if self.precompute_default_scores {
            let weights = WeightVector::schema_defaults(&values.schema)?;
            Some(self.scorer.rank(&players, &stats, &weights))
        } else {
            None
        };

        tracing::debug!("Recomputed {} v{} over {} players", key, version, players.len());

        Ok(RankingCacheEntry {
            key: key.clone(),
            version,
            epoch: Uuid::nil(),
            computed_at: Utc::now(),
            schema: values.schema,
            stats,
            players,
            default_scores,
        })
    }
}

/// The ranking and aggregation engine
pub struct RankingEngine {
    config: RankingConfig,
    aggregator: Arc<Aggregator>,
    roster: Arc<dyn RosterService>,
    catalog: Arc<EventCatalog>,
    statistics: Arc<PartitionStatsBuilder>,
    scorer: Scorer,
    cache: CacheManager,
}

impl RankingEngine {
    /// Create an engine. Must be called inside a Tokio runtime.
    pub fn new(
        config: RankingConfig,
        store: Arc<dyn EvaluationStore>,
        roster: Arc<dyn RosterService>,
        catalog: Arc<EventCatalog>,
    ) -> Result<Self> {
        config.validate().map_err(RankingError::config)?;

        let aggregator = Arc::new(Aggregator::new(store));
        let statistics = Arc::new(PartitionStatsBuilder::new(
            aggregator.clone(),
            roster.clone(),
            catalog.clone(),
            config.scoring.min_partition_samples,
            config.scoring.current_value,
        ));
        let scorer = Scorer::new(config.scoring.missing_drill, config.scoring.degenerate_score);

        let pipeline = RankingPipeline {
            statistics: statistics.clone(),
            scorer,
            precompute_default_scores: config.cache.precompute_default_scores,
        };
        let cache = CacheManager::new(Arc::new(pipeline), config.cache.recompute_timeout());

        tracing::info!(
            "Ranking engine ready (default sport {}, fallback below {} samples)",
            config.default_sport,
            config.scoring.min_partition_samples
        );

        Ok(Self { config, aggregator, roster, catalog, statistics, scorer, cache })
    }

    /// Engine with built-in drill schemas
    pub fn with_builtin_schemas(
        config: RankingConfig,
        store: Arc<dyn EvaluationStore>,
        roster: Arc<dyn RosterService>,
    ) -> Result<Self> {
        let catalog = Arc::new(EventCatalog::new(SchemaRegistry::with_builtin(), &config.default_sport)?);
        Self::new(config, store, roster, catalog)
    }

    /// Rebuild drill aggregates from the ledger
    pub async fn restore(&self) -> Result<Vec<EventId>> {
        let events = self.aggregator.rebuild_all().await?;
        tracing::info!("Restored aggregates for {} events", events.len());
        Ok(events)
    }

    /// Record one measurement. Every cached partition of its event goes stale.
    pub async fn submit_evaluation(&self, record: EvaluationRecord) -> Result<AggregateUpdated> {
        let updated = self.aggregator.record_evaluation(record).await?;
        self.cache.invalidate_event(&updated.event_id, InvalidationReason::NewEvaluation)?;
        Ok(updated)
    }

    /// Players joined or left `age_group`.
    ///
    /// The event-wide sample changes too, so every cached partition of the
    /// event is invalidated.
    pub fn notify_roster_change(&self, event_id: &EventId, age_group: &AgeGroup) -> Result<usize> {
        let touched = self.cache.invalidate_event(event_id, InvalidationReason::RosterChange)?;
        tracing::info!("Roster change in {}/{}: {} partitions invalidated", event_id, age_group, touched);
        Ok(touched)
    }

    /// A batch import finished: invalidate what is cached and eagerly build every age group
    pub async fn notify_bulk_import_complete(&self, event_id: &EventId) -> Result<usize> {
        let mut scheduled = self.cache.invalidate_event(event_id, InvalidationReason::BulkImport)?;

        let mut groups: BTreeSet<AgeGroup> =
            self.roster.players(event_id).await?.into_iter().map(|entry| entry.age_group).collect();
        groups.insert(AgeGroup::All);

        for age_group in groups {
            let key = PartitionKey::new(event_id.clone(), age_group);
            if self.cache.wanted_version(&key).is_none() {
                self.cache.invalidate(&key, InvalidationReason::BulkImport)?;
                scheduled += 1;
            }
        }

        tracing::info!("Bulk import for {} complete, {} partitions scheduled", event_id, scheduled);
        Ok(scheduled)
    }

    /// Explicitly invalidate a single partition
    pub fn invalidate(&self, key: &PartitionKey, reason: InvalidationReason) -> Result<u64> {
        self.cache.invalidate(key, reason)
    }

    /// Register an event against a sport template, minus disabled drills, plus custom ones
    pub fn register_event(&self, event_id: &EventId, setup: &EventSetup) -> Result<Arc<DrillSchema>> {
        let schema = self.catalog.register_event(event_id.clone(), setup)?;
        self.cache.invalidate_event(event_id, InvalidationReason::Explicit)?;
        Ok(schema)
    }

    pub async fn rankings(
        &self,
        event_id: &EventId,
        age_group: &AgeGroup,
        selection: &WeightSelection,
    ) -> Result<RankingsResponse> {
        let key = PartitionKey::new(event_id.clone(), age_group.clone());
        if !self.is_tracked(&key).await? {
            let weights = resolve_weights(&self.catalog.schema_for(event_id), selection)?;
            return Ok(RankingsResponse {
                event_id: event_id.clone(),
                age_group: age_group.clone(),
                version: 0,
                epoch: Uuid::nil(),
                freshness: Freshness::Fresh,
                computed_at: Utc::now(),
                weights: weights.percentages(),
                players: Vec::new(),
            });
        }

        let read = self.cache.get_or_recompute(&key).await?;
        self.rank_entry(&read.entry, read.freshness, selection)
    }

    /// Whether a partition deserves a cache slot: it already has one, or the roster places someone in it
    async fn is_tracked(&self, key: &PartitionKey) -> Result<bool> {
        if key.event_id.is_empty() {
            return Err(RankingError::invalid_signal("query names an empty event id"));
        }
        if self.cache.contains(key) {
            return Ok(true);
        }
        let players = self.roster.players(&key.event_id).await?;
        Ok(players.iter().any(|entry| key.age_group.contains(&entry.age_group)))
    }

    /// Rank a cache entry under the requested weights
    pub fn rank_entry(
        &self,
        entry: &RankingCacheEntry,
        freshness: Freshness,
        selection: &WeightSelection,
    ) -> Result<RankingsResponse> {
        let weights = resolve_weights(&entry.schema, selection)?;

        let players = match (selection, &entry.default_scores) {
            (WeightSelection::Default, Some(scores)) => scores.clone(),
            _ => self.scorer.rank(&entry.players, &entry.stats, &weights),
        };

        Ok(RankingsResponse {
            event_id: entry.key.event_id.clone(),
            age_group: entry.key.age_group.clone(),
            version: entry.version,
            epoch: entry.epoch,
            freshness,
            computed_at: entry.computed_at,
            weights: weights.percentages(),
            players,
        })
    }

    /// Composite score of one player within a partition. `None` if the player is not a member.
    pub async fn score_player(
        &self,
        player_id: &PlayerId,
        event_id: &EventId,
        age_group: &AgeGroup,
        selection: &WeightSelection,
    ) -> Result<Option<CompositeScore>> {
        let key = PartitionKey::new(event_id.clone(), age_group.clone());
        if !self.is_tracked(&key).await? {
            resolve_weights(&self.catalog.schema_for(event_id), selection)?;
            return Ok(None);
        }

        let read = self.cache.get_or_recompute(&key).await?;
        let weights = resolve_weights(&read.entry.schema, selection)?;

        Ok(read
            .entry
            .players
            .iter()
            .find(|p| &p.player_id == player_id)
            .map(|p| self.scorer.score(p, &read.entry.stats, &weights)))
    }

    /// Statistics for a single drill, computed directly from current aggregates
    pub async fn recompute_partition(
        &self,
        event_id: &EventId,
        age_group: &AgeGroup,
        drill_id: &DrillId,
    ) -> Result<Option<PartitionStats>> {
        self.statistics.recompute_partition(event_id, age_group, drill_id).await
    }

    /// Watch a partition's cache entry as it advances
    pub fn subscribe(
        &self,
        event_id: &EventId,
        age_group: &AgeGroup,
    ) -> Result<watch::Receiver<Option<Arc<RankingCacheEntry>>>> {
        self.cache.subscribe(&PartitionKey::new(event_id.clone(), age_group.clone()))
    }

    /// Event-wide participation and per-drill summary
    pub async fn event_stats(&self, event_id: &EventId) -> Result<EventStats> {
        let values = self.statistics.event_values(event_id).await?;
        let participant_count = values.players.len();

        let drills = values
            .schema
            .drills
            .iter()
            .map(|drill| {
                let mut recorded: Vec<(&PlayerId, f64)> = values
                    .players
                    .values()
                    .filter_map(|p| p.values.get(&drill.id).map(|v| (&p.player_id, *v)))
                    .collect();

                recorded.sort_by(|a, b| {
                    let by_value = match drill.direction {
                        Direction::HigherIsBetter => b.1.total_cmp(&a.1),
                        Direction::LowerIsBetter => a.1.total_cmp(&b.1),
                    };
                    by_value.then_with(|| a.0.cmp(b.0))
                });

                let mut sorted: Vec<f64> = recorded.iter().map(|(_, v)| *v).collect();
                sorted.sort_by(f64::total_cmp);
                let count = sorted.len();
                let min = sorted.first().copied();
                let max = sorted.last().copied();
                let mean = if count > 0 { Data::new(sorted).mean() } else { None };

                DrillSummary {
                    drill_id: drill.id.clone(),
                    label: drill.label.clone(),
                    unit: drill.unit.clone(),
                    direction: drill.direction,
                    count,
                    missing: participant_count - count,
                    min,
                    max,
                    mean,
                    top_performers: recorded
                        .into_iter()
                        .take(TOP_PERFORMERS)
                        .map(|(player_id, value)| Performer { player_id: player_id.clone(), value })
                        .collect(),
                }
            })
            .collect();

        Ok(EventStats {
            event_id: event_id.clone(),
            sport: values.schema.sport.clone(),
            participant_count,
            drills,
        })
    }

    /// Forget an event: cached partitions, drill aggregates and its schema.
    ///
    /// The ledger keeps its records; `rebuild_event` brings the aggregates back.
    /// Returns the number of cached partitions dropped.
    pub fn expire_event(&self, event_id: &EventId) -> usize {
        let partitions = self.cache.expire_event(event_id);
        let aggregates = self.aggregator.remove_event(event_id);
        let registered = self.catalog.remove_event(event_id);
        tracing::info!(
            "Expired event {}: {} partitions, {} aggregates{}",
            event_id,
            partitions,
            aggregates,
            if registered { ", schema released" } else { "" }
        );
        partitions
    }

    /// Reload an event's aggregates from the ledger after it was expired
    pub async fn rebuild_event(&self, event_id: &EventId) -> Result<usize> {
        let rebuilt = self.aggregator.rebuild_event(event_id).await?;
        self.cache.invalidate_event(event_id, InvalidationReason::BulkImport)?;
        Ok(rebuilt)
    }

    pub fn cache(&self) -> &CacheManager {
        &self.cache
    }

    pub fn catalog(&self) -> &Arc<EventCatalog> {
        &self.catalog
    }

    pub fn aggregator(&self) -> &Arc<Aggregator> {
        &self.aggregator
    }

    pub fn config(&self) -> &RankingConfig {
        &self.config
    }

    pub fn metrics(&self) -> CacheMetricsSnapshot {
        self.cache.metrics()
    }
}

/// Turn a weight selection into a validated vector for `schema`
pub fn resolve_weights(schema: &DrillSchema, selection: &WeightSelection) -> Result<WeightVector> {
    match selection {
        WeightSelection::Default => WeightVector::schema_defaults(schema),
        WeightSelection::Preset(id) => WeightVector::preset(schema, id),
        WeightSelection::Custom(raw) => WeightVector::new(raw.clone())?.restrict_to(schema),
    }
}
