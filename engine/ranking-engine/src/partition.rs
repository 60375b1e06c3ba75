//! Partition statistics
//!
//! Normalization bounds for one drill within an (event, age group) partition.
//! Statistics are rebuilt wholesale from the current aggregates on every
//! recompute, never patched.

use crate::aggregate::{Aggregator, DrillAggregate};
use crate::catalog::EventCatalog;
use crate::error::Result;
use crate::roster::RosterService;
use evaluation_ledger::{
    AgeGroup, Direction, DrillDefinition, DrillId, DrillSchema, EventId, PlayerId, RecordKey,
};
use serde::{Deserialize, Serialize};
use statrs::statistics::{Data, Distribution};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Which per-player value represents a player on a drill
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CurrentValuePolicy {
    /// Mean of all attempts
    #[default]
    Mean,
    /// Most recently recorded attempt
    Latest,
}

impl CurrentValuePolicy {
    pub fn value_of(self, aggregate: &DrillAggregate) -> f64 {
        match self {
            CurrentValuePolicy::Mean => aggregate.mean,
            CurrentValuePolicy::Latest => aggregate.latest_value,
        }
    }
}

/// Which sample the bounds were taken from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatsScope {
    /// The partition's own age group had enough samples
    AgeGroup,
    /// Widened to every player in the event
    EventWide,
    /// Too few samples anywhere; every score for the drill is fixed
    Insufficient,
}

/// Normalization statistics for one drill in one partition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PartitionStats {
    pub drill_id: DrillId,
    pub direction: Direction,
    pub min: Option<f64>,
    pub max: Option<f64>,
    pub mean: Option<f64>,
    pub variance: Option<f64>,

    /// Samples in the scope the bounds were taken from
    pub sample_count: usize,

    /// Samples in the partition itself, before any widening
    pub partition_samples: usize,

    pub scope: StatsScope,
}

impl PartitionStats {
    /// Whether every score against this drill is pinned to the degenerate value
    pub fn is_degenerate(&self) -> bool {
        match (self.min, self.max) {
            (Some(min), Some(max)) => max == min,
            _ => true,
        }
    }
}

/// Current values of one player in an event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlayerValues {
    pub player_id: PlayerId,
    pub age_group: AgeGroup,

    /// Current value per drill the player attempted
    pub values: BTreeMap<DrillId, f64>,

    pub attempts: BTreeMap<DrillId, usize>,
}

impl PlayerValues {
    /// A player is ranked only once they have a value on at least one drill
    pub fn is_eligible(&self) -> bool {
        !self.values.is_empty()
    }
}

/// Consistent view of every rostered player's current values in an event
#[derive(Debug, Clone)]
pub struct EventValues {
    pub event_id: EventId,
    pub schema: Arc<DrillSchema>,
    pub players: BTreeMap<PlayerId, PlayerValues>,
}

impl EventValues {
    /// Players of a partition, in player id order
    pub fn members<'a>(&'a self, age_group: &'a AgeGroup) -> impl Iterator<Item = &'a PlayerValues> {
        self.players.values().filter(move |p| age_group.contains(&p.age_group))
    }

    fn drill_values(&self, age_group: &AgeGroup, drill_id: &DrillId) -> Vec<f64> {
        self.members(age_group).filter_map(|p| p.values.get(drill_id).copied()).collect()
    }
}

/// Builds partition statistics from roster membership and drill aggregates
pub struct PartitionStatsBuilder {
    aggregator: Arc<Aggregator>,
    roster: Arc<dyn RosterService>,
    catalog: Arc<EventCatalog>,
    min_samples: usize,
    policy: CurrentValuePolicy,
}

impl PartitionStatsBuilder {
    pub fn new(
        aggregator: Arc<Aggregator>,
        roster: Arc<dyn RosterService>,
        catalog: Arc<EventCatalog>,
        min_samples: usize,
        policy: CurrentValuePolicy,
    ) -> Self {
        Self { aggregator, roster, catalog, min_samples, policy }
    }

    /// Scan roster and aggregates into a snapshot of current values
    pub async fn event_values(&self, event_id: &EventId) -> Result<EventValues> {
        let schema = self.catalog.schema_for(event_id);
        let roster = self.roster.players(event_id).await?;

        let mut players = BTreeMap::new();
        for entry in roster {
            let mut values = BTreeMap::new();
            let mut attempts = BTreeMap::new();
            for drill_id in schema.drill_ids() {
                let key = RecordKey::new(event_id.clone(), entry.player_id.clone(), drill_id.clone());
                if let Some(aggregate) = self.aggregator.get(&key) {
                    values.insert(drill_id.clone(), self.policy.value_of(&aggregate));
                    attempts.insert(drill_id.clone(), aggregate.attempt_count);
                }
            }
            players.insert(
                entry.player_id.clone(),
                PlayerValues { player_id: entry.player_id, age_group: entry.age_group, values, attempts },
            );
        }

        Ok(EventValues { event_id: event_id.clone(), schema, players })
    }

    /// Statistics for a single drill of a partition
    pub async fn recompute_partition(
        &self,
        event_id: &EventId,
        age_group: &AgeGroup,
        drill_id: &DrillId,
    ) -> Result<Option<PartitionStats>> {
        let values = self.event_values(event_id).await?;
        Ok(values
            .schema
            .drill(drill_id)
            .map(|drill| compute_stats(&values, age_group, drill, self.min_samples)))
    }

    /// Statistics for every drill of the event's schema
    pub fn partition_stats(
        &self,
        values: &EventValues,
        age_group: &AgeGroup,
    ) -> BTreeMap<DrillId, PartitionStats> {
        values
            .schema
            .drills
            .iter()
            .map(|drill| (drill.id.clone(), compute_stats(values, age_group, drill, self.min_samples)))
            .collect()
    }

    pub fn min_samples(&self) -> usize {
        self.min_samples
    }
}

/// Apply the fallback sample rule and reduce the chosen sample
pub fn compute_stats(
    values: &EventValues,
    age_group: &AgeGroup,
    drill: &DrillDefinition,
    min_samples: usize,
) -> PartitionStats {
    let partition = values.drill_values(age_group, &drill.id);
    let partition_samples = partition.len();

    let (sample, scope) = if partition_samples >= min_samples {
        let scope = if age_group.is_wildcard() { StatsScope::EventWide } else { StatsScope::AgeGroup };
        (partition, scope)
    } else {
        let event_wide = if age_group.is_wildcard() {
            partition
        } else {
            values.drill_values(&AgeGroup::All, &drill.id)
        };
        if event_wide.len() >= min_samples {
            (event_wide, StatsScope::EventWide)
        } else {
            (event_wide, StatsScope::Insufficient)
        }
    };

    let sample_count = sample.len();
    if scope == StatsScope::Insufficient {
        return PartitionStats {
            drill_id: drill.id.clone(),
            direction: drill.direction,
            min: None,
            max: None,
            mean: None,
            variance: None,
            sample_count,
            partition_samples,
            scope,
        };
    }

    let mut sorted = sample;
    sorted.sort_by(f64::total_cmp);
    let min = sorted.first().copied();
    let max = sorted.last().copied();

    let data = Data::new(sorted);
    let mean = data.mean();
    let variance = if sample_count < 2 { Some(0.0) } else { data.variance().filter(|v| v.is_finite()) };

    PartitionStats {
        drill_id: drill.id.clone(),
        direction: drill.direction,
        min,
        max,
        mean,
        variance,
        sample_count,
        partition_samples,
        scope,
    }
}
