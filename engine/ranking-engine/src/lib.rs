//! # Ranking Engine
//!
//! Turns a stream of immutable drill evaluations into per-player aggregates,
//! per-partition normalization statistics and weighted composite rankings,
//! served from a versioned cache that stays correct under concurrent writes.
//!
//! ## Pipeline
//!
//! - **Aggregator**: mean/median/variance per (player, drill), recomputed from the full record set
//! - **PartitionStatsBuilder**: min/max per (event, age group, drill) with event-wide fallback
//! - **Scorer**: normalization, inversion for lower-is-better drills, weighted average
//! - **CacheManager**: coalescing recompute queue, freshness tracking, subscriptions
//! - **RankingEngine**: facade over the whole pipeline
//!
//! ## Usage
//!
//! ```rust
//! use evaluation_ledger::{AgeGroup, EvaluationRecord, InMemoryEvaluationStore};
//! use ranking_engine::{InMemoryRoster, RankingConfig, RankingEngine, WeightSelection};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let roster = Arc::new(InMemoryRoster::new());
//!     roster.add_player("combine".into(), "p1".into(), AgeGroup::group("U12"));
//!
//!     let engine = RankingEngine::with_builtin_schemas(
//!         RankingConfig::default(),
//!         Arc::new(InMemoryEvaluationStore::new()),
//!         roster,
//!     )?;
//!
//!     engine
//!         .submit_evaluation(EvaluationRecord::new("combine", "p1", "40m_dash", "coach", 4.9, "sec"))
//!         .await?;
//!
//!     let rankings = engine
//!         .rankings(&"combine".into(), &AgeGroup::All, &WeightSelection::Default)
//!         .await?;
//!     assert_eq!(rankings.players.len(), 1);
//!     Ok(())
//! }
//! ```

pub mod aggregate;
pub mod cache;
pub mod catalog;
pub mod config;
pub mod engine;
pub mod error;
pub mod metrics;
pub mod partition;
pub mod roster;
pub mod scoring;


pub use aggregate::{AggregateUpdated, Aggregator, DrillAggregate};
pub use cache::{
    CacheManager, CacheRead, Freshness, InvalidationReason, PartitionBuilder, PartitionKey,
    PartitionState, RankingCacheEntry,
};
pub use catalog::{compose, CustomDrill, EventCatalog, EventSetup};
pub use config::{CacheConfig, RankingConfig, ScoringConfig};
pub use engine::{
    resolve_weights, DrillSummary, EventStats, Performer, RankingEngine, RankingsResponse,
    WeightSelection,
};
pub use error::{RankingError, Result};
pub use metrics::{CacheMetrics, CacheMetricsSnapshot};
pub use partition::{
    compute_stats, CurrentValuePolicy, EventValues, PartitionStats, PartitionStatsBuilder,
    PlayerValues, StatsScope,
};
pub use roster::{InMemoryRoster, RosterEntry, RosterService};
pub use scoring::{normalize, CompositeScore, MissingDrillPolicy, RankedPlayer, Scorer, WeightVector};

/// Below this many samples an age-group partition widens to the event
pub const DEFAULT_MIN_PARTITION_SAMPLES: usize = 3;

/// Score for a drill with no usable spread
pub const DEFAULT_DEGENERATE_SCORE: f64 = 50.0;

pub const DEFAULT_RECOMPUTE_TIMEOUT_MS: u64 = 250;
