//! Composite scoring
//!
//! Raw drill values are normalized to 0..=100 against partition statistics and
//! combined with a weight vector that is normalized exactly once, on
//! construction.

use crate::error::{RankingError, Result};
use crate::partition::{PartitionStats, PlayerValues};
use evaluation_ledger::{AgeGroup, Direction, DrillId, DrillSchema, PlayerId};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeMap;

/// Treatment of a weighted drill the player never attempted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MissingDrillPolicy {
    /// The drill scores 0 and keeps its weight
    #[default]
    ScoreZero,
    /// The drill is dropped and the remaining weights are renormalized
    Exclude,
}

/// Validated non-negative weights, normalized to fractions of their total
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeightVector {
    raw: BTreeMap<DrillId, f64>,
    fractions: BTreeMap<DrillId, f64>,
    total: f64,
}

impl WeightVector {
    pub fn new(raw: BTreeMap<DrillId, f64>) -> Result<Self> {
        if let Some((drill, weight)) = raw.iter().find(|(_, w)| !w.is_finite() || **w < 0.0) {
            return Err(RankingError::invalid_weights(format!(
                "weight for {drill} must be a non-negative number, got {weight}"
            )));
        }

        let total: f64 = raw.values().sum();
        if !total.is_finite() {
            return Err(RankingError::invalid_weights("weights overflow"));
        }

        let fractions = if total > 0.0 {
            raw.iter().filter(|(_, w)| **w > 0.0).map(|(d, w)| (d.clone(), w / total)).collect()
        } else {
            BTreeMap::new()
        };

        Ok(Self { raw, fractions, total })
    }

    /// Default weights declared by the schema
    pub fn schema_defaults(schema: &DrillSchema) -> Result<Self> {
        Self::new(schema.default_weights())
    }

    /// Named preset of the schema
    pub fn preset(schema: &DrillSchema, preset_id: &str) -> Result<Self> {
        let preset =
            schema.preset(preset_id).ok_or_else(|| RankingError::UnknownPreset(preset_id.to_string()))?;
        Self::new(preset.weights.clone())
    }

    /// Drop weights for drills the schema does not declare, renormalizing the rest
    pub fn restrict_to(self, schema: &DrillSchema) -> Result<Self> {
        let (known, unknown): (BTreeMap<DrillId, f64>, BTreeMap<DrillId, f64>) =
            self.raw.into_iter().partition(|(drill, _)| schema.drill(drill).is_some());

        if !unknown.is_empty() {
            let ignored: Vec<&str> = unknown.keys().map(DrillId::as_str).collect();
            tracing::warn!("Ignoring weights for drills outside the {} schema: {}", schema.id, ignored.join(", "));
        }
        Self::new(known)
    }

    /// Weights with a positive share, as fractions summing to 1
    pub fn fractions(&self) -> &BTreeMap<DrillId, f64> {
        &self.fractions
    }

    /// Weights as percentages summing to 100
    pub fn percentages(&self) -> BTreeMap<DrillId, f64> {
        self.fractions.iter().map(|(d, f)| (d.clone(), f * 100.0)).collect()
    }

    pub fn raw(&self) -> &BTreeMap<DrillId, f64> {
        &self.raw
    }

    pub fn total(&self) -> f64 {
        self.total
    }

    pub fn is_zero(&self) -> bool {
        self.fractions.is_empty()
    }
}

/// Normalize a raw value against partition statistics.
///
/// Without usable bounds, or when `max == min`, the result is `degenerate_score`.
pub fn normalize(value: f64, stats: &PartitionStats, degenerate_score: f64) -> f64 {
    match (stats.min, stats.max) {
        (Some(min), Some(max)) if max > min => {
            let normalized = match stats.direction {
                Direction::HigherIsBetter => (value - min) / (max - min) * 100.0,
                Direction::LowerIsBetter => (max - value) / (max - min) * 100.0,
            };
            normalized.clamp(0.0, 100.0)
        }
        _ => degenerate_score,
    }
}

/// A player's composite score with its per-drill breakdown
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompositeScore {
    pub player_id: PlayerId,
    pub age_group: AgeGroup,
    pub composite_score: f64,

    /// Normalized score per weighted drill
    pub per_drill_normalized: BTreeMap<DrillId, f64>,

    /// Weighted drills the player has no attempt for
    pub missing_drills: Vec<DrillId>,
}

/// One row of a ranking
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankedPlayer {
    /// 1-based position
    pub rank: usize,

    #[serde(flatten)]
    pub score: CompositeScore,
}

/// Scores and orders players
#[derive(Debug, Clone, Copy)]
pub struct Scorer {
    missing_drill: MissingDrillPolicy,
    degenerate_score: f64,
}

impl Scorer {
    pub fn new(missing_drill: MissingDrillPolicy, degenerate_score: f64) -> Self {
        Self { missing_drill, degenerate_score }
    }

    pub fn score(
        &self,
        player: &PlayerValues,
        stats: &BTreeMap<DrillId, PartitionStats>,
        weights: &WeightVector,
    ) -> CompositeScore {
        let mut per_drill_normalized = BTreeMap::new();
        let mut missing_drills = Vec::new();
        let mut weighted_sum = 0.0;
        let mut present_weight = 0.0;

        for (drill_id, fraction) in weights.fractions() {
            let Some(drill_stats) = stats.get(drill_id) else {
                continue;
            };

            match player.values.get(drill_id) {
                Some(value) => {
                    let normalized = normalize(*value, drill_stats, self.degenerate_score);
                    per_drill_normalized.insert(drill_id.clone(), normalized);
                    weighted_sum += fraction * normalized;
                    present_weight += fraction;
                }
                None => {
                    missing_drills.push(drill_id.clone());
                    if self.missing_drill == MissingDrillPolicy::ScoreZero {
                        per_drill_normalized.insert(drill_id.clone(), 0.0);
                    }
                }
            }
        }

        let composite_score = match self.missing_drill {
            MissingDrillPolicy::ScoreZero => weighted_sum,
            MissingDrillPolicy::Exclude if present_weight > 0.0 => weighted_sum / present_weight,
            MissingDrillPolicy::Exclude => 0.0,
        };

        CompositeScore {
            player_id: player.player_id.clone(),
            age_group: player.age_group.clone(),
            composite_score,
            per_drill_normalized,
            missing_drills,
        }
    }

    /// Rank eligible players: score descending, then player id ascending
    pub fn rank<'a>(
        &self,
        players: impl IntoIterator<Item = &'a PlayerValues>,
        stats: &BTreeMap<DrillId, PartitionStats>,
        weights: &WeightVector,
    ) -> Vec<RankedPlayer> {
        let mut scores: Vec<CompositeScore> = players
            .into_iter()
            .filter(|p| p.is_eligible())
            .map(|p| self.score(p, stats, weights))
            .collect();

        scores.sort_by(compare_scores);

        scores
            .into_iter()
            .enumerate()
            .map(|(i, score)| RankedPlayer { rank: i + 1, score })
            .collect()
    }
}

fn compare_scores(a: &CompositeScore, b: &CompositeScore) -> Ordering {
    b.composite_score
        .total_cmp(&a.composite_score)
        .then_with(|| a.player_id.cmp(&b.player_id))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::partition::StatsScope;

    fn weights(pairs: &[(&str, f64)]) -> WeightVector {
        WeightVector::new(pairs.iter().map(|(d, w)| (DrillId::from(*d), *w)).collect()).unwrap()
    }

    fn bounded(drill: &str, direction: Direction, min: f64, max: f64) -> PartitionStats {
        PartitionStats {
            drill_id: drill.into(),
            direction,
            min: Some(min),
            max: Some(max),
            mean: None,
            variance: None,
            sample_count: 3,
            partition_samples: 3,
            scope: StatsScope::AgeGroup,
        }
    }

    fn player(id: &str, values: &[(&str, f64)]) -> PlayerValues {
        PlayerValues {
            player_id: id.into(),
            age_group: AgeGroup::group("U12"),
            values: values.iter().map(|(d, v)| (DrillId::from(*d), *v)).collect(),
            attempts: values.iter().map(|(d, _)| (DrillId::from(*d), 1)).collect(),
        }
    }

    /// Stats over 0..=100 so a raw value is its own normalized score
    fn identity_stats(drills: &[&str]) -> BTreeMap<DrillId, PartitionStats> {
        drills
            .iter()
            .map(|d| (DrillId::from(*d), bounded(d, Direction::HigherIsBetter, 0.0, 100.0)))
            .collect()
    }

    #[test]
    fn test_sprint_lower_is_better_normalization() {
        let stats = bounded("sprint", Direction::LowerIsBetter, 5.0, 7.0);
        assert_eq!(normalize(5.0, &stats, 50.0), 100.0);
        assert_eq!(normalize(6.0, &stats, 50.0), 50.0);
        assert_eq!(normalize(7.0, &stats, 50.0), 0.0);
    }

    #[test]
    fn test_out_of_range_values_are_clamped() {
        let stats = bounded("jump", Direction::HigherIsBetter, 10.0, 20.0);
        assert_eq!(normalize(25.0, &stats, 50.0), 100.0);
        assert_eq!(normalize(5.0, &stats, 50.0), 0.0);
    }

    #[test]
    fn test_degenerate_bounds_score_fifty() {
        let flat = bounded("jump", Direction::HigherIsBetter, 42.0, 42.0);
        assert_eq!(normalize(42.0, &flat, 50.0), 50.0);

        let mut unbounded = flat.clone();
        unbounded.min = None;
        unbounded.max = None;
        assert_eq!(normalize(1000.0, &unbounded, 50.0), 50.0);
    }

    #[test]
    fn test_weighted_composite() {
        let scorer = Scorer::new(MissingDrillPolicy::ScoreZero, 50.0);
        let stats = identity_stats(&["a", "b", "c", "d", "e"]);
        let w = weights(&[("a", 30.0), ("b", 20.0), ("c", 15.0), ("d", 15.0), ("e", 20.0)]);
        let p = player("p1", &[("a", 80.0), ("b", 60.0), ("c", 100.0), ("d", 40.0), ("e", 50.0)]);

        let score = scorer.score(&p, &stats, &w);
        assert!((score.composite_score - 67.0).abs() < 1e-9);
        assert_eq!(score.per_drill_normalized.len(), 5);
    }

    #[test]
    fn test_unnormalized_weights_match_normalized() {
        let scorer = Scorer::new(MissingDrillPolicy::ScoreZero, 50.0);
        let stats = identity_stats(&["a", "b"]);
        let p = player("p1", &[("a", 70.0), ("b", 20.0)]);

        let percent = scorer.score(&p, &stats, &weights(&[("a", 75.0), ("b", 25.0)]));
        let doubled = scorer.score(&p, &stats, &weights(&[("a", 150.0), ("b", 50.0)]));
        let fraction = scorer.score(&p, &stats, &weights(&[("a", 0.75), ("b", 0.25)]));
        assert_eq!(percent.composite_score, doubled.composite_score);
        assert_eq!(percent.composite_score, fraction.composite_score);
        assert_eq!(percent.composite_score, 57.5);
    }

    #[test]
    fn test_missing_drill_scores_zero_by_default() {
        let scorer = Scorer::new(MissingDrillPolicy::ScoreZero, 50.0);
        let stats = identity_stats(&["a", "b"]);
        let p = player("p1", &[("a", 80.0)]);

        let score = scorer.score(&p, &stats, &weights(&[("a", 50.0), ("b", 50.0)]));
        assert_eq!(score.composite_score, 40.0);
        assert_eq!(score.missing_drills, vec![DrillId::from("b")]);
        assert_eq!(score.per_drill_normalized[&DrillId::from("b")], 0.0);
    }

    #[test]
    fn test_missing_drill_exclusion_renormalizes() {
        let scorer = Scorer::new(MissingDrillPolicy::Exclude, 50.0);
        let stats = identity_stats(&["a", "b"]);
        let p = player("p1", &[("a", 80.0)]);

        let score = scorer.score(&p, &stats, &weights(&[("a", 50.0), ("b", 50.0)]));
        assert_eq!(score.composite_score, 80.0);
        assert!(!score.per_drill_normalized.contains_key(&DrillId::from("b")));
    }

    #[test]
    fn test_degenerate_drill_still_counts_in_average() {
        let scorer = Scorer::new(MissingDrillPolicy::ScoreZero, 50.0);
        let mut stats = identity_stats(&["a"]);
        stats.insert("b".into(), bounded("b", Direction::HigherIsBetter, 3.0, 3.0));
        let p = player("p1", &[("a", 100.0), ("b", 3.0)]);

        let score = scorer.score(&p, &stats, &weights(&[("a", 1.0), ("b", 1.0)]));
        assert_eq!(score.composite_score, 75.0);
    }

    #[test]
    fn test_zero_weights_rank_by_player_id() {
        let scorer = Scorer::new(MissingDrillPolicy::ScoreZero, 50.0);
        let stats = identity_stats(&["a"]);
        let players = [player("p2", &[("a", 90.0)]), player("p1", &[("a", 10.0)])];

        let ranked = scorer.rank(&players, &stats, &weights(&[("a", 0.0)]));
        let ids: Vec<&str> = ranked.iter().map(|r| r.score.player_id.as_str()).collect();
        assert_eq!(ids, vec!["p1", "p2"]);
        assert!(ranked.iter().all(|r| r.score.composite_score == 0.0));
    }

    #[test]
    fn test_rank_orders_and_breaks_ties_by_player_id() {
        let scorer = Scorer::new(MissingDrillPolicy::ScoreZero, 50.0);
        let stats = identity_stats(&["a"]);
        let players = [
            player("p3", &[("a", 60.0)]),
            player("p2", &[("a", 90.0)]),
            player("p1", &[("a", 60.0)]),
            player("p4", &[]),
        ];

        let ranked = scorer.rank(&players, &stats, &weights(&[("a", 1.0)]));
        let order: Vec<(usize, &str)> =
            ranked.iter().map(|r| (r.rank, r.score.player_id.as_str())).collect();
        assert_eq!(order, vec![(1, "p2"), (2, "p1"), (3, "p3")]);
    }

    #[test]
    fn test_invalid_weights_rejected() {
        let negative = WeightVector::new([(DrillId::from("a"), -1.0)].into_iter().collect());
        assert!(matches!(negative, Err(RankingError::InvalidWeights(_))));

        let nan = WeightVector::new([(DrillId::from("a"), f64::NAN)].into_iter().collect());
        assert!(nan.is_err());
    }

    #[test]
    fn test_presets_and_weights_outside_schema() {
        let registry = evaluation_ledger::SchemaRegistry::default();
        let football = registry.get("football").unwrap();

        let speed = WeightVector::preset(football, "speed").unwrap();
        assert!((speed.percentages()[&DrillId::from("40m_dash")] - 40.0).abs() < 1e-9);
        assert!(matches!(WeightVector::preset(football, "nope"), Err(RankingError::UnknownPreset(_))));

        let defaults = WeightVector::schema_defaults(football).unwrap();
        assert_eq!(defaults.clone().restrict_to(football).unwrap(), defaults);

        let stray = weights(&[("bench_press", 3.0), ("40m_dash", 1.0)]).restrict_to(football).unwrap();
        assert_eq!(stray.raw().len(), 1);
        assert_eq!(stray.total(), 1.0);
        assert_eq!(stray.percentages()[&DrillId::from("40m_dash")], 100.0);

        let only_stray = weights(&[("bench_press", 1.0)]).restrict_to(football).unwrap();
        assert!(only_stray.is_zero());
    }
}
