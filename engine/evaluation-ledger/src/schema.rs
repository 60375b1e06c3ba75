//! Drill schemas
//!
//! A drill schema declares which drills an event measures, the unit and
//! direction of each drill, and the coach-facing default weights and presets.

use crate::types::DrillId;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Whether a larger raw value is a better result
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    #[default]
    HigherIsBetter,
    /// Timed drills such as sprints
    LowerIsBetter,
}

/// A single measured drill
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DrillDefinition {
    pub id: DrillId,
    pub label: String,
    pub unit: String,
    #[serde(default)]
    pub direction: Direction,
    pub category: String,

    /// Declared bounds. Enforced by ingest, informational here.
    #[serde(default)]
    pub min_value: Option<f64>,
    #[serde(default)]
    pub max_value: Option<f64>,

    #[serde(default)]
    pub default_weight: f64,
}

impl DrillDefinition {
    pub fn new(
        id: &str,
        label: &str,
        unit: &str,
        direction: Direction,
        category: &str,
        default_weight: f64,
    ) -> Self {
        Self {
            id: DrillId::from(id),
            label: label.to_string(),
            unit: unit.to_string(),
            direction,
            category: category.to_string(),
            min_value: None,
            max_value: None,
            default_weight,
        }
    }

    pub fn with_bounds(mut self, min_value: f64, max_value: f64) -> Self {
        self.min_value = Some(min_value);
        self.max_value = Some(max_value);
        self
    }

    pub fn lower_is_better(&self) -> bool {
        self.direction == Direction::LowerIsBetter
    }

    /// Whether a value satisfies the declared bounds
    pub fn within_bounds(&self, value: f64) -> bool {
        value.is_finite()
            && self.min_value.map_or(true, |min| value >= min)
            && self.max_value.map_or(true, |max| value <= max)
    }
}

/// Named weight vector a coach can pick instead of typing weights
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeightPreset {
    pub id: String,
    pub name: String,
    pub description: String,
    pub weights: BTreeMap<DrillId, f64>,
}

impl WeightPreset {
    fn new(id: &str, name: &str, description: &str, weights: &[(&str, f64)]) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
            description: description.to_string(),
            weights: weights.iter().map(|(k, w)| (DrillId::from(*k), *w)).collect(),
        }
    }
}

/// The set of drills measured at an event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DrillSchema {
    pub id: String,
    pub sport: String,
    pub name: String,
    pub drills: Vec<DrillDefinition>,
    #[serde(default)]
    pub presets: Vec<WeightPreset>,
}

impl DrillSchema {
    pub fn new(id: &str, sport: &str, name: &str, drills: Vec<DrillDefinition>) -> Self {
        Self {
            id: id.to_string(),
            sport: sport.to_string(),
            name: name.to_string(),
            drills,
            presets: Vec::new(),
        }
    }

    pub fn drill(&self, id: &DrillId) -> Option<&DrillDefinition> {
        self.drills.iter().find(|d| &d.id == id)
    }

    pub fn drill_ids(&self) -> impl Iterator<Item = &DrillId> {
        self.drills.iter().map(|d| &d.id)
    }

    /// Default weights declared on each drill
    pub fn default_weights(&self) -> BTreeMap<DrillId, f64> {
        self.drills.iter().map(|d| (d.id.clone(), d.default_weight)).collect()
    }

    pub fn preset(&self, id: &str) -> Option<&WeightPreset> {
        self.presets.iter().find(|p| p.id.eq_ignore_ascii_case(id))
    }
}

/// Built-in drill templates, keyed by sport id
#[derive(Debug, Clone)]
pub struct SchemaRegistry {
    schemas: BTreeMap<String, DrillSchema>,
}

impl Default for SchemaRegistry {
    fn default() -> Self {
        Self::with_builtin()
    }
}

impl SchemaRegistry {
    pub fn empty() -> Self {
        Self { schemas: BTreeMap::new() }
    }

    pub fn with_builtin() -> Self {
        let mut registry = Self::empty();
        registry.register(football());
        registry.register(basketball());
        registry.register(soccer());
        registry.register(baseball());
        registry.register(track());
        registry.register(volleyball());
        registry
    }

    pub fn register(&mut self, schema: DrillSchema) {
        self.schemas.insert(schema.id.clone(), schema);
    }

    /// Look up by template id, then by sport name, ignoring case
    pub fn get(&self, sport: &str) -> Option<&DrillSchema> {
        let key = sport.trim().to_ascii_lowercase();
        if key.is_empty() {
            return None;
        }
        self.schemas
            .get(&key)
            .or_else(|| self.schemas.values().find(|s| s.sport.eq_ignore_ascii_case(&key)))
    }

    pub fn sports(&self) -> impl Iterator<Item = &str> {
        self.schemas.keys().map(String::as_str)
    }
}

fn football() -> DrillSchema {
    use Direction::*;
    let mut schema = DrillSchema::new(
        "football",
        "Football",
        "Football Combine",
        vec![
            DrillDefinition::new("40m_dash", "40-Yard Dash", "sec", LowerIsBetter, "speed", 0.3)
                .with_bounds(3.0, 15.0),
            DrillDefinition::new("vertical_jump", "Vertical Jump", "in", HigherIsBetter, "power", 0.2)
                .with_bounds(0.0, 50.0),
            DrillDefinition::new("catching", "Catching", "pts", HigherIsBetter, "skills", 0.15)
                .with_bounds(0.0, 100.0),
            DrillDefinition::new("throwing", "Throwing", "pts", HigherIsBetter, "skills", 0.15)
                .with_bounds(0.0, 100.0),
            DrillDefinition::new("agility", "Agility", "pts", HigherIsBetter, "agility", 0.2)
                .with_bounds(0.0, 100.0),
        ],
    );
    schema.presets = vec![
        WeightPreset::new(
            "balanced",
            "Balanced",
            "Equal emphasis on all skills",
            &[
                ("40m_dash", 0.2),
                ("vertical_jump", 0.2),
                ("catching", 0.2),
                ("throwing", 0.2),
                ("agility", 0.2),
            ],
        ),
        WeightPreset::new(
            "speed",
            "Speed Focused",
            "Emphasizes speed and athleticism",
            &[
                ("40m_dash", 0.4),
                ("vertical_jump", 0.3),
                ("catching", 0.1),
                ("throwing", 0.1),
                ("agility", 0.1),
            ],
        ),
        WeightPreset::new(
            "skills",
            "Skills Focused",
            "Emphasizes catching and throwing",
            &[
                ("40m_dash", 0.1),
                ("vertical_jump", 0.1),
                ("catching", 0.35),
                ("throwing", 0.35),
                ("agility", 0.1),
            ],
        ),
        WeightPreset::new(
            "athletic",
            "Athletic",
            "Emphasizes physical abilities",
            &[
                ("40m_dash", 0.25),
                ("vertical_jump", 0.25),
                ("catching", 0.15),
                ("throwing", 0.15),
                ("agility", 0.2),
            ],
        ),
    ];
    schema
}

fn basketball() -> DrillSchema {
    use Direction::*;
    let mut schema = DrillSchema::new(
        "basketball",
        "Basketball",
        "Basketball Combine",
        vec![
            DrillDefinition::new("lane_agility", "Lane Agility", "sec", LowerIsBetter, "agility", 0.15)
                .with_bounds(8.0, 20.0),
            DrillDefinition::new("vertical_jump", "Vertical Jump", "in", HigherIsBetter, "power", 0.2)
                .with_bounds(0.0, 50.0),
            DrillDefinition::new("free_throws", "Free Throw %", "%", HigherIsBetter, "shooting", 0.2)
                .with_bounds(0.0, 100.0),
            DrillDefinition::new("three_point", "3-Point Shooting %", "%", HigherIsBetter, "shooting", 0.2)
                .with_bounds(0.0, 100.0),
            DrillDefinition::new("dribbling", "Ball Handling", "pts", HigherIsBetter, "skills", 0.15)
                .with_bounds(0.0, 100.0),
            DrillDefinition::new("defensive_slide", "Defensive Slides", "sec", LowerIsBetter, "defense", 0.1)
                .with_bounds(8.0, 20.0),
        ],
    );
    schema.presets = vec![
        WeightPreset::new(
            "balanced",
            "Balanced",
            "Balanced approach",
            &[
                ("lane_agility", 0.15),
                ("vertical_jump", 0.15),
                ("free_throws", 0.2),
                ("three_point", 0.2),
                ("dribbling", 0.15),
                ("defensive_slide", 0.15),
            ],
        ),
        WeightPreset::new(
            "shooter",
            "Shooter Focus",
            "Emphasizes shooting abilities",
            &[
                ("lane_agility", 0.1),
                ("vertical_jump", 0.1),
                ("free_throws", 0.35),
                ("three_point", 0.35),
                ("dribbling", 0.05),
                ("defensive_slide", 0.05),
            ],
        ),
        WeightPreset::new(
            "athleticism",
            "Athleticism",
            "Emphasizes physical attributes",
            &[
                ("lane_agility", 0.3),
                ("vertical_jump", 0.3),
                ("defensive_slide", 0.3),
                ("dribbling", 0.05),
                ("free_throws", 0.025),
                ("three_point", 0.025),
            ],
        ),
        WeightPreset::new(
            "skill_focus",
            "Skill Focus",
            "Emphasizes ball handling and shooting",
            &[
                ("dribbling", 0.5),
                ("free_throws", 0.2),
                ("three_point", 0.2),
                ("lane_agility", 0.05),
                ("vertical_jump", 0.025),
                ("defensive_slide", 0.025),
            ],
        ),
    ];
    schema
}

fn soccer() -> DrillSchema {
    use Direction::*;
    let mut schema = DrillSchema::new(
        "soccer",
        "Soccer",
        "Soccer Combine",
        vec![
            DrillDefinition::new("sprint_speed", "20m Sprint", "sec", LowerIsBetter, "speed", 0.15),
            DrillDefinition::new("ball_control", "Ball Control", "pts", HigherIsBetter, "technical", 0.25),
            DrillDefinition::new("passing_accuracy", "Passing Accuracy", "pts", HigherIsBetter, "technical", 0.25),
            DrillDefinition::new("shooting_power", "Shooting Power", "mph", HigherIsBetter, "technical", 0.15),
            DrillDefinition::new("agility_cones", "Agility (Cones)", "sec", LowerIsBetter, "agility", 0.1),
            DrillDefinition::new("endurance", "Endurance (Beep Test)", "level", HigherIsBetter, "fitness", 0.1),
        ],
    );
    schema.presets = vec![
        WeightPreset::new(
            "balanced",
            "Balanced",
            "Equal emphasis on all areas",
            &[
                ("sprint_speed", 0.15),
                ("ball_control", 0.2),
                ("passing_accuracy", 0.2),
                ("shooting_power", 0.15),
                ("agility_cones", 0.15),
                ("endurance", 0.15),
            ],
        ),
        WeightPreset::new(
            "technical",
            "Technical Focus",
            "Emphasizes ball skills and accuracy",
            &[
                ("sprint_speed", 0.05),
                ("ball_control", 0.35),
                ("passing_accuracy", 0.35),
                ("shooting_power", 0.15),
                ("agility_cones", 0.05),
                ("endurance", 0.05),
            ],
        ),
    ];
    schema
}

fn baseball() -> DrillSchema {
    use Direction::*;
    let mut schema = DrillSchema::new(
        "baseball",
        "Baseball",
        "Baseball Combine",
        vec![
            DrillDefinition::new("sprint_60", "60-Yard Sprint", "sec", LowerIsBetter, "speed", 0.2),
            DrillDefinition::new("exit_velocity", "Exit Velocity", "mph", HigherIsBetter, "hitting", 0.3),
            DrillDefinition::new("throwing_velocity", "Throwing Velocity", "mph", HigherIsBetter, "throwing", 0.25),
            DrillDefinition::new("fielding_accuracy", "Fielding Accuracy", "pts", HigherIsBetter, "fielding", 0.15),
            DrillDefinition::new("pop_time", "Pop Time (Catchers)", "sec", LowerIsBetter, "catching", 0.1),
        ],
    );
    schema.presets = vec![
        WeightPreset::new(
            "balanced",
            "Balanced",
            "Balanced evaluation",
            &[
                ("sprint_60", 0.2),
                ("exit_velocity", 0.2),
                ("throwing_velocity", 0.2),
                ("fielding_accuracy", 0.2),
                ("pop_time", 0.2),
            ],
        ),
        WeightPreset::new(
            "hitter",
            "Hitter Focus",
            "Emphasizes hitting abilities",
            &[
                ("sprint_60", 0.15),
                ("exit_velocity", 0.5),
                ("throwing_velocity", 0.15),
                ("fielding_accuracy", 0.15),
                ("pop_time", 0.05),
            ],
        ),
    ];
    schema
}

fn track() -> DrillSchema {
    use Direction::*;
    let mut schema = DrillSchema::new(
        "track",
        "Track & Field",
        "Track & Field",
        vec![
            DrillDefinition::new("sprint_100", "100m Sprint", "sec", LowerIsBetter, "sprint", 0.25),
            DrillDefinition::new("sprint_400", "400m Sprint", "sec", LowerIsBetter, "sprint", 0.15),
            DrillDefinition::new("long_jump", "Long Jump", "ft", HigherIsBetter, "field", 0.2),
            DrillDefinition::new("high_jump", "High Jump", "ft", HigherIsBetter, "field", 0.15),
            DrillDefinition::new("shot_put", "Shot Put", "ft", HigherIsBetter, "field", 0.15),
            DrillDefinition::new("mile_time", "Mile Run", "min", LowerIsBetter, "distance", 0.1),
        ],
    );
    schema.presets = vec![WeightPreset::new(
        "sprinter",
        "Sprinter Focus",
        "Short distance speed events",
        &[
            ("sprint_100", 0.45),
            ("sprint_400", 0.25),
            ("long_jump", 0.15),
            ("high_jump", 0.1),
            ("shot_put", 0.025),
            ("mile_time", 0.025),
        ],
    )];
    schema
}

fn volleyball() -> DrillSchema {
    use Direction::*;
    let mut schema = DrillSchema::new(
        "volleyball",
        "Volleyball",
        "Volleyball Combine",
        vec![
            DrillDefinition::new("vertical_jump", "Vertical Jump", "in", HigherIsBetter, "power", 0.2),
            DrillDefinition::new("approach_jump", "Approach Jump", "in", HigherIsBetter, "power", 0.2),
            DrillDefinition::new("serving_accuracy", "Serving Accuracy", "pts", HigherIsBetter, "skills", 0.15),
            DrillDefinition::new("passing_accuracy", "Passing Accuracy", "pts", HigherIsBetter, "skills", 0.15),
            DrillDefinition::new("attack_power", "Attack Power", "mph", HigherIsBetter, "offense", 0.15),
            DrillDefinition::new("blocking_reach", "Blocking Reach", "in", HigherIsBetter, "defense", 0.15),
        ],
    );
    schema.presets = vec![WeightPreset::new(
        "hitter",
        "Hitter Focus",
        "Outside hitter/attacker focus",
        &[
            ("vertical_jump", 0.25),
            ("approach_jump", 0.3),
            ("serving_accuracy", 0.1),
            ("passing_accuracy", 0.1),
            ("attack_power", 0.2),
            ("blocking_reach", 0.05),
        ],
    )];
    schema
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_schemas_registered() {
        let registry = SchemaRegistry::default();
        let sports: Vec<&str> = registry.sports().collect();
        assert_eq!(sports, vec!["baseball", "basketball", "football", "soccer", "track", "volleyball"]);
        assert!(registry.get("Football").is_some());
        assert_eq!(registry.get("Track & Field").map(|s| s.id.as_str()), Some("track"));
        assert!(registry.get("").is_none());

        let presets = |sport: &str| -> Vec<String> {
            registry.get(sport).unwrap().presets.iter().map(|p| p.id.clone()).collect()
        };
        assert_eq!(presets("football"), vec!["balanced", "speed", "skills", "athletic"]);
        assert_eq!(presets("basketball"), vec!["balanced", "shooter", "athleticism", "skill_focus"]);
        assert_eq!(presets("soccer"), vec!["balanced", "technical"]);
        assert_eq!(presets("baseball"), vec!["balanced", "hitter"]);
        assert_eq!(presets("track"), vec!["sprinter"]);
        assert_eq!(presets("volleyball"), vec!["hitter"]);
    }

    #[test]
    fn test_presets_only_name_schema_drills() {
        let registry = SchemaRegistry::default();
        for sport in registry.sports() {
            let schema = registry.get(sport).unwrap();
            let defaults: f64 = schema.default_weights().values().sum();
            assert!((defaults - 1.0).abs() < 1e-9, "{sport} defaults sum to {defaults}");
            for preset in &schema.presets {
                for drill_id in preset.weights.keys() {
                    assert!(schema.drill(drill_id).is_some(), "{sport}/{} names {drill_id}", preset.id);
                }
            }
        }
    }

    #[test]
    fn test_sprint_is_lower_is_better() {
        let registry = SchemaRegistry::default();
        let football = registry.get("football").unwrap();
        let dash = football.drill(&DrillId::from("40m_dash")).unwrap();
        assert!(dash.lower_is_better());
        assert!(dash.within_bounds(4.6));
        assert!(!dash.within_bounds(2.0));
    }

    #[test]
    fn test_default_weights_and_presets() {
        let registry = SchemaRegistry::default();
        let football = registry.get("football").unwrap();
        let defaults = football.default_weights();
        let total: f64 = defaults.values().sum();
        assert!((total - 1.0).abs() < 1e-9);

        let speed = football.preset("SPEED").unwrap();
        assert_eq!(speed.weights[&DrillId::from("40m_dash")], 0.4);
        assert!(football.preset("unknown").is_none());
    }
}
