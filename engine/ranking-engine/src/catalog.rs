//! Event to drill schema assignment
//!
//! An event starts from a sport template. Organizers may switch template drills
//! off and add drills of their own; the composed schema is what the event is
//! scored against.

use crate::error::{RankingError, Result};
use evaluation_ledger::{Direction, DrillDefinition, DrillId, DrillSchema, EventId, SchemaRegistry};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

fn custom_category() -> String {
    "custom".to_string()
}

/// A drill an event measures on top of its sport template
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CustomDrill {
    pub id: DrillId,
    pub name: String,

    #[serde(default)]
    pub unit: String,

    #[serde(default)]
    pub lower_is_better: bool,

    #[serde(default = "custom_category")]
    pub category: String,

    #[serde(default)]
    pub min_value: Option<f64>,
    #[serde(default)]
    pub max_value: Option<f64>,
}

impl CustomDrill {
    pub fn new(id: &str, name: &str, unit: &str) -> Self {
        Self {
            id: DrillId::from(id),
            name: name.to_string(),
            unit: unit.to_string(),
            lower_is_better: false,
            category: custom_category(),
            min_value: None,
            max_value: None,
        }
    }

    /// Custom drills carry no default weight; coaches weight them explicitly
    fn definition(&self) -> DrillDefinition {
        let direction =
            if self.lower_is_better { Direction::LowerIsBetter } else { Direction::HigherIsBetter };
        let mut drill = DrillDefinition::new(
            self.id.as_str(),
            &self.name,
            &self.unit,
            direction,
            &self.category,
            0.0,
        );
        drill.min_value = self.min_value;
        drill.max_value = self.max_value;
        drill
    }
}

/// How an event's schema is put together
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EventSetup {
    /// Template id or sport name
    pub sport: String,

    #[serde(default)]
    pub disabled_drills: Vec<DrillId>,

    #[serde(default)]
    pub custom_drills: Vec<CustomDrill>,
}

impl EventSetup {
    /// Template as-is
    pub fn sport(sport: &str) -> Self {
        Self { sport: sport.to_string(), ..Self::default() }
    }

    pub fn disable(mut self, drill: &str) -> Self {
        self.disabled_drills.push(DrillId::from(drill));
        self
    }

    pub fn with_custom(mut self, drill: CustomDrill) -> Self {
        self.custom_drills.push(drill);
        self
    }
}

/// Apply an event setup to its template.
///
/// Disabled drills leave the schema and every preset. Custom drills are
/// appended after the template drills.
pub fn compose(template: &DrillSchema, setup: &EventSetup) -> Result<DrillSchema> {
    let disabled: BTreeSet<&DrillId> = setup.disabled_drills.iter().collect();
    for drill in disabled.iter().filter(|d| template.drill(d).is_none()) {
        tracing::debug!("Disabled drill {} is not part of the {} template", drill, template.id);
    }

    let mut schema = template.clone();
    schema.drills.retain(|d| !disabled.contains(&d.id));

    for custom in &setup.custom_drills {
        if custom.id.is_empty() {
            return Err(RankingError::invalid_schema("custom drill with an empty id"));
        }
        if schema.drill(&custom.id).is_some() {
            return Err(RankingError::invalid_schema(format!("drill {} is declared twice", custom.id)));
        }
        if let (Some(min), Some(max)) = (custom.min_value, custom.max_value) {
            if min > max {
                return Err(RankingError::invalid_schema(format!(
                    "drill {} has min {} above max {}",
                    custom.id, min, max
                )));
            }
        }
        schema.drills.push(custom.definition());
    }

    if schema.drills.is_empty() {
        return Err(RankingError::invalid_schema(format!(
            "every drill of the {} template is disabled",
            template.id
        )));
    }

    for preset in &mut schema.presets {
        preset.weights.retain(|drill, _| !disabled.contains(drill));
    }

    Ok(schema)
}

/// Tracks which drill schema each event uses
pub struct EventCatalog {
    registry: SchemaRegistry,
    default_schema: Arc<DrillSchema>,
    events: RwLock<HashMap<EventId, Arc<DrillSchema>>>,
}

impl EventCatalog {
    /// Create a catalog whose unassigned events use `default_sport`
    pub fn new(registry: SchemaRegistry, default_sport: &str) -> Result<Self> {
        let default_schema = registry
            .get(default_sport)
            .cloned()
            .ok_or_else(|| RankingError::UnknownSport(default_sport.to_string()))?;

        Ok(Self { registry, default_schema: Arc::new(default_schema), events: RwLock::new(HashMap::new()) })
    }

    /// Compose and assign an event's schema, replacing any earlier setup
    pub fn register_event(&self, event_id: EventId, setup: &EventSetup) -> Result<Arc<DrillSchema>> {
        let template = self
            .registry
            .get(&setup.sport)
            .ok_or_else(|| RankingError::UnknownSport(setup.sport.clone()))?;
        let schema = Arc::new(compose(template, setup)?);

        tracing::info!(
            "Event {} uses the {} template ({} disabled, {} custom drills)",
            event_id,
            schema.id,
            setup.disabled_drills.len(),
            setup.custom_drills.len()
        );
        self.events.write().insert(event_id, schema.clone());
        Ok(schema)
    }

    pub fn schema_for(&self, event_id: &EventId) -> Arc<DrillSchema> {
        self.events.read().get(event_id).cloned().unwrap_or_else(|| self.default_schema.clone())
    }

    pub fn is_registered(&self, event_id: &EventId) -> bool {
        self.events.read().contains_key(event_id)
    }

    pub fn remove_event(&self, event_id: &EventId) -> bool {
        self.events.write().remove(event_id).is_some()
    }

    pub fn registry(&self) -> &SchemaRegistry {
        &self.registry
    }
}
