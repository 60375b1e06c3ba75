//! Identifiers and the immutable evaluation record

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }

            pub fn is_empty(&self) -> bool {
                self.0.trim().is_empty()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(id: &str) -> Self {
                Self(id.to_string())
            }
        }

        impl From<String> for $name {
            fn from(id: String) -> Self {
                Self(id)
            }
        }
    };
}

string_id!(
    /// Combine event identifier
    EventId
);
string_id!(
    /// Athlete identifier, unique within an event
    PlayerId
);
string_id!(
    /// Drill key as declared by the event's drill schema (e.g. "40m_dash")
    DrillId
);
string_id!(
    /// Identity of the coach or evaluator who recorded a measurement
    EvaluatorId
);

/// Age-group scope of a partition. `All` is the event-wide wildcard.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(into = "String", from = "String")]
pub enum AgeGroup {
    All,
    Group(String),
}

impl AgeGroup {
    /// Parse a user supplied age group. Empty strings and "ALL" map to the wildcard.
    pub fn parse(raw: &str) -> Self {
        let trimmed = raw.trim();
        if trimmed.is_empty() || trimmed.eq_ignore_ascii_case("all") {
            AgeGroup::All
        } else {
            AgeGroup::Group(trimmed.to_string())
        }
    }

    pub fn group(name: impl Into<String>) -> Self {
        Self::parse(&name.into())
    }

    pub fn is_wildcard(&self) -> bool {
        matches!(self, AgeGroup::All)
    }

    /// Whether a player in `member` belongs to this scope
    pub fn contains(&self, member: &AgeGroup) -> bool {
        match self {
            AgeGroup::All => true,
            AgeGroup::Group(_) => self == member,
        }
    }
}

impl fmt::Display for AgeGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AgeGroup::All => f.write_str("ALL"),
            AgeGroup::Group(name) => f.write_str(name),
        }
    }
}

impl From<String> for AgeGroup {
    fn from(raw: String) -> Self {
        AgeGroup::parse(&raw)
    }
}

impl From<AgeGroup> for String {
    fn from(group: AgeGroup) -> Self {
        group.to_string()
    }
}

/// Key under which evaluations roll up into a single drill aggregate
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RecordKey {
    pub event_id: EventId,
    pub player_id: PlayerId,
    pub drill_id: DrillId,
}

impl RecordKey {
    pub fn new(event_id: EventId, player_id: PlayerId, drill_id: DrillId) -> Self {
        Self { event_id, player_id, drill_id }
    }
}

impl fmt::Display for RecordKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.event_id, self.player_id, self.drill_id)
    }
}

/// A single drill measurement. Never mutated once written; corrections are new records.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationRecord {
    pub event_id: EventId,
    pub player_id: PlayerId,
    pub drill_id: DrillId,
    pub evaluator_id: EvaluatorId,

    /// Raw measured value in `unit`
    pub value: f64,

    pub unit: String,

    pub recorded_at: DateTime<Utc>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

impl EvaluationRecord {
    pub fn new(
        event_id: impl Into<EventId>,
        player_id: impl Into<PlayerId>,
        drill_id: impl Into<DrillId>,
        evaluator_id: impl Into<EvaluatorId>,
        value: f64,
        unit: impl Into<String>,
    ) -> Self {
        Self {
            event_id: event_id.into(),
            player_id: player_id.into(),
            drill_id: drill_id.into(),
            evaluator_id: evaluator_id.into(),
            value,
            unit: unit.into(),
            recorded_at: Utc::now(),
            notes: None,
        }
    }

    pub fn recorded_at(mut self, recorded_at: DateTime<Utc>) -> Self {
        self.recorded_at = recorded_at;
        self
    }

    pub fn with_notes(mut self, notes: impl Into<String>) -> Self {
        self.notes = Some(notes.into());
        self
    }

    pub fn key(&self) -> RecordKey {
        RecordKey::new(self.event_id.clone(), self.player_id.clone(), self.drill_id.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_age_group_wildcard_parsing() {
        assert_eq!(AgeGroup::parse("ALL"), AgeGroup::All);
        assert_eq!(AgeGroup::parse("all"), AgeGroup::All);
        assert_eq!(AgeGroup::parse("  "), AgeGroup::All);
        assert_eq!(AgeGroup::parse("U12"), AgeGroup::Group("U12".to_string()));
    }

    #[test]
    fn test_age_group_membership() {
        let u12 = AgeGroup::group("U12");
        let u14 = AgeGroup::group("U14");
        assert!(AgeGroup::All.contains(&u12));
        assert!(u12.contains(&u12));
        assert!(!u12.contains(&u14));
    }

    #[test]
    fn test_age_group_serde_as_string() {
        let json = serde_json::to_string(&AgeGroup::group("U12")).unwrap();
        assert_eq!(json, "\"U12\"");
        let parsed: AgeGroup = serde_json::from_str("\"ALL\"").unwrap();
        assert_eq!(parsed, AgeGroup::All);
    }

    #[test]
    fn test_record_key() {
        let record = EvaluationRecord::new("evt", "p1", "sprint", "coach", 5.1, "sec");
        let key = record.key();
        assert_eq!(key.to_string(), "evt/p1/sprint");
    }
}
