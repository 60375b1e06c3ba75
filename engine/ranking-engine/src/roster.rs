//! Roster lookup
//!
//! The roster decides who belongs to an event and to which age group. The
//! engine only reads it; mutations happen outside and are announced through
//! `RankingEngine::notify_roster_change`.

use crate::error::Result;
use evaluation_ledger::{AgeGroup, EventId, PlayerId};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};

/// A player's membership in an event
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RosterEntry {
    pub player_id: PlayerId,
    pub age_group: AgeGroup,
}

/// Read-only roster lookup
#[async_trait::async_trait]
pub trait RosterService: Send + Sync {
    /// Current players of an event, ordered by player id
    async fn players(&self, event_id: &EventId) -> Result<Vec<RosterEntry>>;
}

/// Roster held in memory
#[derive(Default)]
pub struct InMemoryRoster {
    events: RwLock<HashMap<EventId, BTreeMap<PlayerId, AgeGroup>>>,
}

impl InMemoryRoster {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or move a player. Returns the previous age group if the player was already listed.
    pub fn add_player(
        &self,
        event_id: EventId,
        player_id: PlayerId,
        age_group: AgeGroup,
    ) -> Option<AgeGroup> {
        self.events.write().entry(event_id).or_default().insert(player_id, age_group)
    }

    /// Remove a player, returning the age group they were in
    pub fn remove_player(&self, event_id: &EventId, player_id: &PlayerId) -> Option<AgeGroup> {
        let mut events = self.events.write();
        let players = events.get_mut(event_id)?;
        let removed = players.remove(player_id);
        if players.is_empty() {
            events.remove(event_id);
        }
        removed
    }

    /// Distinct concrete age groups present in an event
    pub fn age_groups(&self, event_id: &EventId) -> Vec<AgeGroup> {
        let events = self.events.read();
        let groups: BTreeSet<AgeGroup> = events
            .get(event_id)
            .map(|players| players.values().filter(|g| !g.is_wildcard()).cloned().collect())
            .unwrap_or_default();
        groups.into_iter().collect()
    }

    pub fn player_count(&self, event_id: &EventId) -> usize {
        self.events.read().get(event_id).map_or(0, BTreeMap::len)
    }
}

#[async_trait::async_trait]
impl RosterService for InMemoryRoster {
    async fn players(&self, event_id: &EventId) -> Result<Vec<RosterEntry>> {
        let events = self.events.read();
        Ok(events
            .get(event_id)
            .map(|players| {
                players
                    .iter()
                    .map(|(player_id, age_group)| RosterEntry {
                        player_id: player_id.clone(),
                        age_group: age_group.clone(),
                    })
                    .collect()
            })
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_add_move_remove() {
        let roster = InMemoryRoster::new();
        let event = EventId::from("evt");

        assert!(roster.add_player(event.clone(), "p2".into(), AgeGroup::group("U14")).is_none());
        assert!(roster.add_player(event.clone(), "p1".into(), AgeGroup::group("U12")).is_none());
        assert_eq!(
            roster.add_player(event.clone(), "p2".into(), AgeGroup::group("U12")),
            Some(AgeGroup::group("U14"))
        );

        let players = roster.players(&event).await.unwrap();
        assert_eq!(players.len(), 2);
        assert_eq!(players[0].player_id, PlayerId::from("p1"));
        assert_eq!(roster.age_groups(&event), vec![AgeGroup::group("U12")]);

        assert_eq!(roster.remove_player(&event, &"p1".into()), Some(AgeGroup::group("U12")));
        assert_eq!(roster.player_count(&event), 1);
        assert!(roster.remove_player(&event, &"missing".into()).is_none());
    }

    #[tokio::test]
    async fn test_unknown_event_is_empty() {
        let roster = InMemoryRoster::new();
        assert!(roster.players(&EventId::from("nope")).await.unwrap().is_empty());
        assert!(roster.age_groups(&EventId::from("nope")).is_empty());
    }
}
