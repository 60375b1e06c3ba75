//! Message types for the RankingGateway REST and WebSocket APIs

use chrono::{DateTime, Utc};
use evaluation_ledger::{AgeGroup, DrillId, EventId};
use ranking_engine::WeightSelection;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

/// Base message structure for all WebSocket messages
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Message {
    /// Message ID for request/response correlation
    pub id: Option<String>,

    /// Message method (for requests) or stream type (for pushes)
    pub method: Option<String>,
    pub stream: Option<String>,

    /// Message parameters (for requests) or data (for pushes)
    pub params: Option<serde_json::Value>,
    pub data: Option<serde_json::Value>,

    /// Result (for successful responses)
    pub result: Option<serde_json::Value>,

    /// Error (for error responses)
    pub error: Option<ErrorMessage>,
}

impl Message {
    pub fn response(id: Option<String>, result: serde_json::Value) -> Self {
        Self { id, result: Some(result), ..Default::default() }
    }

    pub fn push(stream: &str, data: serde_json::Value) -> Self {
        Self { stream: Some(stream.to_string()), data: Some(data), ..Default::default() }
    }

    pub fn failure(id: Option<String>, error: ErrorMessage) -> Self {
        Self { id, error: Some(error), ..Default::default() }
    }
}

/// Error message structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorMessage {
    /// Error code
    pub code: u32,

    /// Error message
    pub message: String,

    /// Additional error details
    pub details: Option<serde_json::Value>,
}

/// Weight choice shared by the REST query string and stream subscriptions
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WeightParams {
    #[serde(default)]
    pub preset: Option<String>,

    /// Raw per-drill weights; any non-negative scale
    #[serde(default)]
    pub weights: BTreeMap<String, f64>,
}

impl WeightParams {
    /// Custom weights win over a preset; neither means the schema defaults
    pub fn selection(&self) -> WeightSelection {
        if !self.weights.is_empty() {
            WeightSelection::Custom(
                self.weights.iter().map(|(drill, w)| (DrillId::from(drill.as_str()), *w)).collect(),
            )
        } else if let Some(preset) = &self.preset {
            WeightSelection::Preset(preset.clone())
        } else {
            WeightSelection::Default
        }
    }
}

/// `rankings.subscribe` parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RankingsSubscribeRequest {
    pub event_id: String,

    #[serde(default)]
    pub age_group: Option<String>,

    #[serde(flatten)]
    pub weights: WeightParams,

    /// Last version the client saw before reconnecting
    #[serde(default)]
    pub resume_from: Option<u64>,

    /// Epoch that `resume_from` was read under
    #[serde(default)]
    pub epoch: Option<Uuid>,
}

impl RankingsSubscribeRequest {
    pub fn age_group(&self) -> AgeGroup {
        self.age_group.as_deref().map(AgeGroup::parse).unwrap_or(AgeGroup::All)
    }

    /// Whether a resuming client fell behind `version` of `epoch`.
    ///
    /// Versions restart when a partition is rebuilt, so a token from another
    /// epoch (or without one) always counts as behind.
    pub fn missed_updates(&self, epoch: Uuid, version: u64) -> bool {
        match self.resume_from {
            None => false,
            Some(seen) if self.epoch == Some(epoch) => version > seen,
            Some(_) => true,
        }
    }

    /// Whether the current snapshot must be pushed on subscribe
    pub fn needs_snapshot(&self, epoch: Uuid, version: u64) -> bool {
        self.resume_from.is_none() || self.missed_updates(epoch, version)
    }
}

/// `rankings.unsubscribe` parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RankingsUnsubscribeRequest {
    pub event_id: String,

    #[serde(default)]
    pub age_group: Option<String>,
}

/// Subscription acknowledgement
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubscribeAck {
    pub subscription: String,
    pub version: u64,
    pub epoch: Uuid,

    /// The partition advanced past `resume_from`, or was rebuilt, while the client was away
    pub missed_updates: bool,
}

/// Keep-alive pushed on every subscription
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Heartbeat {
    pub event_id: EventId,
    pub age_group: AgeGroup,

    /// Last version delivered on this subscription
    pub version: u64,

    pub timestamp: DateTime<Utc>,
}

/// Evaluation submission body
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvaluationSubmission {
    pub event_id: String,
    pub player_id: String,
    pub drill_id: String,
    pub evaluator_id: String,
    pub value: f64,

    /// Defaults to the drill's declared unit
    #[serde(default)]
    pub unit: Option<String>,

    #[serde(default)]
    pub recorded_at: Option<DateTime<Utc>>,

    #[serde(default)]
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RosterAction {
    Add,
    Remove,
}

/// Roster edit body
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RosterUpdate {
    pub player_id: String,

    #[serde(default)]
    pub age_group: Option<String>,

    pub action: RosterAction,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RosterUpdateResponse {
    pub player_id: String,
    pub previous_age_group: Option<AgeGroup>,
    pub invalidated: usize,
}

/// External roster change notification
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RosterChangeRequest {
    #[serde(default)]
    pub age_group: Option<String>,
}

/// Roster line of the startup roster file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RosterSeed {
    pub event_id: String,
    pub player_id: String,
    pub age_group: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_custom_weights_take_precedence() {
        let params = WeightParams {
            preset: Some("speed".to_string()),
            weights: BTreeMap::from([("40m_dash".to_string(), 2.0)]),
        };
        match params.selection() {
            WeightSelection::Custom(weights) => assert_eq!(weights[&DrillId::from("40m_dash")], 2.0),
            other => panic!("expected custom weights, got {other:?}"),
        }

        let preset = WeightParams { preset: Some("speed".to_string()), weights: BTreeMap::new() };
        assert_eq!(preset.selection(), WeightSelection::Preset("speed".to_string()));
        assert_eq!(WeightParams::default().selection(), WeightSelection::Default);
    }

    #[test]
    fn test_subscribe_request_parsing() {
        let request: RankingsSubscribeRequest = serde_json::from_value(serde_json::json!({
            "event_id": "combine-2026",
            "age_group": "U14",
            "preset": "balanced",
            "resume_from": 7
        }))
        .unwrap();

        assert_eq!(request.age_group(), AgeGroup::group("U14"));
        assert_eq!(request.weights.selection(), WeightSelection::Preset("balanced".to_string()));
        assert_eq!(request.resume_from, Some(7));
        assert_eq!(request.epoch, None);

        let minimal: RankingsSubscribeRequest =
            serde_json::from_value(serde_json::json!({"event_id": "e"})).unwrap();
        assert_eq!(minimal.age_group(), AgeGroup::All);
        assert_eq!(minimal.resume_from, None);
    }

    #[test]
    fn test_resume_token_checks_epoch() {
        let epoch = Uuid::new_v4();
        let resume = |resume_from: Option<u64>, epoch: Option<Uuid>| RankingsSubscribeRequest {
            event_id: "e".to_string(),
            age_group: None,
            weights: WeightParams::default(),
            resume_from,
            epoch,
        };

        let fresh = resume(None, None);
        assert!(!fresh.missed_updates(epoch, 4));
        assert!(fresh.needs_snapshot(epoch, 4));

        let current = resume(Some(4), Some(epoch));
        assert!(!current.missed_updates(epoch, 4));
        assert!(!current.needs_snapshot(epoch, 4));
        assert!(current.missed_updates(epoch, 5));

        // Same version number, different partition lifetime
        assert!(resume(Some(4), Some(Uuid::new_v4())).missed_updates(epoch, 4));
        assert!(resume(Some(4), None).missed_updates(epoch, 1));
    }

    #[test]
    fn test_push_message_shape() {
        let message = Message::push("heartbeat", serde_json::json!({"version": 3}));
        let json = serde_json::to_value(&message).unwrap();
        assert_eq!(json["stream"], "heartbeat");
        assert_eq!(json["data"]["version"], 3);
        assert!(json["error"].is_null());
    }
}
