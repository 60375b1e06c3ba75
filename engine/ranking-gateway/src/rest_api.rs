//! REST API endpoints for the RankingGateway
//!
//! Evaluation submission, roster maintenance, invalidation signals and the
//! rankings/statistics read side.

use crate::error::{GatewayError, GatewayResult};
use crate::messages::{
    EvaluationSubmission, RosterAction, RosterChangeRequest, RosterUpdate, RosterUpdateResponse,
    WeightParams,
};
use evaluation_ledger::{AgeGroup, DrillId, EvaluationRecord, EventId, PlayerId};
use ranking_engine::{EventSetup, InMemoryRoster, RankingEngine, RankingError};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use warp::http::StatusCode;
use warp::{Filter, Reply};

const MAX_BODY_BYTES: u64 = 64 * 1024;

/// Error response
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: ErrorDetail,
    pub timestamp: String,
}

/// Error detail
#[derive(Debug, Serialize)]
pub struct ErrorDetail {
    pub code: String,
    pub message: String,
    pub details: Option<serde_json::Value>,
}

impl From<&GatewayError> for ErrorResponse {
    fn from(err: &GatewayError) -> Self {
        Self {
            error: ErrorDetail {
                code: err.code().to_string(),
                message: err.to_string(),
                details: None,
            },
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }
}

fn json_reply<T: Serialize>(body: &T, status: StatusCode) -> warp::reply::Response {
    warp::reply::with_status(warp::reply::json(body), status).into_response()
}

fn error_reply(err: &GatewayError) -> warp::reply::Response {
    let status = err.status();
    if status.is_server_error() {
        tracing::error!("Request failed: {}", err);
    } else {
        tracing::warn!("Request rejected: {}", err);
    }
    json_reply(&ErrorResponse::from(err), status)
}

fn respond<T: Serialize>(result: GatewayResult<T>, status: StatusCode) -> warp::reply::Response {
    match result {
        Ok(body) => json_reply(&body, status),
        Err(err) => error_reply(&err),
    }
}

/// Read `preset` and every `weight_<drill>` parameter. Values that do not parse are skipped.
pub fn weight_params_from_query(query: &HashMap<String, String>) -> WeightParams {
    let mut weights = BTreeMap::new();
    for (key, raw) in query {
        let Some(drill) = key.strip_prefix("weight_") else {
            continue;
        };
        match raw.trim().parse::<f64>() {
            Ok(weight) => {
                weights.insert(drill.to_string(), weight);
            }
            Err(_) => tracing::warn!("Ignoring unparseable weight {}={:?}", key, raw),
        }
    }

    WeightParams { preset: query.get("preset").filter(|p| !p.is_empty()).cloned(), weights }
}

/// Check a submission against the event's drill schema and build the record
fn evaluation_record(
    engine: &RankingEngine,
    submission: EvaluationSubmission,
) -> GatewayResult<EvaluationRecord> {
    let event_id = EventId::from(submission.event_id);
    let drill_id = DrillId::from(submission.drill_id);

    for (field, value) in [
        ("event_id", event_id.as_str()),
        ("player_id", submission.player_id.as_str()),
        ("drill_id", drill_id.as_str()),
        ("evaluator_id", submission.evaluator_id.as_str()),
    ] {
        if value.trim().is_empty() {
            return Err(GatewayError::Validation(format!("{field} must not be empty")));
        }
    }

    let schema = engine.catalog().schema_for(&event_id);
    let drill = schema
        .drill(&drill_id)
        .ok_or_else(|| GatewayError::Engine(RankingError::UnknownDrill(drill_id.clone())))?;
    if !drill.within_bounds(submission.value) {
        return Err(GatewayError::Validation(format!(
            "{} {} is outside the accepted range for {}",
            submission.value, drill.unit, drill.label
        )));
    }

    let unit = submission.unit.unwrap_or_else(|| drill.unit.clone());
    let mut record = EvaluationRecord::new(
        event_id,
        submission.player_id,
        drill_id,
        submission.evaluator_id,
        submission.value,
        unit,
    );
    if let Some(recorded_at) = submission.recorded_at {
        record = record.recorded_at(recorded_at);
    }
    if let Some(notes) = submission.notes {
        record = record.with_notes(notes);
    }
    Ok(record)
}

/// Submit one evaluation
pub async fn submit_evaluation(
    submission: EvaluationSubmission,
    engine: Arc<RankingEngine>,
) -> Result<impl warp::Reply, warp::Rejection> {
    let result = match evaluation_record(&engine, submission) {
        Ok(record) => engine.submit_evaluation(record).await.map_err(GatewayError::from),
        Err(err) => Err(err),
    };
    Ok(respond(result, StatusCode::CREATED))
}

/// Rankings for a partition under default, preset or custom weights
pub async fn get_rankings(
    event_id: String,
    query: HashMap<String, String>,
    engine: Arc<RankingEngine>,
) -> Result<impl warp::Reply, warp::Rejection> {
    let age_group = query.get("age_group").map(|g| AgeGroup::parse(g)).unwrap_or(AgeGroup::All);
    let selection = weight_params_from_query(&query).selection();

    let result = engine
        .rankings(&EventId::from(event_id), &age_group, &selection)
        .await
        .map_err(GatewayError::from);
    Ok(respond(result, StatusCode::OK))
}

/// Event-wide drill statistics
pub async fn get_event_stats(
    event_id: String,
    engine: Arc<RankingEngine>,
) -> Result<impl warp::Reply, warp::Rejection> {
    let result = engine.event_stats(&EventId::from(event_id)).await.map_err(GatewayError::from);
    Ok(respond(result, StatusCode::OK))
}

/// Drill schema the event is scored against
pub async fn get_event_schema(
    event_id: String,
    engine: Arc<RankingEngine>,
) -> Result<impl warp::Reply, warp::Rejection> {
    let schema = engine.catalog().schema_for(&EventId::from(event_id));
    Ok(json_reply(&*schema, StatusCode::OK))
}

/// Bind an event to a sport template, with optional disabled and custom drills
pub async fn register_event(
    event_id: String,
    setup: EventSetup,
    engine: Arc<RankingEngine>,
) -> Result<impl warp::Reply, warp::Rejection> {
    let result = engine
        .register_event(&EventId::from(event_id), &setup)
        .map(|schema| (*schema).clone())
        .map_err(GatewayError::from);
    Ok(respond(result, StatusCode::OK))
}

fn apply_roster_update(
    engine: &RankingEngine,
    roster: &InMemoryRoster,
    event_id: EventId,
    update: RosterUpdate,
) -> GatewayResult<RosterUpdateResponse> {
    if event_id.is_empty() || update.player_id.trim().is_empty() {
        return Err(GatewayError::InvalidRequest("event_id and player_id are required".to_string()));
    }
    let player_id = PlayerId::from(update.player_id.as_str());

    let (previous_age_group, changed_group) = match update.action {
        RosterAction::Add => {
            let age_group = update
                .age_group
                .as_deref()
                .map(AgeGroup::parse)
                .filter(|g| !g.is_wildcard())
                .ok_or_else(|| {
                    GatewayError::InvalidRequest("adding a player needs a concrete age_group".to_string())
                })?;
            (roster.add_player(event_id.clone(), player_id, age_group.clone()), age_group)
        }
        RosterAction::Remove => {
            let previous = roster.remove_player(&event_id, &player_id);
            let changed = previous.clone().unwrap_or(AgeGroup::All);
            (previous, changed)
        }
    };

    let invalidated = engine.notify_roster_change(&event_id, &changed_group)?;
    Ok(RosterUpdateResponse { player_id: update.player_id, previous_age_group, invalidated })
}

/// Add, move or remove a roster entry
pub async fn update_roster(
    event_id: String,
    update: RosterUpdate,
    engine: Arc<RankingEngine>,
    roster: Arc<InMemoryRoster>,
) -> Result<impl warp::Reply, warp::Rejection> {
    let result = apply_roster_update(&engine, &roster, EventId::from(event_id), update);
    Ok(respond(result, StatusCode::OK))
}

/// Roster changed outside the gateway
pub async fn roster_changed(
    event_id: String,
    request: RosterChangeRequest,
    engine: Arc<RankingEngine>,
) -> Result<impl warp::Reply, warp::Rejection> {
    let age_group = request.age_group.as_deref().map(AgeGroup::parse).unwrap_or(AgeGroup::All);
    let result = engine
        .notify_roster_change(&EventId::from(event_id), &age_group)
        .map(|invalidated| serde_json::json!({ "invalidated": invalidated }))
        .map_err(GatewayError::from);
    Ok(respond(result, StatusCode::OK))
}

/// A batch import into the ledger finished
pub async fn bulk_import_complete(
    event_id: String,
    engine: Arc<RankingEngine>,
) -> Result<impl warp::Reply, warp::Rejection> {
    let result = engine
        .notify_bulk_import_complete(&EventId::from(event_id))
        .await
        .map(|scheduled| serde_json::json!({ "scheduled": scheduled }))
        .map_err(GatewayError::from);
    Ok(respond(result, StatusCode::ACCEPTED))
}

fn event_route(
    segment: &'static str,
) -> impl Filter<Extract = (String,), Error = warp::Rejection> + Clone {
    warp::path("api")
        .and(warp::path("events"))
        .and(warp::path::param::<String>())
        .and(warp::path(segment))
        .and(warp::path::end())
}

fn json_body<T: serde::de::DeserializeOwned + Send>(
) -> impl Filter<Extract = (T,), Error = warp::Rejection> + Clone {
    warp::body::content_length_limit(MAX_BODY_BYTES).and(warp::body::json())
}

/// Create all REST routes
pub fn create_routes(
    engine: Arc<RankingEngine>,
    roster: Arc<InMemoryRoster>,
) -> impl Filter<Extract = impl warp::Reply, Error = warp::Rejection> + Clone {
    let engine_filter = warp::any().map(move || engine.clone());
    let roster_filter = warp::any().map(move || roster.clone());

    let health = warp::path("api")
        .and(warp::path("health"))
        .and(warp::path::end())
        .and(warp::get())
        .and(engine_filter.clone())
        .map(|engine: Arc<RankingEngine>| {
            warp::reply::json(&serde_json::json!({
                "status": "healthy",
                "version": crate::VERSION,
                "cache": engine.metrics(),
                "timestamp": chrono::Utc::now().to_rfc3339()
            }))
        });

    let evaluations = warp::path("api")
        .and(warp::path("evaluations"))
        .and(warp::path::end())
        .and(warp::post())
        .and(json_body::<EvaluationSubmission>())
        .and(engine_filter.clone())
        .and_then(submit_evaluation);

    let rankings = event_route("rankings")
        .and(warp::get())
        .and(warp::query::<HashMap<String, String>>())
        .and(engine_filter.clone())
        .and_then(get_rankings);

    let stats = event_route("stats")
        .and(warp::get())
        .and(engine_filter.clone())
        .and_then(get_event_stats);

    let schema = event_route("schema")
        .and(warp::get())
        .and(engine_filter.clone())
        .and_then(get_event_schema);

    let register = event_route("schema")
        .and(warp::post())
        .and(json_body::<EventSetup>())
        .and(engine_filter.clone())
        .and_then(register_event);

    let roster_update = event_route("roster")
        .and(warp::post())
        .and(json_body::<RosterUpdate>())
        .and(engine_filter.clone())
        .and(roster_filter)
        .and_then(update_roster);

    let roster_change = event_route("roster-changes")
        .and(warp::post())
        .and(json_body::<RosterChangeRequest>())
        .and(engine_filter.clone())
        .and_then(roster_changed);

    let bulk_import = event_route("bulk-import-complete")
        .and(warp::post())
        .and(engine_filter)
        .and_then(bulk_import_complete);

    health
        .or(evaluations)
        .or(rankings)
        .or(stats)
        .or(schema)
        .or(register)
        .or(roster_update)
        .or(roster_change)
        .or(bulk_import)
        .with(
            warp::cors()
                .allow_any_origin()
                .allow_headers(vec!["content-type"])
                .allow_methods(vec!["GET", "POST", "OPTIONS"]),
        )
}
