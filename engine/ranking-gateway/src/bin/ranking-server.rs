//! Ranking server: evaluation ledger, ranking engine, REST API and stream gateway

use anyhow::Context;
use evaluation_ledger::{AgeGroup, LocalEvaluationStore};
use ranking_engine::{InMemoryRoster, RankingEngine};
use ranking_gateway::messages::RosterSeed;
use ranking_gateway::{rest_api, GatewayConfig, RankingGateway};
use std::path::Path;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    info!("Starting ranking server...");

    let mut config = match std::env::var("RANKING_GATEWAY_CONFIG") {
        Ok(path) => GatewayConfig::load_from_file(&path).with_context(|| format!("loading {path}"))?,
        Err(_) => GatewayConfig::default(),
    };
    config.apply_env()?;

    let store = Arc::new(
        LocalEvaluationStore::with_default_config(config.storage.data_dir.clone())
            .context("opening evaluation ledger")?,
    );
    info!("Opened evaluation ledger at {}", config.storage.data_dir.display());

    let roster = Arc::new(InMemoryRoster::new());
    if let Some(path) = &config.storage.roster_file {
        let loaded = load_roster(&roster, path).with_context(|| format!("loading roster {}", path.display()))?;
        info!("Loaded {} roster entries", loaded);
    }

    let engine = Arc::new(RankingEngine::with_builtin_schemas(
        config.ranking.clone(),
        store,
        roster.clone(),
    )?);
    let events = engine.restore().await?;
    for event_id in &events {
        engine.notify_bulk_import_complete(event_id).await?;
    }

    let routes = rest_api::create_routes(engine.clone(), roster);
    let rest_addr = config.rest_addr()?;
    info!("Starting REST API on {}", rest_addr);
    tokio::spawn(warp::serve(routes).run(rest_addr));

    let gateway = RankingGateway::new(config, engine);
    if let Err(e) = gateway.start().await {
        error!("Stream gateway stopped: {}", e);
        return Err(e.into());
    }
    Ok(())
}

fn load_roster(roster: &InMemoryRoster, path: &Path) -> anyhow::Result<usize> {
    let content = std::fs::read_to_string(path)?;
    let entries: Vec<RosterSeed> = serde_json::from_str(&content)?;
    for entry in &entries {
        roster.add_player(
            entry.event_id.as_str().into(),
            entry.player_id.as_str().into(),
            AgeGroup::parse(&entry.age_group),
        );
    }
    Ok(entries.len())
}
