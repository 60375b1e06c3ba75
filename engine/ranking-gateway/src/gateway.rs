//! Stream listener for the RankingGateway

use crate::config::GatewayConfig;
use crate::error::{GatewayError, GatewayResult};
use crate::websocket_handler::WebSocketHandler;

use ranking_engine::RankingEngine;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::RwLock;
use tracing::{error, info, warn};

/// Accepts WebSocket clients and hands each one to its own handler task
pub struct RankingGateway {
    config: GatewayConfig,

    engine: Arc<RankingEngine>,

    /// Connection count
    connection_count: Arc<RwLock<usize>>,
}

impl RankingGateway {
    pub fn new(config: GatewayConfig, engine: Arc<RankingEngine>) -> Self {
        Self { config, engine, connection_count: Arc::new(RwLock::new(0)) }
    }

    /// Bind the configured address and serve until the process exits
    pub async fn start(&self) -> GatewayResult<()> {
        let addr = self.config.ws_addr()?;
        let listener = TcpListener::bind(addr).await?;
        info!("RankingGateway stream listening on {}", addr);
        self.serve(listener).await
    }

    /// Serve connections from an already bound listener
    pub async fn serve(&self, listener: TcpListener) -> GatewayResult<()> {
        loop {
            match listener.accept().await {
                Ok((stream, peer_addr)) => {
                    if let Err(e) = self.handle_connection(stream, peer_addr).await {
                        error!("Failed to handle connection from {}: {}", peer_addr, e);
                    }
                }
                Err(e) => {
                    error!("Failed to accept connection: {}", e);
                }
            }
        }
    }

    async fn handle_connection(
        &self,
        stream: tokio::net::TcpStream,
        peer_addr: SocketAddr,
    ) -> GatewayResult<()> {
        {
            let mut count = self.connection_count.write().await;
            if *count >= self.config.server.max_connections {
                warn!("Connection limit reached, rejecting connection from {}", peer_addr);
                return Err(GatewayError::Connection("Connection limit exceeded".to_string()));
            }
            *count += 1;
        }

        let mut handler =
            WebSocketHandler::new(peer_addr, self.engine.clone(), self.config.heartbeat_interval());

        let connection_count = self.connection_count.clone();
        tokio::spawn(async move {
            if let Err(e) = handler.handle(stream).await {
                error!("WebSocket handler error: {}", e);
            }

            let mut count = connection_count.write().await;
            *count = count.saturating_sub(1);
        });

        Ok(())
    }

    /// Get the number of active connections
    pub async fn connection_count(&self) -> usize {
        *self.connection_count.read().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use evaluation_ledger::{AgeGroup, EvaluationRecord, InMemoryEvaluationStore};
    use futures_util::{SinkExt, StreamExt};
    use ranking_engine::{InMemoryRoster, RankingConfig};
    use serde_json::{json, Value};
    use std::time::Duration;
    use tokio_tungstenite::tungstenite::Message as WsMessage;

    async fn start_gateway(heartbeat_secs: u64) -> (Arc<RankingEngine>, SocketAddr) {
        let roster = Arc::new(InMemoryRoster::new());
        for (player, group) in [("p1", "U12"), ("p2", "U12"), ("p3", "U12")] {
            roster.add_player("combine".into(), player.into(), AgeGroup::group(group));
        }
        let engine = Arc::new(
            RankingEngine::with_builtin_schemas(
                RankingConfig::default(),
                Arc::new(InMemoryEvaluationStore::new()),
                roster,
            )
            .unwrap(),
        );

        let mut config = GatewayConfig::default();
        config.server.heartbeat_interval = heartbeat_secs;

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let gateway = RankingGateway::new(config, engine.clone());
        tokio::spawn(async move {
            let _ = gateway.serve(listener).await;
        });
        (engine, addr)
    }

    async fn next_json<S>(stream: &mut S) -> Value
    where
        S: futures_util::Stream<Item = Result<WsMessage, tokio_tungstenite::tungstenite::Error>> + Unpin,
    {
        loop {
            let message = tokio::time::timeout(Duration::from_secs(5), stream.next())
                .await
                .expect("timed out waiting for a message")
                .expect("stream ended")
                .unwrap();
            if let WsMessage::Text(text) = message {
                return serde_json::from_str(&text).unwrap();
            }
        }
    }

    async fn next_stream<S>(stream: &mut S, name: &str) -> Value
    where
        S: futures_util::Stream<Item = Result<WsMessage, tokio_tungstenite::tungstenite::Error>> + Unpin,
    {
        loop {
            let message = next_json(stream).await;
            if message["stream"] == name {
                return message;
            }
        }
    }

    /// Next request reply, skipping pushes
    async fn next_reply<S>(stream: &mut S) -> Value
    where
        S: futures_util::Stream<Item = Result<WsMessage, tokio_tungstenite::tungstenite::Error>> + Unpin,
    {
        loop {
            let message = next_json(stream).await;
            if message["stream"].is_null() {
                return message;
            }
        }
    }

    fn subscribe(params: Value) -> WsMessage {
        WsMessage::Text(json!({"id": "1", "method": "rankings.subscribe", "params": params}).to_string())
    }

    #[tokio::test]
    async fn test_subscription_pushes_new_versions() {
        let (engine, addr) = start_gateway(30).await;
        for (player, value) in [("p1", 5.0), ("p3", 5.5)] {
            engine
                .submit_evaluation(EvaluationRecord::new("combine", player, "40m_dash", "coach", value, "sec"))
                .await
                .unwrap();
        }

        let (ws, _) = tokio_tungstenite::connect_async(format!("ws://{addr}")).await.unwrap();
        let (mut tx, mut rx) = ws.split();

        tx.send(subscribe(json!({"event_id": "combine", "age_group": "U12"}))).await.unwrap();

        let ack = next_reply(&mut rx).await;
        assert_eq!(ack["id"], "1");
        assert_eq!(ack["result"]["missed_updates"], false);
        let first_version = ack["result"]["version"].as_u64().unwrap();

        let snapshot = next_stream(&mut rx, "rankings").await;
        assert_eq!(snapshot["data"]["players"].as_array().unwrap().len(), 2);

        engine
            .submit_evaluation(EvaluationRecord::new("combine", "p2", "40m_dash", "coach", 4.7, "sec"))
            .await
            .unwrap();

        let update = next_stream(&mut rx, "rankings").await;
        assert!(update["data"]["version"].as_u64().unwrap() > first_version);
        assert_eq!(update["data"]["players"][0]["player_id"], "p2");
    }

    #[tokio::test]
    async fn test_resume_reports_missed_updates() {
        let (engine, addr) = start_gateway(30).await;
        engine
            .submit_evaluation(EvaluationRecord::new("combine", "p1", "40m_dash", "coach", 5.0, "sec"))
            .await
            .unwrap();

        let (ws, _) = tokio_tungstenite::connect_async(format!("ws://{addr}")).await.unwrap();
        let (mut tx, mut rx) = ws.split();

        tx.send(subscribe(json!({"event_id": "combine", "resume_from": 0}))).await.unwrap();
        let ack = next_reply(&mut rx).await;
        assert_eq!(ack["result"]["missed_updates"], true);
        let version = ack["result"]["version"].as_u64().unwrap();
        let epoch = ack["result"]["epoch"].as_str().unwrap().to_string();

        tx.send(subscribe(json!({"event_id": "combine", "resume_from": version, "epoch": epoch}))).await.unwrap();
        let ack = next_reply(&mut rx).await;
        assert_eq!(ack["result"]["missed_updates"], false);

        // Rebuilt partition: the version number repeats under a new epoch
        engine.expire_event(&"combine".into());
        tx.send(subscribe(json!({"event_id": "combine", "resume_from": version, "epoch": epoch}))).await.unwrap();
        let ack = next_reply(&mut rx).await;
        assert_eq!(ack["result"]["version"].as_u64().unwrap(), version);
        assert_ne!(ack["result"]["epoch"].as_str().unwrap(), epoch);
        assert_eq!(ack["result"]["missed_updates"], true);
    }

    #[tokio::test]
    async fn test_heartbeat_and_errors() {
        let (_engine, addr) = start_gateway(1).await;

        let (ws, _) = tokio_tungstenite::connect_async(format!("ws://{addr}")).await.unwrap();
        let (mut tx, mut rx) = ws.split();

        tx.send(WsMessage::Text(json!({"id": "9", "method": "orders.place"}).to_string())).await.unwrap();
        let error = next_reply(&mut rx).await;
        assert_eq!(error["id"], "9");
        assert_eq!(error["error"]["code"], 40000);

        tx.send(subscribe(json!({"event_id": "combine", "preset": "nope"}))).await.unwrap();
        let error = next_reply(&mut rx).await;
        assert_eq!(error["error"]["details"]["code"], "UNKNOWN_PRESET");

        tx.send(subscribe(json!({"event_id": "combine"}))).await.unwrap();
        let heartbeat = next_stream(&mut rx, "heartbeat").await;
        assert_eq!(heartbeat["data"]["event_id"], "combine");
        assert_eq!(heartbeat["data"]["age_group"], "ALL");
        assert!(heartbeat["data"]["version"].as_u64().is_some());
    }
}
