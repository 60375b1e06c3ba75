//! WebSocket connection handler for live ranking streams

use crate::error::{GatewayError, GatewayResult};
use crate::messages::{
    ErrorMessage, Heartbeat, Message as ApiMessage, RankingsSubscribeRequest,
    RankingsUnsubscribeRequest, SubscribeAck,
};

use evaluation_ledger::{AgeGroup, EventId};
use futures_util::{SinkExt, StreamExt};
use ranking_engine::{Freshness, PartitionKey, RankingCacheEntry, RankingEngine, WeightSelection};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_tungstenite::accept_async;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// WebSocket connection handler
pub struct WebSocketHandler {
    /// Peer address
    peer_addr: SocketAddr,

    /// Connection ID used in logs
    connection_id: Uuid,

    engine: Arc<RankingEngine>,

    heartbeat_interval: Duration,

    /// WebSocket sender channel
    sender: Option<mpsc::UnboundedSender<WsMessage>>,

    /// Push tasks keyed by partition
    subscriptions: HashMap<PartitionKey, JoinHandle<()>>,
}

impl WebSocketHandler {
    pub fn new(peer_addr: SocketAddr, engine: Arc<RankingEngine>, heartbeat_interval: Duration) -> Self {
        Self {
            peer_addr,
            connection_id: Uuid::new_v4(),
            engine,
            heartbeat_interval,
            sender: None,
            subscriptions: HashMap::new(),
        }
    }

    /// Handle the WebSocket connection
    pub async fn handle(&mut self, stream: TcpStream) -> GatewayResult<()> {
        info!("Handling WebSocket connection {} from {}", self.connection_id, self.peer_addr);

        let ws_stream = accept_async(stream).await?;
        let (mut ws_sender, mut ws_receiver) = ws_stream.split();

        let (tx, mut rx) = mpsc::unbounded_channel::<WsMessage>();
        self.sender = Some(tx);

        let sender_task = tokio::spawn(async move {
            while let Some(message) = rx.recv().await {
                if let Err(e) = ws_sender.send(message).await {
                    error!("Failed to send WebSocket message: {}", e);
                    break;
                }
            }
        });

        while let Some(msg) = ws_receiver.next().await {
            match msg {
                Ok(WsMessage::Close(_)) => {
                    info!("Received close message from {}", self.peer_addr);
                    break;
                }
                Ok(message) => self.handle_message(message).await,
                Err(e) => {
                    error!("WebSocket error: {}", e);
                    break;
                }
            }
        }

        for (key, task) in self.subscriptions.drain() {
            debug!("Dropping subscription {} for {}", key, self.peer_addr);
            task.abort();
        }
        sender_task.abort();

        info!("WebSocket connection {} from {} closed", self.connection_id, self.peer_addr);
        Ok(())
    }

    async fn handle_message(&mut self, message: WsMessage) {
        match message {
            WsMessage::Text(text) => {
                debug!("Received text message: {}", text);
                let request: ApiMessage = match serde_json::from_str(&text) {
                    Ok(request) => request,
                    Err(e) => {
                        self.send_error(None, &GatewayError::from(e));
                        return;
                    }
                };
                let id = request.id.clone();
                if let Err(e) = self.handle_request(request).await {
                    warn!("Request from {} failed: {}", self.peer_addr, e);
                    self.send_error(id, &e);
                }
            }
            WsMessage::Ping(data) => self.send_message(WsMessage::Pong(data)),
            WsMessage::Binary(_) => warn!("Received binary message, ignoring"),
            _ => {}
        }
    }

    async fn handle_request(&mut self, message: ApiMessage) -> GatewayResult<()> {
        match message.method.as_deref() {
            Some("rankings.subscribe") => self.handle_subscribe(message).await,
            Some("rankings.unsubscribe") => self.handle_unsubscribe(message),
            other => Err(GatewayError::InvalidRequest(format!("Unknown method: {other:?}"))),
        }
    }

    /// Subscribe to a partition. The current snapshot is pushed unless the
    /// client already holds it (same epoch, `resume_from` at or past the current version).
    async fn handle_subscribe(&mut self, message: ApiMessage) -> GatewayResult<()> {
        let params = message
            .params
            .ok_or_else(|| GatewayError::InvalidRequest("Missing subscribe parameters".to_string()))?;
        let request: RankingsSubscribeRequest = serde_json::from_value(params)?;

        let event_id = EventId::from(request.event_id.as_str());
        let age_group = request.age_group();
        let selection = request.weights.selection();

        // Subscribe before reading so nothing published in between is lost
        let updates = self.engine.subscribe(&event_id, &age_group)?;
        let snapshot = self.engine.rankings(&event_id, &age_group, &selection).await?;

        let key = PartitionKey::new(event_id.clone(), age_group.clone());
        let ack = SubscribeAck {
            subscription: key.to_string(),
            version: snapshot.version,
            epoch: snapshot.epoch,
            missed_updates: request.missed_updates(snapshot.epoch, snapshot.version),
        };
        self.send_json_message(ApiMessage::response(message.id, serde_json::to_value(&ack)?))?;

        if request.needs_snapshot(snapshot.epoch, snapshot.version) {
            self.send_json_message(ApiMessage::push("rankings", serde_json::to_value(&snapshot)?))?;
        }

        let sender = self
            .sender
            .clone()
            .ok_or_else(|| GatewayError::Connection("Connection not established".to_string()))?;
        let subscription = Subscription {
            engine: self.engine.clone(),
            key: key.clone(),
            selection,
            sender,
            heartbeat_interval: self.heartbeat_interval,
            last_version: snapshot.version,
        };

        if let Some(previous) = self.subscriptions.insert(key.clone(), tokio::spawn(subscription.run(updates))) {
            previous.abort();
        }
        info!("{} subscribed to {} at version {}", self.connection_id, key, snapshot.version);
        Ok(())
    }

    fn handle_unsubscribe(&mut self, message: ApiMessage) -> GatewayResult<()> {
        let params = message
            .params
            .ok_or_else(|| GatewayError::InvalidRequest("Missing unsubscribe parameters".to_string()))?;
        let request: RankingsUnsubscribeRequest = serde_json::from_value(params)?;

        let age_group = request.age_group.as_deref().map(AgeGroup::parse).unwrap_or(AgeGroup::All);
        let key = PartitionKey::new(request.event_id.as_str(), age_group);
        let removed = match self.subscriptions.remove(&key) {
            Some(task) => {
                task.abort();
                true
            }
            None => false,
        };

        self.send_json_message(ApiMessage::response(
            message.id,
            serde_json::json!({ "subscription": key.to_string(), "removed": removed }),
        ))
    }

    fn send_json_message(&self, message: ApiMessage) -> GatewayResult<()> {
        let json = serde_json::to_string(&message)?;
        let sender = self
            .sender
            .as_ref()
            .ok_or_else(|| GatewayError::Connection("Connection not established".to_string()))?;
        sender
            .send(WsMessage::Text(json))
            .map_err(|_| GatewayError::Connection("Failed to send message".to_string()))
    }

    fn send_message(&self, message: WsMessage) {
        if let Some(sender) = &self.sender {
            if sender.send(message).is_err() {
                debug!("Sender for {} already closed", self.peer_addr);
            }
        }
    }

    fn send_error(&self, id: Option<String>, err: &GatewayError) {
        let error = ErrorMessage {
            code: err.ws_code(),
            message: err.to_string(),
            details: Some(serde_json::json!({ "code": err.code() })),
        };
        if let Err(e) = self.send_json_message(ApiMessage::failure(id, error)) {
            error!("Failed to send error message: {}", e);
        }
    }
}

/// Push loop of one partition subscription
struct Subscription {
    engine: Arc<RankingEngine>,
    key: PartitionKey,
    selection: WeightSelection,
    sender: mpsc::UnboundedSender<WsMessage>,
    heartbeat_interval: Duration,
    last_version: u64,
}

impl Subscription {
    async fn run(mut self, mut updates: watch::Receiver<Option<Arc<RankingCacheEntry>>>) {
        let mut heartbeat = tokio::time::interval(self.heartbeat_interval);
        heartbeat.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        heartbeat.tick().await;

        loop {
            let delivered = tokio::select! {
                changed = updates.changed() => {
                    if changed.is_err() {
                        debug!("Partition {} expired, ending subscription", self.key);
                        break;
                    }
                    let entry = updates.borrow_and_update().clone();
                    match entry {
                        Some(entry) if entry.version > self.last_version => self.push_rankings(&entry),
                        _ => true,
                    }
                }
                _ = heartbeat.tick() => self.push_heartbeat(),
            };

            if !delivered {
                break;
            }
        }
    }

    fn push_rankings(&mut self, entry: &RankingCacheEntry) -> bool {
        let freshness = match self.engine.cache().wanted_version(&self.key) {
            Some(wanted) if wanted > entry.version => Freshness::Stale { wanted_version: wanted },
            _ => Freshness::Fresh,
        };

        let response = match self.engine.rank_entry(entry, freshness, &self.selection) {
            Ok(response) => response,
            Err(e) => {
                warn!("Cannot rank {} version {}: {}", self.key, entry.version, e);
                return true;
            }
        };

        self.last_version = entry.version;
        self.send(ApiMessage::push("rankings", serde_json::to_value(&response).unwrap_or_default()))
    }

    fn push_heartbeat(&self) -> bool {
        let heartbeat = Heartbeat {
            event_id: self.key.event_id.clone(),
            age_group: self.key.age_group.clone(),
            version: self.last_version,
            timestamp: chrono::Utc::now(),
        };
        self.send(ApiMessage::push("heartbeat", serde_json::to_value(&heartbeat).unwrap_or_default()))
    }

    fn send(&self, message: ApiMessage) -> bool {
        match serde_json::to_string(&message) {
            Ok(json) => self.sender.send(WsMessage::Text(json)).is_ok(),
            Err(e) => {
                error!("Failed to encode push for {}: {}", self.key, e);
                true
            }
        }
    }
}
