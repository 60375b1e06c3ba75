//! RankingGateway - REST and WebSocket API for the ranking engine
//!
//! Evaluations, roster edits and import signals come in over REST; rankings
//! are served over REST and pushed over WebSocket whenever a partition's
//! cache version advances.

pub mod config;
pub mod error;
pub mod gateway;
pub mod messages;
pub mod rest_api;
pub mod websocket_handler;

pub use config::GatewayConfig;
pub use error::{GatewayError, GatewayResult};
pub use gateway::RankingGateway;

/// Version of the RankingGateway API
pub const VERSION: &str = "0.1.0";

/// Default WebSocket port
pub const DEFAULT_WS_PORT: u16 = 8080;

/// Default REST port
pub const DEFAULT_REST_PORT: u16 = 8081;

/// Default heartbeat interval in seconds
pub const DEFAULT_HEARTBEAT_INTERVAL: u64 = 30;
