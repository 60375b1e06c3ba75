//! Configuration for the RankingGateway

use crate::error::{GatewayError, GatewayResult};
use ranking_engine::RankingConfig;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

/// Main configuration for the RankingGateway
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct GatewayConfig {
    /// Server configuration
    pub server: ServerConfig,

    /// Storage configuration
    pub storage: StorageConfig,

    /// Engine configuration
    #[serde(default)]
    pub ranking: RankingConfig,
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Host to bind to
    pub host: String,

    /// REST API port
    pub rest_port: u16,

    /// WebSocket stream port
    pub ws_port: u16,

    /// Maximum number of concurrent stream connections
    pub max_connections: usize,

    /// Heartbeat interval in seconds
    pub heartbeat_interval: u64,
}

/// Storage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Root directory of the evaluation ledger
    pub data_dir: PathBuf,

    /// Optional JSON roster loaded at startup
    pub roster_file: Option<PathBuf>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            rest_port: 8081,
            ws_port: 8080,
            max_connections: 10000,
            heartbeat_interval: 30,
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self { data_dir: PathBuf::from("data"), roster_file: None }
    }
}

impl GatewayConfig {
    /// Address of the REST API
    pub fn rest_addr(&self) -> GatewayResult<SocketAddr> {
        parse_addr(&self.server.host, self.server.rest_port)
    }

    /// Address of the WebSocket stream
    pub fn ws_addr(&self) -> GatewayResult<SocketAddr> {
        parse_addr(&self.server.host, self.server.ws_port)
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.server.heartbeat_interval)
    }

    /// Load configuration from file
    pub fn load_from_file(path: &str) -> GatewayResult<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: GatewayConfig =
            toml::from_str(&content).map_err(|e| GatewayError::Config(format!("{path}: {e}")))?;
        config.validate().map_err(GatewayError::Config)?;
        Ok(config)
    }

    /// Save configuration to file
    pub fn save_to_file(&self, path: &str) -> GatewayResult<()> {
        let content = toml::to_string_pretty(self).map_err(|e| GatewayError::Config(e.to_string()))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Apply `RANKING_GATEWAY_*` and `RANKING_*` environment overrides
    pub fn apply_env(&mut self) -> GatewayResult<()> {
        if let Ok(host) = std::env::var("RANKING_GATEWAY_HOST") {
            self.server.host = host;
        }
        if let Ok(port) = std::env::var("RANKING_GATEWAY_REST_PORT") {
            self.server.rest_port = parse_env("RANKING_GATEWAY_REST_PORT", &port)?;
        }
        if let Ok(port) = std::env::var("RANKING_GATEWAY_WS_PORT") {
            self.server.ws_port = parse_env("RANKING_GATEWAY_WS_PORT", &port)?;
        }
        if let Ok(dir) = std::env::var("RANKING_DATA_DIR") {
            self.storage.data_dir = PathBuf::from(dir);
        }
        if let Ok(file) = std::env::var("RANKING_ROSTER_FILE") {
            self.storage.roster_file = Some(PathBuf::from(file));
        }
        self.ranking.apply_env()?;
        self.validate().map_err(GatewayError::Config)
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.server.rest_port == self.server.ws_port && self.server.rest_port != 0 {
            return Err(format!("REST and WebSocket ports must differ (both {})", self.server.rest_port));
        }
        if self.server.max_connections == 0 {
            return Err("max_connections must be positive".to_string());
        }
        if self.server.heartbeat_interval == 0 {
            return Err("heartbeat_interval must be positive".to_string());
        }
        self.ranking.validate()
    }
}

fn parse_addr(host: &str, port: u16) -> GatewayResult<SocketAddr> {
    format!("{host}:{port}")
        .parse()
        .map_err(|e| GatewayError::Config(format!("Invalid server address {host}:{port}: {e}")))
}

fn parse_env<T: std::str::FromStr>(name: &str, raw: &str) -> GatewayResult<T> {
    raw.parse().map_err(|_| GatewayError::Config(format!("{name} has invalid value {raw:?}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_default_config_is_valid() {
        let config = GatewayConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.rest_addr().unwrap().port(), 8081);
        assert_eq!(config.ws_addr().unwrap().port(), 8080);
        assert_eq!(config.heartbeat_interval(), Duration::from_secs(30));
    }

    #[test]
    fn test_config_file_round_trip() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("gateway.toml");
        let path = path.to_str().unwrap();

        let mut config = GatewayConfig::default();
        config.server.rest_port = 9001;
        config.ranking.scoring.min_partition_samples = 5;
        config.save_to_file(path).unwrap();

        let loaded = GatewayConfig::load_from_file(path).unwrap();
        assert_eq!(loaded.server.rest_port, 9001);
        assert_eq!(loaded.ranking.scoring.min_partition_samples, 5);
    }

    #[test]
    fn test_same_ports_rejected() {
        let mut config = GatewayConfig::default();
        config.server.ws_port = config.server.rest_port;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_bad_host_is_a_config_error() {
        let mut config = GatewayConfig::default();
        config.server.host = "not a host".to_string();
        assert!(matches!(config.rest_addr(), Err(GatewayError::Config(_))));
    }
}
