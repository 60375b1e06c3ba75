//! Error types for the RankingGateway

use evaluation_ledger::LedgerError;
use ranking_engine::RankingError;
use thiserror::Error;
use warp::http::StatusCode;

/// Errors that can occur in the RankingGateway
#[derive(Error, Debug)]
pub enum GatewayError {
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tungstenite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Engine error: {0}")]
    Engine(#[from] RankingError),

    #[error("Ledger error: {0}")]
    Ledger(#[from] LedgerError),

    /// Measurement rejected at the edge, before it reaches the engine
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Connection error: {0}")]
    Connection(String),
}

impl GatewayError {
    /// Stable machine-readable code for API clients
    pub fn code(&self) -> &'static str {
        match self {
            GatewayError::Validation(_) => "VALIDATION_ERROR",
            GatewayError::InvalidRequest(_) | GatewayError::Serialization(_) => "INVALID_REQUEST",
            GatewayError::Engine(e) => match e {
                RankingError::InvalidSignal(_) => "INVALID_SIGNAL",
                RankingError::InvalidWeights(_) => "INVALID_WEIGHTS",
                RankingError::UnknownDrill(_) => "UNKNOWN_DRILL",
                RankingError::UnknownPreset(_) => "UNKNOWN_PRESET",
                RankingError::UnknownSport(_) => "UNKNOWN_SPORT",
                RankingError::InvalidSchema(_) => "INVALID_SCHEMA",
                RankingError::Recompute(_) => "RECOMPUTE_FAILED",
                RankingError::Ledger(_) => "STORAGE_ERROR",
                RankingError::Config(_) => "CONFIGURATION_ERROR",
            },
            GatewayError::Ledger(_) | GatewayError::Io(_) => "STORAGE_ERROR",
            GatewayError::Config(_) => "CONFIGURATION_ERROR",
            GatewayError::WebSocket(_) | GatewayError::Connection(_) => "CONNECTION_ERROR",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            GatewayError::Validation(_)
            | GatewayError::InvalidRequest(_)
            | GatewayError::Serialization(_) => StatusCode::BAD_REQUEST,
            GatewayError::Engine(e) if e.is_retryable() => StatusCode::SERVICE_UNAVAILABLE,
            GatewayError::Engine(RankingError::Config(_)) => StatusCode::INTERNAL_SERVER_ERROR,
            GatewayError::Engine(_) => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Numeric code carried in WebSocket error frames
    pub fn ws_code(&self) -> u32 {
        match self.status() {
            StatusCode::BAD_REQUEST => 40000,
            StatusCode::SERVICE_UNAVAILABLE => 50300,
            _ => 50000,
        }
    }
}

impl From<String> for GatewayError {
    fn from(err: String) -> Self {
        GatewayError::InvalidRequest(err)
    }
}

/// Result type for RankingGateway operations
pub type GatewayResult<T> = Result<T, GatewayError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_errors_map_to_bad_request() {
        let err = GatewayError::from(RankingError::UnknownDrill("bench".into()));
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
        assert_eq!(err.code(), "UNKNOWN_DRILL");
        assert_eq!(err.ws_code(), 40000);

        let err = GatewayError::Validation("value out of bounds".to_string());
        assert_eq!(err.code(), "VALIDATION_ERROR");
    }

    #[test]
    fn test_storage_errors_are_retryable() {
        let err = GatewayError::from(RankingError::Ledger(LedgerError::corruption("bad line")));
        assert_eq!(err.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(err.code(), "STORAGE_ERROR");
    }
}
