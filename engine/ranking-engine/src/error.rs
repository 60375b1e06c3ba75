//! Error types for the ranking engine

use evaluation_ledger::{DrillId, LedgerError};
use thiserror::Error;

/// Result type alias for ranking operations
pub type Result<T> = std::result::Result<T, RankingError>;

/// Errors surfaced by the ranking engine.
///
/// Degenerate statistics and stale reads are not errors; they resolve to
/// fallback scores and response annotations.
#[derive(Error, Debug)]
pub enum RankingError {
    /// Storage layer failure; callers are expected to retry
    #[error("Ledger error: {0}")]
    Ledger(#[from] LedgerError),

    #[error("Configuration error: {0}")]
    Config(String),

    /// Invalidation or roster signal that names no valid partition
    #[error("Invalid signal: {0}")]
    InvalidSignal(String),

    #[error("Invalid weights: {0}")]
    InvalidWeights(String),

    #[error("Unknown drill: {0}")]
    UnknownDrill(DrillId),

    #[error("Unknown preset: {0}")]
    UnknownPreset(String),

    #[error("Unknown sport: {0}")]
    UnknownSport(String),

    /// Event setup that cannot be composed into a usable schema
    #[error("Invalid schema: {0}")]
    InvalidSchema(String),

    /// A partition build failed before any entry could be served
    #[error("Recompute failed: {0}")]
    Recompute(String),
}

impl RankingError {
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    pub fn invalid_signal(msg: impl Into<String>) -> Self {
        Self::InvalidSignal(msg.into())
    }

    pub fn invalid_weights(msg: impl Into<String>) -> Self {
        Self::InvalidWeights(msg.into())
    }

    pub fn invalid_schema(msg: impl Into<String>) -> Self {
        Self::InvalidSchema(msg.into())
    }

    /// Whether the caller may succeed by retrying the same request
    pub fn is_retryable(&self) -> bool {
        matches!(self, RankingError::Ledger(_) | RankingError::Recompute(_))
    }
}
