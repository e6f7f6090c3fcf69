use thiserror::Error;

/// Failure taxonomy shared by every collaborator seam
///
/// Most variants are recovered locally (fallback scoring, skipping a timeframe,
/// logging a position and moving on) and never reach the caller of the core.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum CoreError {
    /// A single timeframe could not be fetched after retries
    #[error("market data unavailable for {symbol} {timeframe}: {reason}")]
    DataUnavailable {
        symbol: String,
        timeframe: String,
        reason: String,
    },

    #[error("AI analysis timed out after {0:?}")]
    AnalysisTimeout(std::time::Duration),

    #[error("AI analysis unavailable: {0}")]
    AnalysisUnavailable(String),

    #[error("venue unreachable: {0}")]
    VenueUnreachable(String),

    #[error("order {order_id} not found on {symbol}")]
    OrderNotFound { symbol: String, order_id: String },

    /// Venue state disagrees with the local record
    #[error("reconciliation mismatch for {symbol}: {detail}")]
    ReconciliationMismatch { symbol: String, detail: String },

    #[error("coordination store error: {0}")]
    Store(String),

    #[error("persistence error: {0}")]
    Persistence(String),

    #[error("invalid position transition: {0}")]
    InvalidTransition(String),

    #[error("configuration error: {0}")]
    Config(String),
}

impl CoreError {
    /// Errors that say nothing about the venue being down
    pub fn is_venue_unreachable(&self) -> bool {
        matches!(self, CoreError::VenueUnreachable(_))
    }
}

impl From<redis::RedisError> for CoreError {
    fn from(e: redis::RedisError) -> Self {
        CoreError::Store(e.to_string())
    }
}

impl From<sqlx::Error> for CoreError {
    fn from(e: sqlx::Error) -> Self {
        CoreError::Persistence(e.to_string())
    }
}

impl From<serde_json::Error> for CoreError {
    fn from(e: serde_json::Error) -> Self {
        CoreError::Store(format!("serialization: {}", e))
    }
}
