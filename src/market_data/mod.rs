// Candle retrieval with bounded backfill
pub mod fetcher;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::CoreError;
use crate::models::{Candle, Timeframe};

pub use fetcher::{FetchOutcome, MarketDataFetcher, MultiTimeframeData, MAX_RETRIES};

/// Source of historical candles (exchange REST API, replay files, ...)
///
/// Returns candles ordered oldest first. May return fewer than `limit`; must not block
/// indefinitely.
#[async_trait]
pub trait MarketDataProvider: Send + Sync {
    async fn get_candles(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<Candle>, CoreError>;
}
