use chrono::{DateTime, Utc};
use futures::future::join_all;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use super::MarketDataProvider;
use crate::error::CoreError;
use crate::models::{Candle, Timeframe};
use crate::retry::RetryPolicy;

/// Backfill calls allowed after the initial request
pub const MAX_RETRIES: u32 = 3;

const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Result of fetching one timeframe
#[derive(Debug, Clone, PartialEq)]
pub struct FetchOutcome {
    /// Closed candles, oldest first
    pub candles: Vec<Candle>,
    /// Set when fewer than the requested number of candles could be collected
    pub warning: Option<String>,
    pub backfill_attempts: u32,
}

impl FetchOutcome {
    pub fn is_complete(&self) -> bool {
        self.warning.is_none()
    }
}

/// Aggregated per-timeframe results; failures never abort sibling timeframes
#[derive(Debug, Clone, Default)]
pub struct MultiTimeframeData {
    pub candles: BTreeMap<Timeframe, Vec<Candle>>,
    pub failures: BTreeMap<Timeframe, CoreError>,
    pub warnings: BTreeMap<Timeframe, String>,
}

impl MultiTimeframeData {
    /// True when no timeframe produced a single candle
    pub fn is_empty(&self) -> bool {
        self.candles.values().all(|c| c.is_empty())
    }
}

/// Lookback window for a request: 50% headroom over the minimum
pub fn initial_window(min_count: usize) -> usize {
    min_count.max((min_count * 3).div_ceil(2))
}

/// Fetches bounded candle windows and backfills when the venue returns too few
pub struct MarketDataFetcher {
    provider: Arc<dyn MarketDataProvider>,
    retry: RetryPolicy,
    request_timeout: Duration,
}

impl MarketDataFetcher {
    pub fn new(provider: Arc<dyn MarketDataProvider>) -> Self {
        Self {
            provider,
            retry: RetryPolicy::new(MAX_RETRIES, Duration::from_millis(250), 2.0),
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_request_timeout(mut self, request_timeout: Duration) -> Self {
        self.request_timeout = request_timeout;
        self
    }

    async fn request(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        now: DateTime<Utc>,
        span: usize,
    ) -> Result<Vec<Candle>, CoreError> {
        let start = i32::try_from(span)
            .ok()
            .and_then(|n| timeframe.duration().checked_mul(n))
            .and_then(|lookback| now.checked_sub_signed(lookback))
            .ok_or_else(|| CoreError::DataUnavailable {
                symbol: symbol.to_string(),
                timeframe: timeframe.to_string(),
                reason: format!("lookback of {} candles is out of range", span),
            })?;
        let call = self
            .provider
            .get_candles(symbol, timeframe, start, now, span);

        match tokio::time::timeout(self.request_timeout, call).await {
            Ok(result) => result,
            Err(_) => Err(CoreError::DataUnavailable {
                symbol: symbol.to_string(),
                timeframe: timeframe.to_string(),
                reason: format!("request timed out after {:?}", self.request_timeout),
            }),
        }
    }

    /// Fetch at least `min_count` closed candles for one timeframe
    ///
    /// Performs one request plus at most `retry.max_retries` backfill requests, each
    /// reaching further back in time. Returns what it collected with a warning if the
    /// target was not reached; errors only when every request failed.
    pub async fn fetch(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        min_count: usize,
    ) -> Result<FetchOutcome, CoreError> {
        if min_count == 0 {
            return Ok(FetchOutcome {
                candles: Vec::new(),
                warning: None,
                backfill_attempts: 0,
            });
        }

        let now = Utc::now();
        let window = initial_window(min_count);
        let mut merged: BTreeMap<DateTime<Utc>, Candle> = BTreeMap::new();
        let mut any_success = false;
        let mut last_error: Option<CoreError> = None;

        let closed = |merged: &BTreeMap<DateTime<Utc>, Candle>| {
            merged
                .values()
                .filter(|c| c.is_closed(timeframe, now))
                .count()
        };

        match self.request(symbol, timeframe, now, window).await {
            Ok(candles) => {
                any_success = true;
                merged.extend(candles.into_iter().map(|c| (c.timestamp, c)));
            }
            Err(e) => {
                tracing::warn!(%symbol, %timeframe, error = %e, "Initial candle request failed");
                last_error = Some(e);
            }
        }

        let mut backfill_attempts = 0;
        while closed(&merged) < min_count && self.retry.allows(backfill_attempts + 1) {
            backfill_attempts += 1;
            self.retry.wait(backfill_attempts).await;

            let span = window.saturating_mul(backfill_attempts as usize + 1);
            tracing::debug!(
                %symbol,
                %timeframe,
                have = closed(&merged),
                need = min_count,
                span,
                "Backfilling candles (attempt {}/{})",
                backfill_attempts,
                self.retry.max_retries
            );

            match self.request(symbol, timeframe, now, span).await {
                Ok(candles) => {
                    any_success = true;
                    merged.extend(candles.into_iter().map(|c| (c.timestamp, c)));
                }
                Err(e) => {
                    tracing::warn!(%symbol, %timeframe, error = %e, "Backfill request failed");
                    last_error = Some(e);
                }
            }
        }

        let mut candles: Vec<Candle> = merged
            .into_values()
            .filter(|c| c.is_closed(timeframe, now))
            .collect();

        if candles.is_empty() && !any_success {
            return Err(last_error.unwrap_or_else(|| CoreError::DataUnavailable {
                symbol: symbol.to_string(),
                timeframe: timeframe.to_string(),
                reason: "no response".to_string(),
            }));
        }

        // Keep the most recent window; older backfilled candles are surplus
        if candles.len() > window {
            candles.drain(..candles.len() - window);
        }

        let warning = if candles.len() < min_count {
            let message = format!(
                "only {} of {} closed {} candles after {} backfill attempts",
                candles.len(),
                min_count,
                timeframe,
                backfill_attempts
            );
            tracing::warn!(%symbol, "{}", message);
            Some(message)
        } else {
            None
        };

        Ok(FetchOutcome {
            candles,
            warning,
            backfill_attempts,
        })
    }

    /// Fetch several timeframes concurrently, isolating per-timeframe failures
    pub async fn fetch_many(
        &self,
        symbol: &str,
        timeframes: &[Timeframe],
        min_count: usize,
    ) -> MultiTimeframeData {
        let mut unique: Vec<Timeframe> = timeframes.to_vec();
        unique.sort();
        unique.dedup();

        let results = join_all(
            unique
                .iter()
                .map(|tf| async move { (*tf, self.fetch(symbol, *tf, min_count).await) }),
        )
        .await;

        let mut data = MultiTimeframeData::default();
        for (timeframe, result) in results {
            match result {
                Ok(outcome) => {
                    if let Some(warning) = outcome.warning {
                        data.warnings.insert(timeframe, warning);
                    }
                    data.candles.insert(timeframe, outcome.candles);
                }
                Err(e) => {
                    tracing::error!(%symbol, %timeframe, error = %e, "Timeframe fetch failed");
                    data.failures.insert(timeframe, e);
                }
            }
        }

        data
    }
}
