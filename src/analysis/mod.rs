// Signal analysis: deterministic technical scoring and the coordinated AI path
pub mod coordinator;
pub mod scorer;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

use crate::error::CoreError;
use crate::indicators::IndicatorSnapshot;
use crate::models::{Candle, SignalAction, Timeframe};

pub use coordinator::{AnalysisCoordinator, CachedAnalysis, CoordinatorConfig};
pub use scorer::{Assessment, ScoreBreakdown, TechnicalScorer};

/// Everything an AI provider gets to see for one symbol
#[derive(Debug, Clone)]
pub struct AnalysisRequest {
    pub symbol: String,
    pub candles: BTreeMap<Timeframe, Vec<Candle>>,
    pub indicators: BTreeMap<Timeframe, IndicatorSnapshot>,
}

impl AnalysisRequest {
    /// Timeframes covered by the request, sorted by duration
    pub fn timeframes(&self) -> Vec<Timeframe> {
        let mut timeframes: Vec<Timeframe> = self
            .indicators
            .keys()
            .chain(self.candles.keys())
            .copied()
            .collect();
        timeframes.sort();
        timeframes.dedup();
        timeframes
    }

    /// Close of the shortest timeframe that has candles
    pub fn last_close(&self) -> Option<f64> {
        self.candles
            .values()
            .find_map(|candles| candles.last().map(|c| c.close))
            .or_else(|| self.indicators.values().next().map(|s| s.close))
    }
}

/// Structured verdict returned by an AI provider
///
/// `confidence` is already a fraction in [0, 1]; providers normalize at their boundary.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AiAnalysis {
    pub action: SignalAction,
    pub confidence: f64,
    pub reasoning: String,
    pub entry_price: Option<f64>,
    pub stop_loss: Option<f64>,
    pub take_profit: Option<f64>,
}

/// External AI analysis service
#[async_trait]
pub trait AnalysisProvider: Send + Sync {
    /// False when credentials are missing; callers skip straight to the scorer
    fn is_configured(&self) -> bool;

    async fn analyze(
        &self,
        request: &AnalysisRequest,
        timeout: Duration,
    ) -> Result<AiAnalysis, CoreError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn candle(close: f64) -> Candle {
        Candle {
            timestamp: Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap(),
            open: close,
            high: close,
            low: close,
            close,
            volume: 1.0,
        }
    }

    #[test]
    fn test_request_timeframes_sorted_and_unique() {
        let mut candles = BTreeMap::new();
        candles.insert(Timeframe::H4, vec![candle(10.0)]);
        candles.insert(Timeframe::M15, vec![candle(11.0)]);
        let mut indicators = BTreeMap::new();
        indicators.insert(Timeframe::H4, IndicatorSnapshot::neutral(10.0));

        let request = AnalysisRequest {
            symbol: "BTCUSDT".to_string(),
            candles,
            indicators,
        };

        assert_eq!(request.timeframes(), vec![Timeframe::M15, Timeframe::H4]);
        // Shortest timeframe wins
        assert_eq!(request.last_close(), Some(11.0));
    }
}
