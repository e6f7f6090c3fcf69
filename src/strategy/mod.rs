// Signal producers and the per-tick pipeline that feeds them
pub mod pipeline;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::analysis::{AnalysisCoordinator, AnalysisRequest, TechnicalScorer};
use crate::indicators::{self, IndicatorSnapshot};
use crate::market_data::MultiTimeframeData;
use crate::models::{Signal, Timeframe};

pub use pipeline::{SignalPipeline, StrategyInstance};

/// Inputs for one analysis pass, built fresh for every request
///
/// Holds the candles fetched for this pass and the indicators derived from them;
/// nothing carries over between passes.
#[derive(Debug, Clone)]
pub struct AnalysisContext {
    pub symbol: String,
    pub generated_at: DateTime<Utc>,
    pub data: MultiTimeframeData,
    pub indicators: BTreeMap<Timeframe, IndicatorSnapshot>,
}

impl AnalysisContext {
    pub fn new(symbol: &str, data: MultiTimeframeData, generated_at: DateTime<Utc>) -> Self {
        let indicators = data
            .candles
            .iter()
            .filter(|(_, candles)| !candles.is_empty())
            .map(|(tf, candles)| (*tf, indicators::compute(candles)))
            .collect();

        Self {
            symbol: symbol.to_string(),
            generated_at,
            data,
            indicators,
        }
    }

    pub fn has_data(&self) -> bool {
        !self.indicators.is_empty()
    }

    pub fn to_request(&self) -> AnalysisRequest {
        AnalysisRequest {
            symbol: self.symbol.clone(),
            candles: self
                .data
                .candles
                .iter()
                .filter(|(_, candles)| !candles.is_empty())
                .map(|(tf, candles)| (*tf, candles.clone()))
                .collect(),
            indicators: self.indicators.clone(),
        }
    }
}

/// Anything that turns an analysis context into a signal
#[async_trait]
pub trait SignalProducer: Send + Sync {
    fn name(&self) -> &str;

    /// Timeframes this producer wants fetched
    fn timeframes(&self) -> &[Timeframe];

    /// Closed candles needed per timeframe
    fn min_candles(&self) -> usize {
        DEFAULT_MIN_CANDLES
    }

    /// Must always return a signal; failures become HOLD with the cause in reasoning
    async fn produce_signal(&self, ctx: &AnalysisContext) -> Signal;
}

const DEFAULT_MIN_CANDLES: usize = 60;

/// Rule-based producer backed by the technical scorer
pub struct TechnicalStrategy {
    name: String,
    timeframes: Vec<Timeframe>,
    min_candles: usize,
    scorer: TechnicalScorer,
}

impl TechnicalStrategy {
    pub fn new(name: &str, timeframes: Vec<Timeframe>) -> Self {
        Self {
            name: name.to_string(),
            timeframes,
            min_candles: DEFAULT_MIN_CANDLES,
            scorer: TechnicalScorer::new(name),
        }
    }

    pub fn with_min_candles(mut self, min_candles: usize) -> Self {
        self.min_candles = min_candles.max(1);
        self
    }
}

#[async_trait]
impl SignalProducer for TechnicalStrategy {
    fn name(&self) -> &str {
        &self.name
    }

    fn timeframes(&self) -> &[Timeframe] {
        &self.timeframes
    }

    fn min_candles(&self) -> usize {
        self.min_candles
    }

    async fn produce_signal(&self, ctx: &AnalysisContext) -> Signal {
        if !ctx.has_data() {
            return Signal::error_default(
                &ctx.symbol,
                &self.name,
                "no market data for any timeframe",
                ctx.generated_at,
            );
        }

        self.scorer
            .score_timeframes(&ctx.symbol, &ctx.indicators, ctx.generated_at)
    }
}

/// Producer that asks the AI provider through the shared coordinator
pub struct AiAugmentedStrategy {
    name: String,
    timeframes: Vec<Timeframe>,
    min_candles: usize,
    coordinator: Arc<AnalysisCoordinator>,
}

impl AiAugmentedStrategy {
    pub fn new(name: &str, timeframes: Vec<Timeframe>, coordinator: Arc<AnalysisCoordinator>) -> Self {
        Self {
            name: name.to_string(),
            timeframes,
            min_candles: DEFAULT_MIN_CANDLES,
            coordinator,
        }
    }

    pub fn with_min_candles(mut self, min_candles: usize) -> Self {
        self.min_candles = min_candles.max(1);
        self
    }
}

#[async_trait]
impl SignalProducer for AiAugmentedStrategy {
    fn name(&self) -> &str {
        &self.name
    }

    fn timeframes(&self) -> &[Timeframe] {
        &self.timeframes
    }

    fn min_candles(&self) -> usize {
        self.min_candles
    }

    async fn produce_signal(&self, ctx: &AnalysisContext) -> Signal {
        if !ctx.has_data() {
            return Signal::error_default(
                &ctx.symbol,
                &self.name,
                "no market data for any timeframe",
                ctx.generated_at,
            );
        }

        self.coordinator
            .analyze_at(&ctx.to_request(), ctx.generated_at)
            .await
            .with_strategy(&self.name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Candle, SignalAction, SignalSource};
    use chrono::TimeZone;

    pub(crate) fn trending_candles(count: usize, start_price: f64, step: f64) -> Vec<Candle> {
        let start = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap();
        (0..count)
            .map(|i| {
                let close = start_price + step * i as f64;
                Candle {
                    timestamp: start + chrono::Duration::hours(i as i64),
                    open: close - step / 2.0,
                    high: close + step.abs(),
                    low: close - step.abs(),
                    close,
                    volume: 100.0,
                }
            })
            .collect()
    }

    #[test]
    fn test_context_skips_empty_timeframes() {
        let mut data = MultiTimeframeData::default();
        data.candles.insert(Timeframe::H1, trending_candles(80, 100.0, 0.5));
        data.candles.insert(Timeframe::H4, Vec::new());

        let ctx = AnalysisContext::new("BTCUSDT", data, Utc::now());

        assert!(ctx.has_data());
        assert_eq!(ctx.indicators.len(), 1);
        assert_eq!(ctx.to_request().timeframes(), vec![Timeframe::H1]);
    }

    #[tokio::test]
    async fn test_technical_strategy_without_data_holds() {
        let strategy = TechnicalStrategy::new("tech", vec![Timeframe::H1]);
        let ctx = AnalysisContext::new("BTCUSDT", MultiTimeframeData::default(), Utc::now());

        let signal = strategy.produce_signal(&ctx).await;

        assert_eq!(signal.action, SignalAction::Hold);
        assert_eq!(signal.source, SignalSource::ErrorDefault);
        assert_eq!(signal.strategy, "tech");
    }

    #[tokio::test]
    async fn test_ai_strategy_without_data_never_calls_provider() {
        use crate::analysis::{AiAnalysis, AnalysisProvider, CoordinatorConfig};
        use crate::coordination::InMemoryStore;
        use crate::error::CoreError;
        use std::sync::atomic::{AtomicUsize, Ordering};
        use std::time::Duration;

        #[derive(Default)]
        struct CountingProvider {
            calls: AtomicUsize,
        }

        #[async_trait]
        impl AnalysisProvider for CountingProvider {
            fn is_configured(&self) -> bool {
                true
            }

            async fn analyze(
                &self,
                _request: &AnalysisRequest,
                _timeout: Duration,
            ) -> Result<AiAnalysis, CoreError> {
                self.calls.fetch_add(1, Ordering::SeqCst);
                Ok(AiAnalysis {
                    action: SignalAction::Buy,
                    confidence: 0.9,
                    reasoning: "x".to_string(),
                    entry_price: None,
                    stop_loss: None,
                    take_profit: None,
                })
            }
        }

        let provider = Arc::new(CountingProvider::default());
        let coordinator = Arc::new(AnalysisCoordinator::new(
            Arc::new(InMemoryStore::new()),
            provider.clone(),
            CoordinatorConfig::default(),
        ));
        let strategy = AiAugmentedStrategy::new("ai", vec![Timeframe::H1], coordinator);
        let ctx = AnalysisContext::new("BTCUSDT", MultiTimeframeData::default(), Utc::now());

        let signal = strategy.produce_signal(&ctx).await;

        assert_eq!(provider.calls.load(Ordering::SeqCst), 0);
        assert_eq!(signal.source, SignalSource::ErrorDefault);
        assert_eq!(signal.action, SignalAction::Hold);
        assert_eq!(signal.strategy, "ai");
    }

    #[tokio::test]
    async fn test_technical_strategy_tags_signal() {
        let strategy = TechnicalStrategy::new("tech", vec![Timeframe::H1]);
        let mut data = MultiTimeframeData::default();
        data.candles.insert(Timeframe::H1, trending_candles(80, 100.0, 0.5));
        let ctx = AnalysisContext::new("BTCUSDT", data, Utc::now());

        let signal = strategy.produce_signal(&ctx).await;

        assert_eq!(signal.strategy, "tech");
        assert_eq!(signal.source, SignalSource::Technical);
        assert!(!signal.reasoning.is_empty());
        assert!((0.0..=1.0).contains(&signal.confidence));
    }
}
