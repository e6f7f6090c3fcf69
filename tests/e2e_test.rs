use async_trait::async_trait;
use chrono::{DateTime, DurationRound, Utc};
use signalbot::analysis::{
    AiAnalysis, AnalysisCoordinator, AnalysisProvider, AnalysisRequest, CoordinatorConfig,
};
use signalbot::coordination::{CoordinationStore, InMemoryStore};
use signalbot::db::{InMemoryPositionRepository, PositionRepository};
use signalbot::dispatch::{LogPerformanceConsumer, LogSignalSink, SignalDispatcher, SignalSink};
use signalbot::execution::{OrderCleanupService, PositionMonitor};
use signalbot::market_data::{MarketDataFetcher, MarketDataProvider};
use signalbot::retry::RetryPolicy;
use signalbot::strategy::{
    AiAugmentedStrategy, SignalPipeline, StrategyInstance, TechnicalStrategy,
};
use signalbot::venue::{CancelOutcome, ExecutionVenue, OpenOrder, VenuePosition};
use signalbot::*;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Rising closed candles for every symbol and timeframe
struct RisingCandles;

#[async_trait]
impl MarketDataProvider for RisingCandles {
    async fn get_candles(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        _start: DateTime<Utc>,
        end: DateTime<Utc>,
        limit: usize,
    ) -> std::result::Result<Vec<Candle>, CoreError> {
        let step = timeframe.duration();
        let last_open = end
            .duration_trunc(step)
            .map_err(|e| CoreError::DataUnavailable {
                symbol: symbol.to_string(),
                timeframe: timeframe.to_string(),
                reason: e.to_string(),
            })?
            - step;

        Ok((0..limit)
            .rev()
            .map(|back| {
                let close = 100.0 + (limit - back) as f64 * 0.5;
                Candle {
                    timestamp: last_open - step * back as i32,
                    open: close - 0.25,
                    high: close + 0.5,
                    low: close - 0.5,
                    close,
                    volume: 80.0,
                }
            })
            .collect())
    }
}

/// Slow provider that always answers BUY with a percentage confidence
struct SlowBullishProvider {
    calls: AtomicUsize,
}

#[async_trait]
impl AnalysisProvider for SlowBullishProvider {
    fn is_configured(&self) -> bool {
        true
    }

    async fn analyze(
        &self,
        _request: &AnalysisRequest,
        _timeout: Duration,
    ) -> std::result::Result<AiAnalysis, CoreError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(100)).await;
        Ok(AiAnalysis {
            action: SignalAction::Buy,
            confidence: 80.0,
            reasoning: "higher highs on every timeframe".to_string(),
            entry_price: None,
            stop_loss: None,
            take_profit: None,
        })
    }
}

fn fetcher() -> Arc<MarketDataFetcher> {
    Arc::new(MarketDataFetcher::new(Arc::new(RisingCandles)).with_retry_policy(RetryPolicy::immediate(1)))
}

fn worker(
    name: &str,
    store: Arc<dyn CoordinationStore>,
    provider: Arc<SlowBullishProvider>,
) -> (SignalPipeline, StrategyInstance) {
    let config = CoordinatorConfig {
        worker_id: name.to_string(),
        lock_wait: Duration::from_millis(500),
        ..CoordinatorConfig::default()
    };
    let coordinator = Arc::new(AnalysisCoordinator::new(store, provider, config));

    let instance = StrategyInstance {
        symbol: "BTCUSDT".to_string(),
        producer: Arc::new(AiAugmentedStrategy::new(
            "ai_augmented",
            vec![Timeframe::H1, Timeframe::H4],
            coordinator,
        )),
    };

    (SignalPipeline::new(fetcher()), instance)
}

#[tokio::test]
async fn test_two_workers_share_one_ai_call() {
    let store: Arc<dyn CoordinationStore> = Arc::new(InMemoryStore::new());
    let provider = Arc::new(SlowBullishProvider {
        calls: AtomicUsize::new(0),
    });

    let (pipeline_a, instance_a) = worker("worker-a", store.clone(), provider.clone());
    let (pipeline_b, instance_b) = worker("worker-b", store.clone(), provider.clone());

    let (a, b) = tokio::join!(
        pipeline_a.run_instance(&instance_a),
        pipeline_b.run_instance(&instance_b)
    );

    assert_eq!(provider.calls.load(Ordering::SeqCst), 1);

    let mut sources = vec![a.source, b.source];
    sources.sort_by_key(|s| format!("{:?}", s));
    assert_eq!(sources, vec![SignalSource::Ai, SignalSource::Cached]);

    for signal in [&a, &b] {
        assert_eq!(signal.action, SignalAction::Buy);
        assert_eq!(signal.confidence, 0.8);
        assert_eq!(signal.strategy, "ai_augmented");
        assert!(signal.reasoning.starts_with("AI analysis"));
    }
}

#[tokio::test]
async fn test_pipeline_mixes_strategies_and_dispatches() {
    let store: Arc<dyn CoordinationStore> = Arc::new(InMemoryStore::new());
    let provider = Arc::new(SlowBullishProvider {
        calls: AtomicUsize::new(0),
    });
    let (_, ai_instance) = worker("worker-a", store, provider);

    let technical = StrategyInstance {
        symbol: "ETHUSDT".to_string(),
        producer: Arc::new(TechnicalStrategy::new("technical", vec![Timeframe::M15, Timeframe::H1])),
    };

    let sinks: Vec<Arc<dyn SignalSink>> = vec![Arc::new(LogSignalSink)];
    let (dispatcher, handle) = SignalDispatcher::spawn(sinks, 16);
    let pipeline = SignalPipeline::new(fetcher()).with_dispatcher(dispatcher);

    let signals = pipeline.run_all(&[ai_instance, technical]).await;
    drop(pipeline);

    assert_eq!(signals.len(), 2);
    assert_eq!(signals[0].source, SignalSource::Ai);
    assert_eq!(signals[1].symbol, "ETHUSDT");
    assert_eq!(signals[1].source, SignalSource::Technical);
    assert!((0.0..=1.0).contains(&signals[1].confidence));

    let stats = handle.await.unwrap();
    assert_eq!(stats.signals, 2);
    assert_eq!(stats.failed, 0);
}

/// Venue with one position per symbol and a record of cancelled orders
#[derive(Default)]
struct ScriptedVenue {
    positions: Mutex<HashMap<String, VenuePosition>>,
    cancelled: Mutex<Vec<String>>,
}

#[async_trait]
impl ExecutionVenue for ScriptedVenue {
    async fn get_position(&self, symbol: &str) -> std::result::Result<Option<VenuePosition>, CoreError> {
        Ok(self.positions.lock().unwrap().get(symbol).cloned())
    }

    async fn get_mark_price(&self, symbol: &str) -> std::result::Result<f64, CoreError> {
        self.positions
            .lock()
            .unwrap()
            .get(symbol)
            .map(|p| p.mark_price)
            .ok_or_else(|| CoreError::VenueUnreachable(format!("no mark for {}", symbol)))
    }

    async fn last_fill_price(&self, _symbol: &str) -> std::result::Result<Option<f64>, CoreError> {
        Ok(Some(99.5))
    }

    async fn cancel_order(&self, _symbol: &str, order_id: &str) -> std::result::Result<CancelOutcome, CoreError> {
        self.cancelled.lock().unwrap().push(order_id.to_string());
        Ok(CancelOutcome::Cancelled)
    }

    async fn list_open_orders(&self, _symbol: &str) -> std::result::Result<Vec<OpenOrder>, CoreError> {
        Ok(Vec::new())
    }
}

fn venue_position(symbol: &str, mark: f64) -> VenuePosition {
    VenuePosition {
        symbol: symbol.to_string(),
        side: PositionSide::Long,
        quantity: 1.0,
        entry_price: 100.0,
        mark_price: mark,
        unrealized_pnl: mark - 100.0,
    }
}

#[tokio::test]
async fn test_position_lifecycle_against_venue() {
    let repo = Arc::new(InMemoryPositionRepository::new());
    let venue = Arc::new(ScriptedVenue::default());
    let performance = Arc::new(LogPerformanceConsumer::new());

    let mut winner = Position::open(
        "BTCUSDT",
        PositionSide::Long,
        100.0,
        1.0,
        Some(95.0),
        Some(110.0),
        "ai_augmented",
        Utc::now(),
    );
    winner.stop_order_ids = vec!["sl-1".to_string()];
    winner.target_order_ids = vec!["tp-1".to_string()];
    let vanished = Position::open(
        "SOLUSDT",
        PositionSide::Long,
        100.0,
        2.0,
        Some(90.0),
        Some(120.0),
        "technical",
        Utc::now(),
    );
    repo.insert(&winner).await.unwrap();
    repo.insert(&vanished).await.unwrap();

    let monitor = PositionMonitor::new(
        repo.clone(),
        venue.clone(),
        OrderCleanupService::new(venue.clone()),
        performance.clone(),
    );

    // Cycle 1: price below target, the other position is gone from the venue
    venue
        .positions
        .lock()
        .unwrap()
        .insert("BTCUSDT".to_string(), venue_position("BTCUSDT", 104.0));

    let report = monitor.run_cycle().await;
    assert_eq!(report.checked, 2);
    assert_eq!(report.updated, 1);
    assert_eq!(report.manual_closes, 1);

    let open = repo.get(winner.id).await.unwrap().unwrap();
    assert_eq!(open.status, PositionStatus::Open);
    assert_eq!(open.unrealized_pnl, 4.0);

    let manual = repo.get(vanished.id).await.unwrap().unwrap();
    assert_eq!(manual.close_reason, Some(CloseReason::Manual));
    assert_eq!(manual.exit_price, Some(99.5));

    // Cycle 2: target reached
    venue
        .positions
        .lock()
        .unwrap()
        .insert("BTCUSDT".to_string(), venue_position("BTCUSDT", 110.0));

    let report = monitor.run_cycle().await;
    assert_eq!(report.checked, 1);
    assert_eq!(report.tp_hits, 1);
    assert_eq!(report.cleanup_failures, 0);

    let closed = repo.get(winner.id).await.unwrap().unwrap();
    assert_eq!(closed.status, PositionStatus::Closed);
    assert_eq!(closed.close_reason, Some(CloseReason::TpHit));
    assert_eq!(closed.realized_pnl, Some(10.0));

    let mut cancelled = venue.cancelled.lock().unwrap().clone();
    cancelled.sort();
    assert_eq!(cancelled, vec!["sl-1".to_string(), "tp-1".to_string()]);

    // Cycle 3: nothing left to watch
    assert_eq!(monitor.run_cycle().await.checked, 0);

    let summary = performance.summary();
    assert_eq!(summary.trades, 2);
    assert_eq!(summary.wins, 1);
    assert_eq!(summary.losses, 1);
}
