use chrono::Utc;
use futures::future::join_all;
use std::sync::Arc;

use super::{AnalysisContext, SignalProducer};
use crate::dispatch::SignalDispatcher;
use crate::market_data::MarketDataFetcher;
use crate::models::Signal;

/// One producer bound to one symbol
#[derive(Clone)]
pub struct StrategyInstance {
    pub symbol: String,
    pub producer: Arc<dyn SignalProducer>,
}

/// Fetch -> indicators -> producer -> dispatch, for every strategy instance
pub struct SignalPipeline {
    fetcher: Arc<MarketDataFetcher>,
    dispatcher: Option<SignalDispatcher>,
}

impl SignalPipeline {
    pub fn new(fetcher: Arc<MarketDataFetcher>) -> Self {
        Self {
            fetcher,
            dispatcher: None,
        }
    }

    pub fn with_dispatcher(mut self, dispatcher: SignalDispatcher) -> Self {
        self.dispatcher = Some(dispatcher);
        self
    }

    pub async fn run_instance(&self, instance: &StrategyInstance) -> Signal {
        let producer = &instance.producer;
        let symbol = instance.symbol.as_str();

        let data = self
            .fetcher
            .fetch_many(symbol, producer.timeframes(), producer.min_candles())
            .await;

        for (timeframe, warning) in &data.warnings {
            tracing::warn!(%symbol, %timeframe, strategy = %producer.name(), "{}", warning);
        }

        let ctx = AnalysisContext::new(symbol, data, Utc::now());
        let signal = producer.produce_signal(&ctx).await;

        tracing::info!(
            %symbol,
            strategy = %producer.name(),
            action = %signal.action,
            confidence = signal.confidence,
            source = ?signal.source,
            "📊 Signal"
        );

        if let Some(dispatcher) = &self.dispatcher {
            dispatcher.dispatch(signal.clone());
        }

        signal
    }

    /// Run every instance concurrently; one slow or failing instance never blocks the rest
    pub async fn run_all(&self, instances: &[StrategyInstance]) -> Vec<Signal> {
        join_all(instances.iter().map(|instance| self.run_instance(instance))).await
    }
}
