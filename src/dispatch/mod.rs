// Outbound delivery: signal sinks behind a queue, performance consumers on close
pub mod performance;
pub mod webhook;

use async_trait::async_trait;
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::models::Signal;

pub use performance::{LogPerformanceConsumer, PerformanceConsumer, PerformanceSummary};
pub use webhook::WebhookSignalSink;

/// Outcome of delivering one signal to one destination
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeliveryResult {
    pub destination: String,
    pub success: bool,
    pub error: Option<String>,
}

impl DeliveryResult {
    pub fn ok(destination: &str) -> Self {
        Self {
            destination: destination.to_string(),
            success: true,
            error: None,
        }
    }

    pub fn failed(destination: &str, error: impl Into<String>) -> Self {
        Self {
            destination: destination.to_string(),
            success: false,
            error: Some(error.into()),
        }
    }
}

/// Consumer of produced signals (notifications, webhooks, order placement, ...)
#[async_trait]
pub trait SignalSink: Send + Sync {
    fn name(&self) -> &str;

    async fn deliver(&self, signal: &Signal) -> Vec<DeliveryResult>;
}

/// Writes every signal to the log
pub struct LogSignalSink;

#[async_trait]
impl SignalSink for LogSignalSink {
    fn name(&self) -> &str {
        "log"
    }

    async fn deliver(&self, signal: &Signal) -> Vec<DeliveryResult> {
        tracing::info!(
            symbol = %signal.symbol,
            action = %signal.action,
            confidence = signal.confidence,
            strategy = %signal.strategy,
            source = ?signal.source,
            "📣 {}",
            signal.reasoning
        );
        vec![DeliveryResult::ok("log")]
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchStats {
    pub signals: usize,
    pub delivered: usize,
    pub failed: usize,
}

/// Fire-and-forget handoff from analysis to sinks
///
/// `dispatch` only enqueues; a background task owns delivery. A full queue drops the
/// signal with a warning rather than stalling the analysis path.
#[derive(Clone)]
pub struct SignalDispatcher {
    tx: mpsc::Sender<Signal>,
}

impl SignalDispatcher {
    /// Spawn the delivery task. It exits once every dispatcher clone is dropped.
    pub fn spawn(sinks: Vec<Arc<dyn SignalSink>>, capacity: usize) -> (Self, JoinHandle<DispatchStats>) {
        let (tx, mut rx) = mpsc::channel::<Signal>(capacity.max(1));

        let handle = tokio::spawn(async move {
            let mut stats = DispatchStats::default();

            while let Some(signal) = rx.recv().await {
                stats.signals += 1;
                for sink in &sinks {
                    for result in sink.deliver(&signal).await {
                        if result.success {
                            stats.delivered += 1;
                        } else {
                            stats.failed += 1;
                            tracing::warn!(
                                sink = %sink.name(),
                                destination = %result.destination,
                                symbol = %signal.symbol,
                                error = result.error.as_deref().unwrap_or("unknown"),
                                "Signal delivery failed"
                            );
                        }
                    }
                }
            }

            tracing::debug!(?stats, "Signal dispatcher stopped");
            stats
        });

        (Self { tx }, handle)
    }

    /// Enqueue without waiting. Returns false if the signal was dropped.
    pub fn dispatch(&self, signal: Signal) -> bool {
        match self.tx.try_send(signal) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(signal)) => {
                tracing::warn!(symbol = %signal.symbol, "Signal queue full, dropping signal");
                false
            }
            Err(mpsc::error::TrySendError::Closed(signal)) => {
                tracing::warn!(symbol = %signal.symbol, "Signal dispatcher closed, dropping signal");
                false
            }
        }
    }
}
