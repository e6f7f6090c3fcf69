use async_trait::async_trait;
use serde::Serialize;
use std::sync::Mutex;

use crate::error::CoreError;
use crate::models::Position;

/// Notified once per real OPEN -> CLOSED transition; failures are only logged
#[async_trait]
pub trait PerformanceConsumer: Send + Sync {
    async fn on_position_closed(&self, position: &Position) -> Result<(), CoreError>;
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PerformanceSummary {
    pub trades: usize,
    pub wins: usize,
    pub losses: usize,
    pub total_pnl: f64,
}

impl PerformanceSummary {
    pub fn win_rate(&self) -> f64 {
        if self.trades == 0 {
            0.0
        } else {
            self.wins as f64 / self.trades as f64 * 100.0
        }
    }
}

/// Logs each closed trade and keeps running totals for the process
#[derive(Default)]
pub struct LogPerformanceConsumer {
    summary: Mutex<PerformanceSummary>,
}

impl LogPerformanceConsumer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn summary(&self) -> PerformanceSummary {
        self.summary
            .lock()
            .map(|s| s.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl PerformanceConsumer for LogPerformanceConsumer {
    async fn on_position_closed(&self, position: &Position) -> Result<(), CoreError> {
        let pnl = position.realized_pnl.ok_or_else(|| {
            CoreError::InvalidTransition(format!("position {} has no realized P&L", position.id))
        })?;

        let summary = {
            let mut summary = self
                .summary
                .lock()
                .map_err(|_| CoreError::Persistence("performance summary poisoned".to_string()))?;
            summary.trades += 1;
            if pnl > 0.0 {
                summary.wins += 1;
            } else {
                summary.losses += 1;
            }
            summary.total_pnl += pnl;
            summary.clone()
        };

        let emoji = if pnl > 0.0 { "💰" } else { "📉" };
        tracing::info!(
            position_id = %position.id,
            symbol = %position.symbol,
            strategy = %position.strategy,
            reason = position.close_reason.map(|r| r.as_str()).unwrap_or("UNKNOWN"),
            realized_pnl = pnl,
            duration_secs = position.duration_secs,
            risk_reward = position.risk_reward,
            "{} Position closed | {} trades, win rate {:.1}%, total P&L {:.4}",
            emoji,
            summary.trades,
            summary.win_rate(),
            summary.total_pnl
        );

        Ok(())
    }
}
