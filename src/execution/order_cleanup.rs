use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;

use crate::error::CoreError;
use crate::models::Position;
use crate::venue::{CancelOutcome, ExecutionVenue};

const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(10);

/// How orders to cancel are discovered
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CleanupMode {
    /// Cancel the ids recorded on the position; lists open orders when none were recorded
    #[default]
    RecordedIds,
    /// Always list open orders and cancel every conditional exit order on the symbol
    ListAndMatch,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CleanupReport {
    pub cancelled_count: usize,
    pub not_found_count: usize,
    pub failed_count: usize,
    pub success: bool,
}

/// Cancels the stop-loss and take-profit orders left behind by a closed position
pub struct OrderCleanupService {
    venue: Arc<dyn ExecutionVenue>,
    mode: CleanupMode,
    call_timeout: Duration,
}

impl OrderCleanupService {
    pub fn new(venue: Arc<dyn ExecutionVenue>) -> Self {
        Self {
            venue,
            mode: CleanupMode::default(),
            call_timeout: DEFAULT_CALL_TIMEOUT,
        }
    }

    pub fn with_mode(mut self, mode: CleanupMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_call_timeout(mut self, call_timeout: Duration) -> Self {
        self.call_timeout = call_timeout;
        self
    }

    /// Never fails; problems are counted in the report
    pub async fn cleanup(&self, position: &Position) -> CleanupReport {
        let mut report = CleanupReport::default();
        let symbol = position.symbol.as_str();

        let order_ids = if self.mode == CleanupMode::RecordedIds && position.has_recorded_orders() {
            position
                .stop_order_ids
                .iter()
                .chain(position.target_order_ids.iter())
                .cloned()
                .collect()
        } else {
            match self.conditional_orders(symbol).await {
                Ok(ids) => ids,
                Err(e) => {
                    tracing::warn!(
                        position_id = %position.id,
                        symbol = %symbol,
                        error = %e,
                        "Failed to list open orders for cleanup"
                    );
                    report.failed_count += 1;
                    Vec::new()
                }
            }
        };

        for order_id in &order_ids {
            let outcome = match timeout(self.call_timeout, self.venue.cancel_order(symbol, order_id)).await {
                Ok(result) => result,
                Err(_) => Err(CoreError::VenueUnreachable(format!(
                    "cancel_order timed out after {:?}",
                    self.call_timeout
                ))),
            };

            match outcome {
                Ok(CancelOutcome::Cancelled) => report.cancelled_count += 1,
                Ok(CancelOutcome::NotFound) | Err(CoreError::OrderNotFound { .. }) => {
                    report.not_found_count += 1
                }
                Err(e) => {
                    tracing::warn!(
                        position_id = %position.id,
                        symbol = %symbol,
                        order_id = %order_id,
                        error = %e,
                        "Failed to cancel order"
                    );
                    report.failed_count += 1;
                }
            }
        }

        report.success = report.failed_count == 0;

        tracing::info!(
            position_id = %position.id,
            symbol = %symbol,
            cancelled = report.cancelled_count,
            not_found = report.not_found_count,
            failed = report.failed_count,
            "Order cleanup finished"
        );

        report
    }

    async fn conditional_orders(&self, symbol: &str) -> Result<Vec<String>, CoreError> {
        let orders = match timeout(self.call_timeout, self.venue.list_open_orders(symbol)).await {
            Ok(result) => result?,
            Err(_) => {
                return Err(CoreError::VenueUnreachable(format!(
                    "list_open_orders timed out after {:?}",
                    self.call_timeout
                )))
            }
        };

        Ok(orders
            .into_iter()
            .filter(|o| o.order_type.is_conditional_exit())
            .map(|o| o.order_id)
            .collect())
    }
}
