// Execution venue interface: position truth, prices and conditional orders
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::CoreError;
use crate::models::PositionSide;

/// Position as reported by the venue
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct VenuePosition {
    pub symbol: String,
    pub side: PositionSide,
    pub quantity: f64,
    pub entry_price: f64,
    pub mark_price: f64,
    pub unrealized_pnl: f64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderType {
    Limit,
    Market,
    Stop,
    StopMarket,
    TakeProfit,
    TakeProfitMarket,
    TrailingStopMarket,
    Other(String),
}

impl OrderType {
    pub fn parse(raw: &str) -> Self {
        match raw {
            "LIMIT" => OrderType::Limit,
            "MARKET" => OrderType::Market,
            "STOP" => OrderType::Stop,
            "STOP_MARKET" => OrderType::StopMarket,
            "TAKE_PROFIT" => OrderType::TakeProfit,
            "TAKE_PROFIT_MARKET" => OrderType::TakeProfitMarket,
            "TRAILING_STOP_MARKET" => OrderType::TrailingStopMarket,
            other => OrderType::Other(other.to_string()),
        }
    }

    /// Stop-loss and take-profit style orders that only make sense while a position is open
    pub fn is_conditional_exit(&self) -> bool {
        matches!(
            self,
            OrderType::Stop
                | OrderType::StopMarket
                | OrderType::TakeProfit
                | OrderType::TakeProfitMarket
                | OrderType::TrailingStopMarket
        )
    }
}

impl fmt::Display for OrderType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            OrderType::Limit => "LIMIT",
            OrderType::Market => "MARKET",
            OrderType::Stop => "STOP",
            OrderType::StopMarket => "STOP_MARKET",
            OrderType::TakeProfit => "TAKE_PROFIT",
            OrderType::TakeProfitMarket => "TAKE_PROFIT_MARKET",
            OrderType::TrailingStopMarket => "TRAILING_STOP_MARKET",
            OrderType::Other(raw) => raw.as_str(),
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OpenOrder {
    pub order_id: String,
    pub symbol: String,
    pub order_type: OrderType,
    pub stop_price: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelOutcome {
    Cancelled,
    /// Already filled, cancelled or expired on the venue
    NotFound,
}

/// Exchange account the monitor reconciles against
///
/// `get_position` returns `Ok(None)` when the venue has no position for the symbol.
/// Connectivity problems surface as `CoreError::VenueUnreachable`.
#[async_trait]
pub trait ExecutionVenue: Send + Sync {
    async fn get_position(&self, symbol: &str) -> Result<Option<VenuePosition>, CoreError>;

    async fn get_mark_price(&self, symbol: &str) -> Result<f64, CoreError>;

    /// Price of the most recent fill on the symbol, if any
    async fn last_fill_price(&self, symbol: &str) -> Result<Option<f64>, CoreError>;

    async fn cancel_order(&self, symbol: &str, order_id: &str) -> Result<CancelOutcome, CoreError>;

    async fn list_open_orders(&self, symbol: &str) -> Result<Vec<OpenOrder>, CoreError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_conditional_exit_types() {
        for raw in [
            "STOP",
            "STOP_MARKET",
            "TAKE_PROFIT",
            "TAKE_PROFIT_MARKET",
            "TRAILING_STOP_MARKET",
        ] {
            let order_type = OrderType::parse(raw);
            assert!(order_type.is_conditional_exit(), "{} should be conditional", raw);
            assert_eq!(order_type.to_string(), raw);
        }

        assert!(!OrderType::parse("LIMIT").is_conditional_exit());
        assert!(!OrderType::parse("MARKET").is_conditional_exit());
        assert_eq!(
            OrderType::parse("LIQUIDATION"),
            OrderType::Other("LIQUIDATION".to_string())
        );
    }
}
