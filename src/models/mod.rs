use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::error::CoreError;

/// OHLCV candlestick, ordered by timestamp (open time) within a symbol/timeframe series
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Candle {
    pub timestamp: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

impl Candle {
    /// A candle is closed once its whole interval lies in the past
    pub fn is_closed(&self, timeframe: Timeframe, now: DateTime<Utc>) -> bool {
        self.timestamp + timeframe.duration() <= now
    }
}

/// Candle interval, ordered by duration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Timeframe {
    #[serde(rename = "1m")]
    M1,
    #[serde(rename = "5m")]
    M5,
    #[serde(rename = "15m")]
    M15,
    #[serde(rename = "30m")]
    M30,
    #[serde(rename = "1h")]
    H1,
    #[serde(rename = "4h")]
    H4,
    #[serde(rename = "1d")]
    D1,
}

impl Timeframe {
    pub fn as_str(&self) -> &'static str {
        match self {
            Timeframe::M1 => "1m",
            Timeframe::M5 => "5m",
            Timeframe::M15 => "15m",
            Timeframe::M30 => "30m",
            Timeframe::H1 => "1h",
            Timeframe::H4 => "4h",
            Timeframe::D1 => "1d",
        }
    }

    pub fn seconds(&self) -> i64 {
        match self {
            Timeframe::M1 => 60,
            Timeframe::M5 => 300,
            Timeframe::M15 => 900,
            Timeframe::M30 => 1_800,
            Timeframe::H1 => 3_600,
            Timeframe::H4 => 14_400,
            Timeframe::D1 => 86_400,
        }
    }

    pub fn duration(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.seconds())
    }
}

impl fmt::Display for Timeframe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Timeframe {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "1m" => Ok(Timeframe::M1),
            "5m" => Ok(Timeframe::M5),
            "15m" => Ok(Timeframe::M15),
            "30m" => Ok(Timeframe::M30),
            "1h" => Ok(Timeframe::H1),
            "4h" => Ok(Timeframe::H4),
            "1d" => Ok(Timeframe::D1),
            other => Err(CoreError::Config(format!("unknown timeframe '{}'", other))),
        }
    }
}

/// Trading action carried by a signal
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum SignalAction {
    Buy,
    Sell,
    Hold,
}

impl SignalAction {
    /// Lenient parse for provider output ("buy", "LONG", ...)
    pub fn parse_loose(s: &str) -> Option<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "BUY" | "LONG" => Some(SignalAction::Buy),
            "SELL" | "SHORT" => Some(SignalAction::Sell),
            "HOLD" | "NEUTRAL" | "WAIT" => Some(SignalAction::Hold),
            _ => None,
        }
    }
}

impl fmt::Display for SignalAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SignalAction::Buy => "BUY",
            SignalAction::Sell => "SELL",
            SignalAction::Hold => "HOLD",
        };
        f.write_str(s)
    }
}

/// Which path produced a signal
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SignalSource {
    Ai,
    Cached,
    Technical,
    Fallback,
    ErrorDefault,
}

/// Output of analysis. Confidence is always a fraction in [0, 1].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Signal {
    pub symbol: String,
    pub action: SignalAction,
    pub confidence: f64,
    pub entry_price: Option<f64>,
    pub stop_loss: Option<f64>,
    pub take_profit: Option<f64>,
    pub strategy: String,
    pub reasoning: String,
    pub source: SignalSource,
    pub generated_at: DateTime<Utc>,
}

impl Signal {
    /// HOLD signal for paths that could not analyze anything
    pub fn error_default(
        symbol: &str,
        strategy: &str,
        reason: &str,
        generated_at: DateTime<Utc>,
    ) -> Self {
        let reasoning = if reason.trim().is_empty() {
            "Error default: no analysis available".to_string()
        } else {
            format!("Error default: {}", reason)
        };

        Self {
            symbol: symbol.to_string(),
            action: SignalAction::Hold,
            confidence: 0.0,
            entry_price: None,
            stop_loss: None,
            take_profit: None,
            strategy: strategy.to_string(),
            reasoning,
            source: SignalSource::ErrorDefault,
            generated_at,
        }
    }

    pub fn with_strategy(mut self, strategy: &str) -> Self {
        self.strategy = strategy.to_string();
        self
    }
}

/// Normalize a provider confidence to a fraction; values above 1 are read as percentages
pub fn normalize_confidence(raw: f64) -> f64 {
    if !raw.is_finite() {
        return 0.0;
    }
    let fraction = if raw > 1.0 { raw / 100.0 } else { raw };
    fraction.clamp(0.0, 1.0)
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum PositionSide {
    Long,
    Short,
}

impl PositionSide {
    pub fn as_str(&self) -> &'static str {
        match self {
            PositionSide::Long => "LONG",
            PositionSide::Short => "SHORT",
        }
    }
}

impl FromStr for PositionSide {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "LONG" => Ok(PositionSide::Long),
            "SHORT" => Ok(PositionSide::Short),
            other => Err(CoreError::Persistence(format!("invalid side '{}'", other))),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum PositionStatus {
    Open,
    Closed,
    Failed,
}

impl PositionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PositionStatus::Open => "OPEN",
            PositionStatus::Closed => "CLOSED",
            PositionStatus::Failed => "FAILED",
        }
    }
}

impl FromStr for PositionStatus {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "OPEN" => Ok(PositionStatus::Open),
            "CLOSED" => Ok(PositionStatus::Closed),
            "FAILED" => Ok(PositionStatus::Failed),
            other => Err(CoreError::Persistence(format!("invalid status '{}'", other))),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CloseReason {
    TpHit,
    SlHit,
    Manual,
}

impl CloseReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            CloseReason::TpHit => "TP_HIT",
            CloseReason::SlHit => "SL_HIT",
            CloseReason::Manual => "MANUAL",
        }
    }
}

impl FromStr for CloseReason {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "TP_HIT" => Ok(CloseReason::TpHit),
            "SL_HIT" => Ok(CloseReason::SlHit),
            "MANUAL" => Ok(CloseReason::Manual),
            other => Err(CoreError::Persistence(format!(
                "invalid close reason '{}'",
                other
            ))),
        }
    }
}

/// Persisted position record; never deleted, CLOSED is terminal
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Position {
    pub id: Uuid,
    pub symbol: String,
    pub side: PositionSide,
    pub entry_price: f64,
    pub quantity: f64,
    pub stop_loss: Option<f64>,
    pub take_profit: Option<f64>,
    pub stop_order_ids: Vec<String>,
    pub target_order_ids: Vec<String>,
    pub status: PositionStatus,
    pub unrealized_pnl: f64,
    pub realized_pnl: Option<f64>,
    pub exit_price: Option<f64>,
    pub opened_at: DateTime<Utc>,
    pub closed_at: Option<DateTime<Utc>>,
    pub close_reason: Option<CloseReason>,
    pub strategy: String,
    pub duration_secs: Option<i64>,
    pub risk_reward: Option<f64>,
}

impl Position {
    /// New OPEN position for a filled entry order
    pub fn open(
        symbol: &str,
        side: PositionSide,
        entry_price: f64,
        quantity: f64,
        stop_loss: Option<f64>,
        take_profit: Option<f64>,
        strategy: &str,
        opened_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            symbol: symbol.to_string(),
            side,
            entry_price,
            quantity,
            stop_loss,
            take_profit,
            stop_order_ids: Vec::new(),
            target_order_ids: Vec::new(),
            status: PositionStatus::Open,
            unrealized_pnl: 0.0,
            realized_pnl: None,
            exit_price: None,
            opened_at,
            closed_at: None,
            close_reason: None,
            strategy: strategy.to_string(),
            duration_secs: None,
            risk_reward: None,
        }
    }

    pub fn is_open(&self) -> bool {
        self.status == PositionStatus::Open
    }

    /// Side-aware P&L if the position were valued at `price`
    pub fn pnl_at(&self, price: f64) -> f64 {
        match self.side {
            PositionSide::Long => (price - self.entry_price) * self.quantity,
            PositionSide::Short => (self.entry_price - price) * self.quantity,
        }
    }

    /// TP/SL check against a mark price. Take-profit wins when both levels are crossed.
    pub fn exit_trigger(&self, mark: f64) -> Option<CloseReason> {
        let (tp_hit, sl_hit) = match self.side {
            PositionSide::Long => (
                self.take_profit.is_some_and(|tp| mark >= tp),
                self.stop_loss.is_some_and(|sl| mark <= sl),
            ),
            PositionSide::Short => (
                self.take_profit.is_some_and(|tp| mark <= tp),
                self.stop_loss.is_some_and(|sl| mark >= sl),
            ),
        };

        if tp_hit {
            Some(CloseReason::TpHit)
        } else if sl_hit {
            Some(CloseReason::SlHit)
        } else {
            None
        }
    }

    /// Achieved reward per unit of initial risk (distance to stop-loss)
    pub fn risk_reward_at(&self, exit_price: f64) -> Option<f64> {
        let stop = self.stop_loss?;
        let risk = (self.entry_price - stop).abs();
        if risk <= f64::EPSILON || self.quantity <= 0.0 {
            return None;
        }
        Some(self.pnl_at(exit_price) / self.quantity / risk)
    }

    /// Transition OPEN -> CLOSED, filling every terminal field
    pub fn close(
        &mut self,
        exit_price: f64,
        reason: CloseReason,
        closed_at: DateTime<Utc>,
    ) -> Result<(), CoreError> {
        if self.status != PositionStatus::Open {
            return Err(CoreError::InvalidTransition(format!(
                "position {} is {}, not OPEN",
                self.id,
                self.status.as_str()
            )));
        }

        let pnl = self.pnl_at(exit_price);
        self.status = PositionStatus::Closed;
        self.exit_price = Some(exit_price);
        self.realized_pnl = Some(pnl);
        self.unrealized_pnl = 0.0;
        self.closed_at = Some(closed_at);
        self.close_reason = Some(reason);
        self.duration_secs = Some((closed_at - self.opened_at).num_seconds().max(0));
        self.risk_reward = self.risk_reward_at(exit_price);

        Ok(())
    }

    pub fn has_recorded_orders(&self) -> bool {
        !self.stop_order_ids.is_empty() || !self.target_order_ids.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn long_position() -> Position {
        Position::open(
            "BTCUSDT",
            PositionSide::Long,
            100.0,
            2.0,
            Some(95.0),
            Some(110.0),
            "test",
            Utc::now(),
        )
    }

    fn short_position() -> Position {
        Position::open(
            "BTCUSDT",
            PositionSide::Short,
            100.0,
            2.0,
            Some(105.0),
            Some(90.0),
            "test",
            Utc::now(),
        )
    }

    #[test]
    fn test_long_pnl() {
        let position = long_position();
        assert_eq!(position.pnl_at(105.0), 10.0);
        assert_eq!(position.pnl_at(95.0), -10.0);
    }

    #[test]
    fn test_short_pnl() {
        let position = short_position();
        assert_eq!(position.pnl_at(95.0), 10.0);
        assert_eq!(position.pnl_at(105.0), -10.0);
    }

    #[test]
    fn test_long_exit_triggers() {
        let position = long_position();
        assert_eq!(position.exit_trigger(111.0), Some(CloseReason::TpHit));
        assert_eq!(position.exit_trigger(110.0), Some(CloseReason::TpHit));
        assert_eq!(position.exit_trigger(94.0), Some(CloseReason::SlHit));
        assert_eq!(position.exit_trigger(105.0), None);
    }

    #[test]
    fn test_short_exit_triggers() {
        let position = short_position();
        assert_eq!(position.exit_trigger(89.0), Some(CloseReason::TpHit));
        assert_eq!(position.exit_trigger(106.0), Some(CloseReason::SlHit));
        assert_eq!(position.exit_trigger(100.0), None);
    }

    #[test]
    fn test_missing_levels_never_trigger() {
        let mut position = long_position();
        position.stop_loss = None;
        position.take_profit = None;
        assert_eq!(position.exit_trigger(1.0), None);
        assert_eq!(position.exit_trigger(1_000.0), None);
    }

    #[test]
    fn test_close_sets_terminal_fields() {
        let mut position = long_position();
        let closed_at = position.opened_at + chrono::Duration::minutes(90);

        position.close(110.0, CloseReason::TpHit, closed_at).unwrap();

        assert_eq!(position.status, PositionStatus::Closed);
        assert_eq!(position.exit_price, Some(110.0));
        assert_eq!(position.realized_pnl, Some(20.0));
        assert_eq!(position.closed_at, Some(closed_at));
        assert_eq!(position.close_reason, Some(CloseReason::TpHit));
        assert_eq!(position.duration_secs, Some(5_400));
        // 10 reward per unit over 5 risk per unit
        assert_eq!(position.risk_reward, Some(2.0));
    }

    #[test]
    fn test_cannot_close_twice() {
        let mut position = long_position();
        position.close(110.0, CloseReason::TpHit, Utc::now()).unwrap();

        let result = position.close(90.0, CloseReason::Manual, Utc::now());
        assert!(matches!(result, Err(CoreError::InvalidTransition(_))));
        assert_eq!(position.exit_price, Some(110.0));
        assert_eq!(position.close_reason, Some(CloseReason::TpHit));
    }

    #[test]
    fn test_normalize_confidence() {
        assert_eq!(normalize_confidence(0.75), 0.75);
        assert_eq!(normalize_confidence(75.0), 0.75);
        assert_eq!(normalize_confidence(-0.2), 0.0);
        assert_eq!(normalize_confidence(250.0), 1.0);
        assert_eq!(normalize_confidence(f64::NAN), 0.0);
    }

    #[test]
    fn test_timeframe_ordering_and_parse() {
        let mut frames = vec![Timeframe::H4, Timeframe::M5, Timeframe::H1];
        frames.sort();
        assert_eq!(frames, vec![Timeframe::M5, Timeframe::H1, Timeframe::H4]);
        assert_eq!("15m".parse::<Timeframe>().unwrap(), Timeframe::M15);
        assert!("2h".parse::<Timeframe>().is_err());
    }

    #[test]
    fn test_action_loose_parse() {
        assert_eq!(SignalAction::parse_loose(" buy "), Some(SignalAction::Buy));
        assert_eq!(SignalAction::parse_loose("SHORT"), Some(SignalAction::Sell));
        assert_eq!(SignalAction::parse_loose("neutral"), Some(SignalAction::Hold));
        assert_eq!(SignalAction::parse_loose("moon"), None);
    }

    #[test]
    fn test_error_default_reasoning_never_empty() {
        let signal = Signal::error_default("ETHUSDT", "tech", "", Utc::now());
        assert!(!signal.reasoning.is_empty());
        assert_eq!(signal.action, SignalAction::Hold);
        assert_eq!(signal.source, SignalSource::ErrorDefault);
    }
}
