use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::{
    calculate_adx, calculate_atr, calculate_bollinger, calculate_ema, calculate_macd,
    calculate_rsi, calculate_sma, calculate_volume_ratio,
};
use crate::models::Candle;

pub const RSI_PERIOD: usize = 14;
pub const MACD_FAST: usize = 12;
pub const MACD_SLOW: usize = 26;
pub const MACD_SIGNAL: usize = 9;
pub const EMA_FAST: usize = 9;
pub const EMA_SLOW: usize = 21;
pub const SMA_PERIOD: usize = 20;
pub const ADX_PERIOD: usize = 14;
pub const ATR_PERIOD: usize = 14;
pub const BOLLINGER_PERIOD: usize = 20;
pub const BOLLINGER_K: f64 = 2.0;
pub const VOLUME_PERIOD: usize = 20;

/// Indicator values at the last candle of a series
///
/// Every field holds a neutral sentinel when the series is too short for that
/// indicator, so scoring degrades instead of failing.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct IndicatorSnapshot {
    pub candle_count: usize,
    pub close: f64,
    pub rsi: f64,
    pub macd: f64,
    pub macd_signal: f64,
    pub macd_histogram: f64,
    pub ema_fast: f64,
    pub ema_slow: f64,
    pub sma: f64,
    pub adx: f64,
    pub plus_di: f64,
    pub minus_di: f64,
    pub atr: f64,
    pub bollinger_upper: f64,
    pub bollinger_middle: f64,
    pub bollinger_lower: f64,
    pub bollinger_percent_b: f64,
    pub volume_ratio: f64,
}

impl IndicatorSnapshot {
    /// All-neutral snapshot around a reference price
    pub fn neutral(close: f64) -> Self {
        Self {
            candle_count: 0,
            close,
            rsi: 50.0,
            macd: 0.0,
            macd_signal: 0.0,
            macd_histogram: 0.0,
            ema_fast: close,
            ema_slow: close,
            sma: close,
            adx: 0.0,
            plus_di: 0.0,
            minus_di: 0.0,
            atr: 0.0,
            bollinger_upper: close,
            bollinger_middle: close,
            bollinger_lower: close,
            bollinger_percent_b: 0.5,
            volume_ratio: 1.0,
        }
    }

    /// Name -> value view, used for prompts and structured logs
    pub fn to_map(&self) -> BTreeMap<&'static str, f64> {
        BTreeMap::from([
            ("candle_count", self.candle_count as f64),
            ("close", self.close),
            ("rsi", self.rsi),
            ("macd", self.macd),
            ("macd_signal", self.macd_signal),
            ("macd_histogram", self.macd_histogram),
            ("ema_fast", self.ema_fast),
            ("ema_slow", self.ema_slow),
            ("sma", self.sma),
            ("adx", self.adx),
            ("plus_di", self.plus_di),
            ("minus_di", self.minus_di),
            ("atr", self.atr),
            ("bollinger_upper", self.bollinger_upper),
            ("bollinger_middle", self.bollinger_middle),
            ("bollinger_lower", self.bollinger_lower),
            ("bollinger_percent_b", self.bollinger_percent_b),
            ("volume_ratio", self.volume_ratio),
        ])
    }
}

/// Compute the full indicator snapshot for a candle series (oldest first)
pub fn compute(candles: &[Candle]) -> IndicatorSnapshot {
    let Some(last) = candles.last() else {
        return IndicatorSnapshot::neutral(0.0);
    };

    let closes: Vec<f64> = candles.iter().map(|c| c.close).collect();
    let mut snapshot = IndicatorSnapshot::neutral(last.close);
    snapshot.candle_count = candles.len();

    if let Some(rsi) = calculate_rsi(&closes, RSI_PERIOD) {
        snapshot.rsi = rsi;
    }

    if let Some(macd) = calculate_macd(&closes, MACD_FAST, MACD_SLOW, MACD_SIGNAL) {
        snapshot.macd = macd.line;
        snapshot.macd_signal = macd.signal;
        snapshot.macd_histogram = macd.histogram;
    }

    // Fast/slow EMAs only count as a pair, otherwise the spread is meaningless
    if let (Some(fast), Some(slow)) = (
        calculate_ema(&closes, EMA_FAST),
        calculate_ema(&closes, EMA_SLOW),
    ) {
        snapshot.ema_fast = fast;
        snapshot.ema_slow = slow;
    }

    if let Some(sma) = calculate_sma(&closes, SMA_PERIOD) {
        snapshot.sma = sma;
    }

    if let Some(adx) = calculate_adx(candles, ADX_PERIOD) {
        snapshot.adx = adx.adx;
        snapshot.plus_di = adx.plus_di;
        snapshot.minus_di = adx.minus_di;
    }

    if let Some(atr) = calculate_atr(candles, ATR_PERIOD) {
        snapshot.atr = atr;
    }

    if let Some(bands) = calculate_bollinger(&closes, BOLLINGER_PERIOD, BOLLINGER_K) {
        snapshot.bollinger_upper = bands.upper;
        snapshot.bollinger_middle = bands.middle;
        snapshot.bollinger_lower = bands.lower;
        snapshot.bollinger_percent_b = bands.percent_b;
    }

    if let Some(ratio) = calculate_volume_ratio(candles, VOLUME_PERIOD) {
        snapshot.volume_ratio = ratio;
    }

    snapshot
}
