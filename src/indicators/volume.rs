/// Volume confirmation
use crate::models::Candle;

/// Average volume of the `period` candles before the last one
pub fn calculate_average_volume(candles: &[Candle], period: usize) -> Option<f64> {
    if period == 0 || candles.len() < period + 1 {
        return None;
    }

    let window = &candles[candles.len() - period - 1..candles.len() - 1];
    Some(window.iter().map(|c| c.volume).sum::<f64>() / period as f64)
}

/// Last volume relative to the preceding average (1.0 = normal)
///
/// Returns None when the average is zero, which happens with price-only data sources.
pub fn calculate_volume_ratio(candles: &[Candle], period: usize) -> Option<f64> {
    let average = calculate_average_volume(candles, period)?;
    if average <= 0.0 {
        return None;
    }
    Some(candles.last()?.volume / average)
}
