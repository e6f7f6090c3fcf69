/// Momentum indicators: RSI and MACD
///
/// RSI values:
/// - RSI > 70: Overbought
/// - RSI < 30: Oversold
use super::trend::calculate_ema_series;

/// Relative Strength Index with Wilder's smoothing
///
/// Returns None when there are fewer than `period + 1` prices.
pub fn calculate_rsi(prices: &[f64], period: usize) -> Option<f64> {
    if period == 0 || prices.len() < period + 1 {
        return None;
    }

    let changes: Vec<f64> = prices.windows(2).map(|w| w[1] - w[0]).collect();

    let mut avg_gain = changes[..period].iter().filter(|c| **c > 0.0).sum::<f64>() / period as f64;
    let mut avg_loss =
        changes[..period].iter().filter(|c| **c < 0.0).map(|c| c.abs()).sum::<f64>() / period as f64;

    for change in &changes[period..] {
        let gain = change.max(0.0);
        let loss = (-change).max(0.0);
        avg_gain = (avg_gain * (period as f64 - 1.0) + gain) / period as f64;
        avg_loss = (avg_loss * (period as f64 - 1.0) + loss) / period as f64;
    }

    if avg_loss == 0.0 {
        // Flat series is neutral, all-gain series is maximally overbought
        return Some(if avg_gain == 0.0 { 50.0 } else { 100.0 });
    }

    let rs = avg_gain / avg_loss;
    Some(100.0 - (100.0 / (1.0 + rs)))
}

/// MACD line, signal line and histogram
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Macd {
    pub line: f64,
    pub signal: f64,
    pub histogram: f64,
}

/// MACD(fast, slow, signal) on closing prices
///
/// Needs `slow + signal - 1` prices so the signal EMA has a full seed window.
pub fn calculate_macd(prices: &[f64], fast: usize, slow: usize, signal: usize) -> Option<Macd> {
    if fast == 0 || signal == 0 || fast >= slow || prices.len() < slow + signal - 1 {
        return None;
    }

    let fast_series = calculate_ema_series(prices, fast);
    let slow_series = calculate_ema_series(prices, slow);

    // Both series end at the last price; align on the shorter (slow) one
    let offset = fast_series.len() - slow_series.len();
    let macd_series: Vec<f64> = slow_series
        .iter()
        .enumerate()
        .map(|(i, slow_ema)| fast_series[i + offset] - slow_ema)
        .collect();

    let signal_series = calculate_ema_series(&macd_series, signal);
    let line = *macd_series.last()?;
    let signal_value = *signal_series.last()?;

    Some(Macd {
        line,
        signal: signal_value,
        histogram: line - signal_value,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rsi_range() {
        let prices = vec![
            44.0, 44.25, 44.5, 43.75, 44.0, 44.5, 45.0, 45.5, 45.25, 45.5, 46.0, 46.5, 46.25,
            46.0, 46.5,
        ];

        let rsi = calculate_rsi(&prices, 14).unwrap();
        assert!(rsi > 50.0 && rsi < 100.0);
    }

    #[test]
    fn test_rsi_insufficient_data() {
        let prices = vec![100.0, 102.0, 101.0];
        assert!(calculate_rsi(&prices, 14).is_none());
    }

    #[test]
    fn test_rsi_extremes() {
        let rising: Vec<f64> = (0..20).map(|i| 100.0 + i as f64).collect();
        assert_eq!(calculate_rsi(&rising, 14), Some(100.0));

        let flat = vec![100.0; 20];
        assert_eq!(calculate_rsi(&flat, 14), Some(50.0));

        let falling: Vec<f64> = (0..20).map(|i| 100.0 - i as f64).collect();
        assert_eq!(calculate_rsi(&falling, 14), Some(0.0));
    }

    #[test]
    fn test_macd_uptrend_positive() {
        let prices: Vec<f64> = (0..60).map(|i| 100.0 + i as f64 * 0.5).collect();
        let macd = calculate_macd(&prices, 12, 26, 9).unwrap();
        assert!(macd.line > 0.0);
    }

    #[test]
    fn test_macd_insufficient_data() {
        let prices: Vec<f64> = (0..30).map(|i| i as f64).collect();
        assert!(calculate_macd(&prices, 12, 26, 9).is_none());
    }
}
