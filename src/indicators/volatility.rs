/// Volatility indicators: Average True Range and Bollinger Bands
///
/// True Range is the greatest of:
/// - Current High - Current Low
/// - Abs(Current High - Previous Close)
/// - Abs(Current Low - Previous Close)
use super::trend::calculate_sma;
use crate::models::Candle;

fn true_ranges(candles: &[Candle]) -> Vec<f64> {
    candles
        .windows(2)
        .map(|pair| {
            let (prev, curr) = (&pair[0], &pair[1]);
            (curr.high - curr.low)
                .max((curr.high - prev.close).abs())
                .max((curr.low - prev.close).abs())
        })
        .collect()
}

/// Current ATR with Wilder's smoothing, or None if insufficient data
pub fn calculate_atr(candles: &[Candle], period: usize) -> Option<f64> {
    if period == 0 || candles.len() < period + 1 {
        return None;
    }

    let ranges = true_ranges(candles);

    // First ATR is a simple average, then Wilder's smoothing
    let mut atr = ranges[..period].iter().sum::<f64>() / period as f64;
    for tr in &ranges[period..] {
        atr = (atr * (period as f64 - 1.0) + tr) / period as f64;
    }

    Some(atr)
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BollingerBands {
    pub upper: f64,
    pub middle: f64,
    pub lower: f64,
    /// Position of the last price within the bands (0 = lower, 1 = upper)
    pub percent_b: f64,
}

/// Bollinger Bands(period, k) using population standard deviation
pub fn calculate_bollinger(prices: &[f64], period: usize, k: f64) -> Option<BollingerBands> {
    let middle = calculate_sma(prices, period)?;
    let window = &prices[prices.len() - period..];

    let variance = window.iter().map(|p| (p - middle).powi(2)).sum::<f64>() / period as f64;
    let std_dev = variance.sqrt();

    let upper = middle + k * std_dev;
    let lower = middle - k * std_dev;
    let last = *prices.last()?;

    let width = upper - lower;
    let percent_b = if width > 0.0 {
        (last - lower) / width
    } else {
        0.5
    };

    Some(BollingerBands {
        upper,
        middle,
        lower,
        percent_b,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn candles_from(ohlc: &[(f64, f64, f64, f64)]) -> Vec<Candle> {
        ohlc.iter()
            .enumerate()
            .map(|(i, &(open, high, low, close))| Candle {
                timestamp: Utc::now() + chrono::Duration::hours(i as i64),
                open,
                high,
                low,
                close,
                volume: 1000.0,
            })
            .collect()
    }

    #[test]
    fn test_atr_constant_range() {
        let candles = candles_from(&[(100.0, 101.0, 99.0, 100.0); 20]);
        let atr = calculate_atr(&candles, 14).unwrap();
        assert!((atr - 2.0).abs() < 1e-9);
    }

    #[test]
    fn test_atr_high_volatility_larger() {
        let calm = candles_from(&[(100.0, 101.0, 99.0, 100.0); 20]);
        let wild = candles_from(&[(100.0, 110.0, 90.0, 100.0); 20]);
        assert!(calculate_atr(&wild, 14).unwrap() > calculate_atr(&calm, 14).unwrap());
    }

    #[test]
    fn test_atr_insufficient_data() {
        let candles = candles_from(&[(100.0, 101.0, 99.0, 100.0); 5]);
        assert!(calculate_atr(&candles, 14).is_none());
    }

    #[test]
    fn test_bollinger_flat_prices() {
        let prices = vec![100.0; 20];
        let bands = calculate_bollinger(&prices, 20, 2.0).unwrap();
        assert_eq!(bands.upper, 100.0);
        assert_eq!(bands.lower, 100.0);
        assert_eq!(bands.percent_b, 0.5);
    }

    #[test]
    fn test_bollinger_breakout_above_upper() {
        let mut prices: Vec<f64> = (0..19).map(|i| 100.0 + (i % 2) as f64).collect();
        prices.push(110.0);
        let bands = calculate_bollinger(&prices, 20, 2.0).unwrap();
        assert!(bands.percent_b > 1.0);
    }
}
