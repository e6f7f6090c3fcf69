/// Trend indicators: moving averages and ADX
///
/// ADX ranges from 0 to 100:
/// - ADX > 25: Strong trend (bull or bear)
/// - ADX < 20: Weak trend / ranging market
///
/// +DI > -DI means the trend points up, -DI > +DI means down.
use crate::models::Candle;

/// Simple Moving Average of the last `period` prices
pub fn calculate_sma(prices: &[f64], period: usize) -> Option<f64> {
    if period == 0 || prices.len() < period {
        return None;
    }

    let sum: f64 = prices.iter().rev().take(period).sum();
    Some(sum / period as f64)
}

/// EMA values seeded with the SMA of the first `period` prices
///
/// The series has `prices.len() - period + 1` entries, the last one aligned with the
/// last price. Empty when there is not enough data.
pub fn calculate_ema_series(prices: &[f64], period: usize) -> Vec<f64> {
    if period == 0 || prices.len() < period {
        return Vec::new();
    }

    let multiplier = 2.0 / (period as f64 + 1.0);
    let seed = prices[..period].iter().sum::<f64>() / period as f64;

    let mut series = Vec::with_capacity(prices.len() - period + 1);
    series.push(seed);

    let mut ema = seed;
    for price in &prices[period..] {
        ema = (price - ema) * multiplier + ema;
        series.push(ema);
    }

    series
}

/// Exponential Moving Average (latest value)
pub fn calculate_ema(prices: &[f64], period: usize) -> Option<f64> {
    calculate_ema_series(prices, period).last().copied()
}

/// ADX with its directional indicators
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Adx {
    pub adx: f64,
    pub plus_di: f64,
    pub minus_di: f64,
}

/// Average Directional Index using Wilder's smoothing
///
/// Needs `2 * period + 1` candles: one period to seed the DI values and another to
/// seed the ADX average.
pub fn calculate_adx(candles: &[Candle], period: usize) -> Option<Adx> {
    if period == 0 || candles.len() < 2 * period + 1 {
        return None;
    }

    let mut true_ranges = Vec::with_capacity(candles.len() - 1);
    let mut plus_dms = Vec::with_capacity(candles.len() - 1);
    let mut minus_dms = Vec::with_capacity(candles.len() - 1);

    for pair in candles.windows(2) {
        let (prev, curr) = (&pair[0], &pair[1]);

        let tr = (curr.high - curr.low)
            .max((curr.high - prev.close).abs())
            .max((curr.low - prev.close).abs());
        true_ranges.push(tr);

        let up_move = curr.high - prev.high;
        let down_move = prev.low - curr.low;
        plus_dms.push(if up_move > down_move && up_move > 0.0 { up_move } else { 0.0 });
        minus_dms.push(if down_move > up_move && down_move > 0.0 { down_move } else { 0.0 });
    }

    let mut smoothed_tr: f64 = true_ranges[..period].iter().sum();
    let mut smoothed_plus: f64 = plus_dms[..period].iter().sum();
    let mut smoothed_minus: f64 = minus_dms[..period].iter().sum();

    let di = |plus: f64, minus: f64, tr: f64| -> (f64, f64) {
        if tr == 0.0 {
            (0.0, 0.0)
        } else {
            (100.0 * plus / tr, 100.0 * minus / tr)
        }
    };
    let dx = |plus_di: f64, minus_di: f64| -> f64 {
        let sum = plus_di + minus_di;
        if sum == 0.0 {
            0.0
        } else {
            100.0 * (plus_di - minus_di).abs() / sum
        }
    };

    let (mut plus_di, mut minus_di) = di(smoothed_plus, smoothed_minus, smoothed_tr);
    let mut dx_values = vec![dx(plus_di, minus_di)];

    for i in period..true_ranges.len() {
        smoothed_tr = smoothed_tr - smoothed_tr / period as f64 + true_ranges[i];
        smoothed_plus = smoothed_plus - smoothed_plus / period as f64 + plus_dms[i];
        smoothed_minus = smoothed_minus - smoothed_minus / period as f64 + minus_dms[i];

        let (p, m) = di(smoothed_plus, smoothed_minus, smoothed_tr);
        plus_di = p;
        minus_di = m;
        dx_values.push(dx(plus_di, minus_di));
    }

    if dx_values.len() < period {
        return None;
    }

    let mut adx = dx_values[..period].iter().sum::<f64>() / period as f64;
    for value in &dx_values[period..] {
        adx = (adx * (period as f64 - 1.0) + value) / period as f64;
    }

    Some(Adx {
        adx,
        plus_di,
        minus_di,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn trending_candles(count: usize, step: f64) -> Vec<Candle> {
        (0..count)
            .map(|i| {
                let base = 100.0 + i as f64 * step;
                Candle {
                    timestamp: Utc::now() + chrono::Duration::hours(i as i64),
                    open: base,
                    high: base + 1.0,
                    low: base - 1.0,
                    close: base + step / 2.0,
                    volume: 1000.0,
                }
            })
            .collect()
    }

    #[test]
    fn test_sma() {
        let prices = vec![100.0, 102.0, 104.0, 106.0, 108.0];
        assert_eq!(calculate_sma(&prices, 5), Some(104.0));
        assert_eq!(calculate_sma(&prices, 2), Some(107.0));
        assert!(calculate_sma(&prices, 6).is_none());
    }

    #[test]
    fn test_ema_series_alignment() {
        let prices = vec![100.0, 102.0, 104.0, 106.0, 108.0, 110.0];
        let series = calculate_ema_series(&prices, 5);
        assert_eq!(series.len(), 2);
        assert_eq!(series[0], 104.0);
        assert!(series[1] > 104.0);
        assert_eq!(calculate_ema(&prices, 5), Some(series[1]));
    }

    #[test]
    fn test_adx_uptrend_direction() {
        let candles = trending_candles(60, 2.0);
        let adx = calculate_adx(&candles, 14).unwrap();
        assert!(adx.plus_di > adx.minus_di);
        assert!(adx.adx > 25.0);
    }

    #[test]
    fn test_adx_downtrend_direction() {
        let candles = trending_candles(60, -2.0);
        let adx = calculate_adx(&candles, 14).unwrap();
        assert!(adx.minus_di > adx.plus_di);
    }

    #[test]
    fn test_adx_insufficient_data() {
        let candles = trending_candles(20, 1.0);
        assert!(calculate_adx(&candles, 14).is_none());
    }
}
