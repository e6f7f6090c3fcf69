use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::indicators::IndicatorSnapshot;
use crate::models::{Signal, SignalAction, SignalSource, Timeframe};

pub const MOMENTUM_WEIGHT: f64 = 0.35;
pub const TREND_WEIGHT: f64 = 0.30;
pub const VOLATILITY_WEIGHT: f64 = 0.15;
pub const VOLUME_WEIGHT: f64 = 0.20;

/// Scores with a smaller magnitude than this are HOLD
pub const ACTION_THRESHOLD: f64 = 0.20;

const RSI_OVERSOLD: f64 = 30.0;
const RSI_OVERBOUGHT: f64 = 70.0;
const ADX_STRONG_TREND: f64 = 25.0;
const VOLUME_CONFIRM_RATIO: f64 = 1.5;
const VOLUME_FULL_RATIO: f64 = 3.0;
const STOP_ATR_MULTIPLE: f64 = 2.0;
const TARGET_ATR_MULTIPLE: f64 = 3.0;

/// Per-category contributions, each in [-1, 1]
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq)]
pub struct ScoreBreakdown {
    pub momentum: f64,
    pub trend: f64,
    pub volatility: f64,
    pub volume: f64,
}

impl ScoreBreakdown {
    pub fn weighted(&self) -> f64 {
        let raw = MOMENTUM_WEIGHT * self.momentum
            + TREND_WEIGHT * self.trend
            + VOLATILITY_WEIGHT * self.volatility
            + VOLUME_WEIGHT * self.volume;
        raw.clamp(-1.0, 1.0)
    }
}

/// Result of scoring one snapshot
#[derive(Debug, Clone, PartialEq)]
pub struct Assessment {
    pub score: f64,
    pub action: SignalAction,
    pub confidence: f64,
    pub breakdown: ScoreBreakdown,
    pub reasoning: String,
}

/// Deterministic rule-based signal generator
///
/// Used on its own by technical strategies and as the fallback whenever the AI path
/// is unavailable. Pure: the same snapshot always yields the same assessment.
#[derive(Debug, Clone)]
pub struct TechnicalScorer {
    strategy: String,
}

impl Default for TechnicalScorer {
    fn default() -> Self {
        Self::new("technical")
    }
}

impl TechnicalScorer {
    pub fn new(strategy: &str) -> Self {
        Self {
            strategy: strategy.to_string(),
        }
    }

    pub fn strategy(&self) -> &str {
        &self.strategy
    }

    pub fn assess(&self, snapshot: &IndicatorSnapshot) -> Assessment {
        let momentum = momentum_score(snapshot);
        let trend = trend_score(snapshot);
        let breakdown = ScoreBreakdown {
            momentum,
            trend,
            volatility: volatility_score(snapshot),
            volume: volume_score(snapshot, momentum + trend),
        };

        let score = breakdown.weighted();
        let action = action_for(score);

        Assessment {
            score,
            action,
            confidence: score.abs(),
            breakdown,
            reasoning: describe(snapshot, score, &breakdown),
        }
    }

    /// Score a single snapshot into a signal
    pub fn score(
        &self,
        symbol: &str,
        snapshot: &IndicatorSnapshot,
        generated_at: DateTime<Utc>,
    ) -> Signal {
        let assessment = self.assess(snapshot);
        self.signal_from(symbol, assessment, snapshot, generated_at)
    }

    /// Equal-weight average across timeframes; price levels come from the shortest one
    pub fn score_timeframes(
        &self,
        symbol: &str,
        snapshots: &BTreeMap<Timeframe, IndicatorSnapshot>,
        generated_at: DateTime<Utc>,
    ) -> Signal {
        let Some((_, shortest)) = snapshots.iter().next() else {
            let neutral = IndicatorSnapshot::neutral(0.0);
            let mut assessment = self.assess(&neutral);
            assessment.reasoning = "No indicator data available; holding".to_string();
            return self.signal_from(symbol, assessment, &neutral, generated_at);
        };

        if snapshots.len() == 1 {
            return self.score(symbol, shortest, generated_at);
        }

        let assessments: Vec<(Timeframe, Assessment)> = snapshots
            .iter()
            .map(|(tf, snapshot)| (*tf, self.assess(snapshot)))
            .collect();

        let score = (assessments.iter().map(|(_, a)| a.score).sum::<f64>()
            / assessments.len() as f64)
            .clamp(-1.0, 1.0);

        let per_tf: Vec<String> = assessments
            .iter()
            .map(|(tf, a)| format!("{} {:+.2}", tf, a.score))
            .collect();

        let breakdown = average_breakdown(assessments.iter().map(|(_, a)| &a.breakdown));
        let assessment = Assessment {
            score,
            action: action_for(score),
            confidence: score.abs(),
            breakdown,
            reasoning: format!(
                "Multi-timeframe technical score {:+.2} ({})",
                score,
                per_tf.join(", ")
            ),
        };

        self.signal_from(symbol, assessment, shortest, generated_at)
    }

    fn signal_from(
        &self,
        symbol: &str,
        assessment: Assessment,
        snapshot: &IndicatorSnapshot,
        generated_at: DateTime<Utc>,
    ) -> Signal {
        let (entry_price, stop_loss, take_profit) = levels(assessment.action, snapshot);

        Signal {
            symbol: symbol.to_string(),
            action: assessment.action,
            confidence: assessment.confidence,
            entry_price,
            stop_loss,
            take_profit,
            strategy: self.strategy.clone(),
            reasoning: assessment.reasoning,
            source: SignalSource::Technical,
            generated_at,
        }
    }
}

fn action_for(score: f64) -> SignalAction {
    if score >= ACTION_THRESHOLD {
        SignalAction::Buy
    } else if score <= -ACTION_THRESHOLD {
        SignalAction::Sell
    } else {
        SignalAction::Hold
    }
}

/// Express `value` in ATRs, or in percent of price when ATR is unknown
fn normalized(value: f64, snapshot: &IndicatorSnapshot) -> f64 {
    if snapshot.atr > 0.0 {
        value / snapshot.atr
    } else if snapshot.close > 0.0 {
        value / snapshot.close * 100.0
    } else {
        0.0
    }
}

fn momentum_score(snapshot: &IndicatorSnapshot) -> f64 {
    // 30 -> +1, 50 -> 0, 70 -> -1
    let midpoint = (RSI_OVERSOLD + RSI_OVERBOUGHT) / 2.0;
    let half_band = (RSI_OVERBOUGHT - RSI_OVERSOLD) / 2.0;
    let rsi = ((midpoint - snapshot.rsi) / half_band).clamp(-1.0, 1.0);

    let macd = normalized(snapshot.macd_histogram, snapshot).clamp(-1.0, 1.0);

    (rsi + macd) / 2.0
}

fn trend_score(snapshot: &IndicatorSnapshot) -> f64 {
    let ema = normalized(snapshot.ema_fast - snapshot.ema_slow, snapshot).clamp(-1.0, 1.0);

    let di_total = snapshot.plus_di + snapshot.minus_di;
    let di = if di_total > 0.0 {
        (snapshot.plus_di - snapshot.minus_di) / di_total
    } else {
        0.0
    };

    let strength = (snapshot.adx / ADX_STRONG_TREND).clamp(0.0, 1.0);

    // Direction from EMAs and DI, conviction from ADX; a trendless market halves it
    ((0.6 * ema + 0.4 * di) * (0.5 + 0.5 * strength)).clamp(-1.0, 1.0)
}

fn volatility_score(snapshot: &IndicatorSnapshot) -> f64 {
    (1.0 - 2.0 * snapshot.bollinger_percent_b).clamp(-1.0, 1.0)
}

fn volume_score(snapshot: &IndicatorSnapshot, direction: f64) -> f64 {
    if snapshot.volume_ratio < VOLUME_CONFIRM_RATIO || direction == 0.0 {
        return 0.0;
    }
    let strength = ((snapshot.volume_ratio - 1.0) / (VOLUME_FULL_RATIO - 1.0)).clamp(0.0, 1.0);
    direction.signum() * strength
}

fn levels(
    action: SignalAction,
    snapshot: &IndicatorSnapshot,
) -> (Option<f64>, Option<f64>, Option<f64>) {
    if action == SignalAction::Hold || snapshot.close <= 0.0 {
        return (None, None, None);
    }

    let entry = snapshot.close;
    if snapshot.atr <= 0.0 {
        return (Some(entry), None, None);
    }

    let stop_distance = STOP_ATR_MULTIPLE * snapshot.atr;
    let target_distance = TARGET_ATR_MULTIPLE * snapshot.atr;

    match action {
        SignalAction::Buy => (
            Some(entry),
            Some(entry - stop_distance),
            Some(entry + target_distance),
        ),
        SignalAction::Sell => (
            Some(entry),
            Some(entry + stop_distance),
            Some(entry - target_distance),
        ),
        SignalAction::Hold => (None, None, None),
    }
}

fn average_breakdown<'a>(items: impl Iterator<Item = &'a ScoreBreakdown>) -> ScoreBreakdown {
    let mut total = ScoreBreakdown::default();
    let mut count = 0usize;
    for b in items {
        total.momentum += b.momentum;
        total.trend += b.trend;
        total.volatility += b.volatility;
        total.volume += b.volume;
        count += 1;
    }
    if count == 0 {
        return total;
    }
    let n = count as f64;
    ScoreBreakdown {
        momentum: total.momentum / n,
        trend: total.trend / n,
        volatility: total.volatility / n,
        volume: total.volume / n,
    }
}

fn describe(snapshot: &IndicatorSnapshot, score: f64, b: &ScoreBreakdown) -> String {
    let mut notes = Vec::new();

    if snapshot.rsi <= RSI_OVERSOLD {
        notes.push(format!("RSI {:.1} oversold", snapshot.rsi));
    } else if snapshot.rsi >= RSI_OVERBOUGHT {
        notes.push(format!("RSI {:.1} overbought", snapshot.rsi));
    } else {
        notes.push(format!("RSI {:.1}", snapshot.rsi));
    }

    notes.push(format!("MACD histogram {:+.4}", snapshot.macd_histogram));

    if snapshot.ema_fast > snapshot.ema_slow {
        notes.push("EMA fast above slow".to_string());
    } else if snapshot.ema_fast < snapshot.ema_slow {
        notes.push("EMA fast below slow".to_string());
    }

    notes.push(format!("ADX {:.1}", snapshot.adx));
    notes.push(format!("%B {:.2}", snapshot.bollinger_percent_b));
    notes.push(format!("volume {:.2}x", snapshot.volume_ratio));

    format!(
        "Technical score {:+.2} (momentum {:+.2}, trend {:+.2}, volatility {:+.2}, volume {:+.2}): {}",
        score,
        b.momentum,
        b.trend,
        b.volatility,
        b.volume,
        notes.join(", ")
    )
}
