// =============================================================================
// Single-Timeframe Analysis
// =============================================================================
//
//   trend       EMA(20) vs EMA(50) divergence, ±1 % dead band
//   strength    |divergence| * 20, capped at 100
//   momentum    RSI(14) remapped to [-100, 100]
//   volatility  ATR(14) as % of last close, * 20, capped at 100
//   volume      last candle vs trailing 20-candle average
//   S / R       min low / max high of the last 20 candles
//
// Fewer than 20 closed candles yields the neutral, zero-confidence default.

use serde::{Deserialize, Serialize};

use crate::indicators::{atr, ema, rsi};
use crate::market_data::Candle;
use crate::types::{clamp_score, Timeframe, TrendDirection};

pub const MIN_CANDLES: usize = 20;
const EMA_FAST: usize = 20;
const EMA_SLOW: usize = 50;
const TREND_THRESHOLD_PCT: f64 = 1.0;
const SR_WINDOW: usize = 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum VolumeCharacter {
    Surging,
    High,
    Normal,
    Low,
}

impl VolumeCharacter {
    pub fn from_ratio(ratio: f64) -> Self {
        if ratio > 2.0 {
            Self::Surging
        } else if ratio > 1.3 {
            Self::High
        } else if ratio < 0.7 {
            Self::Low
        } else {
            Self::Normal
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeframeAnalysis {
    pub timeframe: Timeframe,
    pub trend: TrendDirection,
    /// 0..100.
    pub strength: f64,
    /// -100..100.
    pub momentum: f64,
    /// 0..100.
    pub volatility: f64,
    pub volume: VolumeCharacter,
    pub volume_ratio: f64,
    pub support: Option<f64>,
    pub resistance: Option<f64>,
    /// 0..100.
    pub confidence: f64,
    pub candles: usize,
}

impl TimeframeAnalysis {
    pub fn neutral(timeframe: Timeframe, candles: usize) -> Self {
        Self {
            timeframe,
            trend: TrendDirection::Neutral,
            strength: 0.0,
            momentum: 0.0,
            volatility: 0.0,
            volume: VolumeCharacter::Normal,
            volume_ratio: 1.0,
            support: None,
            resistance: None,
            confidence: 0.0,
            candles,
        }
    }

    /// False for the zero-confidence fallback of a series too short to read.
    pub fn has_data(&self) -> bool {
        self.confidence > 0.0
    }
}

/// Analyse one timeframe's closed candles (oldest first).
pub fn analyze(timeframe: Timeframe, candles: &[Candle]) -> TimeframeAnalysis {
    let n = candles.len();
    if n < MIN_CANDLES {
        return TimeframeAnalysis::neutral(timeframe, n);
    }

    let closes: Vec<f64> = candles.iter().map(|c| c.close).collect();

    let divergence = ema::ema_divergence_pct(&closes, EMA_FAST, EMA_SLOW).unwrap_or(0.0);
    let trend = if divergence > TREND_THRESHOLD_PCT {
        TrendDirection::Bullish
    } else if divergence < -TREND_THRESHOLD_PCT {
        TrendDirection::Bearish
    } else {
        TrendDirection::Neutral
    };
    let strength = (divergence.abs() * 20.0).min(100.0);

    let momentum = rsi::rsi_momentum(&closes, 14).unwrap_or(0.0);
    let volatility = atr::atr_pct(candles, 14).map_or(0.0, |p| clamp_score(p * 20.0));

    let (last, prior) = candles.split_last().map_or((0.0, &[][..]), |(l, p)| (l.volume, p));
    let window = &prior[prior.len().saturating_sub(SR_WINDOW)..];
    let avg_volume = window.iter().map(|c| c.volume).sum::<f64>() / window.len().max(1) as f64;
    let volume_ratio = if avg_volume > 0.0 { last / avg_volume } else { 1.0 };

    let recent = &candles[n - SR_WINDOW..];
    let support = recent.iter().map(|c| c.low).fold(f64::INFINITY, f64::min);
    let resistance = recent.iter().map(|c| c.high).fold(f64::NEG_INFINITY, f64::max);

    // Sample depth (up to 70) plus momentum agreeing with the trend (30).
    let sample = (n as f64 / EMA_SLOW as f64).min(1.0) * 70.0;
    let agreement = match trend {
        TrendDirection::Bullish if momentum > 0.0 => 30.0,
        TrendDirection::Bearish if momentum < 0.0 => 30.0,
        TrendDirection::Neutral if momentum.abs() < 20.0 => 30.0,
        _ => 0.0,
    };

    TimeframeAnalysis {
        timeframe,
        trend,
        strength,
        momentum,
        volatility,
        volume: VolumeCharacter::from_ratio(volume_ratio),
        volume_ratio,
        support: Some(support),
        resistance: Some(resistance),
        confidence: clamp_score(sample + agreement),
        candles: n,
    }
}
