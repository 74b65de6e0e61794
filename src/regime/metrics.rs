// =============================================================================
// Market Metrics — seven independent sub-scores and their weighted composite
// =============================================================================
//
//   volatility  0.20   price velocity (40 %) + 24h range (60 %)
//   volume      0.15   current volume vs trailing average
//   sentiment   0.15   Fear & Greed index
//   whale       0.20   accumulation share of large trades
//   funding     0.10   contrarian funding signal remapped to 0..100
//   orderbook   0.10   top-N depth imbalance remapped to 0..100
//   quality     0.10   data quality (60 %) + price confidence (40 %)
//
// Every sub-score is clamped to [0, 100].  A missing side input scores the
// neutral 50; a missing snapshot scores 50 everywhere except quality, which
// drops to 0.
// =============================================================================

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::aggregator::Ticker;
use crate::side_inputs::SideInputs;
use crate::types::clamp_score;

pub const NEUTRAL: f64 = 50.0;

pub const W_VOLATILITY: f64 = 0.20;
pub const W_VOLUME: f64 = 0.15;
pub const W_SENTIMENT: f64 = 0.15;
pub const W_WHALE: f64 = 0.20;
pub const W_FUNDING: f64 = 0.10;
pub const W_ORDERBOOK: f64 = 0.10;
pub const W_QUALITY: f64 = 0.10;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SubScores {
    pub volatility: f64,
    pub volume: f64,
    pub sentiment: f64,
    pub whale: f64,
    pub funding: f64,
    pub orderbook: f64,
    pub quality: f64,
}

impl Default for SubScores {
    fn default() -> Self {
        Self {
            volatility: NEUTRAL,
            volume: NEUTRAL,
            sentiment: NEUTRAL,
            whale: NEUTRAL,
            funding: NEUTRAL,
            orderbook: NEUTRAL,
            quality: NEUTRAL,
        }
    }
}

impl SubScores {
    pub fn composite(&self) -> f64 {
        clamp_score(
            self.volatility * W_VOLATILITY
                + self.volume * W_VOLUME
                + self.sentiment * W_SENTIMENT
                + self.whale * W_WHALE
                + self.funding * W_FUNDING
                + self.orderbook * W_ORDERBOOK
                + self.quality * W_QUALITY,
        )
    }
}

/// Composite market read for one instrument.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketMetrics {
    pub symbol: String,
    /// Fused price the scores were computed from, if a snapshot existed.
    pub price: Option<f64>,
    pub scores: SubScores,
    pub composite: f64,
    pub data_quality: f64,
    pub timestamp: DateTime<Utc>,
}

impl MarketMetrics {
    pub fn neutral(symbol: &str, timestamp: DateTime<Utc>) -> Self {
        let scores = SubScores::default();
        Self {
            symbol: symbol.to_string(),
            price: None,
            composite: scores.composite(),
            scores,
            data_quality: 0.0,
            timestamp,
        }
    }
}

// ── Sub-score rules ─────────────────────────────────────────────────────

pub fn volatility_score(ticker: &Ticker) -> f64 {
    let velocity = (ticker.price_velocity_pct.abs() * 50.0).min(100.0);
    let range = (ticker.range_pct() * 10.0).min(100.0);
    clamp_score(velocity * 0.4 + range * 0.6)
}

/// `baseline` is the trailing average volume, when one exists.
pub fn volume_score(volume: f64, baseline: Option<f64>) -> f64 {
    match baseline {
        Some(avg) if avg > 0.0 => clamp_score(NEUTRAL + (volume / avg - 1.0) * 50.0),
        _ => NEUTRAL,
    }
}

pub fn quality_score(ticker: &Ticker) -> f64 {
    clamp_score(ticker.data_quality * 0.6 + ticker.price_confidence * 0.4)
}

pub fn side_input_scores(inputs: &SideInputs) -> (f64, f64, f64, f64) {
    let sentiment = inputs
        .sentiment
        .as_ref()
        .map_or(NEUTRAL, |s| clamp_score(s.value));
    let whale = inputs
        .whale
        .as_ref()
        .and_then(|w| w.accumulation_ratio())
        .map_or(NEUTRAL, |r| clamp_score(r * 100.0));
    let funding = inputs
        .funding
        .as_ref()
        .map_or(NEUTRAL, |f| clamp_score(NEUTRAL + f.signal * 50.0));
    let orderbook = inputs
        .orderbook
        .as_ref()
        .map_or(NEUTRAL, |d| clamp_score(NEUTRAL + d.imbalance * 50.0));
    (sentiment, whale, funding, orderbook)
}

/// Score one instrument from its snapshot (if any) and side inputs.
pub fn compute(
    symbol: &str,
    ticker: Option<&Ticker>,
    inputs: &SideInputs,
    volume_baseline: Option<f64>,
    timestamp: DateTime<Utc>,
) -> MarketMetrics {
    let (sentiment, whale, funding, orderbook) = side_input_scores(inputs);

    let (volatility, volume, quality) = match ticker {
        Some(t) => (
            volatility_score(t),
            volume_score(t.volume, volume_baseline),
            quality_score(t),
        ),
        None => (NEUTRAL, NEUTRAL, 0.0),
    };

    let scores = SubScores {
        volatility,
        volume,
        sentiment,
        whale,
        funding,
        orderbook,
        quality,
    };

    MarketMetrics {
        symbol: symbol.to_string(),
        price: ticker.map(|t| t.price),
        composite: scores.composite(),
        scores,
        data_quality: ticker.map_or(0.0, |t| t.data_quality),
        timestamp,
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregator::Microstructure;
    use crate::side_inputs::{DepthState, FundingState, SentimentReading, WhaleFlow};

    fn ticker(price: f64, high: f64, low: f64, velocity: f64) -> Ticker {
        Ticker {
            symbol: "BTC".into(),
            price,
            volume: 1_000.0,
            high_24h: high,
            low_24h: low,
            bid: None,
            ask: None,
            change_24h_pct: None,
            price_velocity_pct: velocity,
            sources: vec!["a".into()],
            data_quality: 80.0,
            price_confidence: 90.0,
            smart_money_flow: 0.5,
            microstructure: Microstructure::default(),
            timestamp_ms: 0,
        }
    }

    fn in_range(s: &SubScores) -> bool {
        [s.volatility, s.volume, s.sentiment, s.whale, s.funding, s.orderbook, s.quality]
            .iter()
            .all(|v| (0.0..=100.0).contains(v))
    }

    #[test]
    fn weights_sum_to_one() {
        let sum = W_VOLATILITY + W_VOLUME + W_SENTIMENT + W_WHALE + W_FUNDING + W_ORDERBOOK + W_QUALITY;
        assert!((sum - 1.0).abs() < 1e-12);
    }

    #[test]
    fn all_defaults_stay_in_range() {
        let m = compute("BTC", None, &SideInputs::default(), None, Utc::now());
        assert!(in_range(&m.scores));
        assert!((0.0..=100.0).contains(&m.composite));
        assert_eq!(m.scores.quality, 0.0);
        assert!((m.composite - 45.0).abs() < 1e-9);
    }

    #[test]
    fn extreme_inputs_are_clamped() {
        let t = ticker(100.0, 1_000.0, 1.0, 50.0);
        let inputs = SideInputs {
            sentiment: Some(SentimentReading { value: 100.0, classification: "x".into() }),
            whale: Some(WhaleFlow { accumulation: 1e9, distribution: 0.0, large_trades: 1, trades_seen: 1 }),
            funding: Some(FundingState::from_rate(-0.01, 0)),
            orderbook: Some(DepthState::new(1.0, 1.1, 1e9, 0.0, 1)),
        };
        let m = compute("BTC", Some(&t), &inputs, Some(1.0), Utc::now());
        assert!(in_range(&m.scores));
        assert_eq!(m.scores.volatility, 100.0);
        assert_eq!(m.scores.volume, 100.0);
        assert_eq!(m.scores.whale, 100.0);
        assert!((0.0..=100.0).contains(&m.composite));
    }

    #[test]
    fn volatility_blends_velocity_and_range() {
        // 2 % range -> 20, 0.5 % velocity -> 25.
        let t = ticker(100.0, 101.0, 99.0, 0.5);
        assert!((volatility_score(&t) - (25.0 * 0.4 + 20.0 * 0.6)).abs() < 1e-9);
    }

    #[test]
    fn volume_against_baseline() {
        assert_eq!(volume_score(100.0, None), NEUTRAL);
        assert!((volume_score(150.0, Some(100.0)) - 75.0).abs() < 1e-9);
        assert!((volume_score(50.0, Some(100.0)) - 25.0).abs() < 1e-9);
    }

    #[test]
    fn funding_and_orderbook_remap() {
        let inputs = SideInputs {
            funding: Some(FundingState::from_rate(0.0006, 0)),
            orderbook: Some(DepthState::new(1.0, 1.1, 300.0, 100.0, 1)),
            ..Default::default()
        };
        let (sentiment, whale, funding, orderbook) = side_input_scores(&inputs);
        assert_eq!(sentiment, NEUTRAL);
        assert_eq!(whale, NEUTRAL);
        assert!((funding - 10.0).abs() < 1e-9);
        assert!((orderbook - 75.0).abs() < 1e-9);
    }
}
