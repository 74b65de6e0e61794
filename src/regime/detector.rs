// =============================================================================
// Market Regime Detector
// =============================================================================
//
// Classifies an instrument into exactly one of five regimes from its
// sub-scores and composite.  Rules are evaluated top-to-bottom; first match
// wins:
//
//   1. HIGH_VOLATILITY — volatility >= 75
//   2. LOW_VOLATILITY  — volatility <= 20
//   3. BULL_TRENDING   — composite >= 60 AND whale >= 55 AND sentiment >= 50
//   4. BEAR_TRENDING   — composite <= 40 AND whale <= 45 AND sentiment <= 50
//   5. RANGING         — otherwise
//
// Confidence (0..100) grows with the distance of the deciding metric(s)
// past their thresholds.  The tracker keeps a bounded ring of past
// classifications to infer how long the current regime has persisted, and a
// separately held regime that only moves on a confident change.
// =============================================================================

use std::collections::VecDeque;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::metrics::SubScores;
use crate::types::remap;

const HIGH_VOL: f64 = 75.0;
const LOW_VOL: f64 = 20.0;
const BULL_COMPOSITE: f64 = 60.0;
const BULL_WHALE: f64 = 55.0;
const BULL_SENTIMENT: f64 = 50.0;
const BEAR_COMPOSITE: f64 = 40.0;
const BEAR_WHALE: f64 = 45.0;
const BEAR_SENTIMENT: f64 = 50.0;

// =============================================================================
// Types
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MarketRegime {
    BullTrending,
    BearTrending,
    Ranging,
    HighVolatility,
    LowVolatility,
}

impl std::fmt::Display for MarketRegime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::BullTrending => write!(f, "BULL_TRENDING"),
            Self::BearTrending => write!(f, "BEAR_TRENDING"),
            Self::Ranging => write!(f, "RANGING"),
            Self::HighVolatility => write!(f, "HIGH_VOLATILITY"),
            Self::LowVolatility => write!(f, "LOW_VOLATILITY"),
        }
    }
}

impl MarketRegime {
    pub fn description(self) -> &'static str {
        match self {
            Self::BullTrending => "Broad buying with whale accumulation and positive sentiment",
            Self::BearTrending => "Broad selling with whale distribution and negative sentiment",
            Self::Ranging => "No directional agreement, price oscillating in a range",
            Self::HighVolatility => "Fast price moves and wide daily range",
            Self::LowVolatility => "Compressed range, little price movement",
        }
    }

    /// Typical lifetime of a regime, used for the remaining-duration estimate.
    pub fn typical_duration(self) -> Duration {
        match self {
            Self::BullTrending | Self::BearTrending => Duration::hours(72),
            Self::Ranging => Duration::hours(48),
            Self::HighVolatility => Duration::hours(12),
            Self::LowVolatility => Duration::hours(24),
        }
    }
}

/// Classified state of one instrument at one analysis.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegimeCharacteristics {
    pub regime: MarketRegime,
    /// 0..100.
    pub confidence: f64,
    /// Time since the regime was first observed in the unbroken run of
    /// identical classifications.
    pub duration_secs: i64,
    pub expected_remaining_secs: i64,
    pub description: String,
    pub classified_at: DateTime<Utc>,
}

/// Published when the held regime changes with sufficient confidence.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegimeChangeEvent {
    pub symbol: String,
    pub from: Option<MarketRegime>,
    pub to: MarketRegime,
    pub confidence: f64,
    pub at: DateTime<Utc>,
}

// =============================================================================
// Classification logic
// =============================================================================

/// Determine the regime and a 0..100 confidence.
pub fn classify(scores: &SubScores, composite: f64) -> (MarketRegime, f64) {
    let vol = scores.volatility;

    if vol >= HIGH_VOL {
        return (MarketRegime::HighVolatility, remap(vol, HIGH_VOL, 95.0, 60.0, 100.0));
    }

    if vol <= LOW_VOL {
        return (MarketRegime::LowVolatility, remap(vol, LOW_VOL, 5.0, 60.0, 100.0));
    }

    if composite >= BULL_COMPOSITE && scores.whale >= BULL_WHALE && scores.sentiment >= BULL_SENTIMENT {
        let confidence = (remap(composite, BULL_COMPOSITE, 80.0, 55.0, 100.0)
            + remap(scores.whale, BULL_WHALE, 80.0, 55.0, 100.0)
            + remap(scores.sentiment, BULL_SENTIMENT, 75.0, 55.0, 100.0))
            / 3.0;
        return (MarketRegime::BullTrending, confidence);
    }

    if composite <= BEAR_COMPOSITE && scores.whale <= BEAR_WHALE && scores.sentiment <= BEAR_SENTIMENT {
        let confidence = (remap(composite, BEAR_COMPOSITE, 20.0, 55.0, 100.0)
            + remap(scores.whale, BEAR_WHALE, 20.0, 55.0, 100.0)
            + remap(scores.sentiment, BEAR_SENTIMENT, 25.0, 55.0, 100.0))
            / 3.0;
        return (MarketRegime::BearTrending, confidence);
    }

    // Ranging is most certain with the composite dead-centre.
    let confidence = remap((composite - 50.0).abs(), 10.0, 0.0, 40.0, 90.0);
    (MarketRegime::Ranging, confidence)
}

// =============================================================================
// RegimeTracker
// =============================================================================

/// Per-instrument regime history and held regime.
pub struct RegimeTracker {
    history: VecDeque<(DateTime<Utc>, MarketRegime)>,
    capacity: usize,
    held: Option<MarketRegime>,
    min_change_confidence: f64,
}

impl RegimeTracker {
    pub fn new(capacity: usize, min_change_confidence: f64) -> Self {
        Self {
            history: VecDeque::with_capacity(capacity),
            capacity: capacity.max(1),
            held: None,
            min_change_confidence,
        }
    }

    #[cfg(test)]
    pub fn held(&self) -> Option<MarketRegime> {
        self.held
    }

    #[cfg(test)]
    pub fn history_len(&self) -> usize {
        self.history.len()
    }

    /// Record a classification. Returns its characteristics and, when the
    /// held regime changed, the change event.
    pub fn observe(
        &mut self,
        symbol: &str,
        regime: MarketRegime,
        confidence: f64,
        at: DateTime<Utc>,
    ) -> (RegimeCharacteristics, Option<RegimeChangeEvent>) {
        self.history.push_back((at, regime));
        while self.history.len() > self.capacity {
            self.history.pop_front();
        }

        let since = self
            .history
            .iter()
            .rev()
            .take_while(|(_, r)| *r == regime)
            .last()
            .map_or(at, |(ts, _)| *ts);
        let duration = at - since;
        let remaining = (regime.typical_duration() - duration).max(Duration::zero());

        let event = if self.held != Some(regime) && confidence >= self.min_change_confidence {
            let from = self.held.replace(regime);
            info!(
                symbol,
                from = ?from,
                to = %regime,
                confidence = format!("{:.1}", confidence),
                "regime change"
            );
            Some(RegimeChangeEvent {
                symbol: symbol.to_string(),
                from,
                to: regime,
                confidence,
                at,
            })
        } else {
            if self.held != Some(regime) {
                debug!(
                    symbol,
                    candidate = %regime,
                    confidence = format!("{:.1}", confidence),
                    "regime change below confidence threshold"
                );
            }
            None
        };

        let characteristics = RegimeCharacteristics {
            regime,
            confidence,
            duration_secs: duration.num_seconds(),
            expected_remaining_secs: remaining.num_seconds(),
            description: regime.description().to_string(),
            classified_at: at,
        };

        (characteristics, event)
    }
}
