// =============================================================================
// Operating Modes — posture -> mode, regime overrides, fixed templates
// =============================================================================
//
// Five modes ordered from most selective to most permissive.  Each carries a
// fixed threshold template plus the signal rate and win-rate floor it is
// expected to deliver:
//
//   mode           pattern  consensus  r/r  liquidity  quality  sig/day  win%
//   ULTRA_QUALITY     85        80     3.0     70        85        3      75
//   HIGH_QUALITY      75        70     2.5     60        75        6      68
//   BALANCED          65        60     2.0     50        65       12      60
//   VOLUME            55        52     1.6     40        55       20      55
//   FLOOD             45        45     1.3     30        45       35      50

use serde::{Deserialize, Serialize};

use crate::goal::Posture;
use crate::regime::MarketRegime;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AlphaMode {
    UltraQuality,
    HighQuality,
    Balanced,
    Volume,
    Flood,
}

impl std::fmt::Display for AlphaMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::UltraQuality => write!(f, "ULTRA_QUALITY"),
            Self::HighQuality => write!(f, "HIGH_QUALITY"),
            Self::Balanced => write!(f, "BALANCED"),
            Self::Volume => write!(f, "VOLUME"),
            Self::Flood => write!(f, "FLOOD"),
        }
    }
}

/// Template gate values of one mode.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ModeTemplate {
    pub pattern_strength: f64,
    pub consensus: f64,
    pub risk_reward: f64,
    pub liquidity: f64,
    pub data_quality: f64,
    pub target_signals_per_day: u32,
    pub min_win_rate: f64,
}

impl AlphaMode {
    pub const ALL: [AlphaMode; 5] = [
        AlphaMode::UltraQuality,
        AlphaMode::HighQuality,
        AlphaMode::Balanced,
        AlphaMode::Volume,
        AlphaMode::Flood,
    ];

    pub fn from_posture(posture: Posture) -> Self {
        match posture {
            Posture::UltraConservative => Self::UltraQuality,
            Posture::Conservative => Self::HighQuality,
            Posture::Balanced => Self::Balanced,
            Posture::Aggressive => Self::Volume,
            Posture::UltraAggressive => Self::Flood,
        }
    }

    pub fn template(self) -> ModeTemplate {
        let (pattern_strength, consensus, risk_reward, liquidity, data_quality, target_signals_per_day, min_win_rate) =
            match self {
                Self::UltraQuality => (85.0, 80.0, 3.0, 70.0, 85.0, 3, 75.0),
                Self::HighQuality => (75.0, 70.0, 2.5, 60.0, 75.0, 6, 68.0),
                Self::Balanced => (65.0, 60.0, 2.0, 50.0, 65.0, 12, 60.0),
                Self::Volume => (55.0, 52.0, 1.6, 40.0, 55.0, 20, 55.0),
                Self::Flood => (45.0, 45.0, 1.3, 30.0, 45.0, 35, 50.0),
            };
        ModeTemplate {
            pattern_strength,
            consensus,
            risk_reward,
            liquidity,
            data_quality,
            target_signals_per_day,
            min_win_rate,
        }
    }

    /// Volume and flood modes.
    pub fn is_aggressive(self) -> bool {
        self > Self::Balanced
    }

    /// Adjust a posture-derived mode for the current regime.  Returns the
    /// final mode and, when it changed, the reason.
    pub fn with_regime_overrides(self, regime: MarketRegime) -> (Self, Option<String>) {
        match regime {
            MarketRegime::HighVolatility if self == Self::Flood => (
                Self::Volume,
                Some("FLOOD disabled in HIGH_VOLATILITY regime; using VOLUME".to_string()),
            ),
            MarketRegime::BearTrending if self > Self::Balanced => (
                Self::Balanced,
                Some(format!("{self} capped at BALANCED in BEAR_TRENDING regime")),
            ),
            _ => (self, None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn posture_maps_one_to_one() {
        assert_eq!(AlphaMode::from_posture(Posture::UltraAggressive), AlphaMode::Flood);
        assert_eq!(AlphaMode::from_posture(Posture::UltraConservative), AlphaMode::UltraQuality);
        assert_eq!(AlphaMode::from_posture(Posture::Balanced), AlphaMode::Balanced);
    }

    #[test]
    fn high_volatility_blocks_flood_only() {
        let (m, why) = AlphaMode::Flood.with_regime_overrides(MarketRegime::HighVolatility);
        assert_eq!(m, AlphaMode::Volume);
        assert!(why.is_some());

        let (m, why) = AlphaMode::Volume.with_regime_overrides(MarketRegime::HighVolatility);
        assert_eq!(m, AlphaMode::Volume);
        assert!(why.is_none());
    }

    #[test]
    fn bear_trend_caps_at_balanced() {
        assert_eq!(
            AlphaMode::Flood.with_regime_overrides(MarketRegime::BearTrending).0,
            AlphaMode::Balanced
        );
        assert_eq!(
            AlphaMode::HighQuality.with_regime_overrides(MarketRegime::BearTrending).0,
            AlphaMode::HighQuality
        );
    }

    #[test]
    fn templates_tighten_monotonically() {
        for pair in AlphaMode::ALL.windows(2) {
            let (strict, loose) = (pair[0].template(), pair[1].template());
            assert!(strict.pattern_strength > loose.pattern_strength);
            assert!(strict.risk_reward > loose.risk_reward);
            assert!(strict.target_signals_per_day < loose.target_signals_per_day);
            assert!(strict.min_win_rate > loose.min_win_rate);
        }
    }
}
