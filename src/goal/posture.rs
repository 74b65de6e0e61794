// =============================================================================
// Strategic Posture — deviation from pace -> how hard to push
// =============================================================================
//
// Evaluated most extreme catch-up first:
//
//   deviation <= -15 % AND days remaining <= 10  ->  ULTRA_AGGRESSIVE
//   deviation <= -10 %                           ->  AGGRESSIVE
//   deviation >= +20 %                           ->  ULTRA_CONSERVATIVE
//   deviation >=  +5 %                           ->  CONSERVATIVE
//   otherwise                                    ->  BALANCED

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Posture {
    UltraConservative,
    Conservative,
    Balanced,
    Aggressive,
    UltraAggressive,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RiskTier {
    Minimal,
    Low,
    Moderate,
    High,
    Maximum,
}

impl std::fmt::Display for Posture {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::UltraConservative => write!(f, "ULTRA_CONSERVATIVE"),
            Self::Conservative => write!(f, "CONSERVATIVE"),
            Self::Balanced => write!(f, "BALANCED"),
            Self::Aggressive => write!(f, "AGGRESSIVE"),
            Self::UltraAggressive => write!(f, "ULTRA_AGGRESSIVE"),
        }
    }
}

impl Posture {
    pub fn select(deviation_pct: f64, days_remaining: u32) -> Self {
        if deviation_pct <= -15.0 && days_remaining <= 10 {
            Self::UltraAggressive
        } else if deviation_pct <= -10.0 {
            Self::Aggressive
        } else if deviation_pct >= 20.0 {
            Self::UltraConservative
        } else if deviation_pct >= 5.0 {
            Self::Conservative
        } else {
            Self::Balanced
        }
    }

    pub fn target_signals_per_day(self) -> u32 {
        match self {
            Self::UltraConservative => 3,
            Self::Conservative => 6,
            Self::Balanced => 12,
            Self::Aggressive => 20,
            Self::UltraAggressive => 35,
        }
    }

    pub fn min_win_rate(self) -> f64 {
        match self {
            Self::UltraConservative => 75.0,
            Self::Conservative => 68.0,
            Self::Balanced => 60.0,
            Self::Aggressive => 55.0,
            Self::UltraAggressive => 50.0,
        }
    }

    pub fn risk_tier(self) -> RiskTier {
        match self {
            Self::UltraConservative => RiskTier::Minimal,
            Self::Conservative => RiskTier::Low,
            Self::Balanced => RiskTier::Moderate,
            Self::Aggressive => RiskTier::High,
            Self::UltraAggressive => RiskTier::Maximum,
        }
    }

    fn rationale(self) -> &'static str {
        match self {
            Self::UltraConservative => "Far ahead of pace: protect gains, accept only the best setups",
            Self::Conservative => "Ahead of pace: tighten selection",
            Self::Balanced => "On pace: keep the standard selection",
            Self::Aggressive => "Behind pace: widen selection to raise signal flow",
            Self::UltraAggressive => "Far behind pace with little time left: maximise signal flow",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StrategicRecommendation {
    pub posture: Posture,
    pub deviation_pct: f64,
    pub days_remaining: u32,
    pub target_signals_per_day: u32,
    pub min_win_rate: f64,
    pub risk_tier: RiskTier,
    pub rationale: String,
}

impl StrategicRecommendation {
    pub fn new(deviation_pct: f64, days_remaining: u32) -> Self {
        let posture = Posture::select(deviation_pct, days_remaining);
        Self {
            posture,
            deviation_pct,
            days_remaining,
            target_signals_per_day: posture.target_signals_per_day(),
            min_win_rate: posture.min_win_rate(),
            risk_tier: posture.risk_tier(),
            rationale: posture.rationale().to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn selection_order() {
        assert_eq!(Posture::select(-16.0, 8), Posture::UltraAggressive);
        // Same deficit with plenty of time left is only aggressive.
        assert_eq!(Posture::select(-16.0, 20), Posture::Aggressive);
        assert_eq!(Posture::select(-10.0, 20), Posture::Aggressive);
        assert_eq!(Posture::select(-9.9, 2), Posture::Balanced);
        assert_eq!(Posture::select(4.9, 10), Posture::Balanced);
        assert_eq!(Posture::select(5.0, 10), Posture::Conservative);
        assert_eq!(Posture::select(25.0, 10), Posture::UltraConservative);
    }

    #[test]
    fn recommendation_carries_posture_parameters() {
        let r = StrategicRecommendation::new(-20.0, 5);
        assert_eq!(r.posture, Posture::UltraAggressive);
        assert_eq!(r.target_signals_per_day, 35);
        assert_eq!(r.risk_tier, RiskTier::Maximum);
        assert!((r.min_win_rate - 50.0).abs() < f64::EPSILON);
    }
}
