// =============================================================================
// Threshold Set — dynamic acceptance gates with derivation trails
// =============================================================================
//
// Built from a mode template, then nudged by the current market read:
//
//   composite    > 65 relaxes pattern/consensus by 3, < 35 tightens them
//                (and data quality) by 3
//   regime       HIGH_VOLATILITY  r/r +0.3, liquidity +10, quality +5
//                LOW_VOLATILITY   pattern -2, r/r -0.2
//                BEAR_TRENDING    pattern +5, consensus +5
//                BULL_TRENDING    consensus -2
//                RANGING          r/r +0.2
//   confluence   alignment >= 80 relaxes pattern by 3, < 40 tightens
//                pattern and consensus by 3; skipped when no timeframe
//                had data
//   calendar     <= 5 days left in an aggressive mode relaxes pattern and
//                consensus by 2
//
// Every step is written to the metric's trail.  Values are clamped to the
// metric's floor/ceiling after every step, so no multiplier can push a gate
// out of range.

use serde::{Deserialize, Serialize};

use super::command::GammaCommand;
use super::modes::AlphaMode;
use crate::mtf::Confluence;
use crate::regime::MarketRegime;

const COMPOSITE_SUPPORTIVE: f64 = 65.0;
const COMPOSITE_HOSTILE: f64 = 35.0;
const ALIGNMENT_HIGH: f64 = 80.0;
const ALIGNMENT_LOW: f64 = 40.0;
const FINAL_PUSH_DAYS: u32 = 5;

/// One gate with its bounds and how it got its value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Threshold {
    pub value: f64,
    pub base: f64,
    pub floor: f64,
    pub ceiling: f64,
    pub trail: Vec<String>,
}

impl Threshold {
    fn new(base: f64, floor: f64, ceiling: f64) -> Self {
        let value = base.clamp(floor, ceiling);
        let mut trail = vec![format!("template {base}")];
        if value != base {
            trail.push(format!("clamped to {value}"));
        }
        Self {
            value,
            base,
            floor,
            ceiling,
            trail,
        }
    }

    fn shift(&mut self, delta: f64, why: &str) {
        if delta == 0.0 {
            return;
        }
        let raw = self.value + delta;
        self.value = raw.clamp(self.floor, self.ceiling);
        if self.value != raw {
            self.trail.push(format!("{why}: {delta:+} (clamped to {})", self.value));
        } else {
            self.trail.push(format!("{why}: {delta:+}"));
        }
    }

    pub fn clamp(&self, v: f64) -> f64 {
        v.clamp(self.floor, self.ceiling)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThresholdSet {
    pub pattern_strength: Threshold,
    pub consensus: Threshold,
    pub risk_reward: Threshold,
    pub liquidity: Threshold,
    pub data_quality: Threshold,
}

/// Gates after a command's multipliers were applied.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EffectiveThresholds {
    pub pattern_strength: f64,
    pub consensus: f64,
    pub risk_reward: f64,
    pub liquidity: f64,
    pub data_quality: f64,
}

/// Market read the dynamic adjustments use.
#[derive(Debug, Clone, Copy)]
pub struct AdjustmentContext<'a> {
    pub composite: f64,
    pub regime: MarketRegime,
    pub confluence: &'a Confluence,
    pub days_remaining: u32,
}

impl ThresholdSet {
    pub fn from_template(mode: AlphaMode) -> Self {
        let t = mode.template();
        Self {
            pattern_strength: Threshold::new(t.pattern_strength, 40.0, 95.0),
            consensus: Threshold::new(t.consensus, 40.0, 95.0),
            risk_reward: Threshold::new(t.risk_reward, 1.0, 5.0),
            liquidity: Threshold::new(t.liquidity, 20.0, 90.0),
            data_quality: Threshold::new(t.data_quality, 40.0, 95.0),
        }
    }

    pub fn dynamic(mode: AlphaMode, ctx: &AdjustmentContext<'_>) -> Self {
        let mut set = Self::from_template(mode);

        // ── composite ──
        if ctx.composite > COMPOSITE_SUPPORTIVE {
            let why = format!("composite {:.0} supportive", ctx.composite);
            set.pattern_strength.shift(-3.0, &why);
            set.consensus.shift(-3.0, &why);
        } else if ctx.composite < COMPOSITE_HOSTILE {
            let why = format!("composite {:.0} hostile", ctx.composite);
            set.pattern_strength.shift(3.0, &why);
            set.consensus.shift(3.0, &why);
            set.data_quality.shift(3.0, &why);
        }

        // ── regime ──
        let why = format!("regime {}", ctx.regime);
        match ctx.regime {
            MarketRegime::HighVolatility => {
                set.risk_reward.shift(0.3, &why);
                set.liquidity.shift(10.0, &why);
                set.data_quality.shift(5.0, &why);
            }
            MarketRegime::LowVolatility => {
                set.pattern_strength.shift(-2.0, &why);
                set.risk_reward.shift(-0.2, &why);
            }
            MarketRegime::BearTrending => {
                set.pattern_strength.shift(5.0, &why);
                set.consensus.shift(5.0, &why);
            }
            MarketRegime::BullTrending => set.consensus.shift(-2.0, &why),
            MarketRegime::Ranging => set.risk_reward.shift(0.2, &why),
        }

        // ── confluence ──
        if ctx.confluence.has_data() {
            let alignment = ctx.confluence.alignment;
            if alignment >= ALIGNMENT_HIGH {
                set.pattern_strength.shift(-3.0, &format!("alignment {alignment:.0}"));
            } else if alignment < ALIGNMENT_LOW {
                let why = format!("alignment {alignment:.0}");
                set.pattern_strength.shift(3.0, &why);
                set.consensus.shift(3.0, &why);
            }
        }

        // ── calendar ──
        if mode.is_aggressive() && ctx.days_remaining <= FINAL_PUSH_DAYS {
            let why = format!("{} days left", ctx.days_remaining);
            set.pattern_strength.shift(-2.0, &why);
            set.consensus.shift(-2.0, &why);
        }

        set
    }

    pub fn apply_command(&self, cmd: &GammaCommand) -> EffectiveThresholds {
        EffectiveThresholds {
            pattern_strength: self
                .pattern_strength
                .clamp(self.pattern_strength.value * cmd.pattern_strength_multiplier),
            consensus: self.consensus.clamp(self.consensus.value + cmd.consensus_delta),
            risk_reward: self
                .risk_reward
                .clamp(self.risk_reward.value * cmd.risk_reward_multiplier),
            liquidity: self.liquidity.value,
            data_quality: self.data_quality.value,
        }
    }

    fn all(&self) -> [&Threshold; 5] {
        [
            &self.pattern_strength,
            &self.consensus,
            &self.risk_reward,
            &self.liquidity,
            &self.data_quality,
        ]
    }

    pub fn within_bounds(&self) -> bool {
        self.all()
            .iter()
            .all(|t| t.value >= t.floor && t.value <= t.ceiling)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use std::time::Duration;

    fn confluence(alignment: f64) -> Confluence {
        Confluence {
            alignment,
            entry_quality: alignment,
            bullish_count: 6,
            ..Confluence::neutral()
        }
    }

    #[test]
    fn templates_start_inside_bounds() {
        for mode in AlphaMode::ALL {
            let set = ThresholdSet::from_template(mode);
            assert!(set.within_bounds(), "{mode}");
            assert_eq!(set.pattern_strength.trail.len(), 1);
        }
    }

    #[test]
    fn high_volatility_hostile_market_tightens() {
        let c = confluence(30.0);
        let ctx = AdjustmentContext {
            composite: 20.0,
            regime: MarketRegime::HighVolatility,
            confluence: &c,
            days_remaining: 20,
        };
        let set = ThresholdSet::dynamic(AlphaMode::Balanced, &ctx);
        assert!((set.pattern_strength.value - 71.0).abs() < 1e-9);
        assert!((set.consensus.value - 66.0).abs() < 1e-9);
        assert!((set.risk_reward.value - 2.3).abs() < 1e-9);
        assert!((set.liquidity.value - 60.0).abs() < 1e-9);
        assert!((set.data_quality.value - 73.0).abs() < 1e-9);
        assert_eq!(set.pattern_strength.trail.len(), 3);
    }

    #[test]
    fn adjustments_never_leave_bounds() {
        let c = confluence(95.0);
        let ctx = AdjustmentContext {
            composite: 90.0,
            regime: MarketRegime::LowVolatility,
            confluence: &c,
            days_remaining: 2,
        };
        let set = ThresholdSet::dynamic(AlphaMode::Flood, &ctx);
        // 45 - 3 - 2 - 3 - 2 would be 35.
        assert!((set.pattern_strength.value - 40.0).abs() < 1e-9);
        assert!(set.pattern_strength.trail.last().unwrap().contains("clamped"));
        assert!(set.within_bounds());
    }

    #[test]
    fn confluence_without_data_leaves_gates_alone() {
        let empty = Confluence::neutral();
        let ctx = AdjustmentContext {
            composite: 50.0,
            regime: MarketRegime::BullTrending,
            confluence: &empty,
            days_remaining: 20,
        };
        let set = ThresholdSet::dynamic(AlphaMode::Balanced, &ctx);
        assert!((set.pattern_strength.value - 65.0).abs() < 1e-9);
        assert!((set.consensus.value - 58.0).abs() < 1e-9);
        assert!(set.pattern_strength.trail.iter().all(|s| !s.contains("alignment")));
        assert!(set.consensus.trail.iter().all(|s| !s.contains("alignment")));
    }

    #[test]
    fn command_multipliers_are_clamped() {
        let set = ThresholdSet::from_template(AlphaMode::Flood);
        let cmd = GammaCommand::for_mode(AlphaMode::Flood, "test".into(), Utc::now(), Duration::from_secs(60));
        let eff = set.apply_command(&cmd);
        // 45 * 0.85 = 38.25 -> floor 40
        assert!((eff.pattern_strength - 40.0).abs() < 1e-9);
        assert!((eff.consensus - 40.0).abs() < 1e-9);
        assert!((eff.risk_reward - 1.04).abs() < 1e-9);

        let strict = ThresholdSet::from_template(AlphaMode::UltraQuality);
        let cmd = GammaCommand::for_mode(AlphaMode::UltraQuality, "test".into(), Utc::now(), Duration::from_secs(60));
        let eff = strict.apply_command(&cmd);
        assert!((eff.pattern_strength - 95.0).abs() < 1e-9);
        assert!((eff.consensus - 90.0).abs() < 1e-9);
        assert!((eff.risk_reward - 3.6).abs() < 1e-9);
    }
}
