// =============================================================================
// Cross-Timeframe Confluence
// =============================================================================
//
// Weighted vote: every timeframe casts its importance weight for its trend.
// The overall trend is bullish / bearish only when that side holds more
// than half of the total weight.
//
// Alignment is the share of timeframes agreeing with the overall trend; with
// no weighted majority it is the share of the largest direction group.
//
// Timeframes without data (zero-confidence fallback) neither vote nor count
// towards alignment; weights are renormalised over the ones that do.  With
// no data on any timeframe the result is neutral: alignment 0, HOLD.
//
// Recommendation:
//   direction  alignment  top-two momentum  ->
//   bullish    >= 80      both > 0             STRONG_BUY
//   bullish    >= 50      any                  BUY
//   bearish    >= 80      both < 0             STRONG_SELL
//   bearish    >= 50      any                  SELL
//   otherwise                                  HOLD

use serde::{Deserialize, Serialize};

use super::timeframe::TimeframeAnalysis;
use crate::types::{Timeframe, TrendDirection};

const STRONG_ALIGNMENT: f64 = 80.0;
const MIN_ALIGNMENT: f64 = 50.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Recommendation {
    StrongBuy,
    Buy,
    Hold,
    Sell,
    StrongSell,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Confluence {
    pub overall_trend: TrendDirection,
    /// 0..100.
    pub alignment: f64,
    pub bullish_count: usize,
    pub bearish_count: usize,
    pub neutral_count: usize,
    pub bullish_weight: f64,
    pub bearish_weight: f64,
    pub strongest: Option<Timeframe>,
    pub weakest: Option<Timeframe>,
    /// Entry quality; equal to alignment.
    pub entry_quality: f64,
    /// Momentum of the two highest timeframes points the same way as the
    /// overall trend.
    pub higher_timeframe_agreement: bool,
    pub recommendation: Recommendation,
}

impl Confluence {
    pub fn neutral() -> Self {
        Self {
            overall_trend: TrendDirection::Neutral,
            alignment: 0.0,
            bullish_count: 0,
            bearish_count: 0,
            neutral_count: 0,
            bullish_weight: 0.0,
            bearish_weight: 0.0,
            strongest: None,
            weakest: None,
            entry_quality: 0.0,
            higher_timeframe_agreement: false,
            recommendation: Recommendation::Hold,
        }
    }

    /// At least one timeframe had enough candles to vote.
    pub fn has_data(&self) -> bool {
        self.bullish_count + self.bearish_count + self.neutral_count > 0
    }
}

pub fn compute(analyses: &[TimeframeAnalysis]) -> Confluence {
    let voters: Vec<&TimeframeAnalysis> = analyses.iter().filter(|a| a.has_data()).collect();
    if voters.is_empty() {
        return Confluence::neutral();
    }

    let total_weight: f64 = voters.iter().map(|a| a.timeframe.weight()).sum();
    let count = |d: TrendDirection| voters.iter().filter(|a| a.trend == d).count();
    let weight = |d: TrendDirection| {
        voters
            .iter()
            .filter(|a| a.trend == d)
            .map(|a| a.timeframe.weight())
            .sum::<f64>()
            / total_weight
    };

    let bullish_count = count(TrendDirection::Bullish);
    let bearish_count = count(TrendDirection::Bearish);
    let neutral_count = count(TrendDirection::Neutral);
    let bullish_weight = weight(TrendDirection::Bullish);
    let bearish_weight = weight(TrendDirection::Bearish);

    let overall_trend = if bullish_weight > 0.5 {
        TrendDirection::Bullish
    } else if bearish_weight > 0.5 {
        TrendDirection::Bearish
    } else {
        TrendDirection::Neutral
    };

    let agreeing = match overall_trend {
        TrendDirection::Bullish => bullish_count,
        TrendDirection::Bearish => bearish_count,
        TrendDirection::Neutral => bullish_count.max(bearish_count).max(neutral_count),
    };
    let alignment = (agreeing as f64 / voters.len() as f64 * 100.0).round();

    // Ties go to the longer timeframe.
    let strongest = voters
        .iter()
        .max_by(|a, b| a.strength.total_cmp(&b.strength).then(a.timeframe.cmp(&b.timeframe)))
        .map(|a| a.timeframe);
    let weakest = voters
        .iter()
        .min_by(|a, b| a.strength.total_cmp(&b.strength).then(b.timeframe.cmp(&a.timeframe)))
        .map(|a| a.timeframe);

    let mut by_length = voters.clone();
    by_length.sort_by(|a, b| b.timeframe.cmp(&a.timeframe));
    let top_two = &by_length[..by_length.len().min(2)];
    let higher_timeframe_agreement = top_two.len() == 2
        && match overall_trend {
            TrendDirection::Bullish => top_two.iter().all(|a| a.momentum > 0.0),
            TrendDirection::Bearish => top_two.iter().all(|a| a.momentum < 0.0),
            TrendDirection::Neutral => false,
        };

    let recommendation = match overall_trend {
        TrendDirection::Bullish if alignment >= STRONG_ALIGNMENT && higher_timeframe_agreement => {
            Recommendation::StrongBuy
        }
        TrendDirection::Bullish if alignment >= MIN_ALIGNMENT => Recommendation::Buy,
        TrendDirection::Bearish if alignment >= STRONG_ALIGNMENT && higher_timeframe_agreement => {
            Recommendation::StrongSell
        }
        TrendDirection::Bearish if alignment >= MIN_ALIGNMENT => Recommendation::Sell,
        _ => Recommendation::Hold,
    };

    Confluence {
        overall_trend,
        alignment,
        bullish_count,
        bearish_count,
        neutral_count,
        bullish_weight,
        bearish_weight,
        strongest,
        weakest,
        entry_quality: alignment,
        higher_timeframe_agreement,
        recommendation,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tf(timeframe: Timeframe, trend: TrendDirection, momentum: f64, strength: f64) -> TimeframeAnalysis {
        TimeframeAnalysis {
            trend,
            momentum,
            strength,
            confidence: 80.0,
            candles: 100,
            ..TimeframeAnalysis::neutral(timeframe, 100)
        }
    }

    fn all(trend: TrendDirection, momentum: f64) -> Vec<TimeframeAnalysis> {
        Timeframe::ALL
            .iter()
            .map(|t| tf(*t, trend, momentum, 40.0))
            .collect()
    }

    #[test]
    fn unanimous_bullish_is_strong_buy() {
        let c = compute(&all(TrendDirection::Bullish, 30.0));
        assert_eq!(c.overall_trend, TrendDirection::Bullish);
        assert_eq!(c.alignment, 100.0);
        assert_eq!(c.recommendation, Recommendation::StrongBuy);
        assert!((c.bullish_weight - 1.0).abs() < 1e-9);
    }

    #[test]
    fn unanimous_bearish_without_momentum_is_plain_sell() {
        let c = compute(&all(TrendDirection::Bearish, 10.0));
        assert_eq!(c.alignment, 100.0);
        assert!(!c.higher_timeframe_agreement);
        assert_eq!(c.recommendation, Recommendation::Sell);
    }

    #[test]
    fn five_to_one_split() {
        let mut v = all(TrendDirection::Bullish, 20.0);
        v[0] = tf(Timeframe::M5, TrendDirection::Bearish, -20.0, 10.0);
        let c = compute(&v);
        assert_eq!(c.overall_trend, TrendDirection::Bullish);
        assert_eq!(c.alignment, 83.0);
        assert_eq!(c.recommendation, Recommendation::StrongBuy);
    }

    #[test]
    fn short_timeframes_cannot_outvote_long_ones() {
        // 5m + 15m + 1h bullish = 0.30 weight; 4h + 1d + 1w bearish = 0.70.
        let v: Vec<_> = Timeframe::ALL
            .iter()
            .map(|t| {
                if *t <= Timeframe::H1 {
                    tf(*t, TrendDirection::Bullish, 10.0, 20.0)
                } else {
                    tf(*t, TrendDirection::Bearish, -10.0, 20.0)
                }
            })
            .collect();
        let c = compute(&v);
        assert_eq!(c.overall_trend, TrendDirection::Bearish);
        assert_eq!(c.alignment, 50.0);
        assert_eq!(c.recommendation, Recommendation::Sell);
    }

    #[test]
    fn no_majority_is_hold() {
        let v: Vec<_> = Timeframe::ALL
            .iter()
            .map(|t| match t {
                Timeframe::W1 => tf(*t, TrendDirection::Bullish, 10.0, 20.0),
                Timeframe::D1 => tf(*t, TrendDirection::Bearish, -10.0, 20.0),
                _ => tf(*t, TrendDirection::Neutral, 0.0, 5.0),
            })
            .collect();
        let c = compute(&v);
        assert_eq!(c.overall_trend, TrendDirection::Neutral);
        assert_eq!(c.neutral_count, 4);
        assert_eq!(c.alignment, 67.0);
        assert_eq!(c.recommendation, Recommendation::Hold);
    }

    #[test]
    fn strongest_and_weakest() {
        let mut v = all(TrendDirection::Bullish, 20.0);
        v[2].strength = 90.0;
        v[4].strength = 1.0;
        let c = compute(&v);
        assert_eq!(c.strongest, Some(Timeframe::H1));
        assert_eq!(c.weakest, Some(Timeframe::D1));
    }

    #[test]
    fn timeframes_without_data_do_not_vote() {
        let v: Vec<_> = Timeframe::ALL
            .iter()
            .map(|t| TimeframeAnalysis::neutral(*t, 0))
            .collect();
        let c = compute(&v);
        assert_eq!(c.overall_trend, TrendDirection::Neutral);
        assert_eq!(c.alignment, 0.0);
        assert_eq!(c.neutral_count, 0);
        assert_eq!(c.recommendation, Recommendation::Hold);
        assert!(!c.has_data());
    }

    #[test]
    fn partial_data_renormalises_weights() {
        // Only 5m and 15m have candles: both bullish carry the whole vote.
        let v: Vec<_> = Timeframe::ALL
            .iter()
            .map(|t| {
                if *t <= Timeframe::M15 {
                    tf(*t, TrendDirection::Bullish, 10.0, 20.0)
                } else {
                    TimeframeAnalysis::neutral(*t, 3)
                }
            })
            .collect();
        let c = compute(&v);
        assert_eq!(c.overall_trend, TrendDirection::Bullish);
        assert!((c.bullish_weight - 1.0).abs() < 1e-9);
        assert_eq!(c.alignment, 100.0);
        assert_eq!(c.neutral_count, 0);
        assert_eq!(c.recommendation, Recommendation::StrongBuy);
    }

    #[test]
    fn empty_input_is_neutral() {
        let c = compute(&[]);
        assert_eq!(c.recommendation, Recommendation::Hold);
        assert_eq!(c.alignment, 0.0);
    }
}
