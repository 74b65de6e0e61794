// =============================================================================
// Funding Rate — contrarian signal from perpetual futures funding
// =============================================================================
//
// Contrarian logic:
//   rate > +0.05%  =>  signal = -0.8  (overleveraged longs, expect dump)
//   rate > +0.03%  =>  signal = -0.4  (moderate long bias)
//   rate < -0.05%  =>  signal = +0.9  (extreme short squeeze setup)
//   rate < -0.03%  =>  signal = +0.5  (shorts paying, mild bullish)
//   |rate| > 0.01% =>  small lean toward the paying side
//   otherwise      =>  signal =  0.0  (neutral)

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::feeds::num;
use crate::types::TrendDirection;

/// Latest funding rate and its derived signal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FundingState {
    /// Raw funding rate as a decimal (e.g. 0.0001 = 0.01%).
    pub rate: f64,

    pub rate_pct: f64,

    /// Contrarian signal in [-1.0, +1.0].
    pub signal: f64,

    pub bias: TrendDirection,

    /// Timestamp (ms) of the funding event the rate belongs to.
    pub funding_time: i64,

    pub interpretation: String,
}

impl FundingState {
    pub fn from_rate(rate: f64, funding_time: i64) -> Self {
        let rate_pct = rate * 100.0;
        let (signal, bias, interpretation) = interpret(rate_pct);
        Self {
            rate,
            rate_pct,
            signal,
            bias,
            funding_time,
            interpretation: interpretation.to_string(),
        }
    }
}

fn interpret(rate_pct: f64) -> (f64, TrendDirection, &'static str) {
    if rate_pct > 0.05 {
        (
            -0.8,
            TrendDirection::Bearish,
            "Extreme positive funding - overleveraged longs, contrarian short",
        )
    } else if rate_pct > 0.03 {
        (
            -0.4,
            TrendDirection::Bearish,
            "Elevated positive funding - moderate contrarian short",
        )
    } else if rate_pct < -0.05 {
        (
            0.9,
            TrendDirection::Bullish,
            "Extreme negative funding - short squeeze likely, contrarian long",
        )
    } else if rate_pct < -0.03 {
        (
            0.5,
            TrendDirection::Bullish,
            "Elevated negative funding - shorts paying, contrarian long",
        )
    } else if rate_pct > 0.01 {
        (-0.1, TrendDirection::Neutral, "Slightly positive funding - normal conditions")
    } else if rate_pct < -0.01 {
        (0.2, TrendDirection::Neutral, "Slightly negative funding - mild bullish lean")
    } else {
        (0.0, TrendDirection::Neutral, "Neutral funding rate - no signal")
    }
}

/// Parse a Binance `/fapi/v1/fundingRate?limit=1` response.
///
/// ```json
/// [{ "symbol": "BTCUSDT", "fundingRate": "0.00010000", "fundingTime": 1700000000000 }]
/// ```
pub fn parse_funding(body: &serde_json::Value) -> Result<FundingState> {
    let entry = body
        .as_array()
        .context("funding rate response is not an array")?
        .last()
        .context("funding rate response array is empty")?;

    let rate = num(&entry["fundingRate"]).context("missing or non-numeric fundingRate")?;
    let funding_time = entry["fundingTime"].as_i64().unwrap_or(0);

    Ok(FundingState::from_rate(rate, funding_time))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn contrarian_table() {
        assert_eq!(FundingState::from_rate(0.0006, 0).signal, -0.8);
        assert_eq!(FundingState::from_rate(0.0004, 0).signal, -0.4);
        assert_eq!(FundingState::from_rate(-0.0006, 0).signal, 0.9);
        assert_eq!(FundingState::from_rate(-0.0004, 0).signal, 0.5);
        assert_eq!(FundingState::from_rate(0.0002, 0).signal, -0.1);
        assert_eq!(FundingState::from_rate(-0.0002, 0).signal, 0.2);
        let neutral = FundingState::from_rate(0.0001, 0);
        assert_eq!(neutral.signal, 0.0);
        assert_eq!(neutral.bias, TrendDirection::Neutral);
    }

    #[test]
    fn parses_binance_payload() {
        let body = json!([{ "symbol": "BTCUSDT", "fundingRate": "-0.00060000", "fundingTime": 1_700_000_000_000i64 }]);
        let state = parse_funding(&body).unwrap();
        assert!((state.rate_pct + 0.06).abs() < 1e-9);
        assert_eq!(state.bias, TrendDirection::Bullish);
        assert_eq!(state.funding_time, 1_700_000_000_000);
    }

    #[test]
    fn rejects_empty_array() {
        assert!(parse_funding(&json!([])).is_err());
        assert!(parse_funding(&json!({"code": -1121})).is_err());
    }
}
