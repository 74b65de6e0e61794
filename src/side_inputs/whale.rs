// =============================================================================
// Whale Flow — large aggressive trades split into accumulation / distribution
// =============================================================================
//
// A trade counts as whale flow when its notional reaches the configured
// threshold.  Taker buys accumulate, taker sells distribute.  Binance flags
// taker sells with `m = true` (the buyer was the maker).

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::feeds::num;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WhaleFlow {
    /// Quote notional of large taker buys.
    pub accumulation: f64,
    /// Quote notional of large taker sells.
    pub distribution: f64,
    pub large_trades: u32,
    pub trades_seen: u32,
}

impl WhaleFlow {
    /// Accumulation share in [0, 1], `None` without any whale trade.
    pub fn accumulation_ratio(&self) -> Option<f64> {
        let total = self.accumulation + self.distribution;
        (total > 0.0).then(|| self.accumulation / total)
    }
}

/// Parse a Binance `/api/v3/aggTrades` response.
///
/// ```json
/// [{ "a": 1, "p": "37000.0", "q": "5.0", "T": 1700000000000, "m": false }]
/// ```
pub fn parse_agg_trades(body: &serde_json::Value, threshold_usd: f64) -> Result<WhaleFlow> {
    let trades = body.as_array().context("aggTrades response is not an array")?;

    let mut flow = WhaleFlow::default();
    for trade in trades {
        let (Some(price), Some(qty)) = (num(&trade["p"]), num(&trade["q"])) else {
            continue;
        };
        flow.trades_seen += 1;

        let notional = price * qty;
        if notional < threshold_usd {
            continue;
        }
        flow.large_trades += 1;
        if trade["m"].as_bool().unwrap_or(false) {
            flow.distribution += notional;
        } else {
            flow.accumulation += notional;
        }
    }

    Ok(flow)
}
