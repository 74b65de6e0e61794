// =============================================================================
// Order Book Depth — top-N bid/ask depth and imbalance from a REST snapshot
// =============================================================================

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::feeds::num;

/// Depth summary for one instrument.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DepthState {
    pub best_bid: f64,
    pub best_ask: f64,
    /// Quote-currency notional of the top-N bid levels.
    pub bid_depth: f64,
    pub ask_depth: f64,
    pub spread_bps: f64,
    /// (bid - ask) / (bid + ask) over the top-N levels, in [-1, 1].
    pub imbalance: f64,
    pub last_update_id: u64,
}

impl DepthState {
    pub fn new(best_bid: f64, best_ask: f64, bid_depth: f64, ask_depth: f64, update_id: u64) -> Self {
        let mid = (best_bid + best_ask) / 2.0;
        let spread_bps = if mid > 0.0 {
            ((best_ask - best_bid) / mid) * 10_000.0
        } else {
            0.0
        };

        let total_depth = bid_depth + ask_depth;
        let imbalance = if total_depth > 0.0 {
            (bid_depth - ask_depth) / total_depth
        } else {
            0.0
        };

        Self {
            best_bid,
            best_ask,
            bid_depth,
            ask_depth,
            spread_bps,
            imbalance,
            last_update_id: update_id,
        }
    }
}

/// Parse a Binance `/api/v3/depth` snapshot, summing the first `levels`
/// levels on each side.
///
/// ```json
/// { "lastUpdateId": 12345, "bids": [["37000.00", "1.5"]], "asks": [["37001.00", "1.2"]] }
/// ```
pub fn parse_depth(body: &serde_json::Value, levels: usize) -> Result<DepthState> {
    let update_id = body["lastUpdateId"]
        .as_u64()
        .context("missing field lastUpdateId")?;
    let bids = body["bids"].as_array().context("missing field bids")?;
    let asks = body["asks"].as_array().context("missing field asks")?;

    let side = |levels_json: &[serde_json::Value]| -> (f64, f64) {
        let best = levels_json.first().and_then(|l| num(&l[0])).unwrap_or(0.0);
        let notional = levels_json
            .iter()
            .take(levels)
            .filter_map(|l| Some(num(&l[0])? * num(&l[1])?))
            .sum();
        (best, notional)
    };

    let (best_bid, bid_depth) = side(bids);
    let (best_ask, ask_depth) = side(asks);

    if best_bid <= 0.0 || best_ask <= 0.0 {
        anyhow::bail!("depth snapshot has an empty side");
    }

    Ok(DepthState::new(best_bid, best_ask, bid_depth, ask_depth, update_id))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_and_sums_top_levels() {
        let body = json!({
            "lastUpdateId": 7,
            "bids": [["100.0", "3.0"], ["99.0", "1.0"], ["98.0", "50.0"]],
            "asks": [["101.0", "1.0"], ["102.0", "1.0"]]
        });
        let d = parse_depth(&body, 2).unwrap();
        assert_eq!(d.best_bid, 100.0);
        assert_eq!(d.best_ask, 101.0);
        assert!((d.bid_depth - 399.0).abs() < 1e-9);
        assert!((d.ask_depth - 203.0).abs() < 1e-9);
        assert!(d.imbalance > 0.0);
        assert_eq!(d.last_update_id, 7);
    }

    #[test]
    fn imbalance_and_spread() {
        let d = DepthState::new(99.0, 101.0, 300.0, 100.0, 1);
        assert!((d.imbalance - 0.5).abs() < 1e-9);
        assert!((d.spread_bps - 200.0).abs() < 1e-9);
    }

    #[test]
    fn rejects_empty_side() {
        let body = json!({ "lastUpdateId": 1, "bids": [], "asks": [["1.0", "1.0"]] });
        assert!(parse_depth(&body, 10).is_err());
    }
}
