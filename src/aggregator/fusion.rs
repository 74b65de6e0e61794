// =============================================================================
// Cross-Source Fusion — one confidence-scored Ticker from N fresh readings
// =============================================================================
//
// Pure function of its inputs; the aggregator decides which readings are
// fresh and owns all shared state.
//
//   price        Σ wᵢ·pᵢ / Σ wᵢ over contributing sources (static weights)
//   high / low   max of highs / min of lows, else price ± 2 %
//   bid / ask    best bid (max) / best ask (min); if that crosses, the
//                heaviest source quoting both sides is used instead
//   quality      source count (60 %) + connected-source ratio (40 %)
//   confidence   stepped on the coefficient of variation of source prices
//   smart money  top-tier volume / total volume
// =============================================================================

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::feeds::RawReading;
use crate::types::{clamp_score, remap, SourceTier};

/// Fallback band for high/low when no source reports them.
const HIGH_LOW_FALLBACK_PCT: f64 = 0.02;

/// Price confidence assigned when a single source cannot be cross-checked.
const SINGLE_SOURCE_CONFIDENCE: f64 = 60.0;

/// Static per-source fusion parameters.
#[derive(Debug, Clone, Copy)]
pub struct SourceMeta {
    pub weight: f64,
    pub tier: SourceTier,
}

/// Spread / pressure / depth proxies derived from the fused quote.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Microstructure {
    /// (ask - bid) / mid in basis points. Zero when no quote is available.
    pub spread_bps: f64,
    /// Where the fused price sits inside the spread, in [-1, 1]: +1 at the
    /// ask (buyers lifting), -1 at the bid.
    pub imbalance: f64,
    /// Quote-volume depth proxy penalised by spread, in [0, 100].
    pub liquidity_score: f64,
}

/// Fused cross-source view of one instrument.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Ticker {
    pub symbol: String,
    pub price: f64,
    /// Sum of 24h base volume across contributing sources.
    pub volume: f64,
    pub high_24h: f64,
    pub low_24h: f64,
    pub bid: Option<f64>,
    pub ask: Option<f64>,
    /// Weighted 24h change across sources that report one.
    pub change_24h_pct: Option<f64>,
    /// Fused price change over the aggregator's velocity window, in percent.
    pub price_velocity_pct: f64,
    pub sources: Vec<String>,
    pub data_quality: f64,
    pub price_confidence: f64,
    /// Fraction of volume from top-tier sources, in [0, 1].
    pub smart_money_flow: f64,
    pub microstructure: Microstructure,
    pub timestamp_ms: i64,
}

impl Ticker {
    pub fn range_pct(&self) -> f64 {
        if self.price > 0.0 {
            (self.high_24h - self.low_24h).max(0.0) / self.price * 100.0
        } else {
            0.0
        }
    }
}

/// Inputs of one fusion step besides the readings themselves.
#[derive(Debug, Clone, Copy)]
pub struct FusionContext {
    /// Connected sources / configured sources, in [0, 1].
    pub connected_ratio: f64,
    /// Fused price at the start of the velocity window, if known.
    pub reference_price: Option<f64>,
    pub now_ms: i64,
}

/// Fuse fresh readings of one instrument. Returns `None` when no reading
/// carries a positive weight.
pub fn fuse(
    symbol: &str,
    readings: &[RawReading],
    meta: &HashMap<String, SourceMeta>,
    ctx: FusionContext,
) -> Option<Ticker> {
    let weighted: Vec<(&RawReading, SourceMeta)> = readings
        .iter()
        .filter(|r| r.price > 0.0 && r.price.is_finite())
        .filter_map(|r| meta.get(&r.source).map(|m| (r, *m)))
        .filter(|(_, m)| m.weight > 0.0)
        .collect();

    if weighted.is_empty() {
        return None;
    }

    // --- Price ---------------------------------------------------------------
    let total_weight: f64 = weighted.iter().map(|(_, m)| m.weight).sum();
    let price = weighted.iter().map(|(r, m)| r.price * m.weight).sum::<f64>() / total_weight;

    // --- Volume / high / low ------------------------------------------------
    let volume: f64 = weighted.iter().map(|(r, _)| r.volume.max(0.0)).sum();

    let high_24h = weighted
        .iter()
        .filter_map(|(r, _)| r.high_24h)
        .fold(None, |acc: Option<f64>, h| Some(acc.map_or(h, |a| a.max(h))))
        .unwrap_or(price * (1.0 + HIGH_LOW_FALLBACK_PCT));

    let low_24h = weighted
        .iter()
        .filter_map(|(r, _)| r.low_24h)
        .fold(None, |acc: Option<f64>, l| Some(acc.map_or(l, |a| a.min(l))))
        .unwrap_or(price * (1.0 - HIGH_LOW_FALLBACK_PCT));

    // --- Quote ---------------------------------------------------------------
    let (bid, ask) = best_quote(&weighted);

    // --- 24h change ----------------------------------------------------------
    let change_24h_pct = {
        let (num, den) = weighted
            .iter()
            .filter_map(|(r, m)| r.change_24h_pct.map(|c| (c * m.weight, m.weight)))
            .fold((0.0, 0.0), |(n, d), (cn, cd)| (n + cn, d + cd));
        (den > 0.0).then(|| num / den)
    };

    let price_velocity_pct = match ctx.reference_price {
        Some(reference) if reference > 0.0 => (price - reference) / reference * 100.0,
        _ => 0.0,
    };

    let prices: Vec<f64> = weighted.iter().map(|(r, _)| r.price).collect();
    let mut sources: Vec<String> = weighted.iter().map(|(r, _)| r.source.clone()).collect();
    sources.sort();

    Some(Ticker {
        symbol: symbol.to_string(),
        price,
        volume,
        high_24h,
        low_24h,
        bid,
        ask,
        change_24h_pct,
        price_velocity_pct,
        data_quality: data_quality(sources.len(), ctx.connected_ratio),
        price_confidence: price_confidence(&prices),
        smart_money_flow: smart_money_flow(&weighted),
        microstructure: microstructure(price, volume, bid, ask),
        sources,
        timestamp_ms: ctx.now_ms,
    })
}

fn best_quote(weighted: &[(&RawReading, SourceMeta)]) -> (Option<f64>, Option<f64>) {
    let bid = weighted
        .iter()
        .filter_map(|(r, _)| r.bid)
        .fold(None, |acc: Option<f64>, b| Some(acc.map_or(b, |a| a.max(b))));
    let ask = weighted
        .iter()
        .filter_map(|(r, _)| r.ask)
        .fold(None, |acc: Option<f64>, a| Some(acc.map_or(a, |x| x.min(a))));

    match (bid, ask) {
        (Some(b), Some(a)) if b >= a => {
            // Crossed across venues: trust the heaviest two-sided quote.
            weighted
                .iter()
                .filter_map(|(r, m)| match (r.bid, r.ask) {
                    (Some(b), Some(a)) if b < a => Some((m.weight, b, a)),
                    _ => None,
                })
                .max_by(|x, y| x.0.total_cmp(&y.0))
                .map_or((None, None), |(_, b, a)| (Some(b), Some(a)))
        }
        other => other,
    }
}

/// Source count (saturating at five sources) blended with the share of
/// configured sources currently connected.
pub fn data_quality(source_count: usize, connected_ratio: f64) -> f64 {
    let count_component = (source_count.min(5) as f64 / 5.0) * 100.0;
    let ratio_component = connected_ratio.clamp(0.0, 1.0) * 100.0;
    clamp_score(count_component * 0.6 + ratio_component * 0.4)
}

/// Stepped confidence from the coefficient of variation of source prices.
pub fn price_confidence(prices: &[f64]) -> f64 {
    if prices.len() < 2 {
        return SINGLE_SOURCE_CONFIDENCE;
    }
    let n = prices.len() as f64;
    let mean = prices.iter().sum::<f64>() / n;
    if mean <= 0.0 {
        return 0.0;
    }
    let variance = prices.iter().map(|p| (p - mean).powi(2)).sum::<f64>() / n;
    let cv = variance.sqrt() / mean;

    if cv < 0.0005 {
        100.0
    } else if cv < 0.001 {
        95.0
    } else if cv < 0.0025 {
        85.0
    } else if cv < 0.005 {
        70.0
    } else if cv < 0.01 {
        50.0
    } else {
        25.0
    }
}

fn smart_money_flow(weighted: &[(&RawReading, SourceMeta)]) -> f64 {
    let total: f64 = weighted.iter().map(|(r, _)| r.volume.max(0.0)).sum();
    if total <= 0.0 {
        return 0.5;
    }
    let top: f64 = weighted
        .iter()
        .filter(|(_, m)| m.tier.is_top_tier())
        .map(|(r, _)| r.volume.max(0.0))
        .sum();
    (top / total).clamp(0.0, 1.0)
}

fn microstructure(price: f64, volume: f64, bid: Option<f64>, ask: Option<f64>) -> Microstructure {
    let (spread_bps, imbalance) = match (bid, ask) {
        (Some(b), Some(a)) if a > b => {
            let mid = (a + b) / 2.0;
            let half = (a - b) / 2.0;
            ((a - b) / mid * 10_000.0, ((price - mid) / half).clamp(-1.0, 1.0))
        }
        _ => (0.0, 0.0),
    };

    let quote_volume = volume * price;
    let depth = if quote_volume > 0.0 {
        remap(quote_volume.log10(), 4.0, 10.0, 0.0, 100.0)
    } else {
        0.0
    };
    let penalty = spread_bps.min(50.0) * 0.5;

    Microstructure {
        spread_bps,
        imbalance,
        liquidity_score: clamp_score(depth - penalty),
    }
}
