// =============================================================================
// Average True Range (ATR) — Wilder's Smoothing Method
// =============================================================================
//
//   TR    = max(H - L, |H - prevClose|, |L - prevClose|)
//   ATR_0 = SMA of first `period` TR values
//   ATR_t = (ATR_{t-1} * (period - 1) + TR_t) / period
// =============================================================================

use crate::market_data::Candle;

/// Most recent ATR of `candles` (oldest first). Needs `period + 1` candles.
pub fn atr(candles: &[Candle], period: usize) -> Option<f64> {
    if period == 0 || candles.len() < period + 1 {
        return None;
    }

    let mut true_ranges = candles.windows(2).map(|w| {
        let (prev, cur) = (&w[0], &w[1]);
        (cur.high - cur.low)
            .max((cur.high - prev.close).abs())
            .max((cur.low - prev.close).abs())
    });

    let n = period as f64;
    let seed = true_ranges.by_ref().take(period).sum::<f64>() / n;
    let value = true_ranges.fold(seed, |prev, tr| (prev * (n - 1.0) + tr) / n);

    value.is_finite().then_some(value)
}

/// ATR as a percentage of the last close.
pub fn atr_pct(candles: &[Candle], period: usize) -> Option<f64> {
    let value = atr(candles, period)?;
    let last_close = candles.last()?.close;
    if last_close == 0.0 {
        return None;
    }
    Some(value / last_close * 100.0)
}
