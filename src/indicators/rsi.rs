// =============================================================================
// Relative Strength Index (RSI) — Wilder's Smoothing
// =============================================================================
//
// Seed average gain / loss with the SMA of the first `period` deltas, then:
//   avg = (prev_avg * (period - 1) + current) / period
//   RSI = 100 - 100 / (1 + avg_gain / avg_loss)
// =============================================================================

/// Most recent RSI value in [0, 100].
///
/// # Edge cases
/// - `period == 0` or fewer than `period + 1` closes => `None`
/// - no movement at all => 50.0
/// - only gains => 100.0
pub fn rsi(closes: &[f64], period: usize) -> Option<f64> {
    if period == 0 || closes.len() < period + 1 {
        return None;
    }

    let split = |d: f64| if d > 0.0 { (d, 0.0) } else { (0.0, -d) };
    let n = period as f64;

    let mut deltas = closes.windows(2).map(|w| w[1] - w[0]);

    let (mut avg_gain, mut avg_loss) = deltas
        .by_ref()
        .take(period)
        .map(split)
        .fold((0.0, 0.0), |(g, l), (dg, dl)| (g + dg / n, l + dl / n));

    for d in deltas {
        let (g, l) = split(d);
        avg_gain = (avg_gain * (n - 1.0) + g) / n;
        avg_loss = (avg_loss * (n - 1.0) + l) / n;
    }

    let value = if avg_gain == 0.0 && avg_loss == 0.0 {
        50.0
    } else if avg_loss == 0.0 {
        100.0
    } else {
        100.0 - 100.0 / (1.0 + avg_gain / avg_loss)
    };

    value.is_finite().then_some(value)
}

/// RSI remapped from [0, 100] to a signed momentum in [-100, 100].
pub fn rsi_momentum(closes: &[f64], period: usize) -> Option<f64> {
    rsi(closes, period).map(|v| (v - 50.0) * 2.0)
}
