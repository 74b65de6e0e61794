// =============================================================================
// Exponential Moving Average (EMA)
// =============================================================================
//
//   multiplier = 2 / (period + 1)
//   EMA_t      = close_t * multiplier + EMA_{t-1} * (1 - multiplier)
//
// Seeded with the SMA of the first `period` closes.
// =============================================================================

/// Most recent EMA value of `closes` for `period`.
///
/// Returns `None` when `period` is zero, the input is shorter than the
/// period, or the series turns non-finite.
pub fn ema(closes: &[f64], period: usize) -> Option<f64> {
    if period == 0 || closes.len() < period {
        return None;
    }

    let k = 2.0 / (period as f64 + 1.0);
    let seed = closes[..period].iter().sum::<f64>() / period as f64;

    let value = closes[period..]
        .iter()
        .fold(seed, |prev, &close| close * k + prev * (1.0 - k));

    value.is_finite().then_some(value)
}

/// Signed divergence of the fast EMA from the slow EMA, in percent of the
/// slow EMA. With fewer closes than `slow`, the slow EMA spans every close
/// available, so young series still get a read.
pub fn ema_divergence_pct(closes: &[f64], fast: usize, slow: usize) -> Option<f64> {
    let slow = slow.min(closes.len());
    if slow <= fast {
        return None;
    }
    let fast_ema = ema(closes, fast)?;
    let slow_ema = ema(closes, slow)?;
    if slow_ema == 0.0 {
        return None;
    }
    let div = (fast_ema - slow_ema) / slow_ema * 100.0;
    div.is_finite().then_some(div)
}

// =============================================================================
// Unit Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn guards() {
        assert_eq!(ema(&[], 5), None);
        assert_eq!(ema(&[1.0, 2.0, 3.0], 0), None);
        assert_eq!(ema(&[1.0, 2.0], 5), None);
    }

    #[test]
    fn period_equal_to_length_is_the_sma() {
        assert!((ema(&[2.0, 4.0, 6.0], 3).unwrap() - 4.0).abs() < 1e-10);
    }

    #[test]
    fn known_values() {
        // SMA seed of 1..=5 is 3.0, multiplier 1/3, then 6..=10.
        let closes: Vec<f64> = (1..=10).map(f64::from).collect();
        let mut expected = 3.0;
        for c in 6..=10 {
            expected = c as f64 / 3.0 + expected * 2.0 / 3.0;
        }
        assert!((ema(&closes, 5).unwrap() - expected).abs() < 1e-10);
    }

    #[test]
    fn nan_poisons_the_series() {
        assert_eq!(ema(&[1.0, 2.0, 3.0, f64::NAN, 5.0], 3), None);
    }

    #[test]
    fn divergence_sign_follows_trend() {
        let up: Vec<f64> = (1..=100).map(f64::from).collect();
        let down: Vec<f64> = up.iter().rev().copied().collect();
        assert!(ema_divergence_pct(&up, 20, 50).unwrap() > 1.0);
        assert!(ema_divergence_pct(&down, 20, 50).unwrap() < -1.0);
        assert!(ema_divergence_pct(&[100.0; 60], 20, 50).unwrap().abs() < 1e-10);
    }

    #[test]
    fn divergence_with_short_history() {
        let closes: Vec<f64> = (1..=30).map(f64::from).collect();
        assert!(ema_divergence_pct(&closes, 20, 50).unwrap() > 0.0);
        assert_eq!(ema_divergence_pct(&closes[..20], 20, 50), None);
    }
}
