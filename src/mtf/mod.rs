// =============================================================================
// Multi-Timeframe Analysis
// =============================================================================
//
// Runs the single-timeframe analysis over the 5m..1w pyramid from the candle
// store and derives cross-timeframe confluence.  The latest report per
// instrument is kept for the API and the decision cycle.
// =============================================================================

pub mod confluence;
pub mod timeframe;

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::debug;

pub use confluence::{Confluence, Recommendation};
pub use timeframe::{TimeframeAnalysis, VolumeCharacter};

use crate::market_data::{CandleBuffer, CandleKey};
use crate::types::Timeframe;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MtfReport {
    pub symbol: String,
    pub timeframes: Vec<TimeframeAnalysis>,
    pub confluence: Confluence,
    pub analyzed_at: DateTime<Utc>,
}

pub struct MultiTimeframeAnalyzer {
    candles: Arc<CandleBuffer>,
    lookback: usize,
    latest: RwLock<HashMap<String, MtfReport>>,
}

impl MultiTimeframeAnalyzer {
    pub fn new(candles: Arc<CandleBuffer>, lookback: usize) -> Self {
        Self {
            candles,
            lookback: lookback.max(timeframe::MIN_CANDLES),
            latest: RwLock::new(HashMap::new()),
        }
    }

    /// Analyse all six timeframes of `symbol` and remember the report.
    pub fn analyze(&self, symbol: &str) -> MtfReport {
        let timeframes: Vec<TimeframeAnalysis> = Timeframe::ALL
            .iter()
            .map(|tf| {
                let candles = self
                    .candles
                    .get_closed(&CandleKey::new(symbol, *tf), self.lookback);
                timeframe::analyze(*tf, &candles)
            })
            .collect();

        let confluence = confluence::compute(&timeframes);

        debug!(
            symbol,
            trend = %confluence.overall_trend,
            alignment = confluence.alignment,
            recommendation = ?confluence.recommendation,
            "confluence computed"
        );

        let report = MtfReport {
            symbol: symbol.to_string(),
            timeframes,
            confluence,
            analyzed_at: Utc::now(),
        };
        self.latest.write().insert(symbol.to_string(), report.clone());
        report
    }

    pub fn latest(&self, symbol: &str) -> Option<MtfReport> {
        self.latest.read().get(symbol).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::market_data::Candle;
    use crate::types::TrendDirection;

    #[test]
    fn empty_store_gives_neutral_report() {
        let mtf = MultiTimeframeAnalyzer::new(Arc::new(CandleBuffer::new(200)), 200);
        let r = mtf.analyze("BTC");
        assert_eq!(r.timeframes.len(), 6);
        assert!(r.timeframes.iter().all(|t| t.confidence == 0.0));
        assert_eq!(r.confluence.overall_trend, TrendDirection::Neutral);
        assert_eq!(r.confluence.alignment, 0.0);
        assert_eq!(r.confluence.recommendation, Recommendation::Hold);
        assert!(mtf.latest("BTC").is_some());
    }

    #[test]
    fn rising_pyramid_agrees() {
        let buffer = Arc::new(CandleBuffer::new(200));
        for tf in Timeframe::ALL {
            let candles = (0..120)
                .map(|i| {
                    let c = 100.0 * 1.01f64.powi(i);
                    Candle::new(i as i64, c, c * 1.005, c * 0.995, c, 5.0, i as i64 + 1)
                })
                .collect();
            buffer.merge(CandleKey::new("ETH", tf), candles);
        }
        let mtf = MultiTimeframeAnalyzer::new(buffer, 200);
        let r = mtf.analyze("ETH");
        assert_eq!(r.confluence.overall_trend, TrendDirection::Bullish);
        assert_eq!(r.confluence.alignment, 100.0);
        assert_eq!(r.confluence.recommendation, Recommendation::StrongBuy);
        let weekly = r.timeframes.iter().find(|a| a.timeframe == Timeframe::W1).unwrap();
        assert_eq!(weekly.trend, TrendDirection::Bullish);
    }
}
