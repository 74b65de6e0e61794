// =============================================================================
// Market Condition Analyzer — snapshot + side inputs -> metrics + regime
// =============================================================================

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use anyhow::Result;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::detector::{classify, RegimeChangeEvent, RegimeCharacteristics, RegimeTracker};
use super::metrics::{self, MarketMetrics};
use crate::aggregator::{SourceAggregator, Ticker};
use crate::events::{Event, EventBus};
use crate::runtime_config::MarketSettings;
use crate::side_inputs::{SideInputStore, SideInputs};

/// Volumes kept per instrument for the trailing-average baseline.
const VOLUME_BASELINE_LEN: usize = 20;

/// Payload of `market:update`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketUpdate {
    pub symbol: String,
    pub metrics: MarketMetrics,
    pub regime: RegimeCharacteristics,
}

struct SymbolState {
    tracker: RegimeTracker,
    volumes: VecDeque<f64>,
    latest: Option<MarketUpdate>,
}

impl SymbolState {
    fn baseline(&self) -> Option<f64> {
        (!self.volumes.is_empty()).then(|| self.volumes.iter().sum::<f64>() / self.volumes.len() as f64)
    }
}

pub struct MarketConditionAnalyzer {
    aggregator: Arc<SourceAggregator>,
    side_inputs: Arc<SideInputStore>,
    symbols: Mutex<HashMap<String, SymbolState>>,
    settings: MarketSettings,
}

impl MarketConditionAnalyzer {
    pub fn new(
        aggregator: Arc<SourceAggregator>,
        side_inputs: Arc<SideInputStore>,
        settings: MarketSettings,
    ) -> Self {
        Self {
            aggregator,
            side_inputs,
            symbols: Mutex::new(HashMap::new()),
            settings,
        }
    }

    /// Current metrics for `symbol` without recording anything.
    pub fn metrics(&self, symbol: &str) -> MarketMetrics {
        let ticker = self.aggregator.snapshot(symbol);
        let inputs = self.side_inputs.get(symbol);
        let baseline = self.symbols.lock().get(symbol).and_then(SymbolState::baseline);
        metrics::compute(symbol, ticker.as_deref(), &inputs, baseline, Utc::now())
    }

    /// Full analysis of `symbol` from the live snapshot and side inputs.
    /// Fails when the instrument has no fresh snapshot.
    pub fn analyze(&self, symbol: &str) -> Result<(MarketUpdate, Option<RegimeChangeEvent>)> {
        let ticker = self
            .aggregator
            .snapshot(symbol)
            .ok_or_else(|| anyhow::anyhow!("no fresh snapshot for {symbol}"))?;
        let inputs = self.side_inputs.get(symbol);
        Ok(self.analyze_with(symbol, Some(&ticker), &inputs, Utc::now()))
    }

    /// Analysis from explicit inputs; records history and the volume baseline.
    pub fn analyze_with(
        &self,
        symbol: &str,
        ticker: Option<&Ticker>,
        inputs: &SideInputs,
        at: DateTime<Utc>,
    ) -> (MarketUpdate, Option<RegimeChangeEvent>) {
        let mut map = self.symbols.lock();
        let state = map.entry(symbol.to_string()).or_insert_with(|| SymbolState {
            tracker: RegimeTracker::new(
                self.settings.regime_history_len,
                self.settings.regime_change_min_confidence,
            ),
            volumes: VecDeque::with_capacity(VOLUME_BASELINE_LEN),
            latest: None,
        });

        let metrics = metrics::compute(symbol, ticker, inputs, state.baseline(), at);
        if let Some(t) = ticker {
            state.volumes.push_back(t.volume);
            while state.volumes.len() > VOLUME_BASELINE_LEN {
                state.volumes.pop_front();
            }
        }

        let (regime, confidence) = classify(&metrics.scores, metrics.composite);
        let (characteristics, event) = state.tracker.observe(symbol, regime, confidence, at);

        debug!(
            symbol,
            composite = format!("{:.1}", metrics.composite),
            regime = %regime,
            confidence = format!("{:.1}", confidence),
            "market analysed"
        );

        let update = MarketUpdate {
            symbol: symbol.to_string(),
            metrics,
            regime: characteristics,
        };
        state.latest = Some(update.clone());
        (update, event)
    }

    pub fn latest(&self, symbol: &str) -> Option<MarketUpdate> {
        self.symbols.lock().get(symbol).and_then(|s| s.latest.clone())
    }

    /// Analyse every instrument with a snapshot and publish the results.
    /// Returns the number of instruments analysed.
    pub fn run_cycle(&self, bus: &EventBus) -> usize {
        let mut analysed = 0;
        for ticker in self.aggregator.snapshots() {
            let inputs = self.side_inputs.get(&ticker.symbol);
            let (update, event) = self.analyze_with(&ticker.symbol, Some(&ticker), &inputs, Utc::now());
            bus.publish(Event::MarketUpdate(update));
            if let Some(event) = event {
                bus.publish(Event::RegimeChange(event));
            }
            analysed += 1;
        }
        analysed
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregator::Microstructure;
    use crate::events::Topic;
    use crate::feeds::RawReading;
    use crate::regime::MarketRegime;
    use crate::side_inputs::{SentimentReading, WhaleFlow};
    use std::time::Duration;

    fn analyzer() -> MarketConditionAnalyzer {
        let aggregator = Arc::new(SourceAggregator::with_clients(Vec::new(), vec!["BTC".into()], 30_000, 120));
        MarketConditionAnalyzer::new(
            aggregator,
            Arc::new(SideInputStore::new(Duration::from_secs(900))),
            MarketSettings::default(),
        )
    }

    fn ticker(high: f64, low: f64, velocity: f64) -> Ticker {
        Ticker {
            symbol: "BTC".into(),
            price: 100.0,
            volume: 500.0,
            high_24h: high,
            low_24h: low,
            bid: None,
            ask: None,
            change_24h_pct: None,
            price_velocity_pct: velocity,
            sources: vec!["a".into(), "b".into()],
            data_quality: 90.0,
            price_confidence: 95.0,
            smart_money_flow: 0.6,
            microstructure: Microstructure::default(),
            timestamp_ms: 0,
        }
    }

    #[test]
    fn volatile_market_publishes_regime_change_once() {
        let a = analyzer();
        let t = ticker(115.0, 90.0, 2.5);
        let inputs = SideInputs::default();

        let (u, ev) = a.analyze_with("BTC", Some(&t), &inputs, Utc::now());
        assert_eq!(u.regime.regime, MarketRegime::HighVolatility);
        assert!(ev.is_some());

        let (_, ev) = a.analyze_with("BTC", Some(&t), &inputs, Utc::now());
        assert!(ev.is_none());
        assert!(a.latest("BTC").is_some());
    }

    #[test]
    fn bullish_agreement_classifies_bull() {
        let a = analyzer();
        let t = ticker(103.0, 99.0, 0.3);
        let inputs = SideInputs {
            sentiment: Some(SentimentReading { value: 85.0, classification: "Extreme Greed".into() }),
            whale: Some(WhaleFlow { accumulation: 9e6, distribution: 1e6, large_trades: 10, trades_seen: 100 }),
            funding: Some(crate::side_inputs::FundingState::from_rate(-0.0006, 0)),
            orderbook: Some(crate::side_inputs::DepthState::new(99.9, 100.1, 900.0, 100.0, 1)),
        };
        let (u, _) = a.analyze_with("BTC", Some(&t), &inputs, Utc::now());
        assert!(u.metrics.composite >= 60.0, "composite {}", u.metrics.composite);
        assert_eq!(u.regime.regime, MarketRegime::BullTrending);
    }

    #[test]
    fn analyze_requires_snapshot() {
        let a = analyzer();
        assert!(a.analyze("BTC").is_err());
        let m = a.metrics("BTC");
        assert!(m.price.is_none());
    }

    #[test]
    fn run_cycle_publishes_market_updates() {
        let a = analyzer();
        let bus = EventBus::new();
        let mut sub = bus.subscribe(&[Topic::MarketUpdate]);

        a.aggregator.record_reading(RawReading {
            source: "x".into(),
            symbol: "BTC".into(),
            price: 100.0,
            volume: 1.0,
            high_24h: None,
            low_24h: None,
            bid: None,
            ask: None,
            change_24h_pct: None,
            timestamp_ms: crate::types::now_ms(),
        });
        // "x" has no configured weight, so nothing is fused or published.
        a.aggregator.fuse_all();
        assert_eq!(a.run_cycle(&bus), 0);
        assert!(sub.try_recv().is_none());
    }
}
