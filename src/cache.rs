// =============================================================================
// Feature Cache — per-instrument computed features with TTL
// =============================================================================
//
// Each entry carries its own TTL (default 60 s).  Expiry is lazy on read:
// `get` treats an expired entry as absent and counts a miss, but leaves it in
// place.  Only the periodic `sweep` removes expired entries.
//
// `set` evicts exactly one entry, the one with the oldest timestamp, and only
// when a new key arrives at capacity.  `update` merges the indicator,
// timeframe and quality maps key-by-key and refreshes the timestamp.
// =============================================================================

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::aggregator::Ticker;
use crate::mtf::{MtfReport, Recommendation, TimeframeAnalysis};
use crate::side_inputs::SideInputs;
use crate::types::{now_ms, TrendDirection};

// =============================================================================
// Types
// =============================================================================

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OrderFlow {
    pub book_imbalance: Option<f64>,
    pub spread_bps: Option<f64>,
    pub smart_money_flow: Option<f64>,
    pub whale_accumulation_ratio: Option<f64>,
    pub funding_rate_pct: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatternSummary {
    pub trend: TrendDirection,
    pub alignment: f64,
    pub recommendation: Recommendation,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CachedFeatures {
    pub symbol: String,
    /// Keyed by timeframe label (`5m` .. `1w`).
    pub timeframes: HashMap<String, TimeframeAnalysis>,
    pub indicators: HashMap<String, f64>,
    pub order_flow: Option<OrderFlow>,
    pub sentiment: Option<f64>,
    pub pattern: Option<PatternSummary>,
    pub quality: HashMap<String, f64>,
    /// Last write (epoch ms).
    pub updated_at_ms: i64,
}

/// Partial write merged into an existing entry.
#[derive(Debug, Clone, Default)]
pub struct FeatureUpdate {
    pub timeframes: HashMap<String, TimeframeAnalysis>,
    pub indicators: HashMap<String, f64>,
    pub order_flow: Option<OrderFlow>,
    pub sentiment: Option<f64>,
    pub pattern: Option<PatternSummary>,
    pub quality: HashMap<String, f64>,
}

impl FeatureUpdate {
    /// Features of one instrument from its confluence report, snapshot and
    /// side inputs.
    pub fn from_analysis(report: &MtfReport, ticker: Option<&Ticker>, inputs: &SideInputs) -> Self {
        let mut indicators = HashMap::new();
        let mut timeframes = HashMap::new();
        for tf in &report.timeframes {
            let label = tf.timeframe.as_str();
            indicators.insert(format!("momentum_{label}"), tf.momentum);
            indicators.insert(format!("volatility_{label}"), tf.volatility);
            indicators.insert(format!("strength_{label}"), tf.strength);
            timeframes.insert(label.to_string(), tf.clone());
        }

        let mut quality = HashMap::new();
        quality.insert("confluence_alignment".to_string(), report.confluence.alignment);
        if let Some(t) = ticker {
            indicators.insert("price".to_string(), t.price);
            indicators.insert("price_velocity_pct".to_string(), t.price_velocity_pct);
            indicators.insert("range_pct".to_string(), t.range_pct());
            quality.insert("data_quality".to_string(), t.data_quality);
            quality.insert("price_confidence".to_string(), t.price_confidence);
            quality.insert("source_count".to_string(), t.sources.len() as f64);
        }

        let order_flow = OrderFlow {
            book_imbalance: inputs.orderbook.as_ref().map(|d| d.imbalance),
            spread_bps: inputs.orderbook.as_ref().map(|d| d.spread_bps),
            smart_money_flow: ticker.map(|t| t.smart_money_flow),
            whale_accumulation_ratio: inputs.whale.as_ref().and_then(|w| w.accumulation_ratio()),
            funding_rate_pct: inputs.funding.as_ref().map(|f| f.rate_pct),
        };

        Self {
            timeframes,
            indicators,
            order_flow: Some(order_flow),
            sentiment: inputs.sentiment.as_ref().map(|s| s.value),
            pattern: Some(PatternSummary {
                trend: report.confluence.overall_trend,
                alignment: report.confluence.alignment,
                recommendation: report.confluence.recommendation,
            }),
            quality,
        }
    }
}

#[derive(Debug, Clone)]
struct CacheEntry {
    features: CachedFeatures,
    ttl_ms: i64,
}

impl CacheEntry {
    fn is_expired(&self, now_ms: i64) -> bool {
        now_ms - self.features.updated_at_ms > self.ttl_ms
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CacheStats {
    pub entries: usize,
    pub capacity: usize,
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub expirations: u64,
    /// 0..100; zero before the first lookup.
    pub hit_rate: f64,
}

// =============================================================================
// FeatureCache
// =============================================================================

pub struct FeatureCache {
    entries: RwLock<HashMap<String, CacheEntry>>,
    default_ttl_ms: i64,
    capacity: usize,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
    expirations: AtomicU64,
}

impl FeatureCache {
    pub fn new(default_ttl_ms: u64, capacity: usize) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            default_ttl_ms: default_ttl_ms as i64,
            capacity: capacity.max(1),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
            expirations: AtomicU64::new(0),
        }
    }

    pub fn get(&self, symbol: &str) -> Option<CachedFeatures> {
        self.get_at(symbol, now_ms())
    }

    pub fn get_at(&self, symbol: &str, now_ms: i64) -> Option<CachedFeatures> {
        let entries = self.entries.read();
        match entries.get(symbol) {
            Some(entry) if !entry.is_expired(now_ms) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                Some(entry.features.clone())
            }
            _ => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    /// Store `features` under `symbol` with the default TTL.
    pub fn set(&self, symbol: &str, features: CachedFeatures) {
        self.set_at(symbol, features, None, now_ms());
    }

    pub fn set_at(&self, symbol: &str, mut features: CachedFeatures, ttl_ms: Option<u64>, now_ms: i64) {
        features.symbol = symbol.to_string();
        features.updated_at_ms = now_ms;
        let entry = CacheEntry {
            features,
            ttl_ms: ttl_ms.map(|t| t as i64).unwrap_or(self.default_ttl_ms),
        };

        let mut entries = self.entries.write();
        if !entries.contains_key(symbol) && entries.len() >= self.capacity {
            self.evict_oldest(&mut entries);
        }
        entries.insert(symbol.to_string(), entry);
    }

    fn evict_oldest(&self, entries: &mut HashMap<String, CacheEntry>) {
        let oldest = entries
            .iter()
            .min_by_key(|(_, e)| e.features.updated_at_ms)
            .map(|(k, _)| k.clone());
        if let Some(key) = oldest {
            entries.remove(&key);
            self.evictions.fetch_add(1, Ordering::Relaxed);
            debug!(symbol = %key, "feature cache evicted oldest entry");
        }
    }

    pub fn update(&self, symbol: &str, update: FeatureUpdate) {
        self.update_at(symbol, update, now_ms());
    }

    /// Merge `update` into the entry for `symbol`, creating it if absent.
    pub fn update_at(&self, symbol: &str, update: FeatureUpdate, now_ms: i64) {
        let mut entries = self.entries.write();
        if let Some(entry) = entries.get_mut(symbol) {
            let f = &mut entry.features;
            f.timeframes.extend(update.timeframes);
            f.indicators.extend(update.indicators);
            f.quality.extend(update.quality);
            if update.order_flow.is_some() {
                f.order_flow = update.order_flow;
            }
            if update.sentiment.is_some() {
                f.sentiment = update.sentiment;
            }
            if update.pattern.is_some() {
                f.pattern = update.pattern;
            }
            f.updated_at_ms = now_ms;
            return;
        }

        if entries.len() >= self.capacity {
            self.evict_oldest(&mut entries);
        }
        entries.insert(
            symbol.to_string(),
            CacheEntry {
                features: CachedFeatures {
                    symbol: symbol.to_string(),
                    timeframes: update.timeframes,
                    indicators: update.indicators,
                    order_flow: update.order_flow,
                    sentiment: update.sentiment,
                    pattern: update.pattern,
                    quality: update.quality,
                    updated_at_ms: now_ms,
                },
                ttl_ms: self.default_ttl_ms,
            },
        );
    }

    pub fn sweep(&self) -> usize {
        self.sweep_at(now_ms())
    }

    /// Remove expired entries. Returns how many were removed.
    pub fn sweep_at(&self, now_ms: i64) -> usize {
        let mut entries = self.entries.write();
        let before = entries.len();
        entries.retain(|_, e| !e.is_expired(now_ms));
        let removed = before - entries.len();
        if removed > 0 {
            self.expirations.fetch_add(removed as u64, Ordering::Relaxed);
            debug!(removed, remaining = entries.len(), "feature cache swept");
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> CacheStats {
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let lookups = hits + misses;
        CacheStats {
            entries: self.len(),
            capacity: self.capacity,
            hits,
            misses,
            evictions: self.evictions.load(Ordering::Relaxed),
            expirations: self.expirations.load(Ordering::Relaxed),
            hit_rate: if lookups > 0 {
                hits as f64 / lookups as f64 * 100.0
            } else {
                0.0
            },
        }
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    fn features(price: f64) -> CachedFeatures {
        let mut f = CachedFeatures::default();
        f.indicators.insert("price".into(), price);
        f
    }

    #[test]
    fn expired_entry_reads_absent_but_stays_until_sweep() {
        let cache = FeatureCache::new(60_000, 10);
        cache.set_at("BTC", features(1.0), None, 0);

        assert!(cache.get_at("BTC", 59_000).is_some());
        assert!(cache.get_at("BTC", 61_000).is_none());
        assert_eq!(cache.len(), 1);

        let stats = cache.stats();
        assert_eq!((stats.hits, stats.misses), (1, 1));
        assert!((stats.hit_rate - 50.0).abs() < 1e-9);

        assert_eq!(cache.sweep_at(61_000), 1);
        assert!(cache.is_empty());
        assert_eq!(cache.stats().expirations, 1);
    }

    #[test]
    fn per_entry_ttl_overrides_default() {
        let cache = FeatureCache::new(60_000, 10);
        cache.set_at("ETH", features(1.0), Some(5_000), 0);
        assert!(cache.get_at("ETH", 6_000).is_none());
        assert_eq!(cache.sweep_at(6_000), 1);
    }

    #[test]
    fn set_evicts_single_oldest_only_for_new_key() {
        let cache = FeatureCache::new(60_000, 2);
        cache.set_at("A", features(1.0), None, 100);
        cache.set_at("B", features(2.0), None, 200);

        // Overwriting an existing key at capacity evicts nothing.
        cache.set_at("A", features(1.5), None, 300);
        assert_eq!(cache.len(), 2);
        assert_eq!(cache.stats().evictions, 0);

        cache.set_at("C", features(3.0), None, 400);
        assert_eq!(cache.len(), 2);
        assert_eq!(cache.stats().evictions, 1);
        assert!(cache.get_at("B", 400).is_none());
        assert_eq!(cache.get_at("A", 400).unwrap().indicators["price"], 1.5);
    }

    #[test]
    fn update_merges_maps_and_refreshes_timestamp() {
        let cache = FeatureCache::new(60_000, 10);
        let mut f = CachedFeatures {
            sentiment: Some(40.0),
            ..features(100.0)
        };
        f.indicators.insert("momentum_1h".into(), 20.0);
        cache.set_at("BTC", f, None, 0);

        let mut up = FeatureUpdate::default();
        up.indicators.insert("momentum_1h".into(), 35.0);
        up.quality.insert("data_quality".into(), 88.0);
        cache.update_at("BTC", up, 50_000);

        // Original entry would have expired at 60 s; the update moved it.
        let got = cache.get_at("BTC", 100_000).unwrap();
        assert_eq!(got.indicators["price"], 100.0);
        assert_eq!(got.indicators["momentum_1h"], 35.0);
        assert_eq!(got.quality["data_quality"], 88.0);
        assert_eq!(got.sentiment, Some(40.0));
        assert_eq!(got.updated_at_ms, 50_000);
    }

    #[test]
    fn update_creates_missing_entry() {
        let cache = FeatureCache::new(60_000, 10);
        let up = FeatureUpdate {
            sentiment: Some(55.0),
            ..Default::default()
        };
        cache.update_at("SOL", up, 10);
        let got = cache.get_at("SOL", 20).unwrap();
        assert_eq!(got.symbol, "SOL");
        assert_eq!(got.sentiment, Some(55.0));
    }

    #[test]
    fn features_from_empty_report() {
        let report = MtfReport {
            symbol: "BTC".into(),
            timeframes: crate::types::Timeframe::ALL
                .iter()
                .map(|tf| TimeframeAnalysis::neutral(*tf, 0))
                .collect(),
            confluence: crate::mtf::Confluence::neutral(),
            analyzed_at: chrono::Utc::now(),
        };
        let up = FeatureUpdate::from_analysis(&report, None, &SideInputs::default());
        assert_eq!(up.timeframes.len(), 6);
        assert!(up.indicators.contains_key("momentum_1w"));
        assert!(up.sentiment.is_none());
        assert_eq!(up.pattern.unwrap().recommendation, Recommendation::Hold);
        assert_eq!(up.order_flow.unwrap(), OrderFlow::default());
    }
}
