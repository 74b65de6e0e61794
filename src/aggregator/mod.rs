// =============================================================================
// Source Aggregator — per-feed polling, reading store, 1 s fusion cycle
// =============================================================================
//
// Each feed's poller writes `RawReading`s keyed by (instrument, source).  The
// fusion cycle reads every instrument's fresh readings, fuses them with
// `fusion::fuse` and replaces that instrument's published `Ticker`.
//
// Locking: the outer maps are keyed by instrument and only write-locked when
// a new instrument appears; each instrument has its own `Mutex`, so pollers
// and fusion contend per instrument, never across instruments.
// =============================================================================

pub mod fusion;

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures_util::future::join_all;
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use tracing::{debug, warn};

use crate::feeds::{FeedClient, FeedError, RawReading};
use crate::runtime_config::AppConfig;
use crate::types::{now_ms, SourceStatus, SourceTier};

pub use fusion::{FusionContext, Microstructure, SourceMeta, Ticker};

/// Window over which the fused price velocity is measured.
const VELOCITY_WINDOW_MS: i64 = 60_000;

// =============================================================================
// SourceHealth
// =============================================================================

/// Health record of one feed.
#[derive(Debug, Clone, Serialize)]
pub struct SourceHealth {
    pub id: String,
    pub status: SourceStatus,
    pub weight: f64,
    pub tier: SourceTier,
    pub interval_ms: u64,
    pub error_count: u64,
    pub consecutive_errors: u32,
    pub success_count: u64,
    pub last_success_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub last_latency_ms: Option<u64>,
}

impl SourceHealth {
    fn new(id: &str, weight: f64, tier: SourceTier, interval: Duration) -> Self {
        Self {
            id: id.to_string(),
            status: SourceStatus::Pending,
            weight,
            tier,
            interval_ms: interval.as_millis() as u64,
            error_count: 0,
            consecutive_errors: 0,
            success_count: 0,
            last_success_at: None,
            last_error: None,
            last_latency_ms: None,
        }
    }
}

// =============================================================================
// Per-instrument state
// =============================================================================

#[derive(Default)]
struct FusedState {
    latest: Option<Arc<Ticker>>,
    /// (timestamp_ms, fused price), oldest first.
    history: VecDeque<(i64, f64)>,
}

impl FusedState {
    /// Oldest fused price still inside the velocity window.
    fn reference_price(&self, now_ms: i64) -> Option<f64> {
        self.history
            .iter()
            .find(|(ts, _)| now_ms - ts <= VELOCITY_WINDOW_MS)
            .map(|(_, p)| *p)
    }
}

type ReadingSlot = Arc<Mutex<HashMap<String, RawReading>>>;
type FusedSlot = Arc<Mutex<FusedState>>;

// =============================================================================
// SourceAggregator
// =============================================================================

pub struct SourceAggregator {
    feeds: Vec<Arc<FeedClient>>,
    meta: HashMap<String, SourceMeta>,
    symbols: Vec<String>,
    readings: RwLock<HashMap<String, ReadingSlot>>,
    fused: RwLock<HashMap<String, FusedSlot>>,
    health: RwLock<HashMap<String, SourceHealth>>,
    freshness_ms: i64,
    history_len: usize,
    cycles: AtomicU64,
}

impl SourceAggregator {
    /// Build one client per enabled feed of `config`.
    pub fn new(config: &AppConfig) -> anyhow::Result<Self> {
        let mut feeds = Vec::new();
        for feed in config.enabled_feeds() {
            feeds.push(Arc::new(FeedClient::new(feed.clone(), &config.quote_asset)?));
        }
        Ok(Self::with_clients(
            feeds,
            config.symbols.clone(),
            config.fusion.freshness_secs as i64 * 1000,
            config.fusion.price_history_len,
        ))
    }

    pub fn with_clients(
        feeds: Vec<Arc<FeedClient>>,
        symbols: Vec<String>,
        freshness_ms: i64,
        history_len: usize,
    ) -> Self {
        let mut meta = HashMap::new();
        let mut health = HashMap::new();
        for feed in &feeds {
            let cfg = feed.config();
            meta.insert(
                cfg.id.clone(),
                SourceMeta {
                    weight: cfg.weight,
                    tier: cfg.tier,
                },
            );
            health.insert(
                cfg.id.clone(),
                SourceHealth::new(&cfg.id, cfg.weight, cfg.tier, cfg.interval()),
            );
        }

        let readings = symbols
            .iter()
            .map(|s| (s.clone(), ReadingSlot::default()))
            .collect();
        let fused = symbols
            .iter()
            .map(|s| (s.clone(), FusedSlot::default()))
            .collect();

        Self {
            feeds,
            meta,
            symbols,
            readings: RwLock::new(readings),
            fused: RwLock::new(fused),
            health: RwLock::new(health),
            freshness_ms,
            history_len: history_len.max(2),
            cycles: AtomicU64::new(0),
        }
    }

    pub fn feeds(&self) -> &[Arc<FeedClient>] {
        &self.feeds
    }

    // ── Polling ─────────────────────────────────────────────────────────

    /// Poll every instrument from one feed. Fails only when every fetch
    /// failed, so the scheduler's task health mirrors the source status.
    pub async fn poll_feed(&self, feed: &FeedClient) -> anyhow::Result<()> {
        let results = join_all(self.symbols.iter().map(|s| feed.fetch(s))).await;

        let mut ok = 0usize;
        let mut last_err: Option<FeedError> = None;
        for (symbol, result) in self.symbols.iter().zip(results) {
            match result {
                Ok((reading, latency)) => {
                    ok += 1;
                    self.record_reading(reading);
                    self.record_success(feed.id(), latency);
                }
                Err(e) => {
                    debug!(feed = %feed.id(), symbol = %symbol, error = %e, "feed fetch failed");
                    last_err = Some(e);
                }
            }
        }

        match last_err {
            Some(e) if ok == 0 => {
                self.record_failure(feed.id(), &e);
                Err(anyhow::anyhow!("{}: {e}", feed.id()))
            }
            Some(e) => {
                // Partial coverage (an instrument the venue does not list)
                // counts as an error without flipping the source status.
                let mut health = self.health.write();
                if let Some(h) = health.get_mut(feed.id()) {
                    h.error_count += 1;
                    h.last_error = Some(e.to_string());
                }
                Ok(())
            }
            None => Ok(()),
        }
    }

    /// Store a reading, replacing the previous one from the same source.
    pub fn record_reading(&self, reading: RawReading) {
        let slot = self.reading_slot(&reading.symbol);
        slot.lock().insert(reading.source.clone(), reading);
    }

    pub fn record_success(&self, source: &str, latency: Duration) {
        let mut health = self.health.write();
        if let Some(h) = health.get_mut(source) {
            if h.status != SourceStatus::Connected {
                debug!(source = %source, "source connected");
            }
            h.status = SourceStatus::Connected;
            h.success_count += 1;
            h.consecutive_errors = 0;
            h.last_success_at = Some(Utc::now());
            h.last_latency_ms = Some(latency.as_millis() as u64);
        }
    }

    pub fn record_failure(&self, source: &str, error: &FeedError) {
        let mut health = self.health.write();
        if let Some(h) = health.get_mut(source) {
            h.status = SourceStatus::Error;
            h.error_count += 1;
            h.consecutive_errors += 1;
            h.last_error = Some(error.to_string());
            warn!(
                source = %source,
                consecutive_errors = h.consecutive_errors,
                error = %error,
                "source marked ERROR"
            );
        }
    }

    fn reading_slot(&self, symbol: &str) -> ReadingSlot {
        if let Some(slot) = self.readings.read().get(symbol) {
            return slot.clone();
        }
        self.readings
            .write()
            .entry(symbol.to_string())
            .or_default()
            .clone()
    }

    fn fused_slot(&self, symbol: &str) -> FusedSlot {
        if let Some(slot) = self.fused.read().get(symbol) {
            return slot.clone();
        }
        self.fused
            .write()
            .entry(symbol.to_string())
            .or_default()
            .clone()
    }

    // ── Fusion ──────────────────────────────────────────────────────────

    /// One fusion cycle at wall-clock now.
    pub fn fuse_all(&self) -> Vec<Arc<Ticker>> {
        self.fuse_all_at(now_ms())
    }

    /// One fusion cycle at `now_ms`. Instruments without fresh readings are
    /// skipped and their previous snapshot withdrawn.
    pub fn fuse_all_at(&self, now_ms: i64) -> Vec<Arc<Ticker>> {
        let connected_ratio = self.connected_ratio();
        let slots: Vec<(String, ReadingSlot)> = self
            .readings
            .read()
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();

        let mut published = Vec::with_capacity(slots.len());
        for (symbol, slot) in slots {
            let fresh: Vec<RawReading> = {
                let mut map = slot.lock();
                map.retain(|_, r| r.age_ms(now_ms) <= self.freshness_ms);
                map.values().cloned().collect()
            };

            let fused_slot = self.fused_slot(&symbol);
            let mut state = fused_slot.lock();

            let ctx = FusionContext {
                connected_ratio,
                reference_price: state.reference_price(now_ms),
                now_ms,
            };

            match fusion::fuse(&symbol, &fresh, &self.meta, ctx) {
                Some(ticker) => {
                    state.history.push_back((now_ms, ticker.price));
                    while state.history.len() > self.history_len {
                        state.history.pop_front();
                    }
                    let ticker = Arc::new(ticker);
                    state.latest = Some(ticker.clone());
                    published.push(ticker);
                }
                None => {
                    if state.latest.take().is_some() {
                        debug!(symbol = %symbol, "no fresh readings, snapshot withdrawn");
                    }
                }
            }
        }

        self.cycles.fetch_add(1, Ordering::Relaxed);
        published
    }

    // ── Queries ─────────────────────────────────────────────────────────

    pub fn snapshot(&self, symbol: &str) -> Option<Arc<Ticker>> {
        let slot = self.fused.read().get(symbol).cloned()?;
        let latest = slot.lock().latest.clone();
        latest
    }

    pub fn snapshots(&self) -> Vec<Arc<Ticker>> {
        let slots: Vec<FusedSlot> = self.fused.read().values().cloned().collect();
        let mut out: Vec<Arc<Ticker>> = slots
            .iter()
            .filter_map(|s| s.lock().latest.clone())
            .collect();
        out.sort_by(|a, b| a.symbol.cmp(&b.symbol));
        out
    }

    pub fn source_health(&self) -> Vec<SourceHealth> {
        let mut out: Vec<SourceHealth> = self.health.read().values().cloned().collect();
        out.sort_by(|a, b| a.id.cmp(&b.id));
        out
    }

    /// CONNECTED sources / configured sources.
    pub fn connected_ratio(&self) -> f64 {
        let health = self.health.read();
        if health.is_empty() {
            return 0.0;
        }
        let connected = health
            .values()
            .filter(|h| h.status == SourceStatus::Connected)
            .count();
        connected as f64 / health.len() as f64
    }

    pub fn fusion_cycles(&self) -> u64 {
        self.cycles.load(Ordering::Relaxed)
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime_config::{FeedConfig, FeedKind};

    fn aggregator() -> SourceAggregator {
        let feeds = vec![
            Arc::new(
                FeedClient::new(
                    FeedConfig::new("a", FeedKind::Binance, 5, 0.6, SourceTier::Tier1),
                    "USDT",
                )
                .unwrap(),
            ),
            Arc::new(
                FeedClient::new(
                    FeedConfig::new("b", FeedKind::Kraken, 10, 0.4, SourceTier::Tier2),
                    "USDT",
                )
                .unwrap(),
            ),
        ];
        SourceAggregator::with_clients(feeds, vec!["BTC".into(), "ETH".into()], 30_000, 120)
    }

    fn reading(source: &str, symbol: &str, price: f64, ts: i64) -> RawReading {
        RawReading {
            source: source.into(),
            symbol: symbol.into(),
            price,
            volume: 1.0,
            high_24h: None,
            low_24h: None,
            bid: None,
            ask: None,
            change_24h_pct: None,
            timestamp_ms: ts,
        }
    }

    #[test]
    fn fuses_two_feeds_into_weighted_price() {
        let agg = aggregator();
        agg.record_reading(reading("a", "BTC", 100.0, 1_000));
        agg.record_reading(reading("b", "BTC", 110.0, 1_000));

        let out = agg.fuse_all_at(2_000);
        assert_eq!(out.len(), 1);
        let btc = agg.snapshot("BTC").unwrap();
        assert!((btc.price - 104.0).abs() < 1e-9);
        assert!(agg.snapshot("ETH").is_none());
    }

    #[test]
    fn stale_readings_are_ignored() {
        let agg = aggregator();
        agg.record_reading(reading("a", "BTC", 100.0, 0));
        agg.record_reading(reading("b", "BTC", 110.0, 25_000));

        agg.fuse_all_at(31_000);
        let btc = agg.snapshot("BTC").unwrap();
        assert_eq!(btc.sources, vec!["b"]);
        assert!((btc.price - 110.0).abs() < 1e-9);
    }

    #[test]
    fn snapshot_withdrawn_when_everything_is_stale() {
        let agg = aggregator();
        agg.record_reading(reading("a", "BTC", 100.0, 0));
        agg.fuse_all_at(1_000);
        assert!(agg.snapshot("BTC").is_some());

        let out = agg.fuse_all_at(60_000);
        assert!(out.is_empty());
        assert!(agg.snapshot("BTC").is_none());
    }

    #[test]
    fn newer_reading_replaces_older_from_same_source() {
        let agg = aggregator();
        agg.record_reading(reading("a", "BTC", 100.0, 1_000));
        agg.record_reading(reading("a", "BTC", 101.0, 2_000));
        agg.fuse_all_at(2_500);
        assert!((agg.snapshot("BTC").unwrap().price - 101.0).abs() < 1e-9);
    }

    #[test]
    fn velocity_tracks_fused_history() {
        let agg = aggregator();
        agg.record_reading(reading("a", "BTC", 100.0, 0));
        agg.fuse_all_at(0);
        agg.record_reading(reading("a", "BTC", 102.0, 30_000));
        agg.fuse_all_at(30_000);
        let btc = agg.snapshot("BTC").unwrap();
        assert!((btc.price_velocity_pct - 2.0).abs() < 1e-9);
    }

    #[test]
    fn failures_flip_status_without_touching_other_sources() {
        let agg = aggregator();
        agg.record_success("a", Duration::from_millis(40));
        agg.record_success("b", Duration::from_millis(60));
        assert!((agg.connected_ratio() - 1.0).abs() < 1e-9);

        agg.record_failure("b", &FeedError::Timeout(Duration::from_secs(5)));
        agg.record_failure("b", &FeedError::parse("bad json"));

        let health = agg.source_health();
        let a = health.iter().find(|h| h.id == "a").unwrap();
        let b = health.iter().find(|h| h.id == "b").unwrap();
        assert_eq!(a.status, SourceStatus::Connected);
        assert_eq!(b.status, SourceStatus::Error);
        assert_eq!(b.error_count, 2);
        assert_eq!(b.consecutive_errors, 2);
        assert!((agg.connected_ratio() - 0.5).abs() < 1e-9);

        // Recovery on the next successful poll.
        agg.record_success("b", Duration::from_millis(55));
        let b = agg.source_health().into_iter().find(|h| h.id == "b").unwrap();
        assert_eq!(b.status, SourceStatus::Connected);
        assert_eq!(b.consecutive_errors, 0);
        assert_eq!(b.error_count, 2);
    }

    #[test]
    fn unknown_instrument_gets_its_own_slot() {
        let agg = aggregator();
        agg.record_reading(reading("a", "DOGE", 0.1, 1_000));
        agg.fuse_all_at(1_500);
        assert!(agg.snapshot("DOGE").is_some());
        assert_eq!(agg.fusion_cycles(), 1);
    }
}
