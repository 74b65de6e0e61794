// =============================================================================
// Application Context — every component, built once in `main`
// =============================================================================
//
// There are no globals.  `AppContext::build` wires the components in
// dependency order and the result is shared as `Arc<AppContext>` with the
// scheduler jobs and the HTTP surface.  Components own their interior
// mutability; the context itself is immutable after construction.
// =============================================================================

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, info};

use crate::aggregator::{SourceAggregator, SourceHealth};
use crate::alpha::{AlphaDecisionEngine, AlphaStatus};
use crate::cache::{FeatureCache, FeatureUpdate};
use crate::events::{EventBus, Topic};
use crate::goal::GoalAchievementEngine;
use crate::market_data::{CandleBuffer, KlinePoller};
use crate::mtf::MultiTimeframeAnalyzer;
use crate::persistence::{JsonlStore, Store};
use crate::regime::MarketConditionAnalyzer;
use crate::runtime_config::AppConfig;
use crate::scheduler::{Scheduler, TaskHealth};
use crate::side_inputs::{SideInputProvider, SideInputStore};

/// Candles kept per (symbol, timeframe).
const CANDLE_CAPACITY: usize = 500;
/// Connected-source share below which the process reports itself degraded.
const DEGRADED_CONNECTED_RATIO: f64 = 0.5;

// =============================================================================
// Health report
// =============================================================================

#[derive(Debug, Clone, Serialize)]
pub struct TopicStats {
    pub topic: Topic,
    pub published: u64,
    pub subscribers: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    /// `ok` or `degraded`.
    pub status: &'static str,
    pub started_at: DateTime<Utc>,
    pub uptime_secs: i64,
    pub server_time: i64,
    pub connected_ratio: f64,
    pub fusion_cycles: u64,
    pub tasks: Vec<TaskHealth>,
    pub sources: Vec<SourceHealth>,
    pub events: Vec<TopicStats>,
    pub alpha: AlphaStatus,
}

// =============================================================================
// AppContext
// =============================================================================

pub struct AppContext {
    pub config: AppConfig,
    pub started_at: DateTime<Utc>,

    // ── Infrastructure ──────────────────────────────────────────────────
    pub bus: Arc<EventBus>,
    pub scheduler: Arc<Scheduler>,
    pub store: Arc<dyn Store>,

    // ── Inputs ──────────────────────────────────────────────────────────
    pub aggregator: Arc<SourceAggregator>,
    pub side_inputs: Arc<SideInputStore>,
    pub side_provider: Option<Arc<SideInputProvider>>,
    pub candles: Arc<CandleBuffer>,
    pub klines: Arc<KlinePoller>,

    // ── Analysis & policy ───────────────────────────────────────────────
    pub market: Arc<MarketConditionAnalyzer>,
    pub mtf: Arc<MultiTimeframeAnalyzer>,
    pub cache: Arc<FeatureCache>,
    pub goal: Arc<GoalAchievementEngine>,
    pub alpha: Arc<AlphaDecisionEngine>,
}

impl AppContext {
    /// Build every component from a validated config, persisting under
    /// `config.data_dir`.
    pub fn build(config: AppConfig) -> Result<Self> {
        let store: Arc<dyn Store> = Arc::new(
            JsonlStore::open(&config.data_dir)
                .with_context(|| format!("failed to open data dir {}", config.data_dir))?,
        );
        Self::with_store(config, store)
    }

    pub fn with_store(config: AppConfig, store: Arc<dyn Store>) -> Result<Self> {
        let bus = Arc::new(EventBus::new());
        let scheduler = Arc::new(Scheduler::new());

        let aggregator = Arc::new(SourceAggregator::new(&config).context("failed to build feed clients")?);

        let side_inputs = Arc::new(SideInputStore::new(Duration::from_secs(config.side_inputs.max_age_secs)));
        let side_provider = if config.side_inputs.enabled {
            Some(Arc::new(SideInputProvider::new(
                &config.side_inputs,
                side_inputs.clone(),
                config.symbols.clone(),
                &config.quote_asset,
            )?))
        } else {
            None
        };

        let candles = Arc::new(CandleBuffer::new(CANDLE_CAPACITY));
        let klines = Arc::new(KlinePoller::new(
            candles.clone(),
            &config.quote_asset,
            config.timeframes.candle_limit,
        )?);

        let market = Arc::new(MarketConditionAnalyzer::new(
            aggregator.clone(),
            side_inputs.clone(),
            config.market.clone(),
        ));
        let mtf = Arc::new(MultiTimeframeAnalyzer::new(
            candles.clone(),
            config.timeframes.candle_limit as usize,
        ));
        let cache = Arc::new(FeatureCache::new(config.cache.default_ttl_ms, config.cache.max_entries));

        let goal = Arc::new(GoalAchievementEngine::new(&config.goal, store.clone()));
        goal.load_history().context("failed to load month archives")?;

        let alpha = Arc::new(AlphaDecisionEngine::new(
            market.clone(),
            mtf.clone(),
            goal.clone(),
            bus.clone(),
            store.clone(),
            config.alpha.clone(),
            &config.market.primary_symbol,
        ));
        alpha.load_history().context("failed to load mode history")?;

        info!(
            symbols = ?config.symbols,
            feeds = aggregator.feeds().len(),
            side_inputs = side_provider.is_some(),
            "application context built"
        );

        Ok(Self {
            config,
            started_at: Utc::now(),
            bus,
            scheduler,
            store,
            aggregator,
            side_inputs,
            side_provider,
            candles,
            klines,
            market,
            mtf,
            cache,
            goal,
            alpha,
        })
    }

    /// Recompute multi-timeframe features of every instrument into the cache.
    pub fn run_feature_cycle(&self) -> usize {
        for symbol in &self.config.symbols {
            let report = self.mtf.analyze(symbol);
            let ticker = self.aggregator.snapshot(symbol);
            let inputs = self.side_inputs.get(symbol);
            self.cache
                .update(symbol, FeatureUpdate::from_analysis(&report, ticker.as_deref(), &inputs));
        }
        debug!(symbols = self.config.symbols.len(), "features refreshed");
        self.config.symbols.len()
    }

    pub fn health(&self) -> HealthReport {
        let tasks = self.scheduler.health();
        let connected_ratio = self.aggregator.connected_ratio();
        let failing = tasks.iter().any(|t| t.consecutive_failures > 0);
        let now = Utc::now();

        HealthReport {
            status: if failing || connected_ratio < DEGRADED_CONNECTED_RATIO {
                "degraded"
            } else {
                "ok"
            },
            started_at: self.started_at,
            uptime_secs: (now - self.started_at).num_seconds(),
            server_time: now.timestamp_millis(),
            connected_ratio,
            fusion_cycles: self.aggregator.fusion_cycles(),
            tasks,
            sources: self.aggregator.source_health(),
            events: Topic::ALL
                .into_iter()
                .map(|topic| TopicStats {
                    topic,
                    published: self.bus.published_count(topic),
                    subscribers: self.bus.subscriber_count(topic),
                })
                .collect(),
            alpha: self.alpha.status(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::MemoryStore;

    fn context() -> AppContext {
        let mut config = AppConfig::default();
        config.side_inputs.enabled = false;
        AppContext::with_store(config, Arc::new(MemoryStore::new())).unwrap()
    }

    #[test]
    fn builds_from_default_config() {
        let ctx = context();
        assert_eq!(ctx.aggregator.feeds().len(), 6);
        assert!(ctx.side_provider.is_none());
        assert!(ctx.goal.history().is_empty());
        assert!(ctx.alpha.latest().is_none());
    }

    #[test]
    fn feature_cycle_fills_cache_without_data() {
        let ctx = context();
        assert_eq!(ctx.run_feature_cycle(), 5);
        let btc = ctx.cache.get("BTC").unwrap();
        assert_eq!(btc.timeframes.len(), 6);
        assert!(btc.indicators.get("price").is_none());
    }

    #[test]
    fn health_counts_bus_traffic() {
        let ctx = context();
        let _sub = ctx.bus.subscribe(&[Topic::GammaCommand]);
        ctx.alpha.run_cycle();
        let health = ctx.health();
        let gamma = health.events.iter().find(|e| e.topic == Topic::GammaCommand).unwrap();
        assert_eq!(gamma.published, 1);
        assert_eq!(gamma.subscribers, 1);
        assert!(!health.alpha.command_expired);
    }

    #[test]
    fn health_is_degraded_before_any_poll() {
        let ctx = context();
        let health = ctx.health();
        assert_eq!(health.status, "degraded");
        assert_eq!(health.sources.len(), 6);
        assert!(health.tasks.is_empty());
        assert_eq!(health.events.len(), 4);
        assert!(health.events.iter().all(|e| e.published == 0));
    }
}
