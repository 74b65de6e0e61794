// =============================================================================
// Runtime Configuration — feed roster, task cadences and policy settings
// =============================================================================
//
// Every tunable parameter of the fusion engine lives here.  The file is plain
// JSON; all fields carry `#[serde(default)]` so that adding new fields never
// breaks loading an older config file.
//
// Persistence uses an atomic tmp + rename pattern to prevent corruption on
// crash.  `validate()` is the single gate for configuration errors: anything
// it rejects is fatal at startup and can never surface mid-run.
// =============================================================================

use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

use crate::types::SourceTier;

// =============================================================================
// Errors
// =============================================================================

#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("no symbols configured")]
    NoSymbols,
    #[error("no enabled feeds configured")]
    NoFeeds,
    #[error("duplicate feed id: {0}")]
    DuplicateFeed(String),
    #[error("feed {id}: interval {secs}s outside [5, 60]")]
    FeedInterval { id: String, secs: u64 },
    #[error("feed {id}: weight {weight} outside (0, 1]")]
    FeedWeight { id: String, weight: f64 },
    #[error("feed {id}: timeout {timeout_ms}ms exceeds polling interval")]
    FeedTimeout { id: String, timeout_ms: u64 },
    #[error("{name} must be positive")]
    NonPositive { name: &'static str },
    #[error("primary symbol {0} is not among the configured symbols")]
    UnknownPrimarySymbol(String),
}

// =============================================================================
// Default-value helpers (required by serde `default = "..."` attribute)
// =============================================================================

fn default_true() -> bool {
    true
}

fn default_symbols() -> Vec<String> {
    vec![
        "BTC".to_string(),
        "ETH".to_string(),
        "SOL".to_string(),
        "BNB".to_string(),
        "XRP".to_string(),
    ]
}

fn default_feeds() -> Vec<FeedConfig> {
    vec![
        FeedConfig::new("binance", FeedKind::Binance, 5, 0.30, SourceTier::Tier1),
        FeedConfig::new("coinbase", FeedKind::Coinbase, 10, 0.25, SourceTier::Tier1),
        FeedConfig::new("kraken", FeedKind::Kraken, 15, 0.15, SourceTier::Tier2),
        FeedConfig::new("bybit", FeedKind::Bybit, 10, 0.12, SourceTier::Tier2),
        FeedConfig::new("okx", FeedKind::Okx, 10, 0.10, SourceTier::Tier2),
        FeedConfig::new("coingecko", FeedKind::CoinGecko, 60, 0.08, SourceTier::Tier3),
    ]
}

fn default_bind_addr() -> String {
    "0.0.0.0:3001".to_string()
}

fn default_data_dir() -> String {
    "data".to_string()
}

fn default_quote_asset() -> String {
    "USDT".to_string()
}

// =============================================================================
// Feeds
// =============================================================================

/// Which normalizer handles a feed's payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeedKind {
    Binance,
    Coinbase,
    Kraken,
    Bybit,
    Okx,
    CoinGecko,
}

/// One upstream price feed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedConfig {
    /// Stable source id used in readings, snapshots and health output.
    pub id: String,

    pub kind: FeedKind,

    /// Overrides the normalizer's public endpoint (used by tests and proxies).
    #[serde(default)]
    pub base_url: Option<String>,

    /// Polling interval in seconds, 5..=60.
    pub interval_secs: u64,

    /// Per-request timeout. Defaults to half of the polling interval.
    #[serde(default)]
    pub timeout_ms: Option<u64>,

    /// Static fusion weight in (0, 1].
    pub weight: f64,

    #[serde(default)]
    pub tier: SourceTier,

    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Canonical instrument -> feed-specific symbol, when the default
    /// formatting rule for the feed does not apply.
    #[serde(default)]
    pub symbol_overrides: HashMap<String, String>,
}

impl FeedConfig {
    pub fn new(id: &str, kind: FeedKind, interval_secs: u64, weight: f64, tier: SourceTier) -> Self {
        Self {
            id: id.to_string(),
            kind,
            base_url: None,
            interval_secs,
            timeout_ms: None,
            weight,
            tier,
            enabled: true,
            symbol_overrides: HashMap::new(),
        }
    }

    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    /// Effective fetch timeout: configured value, else 50% of the interval.
    pub fn timeout(&self) -> Duration {
        match self.timeout_ms {
            Some(ms) => Duration::from_millis(ms),
            None => Duration::from_millis(self.interval_secs * 1000 / 2),
        }
    }
}

// =============================================================================
// Component settings
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FusionSettings {
    /// Fusion cycle period.
    pub cycle_ms: u64,
    /// Readings older than this are ignored by fusion.
    pub freshness_secs: u64,
    /// Startup offset between consecutive feed pollers.
    pub stagger_ms: u64,
    /// Fused prices retained per instrument for velocity.
    pub price_history_len: usize,
}

impl Default for FusionSettings {
    fn default() -> Self {
        Self {
            cycle_ms: 1_000,
            freshness_secs: 30,
            stagger_ms: 750,
            price_history_len: 120,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SideInputSettings {
    pub enabled: bool,
    pub funding_interval_secs: u64,
    pub sentiment_interval_secs: u64,
    pub orderbook_interval_secs: u64,
    pub whale_interval_secs: u64,
    /// Side inputs older than this count as missing.
    pub max_age_secs: u64,
    /// Minimum notional (quote currency) for a trade to count as whale flow.
    pub whale_threshold_usd: f64,
    /// Top-N book levels used for the depth imbalance.
    pub depth_levels: usize,
}

impl Default for SideInputSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            funding_interval_secs: 60,
            sentiment_interval_secs: 300,
            orderbook_interval_secs: 15,
            whale_interval_secs: 30,
            max_age_secs: 900,
            whale_threshold_usd: 100_000.0,
            depth_levels: 10,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MarketSettings {
    pub analysis_interval_secs: u64,
    pub regime_history_len: usize,
    pub regime_change_min_confidence: f64,
    /// Instrument whose regime drives the Alpha decision cycle.
    pub primary_symbol: String,
}

impl Default for MarketSettings {
    fn default() -> Self {
        Self {
            analysis_interval_secs: 15,
            regime_history_len: 100,
            regime_change_min_confidence: 80.0,
            primary_symbol: "BTC".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeframeSettings {
    pub kline_refresh_secs: u64,
    pub candle_limit: u32,
    pub feature_interval_secs: u64,
}

impl Default for TimeframeSettings {
    fn default() -> Self {
        Self {
            kline_refresh_secs: 120,
            candle_limit: 200,
            feature_interval_secs: 60,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheSettings {
    pub default_ttl_ms: u64,
    pub max_entries: usize,
    pub sweep_interval_secs: u64,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            default_ttl_ms: 60_000,
            max_entries: 500,
            sweep_interval_secs: 30,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GoalSettings {
    /// Monthly cumulative return target in percent.
    pub monthly_target_pct: f64,
    /// Archived months kept in memory.
    pub history_len: usize,
}

impl Default for GoalSettings {
    fn default() -> Self {
        Self {
            monthly_target_pct: 25.0,
            history_len: 24,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AlphaSettings {
    pub decision_interval_secs: u64,
    /// Validity window of an emitted command.
    pub command_duration_secs: u64,
    pub mode_history_len: usize,
}

impl Default for AlphaSettings {
    fn default() -> Self {
        Self {
            decision_interval_secs: 4 * 60 * 60,
            command_duration_secs: 4 * 60 * 60,
            mode_history_len: 100,
        }
    }
}

// =============================================================================
// AppConfig
// =============================================================================

/// Top-level configuration for the fusion engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Canonical instruments (base assets) tracked across all feeds.
    #[serde(default = "default_symbols")]
    pub symbols: Vec<String>,

    /// Quote asset used when building exchange symbols (BTC -> BTCUSDT).
    #[serde(default = "default_quote_asset")]
    pub quote_asset: String,

    #[serde(default = "default_feeds")]
    pub feeds: Vec<FeedConfig>,

    #[serde(default)]
    pub fusion: FusionSettings,

    #[serde(default)]
    pub side_inputs: SideInputSettings,

    #[serde(default)]
    pub market: MarketSettings,

    #[serde(default)]
    pub timeframes: TimeframeSettings,

    #[serde(default)]
    pub cache: CacheSettings,

    #[serde(default)]
    pub goal: GoalSettings,

    #[serde(default)]
    pub alpha: AlphaSettings,

    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,

    /// Directory for the append-only archive files.
    #[serde(default = "default_data_dir")]
    pub data_dir: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            symbols: default_symbols(),
            quote_asset: default_quote_asset(),
            feeds: default_feeds(),
            fusion: FusionSettings::default(),
            side_inputs: SideInputSettings::default(),
            market: MarketSettings::default(),
            timeframes: TimeframeSettings::default(),
            cache: CacheSettings::default(),
            goal: GoalSettings::default(),
            alpha: AlphaSettings::default(),
            bind_addr: default_bind_addr(),
            data_dir: default_data_dir(),
        }
    }
}

impl AppConfig {
    /// Load configuration from a JSON file at `path`.
    ///
    /// If the file does not exist, returns an error so the caller can fall
    /// back to defaults with a warning.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config from {}", path.display()))?;

        let config: Self = serde_json::from_str(&content)
            .with_context(|| format!("failed to parse config from {}", path.display()))?;

        info!(
            path = %path.display(),
            symbols = ?config.symbols,
            feeds = config.feeds.len(),
            "config loaded"
        );

        Ok(config)
    }

    /// Persist the configuration using an atomic write (tmp, then rename).
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();

        let content =
            serde_json::to_string_pretty(self).context("failed to serialise config to JSON")?;

        let tmp_path = path.with_extension("json.tmp");

        std::fs::write(&tmp_path, &content)
            .with_context(|| format!("failed to write tmp config to {}", tmp_path.display()))?;

        std::fs::rename(&tmp_path, path)
            .with_context(|| format!("failed to rename tmp config to {}", path.display()))?;

        info!(path = %path.display(), "config saved (atomic)");
        Ok(())
    }

    /// Apply `FUSION_*` environment overrides.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(syms) = std::env::var("FUSION_SYMBOLS") {
            self.set_symbols(
                syms.split(',')
                    .map(|s| s.trim().to_uppercase())
                    .filter(|s| !s.is_empty())
                    .collect(),
            );
        }
        if let Ok(addr) = std::env::var("FUSION_BIND_ADDR") {
            self.bind_addr = addr;
        }
        if let Some(target) = std::env::var("FUSION_MONTHLY_TARGET_PCT")
            .ok()
            .and_then(|v| v.parse::<f64>().ok())
        {
            self.goal.monthly_target_pct = target;
        }
    }

    /// Replace the instrument list. A primary symbol that is no longer
    /// listed moves to the first instrument.
    pub fn set_symbols(&mut self, symbols: Vec<String>) {
        self.symbols = symbols;
        if !self.symbols.contains(&self.market.primary_symbol) {
            if let Some(first) = self.symbols.first() {
                info!(
                    from = %self.market.primary_symbol,
                    to = %first,
                    "primary symbol not configured, using first symbol"
                );
                self.market.primary_symbol = first.clone();
            }
        }
    }

    pub fn enabled_feeds(&self) -> impl Iterator<Item = &FeedConfig> {
        self.feeds.iter().filter(|f| f.enabled)
    }

    /// Reject any configuration the engine cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.symbols.is_empty() {
            return Err(ConfigError::NoSymbols);
        }
        if !self.symbols.contains(&self.market.primary_symbol) {
            return Err(ConfigError::UnknownPrimarySymbol(self.market.primary_symbol.clone()));
        }
        if self.enabled_feeds().next().is_none() {
            return Err(ConfigError::NoFeeds);
        }

        let mut seen = HashSet::new();
        for feed in &self.feeds {
            if !seen.insert(feed.id.as_str()) {
                return Err(ConfigError::DuplicateFeed(feed.id.clone()));
            }
            if !(5..=60).contains(&feed.interval_secs) {
                return Err(ConfigError::FeedInterval {
                    id: feed.id.clone(),
                    secs: feed.interval_secs,
                });
            }
            if !(feed.weight > 0.0 && feed.weight <= 1.0) {
                return Err(ConfigError::FeedWeight {
                    id: feed.id.clone(),
                    weight: feed.weight,
                });
            }
            let timeout_ms = feed.timeout().as_millis() as u64;
            if timeout_ms == 0 || timeout_ms > feed.interval_secs * 1000 {
                return Err(ConfigError::FeedTimeout {
                    id: feed.id.clone(),
                    timeout_ms,
                });
            }
        }

        let positive = [
            ("fusion.cycle_ms", self.fusion.cycle_ms),
            ("fusion.freshness_secs", self.fusion.freshness_secs),
            ("cache.default_ttl_ms", self.cache.default_ttl_ms),
            ("cache.sweep_interval_secs", self.cache.sweep_interval_secs),
            ("alpha.decision_interval_secs", self.alpha.decision_interval_secs),
            ("alpha.command_duration_secs", self.alpha.command_duration_secs),
            ("market.analysis_interval_secs", self.market.analysis_interval_secs),
            ("timeframes.feature_interval_secs", self.timeframes.feature_interval_secs),
            ("timeframes.kline_refresh_secs", self.timeframes.kline_refresh_secs),
            ("side_inputs.funding_interval_secs", self.side_inputs.funding_interval_secs),
            ("side_inputs.sentiment_interval_secs", self.side_inputs.sentiment_interval_secs),
            ("side_inputs.orderbook_interval_secs", self.side_inputs.orderbook_interval_secs),
            ("side_inputs.whale_interval_secs", self.side_inputs.whale_interval_secs),
            ("side_inputs.max_age_secs", self.side_inputs.max_age_secs),
        ];
        for (name, value) in positive {
            if value == 0 {
                return Err(ConfigError::NonPositive { name });
            }
        }
        if self.cache.max_entries == 0 {
            return Err(ConfigError::NonPositive { name: "cache.max_entries" });
        }
        if self.market.regime_history_len == 0 {
            return Err(ConfigError::NonPositive { name: "market.regime_history_len" });
        }
        if self.goal.monthly_target_pct <= 0.0 {
            return Err(ConfigError::NonPositive { name: "goal.monthly_target_pct" });
        }

        Ok(())
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        let cfg = AppConfig::default();
        assert_eq!(cfg.validate(), Ok(()));
        assert_eq!(cfg.symbols[0], "BTC");
        assert_eq!(cfg.feeds.len(), 6);
        assert!((cfg.goal.monthly_target_pct - 25.0).abs() < f64::EPSILON);
        assert_eq!(cfg.alpha.decision_interval_secs, 14_400);
    }

    #[test]
    fn deserialise_empty_json_uses_defaults() {
        let cfg: AppConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(cfg.fusion.freshness_secs, 30);
        assert_eq!(cfg.cache.default_ttl_ms, 60_000);
        assert_eq!(cfg.market.regime_history_len, 100);
    }

    #[test]
    fn deserialise_partial_nested_json_fills_defaults() {
        let json = r#"{ "symbols": ["ETH"], "cache": { "max_entries": 10 } }"#;
        let cfg: AppConfig = serde_json::from_str(json).unwrap();
        assert_eq!(cfg.symbols, vec!["ETH"]);
        assert_eq!(cfg.cache.max_entries, 10);
        assert_eq!(cfg.cache.sweep_interval_secs, 30);
    }

    #[test]
    fn default_timeout_is_half_the_interval() {
        let feed = FeedConfig::new("x", FeedKind::Binance, 10, 0.5, SourceTier::Tier1);
        assert_eq!(feed.timeout(), Duration::from_secs(5));
    }

    #[test]
    fn rejects_interval_out_of_range() {
        let mut cfg = AppConfig::default();
        cfg.feeds[0].interval_secs = 2;
        assert!(matches!(cfg.validate(), Err(ConfigError::FeedInterval { .. })));
    }

    #[test]
    fn rejects_weight_out_of_range() {
        let mut cfg = AppConfig::default();
        cfg.feeds[1].weight = 1.5;
        assert!(matches!(cfg.validate(), Err(ConfigError::FeedWeight { .. })));
        cfg.feeds[1].weight = 0.0;
        assert!(matches!(cfg.validate(), Err(ConfigError::FeedWeight { .. })));
    }

    #[test]
    fn rejects_timeout_longer_than_interval() {
        let mut cfg = AppConfig::default();
        cfg.feeds[0].timeout_ms = Some(6_000);
        assert!(matches!(cfg.validate(), Err(ConfigError::FeedTimeout { .. })));
    }

    #[test]
    fn rejects_duplicate_feed_ids() {
        let mut cfg = AppConfig::default();
        cfg.feeds[1].id = cfg.feeds[0].id.clone();
        assert_eq!(
            cfg.validate(),
            Err(ConfigError::DuplicateFeed("binance".to_string()))
        );
    }

    #[test]
    fn rejects_empty_symbols() {
        let mut cfg = AppConfig::default();
        cfg.symbols.clear();
        assert_eq!(cfg.validate(), Err(ConfigError::NoSymbols));
    }

    #[test]
    fn rejects_zero_task_intervals() {
        let mut cfg = AppConfig::default();
        cfg.timeframes.kline_refresh_secs = 0;
        assert_eq!(
            cfg.validate(),
            Err(ConfigError::NonPositive { name: "timeframes.kline_refresh_secs" })
        );

        let cases: [(&'static str, fn(&mut SideInputSettings)); 5] = [
            ("side_inputs.funding_interval_secs", |s| s.funding_interval_secs = 0),
            ("side_inputs.sentiment_interval_secs", |s| s.sentiment_interval_secs = 0),
            ("side_inputs.orderbook_interval_secs", |s| s.orderbook_interval_secs = 0),
            ("side_inputs.whale_interval_secs", |s| s.whale_interval_secs = 0),
            ("side_inputs.max_age_secs", |s| s.max_age_secs = 0),
        ];
        for (name, zero) in cases {
            let mut cfg = AppConfig::default();
            zero(&mut cfg.side_inputs);
            assert_eq!(cfg.validate(), Err(ConfigError::NonPositive { name }));
        }
    }

    #[test]
    fn rejects_primary_symbol_outside_symbols() {
        let mut cfg = AppConfig::default();
        cfg.symbols = vec!["ETH".to_string()];
        assert_eq!(
            cfg.validate(),
            Err(ConfigError::UnknownPrimarySymbol("BTC".to_string()))
        );
    }

    #[test]
    fn symbol_override_moves_primary_symbol() {
        let mut cfg = AppConfig::default();
        cfg.set_symbols(vec!["ETH".to_string(), "SOL".to_string()]);
        assert_eq!(cfg.market.primary_symbol, "ETH");
        assert_eq!(cfg.validate(), Ok(()));

        cfg.market.primary_symbol = "SOL".to_string();
        cfg.set_symbols(vec!["ADA".to_string(), "SOL".to_string()]);
        assert_eq!(cfg.market.primary_symbol, "SOL");
    }

    #[test]
    fn roundtrip_through_file() {
        let dir = std::env::temp_dir().join(format!("fusion-cfg-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("fusion_config.json");

        let mut cfg = AppConfig::default();
        cfg.symbols = vec!["ADA".to_string()];
        cfg.save(&path).unwrap();

        let loaded = AppConfig::load(&path).unwrap();
        assert_eq!(loaded.symbols, vec!["ADA"]);
        assert_eq!(loaded.feeds.len(), cfg.feeds.len());

        std::fs::remove_dir_all(&dir).ok();
    }
}
