// =============================================================================
// Upstream Feeds — HTTP ticker clients and per-feed normalizers
// =============================================================================
//
// Every feed is a public HTTP GET ticker endpoint with its own JSON shape.
// A `FeedClient` couples one `FeedConfig` with the `Normalizer` for its kind
// and a dedicated reqwest client carrying that feed's timeout.
//
// Failures are classified into `FeedError` so the aggregator can record the
// kind of failure on the source's health record.  None of them is retried
// here: the next scheduled poll is the retry.
// =============================================================================

pub mod binance;
pub mod coinbase;
pub mod coingecko;
pub mod kraken;
pub mod okx;
pub mod bybit;

use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, instrument};

use crate::runtime_config::{FeedConfig, FeedKind};
use crate::types::now_ms;

// =============================================================================
// Types
// =============================================================================

/// Why a single poll of a feed failed.
#[derive(Debug, Error)]
pub enum FeedError {
    #[error("request timed out after {0:?}")]
    Timeout(Duration),
    #[error("HTTP {status}: {body}")]
    Status { status: u16, body: String },
    #[error("transport error: {0}")]
    Transport(String),
    #[error("malformed payload: {0}")]
    Parse(String),
    #[error("feed returned no data for {0}")]
    Empty(String),
}

impl FeedError {
    pub fn parse(msg: impl Into<String>) -> Self {
        Self::Parse(msg.into())
    }
}

/// Ticker fields extracted from one payload, before source attribution.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TickerFields {
    pub price: f64,
    /// 24h volume in base-asset units.
    pub volume: f64,
    pub high_24h: Option<f64>,
    pub low_24h: Option<f64>,
    pub bid: Option<f64>,
    pub ask: Option<f64>,
    pub change_24h_pct: Option<f64>,
}

/// One feed's view of one instrument at one poll.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawReading {
    pub source: String,
    pub symbol: String,
    pub price: f64,
    pub volume: f64,
    pub high_24h: Option<f64>,
    pub low_24h: Option<f64>,
    pub bid: Option<f64>,
    pub ask: Option<f64>,
    pub change_24h_pct: Option<f64>,
    /// Wall-clock time of the poll (epoch ms).
    pub timestamp_ms: i64,
}

impl RawReading {
    pub fn from_fields(source: &str, symbol: &str, fields: TickerFields, timestamp_ms: i64) -> Self {
        Self {
            source: source.to_string(),
            symbol: symbol.to_string(),
            price: fields.price,
            volume: fields.volume,
            high_24h: fields.high_24h,
            low_24h: fields.low_24h,
            bid: fields.bid,
            ask: fields.ask,
            change_24h_pct: fields.change_24h_pct,
            timestamp_ms,
        }
    }

    pub fn age_ms(&self, now_ms: i64) -> i64 {
        now_ms - self.timestamp_ms
    }
}

// =============================================================================
// Normalizer
// =============================================================================

/// Maps one feed's payload shape to [`TickerFields`].
pub trait Normalizer: Send + Sync {
    fn default_base_url(&self) -> &'static str;

    /// Feed-specific symbol for a canonical instrument (e.g. `BTC`).
    fn symbol(&self, instrument: &str, quote: &str) -> String;

    fn url(&self, base_url: &str, symbol: &str) -> String;

    fn normalize(&self, symbol: &str, body: &serde_json::Value) -> Result<TickerFields, FeedError>;
}

pub fn normalizer_for(kind: FeedKind) -> Box<dyn Normalizer> {
    match kind {
        FeedKind::Binance => Box::new(binance::BinanceTicker),
        FeedKind::Coinbase => Box::new(coinbase::CoinbaseTicker),
        FeedKind::Kraken => Box::new(kraken::KrakenTicker),
        FeedKind::Bybit => Box::new(bybit::BybitTicker),
        FeedKind::Okx => Box::new(okx::OkxTicker),
        FeedKind::CoinGecko => Box::new(coingecko::CoinGeckoTicker),
    }
}

/// Parse a JSON value that may be either a string or a number into `f64`.
pub(crate) fn num(val: &serde_json::Value) -> Option<f64> {
    let parsed = match val {
        serde_json::Value::String(s) => s.parse::<f64>().ok(),
        serde_json::Value::Number(n) => n.as_f64(),
        _ => None,
    }?;
    parsed.is_finite().then_some(parsed)
}

/// Required positive price field.
pub(crate) fn required_price(val: &serde_json::Value, name: &str) -> Result<f64, FeedError> {
    match num(val) {
        Some(p) if p > 0.0 => Ok(p),
        Some(p) => Err(FeedError::parse(format!("{name} is not positive: {p}"))),
        None => Err(FeedError::parse(format!("missing or non-numeric {name}"))),
    }
}

/// Optional positive field; zero and garbage collapse to `None`.
pub(crate) fn optional_positive(val: &serde_json::Value) -> Option<f64> {
    num(val).filter(|v| *v > 0.0)
}

// =============================================================================
// FeedClient
// =============================================================================

/// HTTP client for a single configured feed.
pub struct FeedClient {
    config: FeedConfig,
    normalizer: Box<dyn Normalizer>,
    client: reqwest::Client,
    base_url: String,
    quote: String,
}

impl FeedClient {
    pub fn new(config: FeedConfig, quote: &str) -> anyhow::Result<Self> {
        let normalizer = normalizer_for(config.kind);
        let client = reqwest::Client::builder()
            .timeout(config.timeout())
            .user_agent("fusion-alpha/1.0")
            .build()?;
        let base_url = config
            .base_url
            .clone()
            .unwrap_or_else(|| normalizer.default_base_url().to_string());

        debug!(feed = %config.id, base_url = %base_url, timeout_ms = config.timeout().as_millis() as u64, "feed client initialised");

        Ok(Self {
            config,
            normalizer,
            client,
            base_url,
            quote: quote.to_string(),
        })
    }

    pub fn config(&self) -> &FeedConfig {
        &self.config
    }

    pub fn id(&self) -> &str {
        &self.config.id
    }

    /// Feed-specific symbol, honouring configured overrides.
    pub fn symbol_for(&self, instrument: &str) -> String {
        self.config
            .symbol_overrides
            .get(instrument)
            .cloned()
            .unwrap_or_else(|| self.normalizer.symbol(instrument, &self.quote))
    }

    /// Poll the ticker for `instrument` once.
    #[instrument(skip(self), fields(feed = %self.config.id))]
    pub async fn fetch(&self, instrument: &str) -> Result<(RawReading, Duration), FeedError> {
        let symbol = self.symbol_for(instrument);
        let url = self.normalizer.url(&self.base_url, &symbol);
        let started = Instant::now();

        let resp = self.client.get(&url).send().await.map_err(|e| self.classify(e))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(FeedError::Status {
                status: status.as_u16(),
                body: body.chars().take(200).collect(),
            });
        }

        let body: serde_json::Value = resp
            .json()
            .await
            .map_err(|e| FeedError::parse(e.to_string()))?;

        let fields = self.normalizer.normalize(&symbol, &body)?;
        let latency = started.elapsed();

        Ok((
            RawReading::from_fields(&self.config.id, instrument, fields, now_ms()),
            latency,
        ))
    }

    fn classify(&self, e: reqwest::Error) -> FeedError {
        if e.is_timeout() {
            FeedError::Timeout(self.config.timeout())
        } else {
            FeedError::Transport(e.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::SourceTier;
    use serde_json::json;

    #[test]
    fn num_accepts_strings_and_numbers() {
        assert_eq!(num(&json!("1.5")), Some(1.5));
        assert_eq!(num(&json!(2)), Some(2.0));
        assert_eq!(num(&json!("abc")), None);
        assert_eq!(num(&json!(null)), None);
    }

    #[test]
    fn required_price_rejects_zero() {
        assert!(required_price(&json!("0"), "price").is_err());
        assert!(required_price(&json!(null), "price").is_err());
        assert_eq!(required_price(&json!("101.5"), "price").unwrap(), 101.5);
    }

    #[test]
    fn symbol_override_wins() {
        let mut cfg = FeedConfig::new("cg", FeedKind::CoinGecko, 60, 0.1, SourceTier::Tier3);
        cfg.symbol_overrides.insert("PEPE".into(), "pepe".into());
        let client = FeedClient::new(cfg, "USDT").unwrap();
        assert_eq!(client.symbol_for("PEPE"), "pepe");
        assert_eq!(client.symbol_for("BTC"), "bitcoin");
    }

    #[test]
    fn reading_age() {
        let r = RawReading::from_fields("a", "BTC", TickerFields { price: 1.0, ..Default::default() }, 1_000);
        assert_eq!(r.age_ms(31_000), 30_000);
    }
}
