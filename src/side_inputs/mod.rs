// =============================================================================
// Side Inputs — funding, sentiment, order-book depth and whale flow
// =============================================================================
//
// Four scheduled pollers feed a `SideInputStore`.  Every value is stamped
// with the time it was fetched; anything older than `max_age` reads as
// missing, and the market analyzer substitutes its neutral default.
//
// Sentiment (Fear & Greed) is market-wide; the other three are per
// instrument.
// =============================================================================

pub mod funding_rate;
pub mod orderbook;
pub mod sentiment;
pub mod whale;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use parking_lot::RwLock;
use serde::Serialize;
use tracing::{debug, instrument, warn};

pub use funding_rate::FundingState;
pub use orderbook::DepthState;
pub use sentiment::SentimentReading;
pub use whale::WhaleFlow;

use crate::runtime_config::SideInputSettings;
use crate::types::now_ms;

// =============================================================================
// Store
// =============================================================================

#[derive(Debug, Clone, Serialize)]
struct Stamped<T> {
    value: T,
    at_ms: i64,
}

#[derive(Debug, Default)]
struct InstrumentInputs {
    funding: Option<Stamped<FundingState>>,
    depth: Option<Stamped<DepthState>>,
    whale: Option<Stamped<WhaleFlow>>,
}

/// Side inputs of one instrument, stale values already removed.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SideInputs {
    pub sentiment: Option<SentimentReading>,
    pub whale: Option<WhaleFlow>,
    pub funding: Option<FundingState>,
    pub orderbook: Option<DepthState>,
}

pub struct SideInputStore {
    instruments: RwLock<HashMap<String, InstrumentInputs>>,
    sentiment: RwLock<Option<Stamped<SentimentReading>>>,
    max_age_ms: i64,
}

impl SideInputStore {
    pub fn new(max_age: Duration) -> Self {
        Self {
            instruments: RwLock::new(HashMap::new()),
            sentiment: RwLock::new(None),
            max_age_ms: max_age.as_millis() as i64,
        }
    }

    pub fn set_funding(&self, symbol: &str, value: FundingState, at_ms: i64) {
        self.instruments
            .write()
            .entry(symbol.to_string())
            .or_default()
            .funding = Some(Stamped { value, at_ms });
    }

    pub fn set_depth(&self, symbol: &str, value: DepthState, at_ms: i64) {
        self.instruments
            .write()
            .entry(symbol.to_string())
            .or_default()
            .depth = Some(Stamped { value, at_ms });
    }

    pub fn set_whale(&self, symbol: &str, value: WhaleFlow, at_ms: i64) {
        self.instruments
            .write()
            .entry(symbol.to_string())
            .or_default()
            .whale = Some(Stamped { value, at_ms });
    }

    pub fn set_sentiment(&self, value: SentimentReading, at_ms: i64) {
        *self.sentiment.write() = Some(Stamped { value, at_ms });
    }

    pub fn get(&self, symbol: &str) -> SideInputs {
        self.get_at(symbol, now_ms())
    }

    pub fn get_at(&self, symbol: &str, now_ms: i64) -> SideInputs {
        let fresh = |at_ms: i64| now_ms - at_ms <= self.max_age_ms;
        fn pick<T: Clone>(s: &Option<Stamped<T>>, fresh: impl Fn(i64) -> bool) -> Option<T> {
            s.as_ref().filter(|s| fresh(s.at_ms)).map(|s| s.value.clone())
        }

        let sentiment = pick(&*self.sentiment.read(), fresh);
        let map = self.instruments.read();
        match map.get(symbol) {
            Some(inputs) => SideInputs {
                sentiment,
                whale: pick(&inputs.whale, fresh),
                funding: pick(&inputs.funding, fresh),
                orderbook: pick(&inputs.depth, fresh),
            },
            None => SideInputs {
                sentiment,
                ..Default::default()
            },
        }
    }
}

// =============================================================================
// Providers
// =============================================================================

/// Public endpoints the providers poll.
#[derive(Debug, Clone)]
pub struct Endpoints {
    pub futures: String,
    pub spot: String,
    pub sentiment: String,
}

impl Default for Endpoints {
    fn default() -> Self {
        Self {
            futures: "https://fapi.binance.com".to_string(),
            spot: "https://api.binance.com".to_string(),
            sentiment: "https://api.alternative.me".to_string(),
        }
    }
}

/// Fetches side inputs for the configured instruments into a store.
pub struct SideInputProvider {
    client: reqwest::Client,
    endpoints: Endpoints,
    store: Arc<SideInputStore>,
    symbols: Vec<String>,
    quote: String,
    depth_levels: usize,
    whale_threshold_usd: f64,
}

impl SideInputProvider {
    pub fn new(
        settings: &SideInputSettings,
        store: Arc<SideInputStore>,
        symbols: Vec<String>,
        quote: &str,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .user_agent("fusion-alpha/1.0")
            .build()
            .context("failed to build side-input HTTP client")?;

        Ok(Self {
            client,
            endpoints: Endpoints::default(),
            store,
            symbols,
            quote: quote.to_string(),
            depth_levels: settings.depth_levels.max(1),
            whale_threshold_usd: settings.whale_threshold_usd,
        })
    }

    async fn get_json(&self, url: &str) -> Result<serde_json::Value> {
        let resp = self
            .client
            .get(url)
            .send()
            .await
            .with_context(|| format!("GET {url}"))?;

        let status = resp.status();
        let body: serde_json::Value = resp
            .json()
            .await
            .with_context(|| format!("failed to parse response body from {url}"))?;

        if !status.is_success() {
            anyhow::bail!("{url} returned {status}: {body}");
        }
        Ok(body)
    }

    fn pair(&self, symbol: &str) -> String {
        format!("{}{}", symbol.to_uppercase(), self.quote)
    }

    #[instrument(skip(self))]
    pub async fn fetch_funding(&self, symbol: &str) -> Result<FundingState> {
        let url = format!(
            "{}/fapi/v1/fundingRate?symbol={}&limit=1",
            self.endpoints.futures,
            self.pair(symbol)
        );
        funding_rate::parse_funding(&self.get_json(&url).await?)
    }

    #[instrument(skip(self))]
    pub async fn fetch_sentiment(&self) -> Result<SentimentReading> {
        let url = format!("{}/fng/?limit=1", self.endpoints.sentiment);
        sentiment::parse_fear_greed(&self.get_json(&url).await?)
    }

    #[instrument(skip(self))]
    pub async fn fetch_depth(&self, symbol: &str) -> Result<DepthState> {
        let url = format!(
            "{}/api/v3/depth?symbol={}&limit=20",
            self.endpoints.spot,
            self.pair(symbol)
        );
        orderbook::parse_depth(&self.get_json(&url).await?, self.depth_levels)
    }

    #[instrument(skip(self))]
    pub async fn fetch_whale(&self, symbol: &str) -> Result<WhaleFlow> {
        let url = format!(
            "{}/api/v3/aggTrades?symbol={}&limit=500",
            self.endpoints.spot,
            self.pair(symbol)
        );
        whale::parse_agg_trades(&self.get_json(&url).await?, self.whale_threshold_usd)
    }

    // ── Scheduled jobs ──────────────────────────────────────────────────

    pub async fn refresh_funding(&self) -> Result<()> {
        let mut failures = 0;
        for symbol in &self.symbols {
            match self.fetch_funding(symbol).await {
                Ok(state) => {
                    debug!(symbol = %symbol, rate_pct = state.rate_pct, signal = state.signal, "funding rate fetched");
                    self.store.set_funding(symbol, state, now_ms());
                }
                Err(e) => {
                    failures += 1;
                    warn!(symbol = %symbol, error = %e, "funding rate fetch failed");
                }
            }
        }
        self.all_failed("funding", failures)
    }

    pub async fn refresh_sentiment(&self) -> Result<()> {
        let reading = self.fetch_sentiment().await?;
        debug!(value = reading.value, classification = %reading.classification, "sentiment fetched");
        self.store.set_sentiment(reading, now_ms());
        Ok(())
    }

    pub async fn refresh_depth(&self) -> Result<()> {
        let mut failures = 0;
        for symbol in &self.symbols {
            match self.fetch_depth(symbol).await {
                Ok(depth) => self.store.set_depth(symbol, depth, now_ms()),
                Err(e) => {
                    failures += 1;
                    warn!(symbol = %symbol, error = %e, "depth fetch failed");
                }
            }
        }
        self.all_failed("depth", failures)
    }

    pub async fn refresh_whale(&self) -> Result<()> {
        let mut failures = 0;
        for symbol in &self.symbols {
            match self.fetch_whale(symbol).await {
                Ok(flow) => {
                    debug!(symbol = %symbol, large_trades = flow.large_trades, "whale flow fetched");
                    self.store.set_whale(symbol, flow, now_ms());
                }
                Err(e) => {
                    failures += 1;
                    warn!(symbol = %symbol, error = %e, "whale flow fetch failed");
                }
            }
        }
        self.all_failed("whale", failures)
    }

    fn all_failed(&self, what: &str, failures: usize) -> Result<()> {
        if failures > 0 && failures == self.symbols.len() {
            anyhow::bail!("{what}: every instrument failed");
        }
        Ok(())
    }
}
