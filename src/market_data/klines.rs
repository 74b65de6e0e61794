// =============================================================================
// Kline Poller — REST candles for every (instrument, timeframe)
// =============================================================================

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::{debug, instrument, warn};

use super::candle_buffer::{Candle, CandleBuffer, CandleKey};
use crate::types::{now_ms, Timeframe};

/// Public Binance spot klines client feeding a [`CandleBuffer`].
pub struct KlinePoller {
    client: reqwest::Client,
    base_url: String,
    quote: String,
    limit: u32,
    buffer: Arc<CandleBuffer>,
}

impl KlinePoller {
    pub fn new(buffer: Arc<CandleBuffer>, quote: &str, limit: u32) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .user_agent("fusion-alpha/1.0")
            .build()
            .context("failed to build kline HTTP client")?;

        Ok(Self {
            client,
            base_url: "https://api.binance.com".to_string(),
            quote: quote.to_string(),
            limit: limit.clamp(1, 1000),
            buffer,
        })
    }

    /// GET /api/v3/klines (public).
    #[instrument(skip(self), name = "klines::get_klines")]
    pub async fn get_klines(&self, symbol: &str, timeframe: Timeframe) -> Result<Vec<Candle>> {
        let url = format!(
            "{}/api/v3/klines?symbol={}{}&interval={}&limit={}",
            self.base_url,
            symbol.to_uppercase(),
            self.quote,
            timeframe.as_str(),
            self.limit
        );

        let resp = self
            .client
            .get(&url)
            .send()
            .await
            .context("GET /api/v3/klines request failed")?;

        let status = resp.status();
        let body: serde_json::Value = resp
            .json()
            .await
            .context("failed to parse klines response")?;

        if !status.is_success() {
            anyhow::bail!("GET /api/v3/klines returned {}: {}", status, body);
        }

        let candles = parse_klines(&body, now_ms())?;
        debug!(symbol, timeframe = %timeframe, count = candles.len(), "klines fetched");
        Ok(candles)
    }

    /// Refresh every timeframe of every instrument. Fails only if nothing
    /// could be refreshed.
    pub async fn refresh(&self, symbols: &[String]) -> Result<()> {
        let mut ok = 0usize;
        let mut failed = 0usize;
        for symbol in symbols {
            for timeframe in Timeframe::ALL {
                match self.get_klines(symbol, timeframe).await {
                    Ok(candles) => {
                        ok += 1;
                        self.buffer.merge(CandleKey::new(symbol, timeframe), candles);
                    }
                    Err(e) => {
                        failed += 1;
                        warn!(symbol = %symbol, timeframe = %timeframe, error = %e, "kline refresh failed");
                    }
                }
            }
        }
        if ok == 0 && failed > 0 {
            anyhow::bail!("kline refresh failed for all {failed} series");
        }
        Ok(())
    }
}

/// Parse a klines array. A candle whose close time is still in the future is
/// marked in progress.
pub fn parse_klines(body: &serde_json::Value, now_ms: i64) -> Result<Vec<Candle>> {
    let raw = body.as_array().context("klines response is not an array")?;

    let mut candles = Vec::with_capacity(raw.len());
    for entry in raw {
        let arr = entry.as_array().context("kline entry is not an array")?;

        if arr.len() < 7 {
            warn!("skipping malformed kline entry with {} elements", arr.len());
            continue;
        }

        let open_time = arr[0].as_i64().unwrap_or(0);
        let open = parse_str_f64(&arr[1])?;
        let high = parse_str_f64(&arr[2])?;
        let low = parse_str_f64(&arr[3])?;
        let close = parse_str_f64(&arr[4])?;
        let volume = parse_str_f64(&arr[5])?;
        let close_time = arr[6].as_i64().unwrap_or(0);

        let mut candle = Candle::new(open_time, open, high, low, close, volume, close_time);
        candle.is_closed = close_time < now_ms;
        candles.push(candle);
    }

    Ok(candles)
}

fn parse_str_f64(val: &serde_json::Value) -> Result<f64> {
    if let Some(s) = val.as_str() {
        s.parse::<f64>()
            .with_context(|| format!("failed to parse '{s}' as f64"))
    } else if let Some(n) = val.as_f64() {
        Ok(n)
    } else {
        anyhow::bail!("expected string or number, got: {val}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_binance_klines() {
        let body = json!([
            [1000, "100.0", "110.0", "95.0", "105.0", "12.5", 1999, "0", 10, "0", "0", "0"],
            [2000, "105.0", "106.0", "104.0", "105.5", "3.0", 2999, "0", 4, "0", "0", "0"]
        ]);
        let candles = parse_klines(&body, 2_500).unwrap();
        assert_eq!(candles.len(), 2);
        assert_eq!(candles[0].high, 110.0);
        assert_eq!(candles[0].volume, 12.5);
        assert!(candles[0].is_closed);
        assert!(!candles[1].is_closed);
    }

    #[test]
    fn skips_short_entries_and_rejects_garbage() {
        let body = json!([[1000, "1.0"]]);
        assert!(parse_klines(&body, 0).unwrap().is_empty());

        let body = json!([[1000, "x", "1", "1", "1", "1", 1999]]);
        assert!(parse_klines(&body, 0).is_err());
        assert!(parse_klines(&json!({"code": -1}), 0).is_err());
    }
}
