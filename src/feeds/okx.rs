// =============================================================================
// OKX v5 — GET /api/v5/market/ticker?instId={inst}
// =============================================================================
//
// Expected shape:
// { "code": "0", "msg": "",
//   "data": [ { "instId": "BTC-USDT", "last": "64000.1", "vol24h": "7000",
//               "high24h": "65000", "low24h": "63000", "open24h": "63200",
//               "bidPx": "64000", "askPx": "64000.2" } ] }

use super::{num, optional_positive, required_price, FeedError, Normalizer, TickerFields};

pub struct OkxTicker;

impl Normalizer for OkxTicker {
    fn default_base_url(&self) -> &'static str {
        "https://www.okx.com"
    }

    fn symbol(&self, instrument: &str, quote: &str) -> String {
        format!("{}-{}", instrument.to_uppercase(), quote.to_uppercase())
    }

    fn url(&self, base_url: &str, symbol: &str) -> String {
        format!("{base_url}/api/v5/market/ticker?instId={symbol}")
    }

    fn normalize(&self, symbol: &str, body: &serde_json::Value) -> Result<TickerFields, FeedError> {
        let code = body["code"].as_str().unwrap_or("");
        if code != "0" {
            return Err(FeedError::parse(format!(
                "okx code {code}: {}",
                body["msg"].as_str().unwrap_or("")
            )));
        }

        let entry = body["data"]
            .as_array()
            .and_then(|d| d.first())
            .ok_or_else(|| FeedError::Empty(symbol.to_string()))?;

        let price = required_price(&entry["last"], "last")?;
        let change_24h_pct = optional_positive(&entry["open24h"]).map(|open| (price - open) / open * 100.0);

        Ok(TickerFields {
            price,
            volume: num(&entry["vol24h"]).unwrap_or(0.0).max(0.0),
            high_24h: optional_positive(&entry["high24h"]),
            low_24h: optional_positive(&entry["low24h"]),
            bid: optional_positive(&entry["bidPx"]),
            ask: optional_positive(&entry["askPx"]),
            change_24h_pct,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_ticker_and_derives_change() {
        let body = json!({
            "code": "0",
            "msg": "",
            "data": [ {
                "instId": "BTC-USDT",
                "last": "66000",
                "vol24h": "7000",
                "high24h": "67000",
                "low24h": "63000",
                "open24h": "60000",
                "bidPx": "65999",
                "askPx": "66001"
            } ]
        });
        let t = OkxTicker.normalize("BTC-USDT", &body).unwrap();
        assert_eq!(t.price, 66000.0);
        assert!((t.change_24h_pct.unwrap() - 10.0).abs() < 1e-9);
    }

    #[test]
    fn error_code_fails() {
        let body = json!({ "code": "51001", "msg": "Instrument ID does not exist", "data": [] });
        assert!(OkxTicker.normalize("FOO-USDT", &body).is_err());
    }
}
