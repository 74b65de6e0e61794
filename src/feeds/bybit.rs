// =============================================================================
// Bybit v5 — GET /v5/market/tickers?category=spot&symbol={symbol}
// =============================================================================
//
// Expected shape:
// { "retCode": 0, "retMsg": "OK",
//   "result": { "list": [ {
//       "symbol": "BTCUSDT", "lastPrice": "64000", "volume24h": "9000",
//       "highPrice24h": "65000", "lowPrice24h": "63000",
//       "bid1Price": "63999.9", "ask1Price": "64000.1",
//       "price24hPcnt": "0.0125" } ] } }
//
// `price24hPcnt` is a fraction, not a percentage.

use super::{num, optional_positive, required_price, FeedError, Normalizer, TickerFields};

pub struct BybitTicker;

impl Normalizer for BybitTicker {
    fn default_base_url(&self) -> &'static str {
        "https://api.bybit.com"
    }

    fn symbol(&self, instrument: &str, quote: &str) -> String {
        format!("{}{}", instrument.to_uppercase(), quote.to_uppercase())
    }

    fn url(&self, base_url: &str, symbol: &str) -> String {
        format!("{base_url}/v5/market/tickers?category=spot&symbol={symbol}")
    }

    fn normalize(&self, symbol: &str, body: &serde_json::Value) -> Result<TickerFields, FeedError> {
        let code = body["retCode"].as_i64().unwrap_or(-1);
        if code != 0 {
            return Err(FeedError::parse(format!(
                "bybit retCode {code}: {}",
                body["retMsg"].as_str().unwrap_or("")
            )));
        }

        let entry = body["result"]["list"]
            .as_array()
            .and_then(|l| l.first())
            .ok_or_else(|| FeedError::Empty(symbol.to_string()))?;

        Ok(TickerFields {
            price: required_price(&entry["lastPrice"], "lastPrice")?,
            volume: num(&entry["volume24h"]).unwrap_or(0.0).max(0.0),
            high_24h: optional_positive(&entry["highPrice24h"]),
            low_24h: optional_positive(&entry["lowPrice24h"]),
            bid: optional_positive(&entry["bid1Price"]),
            ask: optional_positive(&entry["ask1Price"]),
            change_24h_pct: num(&entry["price24hPcnt"]).map(|f| f * 100.0),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_spot_ticker() {
        let body = json!({
            "retCode": 0,
            "retMsg": "OK",
            "result": { "list": [ {
                "symbol": "BTCUSDT",
                "lastPrice": "64000",
                "volume24h": "9000",
                "highPrice24h": "65000",
                "lowPrice24h": "63000",
                "bid1Price": "63999.9",
                "ask1Price": "64000.1",
                "price24hPcnt": "0.0125"
            } ] }
        });
        let t = BybitTicker.normalize("BTCUSDT", &body).unwrap();
        assert_eq!(t.price, 64000.0);
        assert!((t.change_24h_pct.unwrap() - 1.25).abs() < 1e-9);
    }

    #[test]
    fn non_zero_ret_code_fails() {
        let body = json!({ "retCode": 10001, "retMsg": "params error" });
        assert!(BybitTicker.normalize("X", &body).is_err());
    }

    #[test]
    fn empty_list_is_empty_error() {
        let body = json!({ "retCode": 0, "result": { "list": [] } });
        assert!(matches!(BybitTicker.normalize("X", &body), Err(FeedError::Empty(_))));
    }
}
