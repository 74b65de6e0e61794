// =============================================================================
// Binance — GET /api/v3/ticker/24hr
// =============================================================================
//
// Expected shape (all numbers as JSON strings):
// {
//   "symbol": "BTCUSDT", "lastPrice": "64000.10", "volume": "12345.6",
//   "highPrice": "65000.00", "lowPrice": "63000.00",
//   "bidPrice": "64000.00", "askPrice": "64000.20",
//   "priceChangePercent": "1.25"
// }

use super::{num, optional_positive, required_price, FeedError, Normalizer, TickerFields};

pub struct BinanceTicker;

impl Normalizer for BinanceTicker {
    fn default_base_url(&self) -> &'static str {
        "https://api.binance.com"
    }

    fn symbol(&self, instrument: &str, quote: &str) -> String {
        format!("{}{}", instrument.to_uppercase(), quote.to_uppercase())
    }

    fn url(&self, base_url: &str, symbol: &str) -> String {
        format!("{base_url}/api/v3/ticker/24hr?symbol={symbol}")
    }

    fn normalize(&self, _symbol: &str, body: &serde_json::Value) -> Result<TickerFields, FeedError> {
        if let Some(code) = body.get("code") {
            return Err(FeedError::parse(format!(
                "binance error {code}: {}",
                body["msg"].as_str().unwrap_or("")
            )));
        }

        Ok(TickerFields {
            price: required_price(&body["lastPrice"], "lastPrice")?,
            volume: num(&body["volume"]).unwrap_or(0.0).max(0.0),
            high_24h: optional_positive(&body["highPrice"]),
            low_24h: optional_positive(&body["lowPrice"]),
            bid: optional_positive(&body["bidPrice"]),
            ask: optional_positive(&body["askPrice"]),
            change_24h_pct: num(&body["priceChangePercent"]),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_24h_ticker() {
        let body = json!({
            "symbol": "BTCUSDT",
            "lastPrice": "64000.10",
            "volume": "12345.6",
            "highPrice": "65000.00",
            "lowPrice": "63000.00",
            "bidPrice": "64000.00",
            "askPrice": "64000.20",
            "priceChangePercent": "1.25"
        });
        let t = BinanceTicker.normalize("BTCUSDT", &body).unwrap();
        assert!((t.price - 64000.10).abs() < 1e-9);
        assert_eq!(t.high_24h, Some(65000.0));
        assert_eq!(t.bid, Some(64000.0));
        assert_eq!(t.change_24h_pct, Some(1.25));
    }

    #[test]
    fn api_error_is_a_parse_failure() {
        let body = json!({ "code": -1121, "msg": "Invalid symbol." });
        assert!(matches!(
            BinanceTicker.normalize("FOOUSDT", &body),
            Err(FeedError::Parse(_))
        ));
    }

    #[test]
    fn formats_symbol() {
        assert_eq!(BinanceTicker.symbol("btc", "usdt"), "BTCUSDT");
    }
}
