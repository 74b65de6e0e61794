// =============================================================================
// Coinbase Exchange — GET /products/{product}/ticker
// =============================================================================
//
// Expected shape:
// { "trade_id": 1, "price": "64001.00", "size": "0.01",
//   "bid": "64000.50", "ask": "64001.50", "volume": "8123.4", "time": "..." }
//
// No 24h high/low on this endpoint; fusion falls back to other sources.

use super::{num, optional_positive, required_price, FeedError, Normalizer, TickerFields};

pub struct CoinbaseTicker;

impl Normalizer for CoinbaseTicker {
    fn default_base_url(&self) -> &'static str {
        "https://api.exchange.coinbase.com"
    }

    fn symbol(&self, instrument: &str, _quote: &str) -> String {
        format!("{}-USD", instrument.to_uppercase())
    }

    fn url(&self, base_url: &str, symbol: &str) -> String {
        format!("{base_url}/products/{symbol}/ticker")
    }

    fn normalize(&self, _symbol: &str, body: &serde_json::Value) -> Result<TickerFields, FeedError> {
        if let Some(msg) = body.get("message").and_then(|m| m.as_str()) {
            return Err(FeedError::parse(format!("coinbase error: {msg}")));
        }

        Ok(TickerFields {
            price: required_price(&body["price"], "price")?,
            volume: num(&body["volume"]).unwrap_or(0.0).max(0.0),
            high_24h: None,
            low_24h: None,
            bid: optional_positive(&body["bid"]),
            ask: optional_positive(&body["ask"]),
            change_24h_pct: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_ticker() {
        let body = json!({
            "trade_id": 1,
            "price": "64001.00",
            "size": "0.01",
            "bid": "64000.50",
            "ask": "64001.50",
            "volume": "8123.4"
        });
        let t = CoinbaseTicker.normalize("BTC-USD", &body).unwrap();
        assert_eq!(t.price, 64001.0);
        assert_eq!(t.volume, 8123.4);
        assert!(t.high_24h.is_none());
    }

    #[test]
    fn not_found_message_is_error() {
        let body = json!({ "message": "NotFound" });
        assert!(CoinbaseTicker.normalize("FOO-USD", &body).is_err());
    }
}
