// =============================================================================
// Kraken — GET /0/public/Ticker?pair={pair}
// =============================================================================
//
// Expected shape:
// { "error": [],
//   "result": { "XXBTZUSD": {
//       "a": ["64001.0", "1", "1.000"],   ask [price, whole lot, lot]
//       "b": ["64000.0", "1", "1.000"],   bid
//       "c": ["64000.5", "0.01"],         last trade [price, lot]
//       "v": ["100.0", "2500.0"],         volume [today, last 24h]
//       "h": ["64500.0", "65000.0"],      high   [today, last 24h]
//       "l": ["63500.0", "63000.0"] } } } low    [today, last 24h]
//
// The result key is Kraken's internal pair name, which differs from the
// requested one, so the first entry is taken.

use super::{num, optional_positive, required_price, FeedError, Normalizer, TickerFields};

pub struct KrakenTicker;

impl Normalizer for KrakenTicker {
    fn default_base_url(&self) -> &'static str {
        "https://api.kraken.com"
    }

    fn symbol(&self, instrument: &str, _quote: &str) -> String {
        let base = match instrument.to_uppercase().as_str() {
            "BTC" => "XBT".to_string(),
            "DOGE" => "XDG".to_string(),
            other => other.to_string(),
        };
        format!("{base}USD")
    }

    fn url(&self, base_url: &str, symbol: &str) -> String {
        format!("{base_url}/0/public/Ticker?pair={symbol}")
    }

    fn normalize(&self, symbol: &str, body: &serde_json::Value) -> Result<TickerFields, FeedError> {
        if let Some(errors) = body["error"].as_array() {
            if !errors.is_empty() {
                return Err(FeedError::parse(format!("kraken error: {errors:?}")));
            }
        }

        let entry = body["result"]
            .as_object()
            .and_then(|m| m.values().next())
            .ok_or_else(|| FeedError::Empty(symbol.to_string()))?;

        Ok(TickerFields {
            price: required_price(&entry["c"][0], "c[0]")?,
            volume: num(&entry["v"][1]).unwrap_or(0.0).max(0.0),
            high_24h: optional_positive(&entry["h"][1]),
            low_24h: optional_positive(&entry["l"][1]),
            bid: optional_positive(&entry["b"][0]),
            ask: optional_positive(&entry["a"][0]),
            change_24h_pct: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_first_result_entry() {
        let body = json!({
            "error": [],
            "result": { "XXBTZUSD": {
                "a": ["64001.0", "1", "1.000"],
                "b": ["64000.0", "1", "1.000"],
                "c": ["64000.5", "0.01"],
                "v": ["100.0", "2500.0"],
                "h": ["64500.0", "65000.0"],
                "l": ["63500.0", "63000.0"]
            }}
        });
        let t = KrakenTicker.normalize("XBTUSD", &body).unwrap();
        assert_eq!(t.price, 64000.5);
        assert_eq!(t.volume, 2500.0);
        assert_eq!(t.high_24h, Some(65000.0));
        assert_eq!(t.low_24h, Some(63000.0));
        assert_eq!(t.ask, Some(64001.0));
    }

    #[test]
    fn error_array_fails() {
        let body = json!({ "error": ["EQuery:Unknown asset pair"] });
        assert!(KrakenTicker.normalize("FOOUSD", &body).is_err());
    }

    #[test]
    fn empty_result_is_empty_error() {
        let body = json!({ "error": [], "result": {} });
        assert!(matches!(
            KrakenTicker.normalize("XBTUSD", &body),
            Err(FeedError::Empty(_))
        ));
    }

    #[test]
    fn maps_btc_to_xbt() {
        assert_eq!(KrakenTicker.symbol("BTC", "USDT"), "XBTUSD");
        assert_eq!(KrakenTicker.symbol("ETH", "USDT"), "ETHUSD");
    }
}
