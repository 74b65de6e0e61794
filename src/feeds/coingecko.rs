// =============================================================================
// CoinGecko — GET /api/v3/simple/price
// =============================================================================
//
// Expected shape:
// { "bitcoin": { "usd": 64000.5, "usd_24h_vol": 25600000000.0,
//                "usd_24h_change": 1.3 } }
//
// Volume is quote-denominated and is converted to base units. No bid/ask,
// no high/low: this is a slow, low-weight sanity feed.

use super::{num, required_price, FeedError, Normalizer, TickerFields};

pub struct CoinGeckoTicker;

/// Canonical instrument -> CoinGecko coin id.
fn coin_id(instrument: &str) -> String {
    match instrument.to_uppercase().as_str() {
        "BTC" => "bitcoin",
        "ETH" => "ethereum",
        "SOL" => "solana",
        "BNB" => "binancecoin",
        "XRP" => "ripple",
        "ADA" => "cardano",
        "DOGE" => "dogecoin",
        "AVAX" => "avalanche-2",
        "DOT" => "polkadot",
        "LINK" => "chainlink",
        other => return other.to_lowercase(),
    }
    .to_string()
}

impl Normalizer for CoinGeckoTicker {
    fn default_base_url(&self) -> &'static str {
        "https://api.coingecko.com"
    }

    fn symbol(&self, instrument: &str, _quote: &str) -> String {
        coin_id(instrument)
    }

    fn url(&self, base_url: &str, symbol: &str) -> String {
        format!(
            "{base_url}/api/v3/simple/price?ids={symbol}&vs_currencies=usd&include_24hr_vol=true&include_24hr_change=true"
        )
    }

    fn normalize(&self, symbol: &str, body: &serde_json::Value) -> Result<TickerFields, FeedError> {
        let entry = body
            .get(symbol)
            .filter(|e| e.is_object())
            .ok_or_else(|| FeedError::Empty(symbol.to_string()))?;

        let price = required_price(&entry["usd"], "usd")?;
        let quote_volume = num(&entry["usd_24h_vol"]).unwrap_or(0.0).max(0.0);

        Ok(TickerFields {
            price,
            volume: quote_volume / price,
            high_24h: None,
            low_24h: None,
            bid: None,
            ask: None,
            change_24h_pct: num(&entry["usd_24h_change"]),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn converts_quote_volume_to_base() {
        let body = json!({ "bitcoin": { "usd": 50000.0, "usd_24h_vol": 1000000.0, "usd_24h_change": -2.5 } });
        let t = CoinGeckoTicker.normalize("bitcoin", &body).unwrap();
        assert_eq!(t.price, 50000.0);
        assert!((t.volume - 20.0).abs() < 1e-9);
        assert_eq!(t.change_24h_pct, Some(-2.5));
    }

    #[test]
    fn missing_coin_is_empty() {
        let body = json!({});
        assert!(matches!(
            CoinGeckoTicker.normalize("bitcoin", &body),
            Err(FeedError::Empty(_))
        ));
    }

    #[test]
    fn unknown_instrument_falls_back_to_lowercase() {
        assert_eq!(CoinGeckoTicker.symbol("PEPE", "USDT"), "pepe");
        assert_eq!(CoinGeckoTicker.symbol("BNB", "USDT"), "binancecoin");
    }
}
