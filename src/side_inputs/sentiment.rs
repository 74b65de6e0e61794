// =============================================================================
// Sentiment — market-wide Fear & Greed index
// =============================================================================

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::feeds::num;

/// One Fear & Greed reading, 0 (extreme fear) to 100 (extreme greed).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SentimentReading {
    pub value: f64,
    pub classification: String,
}

/// Parse an alternative.me `/fng/?limit=1` response.
///
/// ```json
/// { "data": [{ "value": "45", "value_classification": "Fear", "timestamp": "1700000000" }] }
/// ```
pub fn parse_fear_greed(body: &serde_json::Value) -> Result<SentimentReading> {
    let entry = body["data"]
        .as_array()
        .context("fear & greed response has no data array")?
        .first()
        .context("fear & greed data array is empty")?;

    let value = num(&entry["value"]).context("missing or non-numeric value")?;
    if !(0.0..=100.0).contains(&value) {
        anyhow::bail!("fear & greed value {value} outside [0, 100]");
    }

    let classification = entry["value_classification"]
        .as_str()
        .map(str::to_string)
        .unwrap_or_else(|| classify(value).to_string());

    Ok(SentimentReading {
        value,
        classification,
    })
}

fn classify(value: f64) -> &'static str {
    match value {
        v if v < 25.0 => "Extreme Fear",
        v if v < 45.0 => "Fear",
        v if v <= 55.0 => "Neutral",
        v if v <= 75.0 => "Greed",
        _ => "Extreme Greed",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_alternative_me_payload() {
        let body = json!({ "data": [{ "value": "72", "value_classification": "Greed" }] });
        let r = parse_fear_greed(&body).unwrap();
        assert_eq!(r.value, 72.0);
        assert_eq!(r.classification, "Greed");
    }

    #[test]
    fn classification_fallback() {
        let body = json!({ "data": [{ "value": 10 }] });
        assert_eq!(parse_fear_greed(&body).unwrap().classification, "Extreme Fear");
    }

    #[test]
    fn rejects_out_of_range() {
        assert!(parse_fear_greed(&json!({ "data": [{ "value": "140" }] })).is_err());
        assert!(parse_fear_greed(&json!({ "data": [] })).is_err());
    }
}
