use async_trait::async_trait;
use tracing::debug;

use crate::config::Config;
use crate::prices::{DailyClose, PriceError, PriceSource};

const DAY: i64 = 86_400;

/// Daily candles from a Yahoo-style `/v8/finance/chart/{ticker}` endpoint.
pub struct HttpPriceSource {
    client: reqwest::Client,
    base_url: String,
}

impl HttpPriceSource {
    pub fn new(cfg: &Config) -> Result<Self, PriceError> {
        let client = reqwest::Client::builder()
            .timeout(cfg.http_timeout)
            .user_agent(cfg.reddit_user_agent.clone())
            .build()?;
        Ok(Self { client, base_url: cfg.price_url.trim_end_matches('/').to_string() })
    }
}

#[async_trait]
impl PriceSource for HttpPriceSource {
    async fn daily_closes(&self, ticker: &str, from: i64, to: i64) -> Result<Vec<DailyClose>, PriceError> {
        let url = format!(
            "{}/{ticker}?period1={from}&period2={to}&interval=1d",
            self.base_url
        );
        let resp = self.client.get(&url).send().await?;
        if !resp.status().is_success() {
            return Err(PriceError::Status { ticker: ticker.to_string(), status: resp.status().as_u16() });
        }
        let body: serde_json::Value = resp.json().await?;
        let closes = parse_chart(&body)?;
        debug!(ticker, days = closes.len(), "Fetched daily closes");
        Ok(closes.into_iter().filter(|c| c.day >= from.div_euclid(DAY) * DAY && c.day < to).collect())
    }
}

/// Pair `timestamp[i]` with `indicators.quote[0].close[i]`. Days without a
/// close (halts, the still-open session) are skipped.
pub fn parse_chart(body: &serde_json::Value) -> Result<Vec<DailyClose>, PriceError> {
    let chart = body
        .get("chart")
        .ok_or_else(|| PriceError::Malformed("response has no chart object".to_string()))?;
    if let Some(err) = chart.get("error").filter(|e| !e.is_null()) {
        let description = err.get("description").and_then(|d| d.as_str()).unwrap_or("unknown error");
        return Err(PriceError::Malformed(description.to_string()));
    }
    let result = chart
        .get("result")
        .and_then(|r| r.as_array())
        .and_then(|r| r.first())
        .ok_or_else(|| PriceError::Malformed("chart has no result".to_string()))?;

    // A range with no trading days has no timestamp array at all.
    let Some(timestamps) = result.get("timestamp").and_then(|t| t.as_array()) else {
        return Ok(Vec::new());
    };
    let closes = result
        .pointer("/indicators/quote/0/close")
        .and_then(|c| c.as_array())
        .ok_or_else(|| PriceError::Malformed("chart has no close series".to_string()))?;
    if closes.len() != timestamps.len() {
        return Err(PriceError::Malformed(format!(
            "{} timestamps but {} closes",
            timestamps.len(),
            closes.len()
        )));
    }

    let mut days: Vec<DailyClose> = timestamps
        .iter()
        .zip(closes)
        .filter_map(|(ts, close)| {
            let ts = ts.as_i64()?;
            let close = close.as_f64().filter(|c| c.is_finite() && *c > 0.0)?;
            Some(DailyClose { day: ts.div_euclid(DAY) * DAY, close })
        })
        .collect();
    days.sort_by_key(|d| d.day);
    days.dedup_by_key(|d| d.day);
    Ok(days)
}
