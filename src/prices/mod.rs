pub mod chart;

use async_trait::async_trait;
use thiserror::Error;

pub use chart::HttpPriceSource;

#[derive(Debug, Error)]
pub enum PriceError {
    #[error("transport failure: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("price feed answered HTTP {status} for {ticker}")]
    Status { ticker: String, status: u16 },

    #[error("unexpected chart shape: {0}")]
    Malformed(String),
}

/// Closing price of one trading day.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DailyClose {
    /// UTC midnight of the trading day, unix seconds.
    pub day: i64,
    pub close: f64,
}

/// Daily closing prices for a ticker.
#[async_trait]
pub trait PriceSource: Send + Sync {
    /// Closes for trading days in `[from, to)` (unix seconds), oldest first.
    async fn daily_closes(&self, ticker: &str, from: i64, to: i64) -> Result<Vec<DailyClose>, PriceError>;
}
