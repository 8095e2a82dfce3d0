use axum::{http::StatusCode, response::IntoResponse};
use thiserror::Error;

use crate::fetcher::FetchError;
use crate::prices::PriceError;
use crate::registry::RegistryLoadError;
use crate::scorer::ScoringUnavailable;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("HTTP request error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Database migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("Registry load error: {0}")]
    Registry(#[from] RegistryLoadError),

    #[error("Fetch error: {0}")]
    Fetch(#[from] FetchError),

    #[error("Scoring unavailable: {0}")]
    Scoring(#[from] ScoringUnavailable),

    #[error("Price feed error: {0}")]
    Price(#[from] PriceError),

    #[error("Another pass is in progress (held by {holder} since {acquired_at})")]
    PassInProgress { holder: String, acquired_at: i64 },

    #[error("Stored data is inconsistent: {0}")]
    Corrupt(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, AppError>;

impl AppError {
    /// Errors that abort a whole pass. Everything else is absorbed by the
    /// stage that hit it and retried on the next pass.
    pub fn is_stage_fatal(&self) -> bool {
        !matches!(self, AppError::Fetch(_) | AppError::Scoring(_))
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        let status = match &self {
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Config(_) => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, self.to_string()).into_response()
    }
}
