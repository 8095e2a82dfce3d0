use std::str::FromStr;
use std::time::Duration;

use crate::error::{AppError, Result};
use crate::types::BucketGranularity;

pub const REDDIT_API_URL: &str = "https://oauth.reddit.com";
pub const REDDIT_PUBLIC_URL: &str = "https://www.reddit.com";
pub const REDDIT_TOKEN_URL: &str = "https://www.reddit.com/api/v1/access_token";
pub const SENTIMENT_URL: &str = "http://127.0.0.1:8000/score";
pub const PRICE_URL: &str = "https://query1.finance.yahoo.com/v8/finance/chart";

/// Reddit caps listing pages at 100 items.
pub const REDDIT_PAGE_SIZE: usize = 100;

/// Posts pulled from a subreddit that has no watermark yet.
pub const DEFAULT_FETCH_LIMIT: usize = 200;

pub const DEFAULT_SUBREDDITS: &[&str] = &["stocks", "wallstreetbets", "investing"];

/// Confidence assigned to each kind of occurrence by the extractor.
/// Values are in [0, 1]; the low-confidence policy compares against them.
pub mod confidence {
    /// `$TSLA`, `$on`: explicit cashtag.
    pub const CASHTAG: f64 = 1.0;
    /// Uppercase symbol that is not a common word.
    pub const SYMBOL: f64 = 0.95;
    /// Ambiguous uppercase symbol followed by a ticker keyword ("ON stock").
    pub const SYMBOL_WITH_KEYWORD: f64 = 0.90;
    /// Ambiguous uppercase symbol with no marker ("IT is up").
    pub const AMBIGUOUS_SYMBOL: f64 = 0.30;
    /// Company name starting with a capital letter ("Tesla").
    pub const NAME_CAPITALIZED: f64 = 0.85;
    /// Company name in any other casing ("tesla").
    pub const NAME_OTHER: f64 = 0.60;
    /// Lowercase one-word name that is also an everyday word ("one block at a time").
    pub const NAME_AMBIGUOUS: f64 = 0.30;
}

/// What to do with mentions whose confidence falls below the threshold.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LowConfidencePolicy {
    /// Persist and score every mention the extractor reports.
    Include,
    /// Drop mentions below the threshold before they are persisted.
    Exclude,
}

impl FromStr for LowConfidencePolicy {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "include" => Ok(LowConfidencePolicy::Include),
            "exclude" => Ok(LowConfidencePolicy::Exclude),
            other => Err(AppError::Config(format!(
                "LOW_CONFIDENCE_POLICY must be include or exclude, got {other:?}"
            ))),
        }
    }
}

/// Text handed to the sentiment model for one mention.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScoringWindow {
    /// The whole post.
    Full,
    /// `n` characters on each side of the mention span.
    Chars(usize),
}

impl FromStr for ScoringWindow {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        if s.eq_ignore_ascii_case("full") {
            return Ok(ScoringWindow::Full);
        }
        match s.parse::<usize>() {
            Ok(0) | Err(_) => Err(AppError::Config(format!(
                "SCORING_WINDOW must be `full` or a positive character count, got {s:?}"
            ))),
            Ok(n) => Ok(ScoringWindow::Chars(n)),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct RedditCredentials {
    pub client_id: String,
    pub client_secret: String,
    pub username: String,
    pub password: String,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub db_path: String,
    pub log_level: String,
    pub lexicon_path: String,
    pub subreddits: Vec<String>,
    /// Max posts fetched on a subreddit's first run (FETCH_LIMIT). Later
    /// passes walk back to the watermark regardless.
    pub fetch_limit: usize,
    /// Processed posts older than this are pruned (RETENTION_DAYS)
    pub retention: Duration,
    pub bucket: BucketGranularity,
    /// Representative posts kept per (ticker, bucket) (REPRESENTATIVE_K)
    pub representative_k: usize,
    pub low_confidence_policy: LowConfidencePolicy,
    pub low_confidence_threshold: f64,
    /// Extra symbols treated as common words (AMBIGUOUS_SYMBOLS, comma-separated)
    pub extra_ambiguous: Vec<String>,
    pub scoring_window: ScoringWindow,
    pub scoring_concurrency: usize,
    pub sentiment_url: String,
    pub model_version: String,
    /// Daily chart endpoint for the correlation report (PRICE_URL)
    pub price_url: String,
    pub http_timeout: Duration,
    pub reddit_user_agent: String,
    /// None = unauthenticated public listing
    pub reddit_credentials: Option<RedditCredentials>,
    pub lock_stale: Duration,
    pub api_port: u16,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            db_path: "retail_radar.db".to_string(),
            log_level: "info".to_string(),
            lexicon_path: "tickers.csv".to_string(),
            subreddits: DEFAULT_SUBREDDITS.iter().map(|s| s.to_string()).collect(),
            fetch_limit: DEFAULT_FETCH_LIMIT,
            retention: Duration::from_secs(90 * 86_400),
            bucket: BucketGranularity::Day,
            representative_k: 5,
            low_confidence_policy: LowConfidencePolicy::Exclude,
            low_confidence_threshold: 0.5,
            extra_ambiguous: Vec::new(),
            scoring_window: ScoringWindow::Full,
            scoring_concurrency: 4,
            sentiment_url: SENTIMENT_URL.to_string(),
            model_version: "finbert-tone".to_string(),
            price_url: PRICE_URL.to_string(),
            http_timeout: Duration::from_secs(30),
            reddit_user_agent: "retail-radar/0.1".to_string(),
            reddit_credentials: None,
            lock_stale: Duration::from_secs(3600),
            api_port: 3000,
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self> {
        // A missing .env is fine; the process environment still applies.
        let _ = dotenvy::dotenv();
        let defaults = Config::default();

        let retention_days: u64 = parse_var("RETENTION_DAYS", 90)?;
        let representative_k: usize = parse_var("REPRESENTATIVE_K", defaults.representative_k)?;
        if representative_k == 0 {
            return Err(AppError::Config("REPRESENTATIVE_K must be at least 1".to_string()));
        }
        let low_confidence_threshold: f64 =
            parse_var("LOW_CONFIDENCE_THRESHOLD", defaults.low_confidence_threshold)?;
        if !(0.0..=1.0).contains(&low_confidence_threshold) {
            return Err(AppError::Config(
                "LOW_CONFIDENCE_THRESHOLD must be within [0, 1]".to_string(),
            ));
        }

        let subreddits = list_var("SUBREDDITS");
        let reddit_credentials = match (
            std::env::var("REDDIT_CLIENT_ID"),
            std::env::var("REDDIT_CLIENT_SECRET"),
            std::env::var("REDDIT_USERNAME"),
            std::env::var("REDDIT_PASSWORD"),
        ) {
            (Ok(client_id), Ok(client_secret), Ok(username), Ok(password)) => {
                Some(RedditCredentials { client_id, client_secret, username, password })
            }
            _ => None,
        };

        Ok(Self {
            db_path: std::env::var("DB_PATH").unwrap_or(defaults.db_path),
            log_level: std::env::var("LOG_LEVEL").unwrap_or(defaults.log_level),
            lexicon_path: std::env::var("LEXICON_PATH").unwrap_or(defaults.lexicon_path),
            subreddits: if subreddits.is_empty() { defaults.subreddits } else { subreddits },
            fetch_limit: parse_var("FETCH_LIMIT", defaults.fetch_limit)?,
            retention: retention_from_days(retention_days)?,
            bucket: parse_var("BUCKET_GRANULARITY", defaults.bucket)?,
            representative_k,
            low_confidence_policy: parse_var("LOW_CONFIDENCE_POLICY", defaults.low_confidence_policy)?,
            low_confidence_threshold,
            extra_ambiguous: list_var("AMBIGUOUS_SYMBOLS"),
            scoring_window: parse_var("SCORING_WINDOW", defaults.scoring_window)?,
            scoring_concurrency: parse_var("SCORING_CONCURRENCY", defaults.scoring_concurrency)?.max(1),
            sentiment_url: std::env::var("SENTIMENT_URL").unwrap_or(defaults.sentiment_url),
            model_version: std::env::var("MODEL_VERSION").unwrap_or(defaults.model_version),
            price_url: std::env::var("PRICE_URL").unwrap_or(defaults.price_url),
            http_timeout: Duration::from_secs(parse_var("HTTP_TIMEOUT_SECS", 30u64)?),
            reddit_user_agent: std::env::var("REDDIT_USER_AGENT").unwrap_or(defaults.reddit_user_agent),
            reddit_credentials,
            lock_stale: Duration::from_secs(parse_var("LOCK_STALE_SECS", 3600u64)?),
            api_port: parse_var("API_PORT", defaults.api_port)?,
        })
    }
}

fn retention_from_days(days: u64) -> Result<Duration> {
    days.checked_mul(86_400)
        .map(Duration::from_secs)
        .ok_or_else(|| AppError::Config(format!("RETENTION_DAYS is too large: {days}")))
}

fn parse_var<T>(name: &str, default: T) -> Result<T>
where
    T: FromStr,
{
    match std::env::var(name) {
        Ok(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse::<T>()
            .map_err(|_| AppError::Config(format!("{name} has an invalid value: {raw:?}"))),
        _ => Ok(default),
    }
}

fn list_var(name: &str) -> Vec<String> {
    std::env::var(name)
        .unwrap_or_default()
        .split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scoring_window_parses_full_and_counts() {
        assert_eq!("full".parse::<ScoringWindow>().unwrap(), ScoringWindow::Full);
        assert_eq!(" FULL ".parse::<ScoringWindow>().unwrap(), ScoringWindow::Full);
        assert_eq!("120".parse::<ScoringWindow>().unwrap(), ScoringWindow::Chars(120));
        assert!("0".parse::<ScoringWindow>().is_err());
        assert!("wide".parse::<ScoringWindow>().is_err());
    }

    #[test]
    fn low_confidence_policy_is_an_enumerated_option() {
        assert_eq!("include".parse::<LowConfidencePolicy>().unwrap(), LowConfidencePolicy::Include);
        assert_eq!("Exclude".parse::<LowConfidencePolicy>().unwrap(), LowConfidencePolicy::Exclude);
        assert!("maybe".parse::<LowConfidencePolicy>().is_err());
    }

    #[test]
    fn defaults_cover_the_usual_subreddits() {
        let cfg = Config::default();
        assert_eq!(cfg.subreddits, vec!["stocks", "wallstreetbets", "investing"]);
        assert_eq!(cfg.fetch_limit, 200);
        assert_eq!(cfg.retention, Duration::from_secs(90 * 86_400));
        assert_eq!(cfg.bucket, BucketGranularity::Day);
    }

    #[test]
    fn retention_days_overflow_is_a_config_error() {
        assert_eq!(retention_from_days(90).unwrap(), Duration::from_secs(90 * 86_400));
        assert!(matches!(retention_from_days(u64::MAX), Err(AppError::Config(_))));
        assert!(matches!(retention_from_days(u64::MAX / 86_400 + 1), Err(AppError::Config(_))));
        assert!(retention_from_days(u64::MAX / 86_400).is_ok());
    }
}
