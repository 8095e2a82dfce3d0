use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::AppError;

// ---------------------------------------------------------------------------
// Posts
// ---------------------------------------------------------------------------

/// A post as returned by the external source, before it is stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawPost {
    /// Source-assigned id, globally unique.
    pub id: String,
    pub subreddit: String,
    pub author: String,
    pub created_at: DateTime<Utc>,
    pub title: String,
    pub selftext: String,
    pub permalink: String,
    pub upvotes: i64,
}

impl RawPost {
    /// Text the extractor and scorer see: title and body joined.
    pub fn raw_text(&self) -> String {
        if self.selftext.trim().is_empty() {
            self.title.clone()
        } else {
            format!("{}. {}", self.title, self.selftext)
        }
    }
}

/// A stored post.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Post {
    pub id: String,
    pub subreddit: String,
    pub author: String,
    pub created_at: DateTime<Utc>,
    pub raw_text: String,
    pub permalink: String,
    pub upvotes: i64,
    pub extracted: bool,
    pub processed: bool,
}

// ---------------------------------------------------------------------------
// Mentions
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchType {
    Symbol,
    CompanyName,
}

impl std::fmt::Display for MatchType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MatchType::Symbol => write!(f, "symbol"),
            MatchType::CompanyName => write!(f, "company_name"),
        }
    }
}

impl FromStr for MatchType {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "symbol" => Ok(MatchType::Symbol),
            "company_name" => Ok(MatchType::CompanyName),
            other => Err(AppError::Corrupt(format!("unknown match_type {other:?}"))),
        }
    }
}

/// One ticker reference found in a post, before it is stored.
#[derive(Debug, Clone, PartialEq)]
pub struct ExtractedMention {
    pub ticker: String,
    pub match_type: MatchType,
    pub confidence: f64,
    /// Byte range of the first occurrence of the winning match type.
    pub span: (usize, usize),
}

/// A stored mention, joined with what scoring needs from its post.
#[derive(Debug, Clone, PartialEq)]
pub struct Mention {
    pub id: i64,
    pub post_id: String,
    pub ticker: String,
    pub match_type: MatchType,
    pub confidence: f64,
    pub span: (usize, usize),
}

// ---------------------------------------------------------------------------
// Sentiment
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SentimentLabel {
    Positive,
    Negative,
    Neutral,
}

impl std::fmt::Display for SentimentLabel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            SentimentLabel::Positive => "positive",
            SentimentLabel::Negative => "negative",
            SentimentLabel::Neutral => "neutral",
        };
        write!(f, "{s}")
    }
}

impl FromStr for SentimentLabel {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "positive" => Ok(SentimentLabel::Positive),
            "negative" => Ok(SentimentLabel::Negative),
            "neutral" => Ok(SentimentLabel::Neutral),
            other => Err(AppError::Corrupt(format!("unknown sentiment label {other:?}"))),
        }
    }
}

/// What the model returns for one piece of text.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Sentiment {
    /// In [-1, 1].
    pub polarity: f64,
    pub label: SentimentLabel,
    /// In [0, 1].
    pub confidence: f64,
}

// ---------------------------------------------------------------------------
// Aggregates
// ---------------------------------------------------------------------------

/// Width of the aggregation key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BucketGranularity {
    Hour,
    Day,
}

impl BucketGranularity {
    pub fn width_secs(self) -> i64 {
        match self {
            BucketGranularity::Hour => 3_600,
            BucketGranularity::Day => 86_400,
        }
    }

    /// Start of the bucket containing `ts`, in unix seconds.
    pub fn bucket_of(self, ts: DateTime<Utc>) -> i64 {
        let width = self.width_secs();
        ts.timestamp().div_euclid(width) * width
    }
}

impl std::fmt::Display for BucketGranularity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BucketGranularity::Hour => write!(f, "hour"),
            BucketGranularity::Day => write!(f, "day"),
        }
    }
}

impl FromStr for BucketGranularity {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "hour" | "hourly" => Ok(BucketGranularity::Hour),
            "day" | "daily" => Ok(BucketGranularity::Day),
            other => Err(AppError::Config(format!(
                "BUCKET_GRANULARITY must be hour or day, got {other:?}"
            ))),
        }
    }
}

/// A post kept to illustrate a bucket's sentiment range.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Representative {
    pub post_id: String,
    pub polarity: f64,
    /// Unix seconds of the post, used for tie-breaking.
    pub created_at: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TickerAggregate {
    pub ticker: String,
    /// Bucket start, unix seconds.
    pub bucket: i64,
    pub mention_count: i64,
    pub sentiment_sum: f64,
    pub sentiment_min: f64,
    pub sentiment_max: f64,
    pub representatives: Vec<Representative>,
}

impl TickerAggregate {
    /// Derived on read; never stored.
    pub fn mean(&self) -> Option<f64> {
        if self.mention_count == 0 {
            None
        } else {
            Some(self.sentiment_sum / self.mention_count as f64)
        }
    }
}

pub fn from_unix(secs: i64) -> DateTime<Utc> {
    DateTime::from_timestamp(secs, 0).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn day_bucket_floors_to_midnight_utc() {
        let ts = DateTime::parse_from_rfc3339("2024-03-05T17:42:10Z").unwrap().with_timezone(&Utc);
        let bucket = BucketGranularity::Day.bucket_of(ts);
        assert_eq!(from_unix(bucket).to_rfc3339(), "2024-03-05T00:00:00+00:00");
    }

    #[test]
    fn hour_bucket_floors_to_the_hour() {
        let ts = DateTime::parse_from_rfc3339("2024-03-05T17:42:10Z").unwrap().with_timezone(&Utc);
        let bucket = BucketGranularity::Hour.bucket_of(ts);
        assert_eq!(from_unix(bucket).to_rfc3339(), "2024-03-05T17:00:00+00:00");
    }

    #[test]
    fn raw_text_joins_title_and_body() {
        let post = RawPost {
            id: "abc".to_string(),
            subreddit: "stocks".to_string(),
            author: "u".to_string(),
            created_at: from_unix(0),
            title: "TSLA to the moon".to_string(),
            selftext: "Bought calls".to_string(),
            permalink: "/r/stocks/abc".to_string(),
            upvotes: 1,
        };
        assert_eq!(post.raw_text(), "TSLA to the moon. Bought calls");

        let link_post = RawPost { selftext: "  ".to_string(), ..post };
        assert_eq!(link_post.raw_text(), "TSLA to the moon");
    }

    #[test]
    fn mean_is_derived_from_sum_and_count() {
        let agg = TickerAggregate {
            ticker: "TSLA".to_string(),
            bucket: 0,
            mention_count: 4,
            sentiment_sum: 1.0,
            sentiment_min: -0.5,
            sentiment_max: 0.9,
            representatives: Vec::new(),
        };
        assert_eq!(agg.mean(), Some(0.25));
    }
}
