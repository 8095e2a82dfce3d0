//! Database row types matching migrations/0001_init.sql.
//! Used by sqlx for typed queries.

use crate::error::{AppError, Result};
use crate::types::{from_unix, Mention, Post, Representative, TickerAggregate};

#[derive(Debug, sqlx::FromRow)]
pub struct PostRow {
    pub id: String,
    pub subreddit: String,
    pub author: String,
    pub created_at: i64,
    pub raw_text: String,
    pub permalink: String,
    pub upvotes: i64,
    pub extracted: i64,
    pub processed: i64,
}

impl From<PostRow> for Post {
    fn from(r: PostRow) -> Self {
        Post {
            id: r.id,
            subreddit: r.subreddit,
            author: r.author,
            created_at: from_unix(r.created_at),
            raw_text: r.raw_text,
            permalink: r.permalink,
            upvotes: r.upvotes,
            extracted: r.extracted != 0,
            processed: r.processed != 0,
        }
    }
}

#[derive(Debug, sqlx::FromRow)]
pub struct MentionRow {
    pub id: i64,
    pub post_id: String,
    pub ticker: String,
    pub match_type: String,
    pub confidence: f64,
    pub span_start: i64,
    pub span_end: i64,
}

impl TryFrom<MentionRow> for Mention {
    type Error = AppError;

    fn try_from(r: MentionRow) -> Result<Self> {
        Ok(Mention {
            id: r.id,
            post_id: r.post_id,
            ticker: r.ticker,
            match_type: r.match_type.parse()?,
            confidence: r.confidence,
            span: (to_usize(r.span_start)?, to_usize(r.span_end)?),
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
pub struct AggregateRow {
    pub ticker: String,
    pub bucket: i64,
    pub mention_count: i64,
    pub sentiment_sum: f64,
    pub sentiment_min: f64,
    pub sentiment_max: f64,
    pub representatives: String,
}

impl TryFrom<AggregateRow> for TickerAggregate {
    type Error = AppError;

    fn try_from(r: AggregateRow) -> Result<Self> {
        let representatives: Vec<Representative> = serde_json::from_str(&r.representatives)?;
        Ok(TickerAggregate {
            ticker: r.ticker,
            bucket: r.bucket,
            mention_count: r.mention_count,
            sentiment_sum: r.sentiment_sum,
            sentiment_min: r.sentiment_min,
            sentiment_max: r.sentiment_max,
            representatives,
        })
    }
}

/// A committed score with the post fields replay and backfill need.
#[derive(Debug, sqlx::FromRow)]
pub struct ScoredMentionRow {
    pub post_id: String,
    pub created_at: i64,
    pub polarity: f64,
}

impl From<ScoredMentionRow> for Representative {
    fn from(r: ScoredMentionRow) -> Self {
        Representative { post_id: r.post_id, polarity: r.polarity, created_at: r.created_at }
    }
}

#[derive(Debug, sqlx::FromRow, serde::Serialize)]
pub struct TickerSummaryRow {
    pub ticker: String,
    pub total_mentions: i64,
    pub buckets: i64,
    pub first_bucket: i64,
    pub last_bucket: i64,
}

#[derive(Debug, sqlx::FromRow, serde::Serialize)]
pub struct RecentPostRow {
    pub id: String,
    pub subreddit: String,
    pub created_at: i64,
    pub permalink: String,
    pub upvotes: i64,
    pub polarity: Option<f64>,
    pub label: Option<String>,
}

#[derive(Debug, sqlx::FromRow)]
pub struct PassLockRow {
    pub holder: String,
    pub acquired_at: i64,
}

fn to_usize(v: i64) -> Result<usize> {
    usize::try_from(v).map_err(|_| AppError::Corrupt(format!("negative span offset {v}")))
}
