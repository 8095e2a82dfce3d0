use std::collections::BTreeSet;
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::{Sqlite, SqlitePool, Transaction};
use tracing::{debug, info};

use crate::db::aggregate::{self, Consistency, Pruned};
use crate::db::models::{
    AggregateRow, MentionRow, PassLockRow, PostRow, RecentPostRow, ScoredMentionRow,
    TickerSummaryRow,
};
use crate::error::{AppError, Result};
use crate::types::{
    from_unix, BucketGranularity, ExtractedMention, Mention, Post, RawPost, Representative,
    Sentiment, TickerAggregate,
};

/// Open (creating if needed) the store at `db_path` and apply migrations.
pub async fn connect(db_path: &str) -> Result<SqlitePool> {
    let options = SqliteConnectOptions::from_str(&format!("sqlite:{db_path}"))?
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .foreign_keys(true)
        .busy_timeout(Duration::from_secs(5));
    let pool = SqlitePoolOptions::new().max_connections(4).connect_with(options).await?;
    sqlx::migrate!("./migrations").run(&pool).await?;
    info!("Database ready at {db_path}");
    Ok(pool)
}

/// Open an existing store for readers; writes fail at the SQLite level.
pub async fn connect_read_only(db_path: &str) -> Result<SqlitePool> {
    let options = SqliteConnectOptions::from_str(&format!("sqlite:{db_path}"))?
        .read_only(true)
        .busy_timeout(Duration::from_secs(5));
    Ok(SqlitePoolOptions::new().max_connections(4).connect_with(options).await?)
}

/// A private in-memory store. One connection, since each in-memory
/// connection would otherwise be its own database.
pub async fn connect_in_memory() -> Result<SqlitePool> {
    let options = SqliteConnectOptions::from_str("sqlite::memory:")?.foreign_keys(true);
    let pool = SqlitePoolOptions::new().max_connections(1).connect_with(options).await?;
    sqlx::migrate!("./migrations").run(&pool).await?;
    Ok(pool)
}

#[derive(Debug, Clone, Copy)]
pub struct StoreSettings {
    pub bucket: BucketGranularity,
    pub representative_k: usize,
}

/// What a prune removed.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct PruneOutcome {
    pub posts_deleted: u64,
    pub mentions_deleted: u64,
    pub aggregates_refreshed: usize,
}

/// Owns persistence for posts, mentions, scores, aggregates and watermarks.
///
/// Only the active pass writes. Every multi-row change runs in one
/// transaction, so an interrupted pass leaves either all or none of it.
#[derive(Clone)]
pub struct AggregationStore {
    pool: SqlitePool,
    settings: StoreSettings,
}

impl AggregationStore {
    pub fn new(pool: SqlitePool, settings: StoreSettings) -> Self {
        Self { pool, settings }
    }

    // -----------------------------------------------------------------------
    // Ingest
    // -----------------------------------------------------------------------

    pub async fn post_exists(&self, id: &str) -> Result<bool> {
        let found: Option<i64> = sqlx::query_scalar("SELECT 1 FROM posts WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(found.is_some())
    }

    pub async fn watermark(&self, subreddit: &str) -> Result<Option<DateTime<Utc>>> {
        let ts: Option<i64> = sqlx::query_scalar(
            "SELECT last_created_at FROM subreddit_watermarks WHERE subreddit = ?",
        )
        .bind(subreddit)
        .fetch_optional(&self.pool)
        .await?;
        Ok(ts.map(from_unix))
    }

    /// Store a fetched batch and advance the subreddit watermark in one
    /// transaction. Already-stored ids are skipped. Returns how many posts
    /// were new.
    pub async fn store_batch(&self, subreddit: &str, posts: &[RawPost]) -> Result<u64> {
        let now = Utc::now().timestamp();
        let mut tx = self.pool.begin().await?;
        let mut inserted = 0u64;
        for post in posts {
            let result = sqlx::query(
                r#"
                INSERT OR IGNORE INTO posts (
                    id, subreddit, author, created_at, raw_text, permalink, upvotes, ingested_at
                ) VALUES (?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(&post.id)
            .bind(&post.subreddit)
            .bind(&post.author)
            .bind(post.created_at.timestamp())
            .bind(post.raw_text())
            .bind(&post.permalink)
            .bind(post.upvotes)
            .bind(now)
            .execute(&mut *tx)
            .await?;
            inserted += result.rows_affected();
        }

        if let Some(newest) = posts.iter().map(|p| p.created_at.timestamp()).max() {
            sqlx::query(
                r#"
                INSERT INTO subreddit_watermarks (subreddit, last_created_at, updated_at)
                VALUES (?, ?, ?)
                ON CONFLICT(subreddit) DO UPDATE SET
                    last_created_at = MAX(last_created_at, excluded.last_created_at),
                    updated_at = excluded.updated_at
                "#,
            )
            .bind(subreddit)
            .bind(newest)
            .bind(now)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(inserted)
    }

    // -----------------------------------------------------------------------
    // Extraction
    // -----------------------------------------------------------------------

    pub async fn unextracted_posts(&self) -> Result<Vec<Post>> {
        let rows = sqlx::query_as::<_, PostRow>(
            r#"
            SELECT id, subreddit, author, created_at, raw_text, permalink, upvotes, extracted, processed
            FROM posts
            WHERE extracted = 0
            ORDER BY created_at, id
            "#,
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(Post::from).collect())
    }

    /// Persist a post's mentions and mark it extracted. A post with nothing
    /// to score is processed at the same time.
    pub async fn record_mentions(&self, post_id: &str, mentions: &[ExtractedMention]) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        for m in mentions {
            sqlx::query(
                r#"
                INSERT OR IGNORE INTO mentions (post_id, ticker, match_type, confidence, span_start, span_end)
                VALUES (?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(post_id)
            .bind(&m.ticker)
            .bind(m.match_type.to_string())
            .bind(m.confidence)
            .bind(to_i64(m.span.0))
            .bind(to_i64(m.span.1))
            .execute(&mut *tx)
            .await?;
        }
        let processed = i64::from(mentions.is_empty());
        sqlx::query("UPDATE posts SET extracted = 1, processed = MAX(processed, ?) WHERE id = ? AND extracted = 0")
            .bind(processed)
            .bind(post_id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Scoring + aggregation
    // -----------------------------------------------------------------------

    /// Extracted but unprocessed posts, each with its unscored mentions.
    pub async fn pending_scoring(&self) -> Result<Vec<(Post, Vec<Mention>)>> {
        let posts = sqlx::query_as::<_, PostRow>(
            r#"
            SELECT id, subreddit, author, created_at, raw_text, permalink, upvotes, extracted, processed
            FROM posts
            WHERE extracted = 1 AND processed = 0
            ORDER BY created_at, id
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        let mut pending = Vec::with_capacity(posts.len());
        for row in posts {
            let post = Post::from(row);
            let mentions = sqlx::query_as::<_, MentionRow>(
                r#"
                SELECT m.id, m.post_id, m.ticker, m.match_type, m.confidence, m.span_start, m.span_end
                FROM mentions m
                LEFT JOIN sentiment_scores s ON s.mention_id = m.id
                WHERE m.post_id = ? AND s.id IS NULL
                ORDER BY m.ticker
                "#,
            )
            .bind(&post.id)
            .fetch_all(&self.pool)
            .await?
            .into_iter()
            .map(Mention::try_from)
            .collect::<Result<Vec<_>>>()?;
            pending.push((post, mentions));
        }
        Ok(pending)
    }

    /// Commit every score of one post, fold them into their aggregates and
    /// mark the post processed, all in one transaction. Any failure rolls the
    /// whole post back.
    pub async fn commit_post_scores(
        &self,
        post: &Post,
        scores: &[(Mention, Sentiment)],
        model_version: &str,
    ) -> Result<()> {
        let now = Utc::now().timestamp();
        let bucket = self.settings.bucket.bucket_of(post.created_at);
        let mut tx = self.pool.begin().await?;

        for (mention, sentiment) in scores {
            if mention.post_id != post.id {
                return Err(AppError::Corrupt(format!(
                    "mention {} belongs to post {}, not {}",
                    mention.id, mention.post_id, post.id
                )));
            }
            sqlx::query(
                r#"
                INSERT INTO sentiment_scores (mention_id, polarity, label, confidence, model_version, scored_at)
                VALUES (?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(mention.id)
            .bind(sentiment.polarity)
            .bind(sentiment.label.to_string())
            .bind(sentiment.confidence)
            .bind(model_version)
            .bind(now)
            .execute(&mut *tx)
            .await?;

            let mut agg = load_aggregate(&mut tx, &mention.ticker, bucket)
                .await?
                .unwrap_or_else(|| aggregate::empty(&mention.ticker, bucket));
            aggregate::apply(
                &mut agg,
                Representative {
                    post_id: post.id.clone(),
                    polarity: sentiment.polarity,
                    created_at: post.created_at.timestamp(),
                },
                self.settings.representative_k,
            );
            save_aggregate(&mut tx, &agg, now).await?;
        }

        let updated = sqlx::query("UPDATE posts SET processed = 1 WHERE id = ? AND processed = 0")
            .bind(&post.id)
            .execute(&mut *tx)
            .await?
            .rows_affected();
        if updated != 1 {
            return Err(AppError::Corrupt(format!(
                "post {} was already processed or is missing",
                post.id
            )));
        }
        tx.commit().await?;
        debug!(post_id = %post.id, scores = scores.len(), bucket, "Committed post scores");
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Reads
    // -----------------------------------------------------------------------

    pub async fn aggregate(&self, ticker: &str, bucket: i64) -> Result<Option<TickerAggregate>> {
        let row = sqlx::query_as::<_, AggregateRow>(AGGREGATE_SELECT)
            .bind(ticker)
            .bind(bucket)
            .fetch_optional(&self.pool)
            .await?;
        row.map(TickerAggregate::try_from).transpose()
    }

    /// Aggregates for `ticker` whose bucket starts within `[from, to)`.
    pub async fn aggregates_in_range(
        &self,
        ticker: &str,
        from: i64,
        to: i64,
    ) -> Result<Vec<TickerAggregate>> {
        sqlx::query_as::<_, AggregateRow>(
            r#"
            SELECT ticker, bucket, mention_count, sentiment_sum, sentiment_min, sentiment_max, representatives
            FROM ticker_aggregates
            WHERE ticker = ? AND bucket >= ? AND bucket < ?
            ORDER BY bucket
            "#,
        )
        .bind(ticker)
        .bind(from)
        .bind(to)
        .fetch_all(&self.pool)
        .await?
        .into_iter()
        .map(TickerAggregate::try_from)
        .collect()
    }

    pub async fn ticker_summaries(&self) -> Result<Vec<TickerSummaryRow>> {
        Ok(sqlx::query_as::<_, TickerSummaryRow>(
            r#"
            SELECT ticker,
                   SUM(mention_count) AS total_mentions,
                   COUNT(*) AS buckets,
                   MIN(bucket) AS first_bucket,
                   MAX(bucket) AS last_bucket
            FROM ticker_aggregates
            GROUP BY ticker
            ORDER BY total_mentions DESC, ticker
            "#,
        )
        .fetch_all(&self.pool)
        .await?)
    }

    /// Most recent retained posts mentioning `ticker`, with their score if any.
    pub async fn recent_posts(&self, ticker: &str, limit: i64) -> Result<Vec<RecentPostRow>> {
        Ok(sqlx::query_as::<_, RecentPostRow>(
            r#"
            SELECT p.id, p.subreddit, p.created_at, p.permalink, p.upvotes, s.polarity, s.label
            FROM mentions m
            JOIN posts p ON p.id = m.post_id
            LEFT JOIN sentiment_scores s ON s.mention_id = m.id
            WHERE m.ticker = ?
            ORDER BY p.created_at DESC, p.id
            LIMIT ?
            "#,
        )
        .bind(ticker)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?)
    }

    pub async fn post_count(&self) -> Result<i64> {
        Ok(sqlx::query_scalar("SELECT COUNT(*) FROM posts").fetch_one(&self.pool).await?)
    }

    pub async fn unprocessed_count(&self) -> Result<i64> {
        Ok(sqlx::query_scalar("SELECT COUNT(*) FROM posts WHERE processed = 0")
            .fetch_one(&self.pool)
            .await?)
    }

    pub async fn buckets_for(&self, ticker: &str) -> Result<Vec<i64>> {
        Ok(sqlx::query_scalar("SELECT bucket FROM ticker_aggregates WHERE ticker = ? ORDER BY bucket")
            .bind(ticker)
            .fetch_all(&self.pool)
            .await?)
    }

    // -----------------------------------------------------------------------
    // Consistency check
    // -----------------------------------------------------------------------

    /// Rebuild a bucket from its retained scores, in commit order.
    pub async fn replay_aggregate(&self, ticker: &str, bucket: i64) -> Result<TickerAggregate> {
        let rows = scored_mentions_in_bucket(&self.pool, ticker, bucket, self.settings.bucket).await?;
        let mut agg = aggregate::empty(ticker, bucket);
        for row in rows {
            aggregate::apply(&mut agg, Representative::from(row), self.settings.representative_k);
        }
        Ok(agg)
    }

    pub async fn verify_aggregate(&self, ticker: &str, bucket: i64) -> Result<Consistency> {
        let stored = self
            .aggregate(ticker, bucket)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("no aggregate for {ticker} at bucket {bucket}")))?;
        let replayed = self.replay_aggregate(ticker, bucket).await?;
        let (mentions, sentiment_sum): (i64, f64) = sqlx::query_as(
            r#"
            SELECT COALESCE(SUM(pruned_mentions), 0), COALESCE(SUM(pruned_sum), 0.0)
            FROM bucket_prunes WHERE ticker = ? AND bucket = ?
            "#,
        )
        .bind(ticker)
        .bind(bucket)
        .fetch_one(&self.pool)
        .await?;
        Ok(aggregate::compare(&stored, &replayed, Pruned { mentions, sentiment_sum }))
    }

    // -----------------------------------------------------------------------
    // Retention
    // -----------------------------------------------------------------------

    /// Delete processed posts created before `cutoff`, with their mentions and
    /// scores, then refresh the representatives of every aggregate that
    /// pointed at them. Aggregate counters are left untouched.
    pub async fn prune_before(&self, cutoff: DateTime<Utc>) -> Result<PruneOutcome> {
        let cutoff = cutoff.timestamp();
        let granularity = self.settings.bucket;
        let k = self.settings.representative_k;
        let mut tx = self.pool.begin().await?;

        let doomed: Vec<(String, i64, f64)> = sqlx::query_as(
            r#"
            SELECT m.ticker, p.created_at, s.polarity
            FROM mentions m
            JOIN posts p ON p.id = m.post_id
            JOIN sentiment_scores s ON s.mention_id = m.id
            WHERE p.processed = 1 AND p.created_at < ?
            "#,
        )
        .bind(cutoff)
        .fetch_all(&mut *tx)
        .await?;

        let mut affected: BTreeSet<(String, i64)> = BTreeSet::new();
        for (ticker, created_at, polarity) in doomed {
            let bucket = granularity.bucket_of(from_unix(created_at));
            sqlx::query(
                r#"
                INSERT INTO bucket_prunes (ticker, bucket, pruned_mentions, pruned_sum)
                VALUES (?, ?, 1, ?)
                ON CONFLICT(ticker, bucket) DO UPDATE SET
                    pruned_mentions = pruned_mentions + 1,
                    pruned_sum = pruned_sum + excluded.pruned_sum
                "#,
            )
            .bind(&ticker)
            .bind(bucket)
            .bind(polarity)
            .execute(&mut *tx)
            .await?;
            affected.insert((ticker, bucket));
        }

        sqlx::query(
            r#"
            DELETE FROM sentiment_scores WHERE mention_id IN (
                SELECT m.id FROM mentions m JOIN posts p ON p.id = m.post_id
                WHERE p.processed = 1 AND p.created_at < ?
            )
            "#,
        )
        .bind(cutoff)
        .execute(&mut *tx)
        .await?;
        let mentions_deleted = sqlx::query(
            r#"
            DELETE FROM mentions WHERE post_id IN (
                SELECT id FROM posts WHERE processed = 1 AND created_at < ?
            )
            "#,
        )
        .bind(cutoff)
        .execute(&mut *tx)
        .await?
        .rows_affected();
        let posts_deleted = sqlx::query("DELETE FROM posts WHERE processed = 1 AND created_at < ?")
            .bind(cutoff)
            .execute(&mut *tx)
            .await?
            .rows_affected();

        // Aggregates can also hold ids deleted by an earlier run that failed
        // before refreshing them.
        let dangling: Vec<(String, i64)> = sqlx::query_as(
            r#"
            SELECT DISTINCT a.ticker, a.bucket
            FROM ticker_aggregates a, json_each(a.representatives) r
            WHERE json_extract(r.value, '$.post_id') NOT IN (SELECT id FROM posts)
            "#,
        )
        .fetch_all(&mut *tx)
        .await?;
        affected.extend(dangling);

        let now = Utc::now().timestamp();
        let mut aggregates_refreshed = 0;
        for (ticker, bucket) in &affected {
            let Some(mut agg) = load_aggregate(&mut tx, ticker, *bucket).await? else {
                continue;
            };
            let before = agg.representatives.clone();
            let mut retained = Vec::with_capacity(before.len());
            for rep in before.iter() {
                let exists: Option<i64> = sqlx::query_scalar("SELECT 1 FROM posts WHERE id = ?")
                    .bind(&rep.post_id)
                    .fetch_optional(&mut *tx)
                    .await?;
                if exists.is_some() {
                    retained.push(rep.clone());
                }
            }
            let candidates: Vec<Representative> =
                scored_mentions_in_bucket(&mut *tx, ticker, *bucket, granularity)
                    .await?
                    .into_iter()
                    .map(Representative::from)
                    .collect();
            let mean = agg.mean().unwrap_or(0.0);
            aggregate::backfill(&mut retained, candidates, mean, k);
            if retained != before {
                agg.representatives = retained;
                save_aggregate(&mut tx, &agg, now).await?;
                aggregates_refreshed += 1;
            }
        }

        tx.commit().await?;
        Ok(PruneOutcome { posts_deleted, mentions_deleted, aggregates_refreshed })
    }

    // -----------------------------------------------------------------------
    // Pass lock
    // -----------------------------------------------------------------------

    /// Take the single-writer lock. A lock older than `stale` is assumed to
    /// belong to a crashed pass and is taken over.
    pub async fn acquire_pass_lock(&self, holder: &str, stale: Duration) -> Result<()> {
        let now = Utc::now().timestamp();
        let stale_before = now - i64::try_from(stale.as_secs()).unwrap_or(i64::MAX);
        let taken = sqlx::query(
            r#"
            INSERT INTO pass_lock (id, holder, acquired_at) VALUES (1, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                holder = excluded.holder,
                acquired_at = excluded.acquired_at
            WHERE pass_lock.acquired_at < ?
            "#,
        )
        .bind(holder)
        .bind(now)
        .bind(stale_before)
        .execute(&self.pool)
        .await?
        .rows_affected();
        if taken == 1 {
            return Ok(());
        }

        let current = sqlx::query_as::<_, PassLockRow>("SELECT holder, acquired_at FROM pass_lock WHERE id = 1")
            .fetch_optional(&self.pool)
            .await?;
        match current {
            Some(row) => Err(AppError::PassInProgress { holder: row.holder, acquired_at: row.acquired_at }),
            None => Err(AppError::Corrupt("pass lock vanished while acquiring".to_string())),
        }
    }

    pub async fn release_pass_lock(&self, holder: &str) -> Result<()> {
        sqlx::query("DELETE FROM pass_lock WHERE id = 1 AND holder = ?")
            .bind(holder)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

const AGGREGATE_SELECT: &str = r#"
    SELECT ticker, bucket, mention_count, sentiment_sum, sentiment_min, sentiment_max, representatives
    FROM ticker_aggregates
    WHERE ticker = ? AND bucket = ?
"#;

async fn load_aggregate(
    tx: &mut Transaction<'_, Sqlite>,
    ticker: &str,
    bucket: i64,
) -> Result<Option<TickerAggregate>> {
    let row = sqlx::query_as::<_, AggregateRow>(AGGREGATE_SELECT)
        .bind(ticker)
        .bind(bucket)
        .fetch_optional(&mut **tx)
        .await?;
    row.map(TickerAggregate::try_from).transpose()
}

async fn save_aggregate(
    tx: &mut Transaction<'_, Sqlite>,
    agg: &TickerAggregate,
    now: i64,
) -> Result<()> {
    let representatives = serde_json::to_string(&agg.representatives)?;
    sqlx::query(
        r#"
        INSERT INTO ticker_aggregates (
            ticker, bucket, mention_count, sentiment_sum, sentiment_min, sentiment_max,
            representatives, updated_at
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT(ticker, bucket) DO UPDATE SET
            mention_count = excluded.mention_count,
            sentiment_sum = excluded.sentiment_sum,
            sentiment_min = excluded.sentiment_min,
            sentiment_max = excluded.sentiment_max,
            representatives = excluded.representatives,
            updated_at = excluded.updated_at
        "#,
    )
    .bind(&agg.ticker)
    .bind(agg.bucket)
    .bind(agg.mention_count)
    .bind(agg.sentiment_sum)
    .bind(agg.sentiment_min)
    .bind(agg.sentiment_max)
    .bind(representatives)
    .bind(now)
    .execute(&mut **tx)
    .await?;
    Ok(())
}

async fn scored_mentions_in_bucket<'e, E>(
    executor: E,
    ticker: &str,
    bucket: i64,
    granularity: BucketGranularity,
) -> Result<Vec<ScoredMentionRow>>
where
    E: sqlx::Executor<'e, Database = Sqlite>,
{
    Ok(sqlx::query_as::<_, ScoredMentionRow>(
        r#"
        SELECT p.id AS post_id, p.created_at, s.polarity
        FROM sentiment_scores s
        JOIN mentions m ON m.id = s.mention_id
        JOIN posts p ON p.id = m.post_id
        WHERE m.ticker = ? AND p.created_at >= ? AND p.created_at < ?
        ORDER BY s.id
        "#,
    )
    .bind(ticker)
    .bind(bucket)
    .bind(bucket + granularity.width_secs())
    .fetch_all(executor)
    .await?)
}

fn to_i64(v: usize) -> i64 {
    i64::try_from(v).unwrap_or(i64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{MatchType, SentimentLabel};

    const DAY: i64 = 86_400;

    async fn store(k: usize) -> AggregationStore {
        let pool = connect_in_memory().await.unwrap();
        AggregationStore::new(
            pool,
            StoreSettings { bucket: BucketGranularity::Day, representative_k: k },
        )
    }

    fn raw(id: &str, created_at: i64, text: &str) -> RawPost {
        RawPost {
            id: id.to_string(),
            subreddit: "stocks".to_string(),
            author: "someone".to_string(),
            created_at: from_unix(created_at),
            title: text.to_string(),
            selftext: String::new(),
            permalink: format!("/r/stocks/comments/{id}"),
            upvotes: 3,
        }
    }

    fn sentiment(polarity: f64) -> Sentiment {
        let label = if polarity > 0.0 {
            SentimentLabel::Positive
        } else if polarity < 0.0 {
            SentimentLabel::Negative
        } else {
            SentimentLabel::Neutral
        };
        Sentiment { polarity, label, confidence: polarity.abs() }
    }

    fn tsla() -> ExtractedMention {
        ExtractedMention {
            ticker: "TSLA".to_string(),
            match_type: MatchType::Symbol,
            confidence: 0.95,
            span: (0, 4),
        }
    }

    /// Ingest, extract and score one TSLA post.
    async fn scored_post(store: &AggregationStore, id: &str, created_at: i64, polarity: f64) {
        store.store_batch("stocks", &[raw(id, created_at, "TSLA")]).await.unwrap();
        store.record_mentions(id, &[tsla()]).await.unwrap();
        let pending = store.pending_scoring().await.unwrap();
        let (post, mentions) = pending.into_iter().find(|(p, _)| p.id == id).unwrap();
        let scores: Vec<_> = mentions.into_iter().map(|m| (m, sentiment(polarity))).collect();
        store.commit_post_scores(&post, &scores, "test-model").await.unwrap();
    }

    #[tokio::test]
    async fn store_batch_ignores_known_ids_and_advances_watermark() {
        let store = store(3).await;
        let batch = vec![raw("a", 100, "x"), raw("b", 200, "y")];
        assert_eq!(store.store_batch("stocks", &batch).await.unwrap(), 2);
        assert_eq!(store.store_batch("stocks", &batch).await.unwrap(), 0);
        assert!(store.post_exists("a").await.unwrap());
        assert_eq!(store.watermark("stocks").await.unwrap(), Some(from_unix(200)));

        // An older batch never moves the watermark back.
        store.store_batch("stocks", &[raw("c", 50, "z")]).await.unwrap();
        assert_eq!(store.watermark("stocks").await.unwrap(), Some(from_unix(200)));
        assert_eq!(store.watermark("investing").await.unwrap(), None);
    }

    #[tokio::test]
    async fn posts_without_mentions_are_processed_on_extraction() {
        let store = store(3).await;
        store.store_batch("stocks", &[raw("a", 100, "nothing here")]).await.unwrap();
        store.record_mentions("a", &[]).await.unwrap();
        assert!(store.unextracted_posts().await.unwrap().is_empty());
        assert_eq!(store.unprocessed_count().await.unwrap(), 0);
        assert!(store.pending_scoring().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn scenario_three_tsla_posts_in_one_bucket() {
        let store = store(5).await;
        scored_post(&store, "p1", 10 * DAY + 100, 0.8).await;
        scored_post(&store, "p2", 10 * DAY + 200, -0.2).await;
        scored_post(&store, "p3", 10 * DAY + 300, 0.5).await;

        let agg = store.aggregate("TSLA", 10 * DAY).await.unwrap().unwrap();
        assert_eq!(agg.mention_count, 3);
        assert!((agg.sentiment_sum - 1.1).abs() < 1e-9);
        assert_eq!(agg.sentiment_min, -0.2);
        assert_eq!(agg.sentiment_max, 0.8);
        assert!((agg.mean().unwrap() - 0.3667).abs() < 1e-3);
        assert_eq!(store.verify_aggregate("TSLA", 10 * DAY).await.unwrap(), Consistency::Consistent);
        assert_eq!(store.unprocessed_count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn a_mention_is_scored_at_most_once() {
        let store = store(3).await;
        scored_post(&store, "p1", DAY, 0.4).await;

        let post = store.unextracted_posts().await.unwrap();
        assert!(post.is_empty());
        let mention = Mention {
            id: 1,
            post_id: "p1".to_string(),
            ticker: "TSLA".to_string(),
            match_type: MatchType::Symbol,
            confidence: 0.95,
            span: (0, 4),
        };
        let stored_post = Post {
            id: "p1".to_string(),
            subreddit: "stocks".to_string(),
            author: "someone".to_string(),
            created_at: from_unix(DAY),
            raw_text: "TSLA".to_string(),
            permalink: String::new(),
            upvotes: 3,
            extracted: true,
            processed: false,
        };
        let again = store.commit_post_scores(&stored_post, &[(mention, sentiment(0.4))], "m").await;
        assert!(again.is_err());

        // The failed transaction left the aggregate alone.
        let agg = store.aggregate("TSLA", DAY).await.unwrap().unwrap();
        assert_eq!(agg.mention_count, 1);
    }

    #[tokio::test]
    async fn range_query_returns_buckets_in_order() {
        let store = store(3).await;
        scored_post(&store, "p1", 3 * DAY + 5, 0.1).await;
        scored_post(&store, "p2", DAY + 5, 0.2).await;
        scored_post(&store, "p3", 2 * DAY + 5, 0.3).await;

        let aggs = store.aggregates_in_range("TSLA", DAY, 3 * DAY).await.unwrap();
        let buckets: Vec<i64> = aggs.iter().map(|a| a.bucket).collect();
        assert_eq!(buckets, vec![DAY, 2 * DAY]);

        let summaries = store.ticker_summaries().await.unwrap();
        assert_eq!(summaries.len(), 1);
        assert_eq!(summaries[0].total_mentions, 3);
        assert_eq!(summaries[0].last_bucket, 3 * DAY);
    }

    #[tokio::test]
    async fn prune_keeps_counters_and_clears_dangling_representatives() {
        let store = store(2).await;
        scored_post(&store, "old1", DAY + 10, 0.9).await;
        scored_post(&store, "old2", DAY + 20, -0.4).await;
        scored_post(&store, "new1", 5 * DAY, 0.3).await;
        let before = store.aggregate("TSLA", DAY).await.unwrap().unwrap();
        assert_eq!(before.representatives.len(), 2);

        let outcome = store.prune_before(from_unix(2 * DAY)).await.unwrap();
        assert_eq!(outcome.posts_deleted, 2);
        assert_eq!(outcome.mentions_deleted, 2);
        assert_eq!(outcome.aggregates_refreshed, 1);

        let after = store.aggregate("TSLA", DAY).await.unwrap().unwrap();
        assert_eq!(after.mention_count, before.mention_count);
        assert_eq!(after.sentiment_sum, before.sentiment_sum);
        assert_eq!(after.sentiment_min, before.sentiment_min);
        assert_eq!(after.sentiment_max, before.sentiment_max);
        assert!(after.representatives.is_empty());

        assert!(matches!(
            store.verify_aggregate("TSLA", DAY).await.unwrap(),
            Consistency::PartiallyPruned { stored: 2, replayed: 0, pruned: 2 }
        ));
        assert!(store.post_exists("new1").await.unwrap());
    }

    #[tokio::test]
    async fn partial_prune_keeps_the_sum_checkable() {
        let store = store(3).await;
        scored_post(&store, "early", DAY + 10, 0.6).await;
        scored_post(&store, "late", DAY + 40_000, -0.25).await;

        store.prune_before(from_unix(DAY + 100)).await.unwrap();
        assert!(matches!(
            store.verify_aggregate("TSLA", DAY).await.unwrap(),
            Consistency::PartiallyPruned { stored: 2, replayed: 1, pruned: 1 }
        ));

        // Same count, drifted sum: no longer explained by the prune.
        sqlx::query("UPDATE ticker_aggregates SET sentiment_sum = sentiment_sum + 0.5 WHERE ticker = 'TSLA'")
            .execute(&store.pool)
            .await
            .unwrap();
        assert!(matches!(
            store.verify_aggregate("TSLA", DAY).await.unwrap(),
            Consistency::Mismatch { .. }
        ));
    }

    #[tokio::test]
    async fn prune_never_deletes_unprocessed_posts() {
        let store = store(2).await;
        store.store_batch("stocks", &[raw("waiting", DAY, "TSLA")]).await.unwrap();
        store.record_mentions("waiting", &[tsla()]).await.unwrap();

        let outcome = store.prune_before(from_unix(10 * DAY)).await.unwrap();
        assert_eq!(outcome.posts_deleted, 0);
        assert!(store.post_exists("waiting").await.unwrap());
    }

    #[tokio::test]
    async fn pass_lock_is_exclusive_until_released_or_stale() {
        let store = store(2).await;
        let hour = Duration::from_secs(3600);
        store.acquire_pass_lock("first", hour).await.unwrap();
        let second = store.acquire_pass_lock("second", hour).await;
        assert!(matches!(second, Err(AppError::PassInProgress { ref holder, .. }) if holder == "first"));

        // Releasing with the wrong holder is a no-op.
        store.release_pass_lock("second").await.unwrap();
        assert!(store.acquire_pass_lock("second", hour).await.is_err());

        store.release_pass_lock("first").await.unwrap();
        store.acquire_pass_lock("second", hour).await.unwrap();

        // A zero staleness window lets anyone take over a lock from the past.
        sqlx::query("UPDATE pass_lock SET acquired_at = acquired_at - 10")
            .execute(&store.pool)
            .await
            .unwrap();
        store.acquire_pass_lock("third", Duration::from_secs(0)).await.unwrap();
    }
}
