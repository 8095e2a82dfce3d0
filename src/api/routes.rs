use axum::{
    extract::{Path, Query, State},
    routing::get,
    Json, Router,
};
use serde::{Deserialize, Serialize};

use crate::db::models::{RecentPostRow, TickerSummaryRow};
use crate::db::AggregationStore;
use crate::error::AppError;
use crate::types::Representative;

/// Handlers only read. The store behind it is opened read-only by `serve`.
#[derive(Clone)]
pub struct ApiState {
    pub store: AggregationStore,
}

pub fn router(state: ApiState) -> Router {
    Router::new()
        .route("/health", get(get_health))
        .route("/tickers", get(get_tickers))
        .route("/tickers/:ticker/series", get(get_ticker_series))
        .route("/tickers/:ticker/posts", get(get_ticker_posts))
        .with_state(state)
}

// ---------------------------------------------------------------------------
// Query param structs
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
pub struct SeriesQuery {
    /// Unix seconds, inclusive. Defaults to the epoch.
    pub from: Option<i64>,
    /// Unix seconds, exclusive. Defaults to now.
    pub to: Option<i64>,
}

#[derive(Deserialize)]
pub struct PostsQuery {
    pub limit: Option<i64>,
}

// ---------------------------------------------------------------------------
// Response types
// ---------------------------------------------------------------------------

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub posts: i64,
    pub unprocessed: i64,
}

#[derive(Serialize)]
pub struct BucketResponse {
    pub bucket: i64,
    pub mention_count: i64,
    pub mean: Option<f64>,
    pub min: f64,
    pub max: f64,
    pub representatives: Vec<Representative>,
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

async fn get_health(State(state): State<ApiState>) -> Result<Json<HealthResponse>, AppError> {
    Ok(Json(HealthResponse {
        status: "ok",
        posts: state.store.post_count().await?,
        unprocessed: state.store.unprocessed_count().await?,
    }))
}

async fn get_tickers(State(state): State<ApiState>) -> Result<Json<Vec<TickerSummaryRow>>, AppError> {
    Ok(Json(state.store.ticker_summaries().await?))
}

async fn get_ticker_series(
    State(state): State<ApiState>,
    Path(ticker): Path<String>,
    Query(params): Query<SeriesQuery>,
) -> Result<Json<Vec<BucketResponse>>, AppError> {
    let ticker = ticker.to_ascii_uppercase();
    let from = params.from.unwrap_or(0);
    let to = params.to.unwrap_or_else(|| chrono::Utc::now().timestamp() + 1);
    if from > to {
        return Err(AppError::Config(format!("from ({from}) is after to ({to})")));
    }

    let aggregates = state.store.aggregates_in_range(&ticker, from, to).await?;
    let series = aggregates
        .into_iter()
        .map(|agg| BucketResponse {
            bucket: agg.bucket,
            mention_count: agg.mention_count,
            mean: agg.mean(),
            min: agg.sentiment_min,
            max: agg.sentiment_max,
            representatives: agg.representatives,
        })
        .collect();
    Ok(Json(series))
}

async fn get_ticker_posts(
    State(state): State<ApiState>,
    Path(ticker): Path<String>,
    Query(params): Query<PostsQuery>,
) -> Result<Json<Vec<RecentPostRow>>, AppError> {
    let limit = params.limit.unwrap_or(20).clamp(1, 200);
    let ticker = ticker.to_ascii_uppercase();
    let posts = state.store.recent_posts(&ticker, limit).await?;
    if posts.is_empty() && state.store.buckets_for(&ticker).await?.is_empty() {
        return Err(AppError::NotFound(format!("no data for {ticker}")));
    }
    Ok(Json(posts))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::store::connect_in_memory;
    use crate::db::StoreSettings;
    use crate::types::{from_unix, BucketGranularity, ExtractedMention, MatchType, RawPost, SentimentLabel, Sentiment};

    const DAY: i64 = 86_400;

    async fn seeded() -> ApiState {
        let store = AggregationStore::new(
            connect_in_memory().await.unwrap(),
            StoreSettings { bucket: BucketGranularity::Day, representative_k: 3 },
        );
        for (id, ts, polarity) in [("p1", DAY + 5, 0.6), ("p2", 2 * DAY + 5, -0.4)] {
            let raw = RawPost {
                id: id.to_string(),
                subreddit: "stocks".to_string(),
                author: "a".to_string(),
                created_at: from_unix(ts),
                title: "GME".to_string(),
                selftext: String::new(),
                permalink: String::new(),
                upvotes: 7,
            };
            store.store_batch("stocks", &[raw]).await.unwrap();
            let mention = ExtractedMention {
                ticker: "GME".to_string(),
                match_type: MatchType::Symbol,
                confidence: 0.95,
                span: (0, 3),
            };
            store.record_mentions(id, &[mention]).await.unwrap();
            let (post, mentions) = store.pending_scoring().await.unwrap().remove(0);
            let label = if polarity > 0.0 { SentimentLabel::Positive } else { SentimentLabel::Negative };
            let scores: Vec<_> = mentions
                .into_iter()
                .map(|m| (m, Sentiment { polarity, label, confidence: 0.9 }))
                .collect();
            store.commit_post_scores(&post, &scores, "test").await.unwrap();
        }
        ApiState { store }
    }

    #[tokio::test]
    async fn series_is_bucketed_and_range_filtered() {
        let state = seeded().await;
        let Json(all) = get_ticker_series(
            State(state.clone()),
            Path("gme".to_string()),
            Query(SeriesQuery { from: None, to: None }),
        )
        .await
        .unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].bucket, DAY);
        assert_eq!(all[0].mean, Some(0.6));

        let Json(first) = get_ticker_series(
            State(state),
            Path("GME".to_string()),
            Query(SeriesQuery { from: Some(0), to: Some(2 * DAY) }),
        )
        .await
        .unwrap();
        assert_eq!(first.len(), 1);
    }

    #[tokio::test]
    async fn recent_posts_and_unknown_ticker() {
        let state = seeded().await;
        let Json(posts) = get_ticker_posts(
            State(state.clone()),
            Path("GME".to_string()),
            Query(PostsQuery { limit: Some(1) }),
        )
        .await
        .unwrap();
        assert_eq!(posts.len(), 1);
        assert_eq!(posts[0].id, "p2");
        assert_eq!(posts[0].polarity, Some(-0.4));

        let missing = get_ticker_posts(
            State(state),
            Path("NOPE".to_string()),
            Query(PostsQuery { limit: None }),
        )
        .await;
        assert!(matches!(missing, Err(AppError::NotFound(_))));
    }

    #[tokio::test]
    async fn health_and_ticker_list() {
        let state = seeded().await;
        let Json(health) = get_health(State(state.clone())).await.unwrap();
        assert_eq!(health.posts, 2);
        assert_eq!(health.unprocessed, 0);

        let Json(tickers) = get_tickers(State(state)).await.unwrap();
        assert_eq!(tickers.len(), 1);
        assert_eq!(tickers[0].total_mentions, 2);
    }
}
