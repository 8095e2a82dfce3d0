use std::sync::Arc;

use tracing::{info, warn};

use crate::db::AggregationStore;
use crate::error::Result;
use crate::fetcher::RedditClient;

#[derive(Debug, Default, Clone, PartialEq, serde::Serialize)]
pub struct IngestReport {
    pub fetched: usize,
    pub inserted: u64,
    pub duplicates: u64,
    /// Subreddits skipped this pass because the fetch failed.
    pub failed_subreddits: Vec<String>,
}

/// Pulls new posts per subreddit and stores them idempotently.
pub struct PostIngester {
    client: Arc<dyn RedditClient>,
    store: AggregationStore,
    subreddits: Vec<String>,
}

impl PostIngester {
    pub fn new(client: Arc<dyn RedditClient>, store: AggregationStore, subreddits: Vec<String>) -> Self {
        Self { client, store, subreddits }
    }

    /// Fetch failures skip the subreddit; store failures end the stage.
    pub async fn ingest(&self) -> Result<IngestReport> {
        let mut report = IngestReport::default();
        for subreddit in &self.subreddits {
            let since = self.store.watermark(subreddit).await?;
            let posts = match self.client.fetch(subreddit, since).await {
                Ok(posts) => posts,
                Err(e) => {
                    warn!(subreddit = %subreddit, "Fetch failed, skipping this pass: {e}");
                    report.failed_subreddits.push(subreddit.clone());
                    continue;
                }
            };

            let inserted = self.store.store_batch(subreddit, &posts).await?;
            let duplicates = posts.len() as u64 - inserted;
            info!(
                subreddit = %subreddit,
                fetched = posts.len(),
                inserted,
                duplicates,
                "Ingested subreddit"
            );
            report.fetched += posts.len();
            report.inserted += inserted;
            report.duplicates += duplicates;
        }
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;

    use async_trait::async_trait;
    use chrono::{DateTime, Utc};

    use crate::db::store::connect_in_memory;
    use crate::db::StoreSettings;
    use crate::fetcher::FetchError;
    use crate::types::{from_unix, BucketGranularity, RawPost};

    /// Serves fixed posts per subreddit, filtered by `since` like the real listing.
    #[derive(Default)]
    struct FakeReddit {
        posts: HashMap<String, Vec<RawPost>>,
        failing: Vec<String>,
        calls: Mutex<Vec<(String, Option<DateTime<Utc>>)>>,
    }

    #[async_trait]
    impl RedditClient for FakeReddit {
        async fn fetch(
            &self,
            subreddit: &str,
            since: Option<DateTime<Utc>>,
        ) -> std::result::Result<Vec<RawPost>, FetchError> {
            self.calls.lock().unwrap().push((subreddit.to_string(), since));
            if self.failing.iter().any(|s| s == subreddit) {
                return Err(FetchError::Status { subreddit: subreddit.to_string(), status: 503 });
            }
            Ok(self
                .posts
                .get(subreddit)
                .into_iter()
                .flatten()
                .filter(|p| since.map_or(true, |s| p.created_at >= s))
                .cloned()
                .collect())
        }
    }

    fn post(id: &str, subreddit: &str, created_at: i64) -> RawPost {
        RawPost {
            id: id.to_string(),
            subreddit: subreddit.to_string(),
            author: "a".to_string(),
            created_at: from_unix(created_at),
            title: format!("post {id}"),
            selftext: String::new(),
            permalink: String::new(),
            upvotes: 1,
        }
    }

    async fn store() -> AggregationStore {
        AggregationStore::new(
            connect_in_memory().await.unwrap(),
            StoreSettings { bucket: BucketGranularity::Day, representative_k: 3 },
        )
    }

    #[tokio::test]
    async fn double_ingest_is_idempotent() {
        let store = store().await;
        let mut fake = FakeReddit::default();
        fake.posts.insert("stocks".to_string(), vec![post("a", "stocks", 100), post("b", "stocks", 200)]);
        let fake = Arc::new(fake);
        let ingester = PostIngester::new(fake.clone(), store.clone(), vec!["stocks".to_string()]);

        let first = ingester.ingest().await.unwrap();
        assert_eq!(first.inserted, 2);
        let second = ingester.ingest().await.unwrap();
        // The inclusive watermark re-serves the newest post; it is absorbed.
        assert_eq!(second.inserted, 0);
        assert_eq!(second.duplicates, 1);
        assert_eq!(store.post_count().await.unwrap(), 2);

        let calls = fake.calls.lock().unwrap();
        assert_eq!(calls[0].1, None);
        assert_eq!(calls[1].1, Some(from_unix(200)));
    }

    #[tokio::test]
    async fn failing_subreddit_is_skipped_others_continue() {
        let store = store().await;
        let mut fake = FakeReddit::default();
        fake.posts.insert("investing".to_string(), vec![post("c", "investing", 50)]);
        fake.failing.push("stocks".to_string());
        let ingester = PostIngester::new(
            Arc::new(fake),
            store.clone(),
            vec!["stocks".to_string(), "investing".to_string()],
        );

        let report = ingester.ingest().await.unwrap();
        assert_eq!(report.failed_subreddits, vec!["stocks".to_string()]);
        assert_eq!(report.inserted, 1);
        assert_eq!(store.watermark("stocks").await.unwrap(), None);
        assert_eq!(store.watermark("investing").await.unwrap(), Some(from_unix(50)));
    }
}
