use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use futures_util::stream::{self, StreamExt};
use serde::Serialize;
use tracing::{info, warn};

use crate::config::{Config, LowConfidencePolicy, ScoringWindow};
use crate::db::{AggregationStore, Consistency, PruneOutcome};
use crate::error::{AppError, Result};
use crate::extractor::extract_mentions;
use crate::fetcher::RedditClient;
use crate::ingest::{IngestReport, PostIngester};
use crate::registry::TickerRegistry;
use crate::retention::RetentionManager;
use crate::scorer::{
    scoring_text, validate, LatencySummary, ScoringLatency, ScoringUnavailable, SentimentModel,
};
use crate::types::{ExtractedMention, Mention, Post, Sentiment};

#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub subreddits: Vec<String>,
    pub low_confidence_policy: LowConfidencePolicy,
    pub low_confidence_threshold: f64,
    pub scoring_window: ScoringWindow,
    pub scoring_concurrency: usize,
    pub model_version: String,
    pub retention: Duration,
    pub lock_stale: Duration,
}

impl PipelineSettings {
    pub fn from_config(cfg: &Config) -> Self {
        Self {
            subreddits: cfg.subreddits.clone(),
            low_confidence_policy: cfg.low_confidence_policy,
            low_confidence_threshold: cfg.low_confidence_threshold,
            scoring_window: cfg.scoring_window,
            scoring_concurrency: cfg.scoring_concurrency.max(1),
            model_version: cfg.model_version.clone(),
            retention: cfg.retention,
            lock_stale: cfg.lock_stale,
        }
    }

    fn keeps(&self, mention: &ExtractedMention) -> bool {
        match self.low_confidence_policy {
            LowConfidencePolicy::Include => true,
            LowConfidencePolicy::Exclude => mention.confidence >= self.low_confidence_threshold,
        }
    }
}

#[derive(Debug, Default, Clone, PartialEq, Serialize)]
pub struct ExtractReport {
    pub posts: usize,
    pub mentions: usize,
    /// Mentions below the threshold under the exclude policy.
    pub dropped_low_confidence: usize,
}

#[derive(Debug, Default, Clone, PartialEq, Serialize)]
pub struct ScoreReport {
    pub posts_committed: usize,
    pub mentions_scored: usize,
    /// Posts left unprocessed because the model was unavailable.
    pub posts_deferred: usize,
    pub latency: LatencySummary,
}

#[derive(Debug, Default, Clone, PartialEq, Serialize)]
pub struct PassReport {
    pub ingest: IngestReport,
    pub extract: ExtractReport,
    pub score: ScoreReport,
    pub prune: PruneSummary,
}

#[derive(Debug, Default, Clone, PartialEq, Serialize)]
pub struct PruneSummary {
    pub posts_deleted: u64,
    pub mentions_deleted: u64,
    pub aggregates_refreshed: usize,
}

impl From<PruneOutcome> for PruneSummary {
    fn from(o: PruneOutcome) -> Self {
        Self {
            posts_deleted: o.posts_deleted,
            mentions_deleted: o.mentions_deleted,
            aggregates_refreshed: o.aggregates_refreshed,
        }
    }
}

/// Runs one pass: ingest, extract, score and aggregate, prune.
///
/// All progress lives in the store (watermarks, extracted/processed flags), so
/// a pass that dies anywhere is finished by the next one.
pub struct PipelineOrchestrator {
    store: AggregationStore,
    registry: Arc<TickerRegistry>,
    ingester: PostIngester,
    model: Arc<dyn SentimentModel>,
    retention: RetentionManager,
    settings: PipelineSettings,
    latency: ScoringLatency,
    holder: String,
}

impl PipelineOrchestrator {
    pub fn new(
        store: AggregationStore,
        registry: Arc<TickerRegistry>,
        reddit: Arc<dyn RedditClient>,
        model: Arc<dyn SentimentModel>,
        settings: PipelineSettings,
    ) -> Self {
        let ingester = PostIngester::new(reddit, store.clone(), settings.subreddits.clone());
        let retention = RetentionManager::new(store.clone(), settings.retention);
        let holder = format!(
            "pid{}-{}",
            std::process::id(),
            Utc::now().timestamp_nanos_opt().unwrap_or_default()
        );
        Self {
            store,
            registry,
            ingester,
            model,
            retention,
            settings,
            latency: ScoringLatency::new(),
            holder,
        }
    }

    pub async fn run_pass(&self, now: DateTime<Utc>) -> Result<PassReport> {
        self.with_pass_lock(async {
            let started = Instant::now();
            let ingest = self.ingester.ingest().await?;
            let extract = self.extract_pending().await?;
            let score = self.score_pending().await?;
            let prune = PruneSummary::from(self.retention.prune(now).await?);
            let report = PassReport { ingest, extract, score, prune };
            info!(
                elapsed_ms = started.elapsed().as_millis() as u64,
                inserted = report.ingest.inserted,
                extracted = report.extract.posts,
                scored = report.score.mentions_scored,
                deferred = report.score.posts_deferred,
                deleted = report.prune.posts_deleted,
                "Pass complete"
            );
            Ok::<_, AppError>(report)
        })
        .await
    }

    pub async fn run_ingest_only(&self) -> Result<IngestReport> {
        self.with_pass_lock(self.ingester.ingest()).await
    }

    pub async fn run_prune_only(&self, now: DateTime<Utc>) -> Result<PruneSummary> {
        self.with_pass_lock(async {
            let outcome = self.retention.prune(now).await?;
            Ok::<_, AppError>(PruneSummary::from(outcome))
        })
        .await
    }

    /// Release on every path, including a failed stage.
    async fn with_pass_lock<T, F>(&self, stages: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        self.store.acquire_pass_lock(&self.holder, self.settings.lock_stale).await?;
        let result = stages.await;
        if let Err(e) = self.store.release_pass_lock(&self.holder).await {
            warn!("Failed to release pass lock: {e}");
        }
        result
    }

    /// Find and persist mentions for every post not yet extracted.
    pub async fn extract_pending(&self) -> Result<ExtractReport> {
        let posts = self.store.unextracted_posts().await?;
        let mut report = ExtractReport { posts: posts.len(), ..Default::default() };
        for post in posts {
            let found = extract_mentions(&post.raw_text, &self.registry);
            let total = found.len();
            let kept: Vec<ExtractedMention> =
                found.into_iter().filter(|m| self.settings.keeps(m)).collect();
            report.dropped_low_confidence += total - kept.len();
            report.mentions += kept.len();
            self.store.record_mentions(&post.id, &kept).await?;
        }
        info!(
            posts = report.posts,
            mentions = report.mentions,
            dropped = report.dropped_low_confidence,
            "Extraction complete"
        );
        Ok(report)
    }

    /// Score every unscored mention, one post at a time. A post whose mentions
    /// cannot all be scored is left for the next pass.
    pub async fn score_pending(&self) -> Result<ScoreReport> {
        let pending = self.store.pending_scoring().await?;
        let mut report = ScoreReport::default();
        for (post, mentions) in pending {
            match self.score_post(&post, mentions).await {
                Ok(scores) => {
                    self.store
                        .commit_post_scores(&post, &scores, &self.settings.model_version)
                        .await?;
                    report.posts_committed += 1;
                    report.mentions_scored += scores.len();
                }
                Err(reason) => {
                    warn!(post_id = %post.id, "Scoring deferred: {reason}");
                    report.posts_deferred += 1;
                }
            }
        }
        report.latency = self.latency.summary();
        info!(
            posts = report.posts_committed,
            scored = report.mentions_scored,
            deferred = report.posts_deferred,
            p50_ms = ?report.latency.p50_ms,
            p95_ms = ?report.latency.p95_ms,
            p99_ms = ?report.latency.p99_ms,
            "Scoring complete"
        );
        Ok(report)
    }

    async fn score_post(
        &self,
        post: &Post,
        mentions: Vec<Mention>,
    ) -> std::result::Result<Vec<(Mention, Sentiment)>, ScoringUnavailable> {
        let window = self.settings.scoring_window;
        let results: Vec<_> = stream::iter(mentions.into_iter().map(|mention| async move {
            let text = scoring_text(&post.raw_text, mention.span, window);
            let started = Instant::now();
            let result = self.model.score(text).await.and_then(validate);
            self.latency.record(started.elapsed());
            (mention, result)
        }))
        .buffered(self.settings.scoring_concurrency)
        .collect()
        .await;

        results
            .into_iter()
            .map(|(mention, result)| result.map(|sentiment| (mention, sentiment)))
            .collect()
    }
}

/// Result of checking every bucket of one ticker.
#[derive(Debug, Default, Serialize)]
pub struct VerifyReport {
    pub consistent: usize,
    pub partially_pruned: usize,
    /// Buckets whose replay disagrees with the stored counters.
    pub mismatched: Vec<i64>,
}

pub async fn verify_ticker(store: &AggregationStore, ticker: &str) -> Result<VerifyReport> {
    let mut report = VerifyReport::default();
    for bucket in store.buckets_for(ticker).await? {
        match store.verify_aggregate(ticker, bucket).await? {
            Consistency::Consistent => report.consistent += 1,
            Consistency::PartiallyPruned { .. } => report.partially_pruned += 1,
            Consistency::Mismatch { stored, replayed } => {
                warn!(
                    ticker,
                    bucket,
                    stored_count = stored.mention_count,
                    replayed_count = replayed.mention_count,
                    stored_sum = stored.sentiment_sum,
                    replayed_sum = replayed.sentiment_sum,
                    "Aggregate mismatch"
                );
                report.mismatched.push(bucket);
            }
        }
    }
    Ok(report)
}
