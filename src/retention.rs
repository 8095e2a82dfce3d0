use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::info;

use crate::db::{AggregationStore, PruneOutcome};
use crate::error::{AppError, Result};

/// Deletes raw posts past the retention horizon. Aggregates outlive them.
pub struct RetentionManager {
    store: AggregationStore,
    horizon: Duration,
}

impl RetentionManager {
    pub fn new(store: AggregationStore, horizon: Duration) -> Self {
        Self { store, horizon }
    }

    pub fn cutoff(&self, now: DateTime<Utc>) -> Result<DateTime<Utc>> {
        let horizon = chrono::Duration::from_std(self.horizon)
            .map_err(|_| AppError::Config(format!("retention horizon {:?} is too large", self.horizon)))?;
        Ok(now - horizon)
    }

    pub async fn prune(&self, now: DateTime<Utc>) -> Result<PruneOutcome> {
        let cutoff = self.cutoff(now)?;
        let outcome = self.store.prune_before(cutoff).await?;
        info!(
            cutoff = %cutoff,
            deleted = outcome.posts_deleted,
            mentions = outcome.mentions_deleted,
            refreshed = outcome.aggregates_refreshed,
            "Pruned expired posts"
        );
        Ok(outcome)
    }
}
