//! Incremental (ticker, bucket) statistics.
//!
//! The same `apply` is used for live updates and for replaying stored scores,
//! so a replay in score order reproduces the stored row exactly.

use std::cmp::Ordering;
use std::collections::HashSet;

use crate::types::{Representative, TickerAggregate};

pub fn empty(ticker: &str, bucket: i64) -> TickerAggregate {
    TickerAggregate {
        ticker: ticker.to_string(),
        bucket,
        mention_count: 0,
        sentiment_sum: 0.0,
        sentiment_min: 0.0,
        sentiment_max: 0.0,
        representatives: Vec::new(),
    }
}

/// Fold one new score into the aggregate.
pub fn apply(agg: &mut TickerAggregate, candidate: Representative, k: usize) {
    let polarity = candidate.polarity;
    if agg.mention_count == 0 {
        agg.sentiment_min = polarity;
        agg.sentiment_max = polarity;
    } else {
        agg.sentiment_min = agg.sentiment_min.min(polarity);
        agg.sentiment_max = agg.sentiment_max.max(polarity);
    }
    agg.mention_count += 1;
    agg.sentiment_sum += polarity;

    let mean = agg.sentiment_sum / agg.mention_count as f64;
    insert_representative(&mut agg.representatives, candidate, mean, k);
}

/// Add `candidate` to a set bounded by `k`. When the set overflows, the entry
/// closest to `mean` goes; among equally close entries the older post goes.
pub fn insert_representative(
    reps: &mut Vec<Representative>,
    candidate: Representative,
    mean: f64,
    k: usize,
) {
    if k == 0 || reps.iter().any(|r| r.post_id == candidate.post_id) {
        return;
    }
    reps.push(candidate);
    while reps.len() > k {
        if let Some(idx) = least_extreme(reps, mean) {
            reps.remove(idx);
        }
    }
    canonical_order(reps);
}

/// Fill free slots from `candidates`, most extreme first, skipping posts
/// already present.
pub fn backfill(
    reps: &mut Vec<Representative>,
    candidates: Vec<Representative>,
    mean: f64,
    k: usize,
) {
    let present: HashSet<String> = reps.iter().map(|r| r.post_id.clone()).collect();
    let mut fresh: Vec<Representative> =
        candidates.into_iter().filter(|c| !present.contains(&c.post_id)).collect();
    fresh.sort_by(|a, b| {
        distance(b, mean)
            .total_cmp(&distance(a, mean))
            .then_with(|| recency(b).cmp(&recency(a)))
    });
    for c in fresh {
        if reps.len() >= k {
            break;
        }
        reps.push(c);
    }
    canonical_order(reps);
}

fn least_extreme(reps: &[Representative], mean: f64) -> Option<usize> {
    reps.iter()
        .enumerate()
        .min_by(|(_, a), (_, b)| {
            distance(a, mean)
                .total_cmp(&distance(b, mean))
                .then_with(|| recency(a).cmp(&recency(b)))
        })
        .map(|(i, _)| i)
}

fn distance(r: &Representative, mean: f64) -> f64 {
    (r.polarity - mean).abs()
}

fn recency(r: &Representative) -> (i64, &str) {
    (r.created_at, r.post_id.as_str())
}

/// Highest polarity first, then post id, so equal sets compare equal.
fn canonical_order(reps: &mut [Representative]) {
    reps.sort_by(|a, b| match b.polarity.total_cmp(&a.polarity) {
        Ordering::Equal => a.post_id.cmp(&b.post_id),
        other => other,
    });
}

/// Outcome of comparing a stored aggregate with a replay of its raw rows.
#[derive(Debug, Clone, PartialEq)]
pub enum Consistency {
    /// Replay reproduces the stored counters.
    Consistent,
    /// Some raw rows were pruned; the replay covers `replayed` of `stored`
    /// mentions and is not expected to match.
    PartiallyPruned { stored: i64, replayed: i64, pruned: i64 },
    Mismatch { stored: TickerAggregate, replayed: TickerAggregate },
}

const SUM_EPSILON: f64 = 1e-9;

/// Scored mentions a bucket lost to retention, as recorded in `bucket_prunes`.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Pruned {
    pub mentions: i64,
    pub sentiment_sum: f64,
}

/// Compare counters only; representatives legitimately change after pruning.
pub fn compare(stored: &TickerAggregate, replayed: &TickerAggregate, pruned: Pruned) -> Consistency {
    if pruned.mentions > 0 {
        let counts_add_up = replayed.mention_count + pruned.mentions == stored.mention_count;
        let sums_add_up = (replayed.sentiment_sum + pruned.sentiment_sum - stored.sentiment_sum)
            .abs()
            < SUM_EPSILON;
        // What survives must sit inside the stored range.
        let within_range = replayed.mention_count == 0
            || (replayed.sentiment_min >= stored.sentiment_min
                && replayed.sentiment_max <= stored.sentiment_max);
        if counts_add_up && sums_add_up && within_range {
            return Consistency::PartiallyPruned {
                stored: stored.mention_count,
                replayed: replayed.mention_count,
                pruned: pruned.mentions,
            };
        }
        return Consistency::Mismatch { stored: stored.clone(), replayed: replayed.clone() };
    }
    let same = stored.mention_count == replayed.mention_count
        && (stored.sentiment_sum - replayed.sentiment_sum).abs() < SUM_EPSILON
        && stored.sentiment_min == replayed.sentiment_min
        && stored.sentiment_max == replayed.sentiment_max;
    if same {
        Consistency::Consistent
    } else {
        Consistency::Mismatch { stored: stored.clone(), replayed: replayed.clone() }
    }
}
