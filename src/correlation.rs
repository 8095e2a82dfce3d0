//! Daily sentiment against daily closing prices for one ticker.
//!
//! Sentiment comes from the stored aggregates, so the report still covers
//! days whose raw posts have been pruned.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::info;

use crate::db::AggregationStore;
use crate::error::{AppError, Result};
use crate::prices::{DailyClose, PriceSource};
use crate::types::TickerAggregate;

const DAY: i64 = 86_400;

/// Percent move a day needs before it counts as up or down.
pub const DIRECTION_THRESHOLD_PCT: f64 = 0.02;

/// Extra history fetched before the window so its first day has a return.
const PRICE_LEAD_DAYS: i64 = 7;

/// Mentions and mean polarity of one UTC day.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct DailySentiment {
    pub day: i64,
    pub mentions: i64,
    pub mean: f64,
}

/// How often the previous day's sentiment sign called the next move.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DirectionAccuracy {
    pub predictions: usize,
    pub correct: usize,
    pub accuracy: f64,
    /// Of the days sentiment said "up", the share that went up.
    pub precision: f64,
    /// Of the days that went up, the share sentiment said "up" for.
    pub recall: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CorrelationReport {
    pub ticker: String,
    pub from: i64,
    pub to: i64,
    pub sentiment_days: usize,
    pub trading_days: usize,
    /// Trading days with both a sentiment value and a return.
    pub paired_days: usize,
    pub sentiment_price_corr: Option<f64>,
    pub sentiment_return_corr: Option<f64>,
    /// Previous trading day's sentiment against today's return.
    pub lagged_return_corr: Option<f64>,
    pub sentiment_price_r2: Option<f64>,
    pub sentiment_return_r2: Option<f64>,
    pub direction: Option<DirectionAccuracy>,
}

/// Fold buckets of any width up to UTC days.
pub fn daily_sentiment(aggs: &[TickerAggregate]) -> Vec<DailySentiment> {
    let mut days: BTreeMap<i64, (i64, f64)> = BTreeMap::new();
    for agg in aggs {
        let entry = days.entry(agg.bucket.div_euclid(DAY) * DAY).or_default();
        entry.0 += agg.mention_count;
        entry.1 += agg.sentiment_sum;
    }
    days.into_iter()
        .filter(|(_, (count, _))| *count > 0)
        .map(|(day, (mentions, sum))| DailySentiment { day, mentions, mean: sum / mentions as f64 })
        .collect()
}

/// Linear fill for days between two days with sentiment. Nothing is
/// extrapolated past the first or last known day.
fn interpolate(days: &[DailySentiment]) -> BTreeMap<i64, f64> {
    let mut filled: BTreeMap<i64, f64> = days.iter().map(|d| (d.day, d.mean)).collect();
    for pair in days.windows(2) {
        let (a, b) = (pair[0], pair[1]);
        let span = (b.day - a.day) / DAY;
        for step in 1..span {
            let t = step as f64 / span as f64;
            filled.insert(a.day + step * DAY, a.mean + (b.mean - a.mean) * t);
        }
    }
    filled
}

/// Pearson correlation. None with fewer than two points or a flat series.
pub fn pearson(xs: &[f64], ys: &[f64]) -> Option<f64> {
    let n = xs.len().min(ys.len());
    if n < 2 {
        return None;
    }
    let (xs, ys) = (&xs[..n], &ys[..n]);
    let mean_x = xs.iter().sum::<f64>() / n as f64;
    let mean_y = ys.iter().sum::<f64>() / n as f64;
    let mut cov = 0.0;
    let mut var_x = 0.0;
    let mut var_y = 0.0;
    for (x, y) in xs.iter().zip(ys) {
        let (dx, dy) = (x - mean_x, y - mean_y);
        cov += dx * dy;
        var_x += dx * dx;
        var_y += dy * dy;
    }
    if var_x == 0.0 || var_y == 0.0 {
        return None;
    }
    Some((cov / (var_x.sqrt() * var_y.sqrt())).clamp(-1.0, 1.0))
}

fn direction(value: f64, threshold: f64) -> i8 {
    if value > threshold {
        1
    } else if value < -threshold {
        -1
    } else {
        0
    }
}

struct Row {
    sentiment: f64,
    close: f64,
    return_pct: f64,
}

pub fn correlation_report(
    ticker: &str,
    from: i64,
    to: i64,
    sentiment: &[DailySentiment],
    closes: &[DailyClose],
) -> CorrelationReport {
    let filled = interpolate(sentiment);
    let rows: Vec<Row> = closes
        .windows(2)
        .filter_map(|pair| {
            let (prev, today) = (pair[0], pair[1]);
            let sentiment = *filled.get(&today.day)?;
            Some(Row {
                sentiment,
                close: today.close,
                return_pct: (today.close / prev.close - 1.0) * 100.0,
            })
        })
        .collect();

    let sentiments: Vec<f64> = rows.iter().map(|r| r.sentiment).collect();
    let prices: Vec<f64> = rows.iter().map(|r| r.close).collect();
    let returns: Vec<f64> = rows.iter().map(|r| r.return_pct).collect();

    let sentiment_price_corr = pearson(&sentiments, &prices);
    let sentiment_return_corr = pearson(&sentiments, &returns);
    let lagged_return_corr = if rows.len() > 1 {
        pearson(&sentiments[..rows.len() - 1], &returns[1..])
    } else {
        None
    };

    CorrelationReport {
        ticker: ticker.to_string(),
        from,
        to,
        sentiment_days: sentiment.len(),
        trading_days: closes.len(),
        paired_days: rows.len(),
        sentiment_price_corr,
        sentiment_return_corr,
        lagged_return_corr,
        sentiment_price_r2: sentiment_price_corr.map(|r| r * r),
        sentiment_return_r2: sentiment_return_corr.map(|r| r * r),
        direction: direction_accuracy(&rows),
    }
}

/// Yesterday's sentiment sign as a call on today's move.
fn direction_accuracy(rows: &[Row]) -> Option<DirectionAccuracy> {
    let calls: Vec<(i8, i8)> = rows
        .windows(2)
        .map(|pair| {
            (direction(pair[0].sentiment, 0.0), direction(pair[1].return_pct, DIRECTION_THRESHOLD_PCT))
        })
        .collect();
    if calls.is_empty() {
        return None;
    }
    let correct = calls.iter().filter(|(said, went)| said == went).count();
    let said_up = calls.iter().filter(|(said, _)| *said == 1).count();
    let went_up = calls.iter().filter(|(_, went)| *went == 1).count();
    let both_up = calls.iter().filter(|(said, went)| *said == 1 && *went == 1).count();
    let ratio = |num: usize, den: usize| if den == 0 { 0.0 } else { num as f64 / den as f64 };
    Some(DirectionAccuracy {
        predictions: calls.len(),
        correct,
        accuracy: ratio(correct, calls.len()),
        precision: ratio(both_up, said_up),
        recall: ratio(both_up, went_up),
    })
}

/// Report on the `days` UTC days up to `now`.
pub async fn correlate(
    store: &AggregationStore,
    prices: &dyn PriceSource,
    ticker: &str,
    now: DateTime<Utc>,
    days: u32,
) -> Result<CorrelationReport> {
    if days < 2 {
        return Err(AppError::Config("correlation needs a window of at least 2 days".to_string()));
    }
    let to = now.timestamp();
    let from = (to - i64::from(days) * DAY).div_euclid(DAY) * DAY;

    let aggs = store.aggregates_in_range(ticker, from, to).await?;
    let sentiment = daily_sentiment(&aggs);
    if sentiment.is_empty() {
        return Err(AppError::NotFound(format!("no sentiment for {ticker} in the last {days} days")));
    }
    let closes = prices.daily_closes(ticker, from - PRICE_LEAD_DAYS * DAY, to).await?;

    let report = correlation_report(ticker, from, to, &sentiment, &closes);
    info!(
        ticker,
        paired_days = report.paired_days,
        corr = ?report.sentiment_return_corr,
        lagged = ?report.lagged_return_corr,
        "Correlation computed"
    );
    Ok(report)
}
