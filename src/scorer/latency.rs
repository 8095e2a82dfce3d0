//! Latency histogram for sentiment model calls.
//! The orchestrator records one sample per call and reports percentiles at the
//! end of the scoring stage.

use std::sync::Mutex;
use std::time::Duration;

use hdrhistogram::Histogram;
use serde::Serialize;

/// Values stored in milliseconds.
pub struct ScoringLatency {
    /// None only if the histogram bounds were rejected, in which case nothing is recorded.
    inner: Mutex<Option<Histogram<u64>>>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct LatencySummary {
    pub samples: u64,
    pub p50_ms: Option<u64>,
    pub p95_ms: Option<u64>,
    pub p99_ms: Option<u64>,
}

impl ScoringLatency {
    /// Tracks 1ms to 10min, 3 significant figures.
    pub fn new() -> Self {
        Self { inner: Mutex::new(Histogram::new_with_bounds(1, 600_000, 3).ok()) }
    }

    pub fn record(&self, d: Duration) {
        let ms = d.as_millis().clamp(1, 600_000) as u64;
        if let Ok(mut guard) = self.inner.lock() {
            if let Some(h) = guard.as_mut() {
                let _ = h.record(ms);
            }
        }
    }

    pub fn summary(&self) -> LatencySummary {
        let Ok(guard) = self.inner.lock() else {
            return LatencySummary::default();
        };
        match guard.as_ref() {
            Some(h) if h.len() > 0 => LatencySummary {
                samples: h.len(),
                p50_ms: Some(h.value_at_quantile(0.5)),
                p95_ms: Some(h.value_at_quantile(0.95)),
                p99_ms: Some(h.value_at_quantile(0.99)),
            },
            _ => LatencySummary::default(),
        }
    }
}

impl Default for ScoringLatency {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_histogram_has_no_percentiles() {
        let latency = ScoringLatency::new();
        assert_eq!(latency.summary(), LatencySummary::default());
    }

    #[test]
    fn percentiles_follow_samples() {
        let latency = ScoringLatency::new();
        for ms in 1..=100 {
            latency.record(Duration::from_millis(ms));
        }
        let summary = latency.summary();
        assert_eq!(summary.samples, 100);
        assert_eq!(summary.p50_ms, Some(50));
        assert_eq!(summary.p99_ms, Some(99));
    }

    #[test]
    fn sub_millisecond_calls_count_as_one() {
        let latency = ScoringLatency::new();
        latency.record(Duration::from_micros(10));
        assert_eq!(latency.summary().p50_ms, Some(1));
    }
}
