use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

const LATENCY_BUCKET_COUNT: usize = 12;
const LATENCY_BUCKETS_MS: [u64; LATENCY_BUCKET_COUNT] =
    [1, 2, 5, 10, 25, 50, 100, 250, 500, 1000, 2500, 5000];

#[derive(Clone, Debug, Serialize)]
pub struct LatencySnapshot {
    pub buckets_ms: Vec<u64>,
    pub counts: Vec<u64>,
    pub overflow: u64,
    pub count: u64,
    pub avg_ms: f64,
    pub max_ms: u64,
}

#[derive(Default)]
struct LatencyMetrics {
    buckets: [AtomicU64; LATENCY_BUCKET_COUNT],
    overflow: AtomicU64,
    count: AtomicU64,
    total_ms: AtomicU64,
    max_ms: AtomicU64,
}

impl LatencyMetrics {
    fn record(&self, duration: Duration) {
        let ms = duration.as_millis() as u64;
        self.count.fetch_add(1, Ordering::Relaxed);
        self.total_ms.fetch_add(ms, Ordering::Relaxed);
        self.max_ms.fetch_max(ms, Ordering::Relaxed);

        match LATENCY_BUCKETS_MS.iter().position(|bucket| ms <= *bucket) {
            Some(idx) => self.buckets[idx].fetch_add(1, Ordering::Relaxed),
            None => self.overflow.fetch_add(1, Ordering::Relaxed),
        };
    }

    fn snapshot(&self) -> LatencySnapshot {
        let count = self.count.load(Ordering::Relaxed);
        let total_ms = self.total_ms.load(Ordering::Relaxed);
        let avg_ms = if count > 0 {
            total_ms as f64 / count as f64
        } else {
            0.0
        };

        LatencySnapshot {
            buckets_ms: LATENCY_BUCKETS_MS.to_vec(),
            counts: self
                .buckets
                .iter()
                .map(|bucket| bucket.load(Ordering::Relaxed))
                .collect(),
            overflow: self.overflow.load(Ordering::Relaxed),
            count,
            avg_ms,
            max_ms: self.max_ms.load(Ordering::Relaxed),
        }
    }
}

#[derive(Clone, Debug, Serialize)]
pub struct HttpMetricsSnapshot {
    pub stake: LatencySnapshot,
    pub round_view: LatencySnapshot,
    pub resolve: LatencySnapshot,
    pub reject_rate_limit: u64,
    pub reject_body_limit: u64,
    pub reject_admission: u64,
    pub internal_errors: u64,
}

#[derive(Default)]
pub struct HttpMetrics {
    stake: LatencyMetrics,
    round_view: LatencyMetrics,
    resolve: LatencyMetrics,
    reject_rate_limit: AtomicU64,
    reject_body_limit: AtomicU64,
    reject_admission: AtomicU64,
    internal_errors: AtomicU64,
}

impl HttpMetrics {
    pub fn record_stake(&self, duration: Duration) {
        self.stake.record(duration);
    }

    pub fn record_round_view(&self, duration: Duration) {
        self.round_view.record(duration);
    }

    pub fn record_resolve(&self, duration: Duration) {
        self.resolve.record(duration);
    }

    pub fn inc_reject_rate_limit(&self) {
        self.reject_rate_limit.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_reject_body_limit(&self) {
        self.reject_body_limit.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_reject_admission(&self) {
        self.reject_admission.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_internal_error(&self) {
        self.internal_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> HttpMetricsSnapshot {
        HttpMetricsSnapshot {
            stake: self.stake.snapshot(),
            round_view: self.round_view.snapshot(),
            resolve: self.resolve.snapshot(),
            reject_rate_limit: self.reject_rate_limit.load(Ordering::Relaxed),
            reject_body_limit: self.reject_body_limit.load(Ordering::Relaxed),
            reject_admission: self.reject_admission.load(Ordering::Relaxed),
            internal_errors: self.internal_errors.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_latency_buckets() {
        let metrics = HttpMetrics::default();
        metrics.record_stake(Duration::from_millis(0));
        metrics.record_stake(Duration::from_millis(7));
        metrics.record_stake(Duration::from_secs(10));
        metrics.inc_reject_admission();

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.stake.count, 3);
        assert_eq!(snapshot.stake.counts[0], 1);
        assert_eq!(snapshot.stake.counts[3], 1);
        assert_eq!(snapshot.stake.overflow, 1);
        assert_eq!(snapshot.stake.max_ms, 10_000);
        assert_eq!(snapshot.round_view.count, 0);
        assert_eq!(snapshot.reject_admission, 1);
    }
}
