//! Lightweight internal metrics aggregator. A deliberate deviation from
//! `empath-metrics`' OpenTelemetry stack (see `DESIGN.md`): the SLO
//! controller (§4.M) needs synchronous read-back of `error_rate` and
//! `queue_age_p95`, which doesn't fit OTel's push/export model.

use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

const QUEUE_AGE_SAMPLE_CAP: usize = 1000;

struct Inner {
    sent: AtomicU64,
    failed: AtomicU64,
    in_flight: AtomicI64,
    queue_age_samples_ms: Mutex<Vec<u64>>,
}

/// Shared handle passed into the send worker and read back by the SLO
/// controller and the admin facade.
#[derive(Clone)]
pub struct Metrics {
    inner: Arc<Inner>,
}

impl Default for Metrics {
    fn default() -> Self {
        Metrics {
            inner: Arc::new(Inner {
                sent: AtomicU64::new(0),
                failed: AtomicU64::new(0),
                in_flight: AtomicI64::new(0),
                queue_age_samples_ms: Mutex::new(Vec::with_capacity(QUEUE_AGE_SAMPLE_CAP)),
            }),
        }
    }
}

impl Metrics {
    pub fn record_success(&self) {
        self.inner.sent.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_failure(&self) {
        self.inner.failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_queue_age(&self, age_ms: u64) {
        let mut samples = self.inner.queue_age_samples_ms.lock();
        if samples.len() >= QUEUE_AGE_SAMPLE_CAP {
            samples.remove(0);
        }
        samples.push(age_ms);
    }

    pub fn increment_in_flight(&self) {
        self.inner.in_flight.fetch_add(1, Ordering::Relaxed);
    }

    pub fn decrement_in_flight(&self) {
        self.inner.in_flight.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn in_flight(&self) -> i64 {
        self.inner.in_flight.load(Ordering::Relaxed)
    }

    /// Error rate over the lifetime of the process counters (the SLO
    /// controller resets these periodically, see `src/slo.rs`).
    pub fn error_rate(&self) -> f64 {
        let sent = self.inner.sent.load(Ordering::Relaxed);
        let failed = self.inner.failed.load(Ordering::Relaxed);
        let total = sent + failed;
        if total == 0 {
            0.0
        } else {
            failed as f64 / total as f64
        }
    }

    pub fn queue_age_p95_ms(&self) -> u64 {
        let mut samples = self.inner.queue_age_samples_ms.lock().clone();
        if samples.is_empty() {
            return 0;
        }
        samples.sort_unstable();
        let idx = ((samples.len() as f64) * 0.95).ceil() as usize;
        samples[idx.min(samples.len() - 1)]
    }

    /// Resets the error-rate counters; called by the SLO controller after
    /// each evaluation so each window reflects only recent activity.
    pub fn reset_window(&self) {
        self.inner.sent.store(0, Ordering::Relaxed);
        self.inner.failed.store(0, Ordering::Relaxed);
        self.inner.queue_age_samples_ms.lock().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_rate_reflects_failures() {
        let m = Metrics::default();
        for _ in 0..9 {
            m.record_success();
        }
        m.record_failure();
        assert!((m.error_rate() - 0.1).abs() < 1e-9);
    }

    #[test]
    fn p95_of_queue_age_samples() {
        let m = Metrics::default();
        for i in 1..=100 {
            m.record_queue_age(i);
        }
        assert!(m.queue_age_p95_ms() >= 95);
    }
}
