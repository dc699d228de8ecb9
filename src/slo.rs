//! SLO controller (component M): every 5 minutes, checks the send
//! pipeline's error rate and queue-age p95 against the violation
//! thresholds in §4.M and adjusts worker concurrency accordingly.
//!
//! Scheduling idiom grounded on `periodically.rs::run_periodically`;
//! concurrency adjustment reuses the teacher's `Handler.workers:
//! Arc<Semaphore>` resize pattern, exposed here as `ConcurrencyHandle`
//! (`src/worker/send.rs`).

use tracing::{info, warn};

use crate::metrics::Metrics;
use crate::worker::send::ConcurrencyHandle;

const ERROR_RATE_VIOLATION_THRESHOLD: f64 = 0.05;
const QUEUE_AGE_P95_VIOLATION_MS: u64 = 120_000;
const RECOVERY_STREAK_TO_RAISE: u32 = 3;

pub struct SloController {
    metrics: Metrics,
    concurrency: ConcurrencyHandle,
    recovery_streak: u32,
}

impl SloController {
    pub fn new(metrics: Metrics, concurrency: ConcurrencyHandle) -> Self {
        SloController {
            metrics,
            concurrency,
            recovery_streak: 0,
        }
    }

    /// Evaluates the current window and mutates concurrency if needed.
    /// Takes `&mut self` because the recovery streak is evaluation state,
    /// not metrics state — unlike K/L this isn't a read-only sweep.
    pub fn evaluate(&mut self) {
        let error_rate = self.metrics.error_rate();
        let queue_age_p95 = self.metrics.queue_age_p95_ms();
        let violated = error_rate > ERROR_RATE_VIOLATION_THRESHOLD || queue_age_p95 > QUEUE_AGE_P95_VIOLATION_MS;

        if violated {
            warn!(
                error_rate,
                queue_age_p95_ms = queue_age_p95,
                current_concurrency = self.concurrency.current(),
                "SLO violation detected, halving worker concurrency"
            );
            self.concurrency.halve();
            self.recovery_streak = 0;
        } else {
            self.recovery_streak += 1;
            info!(error_rate, queue_age_p95_ms = queue_age_p95, streak = self.recovery_streak, "SLO window healthy");
            if self.recovery_streak >= RECOVERY_STREAK_TO_RAISE {
                if self.concurrency.current() < self.concurrency.original() {
                    info!(
                        current_concurrency = self.concurrency.current(),
                        "three consecutive healthy windows, raising worker concurrency"
                    );
                    self.concurrency.raise();
                }
                self.recovery_streak = 0;
            }
        }

        self.metrics.reset_window();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn handle(original: usize) -> ConcurrencyHandle {
        ConcurrencyHandle::for_test(original)
    }

    #[test]
    fn violation_halves_concurrency_and_resets_streak() {
        let metrics = Metrics::default();
        for _ in 0..10 {
            metrics.record_failure();
        }
        let mut controller = SloController::new(metrics, handle(8));
        controller.evaluate();
        assert_eq!(controller.concurrency.current(), 4);
        assert_eq!(controller.recovery_streak, 0);
    }

    #[test]
    fn three_healthy_windows_raise_concurrency() {
        let metrics = Metrics::default();
        metrics.record_success();
        let concurrency = handle(8);
        concurrency.halve();
        concurrency.halve();
        let mut controller = SloController::new(metrics, concurrency);
        controller.evaluate();
        controller.evaluate();
        assert_eq!(controller.concurrency.current(), 2);
        controller.evaluate();
        assert_eq!(controller.concurrency.current(), 3);
        assert_eq!(controller.recovery_streak, 0);
    }

    #[test]
    fn queue_age_alone_triggers_violation() {
        let metrics = Metrics::default();
        metrics.record_success();
        metrics.record_queue_age(200_000);
        let mut controller = SloController::new(metrics, handle(4));
        controller.evaluate();
        assert_eq!(controller.concurrency.current(), 2);
    }
}
