//! Wires the three periodic components (K, L, M) onto the generic
//! `run_periodically` scheduling loop. The loop shape itself — `select!`
//! over a `CancellationToken` and a sleep — is the teacher's own.

use std::error::Error;
use std::sync::Arc;

use chrono::Duration;
use tokio::select;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::error;

use crate::ratelimit::RateLimitStore;
use crate::reputation::ReputationMonitor;
use crate::sandbox::SandboxMonitor;
use crate::slo::SloController;

pub fn run_periodically<F, E, Fut>(task: F, period: Duration, cancel: CancellationToken)
where
    F: Fn() -> Fut + Send + 'static,
    E: Error,
    Fut: Future<Output = Result<(), E>> + Send,
{
    tokio::spawn(async move {
        loop {
            select!(
                _ = cancel.cancelled() => {
                    tracing::info!("periodic task cancelled");
                    return;
                },
                _ = tokio::time::sleep(period.to_std().unwrap()) => {
                    if let Err(err) = task().await {
                        error!(error = %err, "periodic task failed");
                    }
                }
            )
        }
    });
}

/// Runs `task` once at the next UTC midnight, then every 24h after that
/// (§4.L: "Daily at 00:00 UTC"). `run_periodically` alone can't express a
/// wall-clock anchor, only a fixed period from process start.
pub fn run_daily_at_utc_midnight<F, E, Fut>(task: F, cancel: CancellationToken)
where
    F: Fn() -> Fut + Send + 'static,
    E: Error,
    Fut: Future<Output = Result<(), E>> + Send,
{
    tokio::spawn(async move {
        loop {
            let sleep_for = seconds_until_utc_midnight(chrono::Utc::now());
            select!(
                _ = cancel.cancelled() => {
                    tracing::info!("daily task cancelled");
                    return;
                },
                _ = tokio::time::sleep(std::time::Duration::from_secs(sleep_for)) => {
                    if let Err(err) = task().await {
                        error!(error = %err, "daily task failed");
                    }
                }
            )
        }
    });
}

pub(crate) fn seconds_until_utc_midnight(now: chrono::DateTime<chrono::Utc>) -> u64 {
    let tomorrow = (now + Duration::days(1)).date_naive().and_hms_opt(0, 0, 0).unwrap().and_utc();
    (tomorrow - now).num_seconds().max(1) as u64
}

const REPUTATION_SWEEP_PERIOD: i64 = 1; // hours
const SLO_EVALUATION_PERIOD: i64 = 5; // minutes

/// K and L: both are pure DB sweeps with no in-process state to share, so
/// they run in their own binary (`bin/periodic.rs`), separate from the
/// worker processes.
pub struct PeriodicMonitors<S: RateLimitStore + 'static> {
    reputation: Arc<ReputationMonitor<S>>,
    sandbox: Arc<SandboxMonitor>,
}

impl<S: RateLimitStore + 'static> PeriodicMonitors<S> {
    pub fn new(reputation: ReputationMonitor<S>, sandbox: SandboxMonitor) -> Self {
        PeriodicMonitors {
            reputation: Arc::new(reputation),
            sandbox: Arc::new(sandbox),
        }
    }

    /// Spawns both monitors onto the runtime, each on its own cancellation
    /// of `cancel`.
    pub fn spawn(&self, cancel: CancellationToken) {
        let reputation = self.reputation.clone();
        run_periodically(
            move || {
                let reputation = reputation.clone();
                async move { reputation.run_sweep().await }
            },
            Duration::hours(REPUTATION_SWEEP_PERIOD),
            cancel.clone(),
        );

        let sandbox = self.sandbox.clone();
        run_daily_at_utc_midnight(
            move || {
                let sandbox = sandbox.clone();
                async move { sandbox.run_sweep().await }
            },
            cancel,
        );
    }
}

/// M: unlike K/L, the SLO controller mutates a `ConcurrencyHandle` that
/// shares a semaphore with a live `SendWorker` — it must run inside that
/// worker's own process, not the `periodic` binary.
pub fn spawn_slo_controller(slo: SloController, cancel: CancellationToken) {
    let slo = Arc::new(Mutex::new(slo));
    run_periodically(
        move || {
            let slo = slo.clone();
            async move {
                slo.lock().await.evaluate();
                Ok::<(), crate::models::Error>(())
            }
        },
        Duration::minutes(SLO_EVALUATION_PERIOD),
        cancel,
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn midnight_countdown_never_exceeds_a_day() {
        let now = chrono::Utc::now();
        assert!(seconds_until_utc_midnight(now) <= 86_400);
        assert!(seconds_until_utc_midnight(now) >= 1);
    }
}
