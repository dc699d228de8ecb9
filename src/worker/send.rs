//! The send pipeline worker itself (§4.H).

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, instrument, warn};

use crate::config::{RetryPolicy, WorkerConfig};
use crate::errors::MappedError;
use crate::ippool::{IpPoolSelector, PoolSelectionRequest};
use crate::metrics::Metrics;
use crate::models::{
    DeadLetterRepository, EmailEventRepository, EmailEventType, EmailLogRepository,
    OutboxRepository, SuppressionRepository, TenantRepository,
};
use crate::provider::DriverSet;
use crate::queue::{Queue, SendJob};
use crate::ratelimit::{MxRateLimiter, RateLimitStore, TenantWarmupThrottle};
use crate::validation::ValidationStage;

use super::SendOutcome;

/// Collaborators the worker needs, grouped the way `Handler` groups its
/// repositories (§4.H).
pub struct SendWorker<Q, S>
where
    Q: Queue<SendJob> + 'static,
    S: RateLimitStore + 'static,
{
    queue: Arc<Q>,
    outbox: OutboxRepository,
    email_log: EmailLogRepository,
    email_event: EmailEventRepository,
    suppression: SuppressionRepository,
    tenants: TenantRepository,
    dlq: DeadLetterRepository,
    rate_limiter: Arc<MxRateLimiter<S>>,
    warmup_throttle: TenantWarmupThrottle<S>,
    pool_selector: IpPoolSelector,
    validation: ValidationStage,
    drivers: Arc<DriverSet>,
    metrics: Metrics,
    retry_policy: RetryPolicy,
    /// Permits currently granted; adjusted at runtime by the SLO controller
    /// (§4.M) via [`SendWorker::concurrency_handle`].
    semaphore: Arc<Semaphore>,
    shutdown: CancellationToken,
}

/// A cloneable handle the SLO controller holds to raise/lower concurrency
/// without owning the worker itself.
#[derive(Clone)]
pub struct ConcurrencyHandle {
    semaphore: Arc<Semaphore>,
    original: usize,
    current: Arc<AtomicUsize>,
}

impl ConcurrencyHandle {
    /// Standalone handle over a fresh semaphore, for the SLO controller's
    /// own tests, which have no reason to stand up a full `SendWorker`.
    #[cfg(test)]
    pub(crate) fn for_test(original: usize) -> Self {
        ConcurrencyHandle {
            semaphore: Arc::new(Semaphore::new(original)),
            original,
            current: Arc::new(AtomicUsize::new(original)),
        }
    }

    pub fn current(&self) -> usize {
        self.current.load(Ordering::Relaxed)
    }

    pub fn original(&self) -> usize {
        self.original
    }

    /// Halve current concurrency, floor 1 (§4.M on violation).
    pub fn halve(&self) {
        let current = self.current.load(Ordering::Relaxed);
        let target = (current / 2).max(1);
        self.set(target);
    }

    /// Raise concurrency to `min(original, floor(current*1.5))` (§4.M on
    /// three consecutive non-violations).
    pub fn raise(&self) {
        let current = self.current.load(Ordering::Relaxed);
        let target = ((current as f64 * 1.5).floor() as usize).min(self.original);
        self.set(target);
    }

    fn set(&self, target: usize) {
        let current = self.current.load(Ordering::Relaxed);
        if target == current {
            return;
        }
        if target < current {
            self.semaphore.forget_permits(current - target);
        } else {
            self.semaphore.add_permits(target - current);
        }
        self.current.store(target, Ordering::Relaxed);
    }
}

#[allow(clippy::too_many_arguments)]
impl<Q, S> SendWorker<Q, S>
where
    Q: Queue<SendJob> + 'static,
    S: RateLimitStore + 'static,
{
    pub fn new(
        queue: Arc<Q>,
        outbox: OutboxRepository,
        email_log: EmailLogRepository,
        email_event: EmailEventRepository,
        suppression: SuppressionRepository,
        tenants: TenantRepository,
        dlq: DeadLetterRepository,
        rate_limiter: Arc<MxRateLimiter<S>>,
        warmup_store: Arc<S>,
        pool_selector: IpPoolSelector,
        validation: ValidationStage,
        drivers: Arc<DriverSet>,
        metrics: Metrics,
        config: WorkerConfig,
        shutdown: CancellationToken,
    ) -> Self {
        SendWorker {
            queue,
            outbox,
            email_log,
            email_event,
            suppression,
            tenants,
            dlq,
            rate_limiter,
            warmup_throttle: TenantWarmupThrottle::new(warmup_store),
            pool_selector,
            validation,
            drivers,
            metrics,
            retry_policy: config.retry_policy,
            semaphore: Arc::new(Semaphore::new(config.concurrency)),
            shutdown,
        }
    }

    pub fn concurrency_handle(&self, original: usize) -> ConcurrencyHandle {
        ConcurrencyHandle {
            semaphore: self.semaphore.clone(),
            original,
            current: Arc::new(AtomicUsize::new(original)),
        }
    }

    /// The main loop: poll the queue, acquire a permit, spawn the job.
    /// Mirrors the teacher's `Handler::spawn` shape (poll interval instead
    /// of a bus stream, since jobs arrive via the queue abstraction here).
    pub async fn run(self: Arc<Self>) {
        let mut poll = tokio::time::interval(Duration::from_millis(200));
        poll.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => {
                    info!("send worker shutting down, draining in-flight jobs");
                    self.drain().await;
                    return;
                }
                _ = poll.tick() => {
                    while let Some(job) = self.queue.try_dequeue().await {
                        let Ok(permit) = self.semaphore.clone().acquire_owned().await else {
                            break;
                        };
                        let worker = self.clone();
                        self.metrics.increment_in_flight();
                        tokio::spawn(async move {
                            let _permit = permit;
                            worker.handle_job(job).await;
                            worker.metrics.decrement_in_flight();
                        });
                    }
                }
            }
        }
    }

    async fn drain(&self) {
        let deadline = Duration::from_secs(30);
        let _ = tokio::time::timeout(deadline, async {
            // Acquiring every permit succeeds only once all in-flight jobs
            // have released theirs.
            let _ = self.semaphore.acquire_many(self.semaphore.available_permits().max(1) as u32).await;
        })
        .await;
    }

    #[instrument(skip(self, job), fields(outbox_id = %job.outbox_id, tenant_id = %job.tenant_id, request_id = %job.request_id))]
    async fn handle_job(&self, job: SendJob) -> SendOutcome {
        let queue_age = job.queue_age(chrono::Utc::now());
        self.metrics
            .record_queue_age(queue_age.num_milliseconds().max(0) as u64);

        let html = match self.validation.validate(&job).await {
            Ok(html) => html,
            Err(err) => return self.fail_validation(&job, err).await,
        };

        match self.tenants.find(job.tenant_id).await {
            Ok(tenant) if tenant.is_suspended => return self.fail_suspended_tenant(&job).await,
            Ok(_) => {}
            Err(err) => {
                warn!(error = %err, "tenant lookup failed, proceeding without the suspension check");
            }
        }

        match self.suppression.is_suppressed(job.tenant_id, &job.to).await {
            Ok(true) => return self.fail_suppressed(&job).await,
            Ok(false) => {}
            Err(err) => {
                warn!(error = %err, "suppression lookup failed, proceeding without the check");
            }
        }

        if let Some(limit) = self.warmup_throttle.limit_for(job.tenant_id).await {
            return self
                .retry(
                    &job,
                    MappedError::quota("warmup_throttled", format!("tenant exceeded warm-up limit of {limit}/day")),
                    Some(Duration::from_secs(60)),
                )
                .await;
        }

        let decision = self.rate_limiter.check(&job.to).await;
        if !decision.allowed {
            return self
                .retry(
                    &job,
                    MappedError::quota("rate_limited", "destination domain rate limit exceeded"),
                    Some(Duration::from_millis(decision.retry_after_ms)),
                )
                .await;
        }

        let pool = self
            .pool_selector
            .select(&PoolSelectionRequest {
                requested_pool_id: None,
                fallback_type: None,
            })
            .await;

        let started = std::time::Instant::now();
        match self.drivers.send_email(&job, &html, pool.as_ref()).await {
            Ok(result) if result.success => self.succeed(&job, result, started.elapsed()).await,
            Ok(result) => {
                let message = result.error.unwrap_or_else(|| "send failed".to_string());
                self.fail_permanent(&job, MappedError::permanent("message_rejected", message)).await
            }
            Err(err) if err.retryable() => self.retry(&job, err.into_mapped(), None).await,
            Err(err) => self.fail_permanent(&job, err.into_mapped()).await,
        }
    }

    async fn fail_validation(&self, job: &SendJob, err: MappedError) -> SendOutcome {
        let snapshot = err.snapshot();
        self.persist_failed(job, &err, &snapshot).await;
        self.metrics.record_failure();
        SendOutcome::ValidationFailed { error: snapshot }
    }

    async fn fail_suppressed(&self, job: &SendJob) -> SendOutcome {
        let err = MappedError::permanent("suppressed", "recipient is suppressed for this tenant");
        let snapshot = err.snapshot();
        self.persist_failed(job, &err, &snapshot).await;
        self.metrics.record_failure();
        SendOutcome::Suppressed
    }

    /// A suspended tenant cannot produce a new `EmailLog` with status=sent
    /// (§8 universal invariant), enforced here so it holds no matter which
    /// driver ends up handling the job.
    async fn fail_suspended_tenant(&self, job: &SendJob) -> SendOutcome {
        let err = MappedError::permanent("account_paused", "tenant is suspended");
        let snapshot = err.snapshot();
        self.persist_failed(job, &err, &snapshot).await;
        self.metrics.record_failure();
        SendOutcome::PermanentlyFailed { error: snapshot }
    }

    async fn fail_permanent(&self, job: &SendJob, err: MappedError) -> SendOutcome {
        let snapshot = err.snapshot();
        self.persist_failed(job, &err, &snapshot).await;
        self.metrics.record_failure();
        SendOutcome::PermanentlyFailed { error: snapshot }
    }

    async fn persist_failed(&self, job: &SendJob, err: &MappedError, snapshot: &str) {
        if let Err(e) = self.outbox.mark_failed(job.outbox_id, snapshot).await {
            error!(error = %e, "failed to mark outbox as failed");
        }
        match self
            .email_log
            .upsert_failed(
                job.outbox_id,
                job.tenant_id,
                job.recipient.recipient_id,
                &job.to,
                &job.subject,
                &err.code,
                &err.message,
                job.attempt,
            )
            .await
        {
            Ok(log) => {
                let _ = self.email_event.append(log.id, EmailEventType::Failed, None).await;
            }
            Err(e) => error!(error = %e, "failed to upsert failed email log"),
        }
    }

    async fn succeed(&self, job: &SendJob, result: crate::provider::SendResult, elapsed: Duration) -> SendOutcome {
        let duration_ms = elapsed.as_millis().min(i32::MAX as u128) as i32;
        let provider_message_id = result.provider_message_id.clone().unwrap_or_default();

        if let Err(e) = self.outbox.mark_sent(job.outbox_id).await {
            error!(error = %e, "failed to mark outbox as sent");
        }
        match self
            .email_log
            .upsert_sent(
                job.outbox_id,
                job.tenant_id,
                job.recipient.recipient_id,
                &job.to,
                &job.subject,
                &provider_message_id,
                job.attempt,
                duration_ms,
            )
            .await
        {
            Ok(log) => {
                let metadata = serde_json::json!({
                    "provider_message_id": provider_message_id,
                    "duration_ms": duration_ms,
                });
                let _ = self.email_event.append(log.id, EmailEventType::Sent, Some(metadata)).await;
            }
            Err(e) => error!(error = %e, "failed to upsert sent email log"),
        }

        self.metrics.record_success();
        SendOutcome::Sent { provider_message_id }
    }

    async fn retry(&self, job: &SendJob, err: MappedError, delay_override: Option<Duration>) -> SendOutcome {
        let snapshot = err.snapshot();
        let attempt = job.attempt + 1;

        if attempt >= self.retry_policy.max_attempts as i32 {
            return self.dead_letter(job, &snapshot).await;
        }

        if let Err(e) = self.outbox.mark_retrying(job.outbox_id, &snapshot).await {
            error!(error = %e, "failed to mark outbox as retrying");
        }
        match self
            .email_log
            .upsert_retrying(
                job.outbox_id,
                job.tenant_id,
                job.recipient.recipient_id,
                &job.to,
                &job.subject,
                &err.code,
                &err.message,
                attempt,
            )
            .await
        {
            Ok(log) => {
                let _ = self.email_event.append(log.id, EmailEventType::Retrying, None).await;
            }
            Err(e) => error!(error = %e, "failed to upsert retrying email log"),
        }

        let delay = delay_override.unwrap_or_else(|| {
            let jitter_unit: f64 = rand::rng().random();
            self.retry_policy.delay_for_attempt(attempt as u32, jitter_unit)
        });

        let mut rescheduled = job.clone();
        rescheduled.attempt = attempt;
        rescheduled.enqueued_at = chrono::Utc::now();
        let queue = self.queue.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            queue.enqueue(rescheduled).await;
        });

        self.metrics.record_failure();
        SendOutcome::Retrying { error: snapshot, attempt }
    }

    async fn dead_letter(&self, job: &SendJob, failed_reason: &str) -> SendOutcome {
        if let Err(e) = self.outbox.mark_failed(job.outbox_id, failed_reason).await {
            error!(error = %e, "failed to mark outbox as failed before dead-lettering");
        }
        let payload = serde_json::to_value(job).unwrap_or_default();
        if let Err(e) = self
            .dlq
            .insert(job.tenant_id, job.outbox_id, payload, failed_reason, job.attempt, job.enqueued_at)
            .await
        {
            error!(error = %e, "failed to write dead letter entry");
        }
        self.metrics.record_failure();
        SendOutcome::DeadLettered {
            error: failed_reason.to_string(),
            attempts: job.attempt,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retry_policy_delay_grows_per_attempt() {
        let policy = RetryPolicy::default();
        let first = policy.delay_for_attempt(1, 0.5);
        let last = policy.delay_for_attempt(6, 0.5);
        assert!(last > first);
    }

    #[test]
    fn concurrency_handle_halves_and_floors_at_one() {
        let semaphore = Arc::new(Semaphore::new(4));
        let handle = ConcurrencyHandle {
            semaphore: semaphore.clone(),
            original: 4,
            current: Arc::new(AtomicUsize::new(4)),
        };
        handle.halve();
        assert_eq!(handle.current(), 2);
        handle.halve();
        assert_eq!(handle.current(), 1);
        handle.halve();
        assert_eq!(handle.current(), 1);
    }

    #[test]
    fn concurrency_handle_raise_is_capped_at_original() {
        let semaphore = Arc::new(Semaphore::new(2));
        let handle = ConcurrencyHandle {
            semaphore,
            original: 8,
            current: Arc::new(AtomicUsize::new(2)),
        };
        handle.raise();
        assert_eq!(handle.current(), 3);
        for _ in 0..10 {
            handle.raise();
        }
        assert_eq!(handle.current(), 8);
    }
}
