//! Reputation monitor (component K): hourly sweep over active tenants,
//! computing 24h deliverability metrics, applying suspension guardrails,
//! and persisting a `ReputationMetric` row per tenant per day.
//!
//! Scheduling idiom grounded on `periodically.rs::run_periodically`.

use std::sync::Arc;

use tracing::{error, info, warn};

use crate::models::{
    DailyMetrics, DomainRepository, EmailLogRepository, ReputationMetric,
    ReputationMetricRepository, SuppressionRepository, TenantRepository,
};
use crate::ratelimit::{RateLimitStore, TenantWarmupThrottle};

const BOUNCE_RATE_SUSPEND_THRESHOLD: f64 = 0.02;
const COMPLAINT_RATE_SUSPEND_THRESHOLD: f64 = 0.001;
const REPUTATION_SCORE_SUSPEND_THRESHOLD: f64 = 50.0;

/// Warm-up curve (§4.K): `min(start_volume * daily_increase^day, max_daily_volume)`.
pub fn warmup_limit(day: u32, start_volume: f64, daily_increase: f64, max_daily_volume: f64) -> f64 {
    (start_volume * daily_increase.powi(day as i32)).min(max_daily_volume)
}

/// `reputation_score` formula (§4.K): start at 100, penalise bounce excess
/// over the healthy baseline by x1000, complaint excess by x10000, bonus
/// engagement, clamp to [0, 100].
pub fn reputation_score(metrics: &DailyMetrics) -> f64 {
    let bounce_excess = (metrics.bounce_rate() - BOUNCE_RATE_SUSPEND_THRESHOLD).max(0.0);
    let complaint_excess = (metrics.complaint_rate() - COMPLAINT_RATE_SUSPEND_THRESHOLD).max(0.0);
    let score = 100.0 - bounce_excess * 1000.0 - complaint_excess * 10000.0 + 20.0 * metrics.engagement_rate();
    score.clamp(0.0, 100.0)
}

pub struct ReputationMonitor<S: RateLimitStore> {
    tenants: TenantRepository,
    domains: DomainRepository,
    email_log: EmailLogRepository,
    reputation_metric: ReputationMetricRepository,
    suppression: SuppressionRepository,
    warmup_throttle: TenantWarmupThrottle<S>,
}

impl<S: RateLimitStore> ReputationMonitor<S> {
    pub fn new(
        tenants: TenantRepository,
        domains: DomainRepository,
        email_log: EmailLogRepository,
        reputation_metric: ReputationMetricRepository,
        suppression: SuppressionRepository,
        warmup_store: Arc<S>,
    ) -> Self {
        ReputationMonitor {
            tenants,
            domains,
            email_log,
            reputation_metric,
            suppression,
            warmup_throttle: TenantWarmupThrottle::new(warmup_store),
        }
    }

    pub async fn run_sweep(&self) -> Result<(), crate::models::Error> {
        let tenants = self.tenants.find_active().await?;
        info!(count = tenants.len(), "running reputation sweep");

        for tenant in tenants {
            if let Err(err) = self.evaluate_tenant(&tenant).await {
                error!(error = %err, tenant_id = %tenant.id, "reputation evaluation failed for tenant");
            }
        }

        match self.suppression.sweep_expired().await {
            Ok(removed) => info!(removed, "swept expired suppressions"),
            Err(err) => error!(error = %err, "failed to sweep expired suppressions"),
        }

        Ok(())
    }

    async fn evaluate_tenant(&self, tenant: &crate::models::Tenant) -> Result<(), crate::models::Error> {
        let tenant_id = tenant.id;
        let metrics = self.email_log.daily_metrics(tenant_id).await?;
        let score = reputation_score(&metrics);

        self.tenants
            .update_rates(tenant_id, metrics.bounce_rate(), metrics.complaint_rate())
            .await?;

        self.apply_warmup_guardrail(tenant, &metrics).await;

        if metrics.bounce_rate() >= BOUNCE_RATE_SUSPEND_THRESHOLD {
            warn!(tenant_id = %tenant_id, bounce_rate = metrics.bounce_rate(), "suspending tenant for high bounce rate");
            self.tenants
                .suspend(tenant_id, "High bounce rate detected by the reputation monitor")
                .await?;
        } else if metrics.complaint_rate() >= COMPLAINT_RATE_SUSPEND_THRESHOLD {
            warn!(tenant_id = %tenant_id, complaint_rate = metrics.complaint_rate(), "suspending tenant for high complaint rate");
            self.tenants
                .suspend(tenant_id, "High spam complaint rate detected by the reputation monitor")
                .await?;
        } else if score < REPUTATION_SCORE_SUSPEND_THRESHOLD {
            warn!(tenant_id = %tenant_id, score, "suspending tenant for low reputation score");
            self.tenants
                .suspend(tenant_id, "Reputation score fell below the minimum threshold")
                .await?;
        }

        let metric = ReputationMetric {
            tenant_id,
            date: chrono::Utc::now().date_naive(),
            sent: metrics.sent,
            delivered: metrics.delivered,
            bounced: metrics.bounced,
            bounced_hard: metrics.bounced_hard,
            bounced_soft: metrics.bounced_soft,
            complained: metrics.complained,
            opened: metrics.opened,
            clicked: metrics.clicked,
            bounce_rate: metrics.bounce_rate(),
            complaint_rate: metrics.complaint_rate(),
            open_rate: metrics.open_rate(),
            click_rate: metrics.click_rate(),
            reputation_score: score,
        };
        self.reputation_metric.upsert_today(&metric).await
    }

    /// If the tenant's default domain has warm-up enabled and today's sent
    /// volume is at or past the warm-up curve's limit for the current day,
    /// write a throttle record the send pipeline worker consults (§4.K).
    async fn apply_warmup_guardrail(&self, tenant: &crate::models::Tenant, metrics: &DailyMetrics) {
        let Some(domain_id) = tenant.default_domain_id else {
            return;
        };
        let domain = match self.domains.find(domain_id).await {
            Ok(domain) => domain,
            Err(err) => {
                error!(error = %err, tenant_id = %tenant.id, "failed to load default domain for warm-up check");
                return;
            }
        };
        let Some(day) = domain.warmup_day(chrono::Utc::now()) else {
            return;
        };
        let config = domain.warmup_config.as_ref().map(|c| &c.0).cloned().unwrap_or_default();
        let limit = config.limit_for_day(day);

        if metrics.sent >= limit {
            warn!(tenant_id = %tenant.id, sent = metrics.sent, limit, "tenant exceeded warm-up curve, throttling");
            let seconds_until_midnight = crate::periodically::seconds_until_utc_midnight(chrono::Utc::now());
            self.warmup_throttle.throttle(tenant.id, limit, seconds_until_midnight).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn metrics(sent: i64, bounced_hard: i64, complained: i64) -> DailyMetrics {
        DailyMetrics {
            sent,
            delivered: sent - bounced_hard,
            bounced: bounced_hard,
            bounced_hard,
            bounced_soft: 0,
            complained,
            opened: 0,
            clicked: 0,
        }
    }

    #[test]
    fn healthy_tenant_scores_near_100() {
        let m = metrics(1000, 1, 0);
        assert!(reputation_score(&m) > 95.0);
    }

    #[test]
    fn high_bounce_rate_tanks_score() {
        let m = metrics(100, 10, 0);
        assert!(reputation_score(&m) < 50.0);
    }

    #[test]
    fn complaints_are_penalised_more_heavily_than_bounces() {
        let bounce_heavy = metrics(1000, 30, 0);
        let complaint_heavy = metrics(1000, 0, 3);
        assert!(reputation_score(&complaint_heavy) < reputation_score(&bounce_heavy));
    }

    #[test]
    fn warmup_limit_grows_then_caps() {
        assert_eq!(warmup_limit(0, 50.0, 1.5, 100_000.0), 50.0);
        assert!(warmup_limit(5, 50.0, 1.5, 100_000.0) > 300.0);
        assert_eq!(warmup_limit(100, 50.0, 1.5, 100_000.0), 100_000.0);
    }

}
