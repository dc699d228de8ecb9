//! MX rate limiter (component E): sliding-window per-destination-domain
//! limits in a shared store, atomic INCR+EXPIRE, fail-open on store errors.
//!
//! Grounded on `empath-delivery::rate_limiter`'s per-domain DashMap
//! structuring idiom, adapted to the spec's externally-shared
//! sliding-window semantics (empath's token bucket is process-local; the
//! in-memory implementation here plays the same role as its test double).

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;

#[derive(Debug, Clone, Copy)]
pub struct DomainLimit {
    pub per_second: u32,
    pub per_minute: u32,
}

impl Default for DomainLimit {
    fn default() -> Self {
        DomainLimit {
            per_second: 1,
            per_minute: 120,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RateLimitDecision {
    pub allowed: bool,
    pub retry_after_ms: u64,
}

/// The atomic counter store the rate limiter consults. A real deployment
/// backs this with Redis `INCR`+`EXPIRE` (pipelined); [`InMemoryRateLimitStore`]
/// is the in-process fake used in tests.
#[async_trait]
pub trait RateLimitStore: Send + Sync {
    /// Increments the counter for `key` and sets it to expire in
    /// `ttl_secs` if newly created; returns the post-increment value.
    async fn incr_with_expiry(&self, key: &str, ttl_secs: u64) -> Result<u64, String>;

    /// Sets `key` to `value`, expiring in `ttl_secs`. Used for the
    /// reputation monitor's per-tenant warm-up throttle record (§4.K),
    /// which is a single daily limit write rather than a counter.
    async fn set_with_expiry(&self, key: &str, value: u64, ttl_secs: u64) -> Result<(), String>;

    /// Reads back a value written by `set_with_expiry`, if still live.
    async fn get(&self, key: &str) -> Result<Option<u64>, String>;
}

pub struct InMemoryRateLimitStore {
    counters: DashMap<String, (u64, std::time::Instant, u64)>,
}

impl Default for InMemoryRateLimitStore {
    fn default() -> Self {
        InMemoryRateLimitStore {
            counters: DashMap::new(),
        }
    }
}

#[async_trait]
impl RateLimitStore for InMemoryRateLimitStore {
    async fn incr_with_expiry(&self, key: &str, ttl_secs: u64) -> Result<u64, String> {
        let now = std::time::Instant::now();
        let mut entry = self.counters.entry(key.to_string()).or_insert((0, now, ttl_secs));
        if now.duration_since(entry.1).as_secs() >= entry.2 {
            entry.0 = 0;
            entry.1 = now;
            entry.2 = ttl_secs;
        }
        entry.0 += 1;
        Ok(entry.0)
    }

    async fn set_with_expiry(&self, key: &str, value: u64, ttl_secs: u64) -> Result<(), String> {
        let now = std::time::Instant::now();
        self.counters.insert(key.to_string(), (value, now, ttl_secs));
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<u64>, String> {
        let now = std::time::Instant::now();
        match self.counters.get(key) {
            Some(entry) if now.duration_since(entry.1).as_secs() < entry.2 => Ok(Some(entry.0)),
            _ => Ok(None),
        }
    }
}

pub struct RedisRateLimitStore {
    manager: deadpool_redis::Pool,
}

impl RedisRateLimitStore {
    pub fn new(manager: deadpool_redis::Pool) -> Self {
        RedisRateLimitStore { manager }
    }
}

#[async_trait]
impl RateLimitStore for RedisRateLimitStore {
    async fn incr_with_expiry(&self, key: &str, ttl_secs: u64) -> Result<u64, String> {
        let mut conn = self.manager.get().await.map_err(|e| e.to_string())?;
        let (count,): (u64,) = redis::pipe()
            .atomic()
            .incr(key, 1)
            .expire(key, ttl_secs as i64)
            .ignore()
            .query_async(&mut conn)
            .await
            .map_err(|e| e.to_string())?;
        Ok(count)
    }

    async fn set_with_expiry(&self, key: &str, value: u64, ttl_secs: u64) -> Result<(), String> {
        let mut conn = self.manager.get().await.map_err(|e| e.to_string())?;
        redis::pipe()
            .atomic()
            .set(key, value)
            .expire(key, ttl_secs as i64)
            .ignore()
            .query_async(&mut conn)
            .await
            .map_err(|e| e.to_string())
    }

    async fn get(&self, key: &str) -> Result<Option<u64>, String> {
        let mut conn = self.manager.get().await.map_err(|e| e.to_string())?;
        redis::cmd("GET")
            .arg(key)
            .query_async(&mut conn)
            .await
            .map_err(|e| e.to_string())
    }
}

/// Canonicalises common provider-domain aliases so `gmail.com` and
/// `googlemail.com` share a limit bucket (§4.E).
pub fn canonical_domain(domain: &str) -> String {
    let lower = domain.to_ascii_lowercase();
    match lower.as_str() {
        "googlemail.com" => "gmail.com".to_string(),
        "live.com" | "hotmail.com" | "msn.com" => "outlook.com".to_string(),
        "ymail.com" | "rocketmail.com" => "yahoo.com".to_string(),
        other => other.to_string(),
    }
}

pub fn extract_domain(email: &str) -> Option<String> {
    email.rsplit_once('@').map(|(_, d)| canonical_domain(d))
}

pub struct MxRateLimiter<S: RateLimitStore> {
    store: Arc<S>,
    limits: HashMap<String, DomainLimit>,
    default_limit: DomainLimit,
}

impl<S: RateLimitStore> MxRateLimiter<S> {
    pub fn new(store: Arc<S>, limits: HashMap<String, DomainLimit>) -> Self {
        MxRateLimiter {
            store,
            limits,
            default_limit: DomainLimit::default(),
        }
    }

    fn limit_for(&self, domain: &str) -> DomainLimit {
        self.limits.get(domain).copied().unwrap_or(self.default_limit)
    }

    /// Checks and increments both the per-second and per-minute windows for
    /// `to`'s destination domain. Fails open (`allowed: true`) if the store
    /// errors (§4.E).
    pub async fn check(&self, to: &str) -> RateLimitDecision {
        let Some(domain) = extract_domain(to) else {
            return RateLimitDecision {
                allowed: true,
                retry_after_ms: 0,
            };
        };
        let limit = self.limit_for(&domain);

        let now = chrono::Utc::now();
        let second_key = format!("ratelimit:{domain}:sec:{}", now.timestamp());
        let minute_key = format!("ratelimit:{domain}:min:{}", now.timestamp() / 60);

        let second_count = match self.store.incr_with_expiry(&second_key, 2).await {
            Ok(c) => c,
            Err(e) => {
                tracing::warn!(domain = %domain, error = %e, "rate limit store error, failing open");
                return RateLimitDecision {
                    allowed: true,
                    retry_after_ms: 0,
                };
            }
        };
        if second_count > limit.per_second as u64 {
            return RateLimitDecision {
                allowed: false,
                retry_after_ms: 1000,
            };
        }

        let minute_count = match self.store.incr_with_expiry(&minute_key, 120).await {
            Ok(c) => c,
            Err(e) => {
                tracing::warn!(domain = %domain, error = %e, "rate limit store error, failing open");
                return RateLimitDecision {
                    allowed: true,
                    retry_after_ms: 0,
                };
            }
        };
        if minute_count > limit.per_minute as u64 {
            let ms_in_minute = (now.timestamp_millis() % 60_000) as u64;
            return RateLimitDecision {
                allowed: false,
                retry_after_ms: 60_000 - ms_in_minute,
            };
        }

        RateLimitDecision {
            allowed: true,
            retry_after_ms: 0,
        }
    }
}

/// Per-tenant warm-up throttle record (§4.K): the reputation monitor writes
/// the computed daily limit when a tenant exceeds its warm-up curve; the
/// send pipeline worker consults it alongside [`MxRateLimiter`].
pub struct TenantWarmupThrottle<S: RateLimitStore> {
    store: Arc<S>,
}

impl<S: RateLimitStore> TenantWarmupThrottle<S> {
    pub fn new(store: Arc<S>) -> Self {
        TenantWarmupThrottle { store }
    }

    fn key(tenant_id: crate::models::TenantId) -> String {
        format!("warmup_throttle:{tenant_id}")
    }

    /// Record that `tenant_id` is limited to `daily_limit` sends until
    /// `ttl_secs` from now (the monitor passes seconds until UTC midnight).
    pub async fn throttle(&self, tenant_id: crate::models::TenantId, daily_limit: i64, ttl_secs: u64) {
        if let Err(e) = self
            .store
            .set_with_expiry(&Self::key(tenant_id), daily_limit.max(0) as u64, ttl_secs)
            .await
        {
            tracing::warn!(tenant_id = %tenant_id, error = %e, "failed to persist warm-up throttle record");
        }
    }

    /// `Some(limit)` if the tenant is currently throttled for warm-up.
    pub async fn limit_for(&self, tenant_id: crate::models::TenantId) -> Option<u64> {
        self.store.get(&Self::key(tenant_id)).await.ok().flatten()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn n_plus_one_within_a_second_is_denied_once() {
        let store = Arc::new(InMemoryRateLimitStore::default());
        let mut limits = HashMap::new();
        limits.insert("gmail.com".to_string(), DomainLimit { per_second: 20, per_minute: 1000 });
        let limiter = MxRateLimiter::new(store, limits);

        let mut denied = 0;
        for _ in 0..21 {
            let decision = limiter.check("someone@gmail.com").await;
            if !decision.allowed {
                denied += 1;
            }
        }
        assert_eq!(denied, 1);
    }

    #[test]
    fn canonicalises_aliases() {
        assert_eq!(canonical_domain("googlemail.com"), "gmail.com");
        assert_eq!(canonical_domain("hotmail.com"), "outlook.com");
        assert_eq!(canonical_domain("YMAIL.com"), "yahoo.com");
    }

    #[tokio::test]
    async fn warmup_throttle_round_trips_through_the_store() {
        let store = Arc::new(InMemoryRateLimitStore::default());
        let throttle = TenantWarmupThrottle::new(store);
        let tenant_id = crate::models::TenantId::new();

        assert_eq!(throttle.limit_for(tenant_id).await, None);
        throttle.throttle(tenant_id, 500, 3600).await;
        assert_eq!(throttle.limit_for(tenant_id).await, Some(500));
    }
}
