use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;

use super::{DomainId, Error, TenantId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, sqlx::Type, Serialize, Deserialize)]
#[sqlx(type_name = "domain_status", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum DomainStatus {
    Pending,
    Verified,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WarmupConfig {
    pub start_volume: i64,
    pub daily_increase: f64,
    pub max_daily_volume: i64,
}

impl Default for WarmupConfig {
    fn default() -> Self {
        WarmupConfig {
            start_volume: 50,
            daily_increase: 1.5,
            max_daily_volume: 100_000,
        }
    }
}

impl WarmupConfig {
    /// `limit(day) = min(start_volume · daily_increase^day, max_daily_volume)`.
    pub fn limit_for_day(&self, day: u32) -> i64 {
        let raw = self.start_volume as f64 * self.daily_increase.powi(day as i32);
        (raw as i64).min(self.max_daily_volume)
    }
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct Domain {
    pub id: DomainId,
    pub tenant_id: TenantId,
    pub domain: String,
    pub status: DomainStatus,
    pub warmup_enabled: bool,
    pub warmup_start_date: Option<DateTime<Utc>>,
    pub warmup_config: Option<sqlx::types::Json<WarmupConfig>>,
}

impl Domain {
    pub fn is_verified(&self) -> bool {
        self.status == DomainStatus::Verified
    }

    pub fn warmup_day(&self, now: DateTime<Utc>) -> Option<u32> {
        let start = self.warmup_start_date?;
        if !self.warmup_enabled {
            return None;
        }
        let days = (now - start).num_days().max(0);
        Some(days as u32)
    }
}

#[derive(Clone)]
pub struct DomainRepository {
    pool: PgPool,
}

impl DomainRepository {
    pub fn new(pool: PgPool) -> Self {
        DomainRepository { pool }
    }

    pub async fn find(&self, id: DomainId) -> Result<Domain, Error> {
        sqlx::query_as!(
            Domain,
            r#"
            SELECT id as "id: _", tenant_id as "tenant_id: _", domain,
                   status as "status: _", warmup_enabled, warmup_start_date,
                   warmup_config as "warmup_config: _"
            FROM domains WHERE id = $1
            "#,
            id.0
        )
        .fetch_one(&self.pool)
        .await
        .map_err(Error::from)
    }

    pub async fn find_with_warmup_enabled(&self) -> Result<Vec<Domain>, Error> {
        sqlx::query_as!(
            Domain,
            r#"
            SELECT id as "id: _", tenant_id as "tenant_id: _", domain,
                   status as "status: _", warmup_enabled, warmup_start_date,
                   warmup_config as "warmup_config: _"
            FROM domains WHERE warmup_enabled
            "#
        )
        .fetch_all(&self.pool)
        .await
        .map_err(Error::from)
    }
}
