use serde::{Deserialize, Serialize};
use sqlx::PgPool;

use super::{Error, IpPoolId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, sqlx::Type, Serialize, Deserialize)]
#[sqlx(type_name = "ip_pool_type", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum IpPoolType {
    Shared,
    Transactional,
    Marketing,
    Dedicated,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct IpPool {
    pub id: IpPoolId,
    pub name: String,
    pub pool_type: IpPoolType,
    pub ip_addresses: Vec<String>,
    pub is_active: bool,
    pub reputation: f64,
    pub daily_limit: Option<i64>,
    pub hourly_limit: Option<i64>,
    pub warmup_enabled: bool,
    pub warmup_config: Option<sqlx::types::Json<super::domain::WarmupConfig>>,
}

#[derive(Clone)]
pub struct IpPoolRepository {
    pool: PgPool,
}

impl IpPoolRepository {
    pub fn new(pool: PgPool) -> Self {
        IpPoolRepository { pool }
    }

    pub async fn find(&self, id: IpPoolId) -> Result<Option<IpPool>, Error> {
        sqlx::query_as!(
            IpPool,
            r#"
            SELECT id as "id: _", name, pool_type as "pool_type: _", ip_addresses,
                   is_active, reputation, daily_limit, hourly_limit, warmup_enabled,
                   warmup_config as "warmup_config: _"
            FROM ip_pools WHERE id = $1
            "#,
            id.0
        )
        .fetch_optional(&self.pool)
        .await
        .map_err(Error::from)
    }

    /// Active pools of a given type, highest reputation first, ties broken
    /// by oldest `created_at` (§4.F).
    pub async fn find_active_by_type(&self, pool_type: IpPoolType) -> Result<Vec<IpPool>, Error> {
        sqlx::query_as!(
            IpPool,
            r#"
            SELECT id as "id: _", name, pool_type as "pool_type: _", ip_addresses,
                   is_active, reputation, daily_limit, hourly_limit, warmup_enabled,
                   warmup_config as "warmup_config: _"
            FROM ip_pools
            WHERE pool_type = $1 AND is_active
            ORDER BY reputation DESC, created_at ASC
            "#,
            pool_type as IpPoolType
        )
        .fetch_all(&self.pool)
        .await
        .map_err(Error::from)
    }
}
