use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;

use super::{Error, SuppressionId, TenantId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, sqlx::Type, Serialize, Deserialize)]
#[sqlx(type_name = "suppression_reason", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum SuppressionReason {
    HardBounce,
    SpamComplaint,
    Manual,
    TransientBlock,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct Suppression {
    pub id: SuppressionId,
    pub tenant_id: TenantId,
    pub email: String,
    pub domain: String,
    pub reason: SuppressionReason,
    pub bounce_type: Option<String>,
    pub diagnostic_code: Option<String>,
    pub suppressed_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
}

#[derive(Clone)]
pub struct SuppressionRepository {
    pool: PgPool,
}

impl SuppressionRepository {
    pub fn new(pool: PgPool) -> Self {
        SuppressionRepository { pool }
    }

    pub async fn is_suppressed(&self, tenant_id: TenantId, email: &str) -> Result<bool, Error> {
        let row = sqlx::query!(
            r#"
            SELECT count(*) as "count!" FROM suppressions
            WHERE tenant_id = $1 AND email = $2 AND (expires_at IS NULL OR expires_at > now())
            "#,
            tenant_id.0,
            email
        )
        .fetch_one(&self.pool)
        .await
        .map_err(Error::from)?;
        Ok(row.count > 0)
    }

    /// Upsert by `(tenant_id, email)` (§3 uniqueness).
    pub async fn upsert(
        &self,
        tenant_id: TenantId,
        email: &str,
        domain: &str,
        reason: SuppressionReason,
        bounce_type: Option<&str>,
        diagnostic_code: Option<&str>,
    ) -> Result<Suppression, Error> {
        sqlx::query_as!(
            Suppression,
            r#"
            INSERT INTO suppressions (tenant_id, email, domain, reason, bounce_type, diagnostic_code, suppressed_at)
            VALUES ($1, $2, $3, $4, $5, $6, now())
            ON CONFLICT (tenant_id, email) DO UPDATE SET
                reason = excluded.reason, bounce_type = excluded.bounce_type,
                diagnostic_code = excluded.diagnostic_code, suppressed_at = now()
            RETURNING id as "id: _", tenant_id as "tenant_id: _", email, domain,
                      reason as "reason: _", bounce_type, diagnostic_code, suppressed_at, expires_at
            "#,
            tenant_id.0,
            email,
            domain,
            reason as SuppressionReason,
            bounce_type,
            diagnostic_code,
        )
        .fetch_one(&self.pool)
        .await
        .map_err(Error::from)
    }

    pub async fn sweep_expired(&self) -> Result<u64, Error> {
        let result = sqlx::query!("DELETE FROM suppressions WHERE expires_at < now()")
            .execute(&self.pool)
            .await
            .map_err(Error::from)?;
        Ok(result.rows_affected())
    }
}
