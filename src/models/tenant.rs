use chrono::{DateTime, Utc};
use sqlx::PgPool;

use super::{DomainId, Error, TenantId};

#[derive(Debug, Clone, sqlx::FromRow, serde::Serialize)]
pub struct Tenant {
    pub id: TenantId,
    pub is_active: bool,
    pub is_approved: bool,
    pub is_suspended: bool,
    pub suspension_reason: Option<String>,
    pub daily_email_limit: i32,
    pub default_from_address: Option<String>,
    pub default_from_name: Option<String>,
    pub default_domain_id: Option<DomainId>,
    pub bounce_rate: f64,
    pub complaint_rate: f64,
    pub created_at: DateTime<Utc>,
    pub approved_at: Option<DateTime<Utc>>,
    pub approved_by: Option<String>,
}

impl Tenant {
    /// `is_active ∧ is_approved ∧ ¬is_suspended` (§3 invariant).
    pub fn is_eligible_to_send(&self) -> bool {
        self.is_active && self.is_approved && !self.is_suspended
    }
}

#[derive(Clone)]
pub struct TenantRepository {
    pool: PgPool,
}

impl TenantRepository {
    pub fn new(pool: PgPool) -> Self {
        TenantRepository { pool }
    }

    pub async fn find(&self, id: TenantId) -> Result<Tenant, Error> {
        sqlx::query_as!(
            Tenant,
            r#"
            SELECT id as "id: _", is_active, is_approved, is_suspended, suspension_reason,
                   daily_email_limit, default_from_address, default_from_name,
                   default_domain_id as "default_domain_id: _", bounce_rate, complaint_rate,
                   created_at, approved_at, approved_by
            FROM tenants WHERE id = $1
            "#,
            id.0
        )
        .fetch_one(&self.pool)
        .await
        .map_err(Error::from)
    }

    pub async fn find_active(&self) -> Result<Vec<Tenant>, Error> {
        sqlx::query_as!(
            Tenant,
            r#"
            SELECT id as "id: _", is_active, is_approved, is_suspended, suspension_reason,
                   daily_email_limit, default_from_address, default_from_name,
                   default_domain_id as "default_domain_id: _", bounce_rate, complaint_rate,
                   created_at, approved_at, approved_by
            FROM tenants WHERE is_active
            "#
        )
        .fetch_all(&self.pool)
        .await
        .map_err(Error::from)
    }

    /// Sandbox-monitor candidates (§4.L): unapproved, active, not suspended,
    /// at least 7 days old, bounce_rate < 2%, complaint_rate < 0.05%.
    pub async fn find_sandbox_candidates(&self) -> Result<Vec<Tenant>, Error> {
        sqlx::query_as!(
            Tenant,
            r#"
            SELECT id as "id: _", is_active, is_approved, is_suspended, suspension_reason,
                   daily_email_limit, default_from_address, default_from_name,
                   default_domain_id as "default_domain_id: _", bounce_rate, complaint_rate,
                   created_at, approved_at, approved_by
            FROM tenants
            WHERE NOT is_approved AND is_active AND NOT is_suspended
              AND created_at <= now() - interval '7 days'
              AND bounce_rate < 0.02
              AND complaint_rate < 0.0005
            "#
        )
        .fetch_all(&self.pool)
        .await
        .map_err(Error::from)
    }

    pub async fn suspend(&self, id: TenantId, reason: &str) -> Result<(), Error> {
        sqlx::query!(
            "UPDATE tenants SET is_suspended = true, suspension_reason = $2 WHERE id = $1",
            id.0,
            reason
        )
        .execute(&self.pool)
        .await
        .map_err(Error::from)?;
        Ok(())
    }

    pub async fn update_rates(
        &self,
        id: TenantId,
        bounce_rate: f64,
        complaint_rate: f64,
    ) -> Result<(), Error> {
        sqlx::query!(
            "UPDATE tenants SET bounce_rate = $2, complaint_rate = $3 WHERE id = $1",
            id.0,
            bounce_rate,
            complaint_rate
        )
        .execute(&self.pool)
        .await
        .map_err(Error::from)?;
        Ok(())
    }

    pub async fn auto_approve(&self, id: TenantId) -> Result<(), Error> {
        sqlx::query!(
            r#"
            UPDATE tenants
            SET is_approved = true, approved_at = now(), approved_by = 'auto_approval_system',
                daily_email_limit = 5000
            WHERE id = $1
            "#,
            id.0
        )
        .execute(&self.pool)
        .await
        .map_err(Error::from)?;
        Ok(())
    }

    /// Count SENT emails for a tenant, used by the sandbox monitor's
    /// volume threshold.
    pub async fn count_sent(&self, id: TenantId) -> Result<i64, Error> {
        let row = sqlx::query!(
            r#"SELECT count(*) as "count!" FROM email_logs WHERE tenant_id = $1 AND status = 'sent'"#,
            id.0
        )
        .fetch_one(&self.pool)
        .await
        .map_err(Error::from)?;
        Ok(row.count)
    }
}
