use chrono::{DateTime, Utc};
use sqlx::PgPool;

use super::{DeadLetterId, Error, OutboxId, TenantId};

#[derive(Debug, Clone, sqlx::FromRow, serde::Serialize)]
pub struct DeadLetterEntry {
    pub job_id: DeadLetterId,
    pub tenant_id: TenantId,
    pub outbox_id: OutboxId,
    pub data: sqlx::types::Json<serde_json::Value>,
    pub failed_reason: String,
    pub attempts_made: i32,
    pub enqueued_at: DateTime<Utc>,
    pub failed_at: DateTime<Utc>,
    pub stacktrace: Option<String>,
}

pub struct DlqStats {
    pub total: i64,
    pub old: i64,
    pub recent: i64,
    pub oldest_age_hours: Option<f64>,
    pub common_errors: Vec<(String, i64)>,
}

#[derive(Clone)]
pub struct DeadLetterRepository {
    pool: PgPool,
}

impl DeadLetterRepository {
    pub fn new(pool: PgPool) -> Self {
        DeadLetterRepository { pool }
    }

    #[allow(clippy::too_many_arguments)]
    pub async fn insert(
        &self,
        tenant_id: TenantId,
        outbox_id: OutboxId,
        data: serde_json::Value,
        failed_reason: &str,
        attempts_made: i32,
        enqueued_at: DateTime<Utc>,
    ) -> Result<DeadLetterEntry, Error> {
        sqlx::query_as!(
            DeadLetterEntry,
            r#"
            INSERT INTO dead_letters
                (tenant_id, outbox_id, data, failed_reason, attempts_made, enqueued_at, failed_at)
            VALUES ($1, $2, $3, $4, $5, $6, now())
            RETURNING job_id as "job_id: _", tenant_id as "tenant_id: _",
                      outbox_id as "outbox_id: _", data as "data: _", failed_reason,
                      attempts_made, enqueued_at, failed_at, stacktrace
            "#,
            tenant_id.0,
            outbox_id.0,
            data,
            failed_reason,
            attempts_made,
            enqueued_at,
        )
        .fetch_one(&self.pool)
        .await
        .map_err(Error::from)
    }

    pub async fn list(&self, limit: i64, offset: i64) -> Result<Vec<DeadLetterEntry>, Error> {
        sqlx::query_as!(
            DeadLetterEntry,
            r#"
            SELECT job_id as "job_id: _", tenant_id as "tenant_id: _",
                   outbox_id as "outbox_id: _", data as "data: _", failed_reason,
                   attempts_made, enqueued_at, failed_at, stacktrace
            FROM dead_letters ORDER BY failed_at DESC LIMIT $1 OFFSET $2
            "#,
            limit,
            offset
        )
        .fetch_all(&self.pool)
        .await
        .map_err(Error::from)
    }

    pub async fn find(&self, job_id: DeadLetterId) -> Result<Option<DeadLetterEntry>, Error> {
        sqlx::query_as!(
            DeadLetterEntry,
            r#"
            SELECT job_id as "job_id: _", tenant_id as "tenant_id: _",
                   outbox_id as "outbox_id: _", data as "data: _", failed_reason,
                   attempts_made, enqueued_at, failed_at, stacktrace
            FROM dead_letters WHERE job_id = $1
            "#,
            job_id.0
        )
        .fetch_optional(&self.pool)
        .await
        .map_err(Error::from)
    }

    pub async fn remove(&self, job_id: DeadLetterId) -> Result<(), Error> {
        sqlx::query!("DELETE FROM dead_letters WHERE job_id = $1", job_id.0)
            .execute(&self.pool)
            .await
            .map_err(Error::from)?;
        Ok(())
    }

    pub async fn clean_older_than_days(&self, days: i32) -> Result<u64, Error> {
        let result = sqlx::query!(
            "DELETE FROM dead_letters WHERE failed_at < now() - make_interval(days => $1)",
            days
        )
        .execute(&self.pool)
        .await
        .map_err(Error::from)?;
        Ok(result.rows_affected())
    }

    pub async fn stats(&self) -> Result<DlqStats, Error> {
        let totals = sqlx::query!(
            r#"
            SELECT
                count(*) as "total!",
                count(*) FILTER (WHERE failed_at < now() - interval '24 hours') as "old!",
                count(*) FILTER (WHERE failed_at > now() - interval '1 hour') as "recent!",
                extract(epoch from (now() - min(failed_at))) / 3600.0 as oldest_age_hours
            FROM dead_letters
            "#
        )
        .fetch_one(&self.pool)
        .await
        .map_err(Error::from)?;

        let common_errors = sqlx::query!(
            r#"
            SELECT failed_reason, count(*) as "count!"
            FROM dead_letters GROUP BY failed_reason ORDER BY count(*) DESC LIMIT 10
            "#
        )
        .fetch_all(&self.pool)
        .await
        .map_err(Error::from)?
        .into_iter()
        .map(|r| (r.failed_reason, r.count))
        .collect();

        Ok(DlqStats {
            total: totals.total,
            old: totals.old,
            recent: totals.recent,
            oldest_age_hours: totals.oldest_age_hours,
            common_errors,
        })
    }
}

impl DlqStats {
    /// Health verdict (§4.N): critical if old jobs exist or a recent spike;
    /// warning if the total backlog is large; else healthy.
    pub fn verdict(&self) -> &'static str {
        if self.old > 0 || self.recent > 50 {
            "critical"
        } else if self.total > 100 {
            "warning"
        } else {
            "healthy"
        }
    }
}
