use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;

use super::{Error, OutboxId, RecipientId, TenantId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, sqlx::Type, Serialize, Deserialize)]
#[sqlx(type_name = "outbox_status", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum OutboxStatus {
    Pending,
    Processing,
    Sent,
    Failed,
    Retrying,
}

/// Sole owner of the authoritative HTML body (§9 Design Notes): downstream
/// code only ever receives bytes through [`OutboxRepository::get_html`].
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct OutboxEntry {
    pub id: OutboxId,
    pub tenant_id: TenantId,
    pub recipient_id: Option<RecipientId>,
    pub to_address: String,
    pub subject: String,
    pub html: String,
    pub status: OutboxStatus,
    pub attempts: i32,
    pub last_error: Option<String>,
    pub processed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

#[derive(Clone)]
pub struct OutboxRepository {
    pool: PgPool,
}

impl OutboxRepository {
    pub fn new(pool: PgPool) -> Self {
        OutboxRepository { pool }
    }

    pub async fn find(&self, id: OutboxId) -> Result<OutboxEntry, Error> {
        sqlx::query_as!(
            OutboxEntry,
            r#"
            SELECT id as "id: _", tenant_id as "tenant_id: _",
                   recipient_id as "recipient_id: _", to_address, subject, html,
                   status as "status: _", attempts, last_error, processed_at, created_at
            FROM outbox WHERE id = $1
            "#,
            id.0
        )
        .fetch_one(&self.pool)
        .await
        .map_err(Error::from)
    }

    /// Narrow capability: callers receive only the HTML bytes, never the
    /// whole row, matching the "narrow `OutboxStore.GetHTML`" design note.
    pub async fn get_html(&self, id: OutboxId) -> Result<String, Error> {
        let row = sqlx::query!("SELECT html FROM outbox WHERE id = $1", id.0)
            .fetch_one(&self.pool)
            .await
            .map_err(Error::from)?;
        Ok(row.html)
    }

    pub async fn increment_attempts(&self, id: OutboxId) -> Result<i32, Error> {
        let row = sqlx::query!(
            "UPDATE outbox SET attempts = attempts + 1 WHERE id = $1 RETURNING attempts",
            id.0
        )
        .fetch_one(&self.pool)
        .await
        .map_err(Error::from)?;
        Ok(row.attempts)
    }

    pub async fn mark_sent(&self, id: OutboxId) -> Result<(), Error> {
        sqlx::query!(
            "UPDATE outbox SET status = 'sent', processed_at = now() WHERE id = $1",
            id.0
        )
        .execute(&self.pool)
        .await
        .map_err(Error::from)?;
        Ok(())
    }

    pub async fn mark_failed(&self, id: OutboxId, last_error: &str) -> Result<(), Error> {
        sqlx::query!(
            "UPDATE outbox SET status = 'failed', last_error = $2, processed_at = now() WHERE id = $1",
            id.0,
            last_error
        )
        .execute(&self.pool)
        .await
        .map_err(Error::from)?;
        Ok(())
    }

    pub async fn mark_retrying(&self, id: OutboxId, last_error: &str) -> Result<(), Error> {
        sqlx::query!(
            "UPDATE outbox SET status = 'retrying', last_error = $2 WHERE id = $1",
            id.0,
            last_error
        )
        .execute(&self.pool)
        .await
        .map_err(Error::from)?;
        Ok(())
    }

    pub async fn mark_processing(&self, id: OutboxId) -> Result<(), Error> {
        sqlx::query!("UPDATE outbox SET status = 'processing' WHERE id = $1", id.0)
            .execute(&self.pool)
            .await
            .map_err(Error::from)?;
        Ok(())
    }
}
