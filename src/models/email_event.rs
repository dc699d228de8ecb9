use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;

use super::{EmailEventId, EmailLogId, Error};

#[derive(Debug, Clone, Copy, PartialEq, Eq, sqlx::Type, Serialize, Deserialize)]
#[sqlx(type_name = "email_event_type", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum EmailEventType {
    Processing,
    Sent,
    Failed,
    Retrying,
    Delivered,
    Bounced,
    Complained,
    Opened,
    Clicked,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct EmailEvent {
    pub id: EmailEventId,
    pub email_log_id: EmailLogId,
    pub event_type: EmailEventType,
    pub metadata: Option<sqlx::types::Json<serde_json::Value>>,
    pub created_at: DateTime<Utc>,
}

#[derive(Clone)]
pub struct EmailEventRepository {
    pool: PgPool,
}

impl EmailEventRepository {
    pub fn new(pool: PgPool) -> Self {
        EmailEventRepository { pool }
    }

    /// Append-only (§3 lifecycle) — no update/delete methods by design.
    pub async fn append(
        &self,
        email_log_id: EmailLogId,
        event_type: EmailEventType,
        metadata: Option<serde_json::Value>,
    ) -> Result<EmailEvent, Error> {
        sqlx::query_as!(
            EmailEvent,
            r#"
            INSERT INTO email_events (email_log_id, event_type, metadata)
            VALUES ($1, $2, $3)
            RETURNING id as "id: _", email_log_id as "email_log_id: _",
                      event_type as "event_type: _", metadata as "metadata: _", created_at
            "#,
            email_log_id.0,
            event_type as EmailEventType,
            metadata,
        )
        .fetch_one(&self.pool)
        .await
        .map_err(Error::from)
    }

    pub async fn last_for_log(&self, email_log_id: EmailLogId) -> Result<Option<EmailEvent>, Error> {
        sqlx::query_as!(
            EmailEvent,
            r#"
            SELECT id as "id: _", email_log_id as "email_log_id: _",
                   event_type as "event_type: _", metadata as "metadata: _", created_at
            FROM email_events WHERE email_log_id = $1
            ORDER BY created_at DESC LIMIT 1
            "#,
            email_log_id.0
        )
        .fetch_optional(&self.pool)
        .await
        .map_err(Error::from)
    }
}
