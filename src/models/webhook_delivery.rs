use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;

use super::{Error, WebhookDeliveryId, WebhookId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, sqlx::Type, Serialize, Deserialize)]
#[sqlx(type_name = "webhook_delivery_status", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum WebhookDeliveryStatus {
    Pending,
    Success,
    Retrying,
    Failed,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct WebhookDelivery {
    pub id: WebhookDeliveryId,
    pub webhook_id: WebhookId,
    pub event_type: String,
    pub payload: sqlx::types::Json<serde_json::Value>,
    pub status: WebhookDeliveryStatus,
    pub response_code: Option<i32>,
    pub response_body: Option<String>,
    pub attempts: i32,
    pub next_retry_at: Option<DateTime<Utc>>,
    pub delivered_at: Option<DateTime<Utc>>,
}

#[derive(Clone)]
pub struct WebhookDeliveryRepository {
    pool: PgPool,
}

impl WebhookDeliveryRepository {
    pub fn new(pool: PgPool) -> Self {
        WebhookDeliveryRepository { pool }
    }

    pub async fn create_pending(
        &self,
        webhook_id: WebhookId,
        event_type: &str,
        payload: serde_json::Value,
    ) -> Result<WebhookDelivery, Error> {
        sqlx::query_as!(
            WebhookDelivery,
            r#"
            INSERT INTO webhook_deliveries (webhook_id, event_type, payload, status, attempts)
            VALUES ($1, $2, $3, 'pending', 0)
            RETURNING id as "id: _", webhook_id as "webhook_id: _", event_type,
                      payload as "payload: _", status as "status: _", response_code,
                      response_body, attempts, next_retry_at, delivered_at
            "#,
            webhook_id.0,
            event_type,
            payload,
        )
        .fetch_one(&self.pool)
        .await
        .map_err(Error::from)
    }

    /// Claim deliveries due for (re)attempt, locking against other workers
    /// (grounded on the `FOR UPDATE SKIP LOCKED` claim pattern).
    pub async fn claim_due(&self, limit: i64) -> Result<Vec<WebhookDelivery>, Error> {
        sqlx::query_as!(
            WebhookDelivery,
            r#"
            SELECT id as "id: _", webhook_id as "webhook_id: _", event_type,
                   payload as "payload: _", status as "status: _", response_code,
                   response_body, attempts, next_retry_at, delivered_at
            FROM webhook_deliveries
            WHERE status IN ('pending', 'retrying')
              AND (next_retry_at IS NULL OR next_retry_at <= now())
            ORDER BY id
            LIMIT $1
            FOR UPDATE SKIP LOCKED
            "#,
            limit
        )
        .fetch_all(&self.pool)
        .await
        .map_err(Error::from)
    }

    pub async fn mark_success(
        &self,
        id: WebhookDeliveryId,
        response_code: i32,
        response_body: &str,
    ) -> Result<(), Error> {
        let truncated: String = response_body.chars().take(1000).collect();
        sqlx::query!(
            r#"
            UPDATE webhook_deliveries
            SET status = 'success', response_code = $2, response_body = $3,
                delivered_at = now(), attempts = attempts + 1
            WHERE id = $1
            "#,
            id.0,
            response_code,
            truncated,
        )
        .execute(&self.pool)
        .await
        .map_err(Error::from)?;
        Ok(())
    }

    pub async fn mark_retrying(
        &self,
        id: WebhookDeliveryId,
        response_code: Option<i32>,
        next_retry_at: DateTime<Utc>,
    ) -> Result<(), Error> {
        sqlx::query!(
            r#"
            UPDATE webhook_deliveries
            SET status = 'retrying', response_code = $2, next_retry_at = $3,
                attempts = attempts + 1
            WHERE id = $1
            "#,
            id.0,
            response_code,
            next_retry_at,
        )
        .execute(&self.pool)
        .await
        .map_err(Error::from)?;
        Ok(())
    }

    pub async fn mark_failed(
        &self,
        id: WebhookDeliveryId,
        response_code: Option<i32>,
        response_body: Option<&str>,
    ) -> Result<(), Error> {
        let truncated = response_body.map(|b| b.chars().take(1000).collect::<String>());
        sqlx::query!(
            r#"
            UPDATE webhook_deliveries
            SET status = 'failed', response_code = $2, response_body = $3,
                attempts = attempts + 1
            WHERE id = $1
            "#,
            id.0,
            response_code,
            truncated,
        )
        .execute(&self.pool)
        .await
        .map_err(Error::from)?;
        Ok(())
    }
}
