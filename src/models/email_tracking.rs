use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;

use super::{EmailLogId, Error};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClickedUrl {
    pub url: String,
    pub ts: DateTime<Utc>,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct EmailTracking {
    pub email_log_id: EmailLogId,
    pub tracking_id: uuid::Uuid,
    pub opened_at: Option<DateTime<Utc>>,
    pub open_count: i32,
    pub clicked_at: Option<DateTime<Utc>>,
    pub click_count: i32,
    pub clicked_urls: sqlx::types::Json<Vec<ClickedUrl>>,
    pub user_agent: Option<String>,
    pub ip_address: Option<String>,
}

#[derive(Clone)]
pub struct EmailTrackingRepository {
    pool: PgPool,
}

impl EmailTrackingRepository {
    pub fn new(pool: PgPool) -> Self {
        EmailTrackingRepository { pool }
    }

    /// Upsert by `tracking_id` (§3); `email_log_id` seeds the row on first
    /// insert and is left untouched on conflict.
    pub async fn record_open(
        &self,
        email_log_id: EmailLogId,
        tracking_id: uuid::Uuid,
        user_agent: Option<&str>,
        ip_address: Option<&str>,
    ) -> Result<EmailTracking, Error> {
        sqlx::query_as!(
            EmailTracking,
            r#"
            INSERT INTO email_tracking (email_log_id, tracking_id, opened_at, open_count, user_agent, ip_address, clicked_urls)
            VALUES ($1, $2, now(), 1, $3, $4, '[]')
            ON CONFLICT (tracking_id) DO UPDATE SET
                opened_at = COALESCE(email_tracking.opened_at, now()),
                open_count = email_tracking.open_count + 1,
                user_agent = COALESCE(excluded.user_agent, email_tracking.user_agent),
                ip_address = COALESCE(excluded.ip_address, email_tracking.ip_address)
            RETURNING email_log_id as "email_log_id: _", tracking_id, opened_at, open_count,
                      clicked_at, click_count, clicked_urls as "clicked_urls: _", user_agent, ip_address
            "#,
            email_log_id.0,
            tracking_id,
            user_agent,
            ip_address,
        )
        .fetch_one(&self.pool)
        .await
        .map_err(Error::from)
    }

    pub async fn record_click(
        &self,
        email_log_id: EmailLogId,
        tracking_id: uuid::Uuid,
        url: &str,
    ) -> Result<EmailTracking, Error> {
        let entry = serde_json::json!([{ "url": url, "ts": Utc::now() }]);
        sqlx::query_as!(
            EmailTracking,
            r#"
            INSERT INTO email_tracking (email_log_id, tracking_id, clicked_at, click_count, clicked_urls)
            VALUES ($1, $2, now(), 1, $3)
            ON CONFLICT (tracking_id) DO UPDATE SET
                clicked_at = now(),
                click_count = email_tracking.click_count + 1,
                clicked_urls = email_tracking.clicked_urls || $3
            RETURNING email_log_id as "email_log_id: _", tracking_id, opened_at, open_count,
                      clicked_at, click_count, clicked_urls as "clicked_urls: _", user_agent, ip_address
            "#,
            email_log_id.0,
            tracking_id,
            entry,
        )
        .fetch_one(&self.pool)
        .await
        .map_err(Error::from)
    }
}
