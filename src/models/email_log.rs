use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;

use super::{EmailLogId, Error, OutboxId, RecipientId, TenantId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, sqlx::Type, Serialize, Deserialize)]
#[sqlx(type_name = "email_log_status", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum EmailLogStatus {
    Sent,
    Failed,
    Retrying,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, sqlx::Type, Serialize, Deserialize)]
#[sqlx(type_name = "bounce_type", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum BounceType {
    Hard,
    Soft,
    Undetermined,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct EmailLog {
    pub id: EmailLogId,
    pub outbox_id: OutboxId,
    pub tenant_id: TenantId,
    pub recipient_id: Option<RecipientId>,
    pub to_address: String,
    pub subject: String,
    pub status: EmailLogStatus,
    pub provider_message_id: Option<String>,
    pub error_code: Option<String>,
    pub error_reason: Option<String>,
    pub attempts: i32,
    pub duration_ms: i32,
    pub sent_at: Option<DateTime<Utc>>,
    pub failed_at: Option<DateTime<Utc>>,
    pub delivery_timestamp: Option<DateTime<Utc>>,
    pub bounce_type: Option<BounceType>,
    pub bounce_subtype: Option<String>,
    pub complaint_feedback_type: Option<String>,
}

#[derive(Clone)]
pub struct EmailLogRepository {
    pool: PgPool,
}

impl EmailLogRepository {
    pub fn new(pool: PgPool) -> Self {
        EmailLogRepository { pool }
    }

    pub async fn find_by_outbox(&self, outbox_id: OutboxId) -> Result<Option<EmailLog>, Error> {
        sqlx::query_as!(
            EmailLog,
            r#"
            SELECT id as "id: _", outbox_id as "outbox_id: _", tenant_id as "tenant_id: _",
                   recipient_id as "recipient_id: _", to_address, subject, status as "status: _",
                   provider_message_id, error_code, error_reason, attempts, duration_ms,
                   sent_at, failed_at, delivery_timestamp, bounce_type as "bounce_type: _",
                   bounce_subtype, complaint_feedback_type
            FROM email_logs WHERE outbox_id = $1
            "#,
            outbox_id.0
        )
        .fetch_optional(&self.pool)
        .await
        .map_err(Error::from)
    }

    pub async fn find_by_provider_message_id(
        &self,
        provider_message_id: &str,
    ) -> Result<Option<EmailLog>, Error> {
        sqlx::query_as!(
            EmailLog,
            r#"
            SELECT id as "id: _", outbox_id as "outbox_id: _", tenant_id as "tenant_id: _",
                   recipient_id as "recipient_id: _", to_address, subject, status as "status: _",
                   provider_message_id, error_code, error_reason, attempts, duration_ms,
                   sent_at, failed_at, delivery_timestamp, bounce_type as "bounce_type: _",
                   bounce_subtype, complaint_feedback_type
            FROM email_logs WHERE provider_message_id = $1
            "#,
            provider_message_id
        )
        .fetch_optional(&self.pool)
        .await
        .map_err(Error::from)
    }

    /// Upsert keyed by `outbox_id` — one log per outbox (§3 lifecycle).
    #[allow(clippy::too_many_arguments)]
    pub async fn upsert_sent(
        &self,
        outbox_id: OutboxId,
        tenant_id: TenantId,
        recipient_id: Option<RecipientId>,
        to_address: &str,
        subject: &str,
        provider_message_id: &str,
        attempts: i32,
        duration_ms: i32,
    ) -> Result<EmailLog, Error> {
        sqlx::query_as!(
            EmailLog,
            r#"
            INSERT INTO email_logs
                (outbox_id, tenant_id, recipient_id, to_address, subject, status,
                 provider_message_id, attempts, duration_ms, sent_at)
            VALUES ($1, $2, $3, $4, $5, 'sent', $6, $7, $8, now())
            ON CONFLICT (outbox_id) DO UPDATE SET
                status = 'sent', provider_message_id = excluded.provider_message_id,
                attempts = excluded.attempts, duration_ms = excluded.duration_ms,
                sent_at = now(), failed_at = NULL
            RETURNING id as "id: _", outbox_id as "outbox_id: _", tenant_id as "tenant_id: _",
                      recipient_id as "recipient_id: _", to_address, subject, status as "status: _",
                      provider_message_id, error_code, error_reason, attempts, duration_ms,
                      sent_at, failed_at, delivery_timestamp, bounce_type as "bounce_type: _",
                      bounce_subtype, complaint_feedback_type
            "#,
            outbox_id.0,
            tenant_id.0,
            recipient_id.map(|r| r.0),
            to_address,
            subject,
            provider_message_id,
            attempts,
            duration_ms,
        )
        .fetch_one(&self.pool)
        .await
        .map_err(Error::from)
    }

    #[allow(clippy::too_many_arguments)]
    pub async fn upsert_failed(
        &self,
        outbox_id: OutboxId,
        tenant_id: TenantId,
        recipient_id: Option<RecipientId>,
        to_address: &str,
        subject: &str,
        error_code: &str,
        error_reason: &str,
        attempts: i32,
    ) -> Result<EmailLog, Error> {
        sqlx::query_as!(
            EmailLog,
            r#"
            INSERT INTO email_logs
                (outbox_id, tenant_id, recipient_id, to_address, subject, status,
                 error_code, error_reason, attempts, failed_at)
            VALUES ($1, $2, $3, $4, $5, 'failed', $6, $7, $8, now())
            ON CONFLICT (outbox_id) DO UPDATE SET
                status = 'failed', error_code = excluded.error_code,
                error_reason = excluded.error_reason, attempts = excluded.attempts,
                failed_at = now()
            RETURNING id as "id: _", outbox_id as "outbox_id: _", tenant_id as "tenant_id: _",
                      recipient_id as "recipient_id: _", to_address, subject, status as "status: _",
                      provider_message_id, error_code, error_reason, attempts, duration_ms,
                      sent_at, failed_at, delivery_timestamp, bounce_type as "bounce_type: _",
                      bounce_subtype, complaint_feedback_type
            "#,
            outbox_id.0,
            tenant_id.0,
            recipient_id.map(|r| r.0),
            to_address,
            subject,
            error_code,
            error_reason,
            attempts,
        )
        .fetch_one(&self.pool)
        .await
        .map_err(Error::from)
    }

    #[allow(clippy::too_many_arguments)]
    pub async fn upsert_retrying(
        &self,
        outbox_id: OutboxId,
        tenant_id: TenantId,
        recipient_id: Option<RecipientId>,
        to_address: &str,
        subject: &str,
        error_code: &str,
        error_reason: &str,
        attempts: i32,
    ) -> Result<EmailLog, Error> {
        sqlx::query_as!(
            EmailLog,
            r#"
            INSERT INTO email_logs
                (outbox_id, tenant_id, recipient_id, to_address, subject, status,
                 error_code, error_reason, attempts)
            VALUES ($1, $2, $3, $4, $5, 'retrying', $6, $7, $8)
            ON CONFLICT (outbox_id) DO UPDATE SET
                status = 'retrying', error_code = excluded.error_code,
                error_reason = excluded.error_reason, attempts = excluded.attempts
            RETURNING id as "id: _", outbox_id as "outbox_id: _", tenant_id as "tenant_id: _",
                      recipient_id as "recipient_id: _", to_address, subject, status as "status: _",
                      provider_message_id, error_code, error_reason, attempts, duration_ms,
                      sent_at, failed_at, delivery_timestamp, bounce_type as "bounce_type: _",
                      bounce_subtype, complaint_feedback_type
            "#,
            outbox_id.0,
            tenant_id.0,
            recipient_id.map(|r| r.0),
            to_address,
            subject,
            error_code,
            error_reason,
            attempts,
        )
        .fetch_one(&self.pool)
        .await
        .map_err(Error::from)
    }

    pub async fn set_delivered(&self, id: EmailLogId) -> Result<(), Error> {
        sqlx::query!(
            "UPDATE email_logs SET delivery_timestamp = now() WHERE id = $1",
            id.0
        )
        .execute(&self.pool)
        .await
        .map_err(Error::from)?;
        Ok(())
    }

    pub async fn set_bounce(
        &self,
        id: EmailLogId,
        bounce_type: BounceType,
        bounce_subtype: Option<&str>,
        error_code: &str,
        error_reason: &str,
    ) -> Result<(), Error> {
        sqlx::query!(
            r#"
            UPDATE email_logs
            SET bounce_type = $2, bounce_subtype = $3, error_code = $4, error_reason = $5
            WHERE id = $1
            "#,
            id.0,
            bounce_type as BounceType,
            bounce_subtype,
            error_code,
            error_reason,
        )
        .execute(&self.pool)
        .await
        .map_err(Error::from)?;
        Ok(())
    }

    pub async fn set_complaint(
        &self,
        id: EmailLogId,
        complaint_feedback_type: &str,
    ) -> Result<(), Error> {
        sqlx::query!(
            r#"
            UPDATE email_logs
            SET complaint_feedback_type = $2, error_code = 'complaint'
            WHERE id = $1
            "#,
            id.0,
            complaint_feedback_type,
        )
        .execute(&self.pool)
        .await
        .map_err(Error::from)?;
        Ok(())
    }

    /// Rolling 24h counts/rates for the reputation monitor (§4.K.1).
    pub async fn daily_metrics(&self, tenant_id: TenantId) -> Result<DailyMetrics, Error> {
        let row = sqlx::query!(
            r#"
            SELECT
                count(*) FILTER (WHERE l.status = 'sent') as "sent!",
                count(*) FILTER (WHERE l.delivery_timestamp IS NOT NULL) as "delivered!",
                count(*) FILTER (WHERE l.bounce_type IS NOT NULL) as "bounced!",
                count(*) FILTER (WHERE l.bounce_type = 'hard') as "bounced_hard!",
                count(*) FILTER (WHERE l.bounce_type = 'soft') as "bounced_soft!",
                count(*) FILTER (WHERE l.complaint_feedback_type IS NOT NULL) as "complained!",
                count(DISTINCT l.id) FILTER (
                    WHERE EXISTS (
                        SELECT 1 FROM email_events e
                        WHERE e.email_log_id = l.id AND e.event_type = 'opened'
                    )
                ) as "opened!",
                count(DISTINCT l.id) FILTER (
                    WHERE EXISTS (
                        SELECT 1 FROM email_events e
                        WHERE e.email_log_id = l.id AND e.event_type = 'clicked'
                    )
                ) as "clicked!"
            FROM email_logs l
            WHERE l.tenant_id = $1 AND l.sent_at >= now() - interval '24 hours'
            "#,
            tenant_id.0
        )
        .fetch_one(&self.pool)
        .await
        .map_err(Error::from)?;

        Ok(DailyMetrics {
            sent: row.sent,
            delivered: row.delivered,
            bounced: row.bounced,
            bounced_hard: row.bounced_hard,
            bounced_soft: row.bounced_soft,
            complained: row.complained,
            opened: row.opened,
            clicked: row.clicked,
        })
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct DailyMetrics {
    pub sent: i64,
    pub delivered: i64,
    pub bounced: i64,
    pub bounced_hard: i64,
    pub bounced_soft: i64,
    pub complained: i64,
    pub opened: i64,
    pub clicked: i64,
}

impl DailyMetrics {
    fn rate(numerator: i64, denominator: i64) -> f64 {
        if denominator == 0 {
            0.0
        } else {
            numerator as f64 / denominator as f64
        }
    }

    pub fn bounce_rate(&self) -> f64 {
        Self::rate(self.bounced, self.sent)
    }

    pub fn complaint_rate(&self) -> f64 {
        Self::rate(self.complained, self.sent)
    }

    pub fn open_rate(&self) -> f64 {
        Self::rate(self.opened, self.sent)
    }

    pub fn click_rate(&self) -> f64 {
        Self::rate(self.clicked, self.sent)
    }

    pub fn engagement_rate(&self) -> f64 {
        (self.open_rate() + self.click_rate()) / 2.0
    }
}
