use chrono::NaiveDate;
use sqlx::PgPool;

use super::{Error, TenantId};

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ReputationMetric {
    pub tenant_id: TenantId,
    pub date: NaiveDate,
    pub sent: i64,
    pub delivered: i64,
    pub bounced: i64,
    pub bounced_hard: i64,
    pub bounced_soft: i64,
    pub complained: i64,
    pub opened: i64,
    pub clicked: i64,
    pub bounce_rate: f64,
    pub complaint_rate: f64,
    pub open_rate: f64,
    pub click_rate: f64,
    pub reputation_score: f64,
}

#[derive(Clone)]
pub struct ReputationMetricRepository {
    pool: PgPool,
}

impl ReputationMetricRepository {
    pub fn new(pool: PgPool) -> Self {
        ReputationMetricRepository { pool }
    }

    #[allow(clippy::too_many_arguments)]
    pub async fn upsert_today(&self, metric: &ReputationMetric) -> Result<(), Error> {
        sqlx::query!(
            r#"
            INSERT INTO reputation_metrics
                (tenant_id, date, sent, delivered, bounced, bounced_hard, bounced_soft,
                 complained, opened, clicked, bounce_rate, complaint_rate, open_rate,
                 click_rate, reputation_score)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15)
            ON CONFLICT (tenant_id, date) DO UPDATE SET
                sent = excluded.sent, delivered = excluded.delivered, bounced = excluded.bounced,
                bounced_hard = excluded.bounced_hard, bounced_soft = excluded.bounced_soft,
                complained = excluded.complained, opened = excluded.opened, clicked = excluded.clicked,
                bounce_rate = excluded.bounce_rate, complaint_rate = excluded.complaint_rate,
                open_rate = excluded.open_rate, click_rate = excluded.click_rate,
                reputation_score = excluded.reputation_score
            "#,
            metric.tenant_id.0,
            metric.date,
            metric.sent,
            metric.delivered,
            metric.bounced,
            metric.bounced_hard,
            metric.bounced_soft,
            metric.complained,
            metric.opened,
            metric.clicked,
            metric.bounce_rate,
            metric.complaint_rate,
            metric.open_rate,
            metric.click_rate,
            metric.reputation_score,
        )
        .execute(&self.pool)
        .await
        .map_err(Error::from)?;
        Ok(())
    }
}
