use sqlx::PgPool;

use super::{Error, TenantId, WebhookId};

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct Webhook {
    pub id: WebhookId,
    pub tenant_id: TenantId,
    pub url: String,
    pub secret: String,
    pub events: Vec<String>,
    pub is_active: bool,
}

#[derive(Clone)]
pub struct WebhookRepository {
    pool: PgPool,
}

impl WebhookRepository {
    pub fn new(pool: PgPool) -> Self {
        WebhookRepository { pool }
    }

    pub async fn find(&self, id: WebhookId) -> Result<Option<Webhook>, Error> {
        sqlx::query_as!(
            Webhook,
            r#"SELECT id as "id: _", tenant_id as "tenant_id: _", url, secret, events, is_active
               FROM webhooks WHERE id = $1"#,
            id.0
        )
        .fetch_optional(&self.pool)
        .await
        .map_err(Error::from)
    }

    /// Active webhooks of a tenant subscribed to `event_type` (§4.I fan-out).
    pub async fn find_active_for_event(
        &self,
        tenant_id: TenantId,
        event_type: &str,
    ) -> Result<Vec<Webhook>, Error> {
        sqlx::query_as!(
            Webhook,
            r#"
            SELECT id as "id: _", tenant_id as "tenant_id: _", url, secret, events, is_active
            FROM webhooks
            WHERE tenant_id = $1 AND is_active AND $2 = ANY(events)
            "#,
            tenant_id.0,
            event_type
        )
        .fetch_all(&self.pool)
        .await
        .map_err(Error::from)
    }
}
