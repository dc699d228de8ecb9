use chrono::{DateTime, Utc};
use sqlx::PgPool;

use super::{Error, RecipientId, TenantId};

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct Recipient {
    pub id: RecipientId,
    pub tenant_id: TenantId,
    pub email: String,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl Recipient {
    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }
}

#[derive(Clone)]
pub struct RecipientRepository {
    pool: PgPool,
}

impl RecipientRepository {
    pub fn new(pool: PgPool) -> Self {
        RecipientRepository { pool }
    }

    pub async fn find(&self, id: RecipientId) -> Result<Recipient, Error> {
        sqlx::query_as!(
            Recipient,
            r#"SELECT id as "id: _", tenant_id as "tenant_id: _", email, deleted_at
               FROM recipients WHERE id = $1"#,
            id.0
        )
        .fetch_one(&self.pool)
        .await
        .map_err(Error::from)
    }
}
