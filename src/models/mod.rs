//! Data model (§3): entities, repositories, and the shared repository error
//! type, following the teacher's `models::Error` shape.

mod dead_letter;
mod domain;
mod email_event;
mod email_log;
mod email_tracking;
mod ids;
mod ip_pool;
mod outbox;
mod recipient;
mod reputation_metric;
mod suppression;
mod tenant;
mod webhook;
mod webhook_delivery;

pub use dead_letter::*;
pub use domain::*;
pub use email_event::*;
pub use email_log::*;
pub use email_tracking::*;
pub use ids::*;
pub use ip_pool::*;
pub use outbox::*;
pub use recipient::*;
pub use reputation_metric::*;
pub use suppression::*;
pub use tenant::*;
pub use webhook::*;
pub use webhook_delivery::*;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("database error: {0}")]
    Database(sqlx::Error),
    #[error("a record with this key already exists")]
    Conflict,
    #[error("referenced record does not exist")]
    ForeignKeyViolation,
    #[error("record not found")]
    NotFound,
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl From<sqlx::Error> for Error {
    fn from(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::RowNotFound => Error::NotFound,
            sqlx::Error::Database(db_err) => {
                if db_err.is_unique_violation() {
                    Error::Conflict
                } else if db_err.is_foreign_key_violation() {
                    Error::ForeignKeyViolation
                } else {
                    Error::Database(err)
                }
            }
            _ => Error::Database(err),
        }
    }
}
