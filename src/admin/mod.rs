//! Admin DLQ facade (component N): the only HTTP surface this core owns
//! directly — everything else (tenant/domain CRUD, auth, dashboard) is an
//! external collaborator (§1 Non-goals).
//!
//! Router/state shape grounded on the teacher's `ApiServer` (axum `Router`
//! plus `FromRef`-shared state, `ApiError` as a uniform `IntoResponse`).

pub mod dlq;
pub mod error;

use axum::Router;

use crate::models::DeadLetterRepository;
use crate::queue::{Queue, SendJob};

#[derive(Clone)]
pub struct AdminState<Q: Queue<SendJob> + 'static> {
    pub dead_letter: DeadLetterRepository,
    pub send_queue: std::sync::Arc<Q>,
}

pub fn router<Q: Queue<SendJob> + 'static>(state: AdminState<Q>) -> Router {
    Router::new()
        .merge(dlq::router())
        .with_state(state)
}
