//! Send pipeline worker (component H): consumes `SendJob`s, runs
//! validation, suppression, rate-limiting and pool selection, calls the
//! provider driver set, and persists the resulting state.
//!
//! Grounded on the teacher's `handler::Handler`: a `Semaphore`-bounded
//! worker driven by a `tokio::select!` loop over a `CancellationToken`, one
//! `tokio::spawn`ed task per in-flight job.

pub mod feedback;
pub mod send;
pub mod webhook;

use thiserror::Error;

use crate::errors::MappedError;

#[derive(Debug, Error)]
pub enum HandlerError {
    #[error("database error: {0}")]
    Repository(#[from] crate::models::Error),
    #[error("provider error: {0}")]
    Driver(#[from] crate::provider::DriverError),
}

/// The terminal shape a single job run settles into, used by tests to
/// assert on worker behaviour without inspecting the database.
#[derive(Debug, Clone, PartialEq)]
pub enum SendOutcome {
    Sent { provider_message_id: String },
    ValidationFailed { error: String },
    Suppressed,
    PermanentlyFailed { error: String },
    Retrying { error: String, attempt: i32 },
    DeadLettered { error: String, attempts: i32 },
}

impl SendOutcome {
    pub fn is_terminal_success(&self) -> bool {
        matches!(self, SendOutcome::Sent { .. })
    }

    pub fn is_terminal_failure(&self) -> bool {
        matches!(
            self,
            SendOutcome::ValidationFailed { .. }
                | SendOutcome::Suppressed
                | SendOutcome::PermanentlyFailed { .. }
                | SendOutcome::DeadLettered { .. }
        )
    }
}

pub(crate) fn error_snapshot(err: &MappedError) -> String {
    err.snapshot()
}
