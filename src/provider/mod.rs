//! Provider driver abstraction (component D): a uniform send/validate/quota
//! interface with an SES-shaped API driver and an SMTP driver, each wrapped
//! by a circuit breaker, composed into an ordered fallback list.

pub mod api_driver;
pub mod circuit_breaker;
pub mod smtp_driver;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;

use crate::errors::MappedError;
use crate::models::IpPool;
use crate::queue::SendJob;

pub use circuit_breaker::CircuitBreaker;

pub const DRIVER_CALL_TIMEOUT: Duration = Duration::from_secs(35);

#[derive(Debug, thiserror::Error)]
pub enum DriverError {
    #[error(transparent)]
    Mapped(#[from] MappedError),
    #[error("driver call timed out")]
    Timeout,
}

impl DriverError {
    pub fn retryable(&self) -> bool {
        match self {
            DriverError::Mapped(e) => e.retryable,
            DriverError::Timeout => true,
        }
    }

    pub fn into_mapped(self) -> MappedError {
        match self {
            DriverError::Mapped(e) => e,
            DriverError::Timeout => MappedError::timeout("timeout", "driver call timed out"),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SendResult {
    pub success: bool,
    pub provider_message_id: Option<String>,
    pub provider: String,
    pub ip_address: Option<String>,
    pub envelope_from: Option<String>,
    pub error: Option<String>,
}

#[derive(Debug, Clone)]
pub struct Quota {
    pub max_24_hour_send: u64,
    pub sent_last_24_hours: u64,
    pub max_send_rate: f64,
}

/// A provider driver. Only `send_email` is mandatory; the others default to
/// "not supported by this driver" so a driver set can mix drivers with
/// different optional capabilities (§4.D).
#[async_trait]
pub trait Driver: Send + Sync {
    fn name(&self) -> &str;

    /// `pool` is the pool component F selected for this job, if any (§4.F,
    /// §4.H step 5). A driver that has no use for it (e.g. an API driver
    /// whose upstream picks its own source IP) is free to ignore it.
    async fn send_email(
        &self,
        job: &SendJob,
        html: &str,
        pool: Option<&IpPool>,
    ) -> Result<SendResult, DriverError>;

    async fn validate_config(&self) -> Result<(), DriverError> {
        Ok(())
    }

    async fn get_quota(&self) -> Option<Quota> {
        None
    }

    async fn verify_domain(&self, _domain: &str) -> Option<bool> {
        None
    }
}

/// Wraps a [`Driver`] with a circuit breaker and the 35s call timeout
/// (§4.D, §5). Retryable errors from the inner driver *throw* (counted
/// against the breaker); non-retryable errors are returned as a failed
/// `SendResult`, uncounted.
pub struct BreakerDriver {
    inner: Arc<dyn Driver>,
    breaker: CircuitBreaker,
}

impl BreakerDriver {
    pub fn new(inner: Arc<dyn Driver>, breaker: CircuitBreaker) -> Self {
        BreakerDriver { inner, breaker }
    }

    pub async fn send_email(
        &self,
        job: &SendJob,
        html: &str,
        pool: Option<&IpPool>,
    ) -> Result<SendResult, DriverError> {
        let key = self.inner.name();
        if !self.breaker.should_allow(key) {
            return Err(DriverError::Mapped(MappedError::transient(
                "circuit_open",
                "circuit breaker is open for this driver",
            )));
        }

        let outcome = tokio::time::timeout(DRIVER_CALL_TIMEOUT, self.inner.send_email(job, html, pool)).await;

        match outcome {
            Err(_elapsed) => {
                self.breaker.record_failure(key);
                Err(DriverError::Timeout)
            }
            Ok(Err(err)) => {
                if err.retryable() {
                    self.breaker.record_failure(key);
                    Err(err)
                } else {
                    self.breaker.record_success(key);
                    Ok(SendResult {
                        success: false,
                        provider_message_id: None,
                        provider: self.inner.name().to_string(),
                        ip_address: None,
                        envelope_from: None,
                        error: Some(err.into_mapped().snapshot()),
                    })
                }
            }
            Ok(Ok(result)) => {
                self.breaker.record_success(key);
                Ok(result)
            }
        }
    }

    pub fn name(&self) -> &str {
        self.inner.name()
    }
}

/// An ordered set of drivers, ascending by priority (§4.D fallback
/// composition).
pub struct DriverSet {
    drivers: Vec<BreakerDriver>,
}

impl DriverSet {
    pub fn new(drivers: Vec<BreakerDriver>) -> Self {
        DriverSet { drivers }
    }

    /// Try each active driver in order. A non-retryable failure moves to
    /// the next driver; a retryable (thrown) error re-throws immediately —
    /// the worker's retry loop owns retries, fallback must not mask
    /// transient problems on the primary.
    pub async fn send_email(
        &self,
        job: &SendJob,
        html: &str,
        pool: Option<&IpPool>,
    ) -> Result<SendResult, DriverError> {
        let mut last_non_retryable: Option<SendResult> = None;

        for driver in &self.drivers {
            match driver.send_email(job, html, pool).await {
                Ok(result) if result.success => return Ok(result),
                Ok(result) => {
                    last_non_retryable = Some(result);
                    continue;
                }
                Err(err) => return Err(err),
            }
        }

        match last_non_retryable {
            Some(result) => Ok(result),
            None => Err(DriverError::Mapped(MappedError::permanent(
                "no_driver_configured",
                "no provider drivers are configured",
            ))),
        }
    }
}
