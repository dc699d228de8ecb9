//! SMTP driver (§4.D): connection-pooled SMTP client, VERP return path,
//! synthesized `List-Unsubscribe`.
//!
//! Grounded on the teacher's (deleted) `handler::send_single_upstream`:
//! `SmtpClientBuilder` usage, the `.local_ip(outbound_ip)` source-IP bind,
//! and the retryable/non-retryable classification of `mail_send::Error`.

use std::net::IpAddr;
use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use deadpool::managed::{Manager, Metrics, Object, Pool, RecycleResult};
use mail_builder::MessageBuilder;
use mail_send::{SmtpClient, SmtpClientBuilder};
use sha2::{Digest, Sha256};
use tokio::net::TcpStream;
use tokio_rustls::client::TlsStream;

use crate::errors::MappedError;
use crate::models::{IpPool, IpPoolType};
use crate::queue::SendJob;

use super::{Driver, DriverError, SendResult};

type Connection = SmtpClient<TlsStream<TcpStream>>;

#[derive(Debug, Clone)]
pub struct SmtpDriverConfig {
    pub host: String,
    pub port: u16,
    pub secure: bool,
    pub username: Option<String>,
    pub password: Option<String>,
    pub from_address: String,
    pub return_path_domain: String,
}

/// Builds connections to the one configured relay. Recycling is a no-op —
/// a broken connection is detected by the next `send` failing, at which
/// point the caller drops it with [`Object::take`] instead of returning it.
struct SmtpConnectionManager {
    config: SmtpDriverConfig,
}

#[async_trait]
impl Manager for SmtpConnectionManager {
    type Type = Connection;
    type Error = mail_send::Error;

    async fn create(&self) -> Result<Connection, mail_send::Error> {
        let mut client = SmtpClientBuilder::new(self.config.host.as_str(), self.config.port)
            .implicit_tls(self.config.secure)
            .timeout(super::DRIVER_CALL_TIMEOUT);
        if let (Some(user), Some(pass)) = (&self.config.username, &self.config.password) {
            client = client.credentials((user.as_str(), pass.as_str()));
        }
        client.connect().await
    }

    async fn recycle(&self, _conn: &mut Connection, _metrics: &Metrics) -> RecycleResult<mail_send::Error> {
        Ok(())
    }
}

const POOL_SIZE: usize = 8;

pub struct SmtpDriver {
    config: SmtpDriverConfig,
    pool: Pool<SmtpConnectionManager>,
}

impl SmtpDriver {
    pub fn new(config: SmtpDriverConfig) -> Self {
        let manager = SmtpConnectionManager { config: config.clone() };
        let pool = Pool::builder(manager)
            .max_size(POOL_SIZE)
            .build()
            .expect("failed to build smtp connection pool");
        SmtpDriver { config, pool }
    }

    /// `bounce+<hex16>@<return-path-domain>`, hex16 = first 16 hex chars of
    /// `sha256(recipient:unix_millis)` (§4.D VERP).
    fn verp_return_path(&self, recipient: &str) -> String {
        let millis = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis();
        let digest = Sha256::digest(format!("{recipient}:{millis}").as_bytes());
        let hex16 = &hex::encode(digest)[..16];
        format!("bounce+{hex16}@{}", self.config.return_path_domain)
    }

    fn build_message(&self, job: &SendJob, html: &str) -> Result<Vec<u8>, DriverError> {
        let mut builder = MessageBuilder::new()
            .from(self.config.from_address.as_str())
            .to(job.to.as_str())
            .subject(job.subject.as_str())
            .html_body(html);

        if let Some(reply_to) = &job.reply_to {
            builder = builder.reply_to(reply_to.as_str());
        }

        builder = builder
            .header("X-Request-Id", mail_builder::headers::raw::Raw::new(job.request_id.clone()))
            .header(
                "X-Outbox-Id",
                mail_builder::headers::raw::Raw::new(job.outbox_id.to_string()),
            );

        for (name, value) in &job.headers {
            if name.eq_ignore_ascii_case("list-unsubscribe") {
                continue;
            }
            builder = builder.header(name.clone(), mail_builder::headers::raw::Raw::new(value.clone()));
        }

        if !job.headers.keys().any(|k| k.eq_ignore_ascii_case("list-unsubscribe"))
            && let Some(unsub_url) = job.headers.get("x-unsubscribe-url")
        {
            builder = builder.header(
                "List-Unsubscribe",
                mail_builder::headers::raw::Raw::new(format!("<{unsub_url}>")),
            );
        }

        builder
            .write_to_vec()
            .map_err(|e| DriverError::Mapped(MappedError::permanent("invalid_template", e.to_string())))
    }

    /// A dedicated pool names an exact source IP the message must originate
    /// from, so it bypasses the shared connection pool and connects fresh
    /// (teacher's `.local_ip(outbound_ip)` bind).
    async fn send_with_local_ip(
        &self,
        ip: IpAddr,
        return_path: &str,
        to: &str,
        message: Vec<u8>,
    ) -> Result<(), DriverError> {
        let mut client = SmtpClientBuilder::new(self.config.host.as_str(), self.config.port)
            .implicit_tls(self.config.secure)
            .local_ip(ip)
            .timeout(super::DRIVER_CALL_TIMEOUT);
        if let (Some(user), Some(pass)) = (&self.config.username, &self.config.password) {
            client = client.credentials((user.as_str(), pass.as_str()));
        }

        let mut connection = client.connect().await.map_err(|e| map_smtp_error(&e))?;
        connection
            .send(mail_send::smtp::message::Message::new(return_path, vec![to], message))
            .await
            .map_err(|e| map_smtp_error(&e))
    }

    fn dedicated_source_ip(pool: Option<&IpPool>) -> Option<IpAddr> {
        let pool = pool.filter(|p| p.pool_type == IpPoolType::Dedicated)?;
        pool.ip_addresses.first()?.parse().ok()
    }
}

#[async_trait]
impl Driver for SmtpDriver {
    fn name(&self) -> &str {
        "smtp"
    }

    async fn send_email(
        &self,
        job: &SendJob,
        html: &str,
        pool: Option<&IpPool>,
    ) -> Result<SendResult, DriverError> {
        let return_path = self.verp_return_path(&job.to);
        let message = self.build_message(job, html)?;

        if let Some(ip) = Self::dedicated_source_ip(pool) {
            self.send_with_local_ip(ip, &return_path, &job.to, message).await?;
            return Ok(SendResult {
                success: true,
                provider_message_id: Some(job.request_id.clone()),
                provider: self.name().to_string(),
                ip_address: Some(ip.to_string()),
                envelope_from: Some(return_path),
                error: None,
            });
        }

        let mut connection = self
            .pool
            .get()
            .await
            .map_err(|e| DriverError::Mapped(MappedError::transient("smtp_pool", e.to_string())))?;

        if let Err(e) = connection
            .send(mail_send::smtp::message::Message::new(
                return_path.as_str(),
                vec![job.to.as_str()],
                message,
            ))
            .await
        {
            let mapped = map_smtp_error(&e);
            // Don't hand a connection that just failed back to the pool.
            let _ = Object::take(connection);
            return Err(mapped);
        }

        Ok(SendResult {
            success: true,
            provider_message_id: Some(job.request_id.clone()),
            provider: self.name().to_string(),
            ip_address: pool.and_then(|p| p.ip_addresses.first().cloned()),
            envelope_from: Some(return_path),
            error: None,
        })
    }
}

/// Classifies `mail_send::Error` into retryable/non-retryable, mirroring
/// the teacher's `send_single_upstream` match.
fn map_smtp_error(err: &mail_send::Error) -> DriverError {
    use mail_send::Error as E;
    let message = err.to_string();
    let mapped = match err {
        E::Io(_) | E::Timeout | E::Tls(_) => MappedError::transient("network_error", message),
        E::UnparseableReply | E::AuthenticationFailed(_) => {
            MappedError::permanent("message_rejected", message)
        }
        E::UnexpectedReply(reply) => {
            let code = reply.code();
            if code == 450 || code == 451 || code == 452 {
                MappedError::transient("service_unavailable", message)
            } else if code == 421 {
                MappedError::quota("throttling", message)
            } else {
                MappedError::permanent("message_rejected", message)
            }
        }
        _ => MappedError::permanent("message_rejected", message),
    };
    DriverError::Mapped(mapped)
}
