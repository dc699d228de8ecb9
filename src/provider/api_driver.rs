//! SES-shaped API driver (§4.D).

use async_trait::async_trait;
use sha2::{Digest, Sha256};

use crate::errors::MappedError;
use crate::models::{DomainRepository, IpPool, TenantRepository};
use crate::queue::SendJob;

use super::{Driver, DriverError, SendResult};

#[derive(Debug, Clone)]
pub struct ApiDriverConfig {
    pub region: String,
    pub endpoint: String,
    pub from_address: String,
    pub from_name: Option<String>,
    pub reply_to: Option<String>,
    pub configuration_set: Option<String>,
    /// Inject a synthetic throttling error before the real call (§4.H chaos).
    pub chaos_ses_429: bool,
}

pub struct ApiDriver {
    config: ApiDriverConfig,
    http: reqwest::Client,
    tenants: TenantRepository,
    domains: DomainRepository,
}

impl ApiDriver {
    pub fn new(
        config: ApiDriverConfig,
        http: reqwest::Client,
        tenants: TenantRepository,
        domains: DomainRepository,
    ) -> Self {
        ApiDriver {
            config,
            http,
            tenants,
            domains,
        }
    }

    /// Tenant→from-address resolution (§4.D): use the tenant's own
    /// verified-domain from-address when available, otherwise fall back to
    /// the driver's configured from-address. Suspension is enforced once,
    /// upstream of driver dispatch, in the send worker (§8 universal
    /// invariant) — not repeated here.
    async fn resolve_from_address(&self, tenant_id: crate::models::TenantId) -> Result<String, DriverError> {
        let tenant = self
            .tenants
            .find(tenant_id)
            .await
            .map_err(|e| DriverError::Mapped(MappedError::permanent("tenant_lookup_failed", e.to_string())))?;

        if let (Some(addr), Some(domain_id)) = (&tenant.default_from_address, tenant.default_domain_id) {
            let domain = self.domains.find(domain_id).await.ok();
            if domain.is_some_and(|d| d.is_verified()) {
                let name = tenant.default_from_name.as_deref().unwrap_or("");
                return Ok(if name.is_empty() {
                    addr.clone()
                } else {
                    format!("{name} <{addr}>")
                });
            }
            tracing::warn!(
                tenant_id = %tenant_id,
                "tenant's default domain is not verified, falling back to driver from_address"
            );
        }

        Ok(match &self.config.from_name {
            Some(name) => format!("{name} <{}>", self.config.from_address),
            None => self.config.from_address.clone(),
        })
    }
}

#[async_trait]
impl Driver for ApiDriver {
    fn name(&self) -> &str {
        "api"
    }

    async fn send_email(
        &self,
        job: &SendJob,
        html: &str,
        pool: Option<&IpPool>,
    ) -> Result<SendResult, DriverError> {
        if self.config.chaos_ses_429 {
            return Err(DriverError::Mapped(MappedError::quota(
                "throttling",
                "synthetic throttling (chaos_ses_429)",
            )));
        }

        let from = self.resolve_from_address(job.tenant_id).await?;
        let reply_to = job.reply_to.clone().or_else(|| self.config.reply_to.clone());

        let mut tags = vec![
            format!("tenant_id:{}", job.tenant_id),
            format!("outbox_id:{}", job.outbox_id),
            format!("request_id:{}", job.request_id),
        ];
        if let Some(pool) = pool {
            tags.push(format!("ip_pool:{}", pool.name));
        }
        tags.extend(job.tags.iter().take(47 - tags.len().min(47)).cloned());

        let body = serde_json::json!({
            "FromEmailAddress": from,
            "Destination": {
                "ToAddresses": [job.to.clone()],
                "CcAddresses": job.cc,
                "BccAddresses": job.bcc,
            },
            "ReplyToAddresses": reply_to.map(|r| vec![r]).unwrap_or_default(),
            "Content": {
                "Simple": {
                    "Subject": { "Data": job.subject, "Charset": "UTF-8" },
                    "Body": { "Html": { "Data": html, "Charset": "UTF-8" } },
                }
            },
            "ConfigurationSetName": self.config.configuration_set,
            "EmailTags": tags,
        });

        let response = self
            .http
            .post(&self.config.endpoint)
            .json(&body)
            .send()
            .await
            .map_err(|e| map_transport_error(&e))?;

        let status = response.status();
        if status.is_success() {
            let parsed: serde_json::Value = response.json().await.unwrap_or_default();
            let message_id = parsed
                .get("MessageId")
                .and_then(|v| v.as_str())
                .map(|s| s.to_string())
                .unwrap_or_else(|| hex::encode(Sha256::digest(job.request_id.as_bytes())));
            Ok(SendResult {
                success: true,
                provider_message_id: Some(message_id),
                provider: self.name().to_string(),
                ip_address: pool.and_then(|p| p.ip_addresses.first().cloned()),
                envelope_from: None,
                error: None,
            })
        } else {
            let text = response.text().await.unwrap_or_default();
            Err(DriverError::Mapped(crate::errors::from_http_status(
                status.as_u16(),
                &text,
            )))
        }
    }

    async fn validate_config(&self) -> Result<(), DriverError> {
        if self.config.from_address.is_empty() {
            return Err(DriverError::Mapped(MappedError::validation(
                "invalid_payload",
                "from_address must not be empty",
            )));
        }
        Ok(())
    }
}

fn map_transport_error(err: &reqwest::Error) -> DriverError {
    let message = err.to_string();
    if err.is_timeout() {
        DriverError::Mapped(MappedError::timeout("timeout", message))
    } else if err.is_connect() {
        DriverError::Mapped(MappedError::transient("network_error", message))
    } else {
        DriverError::Mapped(crate::errors::classify(None, err.status().map(|s| s.as_u16()), &message))
    }
}
