//! Validation stage (component G): four ordered pre-send checks. If a
//! check fails, subsequent checks are skipped. All failures are
//! `retryable=false` (§4.G).

use regex::Regex;
use std::sync::LazyLock;

use crate::errors::MappedError;
use crate::models::{OutboxRepository, RecipientRepository};
use crate::queue::SendJob;

const MAX_HTML_SIZE: usize = 256 * 1024;
const MAX_SUBJECT_LEN: usize = 998;

static EMAIL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[^\s@]+@[^\s@]+\.[^\s@]+$").expect("valid regex"));
static EVENT_ATTR_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\bon[a-z]+\s*=").expect("valid regex"));

pub struct ValidationStage {
    outbox: OutboxRepository,
    recipients: RecipientRepository,
}

impl ValidationStage {
    pub fn new(outbox: OutboxRepository, recipients: RecipientRepository) -> Self {
        ValidationStage { outbox, recipients }
    }

    /// Runs the four ordered checks, short-circuiting on the first
    /// failure. Returns the HTML body on success, since by the time
    /// validation passes the caller needs it for the send step anyway.
    pub async fn validate(&self, job: &SendJob) -> Result<String, MappedError> {
        self.check_integrity(job)?;
        let outbox = self.check_outbox(job).await?;
        self.check_recipient(job).await?;
        self.check_template(&outbox.html, &job.subject)?;
        Ok(outbox.html)
    }

    /// 1. Integrity: structural validation of the job payload.
    fn check_integrity(&self, job: &SendJob) -> Result<(), MappedError> {
        if job.to.trim().is_empty() {
            return Err(MappedError::validation("invalid_payload", "to is empty"));
        }
        if job.subject.is_empty() {
            return Err(MappedError::validation("invalid_payload", "subject is empty"));
        }
        if job.request_id.trim().is_empty() {
            return Err(MappedError::validation(
                "invalid_payload",
                "request_id is empty",
            ));
        }
        Ok(())
    }

    /// 2. Outbox: the referenced row exists and belongs to the job's tenant.
    async fn check_outbox(
        &self,
        job: &SendJob,
    ) -> Result<crate::models::OutboxEntry, MappedError> {
        let outbox = self
            .outbox
            .find(job.html_ref)
            .await
            .map_err(|_| MappedError::validation("outbox_not_found", "outbox entry not found"))?;
        if outbox.tenant_id != job.tenant_id {
            return Err(MappedError::validation(
                "invalid_payload",
                "outbox tenant_id does not match job tenant_id",
            ));
        }
        Ok(outbox)
    }

    /// 3. Recipient: if a recipient_id is given, it must exist, not be
    /// soft-deleted, belong to the tenant, and match the payload email; the
    /// payload email must always be well-formed.
    async fn check_recipient(&self, job: &SendJob) -> Result<(), MappedError> {
        if !EMAIL_RE.is_match(&job.to) {
            return Err(MappedError::validation("invalid_email", "malformed recipient email"));
        }

        if let Some(recipient_id) = job.recipient.recipient_id {
            let recipient = self
                .recipients
                .find(recipient_id)
                .await
                .map_err(|_| MappedError::validation("recipient_not_found", "recipient not found"))?;
            if recipient.is_deleted() {
                return Err(MappedError::validation(
                    "recipient_not_found",
                    "recipient is soft-deleted",
                ));
            }
            if recipient.tenant_id != job.tenant_id {
                return Err(MappedError::validation(
                    "invalid_payload",
                    "recipient tenant_id does not match job tenant_id",
                ));
            }
            if !recipient.email.eq_ignore_ascii_case(&job.to) {
                return Err(MappedError::validation(
                    "invalid_payload",
                    "recipient email does not match payload",
                ));
            }
        }

        Ok(())
    }

    /// 4. Template: HTML present, bounded size, bounded subject length, no
    /// obviously dangerous content.
    fn check_template(&self, html: &str, subject: &str) -> Result<(), MappedError> {
        if html.is_empty() {
            return Err(MappedError::validation("invalid_template", "html body is empty"));
        }
        if html.len() > MAX_HTML_SIZE {
            return Err(MappedError::validation(
                "invalid_template",
                "html body exceeds maximum size",
            ));
        }
        if subject.len() > MAX_SUBJECT_LEN {
            return Err(MappedError::validation(
                "invalid_template",
                "subject exceeds maximum length",
            ));
        }

        let lower = html.to_ascii_lowercase();
        if lower.contains("<script") {
            return Err(MappedError::validation("invalid_template", "html contains <script"));
        }
        if lower.contains("javascript:") {
            return Err(MappedError::validation(
                "invalid_template",
                "html contains a javascript: URL",
            ));
        }
        if EVENT_ATTR_RE.is_match(html) {
            return Err(MappedError::validation(
                "invalid_template",
                "html contains an inline event attribute",
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_script_tags() {
        let stage_check = EVENT_ATTR_RE.is_match("<img onerror=alert(1)>");
        assert!(stage_check);
    }

    #[test]
    fn email_regex_accepts_simple_addresses() {
        assert!(EMAIL_RE.is_match("alice@example.com"));
        assert!(!EMAIL_RE.is_match("not-an-email"));
    }
}
