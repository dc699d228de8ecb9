//! Feedback ingest worker (component I): consumes normalised provider
//! events, reconciles them against `EmailLog`, and fans matching events out
//! to subscribed webhooks.
//!
//! Polling shape mirrors [`super::send::SendWorker`]; dispatch logic is
//! grounded on the DSN (B) and ARF (C) parsers.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::config::FeedbackWorkerConfig;
use crate::feedback::{self, ProviderEvent, ProviderEventType};
use crate::models::{
    BounceType, EmailEventRepository, EmailEventType, EmailLog, EmailLogRepository,
    EmailTrackingRepository, SuppressionReason, SuppressionRepository, WebhookDeliveryRepository,
    WebhookRepository,
};
use crate::queue::{FeedbackEventJob, Queue};

/// A deterministic namespace for deriving a tracking id when a provider
/// event carries no explicit one (e.g. an open/click beacon that predates
/// tracking-id assignment). Not a secret, just a stable UUIDv5 namespace.
const TRACKING_ID_NAMESPACE: Uuid = Uuid::from_bytes([
    0x6f, 0x2b, 0x4c, 0x3e, 0x1a, 0x9d, 0x4f, 0x8b, 0xa1, 0x02, 0x5e, 0x3c, 0x7d, 0x91, 0x0a, 0x44,
]);

pub struct FeedbackWorker<Q: Queue<FeedbackEventJob> + 'static> {
    queue: Arc<Q>,
    email_log: EmailLogRepository,
    email_event: EmailEventRepository,
    suppression: SuppressionRepository,
    email_tracking: EmailTrackingRepository,
    webhook: WebhookRepository,
    webhook_delivery: WebhookDeliveryRepository,
    semaphore: Arc<Semaphore>,
    shutdown: CancellationToken,
}

impl<Q: Queue<FeedbackEventJob> + 'static> FeedbackWorker<Q> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        queue: Arc<Q>,
        email_log: EmailLogRepository,
        email_event: EmailEventRepository,
        suppression: SuppressionRepository,
        email_tracking: EmailTrackingRepository,
        webhook: WebhookRepository,
        webhook_delivery: WebhookDeliveryRepository,
        config: FeedbackWorkerConfig,
        shutdown: CancellationToken,
    ) -> Self {
        FeedbackWorker {
            queue,
            email_log,
            email_event,
            suppression,
            email_tracking,
            webhook,
            webhook_delivery,
            semaphore: Arc::new(Semaphore::new(config.concurrency)),
            shutdown,
        }
    }

    pub async fn run(self: Arc<Self>) {
        let mut poll = tokio::time::interval(Duration::from_millis(500));
        poll.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => {
                    info!("feedback worker shutting down");
                    return;
                }
                _ = poll.tick() => {
                    while let Some(job) = self.queue.try_dequeue().await {
                        let Ok(permit) = self.semaphore.clone().acquire_owned().await else {
                            break;
                        };
                        let worker = self.clone();
                        tokio::spawn(async move {
                            let _permit = permit;
                            worker.handle_job(job).await;
                        });
                    }
                }
            }
        }
    }

    async fn handle_job(&self, job: FeedbackEventJob) {
        let event = job.event;
        let raw_payload = job.raw_payload.as_deref();

        let log = match self
            .email_log
            .find_by_provider_message_id(&event.message_id)
            .await
        {
            Ok(Some(log)) => log,
            Ok(None) => {
                warn!(message_id = %event.message_id, "no matching email log for provider event, skipping");
                return;
            }
            Err(err) => {
                error!(error = %err, message_id = %event.message_id, "failed to look up email log");
                return;
            }
        };

        let result = match event.event_type {
            ProviderEventType::Delivery => self.handle_delivery(&log).await,
            ProviderEventType::Bounce => self.handle_bounce(&log, &event, raw_payload).await,
            ProviderEventType::Complaint => self.handle_complaint(&log, &event, raw_payload).await,
            ProviderEventType::Open => self.handle_open(&log, &event).await,
            ProviderEventType::Click => self.handle_click(&log, &event).await,
            ProviderEventType::Unknown => {
                warn!(message_id = %event.message_id, "unrecognised provider event type, skipping");
                Ok(())
            }
        };

        if let Err(err) = result {
            error!(error = %err, message_id = %event.message_id, "failed to process provider event");
        }
    }

    async fn handle_delivery(&self, log: &EmailLog) -> Result<(), crate::models::Error> {
        self.email_log.set_delivered(log.id).await?;
        self.emit(log, EmailEventType::Delivered, None).await?;
        self.fan_out(log, "delivered", serde_json::json!({
            "email_log_id": log.id,
            "to": log.to_address,
        }))
        .await;
        Ok(())
    }

    async fn handle_bounce(
        &self,
        log: &EmailLog,
        event: &ProviderEvent,
        raw_payload: Option<&str>,
    ) -> Result<(), crate::models::Error> {
        let classified = classify_bounce(event, raw_payload);

        self.email_log
            .set_bounce(
                log.id,
                classified.bounce_type,
                classified.bounce_subtype.as_deref(),
                &classified.error_code,
                &classified.error_reason,
            )
            .await?;
        self.emit(
            log,
            EmailEventType::Bounced,
            Some(serde_json::json!({
                "bounce_type": classified.bounce_type,
                "bounce_subtype": classified.bounce_subtype,
            })),
        )
        .await?;

        if classified.bounce_type == BounceType::Hard {
            if let Some(domain) = crate::ratelimit::extract_domain(&log.to_address) {
                if let Err(err) = self
                    .suppression
                    .upsert(
                        log.tenant_id,
                        &log.to_address,
                        &domain,
                        SuppressionReason::HardBounce,
                        Some(&classified.bounce_subtype.clone().unwrap_or_default()),
                        Some(&classified.error_reason),
                    )
                    .await
                {
                    error!(error = %err, "failed to record suppression for hard bounce");
                }
            }
        }

        self.fan_out(log, "bounce", serde_json::json!({
            "email_log_id": log.id,
            "to": log.to_address,
            "bounce_type": classified.bounce_type,
            "bounce_subtype": classified.bounce_subtype,
            "diagnostic_code": classified.error_reason,
        }))
        .await;
        Ok(())
    }

    async fn handle_complaint(
        &self,
        log: &EmailLog,
        event: &ProviderEvent,
        raw_payload: Option<&str>,
    ) -> Result<(), crate::models::Error> {
        let feedback_type = classify_complaint(event, raw_payload);

        self.email_log.set_complaint(log.id, &feedback_type).await?;
        self.emit(
            log,
            EmailEventType::Complained,
            Some(serde_json::json!({ "feedback_type": feedback_type })),
        )
        .await?;

        if let Some(domain) = crate::ratelimit::extract_domain(&log.to_address) {
            if let Err(err) = self
                .suppression
                .upsert(
                    log.tenant_id,
                    &log.to_address,
                    &domain,
                    SuppressionReason::SpamComplaint,
                    None,
                    Some(&feedback_type),
                )
                .await
            {
                error!(error = %err, "failed to record suppression for complaint");
            }
        }

        self.fan_out(log, "complaint", serde_json::json!({
            "email_log_id": log.id,
            "to": log.to_address,
            "feedback_type": feedback_type,
        }))
        .await;
        Ok(())
    }

    async fn handle_open(&self, log: &EmailLog, event: &ProviderEvent) -> Result<(), crate::models::Error> {
        let tracking_id = tracking_id_for(log, event);
        let user_agent = event.metadata.get("user_agent").and_then(|v| v.as_str());
        let ip_address = event.metadata.get("ip_address").and_then(|v| v.as_str());

        self.email_tracking
            .record_open(log.id, tracking_id, user_agent, ip_address)
            .await?;
        self.emit(log, EmailEventType::Opened, None).await?;
        self.fan_out(log, "open", serde_json::json!({
            "email_log_id": log.id,
            "to": log.to_address,
        }))
        .await;
        Ok(())
    }

    async fn handle_click(&self, log: &EmailLog, event: &ProviderEvent) -> Result<(), crate::models::Error> {
        let tracking_id = tracking_id_for(log, event);
        let url = event
            .metadata
            .get("url")
            .and_then(|v| v.as_str())
            .unwrap_or_default();

        self.email_tracking.record_click(log.id, tracking_id, url).await?;
        self.emit(
            log,
            EmailEventType::Clicked,
            Some(serde_json::json!({ "url": url })),
        )
        .await?;
        self.fan_out(log, "click", serde_json::json!({
            "email_log_id": log.id,
            "to": log.to_address,
            "url": url,
        }))
        .await;
        Ok(())
    }

    async fn emit(
        &self,
        log: &EmailLog,
        event_type: EmailEventType,
        metadata: Option<serde_json::Value>,
    ) -> Result<(), crate::models::Error> {
        self.email_event.append(log.id, event_type, metadata).await?;
        Ok(())
    }

    /// For each active webhook of the tenant subscribed to `event_type`,
    /// write a pending delivery row; the webhook delivery worker (§4.J)
    /// claims these via `FOR UPDATE SKIP LOCKED`.
    async fn fan_out(&self, log: &EmailLog, event_type: &str, payload: serde_json::Value) {
        let webhooks = match self.webhook.find_active_for_event(log.tenant_id, event_type).await {
            Ok(webhooks) => webhooks,
            Err(err) => {
                error!(error = %err, "failed to look up webhooks for event fan-out");
                return;
            }
        };
        for webhook in webhooks {
            if let Err(err) = self
                .webhook_delivery
                .create_pending(webhook.id, event_type, payload.clone())
                .await
            {
                error!(error = %err, webhook_id = %webhook.id, "failed to enqueue webhook delivery");
            }
        }
    }
}

struct ClassifiedBounce {
    bounce_type: BounceType,
    bounce_subtype: Option<String>,
    error_code: String,
    error_reason: String,
}

/// Classify a bounce event, preferring a raw DSN payload when present and
/// falling back to whatever the provider's normalised metadata carries.
fn classify_bounce(event: &ProviderEvent, raw_payload: Option<&str>) -> ClassifiedBounce {
    if let Some(raw) = raw_payload {
        if let Ok(dsn) = feedback::dsn::parse(raw) {
            let class = dsn.overall_class();
            let bounce_type = match class {
                feedback::dsn::BounceClass::Hard => BounceType::Hard,
                feedback::dsn::BounceClass::Soft => BounceType::Soft,
                _ => BounceType::Undetermined,
            };
            let recipient = dsn.per_recipient.first();
            return ClassifiedBounce {
                bounce_type,
                bounce_subtype: recipient.and_then(|r| r.hard_bounce_subreason.clone()),
                error_code: recipient
                    .and_then(|r| r.status.clone())
                    .unwrap_or_else(|| "bounce".to_string()),
                error_reason: recipient
                    .and_then(|r| r.diagnostic_code.clone())
                    .unwrap_or_else(|| "bounced".to_string()),
            };
        }
    }

    let bounce_type = match event.metadata.get("bounce_type").and_then(|v| v.as_str()) {
        Some("hard") | Some("Permanent") => BounceType::Hard,
        Some("soft") | Some("Transient") => BounceType::Soft,
        _ => BounceType::Undetermined,
    };
    ClassifiedBounce {
        bounce_type,
        bounce_subtype: event
            .metadata
            .get("bounce_subtype")
            .and_then(|v| v.as_str())
            .map(str::to_string),
        error_code: event
            .metadata
            .get("error_code")
            .and_then(|v| v.as_str())
            .unwrap_or("bounce")
            .to_string(),
        error_reason: event
            .metadata
            .get("diagnostic_code")
            .and_then(|v| v.as_str())
            .unwrap_or("bounced")
            .to_string(),
    }
}

fn classify_complaint(event: &ProviderEvent, raw_payload: Option<&str>) -> String {
    if let Some(raw) = raw_payload {
        if let Ok(arf) = feedback::arf::parse(raw) {
            if let Some(feedback_type) = arf.feedback_type {
                return format!("{feedback_type:?}").to_ascii_lowercase();
            }
        }
    }
    event
        .metadata
        .get("feedback_type")
        .and_then(|v| v.as_str())
        .unwrap_or("complaint")
        .to_string()
}

fn tracking_id_for(log: &EmailLog, event: &ProviderEvent) -> Uuid {
    event
        .metadata
        .get("tracking_id")
        .and_then(|v| v.as_str())
        .and_then(|s| Uuid::parse_str(s).ok())
        .unwrap_or_else(|| Uuid::new_v5(&TRACKING_ID_NAMESPACE, log.id.to_string().as_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_event(event_type: ProviderEventType, metadata: serde_json::Value) -> ProviderEvent {
        ProviderEvent {
            provider: "api".to_string(),
            event_type,
            message_id: "msg-1".to_string(),
            timestamp: chrono::Utc::now(),
            metadata,
            raw_payload: None,
        }
    }

    #[test]
    fn classify_bounce_from_metadata_without_raw_payload() {
        let event = sample_event(
            ProviderEventType::Bounce,
            serde_json::json!({ "bounce_type": "hard", "diagnostic_code": "550 5.1.1 unknown user" }),
        );
        let classified = classify_bounce(&event, None);
        assert_eq!(classified.bounce_type, BounceType::Hard);
        assert_eq!(classified.error_reason, "550 5.1.1 unknown user");
    }

    #[test]
    fn classify_complaint_falls_back_to_metadata() {
        let event = sample_event(
            ProviderEventType::Complaint,
            serde_json::json!({ "feedback_type": "abuse" }),
        );
        assert_eq!(classify_complaint(&event, None), "abuse");
    }

    #[test]
    fn tracking_id_is_stable_for_same_log_without_explicit_id() {
        let event = sample_event(ProviderEventType::Open, serde_json::json!({}));
        let log_id: crate::models::EmailLogId = crate::models::EmailLogId::from(Uuid::new_v4());
        let log = EmailLog {
            id: log_id,
            outbox_id: crate::models::OutboxId::from(Uuid::new_v4()),
            tenant_id: crate::models::TenantId::from(Uuid::new_v4()),
            recipient_id: None,
            to_address: "a@example.com".to_string(),
            subject: "hi".to_string(),
            status: crate::models::EmailLogStatus::Sent,
            provider_message_id: None,
            error_code: None,
            error_reason: None,
            attempts: 1,
            duration_ms: 0,
            sent_at: None,
            failed_at: None,
            delivery_timestamp: None,
            bounce_type: None,
            bounce_subtype: None,
            complaint_feedback_type: None,
        };
        let first = tracking_id_for(&log, &event);
        let second = tracking_id_for(&log, &event);
        assert_eq!(first, second);
    }
}
