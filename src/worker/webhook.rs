//! Webhook delivery worker (component J): claims pending/retrying
//! `webhook_deliveries` rows, signs and POSTs the payload, and reschedules
//! on failure per the retry table in §4.J.
//!
//! Grounded on the other_examples webhook dispatcher's HMAC-SHA256-over-JSON
//! signing scheme; the claim loop reuses the teacher's poll-and-spawn shape
//! from [`super::send`], swapping a queue pop for
//! [`WebhookDeliveryRepository::claim_due`]'s `FOR UPDATE SKIP LOCKED`.

use std::time::Duration;

use hmac::{Hmac, Mac};
use sha2::Sha256;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::config::WebhookWorkerConfig;
use crate::models::{Webhook, WebhookDelivery, WebhookDeliveryRepository, WebhookRepository};

type HmacSha256 = Hmac<Sha256>;

/// `http` must be built with `redirect(reqwest::redirect::Policy::none())`
/// (§4.J: "no redirects") — the shared client passed in at construction
/// time is expected to come from that one call site.
pub struct WebhookWorker {
    http: reqwest::Client,
    webhook: WebhookRepository,
    delivery: WebhookDeliveryRepository,
    config: WebhookWorkerConfig,
    semaphore: std::sync::Arc<Semaphore>,
    shutdown: CancellationToken,
}

impl WebhookWorker {
    pub fn new(
        http: reqwest::Client,
        webhook: WebhookRepository,
        delivery: WebhookDeliveryRepository,
        config: WebhookWorkerConfig,
        shutdown: CancellationToken,
    ) -> Self {
        let semaphore = std::sync::Arc::new(Semaphore::new(config.concurrency));
        WebhookWorker {
            http,
            webhook,
            delivery,
            config,
            semaphore,
            shutdown,
        }
    }

    pub async fn run(self: std::sync::Arc<Self>) {
        let mut poll = tokio::time::interval(Duration::from_millis(500));
        poll.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        // §4.J rate budget: at most `rate_per_second` claims issued per tick
        // of this 1s limiter, independent of the concurrency semaphore above.
        let mut rate_tick = tokio::time::interval(Duration::from_secs(1));

        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => {
                    info!("webhook worker shutting down");
                    return;
                }
                _ = poll.tick() => {
                    let _ = rate_tick.tick().await;
                    let batch = match self.delivery.claim_due(self.config.rate_per_second as i64).await {
                        Ok(batch) => batch,
                        Err(err) => {
                            error!(error = %err, "failed to claim webhook deliveries");
                            continue;
                        }
                    };
                    for delivery in batch {
                        let Ok(permit) = self.semaphore.clone().acquire_owned().await else {
                            break;
                        };
                        let worker = self.clone();
                        tokio::spawn(async move {
                            let _permit = permit;
                            worker.attempt_delivery(delivery).await;
                        });
                    }
                }
            }
        }
    }

    async fn attempt_delivery(&self, delivery: WebhookDelivery) {
        let webhook = match self.webhook.find(delivery.webhook_id).await {
            Ok(Some(webhook)) if webhook.is_active => webhook,
            Ok(Some(_)) => {
                warn!(webhook_id = %delivery.webhook_id, "webhook deactivated, dropping delivery");
                let _ = self.delivery.mark_failed(delivery.id, None, Some("webhook deactivated")).await;
                return;
            }
            Ok(None) => {
                warn!(webhook_id = %delivery.webhook_id, "webhook no longer exists, dropping delivery");
                let _ = self.delivery.mark_failed(delivery.id, None, Some("webhook not found")).await;
                return;
            }
            Err(err) => {
                error!(error = %err, "failed to look up webhook for delivery");
                return;
            }
        };

        let body = serde_json::to_vec(&delivery.payload.0).unwrap_or_default();
        let signature = sign(&webhook.secret, &body);

        let response = self
            .http
            .post(&webhook.url)
            .timeout(self.config.timeout)
            .header("Content-Type", "application/json")
            .header("X-Webhook-Signature", signature)
            .header("X-Webhook-Event", delivery.event_type.clone())
            .header("X-Webhook-Delivery-Id", delivery.id.to_string())
            .header("User-Agent", "sendgate-webhooks/1.0")
            .body(body)
            .send()
            .await;

        match response {
            Ok(resp) => {
                let status = resp.status();
                let response_body = resp.text().await.unwrap_or_default();
                if status.is_success() {
                    if let Err(err) = self
                        .delivery
                        .mark_success(delivery.id, status.as_u16() as i32, &response_body)
                        .await
                    {
                        error!(error = %err, "failed to mark webhook delivery success");
                    }
                } else {
                    self.handle_failure(&webhook, delivery, Some(status.as_u16() as i32), is_retryable_status(status.as_u16()))
                        .await;
                }
            }
            Err(err) => {
                let retryable = err.is_timeout() || err.is_connect() || err.is_request();
                warn!(error = %err, webhook_id = %webhook.id, "webhook delivery request failed");
                self.handle_failure(&webhook, delivery, None, retryable).await;
            }
        }
    }

    async fn handle_failure(
        &self,
        webhook: &Webhook,
        delivery: WebhookDelivery,
        response_code: Option<i32>,
        retryable: bool,
    ) {
        let next_attempt = delivery.attempts + 1;
        if !retryable || next_attempt >= self.config.max_attempts as i32 {
            if let Err(err) = self.delivery.mark_failed(delivery.id, response_code, None).await {
                error!(error = %err, webhook_id = %webhook.id, "failed to mark webhook delivery failed");
            }
            return;
        }

        // §4.J retry delay: 5 * 2^(attempt-1) seconds.
        let delay_secs = 5 * 2i64.pow((next_attempt - 1).max(0) as u32);
        let next_retry_at = chrono::Utc::now() + chrono::Duration::seconds(delay_secs);
        if let Err(err) = self
            .delivery
            .mark_retrying(delivery.id, response_code, next_retry_at)
            .await
        {
            error!(error = %err, webhook_id = %webhook.id, "failed to mark webhook delivery retrying");
        }
    }
}

fn sign(secret: &str, body: &[u8]) -> String {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC accepts keys of any length");
    mac.update(body);
    hex::encode(mac.finalize().into_bytes())
}

/// Network errors and 5xx/429 responses are retried; other 4xx responses
/// indicate a client-side misconfiguration and are terminal (§4.J).
fn is_retryable_status(status: u16) -> bool {
    status == 429 || (500..600).contains(&status)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signature_is_deterministic_for_same_secret_and_body() {
        let a = sign("shh", b"{\"hello\":\"world\"}");
        let b = sign("shh", b"{\"hello\":\"world\"}");
        assert_eq!(a, b);
        assert_ne!(a, sign("other", b"{\"hello\":\"world\"}"));
    }

    #[test]
    fn retry_classification_matches_spec() {
        assert!(is_retryable_status(429));
        assert!(is_retryable_status(500));
        assert!(is_retryable_status(503));
        assert!(!is_retryable_status(400));
        assert!(!is_retryable_status(404));
    }

    #[test]
    fn retry_delay_doubles_each_attempt() {
        let delay = |attempt: i64| 5 * 2i64.pow((attempt - 1).max(0) as u32);
        assert_eq!(delay(1), 5);
        assert_eq!(delay(2), 10);
        assert_eq!(delay(3), 20);
    }
}
