//! Queue job schemas (§6) and the `Queue` abstraction the message-queue
//! broker is specified through (§1 Non-goals: the broker itself is an
//! external collaborator, specified only via the operations the core uses).
//!
//! The production implementation layers durable DB-backed job rows with the
//! teacher's lightweight bus (`crate::bus`) as a low-latency wake-up
//! notification, rather than introducing an unjustified external broker
//! client (see `DESIGN.md`).

use std::collections::VecDeque;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::models::{OutboxId, RecipientId, TenantId, WebhookId};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecipientRef {
    pub email: String,
    pub recipient_id: Option<RecipientId>,
    pub external_id: Option<String>,
    pub cpf_cnpj_hash: Option<String>,
}

/// `send_jobs` wire schema (§6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SendJob {
    pub outbox_id: OutboxId,
    pub tenant_id: TenantId,
    pub request_id: String,
    pub to: String,
    pub subject: String,
    pub html_ref: OutboxId,
    pub recipient: RecipientRef,
    #[serde(default)]
    pub cc: Vec<String>,
    #[serde(default)]
    pub bcc: Vec<String>,
    pub reply_to: Option<String>,
    #[serde(default)]
    pub headers: std::collections::BTreeMap<String, String>,
    #[serde(default)]
    pub tags: Vec<String>,
    pub attempt: i32,
    pub enqueued_at: DateTime<Utc>,
}

impl SendJob {
    pub fn queue_age(&self, now: DateTime<Utc>) -> chrono::Duration {
        now - self.enqueued_at
    }
}

/// `webhook_delivery` wire schema (§6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookDeliveryJob {
    pub webhook_id: WebhookId,
    pub event_type: String,
    pub payload: serde_json::Value,
}

/// `feedback_events` wire schema (§6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedbackEventJob {
    pub provider: String,
    pub event: crate::feedback::ProviderEvent,
    pub raw_payload: Option<String>,
    pub received_at: DateTime<Utc>,
}

/// `dns_verification` wire schema (§6) — addressed to the ingress/onboarding
/// collaborator, never consumed by this core. Kept for completeness of the
/// external interface description.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DnsVerificationJob {
    pub domain_id: crate::models::DomainId,
    pub force_check: Option<bool>,
    pub notify_on_failure: Option<bool>,
}

/// Typed channel identifiers, one per queue described in §6.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Channel {
    SendJobs,
    WebhookDelivery,
    FeedbackEvents,
}

/// The narrow capability the core needs from a queue broker: enqueue and
/// dequeue-with-ack/nack. A real deployment backs this with durable
/// DB-resident rows (single-writer-per-outbox-row, §3) plus the bus as a
/// wake-up signal; tests use [`InMemoryQueue`].
#[async_trait::async_trait]
pub trait Queue<T>: Send + Sync {
    async fn enqueue(&self, item: T);
    /// Pop the next item, if any, without blocking.
    async fn try_dequeue(&self) -> Option<T>;
}

/// In-memory fake per the Design Notes ("tests use in-memory fakes").
pub struct InMemoryQueue<T> {
    items: Arc<Mutex<VecDeque<T>>>,
}

impl<T> Default for InMemoryQueue<T> {
    fn default() -> Self {
        InMemoryQueue {
            items: Arc::new(Mutex::new(VecDeque::new())),
        }
    }
}

impl<T> Clone for InMemoryQueue<T> {
    fn clone(&self) -> Self {
        InMemoryQueue {
            items: self.items.clone(),
        }
    }
}

/// Redis-list-backed `Queue`: `LPUSH` to enqueue, `RPOP` to dequeue. Not a
/// broker in its own right — the broker itself is out of scope (§1, §6) —
/// just the minimum durable FIFO the core needs, built on the same
/// `deadpool-redis` pool the rate limiter already uses.
pub struct RedisQueue<T> {
    pool: deadpool_redis::Pool,
    key: String,
    _marker: std::marker::PhantomData<T>,
}

impl<T> RedisQueue<T> {
    pub fn new(pool: deadpool_redis::Pool, channel: Channel) -> Self {
        let key = match channel {
            Channel::SendJobs => "queue:send_jobs",
            Channel::WebhookDelivery => "queue:webhook_delivery",
            Channel::FeedbackEvents => "queue:feedback_events",
        };
        RedisQueue {
            pool,
            key: key.to_string(),
            _marker: std::marker::PhantomData,
        }
    }
}

#[async_trait::async_trait]
impl<T: Serialize + for<'de> Deserialize<'de> + Send + Sync> Queue<T> for RedisQueue<T> {
    async fn enqueue(&self, item: T) {
        let Ok(mut conn) = self.pool.get().await else {
            tracing::error!(key = %self.key, "failed to get redis connection to enqueue job");
            return;
        };
        let Ok(payload) = serde_json::to_string(&item) else {
            tracing::error!(key = %self.key, "failed to serialize job for enqueue");
            return;
        };
        if let Err(err) = redis::cmd("LPUSH").arg(&self.key).arg(payload).query_async::<()>(&mut conn).await {
            tracing::error!(key = %self.key, error = %err, "failed to enqueue job onto redis list");
        }
    }

    async fn try_dequeue(&self) -> Option<T> {
        let mut conn = self.pool.get().await.ok()?;
        let payload: Option<String> = redis::cmd("RPOP").arg(&self.key).query_async(&mut conn).await.ok()?;
        let payload = payload?;
        match serde_json::from_str(&payload) {
            Ok(item) => Some(item),
            Err(err) => {
                tracing::error!(key = %self.key, error = %err, "failed to deserialize dequeued job, dropping it");
                None
            }
        }
    }
}

#[async_trait::async_trait]
impl<T: Send + Sync> Queue<T> for InMemoryQueue<T> {
    async fn enqueue(&self, item: T) {
        self.items.lock().push_back(item);
    }

    async fn try_dequeue(&self) -> Option<T> {
        self.items.lock().pop_front()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn fifo_enqueue_dequeue() {
        let q: InMemoryQueue<u32> = InMemoryQueue::default();
        q.enqueue(1).await;
        q.enqueue(2).await;
        assert_eq!(q.try_dequeue().await, Some(1));
        assert_eq!(q.try_dequeue().await, Some(2));
        assert_eq!(q.try_dequeue().await, None);
    }
}
