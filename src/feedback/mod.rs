//! Feedback ingestion: RFC 3464 DSN (B) and RFC 5965 ARF (C) parsers, plus
//! the normalised provider event shape the ingest worker (H.4.I) dispatches
//! on.

pub mod arf;
pub mod dsn;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderEventType {
    Delivery,
    Bounce,
    Complaint,
    Open,
    Click,
    Unknown,
}

/// A provider event normalised to the internal shape (§6), regardless of
/// whether the source was an SES-style JSON notification or a raw
/// DSN/ARF payload forwarded by the ingress collaborator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderEvent {
    pub provider: String,
    pub event_type: ProviderEventType,
    pub message_id: String,
    pub timestamp: DateTime<Utc>,
    pub metadata: serde_json::Value,
    pub raw_payload: Option<String>,
}
