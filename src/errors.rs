//! Error taxonomy (component A): classifies provider/transport errors into
//! a fixed set of kinds with a retryable bit, independent of which driver
//! produced them.

use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Kind {
    Validation,
    Permanent,
    Transient,
    Quota,
    Timeout,
}

impl Kind {
    pub fn retryable_by_default(self) -> bool {
        matches!(self, Kind::Transient | Kind::Quota | Kind::Timeout)
    }
}

impl fmt::Display for Kind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Kind::Validation => "validation",
            Kind::Permanent => "permanent",
            Kind::Transient => "transient",
            Kind::Quota => "quota",
            Kind::Timeout => "timeout",
        };
        f.write_str(s)
    }
}

/// A mapped error: the unit every driver, parser and validation stage
/// reports failures through.
#[derive(Debug, Clone, serde::Serialize)]
pub struct MappedError {
    pub code: String,
    pub kind: Kind,
    pub retryable: bool,
    pub message: String,
    pub original_code: Option<String>,
    pub original_message: Option<String>,
    pub metadata: Option<serde_json::Value>,
}

impl fmt::Display for MappedError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.code, self.message)
    }
}

impl std::error::Error for MappedError {}

impl MappedError {
    pub fn new(code: impl Into<String>, kind: Kind, message: impl Into<String>) -> Self {
        let retryable = kind.retryable_by_default();
        MappedError {
            code: code.into(),
            kind,
            retryable,
            message: message.into(),
            original_code: None,
            original_message: None,
            metadata: None,
        }
    }

    pub fn retryable(mut self, retryable: bool) -> Self {
        self.retryable = retryable;
        self
    }

    pub fn original(mut self, code: impl Into<String>, message: impl Into<String>) -> Self {
        self.original_code = Some(code.into());
        self.original_message = Some(message.into());
        self
    }

    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = Some(metadata);
        self
    }

    /// Snapshot form persisted on EmailLog.last_error / DeadLetterEntry.failed_reason.
    pub fn snapshot(&self) -> String {
        format!("{}:{}", self.code, self.message)
    }

    pub fn validation(code: impl Into<String>, message: impl Into<String>) -> Self {
        MappedError::new(code, Kind::Validation, message)
    }

    pub fn permanent(code: impl Into<String>, message: impl Into<String>) -> Self {
        MappedError::new(code, Kind::Permanent, message)
    }

    pub fn transient(code: impl Into<String>, message: impl Into<String>) -> Self {
        MappedError::new(code, Kind::Transient, message)
    }

    pub fn quota(code: impl Into<String>, message: impl Into<String>) -> Self {
        MappedError::new(code, Kind::Quota, message)
    }

    pub fn timeout(code: impl Into<String>, message: impl Into<String>) -> Self {
        MappedError::new(code, Kind::Timeout, message)
    }
}

/// Fixed table of known provider error codes. Anything not listed here is
/// inferred from the HTTP status by [`from_http_status`].
pub fn from_known_code(code: &str, message: &str) -> Option<MappedError> {
    let mapped = match code {
        "message-rejected" | "message_rejected" => {
            MappedError::permanent("message_rejected", message)
        }
        "account-paused" | "account_paused" => MappedError::permanent("account_paused", message),
        "mail-from-domain-not-verified" => MappedError::permanent("domain_not_verified", message),
        "configuration-set-does-not-exist" => {
            MappedError::permanent("invalid_configuration", message)
        }
        "throttling" | "throttling-exception" | "too-many-requests" => {
            MappedError::quota("throttling", message)
        }
        "service-unavailable" | "service_unavailable" => {
            MappedError::transient("service_unavailable", message)
        }
        "internal-failure" => MappedError::transient("internal_failure", message),
        "timeout" => MappedError::timeout("timeout", message),
        "circuit_open" => MappedError::transient("circuit_open", message).retryable(true),
        _ => return None,
    };
    Some(mapped.original(code, message))
}

/// Infer a kind from an HTTP status code when the provider's own error code
/// isn't in the fixed table.
pub fn from_http_status(status: u16, message: &str) -> MappedError {
    let mapped = match status {
        429 => MappedError::quota("throttling", message),
        400..=499 => MappedError::permanent("message_rejected", message),
        500..=599 => MappedError::transient("service_unavailable", message),
        _ => MappedError::permanent("unknown_error", message),
    };
    mapped.original(status.to_string(), message)
}

/// Classify an arbitrary transport-level failure: known code, else HTTP
/// status, else message-text heuristics, else conservative permanent.
pub fn classify(code: Option<&str>, status: Option<u16>, message: &str) -> MappedError {
    if let Some(code) = code
        && let Some(mapped) = from_known_code(code, message)
    {
        return mapped;
    }
    if let Some(status) = status {
        return from_http_status(status, message);
    }
    let lower = message.to_ascii_lowercase();
    if lower.contains("timeout") || lower.contains("timed out") {
        return MappedError::timeout("timeout", message);
    }
    if lower.contains("connection")
        || lower.contains("network")
        || lower.contains("reset")
        || lower.contains("refused")
    {
        return MappedError::transient("network_error", message);
    }
    // Unknown with no hint: conservative, don't retry forever.
    MappedError::permanent("unknown_error", message)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_code_wins_over_status() {
        let e = classify(Some("throttling"), Some(500), "slow down");
        assert_eq!(e.kind, Kind::Quota);
        assert!(e.retryable);
    }

    #[test]
    fn status_4xx_is_permanent_except_429() {
        let e = classify(None, Some(400), "bad");
        assert_eq!(e.kind, Kind::Permanent);
        assert!(!e.retryable);

        let e = classify(None, Some(429), "bad");
        assert_eq!(e.kind, Kind::Quota);
        assert!(e.retryable);
    }

    #[test]
    fn status_5xx_is_transient() {
        let e = classify(None, Some(503), "down");
        assert_eq!(e.kind, Kind::Transient);
        assert!(e.retryable);
    }

    #[test]
    fn message_heuristics_without_status() {
        let e = classify(None, None, "connection reset by peer");
        assert_eq!(e.kind, Kind::Transient);

        let e = classify(None, None, "request timed out");
        assert_eq!(e.kind, Kind::Timeout);
    }

    #[test]
    fn unknown_with_no_hint_is_conservative() {
        let e = classify(None, None, "something weird happened");
        assert_eq!(e.kind, Kind::Permanent);
        assert!(!e.retryable);
    }
}
