//! RFC 3464 delivery-status-notification parser (component B).
//!
//! Grounded on the per-recipient field layout the teacher's (deleted) DSN
//! *generator* produced (`Reporting-MTA`, `Final-Recipient`, `Action`,
//! `Status`, `Remote-MTA`, `Diagnostic-Code`, `Last-Attempt-Date`),
//! reversed into a parser for the richer flat status-code table (§9 Open
//! Questions).

use mail_parser::MessageParser;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BounceClass {
    Delivered,
    Soft,
    Hard,
    Undetermined,
}

impl BounceClass {
    fn severity(self) -> u8 {
        match self {
            BounceClass::Delivered => 0,
            BounceClass::Undetermined => 1,
            BounceClass::Soft => 2,
            BounceClass::Hard => 3,
        }
    }

    pub fn max(self, other: BounceClass) -> BounceClass {
        if other.severity() > self.severity() { other } else { self }
    }

    pub fn should_suppress(self) -> bool {
        matches!(self, BounceClass::Hard)
    }
}

#[derive(Debug, Clone)]
pub struct RecipientStatus {
    pub original_recipient: Option<String>,
    pub final_recipient: Option<String>,
    pub action: Option<String>,
    pub status: Option<String>,
    pub remote_mta: Option<String>,
    pub diagnostic_code: Option<String>,
    pub last_attempt_date: Option<String>,
    pub class: BounceClass,
    pub hard_bounce_subreason: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct ParsedDsn {
    pub reporting_mta: Option<String>,
    pub arrival_date: Option<String>,
    pub original_message_id: Option<String>,
    pub per_recipient: Vec<RecipientStatus>,
}

impl ParsedDsn {
    /// The report's overall bounce class is the max-severity recipient
    /// class (§4.B).
    pub fn overall_class(&self) -> BounceClass {
        self.per_recipient
            .iter()
            .fold(BounceClass::Delivered, |acc, r| acc.max(r.class))
    }
}

#[derive(Debug, thiserror::Error)]
#[error("failed to parse DSN: {0}")]
pub struct ParseError(pub String);

/// Strip an `rfc822;` (or similar) type prefix from a DSN field value.
fn strip_type_prefix(value: &str) -> String {
    match value.split_once(';') {
        Some((_, rest)) => rest.trim().to_string(),
        None => value.trim().to_string(),
    }
}

fn classify_status(status: &str) -> BounceClass {
    let status = status.trim();
    match status.chars().next() {
        Some('5') => BounceClass::Hard,
        Some('4') => BounceClass::Soft,
        Some('2') => BounceClass::Delivered,
        _ => BounceClass::Undetermined,
    }
}

fn hard_bounce_subreason(diagnostic: &str) -> Option<String> {
    let lower = diagnostic.to_ascii_lowercase();
    if lower.contains("no such user")
        || lower.contains("mailbox unavailable")
        || lower.contains("user unknown")
        || lower.contains("invalid recipient")
    {
        Some("user".to_string())
    } else if lower.contains("domain") && (lower.contains("not found") || lower.contains("no such")) {
        Some("domain".to_string())
    } else if lower.contains("mailbox full") || lower.contains("quota") {
        Some("mailbox".to_string())
    } else {
        None
    }
}

/// Parse per-message and per-recipient fields out of the
/// `message/delivery-status` part's raw text, using blank lines to
/// separate the message-level block from each recipient block.
fn parse_delivery_status_part(text: &str) -> ParsedDsn {
    let mut dsn = ParsedDsn::default();
    let mut blocks = text.split("\r\n\r\n").flat_map(|b| b.split("\n\n"));
    let message_block = blocks.next().unwrap_or_default();

    for line in message_block.lines() {
        if let Some((key, value)) = line.split_once(':') {
            match key.trim().to_ascii_lowercase().as_str() {
                "reporting-mta" => dsn.reporting_mta = Some(strip_type_prefix(value)),
                "arrival-date" => dsn.arrival_date = Some(value.trim().to_string()),
                "x-original-message-id" => dsn.original_message_id = Some(value.trim().to_string()),
                _ => {}
            }
        }
    }

    for block in blocks {
        if block.trim().is_empty() {
            continue;
        }
        let mut rs = RecipientStatus {
            original_recipient: None,
            final_recipient: None,
            action: None,
            status: None,
            remote_mta: None,
            diagnostic_code: None,
            last_attempt_date: None,
            class: BounceClass::Undetermined,
            hard_bounce_subreason: None,
        };
        for line in block.lines() {
            let Some((key, value)) = line.split_once(':') else {
                continue;
            };
            match key.trim().to_ascii_lowercase().as_str() {
                "original-recipient" => rs.original_recipient = Some(strip_type_prefix(value)),
                "final-recipient" => rs.final_recipient = Some(strip_type_prefix(value)),
                "action" => rs.action = Some(value.trim().to_string()),
                "status" => rs.status = Some(value.trim().to_string()),
                "remote-mta" => rs.remote_mta = Some(strip_type_prefix(value)),
                "diagnostic-code" => rs.diagnostic_code = Some(strip_type_prefix(value)),
                "last-attempt-date" => rs.last_attempt_date = Some(value.trim().to_string()),
                _ => {}
            }
        }
        if rs.final_recipient.is_none() && rs.status.is_none() {
            continue;
        }
        rs.class = rs
            .status
            .as_deref()
            .map(classify_status)
            .unwrap_or(BounceClass::Undetermined);
        if rs.class == BounceClass::Hard {
            rs.hard_bounce_subreason = rs.diagnostic_code.as_deref().and_then(hard_bounce_subreason);
        }
        dsn.per_recipient.push(rs);
    }

    dsn
}

/// Parse a raw `multipart/report` DSN. Extracts the `message/delivery-status`
/// part via the outer boundary; if no multipart structure is found, accepts
/// the whole body provided it looks like a delivery-status block.
pub fn parse(raw: &str) -> Result<ParsedDsn, ParseError> {
    let message = MessageParser::default()
        .parse(raw.as_bytes())
        .ok_or_else(|| ParseError("not a valid MIME message".to_string()))?;

    for part in message.parts.iter() {
        let content_type = part.content_type();
        if let Some(ct) = content_type
            && ct.ctype().eq_ignore_ascii_case("message")
            && ct
                .subtype()
                .is_some_and(|st| st.eq_ignore_ascii_case("delivery-status"))
        {
            let text = String::from_utf8_lossy(part.contents());
            return Ok(parse_delivery_status_part(&text));
        }
    }

    // No explicit delivery-status part found: accept the raw body if it
    // looks like one.
    if raw.contains("Original-Recipient") || raw.contains("Final-Recipient") {
        return Ok(parse_delivery_status_part(raw));
    }

    Err(ParseError(
        "no message/delivery-status part and body has no recognisable DSN fields".to_string(),
    ))
}

/// First 1 KB of the original message headers embedded in the DSN's third
/// part, if present — used only for operator-facing context, never parsed.
pub fn extract_original_headers(raw: &str) -> Option<String> {
    let idx = raw.find("\r\n\r\n").or_else(|| raw.find("\n\n"))?;
    let rest = &raw[idx..];
    Some(rest.chars().take(1024).collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_hard_bounce() -> String {
        concat!(
            "Reporting-MTA: dns; mx.example.com\r\n",
            "Arrival-Date: Mon, 1 Jan 2024 00:00:00 +0000\r\n",
            "\r\n",
            "Original-Recipient: rfc822;bob@example.com\r\n",
            "Final-Recipient: rfc822;bob@example.com\r\n",
            "Action: failed\r\n",
            "Status: 5.1.1\r\n",
            "Remote-MTA: dns; mx.receiver.com\r\n",
            "Diagnostic-Code: smtp; 550 5.1.1 user unknown\r\n",
            "Last-Attempt-Date: Mon, 1 Jan 2024 00:00:01 +0000\r\n",
        )
        .to_string()
    }

    #[test]
    fn parses_per_recipient_and_message_fields() {
        let parsed = parse_delivery_status_part(&sample_hard_bounce());
        assert_eq!(parsed.reporting_mta.as_deref(), Some("mx.example.com"));
        assert_eq!(parsed.per_recipient.len(), 1);
        let r = &parsed.per_recipient[0];
        assert_eq!(r.final_recipient.as_deref(), Some("bob@example.com"));
        assert_eq!(r.class, BounceClass::Hard);
        assert_eq!(r.hard_bounce_subreason.as_deref(), Some("user"));
    }

    #[test]
    fn falls_back_to_whole_body_without_boundary() {
        let raw = sample_hard_bounce();
        let parsed = parse(&raw).unwrap();
        assert_eq!(parsed.overall_class(), BounceClass::Hard);
    }

    #[test]
    fn soft_bounce_is_not_suppressed() {
        let raw = sample_hard_bounce().replace("5.1.1", "4.2.2");
        let parsed = parse(&raw).unwrap();
        assert_eq!(parsed.overall_class(), BounceClass::Soft);
        assert!(!parsed.overall_class().should_suppress());
    }

    #[test]
    fn rejects_unrelated_body() {
        assert!(parse("just some random text").is_err());
    }
}
