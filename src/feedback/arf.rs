//! RFC 5965 abuse-reporting-format parser (component C).

use mail_parser::MessageParser;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedbackType {
    Abuse,
    Fraud,
    AuthFailure,
    NotSpam,
    Complaint,
    OptOut,
    Other,
}

impl FeedbackType {
    /// Maps `Feedback-Type` with a fuzzy substring fallback (§4.C, the
    /// richer superset per §9 Open Questions).
    fn from_str(raw: &str) -> Self {
        let lower = raw.trim().to_ascii_lowercase();
        match lower.as_str() {
            "abuse" => FeedbackType::Abuse,
            "fraud" => FeedbackType::Fraud,
            "auth-failure" => FeedbackType::AuthFailure,
            "not-spam" => FeedbackType::NotSpam,
            "complaint" => FeedbackType::Complaint,
            "opt-out" | "unsubscribe" => FeedbackType::OptOut,
            _ => {
                if lower.contains("phish") || lower.contains("spam") {
                    FeedbackType::Abuse
                } else if lower.contains("auth") {
                    FeedbackType::AuthFailure
                } else if lower.contains("unsubscribe") || lower.contains("opt") {
                    FeedbackType::OptOut
                } else {
                    FeedbackType::Other
                }
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthMethod {
    Dkim,
    Spf,
    Dmarc,
}

#[derive(Debug, Clone, Default)]
pub struct ParsedArf {
    pub feedback_type: Option<FeedbackType>,
    pub source_ip: Option<String>,
    pub user_agent: Option<String>,
    pub authentication_results: Option<String>,
    pub arrival_date: Option<String>,
    pub original_from: Option<String>,
    pub original_to: Option<String>,
    pub original_message_id: Option<String>,
    pub original_subject: Option<String>,
    pub auth_method: Option<AuthMethod>,
    pub auth_failure_domain: Option<String>,
    pub original_headers_snippet: Option<String>,
}

#[derive(Debug, thiserror::Error)]
#[error("failed to parse ARF: {0}")]
pub struct ParseError(pub String);

/// Strip an `rfc822;` (or similar) type prefix from an ARF field value, the
/// same shape `dsn.rs::strip_type_prefix` strips from DSN fields.
fn strip_type_prefix(value: &str) -> String {
    match value.split_once(';') {
        Some((_, rest)) => rest.trim().to_string(),
        None => value.trim().to_string(),
    }
}

fn parse_feedback_report_part(text: &str) -> ParsedArf {
    let mut arf = ParsedArf::default();
    for line in text.lines() {
        let Some((key, value)) = line.split_once(':') else {
            continue;
        };
        let value = value.trim();
        match key.trim().to_ascii_lowercase().as_str() {
            "feedback-type" => arf.feedback_type = Some(FeedbackType::from_str(value)),
            "source-ip" => arf.source_ip = Some(value.to_string()),
            "user-agent" => arf.user_agent = Some(value.to_string()),
            "authentication-results" => arf.authentication_results = Some(value.to_string()),
            "arrival-date" => arf.arrival_date = Some(value.to_string()),
            "original-rcpt-to" => arf.original_to = Some(strip_type_prefix(value)),
            "original-mail-from" => arf.original_from = Some(strip_type_prefix(value)),
            "auth-failure" => {
                arf.auth_method = parse_auth_method(value);
            }
            _ => {}
        }
    }
    if arf.auth_method.is_none()
        && let Some(ar) = &arf.authentication_results
    {
        arf.auth_method = parse_auth_method(ar);
    }
    arf
}

fn parse_auth_method(text: &str) -> Option<AuthMethod> {
    let lower = text.to_ascii_lowercase();
    if lower.contains("dkim") {
        Some(AuthMethod::Dkim)
    } else if lower.contains("dmarc") {
        Some(AuthMethod::Dmarc)
    } else if lower.contains("spf") {
        Some(AuthMethod::Spf)
    } else {
        None
    }
}

fn domain_from_address(addr: &str) -> Option<String> {
    addr.rsplit_once('@').map(|(_, d)| d.trim_matches(['<', '>']).to_string())
}

fn parse_original_headers(text: &str) -> (Option<String>, Option<String>, Option<String>, Option<String>) {
    let mut from = None;
    let mut to = None;
    let mut message_id = None;
    let mut subject = None;
    for line in text.lines() {
        let Some((key, value)) = line.split_once(':') else {
            continue;
        };
        let value = value.trim().to_string();
        match key.trim().to_ascii_lowercase().as_str() {
            "from" => from = Some(value),
            "to" | "original-rcpt-to" => to = Some(value),
            "message-id" => message_id = Some(value),
            "subject" => subject = Some(value),
            _ => {}
        }
    }
    (from, to, message_id, subject)
}

/// Parse a raw `multipart/report` ARF. Extracts the `message/feedback-report`
/// part for the structured fields and the trailing `message/rfc822` (or
/// `text/rfc822-headers`) part for original headers.
pub fn parse(raw: &str) -> Result<ParsedArf, ParseError> {
    let message = MessageParser::default()
        .parse(raw.as_bytes())
        .ok_or_else(|| ParseError("not a valid MIME message".to_string()))?;

    let mut feedback_part = None;
    let mut original_headers_text = None;

    for part in message.parts.iter() {
        let Some(ct) = part.content_type() else {
            continue;
        };
        if ct.ctype().eq_ignore_ascii_case("message")
            && ct
                .subtype()
                .is_some_and(|st| st.eq_ignore_ascii_case("feedback-report"))
        {
            feedback_part = Some(String::from_utf8_lossy(part.contents()).to_string());
        } else if (ct.ctype().eq_ignore_ascii_case("message")
            && ct.subtype().is_some_and(|st| st.eq_ignore_ascii_case("rfc822")))
            || (ct.ctype().eq_ignore_ascii_case("text")
                && ct
                    .subtype()
                    .is_some_and(|st| st.eq_ignore_ascii_case("rfc822-headers")))
        {
            original_headers_text = Some(String::from_utf8_lossy(part.contents()).to_string());
        }
    }

    let feedback_text = match feedback_part {
        Some(t) => t,
        None if raw.contains("Feedback-Type") => raw.to_string(),
        None => {
            return Err(ParseError(
                "no message/feedback-report part found".to_string(),
            ));
        }
    };

    let mut arf = parse_feedback_report_part(&feedback_text);
    if arf.feedback_type.is_none() {
        return Err(ParseError(
            "missing required Feedback-Type field".to_string(),
        ));
    }

    if let Some(headers) = original_headers_text {
        let (from, to, message_id, subject) = parse_original_headers(&headers);
        if arf.auth_method.is_some() {
            arf.auth_failure_domain = from.as_deref().and_then(domain_from_address);
        }
        // `Original-Mail-From`/`Original-Rcpt-To` from the feedback-report
        // part (RFC 5965 §3.1) take precedence; the embedded message is
        // often redacted or absent entirely.
        arf.original_from = arf.original_from.or(from);
        arf.original_to = arf.original_to.or(to);
        arf.original_message_id = arf.original_message_id.or(message_id);
        arf.original_subject = arf.original_subject.or(subject);
        arf.original_headers_snippet = Some(headers.chars().take(1000).collect());
    }

    if arf.original_from.is_none() && arf.original_to.is_none() && arf.original_message_id.is_none() {
        return Err(ParseError(
            "missing required original message headers".to_string(),
        ));
    }

    Ok(arf)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_abuse_report() -> String {
        concat!(
            "Feedback-Type: abuse\r\n",
            "User-Agent: SomeGenerator/1.0\r\n",
            "Source-IP: 192.0.2.1\r\n",
            "Arrival-Date: Mon, 1 Jan 2024 00:00:00 +0000\r\n",
            "\r\n",
            "From: alice@example.com\r\n",
            "To: carol@example.com\r\n",
            "Message-ID: <abc@example.com>\r\n",
            "Subject: Hello\r\n",
        )
        .to_string()
    }

    #[test]
    fn parses_abuse_complaint_with_original_headers() {
        let parsed = parse(&sample_abuse_report()).unwrap();
        assert_eq!(parsed.feedback_type, Some(FeedbackType::Abuse));
        assert_eq!(parsed.original_to.as_deref(), Some("carol@example.com"));
    }

    #[test]
    fn fuzzy_fallback_for_unknown_type() {
        let raw = sample_abuse_report().replace("abuse", "possible-phishing-report");
        let parsed = parse(&raw).unwrap();
        assert_eq!(parsed.feedback_type, Some(FeedbackType::Abuse));
    }

    #[test]
    fn auth_failure_derives_method_and_domain() {
        let raw = sample_abuse_report()
            .replace("Feedback-Type: abuse", "Feedback-Type: auth-failure\r\nAuth-Failure: dkim");
        let parsed = parse(&raw).unwrap();
        assert_eq!(parsed.feedback_type, Some(FeedbackType::AuthFailure));
        assert_eq!(parsed.auth_method, Some(AuthMethod::Dkim));
        assert_eq!(parsed.auth_failure_domain.as_deref(), Some("example.com"));
    }

    #[test]
    fn missing_feedback_type_is_invalid() {
        let raw = "From: a@example.com\r\n\r\nTo: b@example.com\r\n";
        assert!(parse(raw).is_err());
    }

    /// Some reporters redact the original message entirely and send only the
    /// feedback-report fields, with the recipient/sender carried in
    /// `Original-Rcpt-To`/`Original-Mail-From` (RFC 5965 §3.1) rather than a
    /// `message/rfc822` part.
    #[test]
    fn feedback_report_fields_alone_satisfy_required_fields() {
        let raw = concat!(
            "Feedback-Type: abuse\r\n",
            "User-Agent: SomeGenerator/1.0\r\n",
            "Source-IP: 192.0.2.1\r\n",
            "Arrival-Date: Mon, 1 Jan 2024 00:00:00 +0000\r\n",
            "Original-Rcpt-To: rfc822;carol@example.com\r\n",
            "Original-Mail-From: rfc822;alice@example.com\r\n",
        );
        let parsed = parse(raw).unwrap();
        assert_eq!(parsed.original_to.as_deref(), Some("carol@example.com"));
        assert_eq!(parsed.original_from.as_deref(), Some("alice@example.com"));
    }
}
