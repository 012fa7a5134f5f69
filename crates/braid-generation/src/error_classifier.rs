use braid_protocol::ErrorCode;

/// A classified provider error, ready to go out as an `error` frame (or, for
/// `Aborted`, handled separately by the coordinator as `stream{aborted:true}`
/// + `generation_aborted` rather than an `error` event — spec §4.10 rule 1).
#[derive(Debug, Clone)]
pub struct Classified {
    pub code: ErrorCode,
    pub message: String,
    pub suggestion: Option<String>,
}

const MAX_MESSAGE_LEN: usize = 300;

/// Maps a provider's raw error text into the fixed taxonomy of spec §4.10.
/// Matching is case-insensitive substring, first rule wins — deterministic
/// and total, per spec §8's testable property.
pub fn classify(raw: &str) -> Classified {
    let lower = raw.to_lowercase();

    let rule = |needle: &str| lower.contains(needle);
    let all = |needles: &[&str]| needles.iter().all(|n| lower.contains(n));

    if rule("aborted") {
        return Classified {
            code: ErrorCode::Aborted,
            message: "generation aborted".to_string(),
            suggestion: None,
        };
    }
    if rule("rate limit") || rule("429") {
        return Classified {
            code: ErrorCode::RateLimited,
            message: "the model provider is rate-limiting requests".to_string(),
            suggestion: Some("wait a moment and try again".to_string()),
        };
    }
    if rule("no api key") || rule("api key") {
        return Classified {
            code: ErrorCode::NoApiKey,
            message: "no API key is configured for this model's provider".to_string(),
            suggestion: Some("add an API key in settings".to_string()),
        };
    }
    if rule("overloaded") || rule("503") {
        return Classified {
            code: ErrorCode::Overloaded,
            message: "the model provider is overloaded".to_string(),
            suggestion: Some("try again shortly".to_string()),
        };
    }
    if all(&["context", "long"]) {
        return Classified {
            code: ErrorCode::ContextTooLong,
            message: "the conversation is too long for this model's context window".to_string(),
            suggestion: Some("start a new conversation or edit an earlier message".to_string()),
        };
    }
    if rule("content") && (rule("filter") || rule("flagged") || rule("policy")) {
        return Classified {
            code: ErrorCode::ContentBlocked,
            message: "the provider declined to generate a response for this content".to_string(),
            suggestion: None,
        };
    }
    if rule("401") {
        return Classified {
            code: ErrorCode::AuthFailed,
            message: "authentication with the model provider failed".to_string(),
            suggestion: Some("check your API key".to_string()),
        };
    }
    if rule("econnrefused") || rule("network") || rule("etimedout") {
        return Classified {
            code: ErrorCode::ConnectionError,
            message: "could not connect to the model provider".to_string(),
            suggestion: Some("check your network connection".to_string()),
        };
    }
    if rule("timeout") {
        return Classified {
            code: ErrorCode::RequestTimeout,
            message: "the request to the model provider timed out".to_string(),
            suggestion: None,
        };
    }
    if rule("500") || rule("server error") {
        return Classified {
            code: ErrorCode::ServerError,
            message: "the model provider returned a server error".to_string(),
            suggestion: None,
        };
    }
    if rule("404") || rule("not found") {
        return Classified {
            code: ErrorCode::EndpointNotFound,
            message: "the model provider endpoint was not found".to_string(),
            suggestion: None,
        };
    }
    if all(&["insufficient", "credit"]) {
        return Classified {
            code: ErrorCode::InsufficientCredits,
            message: "insufficient credits to complete this request".to_string(),
            suggestion: Some("add credits or an API key".to_string()),
        };
    }

    let message = extract_embedded_json_message(raw).unwrap_or_else(|| raw.to_string());
    Classified {
        code: ErrorCode::Generic,
        message: truncate(&message),
        suggestion: None,
    }
}

fn extract_embedded_json_message(raw: &str) -> Option<String> {
    let start = raw.find('{')?;
    let value: serde_json::Value = serde_json::from_str(&raw[start..]).ok()?;
    value
        .get("message")
        .and_then(|m| m.as_str())
        .map(|s| s.to_string())
}

fn truncate(s: &str) -> String {
    if s.len() <= MAX_MESSAGE_LEN {
        return s.to_string();
    }
    let mut cut = MAX_MESSAGE_LEN;
    while !s.is_char_boundary(cut) {
        cut -= 1;
    }
    format!("{}...", &s[..cut])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rate_limit_wins_over_generic() {
        let c = classify("Error: rate limit exceeded, try later");
        assert_eq!(c.code, ErrorCode::RateLimited);
    }

    #[test]
    fn first_matching_rule_wins() {
        // contains both "aborted" and "rate limit" -- rule 1 must win.
        let c = classify("request aborted due to rate limit");
        assert_eq!(c.code, ErrorCode::Aborted);
    }

    #[test]
    fn context_too_long_requires_both_words() {
        assert_eq!(classify("context window exceeded, too long").code, ErrorCode::ContextTooLong);
        assert_eq!(classify("long pause before response").code, ErrorCode::Generic);
    }

    #[test]
    fn embedded_json_message_extracted() {
        let raw = r#"upstream 400: {"error": {"message": "bad request shape"}, "message": "bad request shape"}"#;
        let c = classify(raw);
        assert_eq!(c.code, ErrorCode::Generic);
        assert_eq!(c.message, "bad request shape");
    }

    #[test]
    fn overflow_is_truncated_with_ellipsis() {
        let raw = "x".repeat(400);
        let c = classify(&raw);
        assert!(c.message.ends_with("..."));
        assert_eq!(c.message.len(), MAX_MESSAGE_LEN + 3);
    }

    #[test]
    fn is_deterministic() {
        assert_eq!(classify("ECONNREFUSED").code, classify("econnrefused").code);
    }
}
