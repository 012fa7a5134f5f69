use serde::{Deserialize, Serialize};

/// Closed wire-level error taxonomy (spec §7). `aborted` is carried here
/// for completeness even though it is emitted as `stream{aborted:true}` /
/// `generation_aborted` rather than an `error` frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    NotFound,
    PermissionDenied,
    InvalidInput,
    ContentBlocked,
    InsufficientCredits,
    PricingNotConfigured,
    ModelNotFound,
    NoApiKey,
    RateLimited,
    Overloaded,
    ContextTooLong,
    AuthFailed,
    ConnectionError,
    RequestTimeout,
    ServerError,
    EndpointNotFound,
    Aborted,
    Generic,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::NotFound => "not_found",
            ErrorCode::PermissionDenied => "permission_denied",
            ErrorCode::InvalidInput => "invalid_input",
            ErrorCode::ContentBlocked => "content_blocked",
            ErrorCode::InsufficientCredits => "insufficient_credits",
            ErrorCode::PricingNotConfigured => "pricing_not_configured",
            ErrorCode::ModelNotFound => "model_not_found",
            ErrorCode::NoApiKey => "no_api_key",
            ErrorCode::RateLimited => "rate_limited",
            ErrorCode::Overloaded => "overloaded",
            ErrorCode::ContextTooLong => "context_too_long",
            ErrorCode::AuthFailed => "auth_failed",
            ErrorCode::ConnectionError => "connection_error",
            ErrorCode::RequestTimeout => "request_timeout",
            ErrorCode::ServerError => "server_error",
            ErrorCode::EndpointNotFound => "endpoint_not_found",
            ErrorCode::Aborted => "aborted",
            ErrorCode::Generic => "generic",
        }
    }
}

impl From<&braid_core::BraidError> for ErrorCode {
    fn from(e: &braid_core::BraidError) -> Self {
        match e.code() {
            "not_found" => ErrorCode::NotFound,
            "permission_denied" => ErrorCode::PermissionDenied,
            "invalid_input" => ErrorCode::InvalidInput,
            "insufficient_credits" => ErrorCode::InsufficientCredits,
            "pricing_not_configured" => ErrorCode::PricingNotConfigured,
            "model_not_found" => ErrorCode::ModelNotFound,
            _ => ErrorCode::Generic,
        }
    }
}
