use thiserror::Error;

/// The closed error taxonomy shared by every subsystem (spec §7).
///
/// `code()` gives the wire-level string clients key their UI off of; this
/// mirrors the teacher's `SkynetError::code()` mapping.
#[derive(Debug, Error)]
pub enum BraidError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("permission denied: {0}")]
    PermissionDenied(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("insufficient credits")]
    InsufficientCredits,

    #[error("pricing not configured for model {0}")]
    PricingNotConfigured(String),

    #[error("model not found: {0}")]
    ModelNotFound(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("database error: {0}")]
    Database(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("internal error: {0}")]
    Internal(String),
}

impl BraidError {
    /// Wire-level error code string, sent to clients in `error` frames.
    pub fn code(&self) -> &'static str {
        match self {
            BraidError::NotFound(_) => "not_found",
            BraidError::PermissionDenied(_) => "permission_denied",
            BraidError::InvalidInput(_) => "invalid_input",
            BraidError::InsufficientCredits => "insufficient_credits",
            BraidError::PricingNotConfigured(_) => "pricing_not_configured",
            BraidError::ModelNotFound(_) => "model_not_found",
            BraidError::Config(_) => "config_error",
            BraidError::Database(_) => "database_error",
            BraidError::Serialization(_) => "invalid_input",
            BraidError::Internal(_) => "generic",
        }
    }
}

pub type Result<T> = std::result::Result<T, BraidError>;
