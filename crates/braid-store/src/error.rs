use thiserror::Error;

/// Errors raised by a `BranchStore` implementation, wrapped into
/// `braid_core::BraidError` at the call boundary.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl From<StoreError> for braid_core::BraidError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound(s) => braid_core::BraidError::NotFound(s),
            StoreError::InvalidInput(s) => braid_core::BraidError::InvalidInput(s),
            StoreError::Sqlite(err) => braid_core::BraidError::Database(err.to_string()),
            StoreError::Serialization(err) => braid_core::BraidError::Serialization(err),
        }
    }
}

pub type Result<T> = std::result::Result<T, StoreError>;
