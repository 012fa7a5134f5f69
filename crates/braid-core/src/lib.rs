pub mod config;
pub mod content_filter;
pub mod error;
pub mod types;

pub use content_filter::{ContentFilter, FilterResult, SimpleContentFilter};
pub use error::{BraidError, Result};
