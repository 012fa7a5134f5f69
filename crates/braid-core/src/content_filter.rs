use async_trait::async_trait;

/// Outcome of running user- or model-produced text through moderation.
#[derive(Debug, Clone, Default)]
pub struct FilterResult {
    pub blocked: bool,
    pub reason: Option<String>,
    pub categories: Vec<String>,
}

impl FilterResult {
    pub fn allowed() -> Self {
        Self::default()
    }

    pub fn blocked(reason: impl Into<String>, categories: Vec<String>) -> Self {
        Self {
            blocked: true,
            reason: Some(reason.into()),
            categories,
        }
    }
}

/// Consumed by both `ConversationOps` preflight (on user input) and
/// `GenerationCoordinator` (on the accumulated model output) — spec §4.6,
/// §4.8.
#[async_trait]
pub trait ContentFilter: Send + Sync {
    async fn check(&self, text: &str) -> FilterResult;
}

/// Substring-blocklist test double. Not a real moderation pipeline — a
/// production deployment would wire in a provider's moderation endpoint
/// behind this same trait.
#[derive(Debug, Clone, Default)]
pub struct SimpleContentFilter {
    blocked_terms: Vec<String>,
}

impl SimpleContentFilter {
    pub fn new(blocked_terms: Vec<String>) -> Self {
        Self { blocked_terms }
    }
}

#[async_trait]
impl ContentFilter for SimpleContentFilter {
    async fn check(&self, text: &str) -> FilterResult {
        let lower = text.to_lowercase();
        for term in &self.blocked_terms {
            if lower.contains(&term.to_lowercase()) {
                return FilterResult::blocked(
                    format!("matched blocked term \"{term}\""),
                    vec!["blocklist".to_string()],
                );
            }
        }
        FilterResult::allowed()
    }
}
