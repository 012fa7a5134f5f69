use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::model_client::Usage;

/// Per-million-token prices for one model, in one currency (spec §1's
/// consumed `Pricing` service). `Serialize`/`Deserialize` so a deployment
/// can populate the table from `braid.toml` rather than code.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ModelPrice {
    pub input_per_million: f64,
    pub output_per_million: f64,
}

impl ModelPrice {
    pub fn cost(&self, usage: Usage) -> f64 {
        (usage.tokens_in as f64 / 1_000_000.0) * self.input_per_million
            + (usage.tokens_out as f64 / 1_000_000.0) * self.output_per_million
    }
}

#[async_trait]
pub trait Pricing: Send + Sync {
    /// `None` means the model has no configured price — the caller surfaces
    /// `pricing_not_configured` (spec §4.7, §7).
    async fn price(&self, model: &str) -> Option<ModelPrice>;

    /// Currency the debit should be made in for this model (spec §6
    /// `GetApplicableGrantCurrencies`, consulted by `CreditGate` too).
    fn currency(&self, _model: &str) -> String {
        "usd".to_string()
    }
}

/// Static-table default implementation.
#[derive(Debug, Clone, Default)]
pub struct TablePricing {
    table: HashMap<String, ModelPrice>,
}

impl TablePricing {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_price(mut self, model: impl Into<String>, price: ModelPrice) -> Self {
        self.table.insert(model.into(), price);
        self
    }

    /// Builds the table straight from a config-loaded map (`braid.toml`'s
    /// `[pricing]` section).
    pub fn from_table(table: HashMap<String, ModelPrice>) -> Self {
        Self { table }
    }
}

#[async_trait]
impl Pricing for TablePricing {
    async fn price(&self, model: &str) -> Option<ModelPrice> {
        self.table.get(model).copied()
    }
}
