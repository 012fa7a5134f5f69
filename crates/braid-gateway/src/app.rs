use std::collections::HashMap;
use std::sync::Arc;

use axum::{routing::get, Router};
use braid_conversation::system_prompt::CliModeConfig;
use braid_core::config::BraidConfig;
use braid_core::{ContentFilter, SimpleContentFilter};
use braid_generation::{CancellationRegistry, ModelClient, ModelPrice, MockModelClient, Pricing, TablePricing, Usage};
use braid_rooms::{ConnectionRegistry, RoomRegistry};
use braid_store::{BranchStore, InMemoryStore, SqliteStore};

/// Central shared state, passed as `Arc<AppState>` to every axum handler —
/// the same "one struct, clone the Arc" shape as the teacher's
/// `skynet-gateway::app::AppState`, generalized to braidchat's collaborator
/// set (`BranchStore`/`ModelClient`/`Pricing`/`ContentFilter` instead of
/// the teacher's agent/channel managers).
pub struct AppState {
    pub config: BraidConfig,
    pub connections: ConnectionRegistry,
    pub rooms: RoomRegistry,
    pub cancellation: CancellationRegistry,
    pub store: Arc<dyn BranchStore>,
    pub content_filter: Arc<dyn ContentFilter>,
    pub model_client: Arc<dyn ModelClient>,
    pub pricing: Arc<dyn Pricing>,
    pub cli_mode: CliModeConfig,
}

impl AppState {
    pub fn new(config: BraidConfig) -> Self {
        let store: Arc<dyn BranchStore> = if config.database.path == ":memory:" {
            Arc::new(InMemoryStore::new())
        } else {
            match open_sqlite_store(&config.database.path) {
                Ok(store) => Arc::new(store),
                Err(e) => {
                    tracing::warn!(error = %e, "failed to open sqlite store, falling back to in-memory");
                    Arc::new(InMemoryStore::new())
                }
            }
        };

        let pricing_table: HashMap<String, ModelPrice> = config
            .pricing
            .iter()
            .map(|(model, price)| {
                (
                    model.clone(),
                    ModelPrice {
                        input_per_million: price.input_per_million,
                        output_per_million: price.output_per_million,
                    },
                )
            })
            .collect();

        let cli_mode = CliModeConfig::from(&config.generation);

        Self {
            config,
            connections: ConnectionRegistry::new(),
            rooms: RoomRegistry::new(),
            cancellation: CancellationRegistry::new(),
            store,
            content_filter: Arc::new(SimpleContentFilter::default()),
            model_client: Arc::new(MockModelClient::new(vec![], Usage::default())),
            pricing: Arc::new(TablePricing::from_table(pricing_table)),
            cli_mode,
        }
    }
}

fn open_sqlite_store(path: &str) -> anyhow::Result<SqliteStore> {
    if let Some(parent) = std::path::Path::new(path).parent() {
        let _ = std::fs::create_dir_all(parent);
    }
    let conn = rusqlite::Connection::open(path)?;
    Ok(SqliteStore::new(conn)?)
}

/// Assembles the full axum router (spec §6's WS transport plus the
/// ambient `/health` probe).
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(crate::http::health::health_handler))
        .route("/ws", get(crate::ws::connection::ws_handler))
        .with_state(state)
        .layer(tower_http::trace::TraceLayer::new_for_http())
}
