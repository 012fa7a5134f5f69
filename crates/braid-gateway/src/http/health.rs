use std::sync::Arc;

use axum::{extract::State, Json};
use serde_json::{json, Value};

use crate::app::AppState;

/// GET /health — liveness probe, mirroring the teacher's `/health` shape
/// (status/version/protocol/live-connection-count) generalized to
/// braidchat's session registry.
pub async fn health_handler(State(state): State<Arc<AppState>>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "protocol": braid_core::config::PROTOCOL_VERSION,
        "connections": state.connections.session_count(),
    }))
}
