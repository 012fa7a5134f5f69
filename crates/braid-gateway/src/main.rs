use std::net::SocketAddr;
use std::sync::Arc;

use tracing::info;

mod app;
mod http;
mod ws;

#[cfg(test)]
mod tests;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "braid_gateway=info,tower_http=debug".into()),
        )
        .init();

    let config_path = std::env::var("BRAID_CONFIG").ok();
    let config = braid_core::config::BraidConfig::load(config_path.as_deref()).unwrap_or_else(|e| {
        tracing::warn!("config load failed ({e}), using defaults");
        braid_core::config::BraidConfig::default()
    });

    let bind = config.gateway.bind.clone();
    let port = config.gateway.port;
    let heartbeat_secs = braid_core::config::HEARTBEAT_INTERVAL_SECS;

    let state = Arc::new(app::AppState::new(config));

    // Spec §4.1: periodic liveness sweep, owned by the gateway process.
    let heartbeat_state = state.clone();
    tokio::spawn(async move {
        let mut tick = tokio::time::interval(std::time::Duration::from_secs(heartbeat_secs));
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tick.tick().await;
            heartbeat_state.connections.heartbeat(&heartbeat_state.rooms);
        }
    });

    let router = app::build_router(state);
    let addr: SocketAddr = format!("{bind}:{port}").parse()?;
    info!(%addr, "braid-gateway listening");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

/// Waits for SIGINT (Ctrl-C) so in-flight generations get a chance to
/// finish their current chunk before the process exits — `axum::serve`'s
/// graceful shutdown stops accepting new connections and waits for
/// existing ones to close on their own rather than severing them.
async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    info!("shutdown signal received, draining connections");
}
