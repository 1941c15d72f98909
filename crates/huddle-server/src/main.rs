//! # huddle-server
//!
//! Real-time chat relay.
//!
//! This binary provides:
//! - **WebSocket relay** for a shared general room plus per-pair DM rooms,
//!   with multi-tab presence and a live connection count
//! - **Agent bridge**: `@agent` mentions in the general room are forwarded to
//!   an external agent service (rate-limited per user), whose answers come
//!   back through an authenticated callback and are broadcast to the room
//! - **REST endpoints** (axum) for health checks and the agent callback
//!
//! Nothing is persisted: delivery is best-effort to currently connected
//! sockets only.

mod agent;
mod api;
mod clock;
mod config;
mod error;
mod hub;
mod rate_limit;
mod registry;
mod rooms;
mod router;
mod ws;

use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::agent::AgentBridge;
use crate::api::AppState;
use crate::config::ServerConfig;
use crate::hub::Hub;
use crate::rate_limit::RateLimiter;
use crate::router::MessageRouter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // -----------------------------------------------------------------------
    // 1. Initialize tracing (respects RUST_LOG env var)
    // -----------------------------------------------------------------------
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,huddle_server=debug")),
        )
        .init();

    info!("Starting huddle relay v{}", env!("CARGO_PKG_VERSION"));

    // -----------------------------------------------------------------------
    // 2. Load configuration
    // -----------------------------------------------------------------------
    let config = ServerConfig::from_env();
    info!(?config, "Loaded configuration");
    if config.uses_dev_secret() {
        warn!("AGENT_SERVICE_SECRET not set, using the development secret");
    }

    // -----------------------------------------------------------------------
    // 3. Initialize subsystems
    // -----------------------------------------------------------------------
    let hub = Hub::new();
    let rate_limiter = RateLimiter::new();
    let bridge = AgentBridge::new(&config.agent_service_url, &config.agent_service_secret);

    let router = Arc::new(MessageRouter::new(
        hub.clone(),
        rate_limiter.clone(),
        Arc::new(bridge),
        config.rate_limit_window_ms,
    ));

    let app_state = AppState {
        hub,
        router,
        config: Arc::new(config.clone()),
    };

    // -----------------------------------------------------------------------
    // 4. Spawn background tasks
    // -----------------------------------------------------------------------

    // Periodic eviction of agent cooldowns that have fully elapsed
    let rl = rate_limiter.clone();
    let window_ms = config.rate_limit_window_ms;
    let purge_every = Duration::from_secs(config.rate_limit_purge_interval_secs);
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(purge_every);
        loop {
            interval.tick().await;
            rl.purge_stale(clock::now_millis(), window_ms).await;
        }
    });

    // -----------------------------------------------------------------------
    // 5. Run the HTTP + WebSocket server (blocks until shutdown)
    // -----------------------------------------------------------------------
    tokio::select! {
        result = api::serve(app_state, config.http_addr) => {
            if let Err(e) = result {
                tracing::error!(error = %e, "HTTP server failed");
                return Err(e);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down");
        }
    }

    Ok(())
}
