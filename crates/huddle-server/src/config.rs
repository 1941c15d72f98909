//! Server configuration loaded from environment variables.
//!
//! All settings have defaults so the relay can start with zero
//! configuration for local development.

use std::net::SocketAddr;

use huddle_shared::constants::{DEFAULT_HTTP_PORT, DEFAULT_RATE_LIMIT_WINDOW_MS};

/// Development-only shared secret. Startup warns while it is in use.
pub const DEV_AGENT_SECRET: &str = "your_super_secret_webhook_token_here";

#[derive(Clone)]
pub struct ServerConfig {
    /// Socket address for HTTP and WebSocket traffic.
    /// Env: `HTTP_ADDR`
    /// Default: `0.0.0.0:3000`
    pub http_addr: SocketAddr,

    /// Webhook of the external agent service.
    /// Env: `AGENT_SERVICE_URL`
    /// Default: `http://localhost:8000/webhook`
    pub agent_service_url: String,

    /// Bearer secret shared with the agent service, used in both directions.
    /// Env: `AGENT_SERVICE_SECRET`
    pub agent_service_secret: String,

    /// Cooldown between agent triggers per identity.
    /// Env: `RATE_LIMIT_WINDOW_MS`
    /// Default: `100000`
    pub rate_limit_window_ms: u64,

    /// How often stale rate-limit entries are evicted.
    /// Env: `RATE_LIMIT_PURGE_INTERVAL_SECS`
    /// Default: `300`
    pub rate_limit_purge_interval_secs: u64,

    /// WebSocket keepalive ping interval.
    /// Env: `WS_PING_INTERVAL_SECS`
    /// Default: `30`
    pub ping_interval_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http_addr: ([0, 0, 0, 0], DEFAULT_HTTP_PORT).into(),
            agent_service_url: "http://localhost:8000/webhook".to_string(),
            agent_service_secret: DEV_AGENT_SECRET.to_string(),
            rate_limit_window_ms: DEFAULT_RATE_LIMIT_WINDOW_MS,
            rate_limit_purge_interval_secs: 300,
            ping_interval_secs: 30,
        }
    }
}

impl std::fmt::Debug for ServerConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerConfig")
            .field("http_addr", &self.http_addr)
            .field("agent_service_url", &self.agent_service_url)
            .field("agent_service_secret", &"<redacted>")
            .field("rate_limit_window_ms", &self.rate_limit_window_ms)
            .field(
                "rate_limit_purge_interval_secs",
                &self.rate_limit_purge_interval_secs,
            )
            .field("ping_interval_secs", &self.ping_interval_secs)
            .finish()
    }
}

impl ServerConfig {
    /// Load configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(addr) = lookup("HTTP_ADDR") {
            if let Ok(parsed) = addr.parse::<SocketAddr>() {
                config.http_addr = parsed;
            } else {
                tracing::warn!(value = %addr, "Invalid HTTP_ADDR, using default");
            }
        }

        if let Some(url) = lookup("AGENT_SERVICE_URL") {
            if !url.trim().is_empty() {
                config.agent_service_url = url.trim().to_string();
            }
        }

        if let Some(secret) = lookup("AGENT_SERVICE_SECRET") {
            if !secret.is_empty() {
                config.agent_service_secret = secret;
            }
        }

        if let Some(val) = lookup("RATE_LIMIT_WINDOW_MS") {
            match val.parse::<u64>() {
                Ok(ms) => config.rate_limit_window_ms = ms,
                Err(_) => {
                    tracing::warn!(value = %val, "Invalid RATE_LIMIT_WINDOW_MS, using default")
                }
            }
        }

        if let Some(val) = lookup("RATE_LIMIT_PURGE_INTERVAL_SECS") {
            match val.parse::<u64>() {
                Ok(secs) if secs > 0 => config.rate_limit_purge_interval_secs = secs,
                _ => tracing::warn!(
                    value = %val,
                    "Invalid RATE_LIMIT_PURGE_INTERVAL_SECS, using default"
                ),
            }
        }

        if let Some(val) = lookup("WS_PING_INTERVAL_SECS") {
            match val.parse::<u64>() {
                Ok(secs) if secs > 0 => config.ping_interval_secs = secs,
                _ => tracing::warn!(value = %val, "Invalid WS_PING_INTERVAL_SECS, using default"),
            }
        }

        // RUST_LOG is handled directly by tracing-subscriber's EnvFilter,
        // so we do not store it here.

        config
    }

    pub fn uses_dev_secret(&self) -> bool {
        self.agent_service_secret == DEV_AGENT_SECRET
    }
}
