//! API Server
//!
//! Local streaming surface for the market feed.
//!
//! # Features
//!
//! - **SSE**: `GET /stream` pushes `market_update`, `market_closed` and heartbeat frames
//! - **Health**: `GET /health` reports session and subscriber state
//! - **OpenAPI**: Swagger UI at `/swagger-ui`
//!
//! # Example
//!
//! ```ignore
//! use api_server::{ApiServer, ServerConfig};
//!
//! let config = ServerConfig::from_env()?;
//! let server = ApiServer::new(config, state);
//! server.run(shutdown).await?;
//! ```

pub mod broadcaster;
pub mod error;
pub mod handlers;
pub mod routes;
pub mod sse;
pub mod state;

pub use broadcaster::{Broadcaster, DeliveryOutcome, OverflowPolicy, PublishReport, Subscription};
pub use error::ApiError;
pub use routes::create_router;
pub use state::AppState;

use anyhow::Context;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Host to bind to.
    pub host: String,
    /// Port to listen on.
    pub port: u16,
    /// Enable CORS for all origins.
    pub cors_permissive: bool,
    /// Seconds of silence before a stream sends a heartbeat.
    pub heartbeat_secs: u64,
    /// Per-subscriber queue bound.
    pub queue_capacity: usize,
    pub overflow_policy: OverflowPolicy,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
            cors_permissive: true,
            heartbeat_secs: 30,
            queue_capacity: 256,
            overflow_policy: OverflowPolicy::DropNewest,
        }
    }
}

impl ServerConfig {
    /// Create from environment variables.
    pub fn from_env() -> anyhow::Result<Self> {
        let defaults = Self::default();
        let config = Self {
            host: std::env::var("API_HOST").unwrap_or(defaults.host),
            // PORT wins over API_PORT
            port: match std::env::var("PORT").or_else(|_| std::env::var("API_PORT")) {
                Ok(port) => port.parse().context("PORT must be a valid port number")?,
                Err(_) => defaults.port,
            },
            cors_permissive: std::env::var("CORS_PERMISSIVE")
                .map(|v| v == "true")
                .unwrap_or(defaults.cors_permissive),
            heartbeat_secs: match std::env::var("SSE_HEARTBEAT_SECS") {
                Ok(secs) => secs
                    .parse()
                    .context("SSE_HEARTBEAT_SECS must be a whole number of seconds")?,
                Err(_) => defaults.heartbeat_secs,
            },
            queue_capacity: match std::env::var("SSE_QUEUE_CAPACITY") {
                Ok(capacity) => capacity
                    .parse()
                    .context("SSE_QUEUE_CAPACITY must be a positive integer")?,
                Err(_) => defaults.queue_capacity,
            },
            overflow_policy: match std::env::var("SSE_OVERFLOW_POLICY") {
                Ok(policy) => policy.parse().map_err(anyhow::Error::msg)?,
                Err(_) => defaults.overflow_policy,
            },
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        anyhow::ensure!(self.heartbeat_secs > 0, "heartbeat interval must be positive");
        anyhow::ensure!(self.queue_capacity > 0, "subscriber queue capacity must be positive");
        Ok(())
    }

    pub fn heartbeat(&self) -> Duration {
        Duration::from_secs(self.heartbeat_secs)
    }

    /// Get the socket address.
    pub fn socket_addr(&self) -> anyhow::Result<SocketAddr> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .with_context(|| format!("invalid listen address {}:{}", self.host, self.port))
    }

    /// Build the subscriber registry with this configuration's bounds.
    pub fn broadcaster(&self) -> Broadcaster {
        Broadcaster::new(self.queue_capacity, self.overflow_policy)
    }
}

/// The API server.
pub struct ApiServer {
    config: ServerConfig,
    state: Arc<AppState>,
}

impl ApiServer {
    pub fn new(config: ServerConfig, state: AppState) -> Self {
        Self {
            config,
            state: Arc::new(state),
        }
    }

    /// Serve until `shutdown` fires. Open streams are closed first so the
    /// graceful drain does not wait on them.
    pub async fn run(self, shutdown: CancellationToken) -> anyhow::Result<()> {
        let router = create_router(self.state.clone(), self.config.cors_permissive);

        let addr = self.config.socket_addr()?;
        info!(address = %addr, "Starting API server");

        let listener = tokio::net::TcpListener::bind(addr)
            .await
            .with_context(|| format!("failed to bind {}", addr))?;

        let broadcaster = self.state.broadcaster.clone();
        axum::serve(listener, router)
            .with_graceful_shutdown(async move {
                shutdown.cancelled().await;
                broadcaster.close_all();
            })
            .await?;

        info!("API server stopped");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = ServerConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.heartbeat(), Duration::from_secs(30));
        assert_eq!(config.socket_addr().unwrap().port(), 3000);
    }

    #[test]
    fn test_zero_capacity_rejected() {
        let config = ServerConfig {
            queue_capacity: 0,
            ..ServerConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_bad_host_rejected() {
        let config = ServerConfig {
            host: "not a host".to_string(),
            ..ServerConfig::default()
        };
        assert!(config.socket_addr().is_err());
    }
}
