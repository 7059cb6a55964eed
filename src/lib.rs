//! Racefeed: live exchange market feed
//!
//! Root crate re-exporting the workspace members for integration tests and
//! benchmarks. For actual functionality, use the individual crates directly:
//!
//! - `exchange-core`: types, exchange API client, configuration, persistence
//! - `auth`: login strategies and session management
//! - `market-poller`: polling loop, change detection, settlement capture
//! - `api-server`: broadcaster, SSE stream, health endpoint, service binary

pub use api_server as server;
pub use auth;
pub use exchange_core as core;
pub use market_poller as poller;
