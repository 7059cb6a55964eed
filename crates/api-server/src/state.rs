//! Application state shared across handlers.

use auth::SessionManager;
use market_poller::PollerStats;
use std::sync::Arc;
use std::time::Duration;

use crate::broadcaster::Broadcaster;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    /// Subscriber registry fed by the poller.
    pub broadcaster: Broadcaster,
    /// Exchange session, read for health reporting.
    pub sessions: Arc<SessionManager>,
    pub poller_stats: Arc<PollerStats>,
    /// Idle time after which a stream sends a heartbeat frame.
    pub heartbeat: Duration,
}

impl AppState {
    pub fn new(
        broadcaster: Broadcaster,
        sessions: Arc<SessionManager>,
        poller_stats: Arc<PollerStats>,
        heartbeat: Duration,
    ) -> Self {
        Self {
            broadcaster,
            sessions,
            poller_stats,
            heartbeat,
        }
    }
}
