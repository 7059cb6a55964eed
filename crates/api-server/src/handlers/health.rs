//! Health check handlers.

use axum::extract::State;
use axum::Json;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use utoipa::ToSchema;

use crate::state::AppState;

/// Health check response.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    /// `ok`, or `degraded` while there is no exchange session.
    pub status: String,
    /// Whether an exchange session is currently held.
    pub authenticated: bool,
    /// Open stream connections.
    pub subscriber_count: usize,
    /// Markets known to the poller.
    pub tracked_markets: usize,
    /// Completion time of the most recent poll tick.
    pub last_tick_at: Option<DateTime<Utc>>,
}

/// Health check endpoint.
#[utoipa::path(
    get,
    path = "/health",
    tag = "health",
    responses(
        (status = 200, description = "Service status", body = HealthResponse)
    )
)]
pub async fn health_check(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    let authenticated = state.sessions.is_authenticated();
    Json(HealthResponse {
        status: if authenticated { "ok" } else { "degraded" }.to_string(),
        authenticated,
        subscriber_count: state.broadcaster.subscriber_count(),
        tracked_markets: state.poller_stats.tracked_markets(),
        last_tick_at: state.poller_stats.last_tick_at(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broadcaster::{Broadcaster, OverflowPolicy};
    use async_trait::async_trait;
    use auth::{Authenticator, SessionManager};
    use exchange_core::api::SessionToken;
    use market_poller::PollerStats;
    use std::time::Duration;

    struct FixedToken;

    #[async_trait]
    impl Authenticator for FixedToken {
        async fn login(&self) -> auth::Result<SessionToken> {
            Ok(SessionToken::new("fixed"))
        }
    }

    fn state() -> Arc<AppState> {
        Arc::new(AppState::new(
            Broadcaster::new(8, OverflowPolicy::DropNewest),
            Arc::new(SessionManager::new(Arc::new(FixedToken))),
            Arc::new(PollerStats::new()),
            Duration::from_secs(30),
        ))
    }

    #[tokio::test]
    async fn test_health_degraded_until_authenticated() {
        let state = state();
        let _sub = state.broadcaster.subscribe().unwrap();

        let response = health_check(State(state.clone())).await;
        assert_eq!(response.status, "degraded");
        assert!(!response.authenticated);
        assert_eq!(response.subscriber_count, 1);
        assert!(response.last_tick_at.is_none());

        state.sessions.ensure_valid().await.unwrap();
        let response = health_check(State(state)).await;
        assert_eq!(response.status, "ok");
        assert!(response.authenticated);
    }

    #[test]
    fn test_health_response_is_camel_case() {
        let json = serde_json::to_value(HealthResponse {
            status: "ok".to_string(),
            authenticated: true,
            subscriber_count: 2,
            tracked_markets: 5,
            last_tick_at: None,
        })
        .unwrap();
        assert_eq!(json["subscriberCount"], 2);
        assert_eq!(json["trackedMarkets"], 5);
        assert!(json["lastTickAt"].is_null());
    }
}
