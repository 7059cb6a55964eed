//! Server-sent event stream of market updates.

use axum::extract::State;
use axum::response::sse::{Event, Sse};
use chrono::{DateTime, Utc};
use exchange_core::types::{PriceSize, RunnerSnapshot, UpdateEvent, UpdateKind};
use futures_util::stream::{self, Stream, StreamExt};
use rust_decimal::Decimal;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use utoipa::ToSchema;

use crate::broadcaster::Subscription;
use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

/// One frame on the wire.
#[derive(Debug, Clone)]
pub enum Frame {
    Connected {
        subscriber_id: u64,
        connected_at: DateTime<Utc>,
    },
    Update(Arc<UpdateEvent>),
    Heartbeat(DateTime<Utc>),
}

impl Frame {
    pub fn name(&self) -> &'static str {
        match self {
            Frame::Connected { .. } => "connected",
            Frame::Update(event) => event.kind().as_str(),
            Frame::Heartbeat(_) => "heartbeat",
        }
    }

    /// JSON body of the frame.
    pub fn payload(&self) -> serde_json::Result<String> {
        match self {
            Frame::Connected {
                subscriber_id,
                connected_at,
            } => serde_json::to_string(&ConnectedPayload {
                subscriber_id: *subscriber_id,
                connected_at: *connected_at,
            }),
            Frame::Update(event) => match event.kind() {
                UpdateKind::MarketUpdate => {
                    serde_json::to_string(&MarketUpdatePayload::from(event.as_ref()))
                }
                UpdateKind::MarketClosed => {
                    serde_json::to_string(&MarketClosedPayload::from(event.as_ref()))
                }
            },
            Frame::Heartbeat(timestamp) => serde_json::to_string(&HeartbeatPayload {
                timestamp: *timestamp,
            }),
        }
    }

    pub fn into_event(self) -> Result<Event, axum::Error> {
        let data = self.payload().map_err(axum::Error::new)?;
        Ok(Event::default().event(self.name()).data(data))
    }
}

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ConnectedPayload {
    pub subscriber_id: u64,
    pub connected_at: DateTime<Utc>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct HeartbeatPayload {
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct PricePayload {
    #[schema(value_type = String)]
    pub price: Decimal,
    #[schema(value_type = String)]
    pub size: Decimal,
}

impl From<PriceSize> for PricePayload {
    fn from(level: PriceSize) -> Self {
        Self {
            price: level.price,
            size: level.size,
        }
    }
}

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct RunnerPayload {
    pub selection_id: i64,
    pub status: String,
    #[schema(value_type = Option<String>)]
    pub last_price_traded: Option<Decimal>,
    pub best_back: Option<PricePayload>,
    pub best_lay: Option<PricePayload>,
}

impl From<&RunnerSnapshot> for RunnerPayload {
    fn from(runner: &RunnerSnapshot) -> Self {
        Self {
            selection_id: runner.selection_id,
            status: runner.status.as_str().to_string(),
            last_price_traded: runner.last_traded_price,
            best_back: runner.best_back.map(PricePayload::from),
            best_lay: runner.best_lay.map(PricePayload::from),
        }
    }
}

/// `market_update` frame body.
#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct MarketUpdatePayload {
    pub market_id: String,
    pub status: String,
    pub inplay: bool,
    pub runners: Vec<RunnerPayload>,
    pub timestamp: DateTime<Utc>,
}

impl From<&UpdateEvent> for MarketUpdatePayload {
    fn from(event: &UpdateEvent) -> Self {
        Self {
            market_id: event.market_id.clone(),
            status: event.status.as_str().to_string(),
            inplay: event.inplay,
            runners: event.runners.iter().map(RunnerPayload::from).collect(),
            timestamp: event.timestamp,
        }
    }
}

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ClosedRunnerPayload {
    pub selection_id: i64,
    pub status: String,
    /// Null for losers and removed runners.
    pub final_position: Option<u32>,
    #[schema(value_type = Option<String>)]
    pub final_odds: Option<Decimal>,
    /// `betfair_sp`, `betfair_ltp` or `none`.
    pub odds_source: String,
}

/// `market_closed` frame body.
#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct MarketClosedPayload {
    pub market_id: String,
    pub status: String,
    pub settled_at: DateTime<Utc>,
    pub runners: Vec<ClosedRunnerPayload>,
}

impl From<&UpdateEvent> for MarketClosedPayload {
    fn from(event: &UpdateEvent) -> Self {
        let runners = event
            .runners
            .iter()
            .map(|runner| {
                let result = event
                    .settlement
                    .as_ref()
                    .and_then(|s| s.runner(runner.selection_id));
                ClosedRunnerPayload {
                    selection_id: runner.selection_id,
                    status: runner.status.as_str().to_string(),
                    final_position: result.and_then(|r| r.final_position),
                    final_odds: result.and_then(|r| r.final_odds),
                    odds_source: result
                        .map(|r| r.odds_source.as_str())
                        .unwrap_or("none")
                        .to_string(),
                }
            })
            .collect();

        Self {
            market_id: event.market_id.clone(),
            status: event.status.as_str().to_string(),
            settled_at: event
                .settlement
                .as_ref()
                .map(|s| s.settled_at)
                .unwrap_or(event.timestamp),
            runners,
        }
    }
}

/// Frames for one subscription: `connected` first, then events as they
/// arrive, with a heartbeat whenever nothing arrives within `heartbeat`.
///
/// The stream owns the subscription, so dropping the stream (client gone,
/// write failure, task cancelled) unsubscribes.
pub fn frame_stream(subscription: Subscription, heartbeat: Duration) -> impl Stream<Item = Frame> {
    let connected = Frame::Connected {
        subscriber_id: subscription.id(),
        connected_at: subscription.connected_at(),
    };

    let events = stream::unfold(subscription, move |subscription| async move {
        match tokio::time::timeout(heartbeat, subscription.recv()).await {
            Ok(Some(event)) => Some((Frame::Update(event), subscription)),
            Ok(None) => None,
            Err(_) => {
                tracing::debug!(subscriber_id = subscription.id(), "Heartbeat");
                Some((Frame::Heartbeat(Utc::now()), subscription))
            }
        }
    });

    stream::once(async move { connected }).chain(events)
}

/// Live market update stream.
#[utoipa::path(
    get,
    path = "/stream",
    tag = "stream",
    responses(
        (status = 200, description = "Event stream of connected, market_update, market_closed and heartbeat frames", body = String, content_type = "text/event-stream"),
        (status = 503, description = "Server is shutting down", body = crate::error::ErrorResponse)
    )
)]
pub async fn stream_handler(
    State(state): State<Arc<AppState>>,
) -> ApiResult<Sse<impl Stream<Item = Result<Event, axum::Error>>>> {
    let subscription = state
        .broadcaster
        .subscribe()
        .ok_or_else(|| ApiError::ServiceUnavailable("server is shutting down".to_string()))?;

    let stream = frame_stream(subscription, state.heartbeat).map(Frame::into_event);
    Ok(Sse::new(stream))
}
