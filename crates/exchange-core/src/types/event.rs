//! Update events fanned out to stream subscribers.

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::market::{MarketBook, MarketStatus, RunnerSnapshot};
use super::settlement::SettlementResult;

/// Kind of frame an event is delivered as.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum UpdateKind {
    MarketUpdate,
    MarketClosed,
}

impl UpdateKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            UpdateKind::MarketUpdate => "market_update",
            UpdateKind::MarketClosed => "market_closed",
        }
    }
}

/// A detected change in one market.
///
/// Events are shared between subscribers behind an `Arc` and never mutated after
/// construction.
#[derive(Debug, Clone, PartialEq)]
pub struct UpdateEvent {
    pub market_id: String,
    pub status: MarketStatus,
    pub inplay: bool,
    pub runners: Vec<RunnerSnapshot>,
    pub timestamp: DateTime<Utc>,
    /// Present only for `market_closed` events.
    pub settlement: Option<SettlementResult>,
}

impl UpdateEvent {
    pub fn market_update(book: &MarketBook, timestamp: DateTime<Utc>) -> Self {
        Self {
            market_id: book.market_id.clone(),
            status: book.status,
            inplay: book.inplay,
            runners: book.runners.iter().map(RunnerSnapshot::from).collect(),
            timestamp,
            settlement: None,
        }
    }

    pub fn market_closed(book: &MarketBook, settlement: SettlementResult) -> Self {
        Self {
            timestamp: settlement.settled_at,
            settlement: Some(settlement),
            ..Self::market_update(book, Utc::now())
        }
    }

    pub fn kind(&self) -> UpdateKind {
        if self.settlement.is_some() {
            UpdateKind::MarketClosed
        } else {
            UpdateKind::MarketUpdate
        }
    }
}
