//! Settlement results captured when a market closes.

use super::RunnerStatus;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Where a runner's final odds came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OddsSource {
    /// Reconciled starting price reported by the exchange.
    StartingPrice,
    /// Last traded price before the market closed.
    LastTraded,
    /// Neither price was available.
    Unavailable,
}

impl OddsSource {
    /// Value stored in the `odds_source` column.
    pub fn as_str(&self) -> &'static str {
        match self {
            OddsSource::StartingPrice => "betfair_sp",
            OddsSource::LastTraded => "betfair_ltp",
            OddsSource::Unavailable => "none",
        }
    }
}

/// Final outcome for one runner.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunnerResult {
    pub selection_id: i64,
    pub status: RunnerStatus,
    /// `None` for losers and removed runners: the feed does not publish a full finishing order.
    pub final_position: Option<u32>,
    pub final_odds: Option<Decimal>,
    pub odds_source: OddsSource,
}

/// Final per-runner outcomes for a closed market.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SettlementResult {
    pub market_id: String,
    pub runner_results: Vec<RunnerResult>,
    pub settled_at: DateTime<Utc>,
}

impl SettlementResult {
    pub fn runner(&self, selection_id: i64) -> Option<&RunnerResult> {
        self.runner_results
            .iter()
            .find(|r| r.selection_id == selection_id)
    }

    /// Runners settled as winners; more than one on a dead heat.
    pub fn winners(&self) -> impl Iterator<Item = &RunnerResult> {
        self.runner_results
            .iter()
            .filter(|r| r.status == RunnerStatus::Winner)
    }
}
