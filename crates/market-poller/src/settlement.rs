//! Final positions and odds for closed markets.

use chrono::{DateTime, Utc};
use exchange_core::db::{PersistOutcome, ResultsSink};
use exchange_core::types::{MarketBook, OddsSource, Runner, RunnerResult, RunnerStatus, SettlementResult};
use std::sync::Arc;
use tracing::{debug, info};

/// Derive per-runner results from a closed market book.
///
/// Winners take positions `1..=k` in the order the exchange lists them (more
/// than one on a dead heat). Placed runners continue from `k + 1`, also in
/// listing order: the feed carries no finishing order beyond this, so
/// positions for placed runners are best effort. Losers and removed runners
/// get no position.
pub fn resolve(book: &MarketBook, settled_at: DateTime<Utc>) -> SettlementResult {
    let winners = book
        .runners
        .iter()
        .filter(|r| r.status == RunnerStatus::Winner);
    let placed = book
        .runners
        .iter()
        .filter(|r| r.status == RunnerStatus::Placed);

    let mut positions = std::collections::HashMap::new();
    for (index, runner) in winners.chain(placed).enumerate() {
        positions.insert(runner.selection_id, index as u32 + 1);
    }

    let runner_results = book
        .runners
        .iter()
        .map(|runner| {
            let (final_odds, odds_source) = final_odds(runner);
            RunnerResult {
                selection_id: runner.selection_id,
                status: runner.status,
                final_position: positions.get(&runner.selection_id).copied(),
                final_odds,
                odds_source,
            }
        })
        .collect();

    SettlementResult {
        market_id: book.market_id.clone(),
        runner_results,
        settled_at,
    }
}

/// Reconciled starting price when the exchange supplies one, else last traded.
fn final_odds(runner: &Runner) -> (Option<rust_decimal::Decimal>, OddsSource) {
    if let Some(sp) = runner.sp.as_ref().and_then(|sp| sp.actual_sp) {
        return (Some(sp), OddsSource::StartingPrice);
    }
    match runner.last_price_traded {
        Some(ltp) => (Some(ltp), OddsSource::LastTraded),
        None => (None, OddsSource::Unavailable),
    }
}

/// Writes settlements through a [`ResultsSink`].
pub struct SettlementResolver {
    sink: Arc<dyn ResultsSink>,
}

impl SettlementResolver {
    pub fn new(sink: Arc<dyn ResultsSink>) -> Self {
        Self { sink }
    }

    /// Persist a resolved settlement. A row that already exists counts as
    /// success; any other error is returned so the caller can retry.
    pub async fn persist(&self, result: &SettlementResult) -> exchange_core::Result<PersistOutcome> {
        let outcome = self
            .sink
            .persist_settlement(&result.market_id, &result.runner_results, result.settled_at)
            .await?;

        match outcome {
            PersistOutcome::Inserted => info!(
                market_id = %result.market_id,
                winners = result.winners().count(),
                runners = result.runner_results.len(),
                "Settlement persisted"
            ),
            PersistOutcome::AlreadyExists => debug!(
                market_id = %result.market_id,
                "Settlement already stored"
            ),
        }
        Ok(outcome)
    }
}
