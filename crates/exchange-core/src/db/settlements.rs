//! Settlement persistence.

use crate::types::{RunnerResult, SettlementResult};
use crate::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use sqlx::types::Json;
use sqlx::PgPool;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use tracing::debug;

/// Result of a persistence attempt. A duplicate write is a success, not an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PersistOutcome {
    Inserted,
    AlreadyExists,
}

/// Durable store for settlement results.
///
/// Implementations must enforce uniqueness per `market_id` themselves so that
/// repeated calls (retried ticks, process restarts) write at most once.
#[async_trait]
pub trait ResultsSink: Send + Sync {
    async fn persist_settlement(
        &self,
        market_id: &str,
        results: &[RunnerResult],
        settled_at: DateTime<Utc>,
    ) -> Result<PersistOutcome>;
}

/// Repository for settlement data.
pub struct SettlementRepository {
    pool: PgPool,
}

impl SettlementRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ResultsSink for SettlementRepository {
    async fn persist_settlement(
        &self,
        market_id: &str,
        results: &[RunnerResult],
        settled_at: DateTime<Utc>,
    ) -> Result<PersistOutcome> {
        let mut tx = self.pool.begin().await?;

        let inserted = sqlx::query(
            r#"
            INSERT INTO market_settlements (market_id, settled_at, runner_results)
            VALUES ($1, $2, $3)
            ON CONFLICT (market_id) DO NOTHING
            "#,
        )
        .bind(market_id)
        .bind(settled_at)
        .bind(Json(results))
        .execute(&mut *tx)
        .await?
        .rows_affected();

        if inserted == 0 {
            tx.rollback().await?;
            debug!(market_id = %market_id, "Settlement already stored");
            return Ok(PersistOutcome::AlreadyExists);
        }

        for result in results {
            sqlx::query(
                r#"
                INSERT INTO runner_settlements (
                    market_id, selection_id, final_position, final_odds, odds_source
                )
                VALUES ($1, $2, $3, $4, $5)
                "#,
            )
            .bind(market_id)
            .bind(result.selection_id)
            .bind(result.final_position.map(|p| p as i32))
            .bind(result.final_odds)
            .bind(result.odds_source.as_str())
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        debug!(market_id = %market_id, runners = results.len(), "Settlement rows written");
        Ok(PersistOutcome::Inserted)
    }
}

/// In-memory sink with the same uniqueness guarantee as the database.
#[derive(Default)]
pub struct InMemoryResultsSink {
    stored: Mutex<HashMap<String, SettlementResult>>,
    calls: AtomicUsize,
}

impl InMemoryResultsSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, market_id: &str) -> Option<SettlementResult> {
        self.stored.lock().get(market_id).cloned()
    }

    pub fn len(&self) -> usize {
        self.stored.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.stored.lock().is_empty()
    }

    /// Number of `persist_settlement` calls, including duplicates.
    pub fn persist_calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ResultsSink for InMemoryResultsSink {
    async fn persist_settlement(
        &self,
        market_id: &str,
        results: &[RunnerResult],
        settled_at: DateTime<Utc>,
    ) -> Result<PersistOutcome> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let mut stored = self.stored.lock();
        if stored.contains_key(market_id) {
            return Ok(PersistOutcome::AlreadyExists);
        }
        stored.insert(
            market_id.to_string(),
            SettlementResult {
                market_id: market_id.to_string(),
                runner_results: results.to_vec(),
                settled_at,
            },
        );
        Ok(PersistOutcome::Inserted)
    }
}
