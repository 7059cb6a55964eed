//! Providers of the market IDs to track.
//!
//! Mapping race meetings onto exchange markets happens elsewhere; these providers
//! only surface the resulting IDs.

use crate::Result;
use async_trait::async_trait;
use parking_lot::RwLock;
use sqlx::PgPool;

/// Source of the current set of market IDs, queried once per poll tick.
#[async_trait]
pub trait MarketSetProvider: Send + Sync {
    async fn get_market_ids(&self) -> Result<Vec<String>>;
}

/// Configuration-backed market set. Can be replaced at runtime.
#[derive(Debug, Default)]
pub struct StaticMarketSet {
    market_ids: RwLock<Vec<String>>,
}

impl StaticMarketSet {
    pub fn new(market_ids: Vec<String>) -> Self {
        Self {
            market_ids: RwLock::new(dedup_preserving_order(market_ids)),
        }
    }

    pub fn replace(&self, market_ids: Vec<String>) {
        *self.market_ids.write() = dedup_preserving_order(market_ids);
    }
}

#[async_trait]
impl MarketSetProvider for StaticMarketSet {
    async fn get_market_ids(&self) -> Result<Vec<String>> {
        Ok(self.market_ids.read().clone())
    }
}

/// Reads matched market IDs from the `races` table, skipping markets that already
/// have a stored settlement.
pub struct PgMarketSet {
    pool: PgPool,
}

impl PgMarketSet {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl MarketSetProvider for PgMarketSet {
    async fn get_market_ids(&self) -> Result<Vec<String>> {
        let rows: Vec<(String,)> = sqlx::query_as(
            r#"
            SELECT DISTINCT r.market_id
            FROM races r
            LEFT JOIN market_settlements s ON s.market_id = r.market_id
            WHERE r.market_id IS NOT NULL
              AND r.market_id <> ''
              AND s.market_id IS NULL
            ORDER BY r.market_id
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(|(id,)| id).collect())
    }
}

fn dedup_preserving_order(ids: Vec<String>) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    ids.into_iter()
        .map(|id| id.trim().to_string())
        .filter(|id| !id.is_empty() && seen.insert(id.clone()))
        .collect()
}
