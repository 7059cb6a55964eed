//! Poller-owned market state and shared statistics.

use crate::change_detector::{ChangeDetector, Fingerprint};
use chrono::{DateTime, Utc};
use exchange_core::types::{MarketStatus, SettlementResult};
use parking_lot::RwLock;
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

/// What the poller remembers about one market between ticks.
#[derive(Debug, Clone)]
pub struct TrackedMarket {
    pub market_id: String,
    pub last_status: Option<MarketStatus>,
    pub last_fingerprint: Option<Fingerprint>,
    /// Set once the settlement is durably stored.
    pub settled: bool,
    /// Resolved settlement whose write failed; retried on later ticks.
    pub pending_settlement: Option<SettlementResult>,
    pub first_seen_at: DateTime<Utc>,
}

impl TrackedMarket {
    fn new(market_id: &str) -> Self {
        Self {
            market_id: market_id.to_string(),
            last_status: None,
            last_fingerprint: None,
            settled: false,
            pending_settlement: None,
            first_seen_at: Utc::now(),
        }
    }
}

/// State owned exclusively by the poller task.
#[derive(Debug, Default)]
pub struct PollerState {
    pub detector: ChangeDetector,
    markets: HashMap<String, TrackedMarket>,
}

impl PollerState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fetch the tracked entry, creating it on first sighting.
    pub fn track(&mut self, market_id: &str) -> &mut TrackedMarket {
        self.markets
            .entry(market_id.to_string())
            .or_insert_with(|| TrackedMarket::new(market_id))
    }

    pub fn get(&self, market_id: &str) -> Option<&TrackedMarket> {
        self.markets.get(market_id)
    }

    /// Forget markets that left the market set, settled or not, together with
    /// their fingerprints. A market with a settlement write still pending is
    /// kept until the write lands.
    pub fn retain_current(&mut self, current: &[String]) -> usize {
        let current: HashSet<&str> = current.iter().map(String::as_str).collect();
        let stale: Vec<String> = self
            .markets
            .values()
            .filter(|m| m.pending_settlement.is_none() && !current.contains(m.market_id.as_str()))
            .map(|m| m.market_id.clone())
            .collect();

        for market_id in &stale {
            self.markets.remove(market_id);
            self.detector.forget(market_id);
        }
        stale.len()
    }

    /// Settlements resolved earlier whose write has not succeeded yet.
    pub fn pending_settlements(&self) -> Vec<SettlementResult> {
        self.markets
            .values()
            .filter_map(|m| m.pending_settlement.clone())
            .collect()
    }

    pub fn mark_settled(&mut self, market_id: &str) {
        if let Some(market) = self.markets.get_mut(market_id) {
            market.settled = true;
            market.pending_settlement = None;
        }
    }

    pub fn len(&self) -> usize {
        self.markets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.markets.is_empty()
    }

    pub fn settled_count(&self) -> usize {
        self.markets.values().filter(|m| m.settled).count()
    }
}

/// Counters shared with the HTTP surface. Updated by the poller only.
#[derive(Debug, Default)]
pub struct PollerStats {
    ticks: AtomicU64,
    events_published: AtomicU64,
    settlements_persisted: AtomicU64,
    rate_limited: AtomicU64,
    tracked_markets: AtomicUsize,
    last_tick_at: RwLock<Option<DateTime<Utc>>>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PollerStatsSnapshot {
    pub ticks: u64,
    pub events_published: u64,
    pub settlements_persisted: u64,
    pub rate_limited: u64,
    pub tracked_markets: usize,
    pub last_tick_at: Option<DateTime<Utc>>,
}

impl PollerStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record_tick(&self, tracked_markets: usize) {
        self.ticks.fetch_add(1, Ordering::Relaxed);
        self.tracked_markets.store(tracked_markets, Ordering::Relaxed);
        *self.last_tick_at.write() = Some(Utc::now());
    }

    pub(crate) fn record_published(&self) {
        self.events_published.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_settlement(&self) {
        self.settlements_persisted.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_rate_limited(&self) {
        self.rate_limited.fetch_add(1, Ordering::Relaxed);
    }

    pub fn tracked_markets(&self) -> usize {
        self.tracked_markets.load(Ordering::Relaxed)
    }

    pub fn last_tick_at(&self) -> Option<DateTime<Utc>> {
        *self.last_tick_at.read()
    }

    pub fn snapshot(&self) -> PollerStatsSnapshot {
        PollerStatsSnapshot {
            ticks: self.ticks.load(Ordering::Relaxed),
            events_published: self.events_published.load(Ordering::Relaxed),
            settlements_persisted: self.settlements_persisted.load(Ordering::Relaxed),
            rate_limited: self.rate_limited.load(Ordering::Relaxed),
            tracked_markets: self.tracked_markets(),
            last_tick_at: self.last_tick_at(),
        }
    }
}
