//! Market-book types as returned by the exchange.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Market lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MarketStatus {
    Open,
    Suspended,
    Closed,
    Inactive,
}

impl MarketStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            MarketStatus::Open => "OPEN",
            MarketStatus::Suspended => "SUSPENDED",
            MarketStatus::Closed => "CLOSED",
            MarketStatus::Inactive => "INACTIVE",
        }
    }

    pub fn is_closed(&self) -> bool {
        matches!(self, MarketStatus::Closed)
    }
}

impl fmt::Display for MarketStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Runner (selection) status within a market.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunnerStatus {
    Active,
    Winner,
    Placed,
    Loser,
    #[serde(alias = "REMOVED_VACANT", alias = "HIDDEN")]
    Removed,
}

impl RunnerStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunnerStatus::Active => "ACTIVE",
            RunnerStatus::Winner => "WINNER",
            RunnerStatus::Placed => "PLACED",
            RunnerStatus::Loser => "LOSER",
            RunnerStatus::Removed => "REMOVED",
        }
    }
}

/// A single price level offered on the exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceSize {
    pub price: Decimal,
    pub size: Decimal,
}

/// Available-to-back / available-to-lay ladders, best price first.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ExchangePrices {
    pub available_to_back: Vec<PriceSize>,
    pub available_to_lay: Vec<PriceSize>,
}

/// Starting-price projection. `actual_sp` is only present once the market has reconciled.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StartingPrices {
    pub near_price: Option<Decimal>,
    pub far_price: Option<Decimal>,
    #[serde(rename = "actualSP")]
    pub actual_sp: Option<Decimal>,
}

/// Runner entry within a market book.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Runner {
    pub selection_id: i64,
    pub status: RunnerStatus,
    #[serde(default)]
    pub last_price_traded: Option<Decimal>,
    #[serde(default)]
    pub total_matched: Option<Decimal>,
    #[serde(default)]
    pub ex: ExchangePrices,
    #[serde(default)]
    pub sp: Option<StartingPrices>,
}

impl Runner {
    pub fn best_back(&self) -> Option<PriceSize> {
        self.ex.available_to_back.first().copied()
    }

    pub fn best_lay(&self) -> Option<PriceSize> {
        self.ex.available_to_lay.first().copied()
    }
}

/// Live snapshot of one market (`listMarketBook` element).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MarketBook {
    pub market_id: String,
    pub status: MarketStatus,
    #[serde(default)]
    pub inplay: bool,
    #[serde(default)]
    pub runners: Vec<Runner>,
    /// Server-side change counter; volatile, excluded from fingerprints.
    #[serde(default)]
    pub version: Option<i64>,
    /// Volatile, excluded from fingerprints.
    #[serde(default)]
    pub last_match_time: Option<DateTime<Utc>>,
    /// Volatile, excluded from fingerprints.
    #[serde(default)]
    pub total_matched: Option<Decimal>,
}

/// Per-runner view carried in an update event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunnerSnapshot {
    pub selection_id: i64,
    pub status: RunnerStatus,
    #[serde(rename = "lastPriceTraded")]
    pub last_traded_price: Option<Decimal>,
    pub best_back: Option<PriceSize>,
    pub best_lay: Option<PriceSize>,
}

impl From<&Runner> for RunnerSnapshot {
    fn from(runner: &Runner) -> Self {
        Self {
            selection_id: runner.selection_id,
            status: runner.status,
            last_traded_price: runner.last_price_traded,
            best_back: runner.best_back(),
            best_lay: runner.best_lay(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const BOOK_JSON: &str = r#"{
        "marketId": "1.230001",
        "isMarketDataDelayed": false,
        "status": "OPEN",
        "inplay": false,
        "version": 4471,
        "totalMatched": 1520.55,
        "lastMatchTime": "2026-10-19T03:21:44.000Z",
        "runners": [
            {
                "selectionId": 101,
                "handicap": 0.0,
                "status": "ACTIVE",
                "lastPriceTraded": 3.45,
                "ex": {
                    "availableToBack": [{"price": 3.4, "size": 20.5}, {"price": 3.35, "size": 5}],
                    "availableToLay": [{"price": 3.5, "size": 11}],
                    "tradedVolume": []
                }
            },
            {
                "selectionId": 102,
                "handicap": 0.0,
                "status": "REMOVED_VACANT"
            }
        ]
    }"#;

    #[test]
    fn test_market_book_deserialization() {
        let book: MarketBook = serde_json::from_str(BOOK_JSON).unwrap();

        assert_eq!(book.market_id, "1.230001");
        assert_eq!(book.status, MarketStatus::Open);
        assert_eq!(book.version, Some(4471));
        assert_eq!(book.runners.len(), 2);
        assert_eq!(book.runners[0].last_price_traded, Some(Decimal::new(345, 2)));
        assert_eq!(book.runners[1].status, RunnerStatus::Removed);
        assert!(book.runners[1].ex.available_to_back.is_empty());
    }

    #[test]
    fn test_best_prices_take_top_of_ladder() {
        let book: MarketBook = serde_json::from_str(BOOK_JSON).unwrap();
        let snapshot = RunnerSnapshot::from(&book.runners[0]);

        assert_eq!(snapshot.best_back.unwrap().price, Decimal::new(34, 1));
        assert_eq!(snapshot.best_lay.unwrap().price, Decimal::new(35, 1));

        let removed = RunnerSnapshot::from(&book.runners[1]);
        assert!(removed.best_back.is_none());
        assert!(removed.last_traded_price.is_none());
    }

    #[test]
    fn test_unknown_status_rejected() {
        let json = r#"{"marketId": "1.1", "status": "EXPLODED", "runners": []}"#;
        assert!(serde_json::from_str::<MarketBook>(json).is_err());
    }

    #[test]
    fn test_snapshot_serializes_camel_case() {
        let book: MarketBook = serde_json::from_str(BOOK_JSON).unwrap();
        let json = serde_json::to_value(RunnerSnapshot::from(&book.runners[0])).unwrap();

        assert_eq!(json["selectionId"], 101);
        assert_eq!(json["status"], "ACTIVE");
        assert!(json.get("lastPriceTraded").is_some());
        assert!(json.get("bestBack").is_some());
    }
}
