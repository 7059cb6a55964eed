//! Market fingerprinting and no-op update suppression.
//!
//! A fingerprint is a SHA-256 over a canonical text form of the market:
//! market status and in-play flag, then one line per runner sorted by
//! selection id carrying status, last traded price and best back/lay.
//! Decimals are normalised so `3.40` and `3.4` hash alike. Server-side
//! counters and timestamps never enter the hash.

use exchange_core::types::{MarketBook, PriceSize, Runner};
use rust_decimal::Decimal;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::fmt::{self, Write};

#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Fingerprint([u8; 32]);

impl Fingerprint {
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

impl fmt::Debug for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Fingerprint({})", &hex::encode(self.0)[..12])
    }
}

/// Canonical text form of the meaningful parts of a market.
pub fn canonical_form(book: &MarketBook) -> String {
    let mut runners: Vec<&Runner> = book.runners.iter().collect();
    runners.sort_by_key(|r| r.selection_id);

    let mut out = String::with_capacity(32 + runners.len() * 48);
    let _ = writeln!(out, "{}|{}", book.status.as_str(), book.inplay);
    for runner in runners {
        let _ = writeln!(
            out,
            "{}|{}|{}|{}|{}",
            runner.selection_id,
            runner.status.as_str(),
            decimal_field(runner.last_price_traded),
            level_field(runner.best_back()),
            level_field(runner.best_lay()),
        );
    }
    out
}

pub fn fingerprint(book: &MarketBook) -> Fingerprint {
    let digest = Sha256::digest(canonical_form(book).as_bytes());
    let mut bytes = [0u8; 32];
    bytes.copy_from_slice(&digest);
    Fingerprint(bytes)
}

fn decimal_field(value: Option<Decimal>) -> String {
    value
        .map(|d| d.normalize().to_string())
        .unwrap_or_else(|| "-".to_string())
}

fn level_field(level: Option<PriceSize>) -> String {
    match level {
        Some(l) => format!("{}@{}", l.price.normalize(), l.size.normalize()),
        None => "-".to_string(),
    }
}

/// Last published fingerprint per market.
#[derive(Debug, Default)]
pub struct ChangeDetector {
    seen: HashMap<String, Fingerprint>,
}

impl ChangeDetector {
    pub fn new() -> Self {
        Self::default()
    }

    /// True on first sighting or when the fingerprint differs from the stored
    /// one. The stored fingerprint is replaced either way.
    pub fn has_changed(&mut self, market_id: &str, fp: Fingerprint) -> bool {
        match self.seen.insert(market_id.to_string(), fp) {
            Some(previous) => previous != fp,
            None => true,
        }
    }

    pub fn last(&self, market_id: &str) -> Option<Fingerprint> {
        self.seen.get(market_id).copied()
    }

    pub fn forget(&mut self, market_id: &str) {
        self.seen.remove(market_id);
    }

    pub fn len(&self) -> usize {
        self.seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use exchange_core::types::MarketStatus;

    fn book(json: serde_json::Value) -> MarketBook {
        serde_json::from_value(json).unwrap()
    }

    fn two_runner_book() -> serde_json::Value {
        serde_json::json!({
            "marketId": "1.100",
            "status": "OPEN",
            "inplay": false,
            "version": 10,
            "runners": [
                {"selectionId": 1, "status": "ACTIVE", "lastPriceTraded": 2.5,
                 "ex": {"availableToBack": [{"price": 2.48, "size": 100}],
                        "availableToLay": [{"price": 2.52, "size": 80}]}},
                {"selectionId": 2, "status": "ACTIVE", "lastPriceTraded": 3.1}
            ]
        })
    }

    #[test]
    fn test_runner_order_does_not_matter() {
        let a = book(two_runner_book());
        let mut b = a.clone();
        b.runners.reverse();

        assert_eq!(fingerprint(&a), fingerprint(&b));
    }

    #[test]
    fn test_volatile_fields_are_ignored() {
        let a = book(two_runner_book());
        let mut b = a.clone();
        b.version = Some(11);
        b.total_matched = Some(Decimal::new(99999, 2));
        b.runners[0].total_matched = Some(Decimal::new(5, 0));

        assert_eq!(fingerprint(&a), fingerprint(&b));
    }

    #[test]
    fn test_decimal_scale_is_normalised() {
        let a = book(two_runner_book());
        let mut b = a.clone();
        b.runners[1].last_price_traded = Some(Decimal::new(310, 2));

        assert_eq!(fingerprint(&a), fingerprint(&b));
    }

    #[test]
    fn test_meaningful_changes_alter_fingerprint() {
        let base = book(two_runner_book());
        let fp = fingerprint(&base);

        let mut price = base.clone();
        price.runners[0].last_price_traded = Some(Decimal::new(26, 1));
        assert_ne!(fingerprint(&price), fp);

        let mut status = base.clone();
        status.status = MarketStatus::Suspended;
        assert_ne!(fingerprint(&status), fp);

        let mut lay = base.clone();
        lay.runners[0].ex.available_to_lay.clear();
        assert_ne!(fingerprint(&lay), fp);

        let mut inplay = base;
        inplay.inplay = true;
        assert_ne!(fingerprint(&inplay), fp);
    }

    #[test]
    fn test_has_changed_tracks_latest() {
        let a = book(two_runner_book());
        let mut b = a.clone();
        b.runners[0].last_price_traded = Some(Decimal::new(27, 1));

        let mut detector = ChangeDetector::new();
        assert!(detector.has_changed("1.100", fingerprint(&a)));
        assert!(!detector.has_changed("1.100", fingerprint(&a)));
        assert!(detector.has_changed("1.100", fingerprint(&b)));
        // Reverting is a change too: only the latest fingerprint is kept.
        assert!(detector.has_changed("1.100", fingerprint(&a)));
        assert_eq!(detector.last("1.100"), Some(fingerprint(&a)));
        assert_eq!(detector.len(), 1);
    }
}
