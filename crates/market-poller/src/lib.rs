//! Market Poller
//!
//! Background pipeline that polls exchange market books, suppresses unchanged
//! markets, captures settlements and hands update events to a publisher.

pub mod backoff;
pub mod change_detector;
pub mod poller;
pub mod settlement;
pub mod state;

pub use backoff::Backoff;
pub use change_detector::{fingerprint, ChangeDetector, Fingerprint};
pub use poller::{EventPublisher, Poller, PollerHandle, TickReport};
pub use settlement::{resolve, SettlementResolver};
pub use state::{PollerState, PollerStats, PollerStatsSnapshot, TrackedMarket};
