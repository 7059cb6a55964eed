//! Core domain types for the exchange feed.

pub mod event;
pub mod market;
pub mod settlement;

pub use event::*;
pub use market::*;
pub use settlement::*;
