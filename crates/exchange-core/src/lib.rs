//! Exchange Core Library
//!
//! Shared types, the exchange API client, configuration, and settlement
//! persistence for the live market feed.

pub mod api;
pub mod config;
pub mod db;
pub mod error;
pub mod market_set;
pub mod types;

pub use error::{Error, Result};
