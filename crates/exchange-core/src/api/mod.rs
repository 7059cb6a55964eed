//! Clients for the upstream exchange.

pub mod betting;

pub use betting::{
    market_book_batch_limit, BettingClient, MalformedMarket, MarketBookBatch, MarketBookSource,
    PriceData,
};

use std::fmt;

/// Session token issued by the exchange identity service.
///
/// `Debug` and `Display` never reveal the token itself.
#[derive(Clone, PartialEq, Eq)]
pub struct SessionToken(String);

impl SessionToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    /// Raw value for the `X-Authentication` header.
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for SessionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SessionToken([redacted])")
    }
}

/// Header carrying the application key on every exchange request.
pub const APP_KEY_HEADER: &str = "X-Application";
/// Header carrying the session token on authenticated requests.
pub const SESSION_HEADER: &str = "X-Authentication";
