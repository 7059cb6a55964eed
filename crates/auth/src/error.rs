//! Authentication error types.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum AuthError {
    /// The exchange rejected the login (bad credentials, locked account, ...).
    #[error("Login rejected: {reason}")]
    InvalidCredentials { reason: String },

    /// The client certificate or key could not be read or decoded.
    #[error("Client certificate unusable: {message}")]
    Certificate { message: String },

    #[error("No authentication strategy configured")]
    NotConfigured,

    /// Network or upstream failure during login; retried on the caller's schedule.
    #[error("Login transport error: {0}")]
    Transport(#[from] exchange_core::Error),
}

impl AuthError {
    /// Failures that need operator action rather than another attempt.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            AuthError::InvalidCredentials { .. }
                | AuthError::Certificate { .. }
                | AuthError::NotConfigured
        )
    }
}

pub type Result<T> = std::result::Result<T, AuthError>;
