//! Exchange Authentication
//!
//! Login strategies (certificate and password) and the session manager that
//! caches the exchange session token.

pub mod error;
pub mod login;
pub mod session;

pub use error::{AuthError, Result};
pub use login::{AuthStrategy, Authenticator, IdentityClient};
pub use session::{Session, SessionManager};
