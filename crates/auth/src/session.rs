//! Session lifecycle.
//!
//! [`SessionManager`] caches the current session token and serialises
//! re-authentication: concurrent callers that find no valid session wait on
//! the single login in flight instead of starting their own.

use crate::error::Result;
use crate::login::Authenticator;
use chrono::{DateTime, Utc};
use exchange_core::api::SessionToken;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info};

/// A token together with the time it was issued.
#[derive(Debug, Clone)]
pub struct Session {
    pub token: SessionToken,
    pub acquired_at: DateTime<Utc>,
}

pub struct SessionManager {
    authenticator: Arc<dyn Authenticator>,
    session: Mutex<Option<Session>>,
    authenticated: AtomicBool,
    logins: AtomicU64,
}

impl SessionManager {
    pub fn new(authenticator: Arc<dyn Authenticator>) -> Self {
        Self {
            authenticator,
            session: Mutex::new(None),
            authenticated: AtomicBool::new(false),
            logins: AtomicU64::new(0),
        }
    }

    /// Return the cached token, logging in first if there is none.
    ///
    /// The session lock is held across the login so at most one attempt is in
    /// flight. A failed login leaves the session empty; the caller decides when
    /// to try again.
    pub async fn ensure_valid(&self) -> Result<SessionToken> {
        let mut guard = self.session.lock().await;
        if let Some(session) = guard.as_ref() {
            return Ok(session.token.clone());
        }

        debug!("No cached session, logging in");
        self.logins.fetch_add(1, Ordering::Relaxed);
        let token = self.authenticator.login().await?;
        let session = Session {
            token: token.clone(),
            acquired_at: Utc::now(),
        };
        info!(acquired_at = %session.acquired_at, "Exchange session established");
        *guard = Some(session);
        self.authenticated.store(true, Ordering::Release);
        Ok(token)
    }

    /// Drop the cached session after the exchange rejected it.
    pub async fn invalidate(&self) {
        let mut guard = self.session.lock().await;
        if guard.take().is_some() {
            info!("Exchange session invalidated");
        }
        self.authenticated.store(false, Ordering::Release);
    }

    /// Whether a session is currently held. Lock-free, for health checks.
    pub fn is_authenticated(&self) -> bool {
        self.authenticated.load(Ordering::Acquire)
    }

    pub async fn current(&self) -> Option<Session> {
        self.session.lock().await.clone()
    }

    /// Number of login attempts made so far.
    pub fn login_attempts(&self) -> u64 {
        self.logins.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AuthError;
    use async_trait::async_trait;
    use mockall::{mock, Sequence};
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    mock! {
        pub Login {}

        #[async_trait]
        impl Authenticator for Login {
            async fn login(&self) -> Result<SessionToken>;
        }
    }

    struct SlowAuthenticator {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl Authenticator for SlowAuthenticator {
        async fn login(&self) -> Result<SessionToken> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(50)).await;
            Ok(SessionToken::new(format!("token-{}", n)))
        }
    }

    #[tokio::test]
    async fn test_cached_token_is_reused() {
        let mut login = MockLogin::new();
        login
            .expect_login()
            .times(1)
            .returning(|| Ok(SessionToken::new("abc")));

        let manager = SessionManager::new(Arc::new(login));
        assert!(!manager.is_authenticated());

        let first = manager.ensure_valid().await.unwrap();
        let second = manager.ensure_valid().await.unwrap();
        assert_eq!(first, second);
        assert!(manager.is_authenticated());
        assert_eq!(manager.login_attempts(), 1);
    }

    #[tokio::test]
    async fn test_concurrent_callers_share_one_login() {
        let authenticator = Arc::new(SlowAuthenticator {
            calls: AtomicUsize::new(0),
        });
        let manager = Arc::new(SessionManager::new(authenticator.clone()));

        let handles: Vec<_> = (0..10)
            .map(|_| {
                let manager = manager.clone();
                tokio::spawn(async move { manager.ensure_valid().await })
            })
            .collect();

        for handle in handles {
            let token = handle.await.unwrap().unwrap();
            assert_eq!(token.expose(), "token-0");
        }
        assert_eq!(authenticator.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_invalidate_forces_relogin() {
        let mut seq = Sequence::new();
        let mut login = MockLogin::new();
        login
            .expect_login()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|| Ok(SessionToken::new("first")));
        login
            .expect_login()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|| Ok(SessionToken::new("second")));

        let manager = SessionManager::new(Arc::new(login));
        assert_eq!(manager.ensure_valid().await.unwrap().expose(), "first");

        manager.invalidate().await;
        assert!(!manager.is_authenticated());
        assert!(manager.current().await.is_none());

        assert_eq!(manager.ensure_valid().await.unwrap().expose(), "second");
        assert!(manager.is_authenticated());
    }

    #[tokio::test]
    async fn test_failed_login_is_surfaced_and_retried_later() {
        let mut seq = Sequence::new();
        let mut login = MockLogin::new();
        login
            .expect_login()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|| {
                Err(AuthError::InvalidCredentials {
                    reason: "INVALID_USERNAME_OR_PASSWORD".to_string(),
                })
            });
        login
            .expect_login()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|| Ok(SessionToken::new("recovered")));

        let manager = SessionManager::new(Arc::new(login));
        let err = manager.ensure_valid().await.unwrap_err();
        assert!(err.is_fatal());
        assert!(!manager.is_authenticated());

        assert_eq!(manager.ensure_valid().await.unwrap().expose(), "recovered");
        assert_eq!(manager.login_attempts(), 2);
    }
}
