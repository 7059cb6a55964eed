//! Exchange login strategies.
//!
//! Two ways of obtaining a session token are supported:
//!
//! - **Certificate**: non-interactive login against the cert identity endpoint,
//!   presenting a client certificate alongside the username and password.
//! - **Password**: interactive login with username and password only.
//!
//! When a certificate is configured it is attempted first and the password
//! login is used as the fallback.

use crate::error::{AuthError, Result};
use async_trait::async_trait;
use exchange_core::api::{SessionToken, APP_KEY_HEADER};
use exchange_core::config::{CredentialsConfig, ExchangeConfig};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{error, info, warn};

/// Anything that can produce a fresh session token.
#[async_trait]
pub trait Authenticator: Send + Sync {
    async fn login(&self) -> Result<SessionToken>;
}

/// One way of logging in.
#[derive(Clone)]
pub enum AuthStrategy {
    Certificate {
        username: String,
        password: String,
        cert_path: PathBuf,
        key_path: PathBuf,
    },
    Password {
        username: String,
        password: String,
    },
}

impl AuthStrategy {
    /// Strategies in the order they should be attempted.
    pub fn from_credentials(credentials: &CredentialsConfig) -> Vec<AuthStrategy> {
        let mut strategies = Vec::with_capacity(2);
        if let (Some(cert_path), Some(key_path)) =
            (&credentials.cert_path, &credentials.key_path)
        {
            strategies.push(AuthStrategy::Certificate {
                username: credentials.username.clone(),
                password: credentials.password.clone(),
                cert_path: cert_path.clone(),
                key_path: key_path.clone(),
            });
        }
        strategies.push(AuthStrategy::Password {
            username: credentials.username.clone(),
            password: credentials.password.clone(),
        });
        strategies
    }

    pub fn name(&self) -> &'static str {
        match self {
            AuthStrategy::Certificate { .. } => "certificate",
            AuthStrategy::Password { .. } => "password",
        }
    }
}

impl std::fmt::Debug for AuthStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AuthStrategy::Certificate {
                username,
                cert_path,
                key_path,
                ..
            } => f
                .debug_struct("Certificate")
                .field("username", username)
                .field("password", &"[redacted]")
                .field("cert_path", cert_path)
                .field("key_path", key_path)
                .finish(),
            AuthStrategy::Password { username, .. } => f
                .debug_struct("Password")
                .field("username", username)
                .field("password", &"[redacted]")
                .finish(),
        }
    }
}

/// Login response. The password endpoint answers `{token, status, error}`,
/// the certificate endpoint `{sessionToken, loginStatus}`.
#[derive(Debug, Deserialize)]
struct LoginResponse {
    #[serde(default, alias = "sessionToken")]
    token: Option<String>,
    #[serde(default, alias = "loginStatus")]
    status: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

/// Identity API client implementing the configured strategies in order.
pub struct IdentityClient {
    strategies: Vec<AuthStrategy>,
    app_key: String,
    identity_url: String,
    cert_identity_url: String,
    timeout: Duration,
}

impl IdentityClient {
    pub fn new(exchange: &ExchangeConfig, credentials: &CredentialsConfig) -> Self {
        Self::with_strategies(exchange, AuthStrategy::from_credentials(credentials))
    }

    pub fn with_strategies(exchange: &ExchangeConfig, strategies: Vec<AuthStrategy>) -> Self {
        Self {
            strategies,
            app_key: exchange.app_key.clone(),
            identity_url: exchange.identity_url(),
            cert_identity_url: exchange.cert_identity_url(),
            timeout: exchange.request_timeout(),
        }
    }

    pub fn strategies(&self) -> &[AuthStrategy] {
        &self.strategies
    }

    async fn attempt(&self, strategy: &AuthStrategy) -> Result<SessionToken> {
        match strategy {
            AuthStrategy::Certificate {
                username,
                password,
                cert_path,
                key_path,
            } => {
                let identity = load_identity(cert_path, key_path).await?;
                let client = reqwest::Client::builder()
                    .use_rustls_tls()
                    .identity(identity)
                    .timeout(self.timeout)
                    .build()
                    .map_err(|e| AuthError::Certificate {
                        message: e.to_string(),
                    })?;
                self.post_login(&client, &self.cert_identity_url, username, password)
                    .await
            }
            AuthStrategy::Password { username, password } => {
                let client = reqwest::Client::builder()
                    .timeout(self.timeout)
                    .build()
                    .map_err(exchange_core::Error::from)?;
                self.post_login(&client, &self.identity_url, username, password)
                    .await
            }
        }
    }

    async fn post_login(
        &self,
        client: &reqwest::Client,
        url: &str,
        username: &str,
        password: &str,
    ) -> Result<SessionToken> {
        let response = client
            .post(url)
            .header(APP_KEY_HEADER, &self.app_key)
            .header("Accept", "application/json")
            .form(&[("username", username), ("password", password)])
            .send()
            .await
            .map_err(exchange_core::Error::from_transport)?;

        let status = response.status().as_u16();
        let body = response
            .text()
            .await
            .map_err(exchange_core::Error::from_transport)?;
        interpret_login(status, &body)
    }
}

#[async_trait]
impl Authenticator for IdentityClient {
    async fn login(&self) -> Result<SessionToken> {
        let mut last_error = AuthError::NotConfigured;

        for strategy in &self.strategies {
            match self.attempt(strategy).await {
                Ok(token) => {
                    info!(strategy = strategy.name(), "Exchange login succeeded");
                    return Ok(token);
                }
                Err(e) if e.is_fatal() => {
                    error!(strategy = strategy.name(), error = %e, "Exchange login failed");
                    last_error = e;
                }
                Err(e) => {
                    warn!(strategy = strategy.name(), error = %e, "Exchange login attempt failed");
                    last_error = e;
                }
            }
        }

        Err(last_error)
    }
}

/// Read the client certificate and key and combine them into a TLS identity.
async fn load_identity(cert_path: &Path, key_path: &Path) -> Result<reqwest::Identity> {
    let mut pem = tokio::fs::read(cert_path)
        .await
        .map_err(|e| AuthError::Certificate {
            message: format!("{}: {}", cert_path.display(), e),
        })?;
    let key = tokio::fs::read(key_path)
        .await
        .map_err(|e| AuthError::Certificate {
            message: format!("{}: {}", key_path.display(), e),
        })?;
    pem.push(b'\n');
    pem.extend_from_slice(&key);

    reqwest::Identity::from_pem(&pem).map_err(|e| AuthError::Certificate {
        message: e.to_string(),
    })
}

/// Turn an identity endpoint reply into a token or a classified error.
fn interpret_login(http_status: u16, body: &str) -> Result<SessionToken> {
    if http_status >= 500 {
        return Err(exchange_core::Error::UpstreamUnavailable {
            message: format!("identity endpoint returned HTTP {}", http_status),
        }
        .into());
    }
    if http_status == 429 {
        return Err(exchange_core::Error::RateLimited {
            reason: "identity endpoint returned HTTP 429".to_string(),
        }
        .into());
    }

    let response: LoginResponse =
        serde_json::from_str(body).map_err(|e| exchange_core::Error::MalformedResponse {
            message: format!("login response: {}", e),
        })?;

    match (response.status.as_deref(), response.token) {
        (Some("SUCCESS"), Some(token)) if !token.is_empty() => Ok(SessionToken::new(token)),
        (Some("SUCCESS"), _) => Err(exchange_core::Error::MalformedResponse {
            message: "login succeeded without a session token".to_string(),
        }
        .into()),
        (status, _) => {
            let reason = response
                .error
                .or_else(|| status.map(String::from))
                .unwrap_or_else(|| format!("HTTP {}", http_status));
            Err(AuthError::InvalidCredentials { reason })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use exchange_core::config::Config;

    #[test]
    fn test_password_login_success() {
        let token = interpret_login(
            200,
            r#"{"token":"abc123","product":"app","status":"SUCCESS","error":""}"#,
        )
        .unwrap();
        assert_eq!(token.expose(), "abc123");
    }

    #[test]
    fn test_certificate_login_success() {
        let token =
            interpret_login(200, r#"{"sessionToken":"cert-token","loginStatus":"SUCCESS"}"#)
                .unwrap();
        assert_eq!(token.expose(), "cert-token");
    }

    #[test]
    fn test_rejected_login_is_fatal() {
        let err = interpret_login(
            200,
            r#"{"token":"","status":"FAIL","error":"INVALID_USERNAME_OR_PASSWORD"}"#,
        )
        .unwrap_err();
        assert!(err.is_fatal());
        assert!(err.to_string().contains("INVALID_USERNAME_OR_PASSWORD"));

        let err = interpret_login(200, r#"{"loginStatus":"CERT_AUTH_REQUIRED"}"#).unwrap_err();
        assert!(matches!(err, AuthError::InvalidCredentials { ref reason } if reason == "CERT_AUTH_REQUIRED"));
    }

    #[test]
    fn test_upstream_failures_are_retryable() {
        assert!(!interpret_login(503, "").unwrap_err().is_fatal());
        assert!(!interpret_login(429, "").unwrap_err().is_fatal());
        assert!(!interpret_login(200, "<html>").unwrap_err().is_fatal());
    }

    #[test]
    fn test_strategy_order_prefers_certificate() {
        let mut config = Config::test_config();
        assert_eq!(
            AuthStrategy::from_credentials(&config.credentials)
                .iter()
                .map(AuthStrategy::name)
                .collect::<Vec<_>>(),
            vec!["password"]
        );

        config.credentials.cert_path = Some(PathBuf::from("/etc/feed/client.crt"));
        config.credentials.key_path = Some(PathBuf::from("/etc/feed/client.key"));
        let strategies = AuthStrategy::from_credentials(&config.credentials);
        assert_eq!(strategies.len(), 2);
        assert_eq!(strategies[0].name(), "certificate");
        assert_eq!(strategies[1].name(), "password");
        assert!(!format!("{:?}", strategies[0]).contains("hunter2"));
    }

    #[tokio::test]
    async fn test_missing_certificate_falls_back_to_password() {
        let mut config = Config::test_config();
        config.exchange.identity_url = Some("http://127.0.0.1:1/api/login".to_string());
        config.exchange.request_timeout_secs = 1;
        config.credentials.cert_path = Some(PathBuf::from("/nonexistent/client.crt"));
        config.credentials.key_path = Some(PathBuf::from("/nonexistent/client.key"));

        let client = IdentityClient::new(&config.exchange, &config.credentials);
        let cert_err = client.attempt(&client.strategies()[0]).await.unwrap_err();
        assert!(matches!(cert_err, AuthError::Certificate { .. }));

        // Last error wins: the unreachable password endpoint is a transport failure.
        let err = client.login().await.unwrap_err();
        assert!(matches!(err, AuthError::Transport(_)));
        assert!(!err.is_fatal());
    }

    #[tokio::test]
    async fn test_no_strategies() {
        let config = Config::test_config();
        let client = IdentityClient::with_strategies(&config.exchange, Vec::new());
        assert!(matches!(
            client.login().await.unwrap_err(),
            AuthError::NotConfigured
        ));
    }
}
