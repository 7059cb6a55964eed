//! Configuration management for the exchange feed.

use crate::api::market_book_batch_limit;
use crate::{Error, Result};
use serde::Deserialize;
use std::env;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

/// Hard upper bound the exchange places on markets per market-book request.
pub const UPSTREAM_MAX_MARKETS_PER_REQUEST: usize = 40;

/// Application configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub exchange: ExchangeConfig,
    pub credentials: CredentialsConfig,
    #[serde(default)]
    pub poller: PollerConfig,
    #[serde(default)]
    pub markets: MarketsConfig,
    #[serde(default)]
    pub database: Option<DatabaseConfig>,
}

/// Exchange deployment to talk to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Region {
    #[default]
    Global,
    Australia,
}

impl Region {
    pub fn identity_url(&self) -> &'static str {
        "https://identitysso.betfair.com/api/login"
    }

    pub fn cert_identity_url(&self) -> &'static str {
        "https://identitysso-cert.betfair.com/api/certlogin"
    }

    pub fn betting_url(&self) -> &'static str {
        match self {
            Region::Global => "https://api.betfair.com/exchange/betting/json-rpc/v1",
            Region::Australia => "https://api-au.betfair.com/exchange/betting/json-rpc/v1",
        }
    }
}

impl FromStr for Region {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "global" | "uk" | "com" => Ok(Region::Global),
            "australia" | "au" => Ok(Region::Australia),
            other => Err(Error::Config {
                message: format!("unknown exchange region '{}'", other),
            }),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ExchangeConfig {
    #[serde(default)]
    pub region: Region,
    pub app_key: String,
    /// Overrides the region's interactive login endpoint.
    #[serde(default)]
    pub identity_url: Option<String>,
    /// Overrides the region's certificate login endpoint.
    #[serde(default)]
    pub cert_identity_url: Option<String>,
    /// Overrides the region's betting JSON-RPC endpoint.
    #[serde(default)]
    pub betting_url: Option<String>,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

impl ExchangeConfig {
    pub fn identity_url(&self) -> String {
        self.identity_url
            .clone()
            .unwrap_or_else(|| self.region.identity_url().to_string())
    }

    pub fn cert_identity_url(&self) -> String {
        self.cert_identity_url
            .clone()
            .unwrap_or_else(|| self.region.cert_identity_url().to_string())
    }

    pub fn betting_url(&self) -> String {
        self.betting_url
            .clone()
            .unwrap_or_else(|| self.region.betting_url().to_string())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

/// Login credentials. `Debug` never prints the password.
#[derive(Clone, Deserialize)]
pub struct CredentialsConfig {
    pub username: String,
    /// Required by both the interactive and the certificate login.
    pub password: String,
    /// PEM client certificate for non-interactive login.
    #[serde(default)]
    pub cert_path: Option<PathBuf>,
    /// PEM private key matching `cert_path`.
    #[serde(default)]
    pub key_path: Option<PathBuf>,
}

impl CredentialsConfig {
    pub fn has_certificate(&self) -> bool {
        self.cert_path.is_some()
    }
}

impl fmt::Debug for CredentialsConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialsConfig")
            .field("username", &self.username)
            .field("password", &"[redacted]")
            .field("cert_path", &self.cert_path)
            .field("key_path", &self.key_path)
            .finish()
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PollerConfig {
    /// Baseline sleep between ticks.
    pub poll_interval_secs: u64,
    pub max_markets_per_batch: usize,
    /// Cap for the rate-limit backoff.
    pub backoff_ceiling_secs: u64,
    /// Sleep multiplier applied when there is nothing to track.
    pub idle_multiplier: u32,
    /// Fixed wait after a timeout or connection failure.
    pub unavailable_backoff_secs: u64,
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: 2,
            max_markets_per_batch: market_book_batch_limit(),
            backoff_ceiling_secs: 60,
            idle_multiplier: 5,
            unavailable_backoff_secs: 10,
        }
    }
}

impl PollerConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn backoff_ceiling(&self) -> Duration {
        Duration::from_secs(self.backoff_ceiling_secs)
    }

    pub fn unavailable_backoff(&self) -> Duration {
        Duration::from_secs(self.unavailable_backoff_secs)
    }

    pub fn idle_interval(&self) -> Duration {
        self.poll_interval() * self.idle_multiplier.max(1)
    }
}

/// Where the tracked market IDs come from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MarketSource {
    #[default]
    Static,
    Database,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct MarketsConfig {
    pub source: MarketSource,
    pub market_ids: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

fn default_request_timeout_secs() -> u64 {
    10
}

fn default_max_connections() -> u32 {
    5
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// Present-but-unparsable values are errors rather than silently defaulted.
    #[allow(clippy::result_large_err)]
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();

        let poller_defaults = PollerConfig::default();
        let market_ids: Vec<String> = env::var("MARKET_IDS")
            .map(|raw| {
                raw.split(',')
                    .map(str::trim)
                    .filter(|id| !id.is_empty())
                    .map(String::from)
                    .collect()
            })
            .unwrap_or_default();

        let config = Self {
            exchange: ExchangeConfig {
                region: env::var("BETFAIR_REGION")
                    .ok()
                    .map(|r| r.parse::<Region>())
                    .transpose()?
                    .unwrap_or_default(),
                app_key: required_env("BETFAIR_APP_KEY")?,
                identity_url: env::var("BETFAIR_IDENTITY_URL").ok(),
                cert_identity_url: env::var("BETFAIR_CERT_IDENTITY_URL").ok(),
                betting_url: env::var("BETFAIR_BETTING_URL").ok(),
                request_timeout_secs: env_parse(
                    "BETFAIR_REQUEST_TIMEOUT_SECS",
                    default_request_timeout_secs(),
                )?,
            },
            credentials: CredentialsConfig {
                username: required_env("BETFAIR_USERNAME")?,
                password: required_env("BETFAIR_PASSWORD")?,
                cert_path: env::var("BETFAIR_CERT_PATH").ok().map(PathBuf::from),
                key_path: env::var("BETFAIR_KEY_PATH").ok().map(PathBuf::from),
            },
            poller: PollerConfig {
                poll_interval_secs: env_parse(
                    "POLL_INTERVAL_SECS",
                    poller_defaults.poll_interval_secs,
                )?,
                max_markets_per_batch: env_parse(
                    "MAX_MARKETS_PER_BATCH",
                    poller_defaults.max_markets_per_batch,
                )?,
                backoff_ceiling_secs: env_parse(
                    "BACKOFF_CEILING_SECS",
                    poller_defaults.backoff_ceiling_secs,
                )?,
                idle_multiplier: env_parse("IDLE_MULTIPLIER", poller_defaults.idle_multiplier)?,
                unavailable_backoff_secs: env_parse(
                    "UNAVAILABLE_BACKOFF_SECS",
                    poller_defaults.unavailable_backoff_secs,
                )?,
            },
            markets: MarketsConfig {
                source: match env::var("MARKET_SOURCE").ok().as_deref() {
                    None | Some("static") => MarketSource::Static,
                    Some("database") => MarketSource::Database,
                    Some(other) => {
                        return Err(Error::Config {
                            message: format!("unknown MARKET_SOURCE '{}'", other),
                        })
                    }
                },
                market_ids,
            },
            database: match env::var("DATABASE_URL") {
                Ok(url) => Some(DatabaseConfig {
                    url,
                    max_connections: env_parse(
                        "DATABASE_MAX_CONNECTIONS",
                        default_max_connections(),
                    )?,
                }),
                Err(_) => None,
            },
        };

        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a TOML/JSON/YAML file, with `RACEFEED__SECTION__KEY`
    /// environment variables layered on top.
    #[allow(clippy::result_large_err)]
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let builder = config::Config::builder()
            .add_source(config::File::from(path.as_ref()))
            .add_source(config::Environment::with_prefix("RACEFEED").separator("__"));
        Self::from_builder(builder)
    }

    #[allow(clippy::result_large_err)]
    fn from_builder(
        builder: config::ConfigBuilder<config::builder::DefaultState>,
    ) -> Result<Self> {
        let config: Self = builder.build()?.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Reject configurations the feed cannot run with.
    #[allow(clippy::result_large_err)]
    pub fn validate(&self) -> Result<()> {
        let fail = |message: &str| -> Result<()> {
            Err(Error::Config {
                message: message.to_string(),
            })
        };

        if self.credentials.username.trim().is_empty() {
            return fail("exchange username is required");
        }
        if self.exchange.app_key.trim().is_empty() {
            return fail("exchange application key is required");
        }
        if self.credentials.password.is_empty() {
            return fail("exchange password is required");
        }
        if self.credentials.cert_path.is_some() && self.credentials.key_path.is_none() {
            return fail("cert_path is set but key_path is missing");
        }
        if self.credentials.key_path.is_some() && self.credentials.cert_path.is_none() {
            return fail("key_path is set but cert_path is missing");
        }
        if self.exchange.request_timeout_secs == 0 {
            return fail("request timeout must be at least one second");
        }
        if self.poller.poll_interval_secs == 0 {
            return fail("poll interval must be at least one second");
        }
        let batch_limit = market_book_batch_limit();
        if self.poller.max_markets_per_batch == 0 || self.poller.max_markets_per_batch > batch_limit
        {
            return Err(Error::Config {
                message: format!(
                    "max markets per batch must be between 1 and {} for the requested price data",
                    batch_limit
                ),
            });
        }
        if self.poller.backoff_ceiling_secs < self.poller.poll_interval_secs {
            return fail("backoff ceiling must not be below the poll interval");
        }
        if self.markets.source == MarketSource::Database && self.database.is_none() {
            return fail("market source 'database' requires DATABASE_URL");
        }
        let overrides = [
            ("identity_url", &self.exchange.identity_url),
            ("cert_identity_url", &self.exchange.cert_identity_url),
            ("betting_url", &self.exchange.betting_url),
        ];
        for (name, value) in overrides {
            let Some(raw) = value else { continue };
            match url::Url::parse(raw) {
                Ok(parsed) if matches!(parsed.scheme(), "http" | "https") => {}
                _ => {
                    return Err(Error::Config {
                        message: format!("{} is not a valid http(s) URL: '{}'", name, raw),
                    })
                }
            }
        }
        Ok(())
    }

    /// Configuration for tests (password login, static markets).
    pub fn test_config() -> Self {
        Self {
            exchange: ExchangeConfig {
                region: Region::Global,
                app_key: "test-app-key".to_string(),
                identity_url: None,
                cert_identity_url: None,
                betting_url: None,
                request_timeout_secs: 5,
            },
            credentials: CredentialsConfig {
                username: "feed-user".to_string(),
                password: "hunter2".to_string(),
                cert_path: None,
                key_path: None,
            },
            poller: PollerConfig::default(),
            markets: MarketsConfig {
                source: MarketSource::Static,
                market_ids: vec!["1.230001".to_string()],
            },
            database: None,
        }
    }
}

#[allow(clippy::result_large_err)]
fn required_env(key: &str) -> Result<String> {
    env::var(key).map_err(|_| Error::Config {
        message: format!("{} environment variable not set", key),
    })
}

#[allow(clippy::result_large_err)]
fn env_parse<T: FromStr>(key: &str, default: T) -> Result<T> {
    match env::var(key) {
        Ok(raw) => raw.trim().parse().map_err(|_| Error::Config {
            message: format!("{} has an invalid value '{}'", key, raw),
        }),
        Err(_) => Ok(default),
    }
}
