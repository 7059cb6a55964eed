//! Exchange betting API client (JSON-RPC market-book queries).

use super::{SessionToken, APP_KEY_HEADER, SESSION_HEADER};
use crate::config::{ExchangeConfig, UPSTREAM_MAX_MARKETS_PER_REQUEST};
use crate::types::MarketBook;
use crate::{Error, Result};
use async_trait::async_trait;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, warn};

/// Request weight budget for a single market-book call. Heavier requests
/// are refused with `TOO_MUCH_DATA`.
pub const MAX_REQUEST_WEIGHT: usize = 200;

/// Price data requested per market.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PriceData {
    ExBestOffers,
    SpAvailable,
    SpTraded,
}

impl PriceData {
    /// Weight charged per market for this projection member.
    pub fn weight(self) -> usize {
        match self {
            PriceData::ExBestOffers => 5,
            PriceData::SpAvailable => 3,
            PriceData::SpTraded => 7,
        }
    }
}

/// Projection used by [`BettingClient::list_market_books`].
pub const MARKET_BOOK_PROJECTION: &[PriceData] = &[
    PriceData::ExBestOffers,
    PriceData::SpAvailable,
    PriceData::SpTraded,
];

/// Most markets one request can carry with `projection` without exceeding
/// the weight budget or the per-request market cap.
pub fn max_markets_per_request(projection: &[PriceData]) -> usize {
    let weight: usize = projection.iter().map(|p| p.weight()).sum();
    (MAX_REQUEST_WEIGHT / weight.max(1)).clamp(1, UPSTREAM_MAX_MARKETS_PER_REQUEST)
}

/// Batch bound for the market-book projection this client sends.
pub fn market_book_batch_limit() -> usize {
    max_markets_per_request(MARKET_BOOK_PROJECTION)
}

/// A market entry that could not be decoded; the rest of the batch is still usable.
#[derive(Debug, Clone, PartialEq)]
pub struct MalformedMarket {
    pub market_id: Option<String>,
    pub reason: String,
}

/// Decoded result of one market-book request.
#[derive(Debug, Clone, Default)]
pub struct MarketBookBatch {
    pub books: Vec<MarketBook>,
    pub malformed: Vec<MalformedMarket>,
}

/// Source of market-book snapshots. Implemented by [`BettingClient`]; tests script it.
#[async_trait]
pub trait MarketBookSource: Send + Sync {
    async fn list_market_books(
        &self,
        token: &SessionToken,
        market_ids: &[String],
    ) -> Result<MarketBookBatch>;
}

/// Exchange betting API client.
pub struct BettingClient {
    endpoint: String,
    app_key: String,
    http_client: reqwest::Client,
}

impl BettingClient {
    pub const LIST_MARKET_BOOK: &'static str = "SportsAPING/v1.0/listMarketBook";

    #[allow(clippy::result_large_err)]
    pub fn new(config: &ExchangeConfig) -> Result<Self> {
        let http_client = reqwest::Client::builder()
            .timeout(config.request_timeout())
            .connect_timeout(config.request_timeout())
            .build()?;
        Ok(Self {
            endpoint: config.betting_url(),
            app_key: config.app_key.clone(),
            http_client,
        })
    }

    /// Perform one JSON-RPC call and return its `result` member.
    ///
    /// No retries happen here; the poller owns the backoff policy.
    pub async fn call(&self, token: &SessionToken, method: &str, params: Value) -> Result<Value> {
        let payload = json!({
            "jsonrpc": "2.0",
            "method": method,
            "params": params,
            "id": 1,
        });

        let response = self
            .http_client
            .post(&self.endpoint)
            .header(APP_KEY_HEADER, &self.app_key)
            .header(SESSION_HEADER, token.expose())
            .header("Accept", "application/json")
            .json(&payload)
            .send()
            .await
            .map_err(Error::from_transport)?;

        let status = response.status();
        let body = response.text().await.map_err(Error::from_transport)?;
        if let Some(err) = classify_status(status, &body) {
            return Err(err);
        }

        let envelope: RpcResponse = serde_json::from_str(&body).map_err(|e| {
            Error::MalformedResponse {
                message: format!("{} envelope: {}", method, e),
            }
        })?;

        match (envelope.result, envelope.error) {
            (_, Some(error)) => Err(classify_rpc_error(&error)),
            (Some(result), None) => Ok(result),
            (None, None) => Err(Error::MalformedResponse {
                message: format!("{} returned neither result nor error", method),
            }),
        }
    }
}

#[async_trait]
impl MarketBookSource for BettingClient {
    async fn list_market_books(
        &self,
        token: &SessionToken,
        market_ids: &[String],
    ) -> Result<MarketBookBatch> {
        let params = json!({
            "marketIds": market_ids,
            "priceProjection": {
                "priceData": MARKET_BOOK_PROJECTION
            }
        });

        let result = self.call(token, Self::LIST_MARKET_BOOK, params).await?;
        let batch = parse_market_books(result)?;
        debug!(
            requested = market_ids.len(),
            returned = batch.books.len(),
            malformed = batch.malformed.len(),
            "Fetched market books"
        );
        Ok(batch)
    }
}

#[derive(Debug, Deserialize)]
struct RpcResponse {
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<RpcError>,
}

#[derive(Debug, Deserialize)]
struct RpcError {
    #[serde(default)]
    code: i64,
    #[serde(default)]
    message: String,
    #[serde(default)]
    data: Option<Value>,
}

impl RpcError {
    /// Vendor error code, e.g. `TOO_MUCH_DATA`.
    fn error_code(&self) -> Option<&str> {
        let data = self.data.as_ref()?;
        data.get("APINGException")
            .or_else(|| data.get("AccountAPINGException"))
            .and_then(|e| e.get("errorCode"))
            .and_then(Value::as_str)
    }
}

/// Map a non-success HTTP status to the error taxonomy.
fn classify_status(status: StatusCode, body: &str) -> Option<Error> {
    if status.is_success() {
        return None;
    }

    let preview: String = body.chars().take(200).collect();
    let err = match status.as_u16() {
        401 | 403 => Error::Unauthorized {
            message: preview,
            status: Some(status.as_u16()),
        },
        429 => Error::RateLimited {
            reason: format!("HTTP {}", status),
        },
        code if status.is_server_error() => Error::UpstreamUnavailable {
            message: format!("HTTP {}: {}", code, preview),
        },
        code => Error::Api {
            message: format!("HTTP {}: {}", code, preview),
            status: Some(code),
        },
    };
    Some(err)
}

fn classify_rpc_error(error: &RpcError) -> Error {
    match error.error_code() {
        Some(code @ ("INVALID_SESSION_INFORMATION" | "NO_SESSION")) => Error::Unauthorized {
            message: code.to_string(),
            status: None,
        },
        Some(code @ ("TOO_MUCH_DATA" | "TOO_MANY_REQUESTS")) => Error::RateLimited {
            reason: code.to_string(),
        },
        Some(code @ ("SERVICE_BUSY" | "TIMEOUT_ERROR")) => Error::UpstreamUnavailable {
            message: code.to_string(),
        },
        Some(code) => Error::Api {
            message: format!("{} ({})", code, error.message),
            status: None,
        },
        None => Error::Api {
            message: format!("JSON-RPC error {}: {}", error.code, error.message),
            status: None,
        },
    }
}

/// Decode a `listMarketBook` result, isolating undecodable markets.
#[allow(clippy::result_large_err)]
fn parse_market_books(result: Value) -> Result<MarketBookBatch> {
    let Value::Array(entries) = result else {
        return Err(Error::MalformedResponse {
            message: "listMarketBook result is not an array".to_string(),
        });
    };

    let mut batch = MarketBookBatch::default();
    for entry in entries {
        let market_id = entry
            .get("marketId")
            .and_then(Value::as_str)
            .map(String::from);
        match serde_json::from_value::<MarketBook>(entry) {
            Ok(book) => batch.books.push(book),
            Err(e) => {
                warn!(
                    market_id = market_id.as_deref().unwrap_or("unknown"),
                    error = %e,
                    "Skipping malformed market book"
                );
                batch.malformed.push(MalformedMarket {
                    market_id,
                    reason: e.to_string(),
                });
            }
        }
    }
    Ok(batch)
}
