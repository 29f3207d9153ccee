//! Account Snapshot
//!
//! REST calls made once at start-up so the relay can announce positions and
//! balances before the first stream event arrives:
//!
//! - `GET /v1/positions` (signed)
//! - `GET /v1/client/holding` (signed)
//! - `GET /v1/public/info` (public), for each asset's `base_tick`
//!
//! Signed headers: `x-api-key`, `x-api-signature` (signature of no
//! parameters) and `x-api-timestamp`.

use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::Value;

use super::auth::{AuthError, Credentials};
use super::codec::positions_from;
use super::messages::{PositionsData, PositionsPayload, millis_to_datetime};
use crate::domain::events::{Balance, BalanceUpdate, PositionUpdate};

/// Positions endpoint path.
pub const POSITIONS_PATH: &str = "/v1/positions";
/// Holdings endpoint path.
pub const HOLDING_PATH: &str = "/v1/client/holding";
/// Instrument info endpoint path.
pub const INSTRUMENTS_PATH: &str = "/v1/public/info";

/// Instrument whose tick applies to USDT balances.
const USDT_TICK_SYMBOL: &str = "SPOT_USDC_USDT";

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Errors fetching the snapshot. None of them stop the relay.
#[derive(Debug, thiserror::Error)]
pub enum SnapshotError {
    /// Request could not be sent or read.
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// Non-success HTTP status.
    #[error("HTTP {status}: {body}")]
    Status {
        /// Status code.
        status: u16,
        /// Response body.
        body: String,
    },

    /// The exchange answered `success:false`.
    #[error("request rejected: {0}")]
    Rejected(String),

    /// Body did not have the expected shape.
    #[error("unexpected response body: {0}")]
    Decode(#[from] serde_json::Error),

    /// Signing failed.
    #[error("signing failed: {0}")]
    Auth(#[from] AuthError),
}

#[derive(Debug, Deserialize)]
struct PositionsResponse {
    #[serde(default)]
    success: Option<bool>,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    data: Option<PositionsData>,
    #[serde(default)]
    positions: Option<PositionsPayload>,
    #[serde(default)]
    timestamp: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct HoldingResponse {
    #[serde(default)]
    success: Option<bool>,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    holding: BTreeMap<String, Decimal>,
}

#[derive(Debug, Deserialize)]
struct InstrumentsResponse {
    #[serde(default)]
    success: Option<bool>,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    rows: Vec<InstrumentRow>,
}

#[derive(Debug, Deserialize)]
struct InstrumentRow {
    symbol: String,
    base_tick: Decimal,
}

/// Client for the account snapshot endpoints.
#[derive(Debug, Clone)]
pub struct PositionsClient {
    http: reqwest::Client,
    base_url: String,
    credentials: Credentials,
}

impl PositionsClient {
    /// Create a client against `base_url` (e.g. `https://api.woo.org`).
    ///
    /// # Errors
    ///
    /// Returns [`SnapshotError::Http`] if the HTTP client cannot be built.
    pub fn new(base_url: impl Into<String>, credentials: Credentials) -> Result<Self, SnapshotError> {
        let http = reqwest::Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            credentials,
        })
    }

    /// Fetch open positions. Flat positions are left out.
    ///
    /// # Errors
    ///
    /// Returns [`SnapshotError`] on transport, status, or decoding failure.
    pub async fn fetch(&self) -> Result<PositionUpdate, SnapshotError> {
        let body = self.signed_get(POSITIONS_PATH).await?;
        parse_positions(&body, Utc::now())
    }

    /// Fetch spot balances, each rounded to its asset's tick, with dust
    /// left out.
    ///
    /// # Errors
    ///
    /// Returns [`SnapshotError`] if either the instrument list or the
    /// holdings cannot be fetched or decoded.
    pub async fn fetch_balances(&self) -> Result<BalanceUpdate, SnapshotError> {
        let ticks = self.fetch_ticks().await?;
        let holdings = self.fetch_holdings().await?;
        Ok(BalanceUpdate {
            balances: balances_from(holdings, &ticks),
            timestamp: Utc::now(),
        })
    }

    /// Raw holdings by asset.
    ///
    /// # Errors
    ///
    /// Returns [`SnapshotError`] on transport, status, or decoding failure.
    pub async fn fetch_holdings(&self) -> Result<BTreeMap<String, Decimal>, SnapshotError> {
        let body = self.signed_get(HOLDING_PATH).await?;
        parse_holdings(&body)
    }

    /// `base_tick` by instrument symbol.
    ///
    /// # Errors
    ///
    /// Returns [`SnapshotError`] on transport, status, or decoding failure.
    pub async fn fetch_ticks(&self) -> Result<HashMap<String, Decimal>, SnapshotError> {
        let url = format!("{}{INSTRUMENTS_PATH}", self.base_url);
        tracing::debug!(%url, "Fetching instrument info");
        let response = self.http.get(&url).send().await?;
        let body = read_body(response).await?;
        parse_ticks(&body)
    }

    async fn signed_get(&self, path: &str) -> Result<String, SnapshotError> {
        let timestamp = Utc::now().timestamp_millis();
        let signature = self.credentials.sign(timestamp, &[])?;
        let url = format!("{}{path}", self.base_url);

        tracing::debug!(%url, "Fetching account snapshot");

        let response = self
            .http
            .get(&url)
            .header("x-api-key", self.credentials.public_key())
            .header("x-api-signature", signature)
            .header("x-api-timestamp", timestamp.to_string())
            .send()
            .await?;
        read_body(response).await
    }
}

async fn read_body(response: reqwest::Response) -> Result<String, SnapshotError> {
    let status = response.status();
    let body = response.text().await?;
    if !status.is_success() {
        return Err(SnapshotError::Status {
            status: status.as_u16(),
            body,
        });
    }
    Ok(body)
}

fn rejected(success: Option<bool>, message: Option<String>, what: &str) -> Result<(), SnapshotError> {
    if success == Some(false) {
        return Err(SnapshotError::Rejected(
            message.unwrap_or_else(|| format!("{what} request failed")),
        ));
    }
    Ok(())
}

/// Decode a positions response body.
///
/// Accepts both `{"data":{"positions":[..]}}` and a top-level `positions`
/// list.
///
/// # Errors
///
/// Returns [`SnapshotError::Rejected`] for `success:false` and
/// [`SnapshotError::Decode`] when no positions can be found.
pub fn parse_positions(body: &str, now: DateTime<Utc>) -> Result<PositionUpdate, SnapshotError> {
    let response: PositionsResponse = serde_json::from_str(body)?;
    rejected(response.success, response.message, "positions")?;

    let data = match (response.data, response.positions) {
        (Some(data), _) => data,
        (None, Some(positions)) => PositionsData { positions },
        (None, None) => {
            return Err(SnapshotError::Decode(serde::de::Error::missing_field(
                "positions",
            )));
        }
    };

    let positions = positions_from(data)
        .into_iter()
        .filter(|p| !p.quantity.is_zero())
        .collect();

    Ok(PositionUpdate {
        positions,
        timestamp: response
            .timestamp
            .as_ref()
            .and_then(millis_to_datetime)
            .unwrap_or(now),
    })
}

/// Decode a holdings response body into holdings by asset.
///
/// # Errors
///
/// Returns [`SnapshotError::Rejected`] for `success:false` and
/// [`SnapshotError::Decode`] for any other unexpected shape.
pub fn parse_holdings(body: &str) -> Result<BTreeMap<String, Decimal>, SnapshotError> {
    let response: HoldingResponse = serde_json::from_str(body)?;
    rejected(response.success, response.message, "holding")?;
    Ok(response.holding)
}

/// Decode an instrument info body into `base_tick` by symbol.
///
/// # Errors
///
/// Returns [`SnapshotError::Rejected`] for `success:false` and
/// [`SnapshotError::Decode`] for any other unexpected shape.
pub fn parse_ticks(body: &str) -> Result<HashMap<String, Decimal>, SnapshotError> {
    let response: InstrumentsResponse = serde_json::from_str(body)?;
    rejected(response.success, response.message, "instrument info")?;
    Ok(response
        .rows
        .into_iter()
        .map(|row| (row.symbol, row.base_tick))
        .collect())
}

/// Spot instrument whose `base_tick` applies to `asset`.
#[must_use]
pub fn tick_symbol(asset: &str) -> String {
    if asset == "USDT" {
        USDT_TICK_SYMBOL.to_string()
    } else {
        format!("SPOT_{asset}_USDT")
    }
}

/// Round `holding` to the decimal places of `tick`. Ticks of one or more
/// leave the holding as is.
#[must_use]
pub fn round_to_tick(holding: Decimal, tick: Decimal) -> Decimal {
    if tick > Decimal::ZERO && tick < Decimal::ONE {
        holding.round_dp(tick.normalize().scale()).normalize()
    } else {
        holding
    }
}

/// Turn raw holdings into displayable balances.
///
/// A holding at or below its asset's tick is dust and left out. Assets with
/// no spot instrument keep their raw holding when it is positive.
#[must_use]
pub fn balances_from(
    holdings: BTreeMap<String, Decimal>,
    ticks: &HashMap<String, Decimal>,
) -> Vec<Balance> {
    holdings
        .into_iter()
        .filter_map(|(asset, holding)| match ticks.get(&tick_symbol(&asset)) {
            Some(&tick) => (holding > tick).then(|| Balance {
                holding: round_to_tick(holding, tick),
                asset,
            }),
            None => (holding > Decimal::ZERO).then_some(Balance { asset, holding }),
        })
        .collect()
}
