//! WOO X WebSocket Message Types
//!
//! Wire format for the v2 private stream.
//!
//! # Outbound
//! - Auth: `{"id":"..","event":"auth","params":{"apikey","sign","timestamp"}}`
//! - Subscribe: `{"id":"..","topic":"executionreport","event":"subscribe"}`
//! - Ping: `{"event":"ping"}`, pong reply `{"event":"pong","ts":..}`
//!
//! # Inbound
//! - Acks: `{"id":"..","event":"auth"|"subscribe","success":true|false,"ts":..,"errorMsg":".."}`
//! - Heartbeats: `{"event":"ping"|"pong","ts":..}`
//! - Data: `{"topic":"executionreport"|"position","ts":..,"data":{..}}`

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::domain::events::Side;

/// Topic carrying order execution reports.
pub const TOPIC_EXECUTION_REPORT: &str = "executionreport";

/// Topic carrying position changes.
pub const TOPIC_POSITION: &str = "position";

/// Topics subscribed on every (re)connect.
pub const PRIVATE_TOPICS: [&str; 2] = [TOPIC_EXECUTION_REPORT, TOPIC_POSITION];

// =============================================================================
// Outbound Frames
// =============================================================================

/// Signed auth parameters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AuthParams {
    /// Public API key.
    pub apikey: String,
    /// Upper-case hex HMAC.
    pub sign: String,
    /// Millisecond timestamp that was signed, as a string.
    pub timestamp: String,
}

/// Auth frame.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AuthRequest {
    /// Client request id, echoed in the ack.
    pub id: String,
    /// Always `auth`.
    pub event: &'static str,
    /// Signed parameters.
    pub params: AuthParams,
}

impl AuthRequest {
    /// Create an auth frame.
    #[must_use]
    pub const fn new(id: String, params: AuthParams) -> Self {
        Self {
            id,
            event: "auth",
            params,
        }
    }
}

/// Subscription frame for one topic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SubscribeRequest {
    /// Client request id.
    pub id: String,
    /// Topic name.
    pub topic: String,
    /// Always `subscribe`.
    pub event: &'static str,
}

impl SubscribeRequest {
    /// Subscribe to `topic`.
    #[must_use]
    pub fn new(id: String, topic: impl Into<String>) -> Self {
        Self {
            id,
            topic: topic.into(),
            event: "subscribe",
        }
    }
}

/// Client heartbeat frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PingRequest {
    /// Always `ping`.
    pub event: &'static str,
}

impl Default for PingRequest {
    fn default() -> Self {
        Self { event: "ping" }
    }
}

/// Reply to a server `ping`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PongReply {
    /// Always `pong`.
    pub event: &'static str,
    /// Local time in milliseconds.
    pub ts: i64,
}

impl PongReply {
    /// Pong stamped with `ts`.
    #[must_use]
    pub const fn new(ts: i64) -> Self {
        Self { event: "pong", ts }
    }
}

// =============================================================================
// Inbound Frames
// =============================================================================

/// Loosely typed view of any inbound frame.
///
/// Every field is optional so that unexpected shapes still parse; the
/// classifier decides what the frame means.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Envelope {
    /// Echoed request id.
    #[serde(default)]
    pub id: Option<Value>,
    /// `auth`, `subscribe`, `ping`, `pong`, ...
    #[serde(default)]
    pub event: Option<String>,
    /// Data topic.
    #[serde(default)]
    pub topic: Option<String>,
    /// Request outcome on acks.
    #[serde(default)]
    pub success: Option<bool>,
    /// Server time in milliseconds.
    #[serde(default)]
    pub ts: Option<Value>,
    /// Error description on failures.
    #[serde(default, rename = "errorMsg", alias = "message")]
    pub error_msg: Option<String>,
    /// Error code on failures.
    #[serde(default)]
    pub code: Option<Value>,
    /// Topic payload, or the topic name on subscribe acks.
    #[serde(default)]
    pub data: Option<Value>,
}

/// Control-plane meaning of a frame, as seen by the connection loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Control {
    /// Server heartbeat; must be answered with a pong.
    Ping,
    /// Reply to our heartbeat.
    Pong,
    /// Auth accepted.
    AuthAccepted,
    /// Auth refused.
    AuthRejected(String),
    /// Subscription accepted.
    Subscribed(String),
    /// Subscription refused.
    SubscribeRejected(String),
}

impl Envelope {
    /// Parse a text frame. Non-object payloads are rejected.
    ///
    /// # Errors
    ///
    /// Returns the JSON error when the payload is not a JSON object.
    pub fn parse(payload: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(payload)
    }

    /// Server timestamp, when present and numeric.
    #[must_use]
    pub fn timestamp(&self) -> Option<DateTime<Utc>> {
        self.ts.as_ref().and_then(millis_to_datetime)
    }

    /// Error code, 0 when absent or non-numeric.
    #[must_use]
    pub fn error_code(&self) -> i64 {
        self.code.as_ref().and_then(value_as_i64).unwrap_or(0)
    }

    /// Error text, falling back to a description of the failed request.
    #[must_use]
    pub fn error_message(&self) -> String {
        self.error_msg.clone().unwrap_or_else(|| {
            format!(
                "{} request failed",
                self.event.as_deref().unwrap_or("unknown")
            )
        })
    }

    /// Whether the frame reports a failure.
    #[must_use]
    pub fn is_failure(&self) -> bool {
        self.success == Some(false)
    }

    /// Topic named by a subscribe ack (`data` or `topic`).
    #[must_use]
    pub fn subscribed_topic(&self) -> String {
        self.data
            .as_ref()
            .and_then(Value::as_str)
            .or(self.topic.as_deref())
            .unwrap_or("subscribe")
            .to_string()
    }

    /// Control-plane interpretation, if the frame is a control frame.
    #[must_use]
    pub fn control(&self) -> Option<Control> {
        match self.event.as_deref()? {
            "ping" => Some(Control::Ping),
            "pong" => Some(Control::Pong),
            "auth" if self.is_failure() => Some(Control::AuthRejected(self.error_message())),
            "auth" if self.success == Some(true) => Some(Control::AuthAccepted),
            "subscribe" if self.is_failure() => {
                Some(Control::SubscribeRejected(self.error_message()))
            }
            "subscribe" if self.success == Some(true) => {
                Some(Control::Subscribed(self.subscribed_topic()))
            }
            _ => None,
        }
    }
}

/// Order id as sent by the exchange (number or string).
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum WireId {
    /// Numeric id.
    Number(i64),
    /// Textual id.
    Text(String),
}

impl fmt::Display for WireId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Number(n) => write!(f, "{n}"),
            Self::Text(s) => f.write_str(s),
        }
    }
}

/// `executionreport` payload. Only the fields needed to detect and render
/// a fill are decoded.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionReport {
    /// Instrument.
    pub symbol: String,
    /// Exchange order id.
    pub order_id: WireId,
    /// Order side.
    pub side: Side,
    /// Price of this execution.
    #[serde(default)]
    pub executed_price: Decimal,
    /// Quantity of this execution (zero for non-fill reports).
    #[serde(default)]
    pub executed_quantity: Decimal,
    /// Order status (`NEW`, `PARTIAL_FILLED`, `FILLED`, ...).
    #[serde(default)]
    pub status: Option<String>,
    /// Execution time in milliseconds.
    #[serde(default)]
    pub timestamp: Option<Value>,
}

impl ExecutionReport {
    /// Whether this report describes an actual execution.
    #[must_use]
    pub fn is_fill(&self) -> bool {
        self.executed_quantity > Decimal::ZERO
    }
}

/// One position entry.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PositionEntry {
    /// Instrument (present in list form, absent in keyed form).
    #[serde(default)]
    pub symbol: Option<String>,
    /// Net holding.
    #[serde(default)]
    pub holding: Decimal,
    /// Average open price.
    #[serde(default, alias = "average_open_price")]
    pub average_open_price: Decimal,
}

/// Positions arrive keyed by symbol on the stream and as a list over REST.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum PositionsPayload {
    /// `{"PERP_BTC_USDT": {...}, ...}`
    Keyed(BTreeMap<String, PositionEntry>),
    /// `[{"symbol": "PERP_BTC_USDT", ...}, ...]`
    Listed(Vec<PositionEntry>),
}

/// `position` payload (and REST `data`).
#[derive(Debug, Clone, Deserialize)]
pub struct PositionsData {
    /// Positions in either form.
    pub positions: PositionsPayload,
}

impl PositionsData {
    /// Flatten into `(symbol, entry)` pairs; keyed form is in symbol order,
    /// list form in wire order. List entries without a symbol are skipped.
    #[must_use]
    pub fn into_entries(self) -> Vec<(String, PositionEntry)> {
        match self.positions {
            PositionsPayload::Keyed(map) => map.into_iter().collect(),
            PositionsPayload::Listed(list) => list
                .into_iter()
                .filter_map(|entry| entry.symbol.clone().map(|symbol| (symbol, entry)))
                .collect(),
        }
    }
}

/// Convert a millisecond timestamp (number or numeric string) to UTC.
#[must_use]
pub fn millis_to_datetime(value: &Value) -> Option<DateTime<Utc>> {
    value_as_i64(value).and_then(DateTime::from_timestamp_millis)
}

fn value_as_i64(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64().or_else(|| {
            #[allow(clippy::cast_possible_truncation)]
            n.as_f64().map(|f| f as i64)
        }),
        Value::String(s) => s.parse().ok(),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn subscribe_request_serializes() {
        let json =
            serde_json::to_string(&SubscribeRequest::new("s1".into(), TOPIC_POSITION)).unwrap();
        assert_eq!(json, r#"{"id":"s1","topic":"position","event":"subscribe"}"#);
    }

    #[test]
    fn ping_and_pong_serialize() {
        assert_eq!(
            serde_json::to_string(&PingRequest::default()).unwrap(),
            r#"{"event":"ping"}"#
        );
        assert_eq!(
            serde_json::to_string(&PongReply::new(42)).unwrap(),
            r#"{"event":"pong","ts":42}"#
        );
    }

    #[test]
    fn control_frames() {
        let cases = [
            (r#"{"event":"ping","ts":1}"#, Some(Control::Ping)),
            (r#"{"event":"pong","ts":1}"#, Some(Control::Pong)),
            (
                r#"{"id":"a","event":"auth","success":true,"ts":1}"#,
                Some(Control::AuthAccepted),
            ),
            (
                r#"{"id":"a","event":"auth","success":false,"errorMsg":"bad sign"}"#,
                Some(Control::AuthRejected("bad sign".to_string())),
            ),
            (
                r#"{"id":"s","event":"subscribe","success":true,"data":"position"}"#,
                Some(Control::Subscribed("position".to_string())),
            ),
            (
                r#"{"id":"s","event":"subscribe","success":false}"#,
                Some(Control::SubscribeRejected(
                    "subscribe request failed".to_string(),
                )),
            ),
            (r#"{"topic":"position","data":{}}"#, None),
        ];

        for (payload, expected) in cases {
            let envelope = Envelope::parse(payload).unwrap();
            assert_eq!(envelope.control(), expected, "{payload}");
        }
    }

    #[test]
    fn timestamps_accept_numbers_and_strings() {
        let a = Envelope::parse(r#"{"ts":1697450400123}"#).unwrap();
        let b = Envelope::parse(r#"{"ts":"1697450400123"}"#).unwrap();
        assert_eq!(a.timestamp(), b.timestamp());
        assert!(a.timestamp().is_some());
    }

    #[test]
    fn non_object_is_rejected() {
        assert!(Envelope::parse("[1,2,3]").is_err());
        assert!(Envelope::parse("not json").is_err());
    }

    #[test]
    fn positions_keyed_and_listed() {
        let keyed: PositionsData = serde_json::from_str(
            r#"{"positions":{"PERP_ETH_USDT":{"holding":2,"averageOpenPrice":1500},
                             "PERP_BTC_USDT":{"holding":-0.5,"averageOpenPrice":27000.5}}}"#,
        )
        .unwrap();
        let entries = keyed.into_entries();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].0, "PERP_BTC_USDT");

        let listed: PositionsData = serde_json::from_str(
            r#"{"positions":[{"symbol":"PERP_ETH_USDT","holding":2,"averageOpenPrice":1500},
                             {"holding":1}]}"#,
        )
        .unwrap();
        let entries = listed.into_entries();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].0, "PERP_ETH_USDT");
    }

    #[test]
    fn wire_id_display() {
        assert_eq!(WireId::Number(123).to_string(), "123");
        assert_eq!(WireId::Text("abc".into()).to_string(), "abc");
    }
}
