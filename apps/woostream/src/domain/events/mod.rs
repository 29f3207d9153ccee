//! Stream Events
//!
//! Typed events produced by classifying raw frames from the private stream.
//! Everything here is immutable once built and free of I/O.

mod format;

use std::fmt;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

pub use format::{MAX_RAW_RENDER_LEN, format};

/// A single inbound text frame exactly as it came off the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawMessage {
    /// Frame payload.
    pub payload: String,
    /// Local receive time.
    pub received_at: DateTime<Utc>,
}

impl RawMessage {
    /// Wrap a payload stamped with the current time.
    #[must_use]
    pub fn new(payload: impl Into<String>) -> Self {
        Self {
            payload: payload.into(),
            received_at: Utc::now(),
        }
    }
}

/// Order side of a fill.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Side {
    /// Bought.
    Buy,
    /// Sold.
    Sell,
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Buy => f.write_str("Buy"),
            Self::Sell => f.write_str("Sell"),
        }
    }
}

/// An executed trade.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fill {
    /// Instrument, e.g. `SPOT_BTC_USDT`.
    pub symbol: String,
    /// Side of the order that filled.
    pub side: Side,
    /// Execution price.
    pub price: Decimal,
    /// Executed quantity.
    pub quantity: Decimal,
    /// Exchange order id.
    pub order_id: String,
    /// Exchange execution time.
    pub timestamp: DateTime<Utc>,
}

/// Net holding in one symbol.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Position {
    /// Instrument, e.g. `PERP_BTC_USDT`.
    pub symbol: String,
    /// Signed net quantity.
    pub quantity: Decimal,
    /// Average open price.
    pub average_price: Decimal,
}

/// A change to one or more positions reported in a single frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PositionUpdate {
    /// Positions carried by the frame, in wire order.
    pub positions: Vec<Position>,
    /// Exchange time of the update.
    pub timestamp: DateTime<Utc>,
}

/// Spot holding of one asset, already rounded to the asset's tick.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Balance {
    /// Asset code, e.g. `BTC`.
    pub asset: String,
    /// Holding.
    pub holding: Decimal,
}

/// Account balances fetched at start-up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BalanceUpdate {
    /// Non-dust balances in asset order.
    pub balances: Vec<Balance>,
    /// Time the balances were read.
    pub timestamp: DateTime<Utc>,
}

/// The result of classifying one [`RawMessage`].
///
/// Classification is total: anything that does not match a known shape
/// becomes [`ClassifiedEvent::Unknown`] so it can still be rendered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClassifiedEvent {
    /// Trade execution.
    Fill(Fill),
    /// Position change or snapshot.
    PositionUpdate(PositionUpdate),
    /// Balances snapshot. Only produced at start-up, never by the classifier.
    Balances(BalanceUpdate),
    /// Liveness frame (`ping` or `pong`).
    HeartbeatAck {
        /// Server time carried by the frame, if any.
        timestamp: Option<DateTime<Utc>>,
    },
    /// Successful `auth` or `subscribe` response.
    SubscriptionAck {
        /// `auth` or the topic that was subscribed.
        request: String,
    },
    /// Error reported by the exchange.
    ExchangeError {
        /// Exchange error code (0 when the frame carries none).
        code: i64,
        /// Human readable description.
        message: String,
    },
    /// Anything else, kept verbatim.
    Unknown {
        /// Payload as received.
        raw: String,
    },
}

impl ClassifiedEvent {
    /// Short label used for metrics and log fields.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Fill(_) => "fill",
            Self::PositionUpdate(_) => "position_update",
            Self::Balances(_) => "balances",
            Self::HeartbeatAck { .. } => "heartbeat_ack",
            Self::SubscriptionAck { .. } => "subscription_ack",
            Self::ExchangeError { .. } => "exchange_error",
            Self::Unknown { .. } => "unknown",
        }
    }
}
