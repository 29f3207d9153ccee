//! Event Formatter
//!
//! Renders a [`ClassifiedEvent`] as plain text. The output depends only on
//! the event, so the same event always renders to the same string.

use std::fmt::Write as _;

use chrono::{DateTime, Utc};

use super::ClassifiedEvent;

/// Longest raw payload echoed for `Unknown` events, in characters.
pub const MAX_RAW_RENDER_LEN: usize = 512;

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.3f UTC";

/// Render an event for human consumption.
#[must_use]
pub fn format(event: &ClassifiedEvent) -> String {
    match event {
        ClassifiedEvent::Fill(fill) => format!(
            "FILL {} {} {} @ {} order={} at {}",
            fill.symbol,
            fill.side,
            fill.quantity,
            fill.price,
            fill.order_id,
            stamp(&fill.timestamp),
        ),
        ClassifiedEvent::PositionUpdate(update) => {
            let mut out = format!(
                "POSITIONS ({}) at {}",
                update.positions.len(),
                stamp(&update.timestamp)
            );
            for position in &update.positions {
                // Writing into a String cannot fail.
                let _ = write!(
                    out,
                    "\n  {} qty={} avg={}",
                    position.symbol, position.quantity, position.average_price
                );
            }
            out
        }
        ClassifiedEvent::Balances(update) => {
            let mut out = format!(
                "BALANCES ({}) at {}",
                update.balances.len(),
                stamp(&update.timestamp)
            );
            for balance in &update.balances {
                let _ = write!(out, "\n  {} {}", balance.asset, balance.holding);
            }
            out
        }
        ClassifiedEvent::HeartbeatAck { timestamp } => match timestamp {
            Some(ts) => format!("HEARTBEAT at {}", stamp(ts)),
            None => "HEARTBEAT".to_string(),
        },
        ClassifiedEvent::SubscriptionAck { request } => {
            if request == "auth" {
                "AUTHENTICATED".to_string()
            } else {
                format!("SUBSCRIBED {request}")
            }
        }
        ClassifiedEvent::ExchangeError { code, message } => {
            format!("EXCHANGE ERROR {code}: {message}")
        }
        ClassifiedEvent::Unknown { raw } => format!("UNKNOWN {}", truncate(raw)),
    }
}

fn stamp(ts: &DateTime<Utc>) -> String {
    ts.format(TIMESTAMP_FORMAT).to_string()
}

fn truncate(raw: &str) -> String {
    let trimmed = raw.trim();
    match trimmed.char_indices().nth(MAX_RAW_RENDER_LEN) {
        Some((cut, _)) => format!("{}…", &trimmed[..cut]),
        None => trimmed.to_string(),
    }
}
