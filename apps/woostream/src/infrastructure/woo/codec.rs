//! Message Classifier
//!
//! Turns each inbound text frame into exactly one [`ClassifiedEvent`].
//! Classification never fails: frames that are not JSON objects, that carry
//! an unexpected topic, or whose payload does not decode are returned as
//! [`ClassifiedEvent::Unknown`] with the payload untouched.
//!
//! | Frame                                          | Event              |
//! |------------------------------------------------|--------------------|
//! | `success:false` or a non-zero `code`           | `ExchangeError`    |
//! | `event:"ping"` / `event:"pong"`                | `HeartbeatAck`     |
//! | `event:"auth"` / `event:"subscribe"`, success  | `SubscriptionAck`  |
//! | `topic:"executionreport"` with executed qty    | `Fill`             |
//! | `topic:"position"`                             | `PositionUpdate`   |
//! | anything else                                  | `Unknown`          |

use serde_json::Value;

use super::messages::{
    Envelope, ExecutionReport, PositionsData, TOPIC_EXECUTION_REPORT, TOPIC_POSITION,
    millis_to_datetime,
};
use crate::domain::events::{ClassifiedEvent, Fill, Position, PositionUpdate, RawMessage};

/// Classify one raw frame.
#[must_use]
pub fn classify(raw: &RawMessage) -> ClassifiedEvent {
    let Ok(envelope) = Envelope::parse(&raw.payload) else {
        return unknown(raw);
    };

    if envelope.is_failure() || envelope.error_code() != 0 {
        return ClassifiedEvent::ExchangeError {
            code: envelope.error_code(),
            message: envelope.error_message(),
        };
    }

    match (envelope.event.as_deref(), envelope.topic.as_deref()) {
        (Some("ping" | "pong"), _) => ClassifiedEvent::HeartbeatAck {
            timestamp: envelope.timestamp(),
        },
        (Some("auth"), _) if envelope.success == Some(true) => ClassifiedEvent::SubscriptionAck {
            request: "auth".to_string(),
        },
        (Some("subscribe"), _) if envelope.success == Some(true) => {
            ClassifiedEvent::SubscriptionAck {
                request: envelope.subscribed_topic(),
            }
        }
        (_, Some(TOPIC_EXECUTION_REPORT)) => {
            classify_execution_report(&envelope, raw).unwrap_or_else(|| unknown(raw))
        }
        (_, Some(TOPIC_POSITION)) => {
            classify_positions(&envelope, raw).unwrap_or_else(|| unknown(raw))
        }
        _ => unknown(raw),
    }
}

fn classify_execution_report(envelope: &Envelope, raw: &RawMessage) -> Option<ClassifiedEvent> {
    let data = envelope.data.clone()?;
    let report: ExecutionReport = serde_json::from_value(data).ok()?;
    if !report.is_fill() {
        return None;
    }

    let timestamp = report
        .timestamp
        .as_ref()
        .and_then(millis_to_datetime)
        .or_else(|| envelope.timestamp())
        .unwrap_or(raw.received_at);

    Some(ClassifiedEvent::Fill(Fill {
        symbol: report.symbol,
        side: report.side,
        price: report.executed_price,
        quantity: report.executed_quantity,
        order_id: report.order_id.to_string(),
        timestamp,
    }))
}

fn classify_positions(envelope: &Envelope, raw: &RawMessage) -> Option<ClassifiedEvent> {
    let data = envelope.data.clone().filter(Value::is_object)?;
    let payload: PositionsData = serde_json::from_value(data).ok()?;

    Some(ClassifiedEvent::PositionUpdate(PositionUpdate {
        positions: positions_from(payload),
        timestamp: envelope.timestamp().unwrap_or(raw.received_at),
    }))
}

/// Convert a decoded positions payload into domain positions.
#[must_use]
pub fn positions_from(payload: PositionsData) -> Vec<Position> {
    payload
        .into_entries()
        .into_iter()
        .map(|(symbol, entry)| Position {
            symbol,
            quantity: entry.holding,
            average_price: entry.average_open_price,
        })
        .collect()
}

fn unknown(raw: &RawMessage) -> ClassifiedEvent {
    ClassifiedEvent::Unknown {
        raw: raw.payload.clone(),
    }
}
