//! Relay
//!
//! Sole consumer of the raw channel. Each frame is classified and handed to
//! the dispatcher in arrival order.

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::domain::events::{ClassifiedEvent, RawMessage};
use crate::infrastructure::dispatch::Dispatcher;
use crate::infrastructure::metrics;
use crate::infrastructure::woo::{PositionsClient, classify};

/// Classify-and-dispatch loop.
pub struct Relay {
    raw_rx: mpsc::Receiver<RawMessage>,
    dispatcher: Dispatcher,
    cancel: CancellationToken,
}

impl Relay {
    /// Create a relay.
    #[must_use]
    pub const fn new(
        raw_rx: mpsc::Receiver<RawMessage>,
        dispatcher: Dispatcher,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            raw_rx,
            dispatcher,
            cancel,
        }
    }

    /// Run until cancelled or the producer goes away, then hand the
    /// dispatcher back so its queues can be drained.
    pub async fn run(mut self) -> Dispatcher {
        let mut relayed: u64 = 0;

        loop {
            tokio::select! {
                biased;

                () = self.cancel.cancelled() => {
                    let drained = self.drain();
                    tracing::debug!(drained, "Relay cancelled");
                    relayed += drained;
                    break;
                }
                message = self.raw_rx.recv() => {
                    let Some(raw) = message else {
                        tracing::debug!("Raw channel closed");
                        break;
                    };
                    relay(&self.dispatcher, &raw);
                    relayed += 1;
                }
            }
        }

        tracing::info!(relayed, "Relay stopped");
        self.dispatcher
    }

    /// Relay whatever is already buffered without waiting for more.
    fn drain(&mut self) -> u64 {
        let mut drained = 0;
        while let Ok(raw) = self.raw_rx.try_recv() {
            relay(&self.dispatcher, &raw);
            drained += 1;
        }
        drained
    }
}

/// Classify one frame and dispatch it.
pub fn relay(dispatcher: &Dispatcher, raw: &RawMessage) -> ClassifiedEvent {
    let event = classify(raw);
    metrics::record_message_received(event.kind());

    match &event {
        ClassifiedEvent::Fill(fill) => tracing::info!(
            symbol = %fill.symbol,
            side = %fill.side,
            price = %fill.price,
            quantity = %fill.quantity,
            order_id = %fill.order_id,
            "Fill"
        ),
        ClassifiedEvent::PositionUpdate(update) => {
            tracing::info!(positions = update.positions.len(), "Position update");
        }
        ClassifiedEvent::Balances(update) => {
            tracing::info!(balances = update.balances.len(), "Balances");
        }
        ClassifiedEvent::ExchangeError { code, message } => {
            tracing::warn!(code, %message, "Exchange reported an error");
        }
        ClassifiedEvent::Unknown { raw } => tracing::debug!(%raw, "Unrecognised frame"),
        ClassifiedEvent::HeartbeatAck { .. } | ClassifiedEvent::SubscriptionAck { .. } => {
            tracing::trace!(kind = event.kind(), "Control frame");
        }
    }

    dispatcher.dispatch(&event);
    event
}

/// Fetch current positions and dispatch them as one update.
///
/// Returns whether a snapshot was dispatched. Failures are logged only;
/// the stream runs regardless.
pub async fn announce_positions(client: &PositionsClient, dispatcher: &Dispatcher) -> bool {
    match client.fetch().await {
        Ok(update) => {
            tracing::info!(positions = update.positions.len(), "Positions snapshot");
            metrics::record_message_received("position_snapshot");
            dispatcher.dispatch(&ClassifiedEvent::PositionUpdate(update));
            true
        }
        Err(e) => {
            tracing::warn!(error = %e, "Positions snapshot failed, continuing with the stream");
            false
        }
    }
}

/// Fetch spot balances and dispatch them as one event.
///
/// Returns whether balances were dispatched. Like the positions snapshot,
/// a failure is only logged.
pub async fn announce_balances(client: &PositionsClient, dispatcher: &Dispatcher) -> bool {
    match client.fetch_balances().await {
        Ok(update) => {
            tracing::info!(balances = update.balances.len(), "Balances snapshot");
            metrics::record_message_received("balance_snapshot");
            dispatcher.dispatch(&ClassifiedEvent::Balances(update));
            true
        }
        Err(e) => {
            tracing::warn!(error = %e, "Balances snapshot failed, continuing with the stream");
            false
        }
    }
}
