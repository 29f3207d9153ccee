//! Private Stream Client
//!
//! Owns the single WebSocket connection to the WOO X private stream and the
//! [`Session`] describing it.
//!
//! # Stream URL
//!
//! - Mainnet: `wss://wss.woo.org/v2/ws/private/stream/{application_id}`
//! - Testnet: `wss://wss.staging.woo.org/v2/ws/private/stream/{application_id}`
//!
//! # Protocol
//!
//! After connecting, send the signed auth frame. On the auth ack, subscribe
//! to `executionreport` and `position`. Every inbound text frame (acks and
//! heartbeats included) is forwarded as a [`RawMessage`] in arrival order.
//! Any failure drops the connection and the whole handshake is repeated
//! after a backoff delay.

use std::time::Duration;

use chrono::Utc;
use futures_util::{SinkExt, StreamExt};
use serde::Serialize;
use tokio::sync::{mpsc, watch};
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::auth::{AUTH_TIMEOUT, AuthError, Credentials};
use super::heartbeat::{HeartbeatConfig, HeartbeatEvent, HeartbeatManager, HeartbeatState};
use super::messages::{Control, Envelope, PRIVATE_TOPICS, PingRequest, PongReply, SubscribeRequest};
use crate::domain::events::RawMessage;
use crate::domain::session::{ConnectionState, Failure, Network, Session};
use crate::infrastructure::backoff::{BackoffConfig, BackoffPolicy};
use crate::infrastructure::metrics;

/// Consecutive auth rejections after which an error diagnostic is logged.
pub const DEFAULT_AUTH_FAILURE_ALERT: u32 = 5;

// =============================================================================
// Error Type
// =============================================================================

/// Errors that end one connection cycle.
#[derive(Debug, thiserror::Error)]
pub enum StreamClientError {
    /// WebSocket error.
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// Writing a frame failed.
    #[error("failed to send {frame} frame: {reason}")]
    Send {
        /// Frame kind.
        frame: &'static str,
        /// Underlying error.
        reason: String,
    },

    /// Authentication failed.
    #[error("authentication failed: {0}")]
    Authentication(#[from] AuthError),

    /// A subscription was refused.
    #[error("subscription rejected: {0}")]
    SubscriptionRejected(String),

    /// No traffic within the heartbeat window.
    #[error("heartbeat timeout")]
    HeartbeatTimeout,

    /// The heartbeat monitor went away, so silence can no longer be detected.
    #[error("heartbeat monitor stopped")]
    HeartbeatStopped,

    /// Connection closed.
    #[error("connection closed")]
    ConnectionClosed,

    /// Nobody is consuming raw messages any more.
    #[error("raw message channel closed")]
    ChannelClosed,
}

impl StreamClientError {
    /// How the session should record this error.
    #[must_use]
    pub const fn failure(&self) -> Failure {
        match self {
            Self::Authentication(AuthError::Rejected(_)) => Failure::AuthRejected,
            Self::SubscriptionRejected(_) => Failure::SubscriptionRejected,
            Self::HeartbeatTimeout => Failure::Stale,
            _ => Failure::Transport,
        }
    }
}

// =============================================================================
// Stream Client Configuration
// =============================================================================

/// Configuration for the private stream client.
#[derive(Debug, Clone)]
pub struct StreamClientConfig {
    /// Network the endpoint belongs to.
    pub network: Network,
    /// WebSocket URL.
    pub endpoint: String,
    /// API credentials.
    pub credentials: Credentials,
    /// Reconnection schedule.
    pub reconnect: BackoffConfig,
    /// Heartbeat configuration.
    pub heartbeat: HeartbeatConfig,
    /// Time allowed for the auth ack.
    pub auth_timeout: Duration,
    /// Consecutive auth rejections before an error is logged.
    pub auth_failure_alert: u32,
}

impl StreamClientConfig {
    /// Configuration with default timings.
    #[must_use]
    pub fn new(network: Network, endpoint: impl Into<String>, credentials: Credentials) -> Self {
        Self {
            network,
            endpoint: endpoint.into(),
            credentials,
            reconnect: BackoffConfig::reconnect(),
            heartbeat: HeartbeatConfig::default(),
            auth_timeout: AUTH_TIMEOUT,
            auth_failure_alert: DEFAULT_AUTH_FAILURE_ALERT,
        }
    }
}

// =============================================================================
// Stream Client
// =============================================================================

/// Private stream client.
///
/// Runs until the cancellation token fires. Connection failures never end
/// the loop; they are logged, counted, and retried with backoff.
pub struct StreamClient {
    config: StreamClientConfig,
    raw_tx: mpsc::Sender<RawMessage>,
    session_tx: watch::Sender<Session>,
    cancel: CancellationToken,
}

impl StreamClient {
    /// Create a client. Raw frames are sent to `raw_tx`.
    #[must_use]
    pub fn new(
        config: StreamClientConfig,
        raw_tx: mpsc::Sender<RawMessage>,
        cancel: CancellationToken,
    ) -> Self {
        let session = Session::new(config.network, config.endpoint.clone());
        let (session_tx, _) = watch::channel(session);
        Self {
            config,
            raw_tx,
            session_tx,
            cancel,
        }
    }

    /// Observe the session.
    #[must_use]
    pub fn session(&self) -> watch::Receiver<Session> {
        self.session_tx.subscribe()
    }

    /// Run the connection loop.
    ///
    /// # Errors
    ///
    /// Returns [`StreamClientError::ChannelClosed`] if the raw message
    /// receiver was dropped. Every other failure is retried.
    pub async fn run(self) -> Result<(), StreamClientError> {
        let mut policy = BackoffPolicy::new(self.config.reconnect);

        loop {
            if self.cancel.is_cancelled() {
                tracing::info!("Stream client cancelled");
                return Ok(());
            }

            self.session_tx.send_modify(Session::begin_connecting);

            let error = match self.connect_and_run(&mut policy).await {
                Ok(()) => {
                    self.session_tx
                        .send_modify(|s| s.state = ConnectionState::Disconnected);
                    tracing::info!("Stream client stopped");
                    return Ok(());
                }
                Err(StreamClientError::ChannelClosed) => {
                    tracing::warn!("Raw message consumer gone, stopping stream client");
                    return Err(StreamClientError::ChannelClosed);
                }
                Err(e) => e,
            };

            self.record_failure(&error);

            let delay = policy
                .next_delay()
                .unwrap_or(self.config.reconnect.max_delay);
            let attempt = self.session_tx.borrow().backoff_attempt;
            tracing::info!(
                attempt,
                delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                "Reconnecting to private stream"
            );

            tokio::select! {
                () = self.cancel.cancelled() => {
                    tracing::info!("Stream client cancelled during reconnect delay");
                    return Ok(());
                }
                () = tokio::time::sleep(delay) => {}
            }
        }
    }

    fn record_failure(&self, error: &StreamClientError) {
        let failure = error.failure();
        self.session_tx.send_modify(|s| s.fail(failure));
        metrics::record_reconnect();

        tracing::warn!(error = %error, "Private stream connection ended");

        if failure == Failure::AuthRejected {
            metrics::record_auth_failure();
            let failures = self.session_tx.borrow().consecutive_auth_failures;
            let threshold = self.config.auth_failure_alert.max(1);
            if failures >= threshold && failures % threshold == 0 {
                tracing::error!(
                    consecutive_failures = failures,
                    "Authentication keeps failing; the API credentials may be invalid"
                );
            }
        }
    }

    /// Connect and stream until error or cancellation.
    async fn connect_and_run(&self, policy: &mut BackoffPolicy) -> Result<(), StreamClientError> {
        tracing::info!(
            network = %self.config.network,
            url = %self.config.endpoint,
            "Connecting to private stream"
        );

        let (ws_stream, _response) = tokio::select! {
            () = self.cancel.cancelled() => return Ok(()),
            result = tokio_tungstenite::connect_async(self.config.endpoint.as_str()) => result?,
        };
        let (mut write, mut read) = ws_stream.split();

        self.session_tx.send_modify(Session::transport_connected);

        let heartbeat_state = std::sync::Arc::new(HeartbeatState::new());
        let (heartbeat_tx, mut heartbeat_rx) = mpsc::channel::<HeartbeatEvent>(10);
        let heartbeat_cancel = self.cancel.child_token();
        let _heartbeat_guard = heartbeat_cancel.clone().drop_guard();
        tokio::spawn(
            HeartbeatManager::new(
                self.config.heartbeat.clone(),
                heartbeat_state.clone(),
                heartbeat_tx,
                heartbeat_cancel,
            )
            .run(),
        );

        let auth = self
            .config
            .credentials
            .auth_request(Uuid::new_v4().to_string(), Utc::now().timestamp_millis())?;
        send_json(&mut write, "auth", &auth).await?;

        let auth_deadline = tokio::time::sleep(self.config.auth_timeout);
        tokio::pin!(auth_deadline);
        let mut authenticated = false;

        loop {
            tokio::select! {
                () = self.cancel.cancelled() => {
                    if let Err(e) = write.close().await {
                        tracing::debug!(error = %e, "Close handshake failed");
                    }
                    return Ok(());
                }
                () = &mut auth_deadline, if !authenticated => {
                    return Err(AuthError::Timeout(self.config.auth_timeout).into());
                }
                heartbeat_event = heartbeat_rx.recv() => {
                    match require_heartbeat(heartbeat_event)? {
                        HeartbeatEvent::SendPing => {
                            send_json(&mut write, "ping", &PingRequest::default()).await?;
                        }
                        HeartbeatEvent::Timeout => {
                            self.session_tx.send_modify(Session::mark_stale);
                            return Err(StreamClientError::HeartbeatTimeout);
                        }
                    }
                }
                msg = read.next() => {
                    match msg {
                        Some(Ok(Message::Text(text))) => {
                            heartbeat_state.record_traffic();
                            self.handle_text(text.as_str(), &mut write, policy, &mut authenticated)
                                .await?;
                        }
                        Some(Ok(Message::Binary(data))) => {
                            heartbeat_state.record_traffic();
                            match std::str::from_utf8(&data) {
                                Ok(text) => {
                                    self.handle_text(text, &mut write, policy, &mut authenticated)
                                        .await?;
                                }
                                Err(_) => {
                                    tracing::warn!(len = data.len(), "Received non-UTF8 binary frame");
                                }
                            }
                        }
                        Some(Ok(Message::Ping(data))) => {
                            heartbeat_state.record_traffic();
                            write.send(Message::Pong(data)).await?;
                        }
                        Some(Ok(Message::Pong(_))) => {
                            heartbeat_state.record_traffic();
                        }
                        Some(Ok(Message::Close(frame))) => {
                            tracing::info!(?frame, "Server sent close frame");
                            return Err(StreamClientError::ConnectionClosed);
                        }
                        Some(Ok(_)) => {}
                        Some(Err(e)) => return Err(e.into()),
                        None => {
                            tracing::info!("WebSocket stream ended");
                            return Err(StreamClientError::ConnectionClosed);
                        }
                    }
                }
            }
        }
    }

    /// Forward one text frame, then act on it if it is a control frame.
    async fn handle_text<W>(
        &self,
        text: &str,
        write: &mut W,
        policy: &mut BackoffPolicy,
        authenticated: &mut bool,
    ) -> Result<(), StreamClientError>
    where
        W: SinkExt<Message> + Unpin,
        W::Error: std::fmt::Display,
    {
        let now = Utc::now();
        self.session_tx.send_modify(|s| s.record_heartbeat(now));

        self.raw_tx
            .send(RawMessage {
                payload: text.to_string(),
                received_at: now,
            })
            .await
            .map_err(|_| StreamClientError::ChannelClosed)?;

        let Some(control) = Envelope::parse(text).ok().and_then(|e| e.control()) else {
            return Ok(());
        };

        match control {
            Control::Ping => {
                send_json(write, "pong", &PongReply::new(now.timestamp_millis())).await?;
            }
            Control::Pong => {}
            Control::AuthAccepted => {
                *authenticated = true;
                for topic in PRIVATE_TOPICS {
                    let request = SubscribeRequest::new(Uuid::new_v4().to_string(), topic);
                    send_json(write, "subscribe", &request).await?;
                }
                self.session_tx.send_modify(Session::subscribed);
                policy.reset();
                tracing::info!(topics = ?PRIVATE_TOPICS, "Authenticated, subscribed to private topics");
            }
            Control::AuthRejected(reason) => {
                return Err(AuthError::Rejected(reason).into());
            }
            Control::Subscribed(topic) => {
                tracing::debug!(%topic, "Subscription confirmed");
            }
            Control::SubscribeRejected(reason) => {
                return Err(StreamClientError::SubscriptionRejected(reason));
            }
        }

        Ok(())
    }
}

async fn send_json<W, T>(write: &mut W, frame: &'static str, value: &T) -> Result<(), StreamClientError>
where
    W: SinkExt<Message> + Unpin,
    W::Error: std::fmt::Display,
    T: Serialize,
{
    let json = serde_json::to_string(value).map_err(|e| StreamClientError::Send {
        frame,
        reason: e.to_string(),
    })?;
    write
        .send(Message::Text(json.into()))
        .await
        .map_err(|e| StreamClientError::Send {
            frame,
            reason: e.to_string(),
        })
}

/// A closed heartbeat channel ends the connection; staying up without a
/// monitor would never notice a silent peer.
fn require_heartbeat(event: Option<HeartbeatEvent>) -> Result<HeartbeatEvent, StreamClientError> {
    event.ok_or(StreamClientError::HeartbeatStopped)
}
