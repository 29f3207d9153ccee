//! Session State Machine
//!
//! Bookkeeping for the single private-stream connection. The stream client
//! owns the only mutable [`Session`]; everyone else sees snapshots.
//!
//! ```text
//! Disconnected ─► Connecting ─► Authenticating ─► Subscribed ─► Stale
//!      ▲               │               │               │          │
//!      └───────────────┴───── failure ─┴───────────────┴──────────┘
//! ```

use std::fmt;

use chrono::{DateTime, Utc};

/// Exchange network.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Network {
    /// Production.
    #[default]
    Mainnet,
    /// Staging.
    Testnet,
}

impl Network {
    /// Network name as used on the command line.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Mainnet => "mainnet",
            Self::Testnet => "testnet",
        }
    }
}

impl fmt::Display for Network {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle state of the private-stream connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    /// No transport; waiting to (re)connect.
    #[default]
    Disconnected,
    /// Transport handshake in progress.
    Connecting,
    /// Auth frame sent, waiting for the acknowledgment.
    Authenticating,
    /// Authenticated and subscribed; events are flowing.
    Subscribed,
    /// No traffic within the heartbeat window; about to disconnect.
    Stale,
}

impl ConnectionState {
    /// Lower-case name for logs.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Authenticating => "authenticating",
            Self::Subscribed => "subscribed",
            Self::Stale => "stale",
        }
    }
}

/// Why a connection attempt or live connection ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Failure {
    /// Socket error, close frame, or end of stream.
    Transport,
    /// The exchange rejected the auth frame.
    AuthRejected,
    /// The exchange rejected a subscription.
    SubscriptionRejected,
    /// Heartbeat window elapsed without traffic.
    Stale,
}

/// Connection bookkeeping for one stream client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    /// Network the session targets.
    pub network: Network,
    /// WebSocket URL.
    pub endpoint: String,
    /// Current lifecycle state.
    pub state: ConnectionState,
    /// Last time any inbound frame was seen.
    pub last_heartbeat_at: Option<DateTime<Utc>>,
    /// Failures since the last successful subscription.
    pub backoff_attempt: u32,
    /// Auth rejections since the last successful subscription.
    pub consecutive_auth_failures: u32,
    /// Why the most recent connection ended, if one has.
    pub last_failure: Option<Failure>,
}

impl Session {
    /// Fresh, disconnected session.
    #[must_use]
    pub fn new(network: Network, endpoint: impl Into<String>) -> Self {
        Self {
            network,
            endpoint: endpoint.into(),
            state: ConnectionState::Disconnected,
            last_heartbeat_at: None,
            backoff_attempt: 0,
            consecutive_auth_failures: 0,
            last_failure: None,
        }
    }

    /// Disconnected → Connecting.
    pub const fn begin_connecting(&mut self) {
        self.state = ConnectionState::Connecting;
    }

    /// Connecting → Authenticating.
    pub const fn transport_connected(&mut self) {
        self.state = ConnectionState::Authenticating;
    }

    /// Authenticating → Subscribed. Clears the backoff counters.
    pub const fn subscribed(&mut self) {
        self.state = ConnectionState::Subscribed;
        self.backoff_attempt = 0;
        self.consecutive_auth_failures = 0;
    }

    /// Note inbound traffic.
    pub const fn record_heartbeat(&mut self, at: DateTime<Utc>) {
        self.last_heartbeat_at = Some(at);
    }

    /// Subscribed → Stale.
    pub const fn mark_stale(&mut self) {
        self.state = ConnectionState::Stale;
    }

    /// Any state → Disconnected, counting one more backoff attempt.
    pub const fn fail(&mut self, failure: Failure) {
        self.state = ConnectionState::Disconnected;
        self.last_failure = Some(failure);
        self.backoff_attempt = self.backoff_attempt.saturating_add(1);
        if matches!(failure, Failure::AuthRejected) {
            self.consecutive_auth_failures = self.consecutive_auth_failures.saturating_add(1);
        }
    }

    /// Whether events are currently flowing.
    #[must_use]
    pub const fn is_subscribed(&self) -> bool {
        matches!(self.state, ConnectionState::Subscribed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session() -> Session {
        Session::new(Network::Testnet, "ws://localhost")
    }

    #[test]
    fn happy_path_reaches_subscribed() {
        let mut s = session();
        assert_eq!(s.state, ConnectionState::Disconnected);
        s.begin_connecting();
        assert_eq!(s.state, ConnectionState::Connecting);
        s.transport_connected();
        assert_eq!(s.state, ConnectionState::Authenticating);
        s.subscribed();
        assert!(s.is_subscribed());
        assert_eq!(s.backoff_attempt, 0);
    }

    #[test]
    fn auth_rejection_increments_backoff_once() {
        let mut s = session();
        s.begin_connecting();
        s.transport_connected();
        s.fail(Failure::AuthRejected);
        assert_eq!(s.state, ConnectionState::Disconnected);
        assert_eq!(s.backoff_attempt, 1);
        assert_eq!(s.consecutive_auth_failures, 1);

        s.begin_connecting();
        assert_eq!(s.state, ConnectionState::Connecting);
        assert_eq!(s.backoff_attempt, 1);
    }

    #[test]
    fn transport_failure_does_not_count_as_auth_failure() {
        let mut s = session();
        s.fail(Failure::Transport);
        s.fail(Failure::Stale);
        assert_eq!(s.backoff_attempt, 2);
        assert_eq!(s.consecutive_auth_failures, 0);
    }

    #[test]
    fn subscription_resets_counters() {
        let mut s = session();
        s.fail(Failure::AuthRejected);
        s.fail(Failure::AuthRejected);
        s.begin_connecting();
        s.transport_connected();
        s.subscribed();
        assert_eq!(s.backoff_attempt, 0);
        assert_eq!(s.consecutive_auth_failures, 0);
    }

    #[test]
    fn stale_then_failure_disconnects() {
        let mut s = session();
        s.subscribed();
        s.mark_stale();
        assert_eq!(s.state, ConnectionState::Stale);
        s.fail(Failure::Stale);
        assert_eq!(s.state, ConnectionState::Disconnected);
        assert_eq!(s.last_failure, Some(Failure::Stale));
        assert_eq!(s.backoff_attempt, 1);

        // Kept across the next subscription for diagnostics.
        s.subscribed();
        assert_eq!(s.last_failure, Some(Failure::Stale));
    }

    #[test]
    fn network_names() {
        assert_eq!(Network::Mainnet.to_string(), "mainnet");
        assert_eq!(Network::Testnet.as_str(), "testnet");
    }
}
