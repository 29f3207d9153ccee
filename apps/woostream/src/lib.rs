#![cfg_attr(
    test,
    allow(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::float_cmp,
        clippy::significant_drop_tightening,
        clippy::too_many_lines,
        clippy::match_same_arms,
        clippy::needless_pass_by_value,
        clippy::needless_collect,
        clippy::option_if_let_else,
        clippy::default_trait_access,
        clippy::items_after_statements,
        clippy::or_fun_call
    )
)]

//! woostream - WOO X Fill Relay
//!
//! Holds one authenticated connection to the WOO X private stream and fans
//! every fill and position update out to the terminal and, optionally, a
//! Telegram chat.
//!
//! # Layers (inside → outside)
//!
//! - **Domain**: Event and session types
//!   - `events`: Raw frames, classified events, text rendering
//!   - `session`: Connection lifecycle state machine
//!
//! - **Application**: Port definitions and the relay loop
//!   - `ports`: The `Sink` interface
//!   - `services`: Relay and start-up positions and balances snapshot
//!
//! - **Infrastructure**: Adapters and external integrations
//!   - `woo`: Signing, stream client, heartbeat, classifier, REST snapshot
//!   - `dispatch`: Per-sink queues, workers, token-bucket limiter
//!   - `sinks`: Shell and Telegram
//!   - `config`, `telemetry`, `metrics`, `backoff`
//!
//! # Data Flow
//!
//! ```text
//!                                                    ┌─ queue ─► ShellSink
//! WOO WS ─► StreamClient ─► mpsc ─► Relay ─► Dispatcher
//!            (Session)              classify         └─ queue ─► limiter ─► TelegramSink
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]

// =============================================================================
// Module Declarations
// =============================================================================

/// Domain layer - Event and session types with no I/O.
pub mod domain;

/// Application layer - Ports and the relay loop.
pub mod application;

/// Infrastructure layer - Adapters and external integrations.
pub mod infrastructure;

// =============================================================================
// Re-exports
// =============================================================================

// Domain types
pub use domain::events::{
    Balance, BalanceUpdate, ClassifiedEvent, Fill, Position, PositionUpdate, RawMessage, Side,
    format,
};
pub use domain::session::{ConnectionState, Network, Session};

// Application
pub use application::ports::{Sink, SinkError, SinkId};
pub use application::services::{Relay, announce_balances, announce_positions};

// Infrastructure config
pub use infrastructure::config::{AppConfig, Cli, ConfigError};

// Dispatch and sinks
pub use infrastructure::dispatch::{Dispatcher, RateLimiter, ShutdownReport, TokenBucket};
pub use infrastructure::sinks::{ShellSink, TelegramConfig, TelegramSink};

// Exchange adapters
pub use infrastructure::woo::{
    Credentials, PositionsClient, StreamClient, StreamClientConfig, StreamClientError, classify,
};

// Metrics
pub use infrastructure::metrics::init_metrics;

// Telemetry
pub use infrastructure::telemetry::{TelemetryConfig, TelemetryGuard, init as init_telemetry};
