//! Port Interfaces
//!
//! Contracts the delivery layer depends on. Infrastructure adapters
//! (terminal output, Telegram) implement [`Sink`].

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;

/// Identifier assigned to a sink when it is registered with the dispatcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SinkId(pub usize);

impl fmt::Display for SinkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sink-{}", self.0)
    }
}

/// Errors a sink can report for a single delivery.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SinkError {
    /// Worth retrying (network blip, 5xx).
    #[error("transient delivery failure: {0}")]
    Transient(String),

    /// The remote asked us to slow down.
    #[error("rate limited by remote, retry after {0:?}")]
    RateLimited(Duration),

    /// The remote refused this message; retrying will not help.
    #[error("delivery rejected: {0}")]
    Permanent(String),

    /// The sink can no longer deliver anything.
    #[error("sink closed: {0}")]
    Closed(String),
}

impl SinkError {
    /// Whether the same message may succeed on another attempt.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Transient(_) | Self::RateLimited(_))
    }

    /// Minimum wait requested by the remote, if any.
    #[must_use]
    pub const fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::RateLimited(after) => Some(*after),
            _ => None,
        }
    }
}

/// A delivery target for rendered events.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Sink: Send + Sync {
    /// Short stable name used in logs and metric labels.
    fn name(&self) -> &'static str;

    /// Deliver one rendered event.
    async fn deliver(&self, text: &str) -> Result<(), SinkError>;
}
