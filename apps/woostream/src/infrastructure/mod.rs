//! Infrastructure Layer - Adapters and external integrations.
//!
//! Concrete implementations behind the application layer: the exchange
//! connection, the sinks, and the dispatcher that feeds them.

/// Exponential backoff with jitter.
pub mod backoff;

/// Command line and validated settings.
pub mod config;

/// Per-sink queues, workers, and rate limiting.
pub mod dispatch;

/// Prometheus metrics instrumentation.
pub mod metrics;

/// Shell and Telegram sinks.
pub mod sinks;

/// Logging and optional OpenTelemetry export.
pub mod telemetry;

/// WOO X private stream and REST adapters.
pub mod woo;

#[cfg(test)]
pub(crate) mod test_support;
