//! Application Layer - Use cases and port definitions.
//!
//! Defines the sink port and the relay loop that connects the stream
//! client to the dispatcher.

/// Port interfaces for delivery targets.
pub mod ports;

/// Application services (the relay loop).
pub mod services;
