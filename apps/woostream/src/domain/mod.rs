//! Domain Layer - Core event and session types.
//!
//! Pure types with no I/O: what the stream produces and how the single
//! connection's lifecycle is tracked.

/// Raw and classified stream events, and their text rendering.
pub mod events;

/// Connection lifecycle state machine.
pub mod session;
