//! Application Services
//!
//! - `Relay`: classifies raw frames and hands them to the dispatcher
//! - `announce_positions`: start-up positions snapshot

mod relay;

pub use relay::{Relay, announce_balances, announce_positions, relay};
