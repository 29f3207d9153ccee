//! WOO X Adapters
//!
//! - **Stream**: private WebSocket stream (auth, subscribe, heartbeat, reconnect)
//! - **Codec**: classification of inbound frames
//! - **REST**: start-up positions and balances snapshot

pub mod auth;
pub mod codec;
pub mod heartbeat;
pub mod messages;
pub mod rest;
pub mod stream;

pub use auth::{AuthError, Credentials, canonical_string, sign};
pub use codec::classify;
pub use heartbeat::{HeartbeatConfig, HeartbeatEvent, HeartbeatManager, HeartbeatState};
pub use rest::{PositionsClient, SnapshotError};
pub use stream::{StreamClient, StreamClientConfig, StreamClientError};
