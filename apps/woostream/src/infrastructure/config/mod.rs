//! Configuration Module
//!
//! Command-line parsing and the validated settings derived from it.

mod cli;
mod settings;

pub use cli::{Cli, NetworkArg};
pub use settings::{
    AppConfig, ConfigError, DeliverySettings, StreamSettings, TelegramSettings, private_stream_url,
    rest_url,
};
