//! Sink Adapters
//!
//! - **Shell**: lines on standard output, unlimited rate
//! - **Telegram**: Bot API messages, paced by a token bucket

pub mod shell;
pub mod telegram;

pub use shell::ShellSink;
pub use telegram::{TelegramConfig, TelegramSink, VerifyError};
