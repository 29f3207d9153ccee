//! Command Line
//!
//! Every flag can also come from the environment (or a `.env` file loaded
//! before parsing).

use clap::{Parser, ValueEnum};

use crate::domain::session::Network;

/// Network selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum NetworkArg {
    /// Production (`*.woo.org`).
    Mainnet,
    /// Staging (`*.staging.woo.org`).
    Testnet,
}

impl From<NetworkArg> for Network {
    fn from(arg: NetworkArg) -> Self {
        match arg {
            NetworkArg::Mainnet => Self::Mainnet,
            NetworkArg::Testnet => Self::Testnet,
        }
    }
}

/// Stream fills and position updates from WOO X.
#[derive(Debug, Clone, Parser)]
#[command(name = "woostream", version, about, long_about = None)]
pub struct Cli {
    /// Exchange network.
    #[arg(long, env = "WOO_NETWORK", value_enum, default_value_t = NetworkArg::Mainnet)]
    pub network: NetworkArg,

    /// Application id (part of the private stream URL).
    #[arg(long, env = "WOO_APPLICATION_ID")]
    pub application_id: String,

    /// API public key.
    #[arg(long, env = "WOO_API_PUBLIC_KEY")]
    pub api_public_key: String,

    /// API secret key.
    #[arg(long, env = "WOO_API_SECRET_KEY", hide_env_values = true)]
    pub api_secret_key: String,

    /// Telegram bot token; requires --telegram-chat-id.
    #[arg(long, env = "TELEGRAM_BOT_TOKEN", hide_env_values = true)]
    pub telegram_token: Option<String>,

    /// Telegram chat id; requires --telegram-token.
    #[arg(long, env = "TELEGRAM_CHAT_ID")]
    pub telegram_chat_id: Option<String>,

    /// Override the private stream URL.
    #[arg(long, env = "WOO_ENDPOINT")]
    pub endpoint: Option<String>,

    /// Seconds between client pings.
    #[arg(long, env = "WOOSTREAM_HEARTBEAT_INTERVAL_SECS", default_value_t = 10)]
    pub heartbeat_interval_secs: u64,

    /// Silent heartbeat intervals tolerated before reconnecting.
    #[arg(long, env = "WOOSTREAM_MISSED_HEARTBEATS", default_value_t = 3)]
    pub missed_heartbeats: u32,

    /// Upper bound on the reconnect delay, in seconds.
    #[arg(long, env = "WOOSTREAM_RECONNECT_DELAY_MAX_SECS", default_value_t = 30)]
    pub reconnect_delay_max_secs: u64,

    /// Sustained Telegram messages per second.
    #[arg(long, env = "WOOSTREAM_TELEGRAM_RATE", default_value_t = 24)]
    pub telegram_rate: u32,

    /// Telegram messages sent back to back after a quiet spell. Burst plus
    /// rate must stay below 30.
    #[arg(long, env = "WOOSTREAM_TELEGRAM_BURST", default_value_t = 5)]
    pub telegram_burst: u32,

    /// Serve Prometheus metrics on this port.
    #[arg(long, env = "WOOSTREAM_METRICS_PORT")]
    pub metrics_port: Option<u16>,

    /// Do not fetch current positions and balances at start-up.
    #[arg(long, env = "WOOSTREAM_SKIP_POSITION_SNAPSHOT")]
    pub skip_position_snapshot: bool,
}
