//! Relay Configuration Settings
//!
//! Typed settings built from the parsed command line and validated once at
//! start-up. Anything wrong here is fatal.

use std::time::Duration;

use super::cli::Cli;
use crate::domain::session::Network;
use crate::infrastructure::backoff::BackoffConfig;
use crate::infrastructure::sinks::telegram::{self, TelegramConfig};
use crate::infrastructure::woo::auth::{AUTH_TIMEOUT, AuthError, Credentials};
use crate::infrastructure::woo::stream::{DEFAULT_AUTH_FAILURE_ALERT, StreamClientConfig};
use crate::infrastructure::woo::heartbeat::HeartbeatConfig;

/// REST base URL for `network`.
#[must_use]
pub const fn rest_url(network: Network) -> &'static str {
    match network {
        Network::Mainnet => "https://api.woo.org",
        Network::Testnet => "https://api.staging.woo.org",
    }
}

/// Private stream URL for `network` and `application_id`.
#[must_use]
pub fn private_stream_url(network: Network, application_id: &str) -> String {
    let host = match network {
        Network::Mainnet => "wss.woo.org",
        Network::Testnet => "wss.staging.woo.org",
    };
    format!("wss://{host}/v2/ws/private/stream/{application_id}")
}

/// Private stream connection settings.
#[derive(Debug, Clone)]
pub struct StreamSettings {
    /// Client ping interval.
    pub heartbeat_interval: Duration,
    /// Silent intervals tolerated before the connection is stale.
    pub missed_heartbeats: u32,
    /// Initial reconnection delay.
    pub reconnect_delay_initial: Duration,
    /// Maximum reconnection delay.
    pub reconnect_delay_max: Duration,
    /// Reconnection delay multiplier for exponential backoff.
    pub reconnect_delay_multiplier: f64,
    /// Reconnection jitter as a fraction of the delay.
    pub reconnect_jitter: f64,
    /// Time allowed for the auth ack.
    pub auth_timeout: Duration,
    /// Consecutive auth rejections before an error is logged.
    pub auth_failure_alert: u32,
    /// Capacity of the raw message channel.
    pub raw_channel_capacity: usize,
}

impl Default for StreamSettings {
    fn default() -> Self {
        Self {
            heartbeat_interval: Duration::from_secs(10),
            missed_heartbeats: 3,
            reconnect_delay_initial: Duration::from_millis(500),
            reconnect_delay_max: Duration::from_secs(30),
            reconnect_delay_multiplier: 2.0,
            reconnect_jitter: 0.1,
            auth_timeout: AUTH_TIMEOUT,
            auth_failure_alert: DEFAULT_AUTH_FAILURE_ALERT,
            raw_channel_capacity: 1024,
        }
    }
}

impl StreamSettings {
    /// Reconnect schedule.
    #[must_use]
    pub const fn reconnect(&self) -> BackoffConfig {
        BackoffConfig::new(
            self.reconnect_delay_initial,
            self.reconnect_delay_max,
            self.reconnect_delay_multiplier,
            self.reconnect_jitter,
            0,
        )
    }

    /// Heartbeat schedule.
    #[must_use]
    pub const fn heartbeat(&self) -> HeartbeatConfig {
        HeartbeatConfig::new(self.heartbeat_interval, self.missed_heartbeats)
    }
}

/// Sink delivery settings.
#[derive(Debug, Clone)]
pub struct DeliverySettings {
    /// Retry schedule for transient failures.
    pub retry: BackoffConfig,
    /// How long shutdown waits for queues to drain.
    pub shutdown_grace: Duration,
}

impl Default for DeliverySettings {
    fn default() -> Self {
        Self {
            retry: BackoffConfig::delivery(),
            shutdown_grace: Duration::from_secs(10),
        }
    }
}

/// Telegram sink settings.
#[derive(Clone)]
pub struct TelegramSettings {
    /// Bot token.
    pub bot_token: String,
    /// Destination chat.
    pub chat_id: String,
    /// Token bucket capacity.
    pub capacity: u32,
    /// Token bucket refill, per second.
    pub refill_per_sec: f64,
}

impl TelegramSettings {
    /// Telegram's per-chat ceiling, in messages per second.
    pub const CEILING_PER_SEC: u32 = 30;
    /// Default burst.
    pub const DEFAULT_BURST: u32 = 5;
    /// Default sustained rate, per second.
    pub const DEFAULT_RATE: u32 = 24;

    /// Most messages the bucket can release in one second: a full burst
    /// plus one second of refill.
    #[must_use]
    pub fn peak_per_sec(&self) -> f64 {
        f64::from(self.capacity) + self.refill_per_sec
    }

    /// Sink configuration.
    #[must_use]
    pub fn sink_config(&self) -> TelegramConfig {
        TelegramConfig::new(self.bot_token.clone(), self.chat_id.clone())
    }
}

impl std::fmt::Debug for TelegramSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TelegramSettings")
            .field("bot_token", &"[REDACTED]")
            .field("chat_id", &self.chat_id)
            .field("capacity", &self.capacity)
            .field("refill_per_sec", &self.refill_per_sec)
            .finish()
    }
}

/// Complete relay configuration.
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Exchange network.
    pub network: Network,
    /// API credentials.
    pub credentials: Credentials,
    /// Private stream URL.
    pub endpoint: String,
    /// REST base URL.
    pub rest_url: String,
    /// Stream settings.
    pub stream: StreamSettings,
    /// Delivery settings.
    pub delivery: DeliverySettings,
    /// Telegram settings, when enabled.
    pub telegram: Option<TelegramSettings>,
    /// Prometheus exporter port.
    pub metrics_port: Option<u16>,
    /// Whether to fetch positions and balances at start-up.
    pub position_snapshot: bool,
}

impl AppConfig {
    /// Build and validate configuration from the command line.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] for unusable credentials, an incomplete or
    /// malformed Telegram setup, or out-of-range tuning values.
    pub fn from_cli(cli: Cli) -> Result<Self, ConfigError> {
        let network = Network::from(cli.network);
        let credentials =
            Credentials::new(cli.application_id, cli.api_public_key, cli.api_secret_key)?;

        let endpoint = match cli.endpoint.filter(|e| !e.trim().is_empty()) {
            Some(endpoint) => {
                let endpoint = endpoint.trim().to_string();
                if !(endpoint.starts_with("ws://") || endpoint.starts_with("wss://")) {
                    return Err(ConfigError::InvalidValue {
                        field: "endpoint",
                        reason: format!("expected a ws:// or wss:// URL, got {endpoint}"),
                    });
                }
                endpoint
            }
            None => private_stream_url(network, credentials.application_id()),
        };

        if cli.heartbeat_interval_secs == 0 {
            return Err(ConfigError::InvalidValue {
                field: "heartbeat-interval-secs",
                reason: "must be at least 1".to_string(),
            });
        }
        if cli.reconnect_delay_max_secs == 0 {
            return Err(ConfigError::InvalidValue {
                field: "reconnect-delay-max-secs",
                reason: "must be at least 1".to_string(),
            });
        }

        let defaults = StreamSettings::default();
        let reconnect_delay_max = Duration::from_secs(cli.reconnect_delay_max_secs);
        let stream = StreamSettings {
            heartbeat_interval: Duration::from_secs(cli.heartbeat_interval_secs),
            missed_heartbeats: cli.missed_heartbeats.max(1),
            reconnect_delay_initial: defaults.reconnect_delay_initial.min(reconnect_delay_max),
            reconnect_delay_max,
            ..defaults
        };

        let telegram = telegram_settings(
            cli.telegram_token,
            cli.telegram_chat_id,
            cli.telegram_burst,
            cli.telegram_rate,
        )?;

        Ok(Self {
            network,
            credentials,
            endpoint,
            rest_url: rest_url(network).to_string(),
            stream,
            delivery: DeliverySettings::default(),
            telegram,
            metrics_port: cli.metrics_port,
            position_snapshot: !cli.skip_position_snapshot,
        })
    }

    /// Stream client configuration.
    #[must_use]
    pub fn stream_client_config(&self) -> StreamClientConfig {
        StreamClientConfig {
            reconnect: self.stream.reconnect(),
            heartbeat: self.stream.heartbeat(),
            auth_timeout: self.stream.auth_timeout,
            auth_failure_alert: self.stream.auth_failure_alert,
            ..StreamClientConfig::new(self.network, self.endpoint.clone(), self.credentials.clone())
        }
    }
}

fn telegram_settings(
    token: Option<String>,
    chat_id: Option<String>,
    burst: u32,
    rate: u32,
) -> Result<Option<TelegramSettings>, ConfigError> {
    let token = token.map(|t| t.trim().to_string()).filter(|t| !t.is_empty());
    let chat_id = chat_id.map(|c| c.trim().to_string()).filter(|c| !c.is_empty());

    match (token, chat_id) {
        (None, None) => Ok(None),
        (Some(_), None) => Err(ConfigError::TelegramIncomplete("--telegram-chat-id")),
        (None, Some(_)) => Err(ConfigError::TelegramIncomplete("--telegram-token")),
        (Some(bot_token), Some(chat_id)) => {
            if !telegram::is_valid_token(&bot_token) {
                return Err(ConfigError::InvalidTelegramToken);
            }
            if burst == 0 {
                return Err(ConfigError::InvalidValue {
                    field: "telegram-burst",
                    reason: "must be at least 1".to_string(),
                });
            }
            if rate == 0 {
                return Err(ConfigError::InvalidValue {
                    field: "telegram-rate",
                    reason: "must be at least 1".to_string(),
                });
            }
            // An idle bucket releases the burst and then a second of refill
            // inside one window; that total must stay under the ceiling.
            if burst.saturating_add(rate) >= TelegramSettings::CEILING_PER_SEC {
                return Err(ConfigError::InvalidValue {
                    field: "telegram-rate",
                    reason: format!(
                        "burst {burst} + rate {rate} must stay below {} messages per second",
                        TelegramSettings::CEILING_PER_SEC
                    ),
                });
            }
            Ok(Some(TelegramSettings {
                bot_token,
                chat_id,
                capacity: burst,
                refill_per_sec: f64::from(rate),
            }))
        }
    }
}

/// Configuration error.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Credentials are missing or malformed.
    #[error("invalid credentials: {0}")]
    Credentials(#[from] AuthError),

    /// Only half of the Telegram settings were supplied.
    #[error("Telegram output needs {0} as well")]
    TelegramIncomplete(&'static str),

    /// The bot token is not `<id>:<secret>`.
    #[error("Telegram bot token is malformed (expected <bot id>:<secret>)")]
    InvalidTelegramToken,

    /// A tuning value is out of range.
    #[error("invalid --{field}: {reason}")]
    InvalidValue {
        /// Flag name.
        field: &'static str,
        /// What is wrong with it.
        reason: String,
    },
}

#[cfg(test)]
mod tests {
    use clap::Parser;

    use super::*;

    const PUBLIC: &str = "AbmyVJGUpN064ks5ELjLfA==";
    const TOKEN: &str = "123456:ABC-def";

    fn cli(extra: &[&str]) -> Cli {
        let mut args = vec![
            "woostream",
            "--application-id",
            "app-id",
            "--api-public-key",
            PUBLIC,
            "--api-secret-key",
            "secret",
        ];
        args.extend_from_slice(extra);
        Cli::try_parse_from(args).unwrap()
    }

    #[test]
    fn endpoints_per_network() {
        assert_eq!(
            private_stream_url(Network::Mainnet, "abc"),
            "wss://wss.woo.org/v2/ws/private/stream/abc"
        );
        assert_eq!(
            private_stream_url(Network::Testnet, "abc"),
            "wss://wss.staging.woo.org/v2/ws/private/stream/abc"
        );
        assert_eq!(rest_url(Network::Mainnet), "https://api.woo.org");
        assert_eq!(rest_url(Network::Testnet), "https://api.staging.woo.org");
    }

    #[test]
    fn defaults_from_minimal_cli() {
        let config = AppConfig::from_cli(cli(&[])).unwrap();
        assert_eq!(config.network, Network::Mainnet);
        assert_eq!(config.endpoint, "wss://wss.woo.org/v2/ws/private/stream/app-id");
        assert_eq!(config.stream.heartbeat_interval, Duration::from_secs(10));
        assert_eq!(config.stream.raw_channel_capacity, 1024);
        assert_eq!(config.delivery.shutdown_grace, Duration::from_secs(10));
        assert_eq!(config.delivery.retry.max_attempts, 5);
        assert!(config.telegram.is_none());
        assert!(config.position_snapshot);
    }

    #[test]
    fn endpoint_override() {
        let config = AppConfig::from_cli(cli(&["--endpoint", "ws://127.0.0.1:9000/ws"])).unwrap();
        assert_eq!(config.endpoint, "ws://127.0.0.1:9000/ws");
        assert_eq!(config.stream_client_config().endpoint, "ws://127.0.0.1:9000/ws");
    }

    #[test]
    fn endpoint_must_be_websocket() {
        assert!(matches!(
            AppConfig::from_cli(cli(&["--endpoint", "https://example.com"])),
            Err(ConfigError::InvalidValue { field: "endpoint", .. })
        ));
    }

    #[test]
    fn empty_secret_is_config_error() {
        let parsed = Cli::try_parse_from([
            "woostream",
            "--application-id",
            "app",
            "--api-public-key",
            PUBLIC,
            "--api-secret-key",
            "",
        ])
        .unwrap();
        assert!(matches!(
            AppConfig::from_cli(parsed),
            Err(ConfigError::Credentials(AuthError::Malformed(_)))
        ));
    }

    #[test]
    fn bad_public_key_is_config_error() {
        let parsed = Cli::try_parse_from([
            "woostream",
            "--application-id",
            "app",
            "--api-public-key",
            "%%%",
            "--api-secret-key",
            "secret",
        ])
        .unwrap();
        assert!(matches!(
            AppConfig::from_cli(parsed),
            Err(ConfigError::Credentials(_))
        ));
    }

    #[test]
    fn telegram_requires_both_halves() {
        assert!(matches!(
            AppConfig::from_cli(cli(&["--telegram-token", TOKEN])),
            Err(ConfigError::TelegramIncomplete("--telegram-chat-id"))
        ));
        assert!(matches!(
            AppConfig::from_cli(cli(&["--telegram-chat-id", "42"])),
            Err(ConfigError::TelegramIncomplete("--telegram-token"))
        ));
    }

    #[test]
    fn telegram_token_format_is_checked() {
        assert!(matches!(
            AppConfig::from_cli(cli(&["--telegram-token", "nope", "--telegram-chat-id", "42"])),
            Err(ConfigError::InvalidTelegramToken)
        ));
    }

    #[test]
    fn telegram_enabled_with_default_rate() {
        let config =
            AppConfig::from_cli(cli(&["--telegram-token", TOKEN, "--telegram-chat-id", "42"]))
                .unwrap();
        let telegram = config.telegram.unwrap();
        assert_eq!(telegram.capacity, TelegramSettings::DEFAULT_BURST);
        assert!((telegram.refill_per_sec - 24.0).abs() < f64::EPSILON);
        assert!(telegram.peak_per_sec() < f64::from(TelegramSettings::CEILING_PER_SEC));
        assert!(!format!("{telegram:?}").contains(TOKEN));
    }

    #[test]
    fn telegram_pacing_must_stay_under_ceiling() {
        let enabled = ["--telegram-token", TOKEN, "--telegram-chat-id", "42"];
        let with = |extra: &[&'static str]| {
            let mut args = enabled.to_vec();
            args.extend_from_slice(extra);
            AppConfig::from_cli(cli(&args))
        };

        assert!(matches!(
            with(&["--telegram-burst", "25", "--telegram-rate", "25"]),
            Err(ConfigError::InvalidValue { field: "telegram-rate", .. })
        ));
        assert!(matches!(
            with(&["--telegram-burst", "1", "--telegram-rate", "29"]),
            Err(ConfigError::InvalidValue { .. })
        ));
        assert!(matches!(
            with(&["--telegram-burst", "0"]),
            Err(ConfigError::InvalidValue { field: "telegram-burst", .. })
        ));

        let telegram = with(&["--telegram-burst", "10", "--telegram-rate", "19"])
            .unwrap()
            .telegram
            .unwrap();
        assert_eq!(telegram.capacity, 10);
        assert!((telegram.peak_per_sec() - 29.0).abs() < f64::EPSILON);
    }

    #[test]
    fn tuning_flags_flow_into_stream_config() {
        let config = AppConfig::from_cli(cli(&[
            "--heartbeat-interval-secs",
            "5",
            "--missed-heartbeats",
            "2",
            "--reconnect-delay-max-secs",
            "8",
            "--skip-position-snapshot",
        ]))
        .unwrap();
        let stream = config.stream_client_config();
        assert_eq!(stream.heartbeat.interval, Duration::from_secs(5));
        assert_eq!(stream.heartbeat.missed_beats, 2);
        assert_eq!(stream.reconnect.max_delay, Duration::from_secs(8));
        assert!(!config.position_snapshot);
    }

    #[test]
    fn zero_heartbeat_is_rejected() {
        assert!(matches!(
            AppConfig::from_cli(cli(&["--heartbeat-interval-secs", "0"])),
            Err(ConfigError::InvalidValue { .. })
        ));
    }
}
