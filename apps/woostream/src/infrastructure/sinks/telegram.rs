//! Telegram Sink
//!
//! Sends each rendered event as a message through the Telegram Bot API.
//! Pacing is done by the dispatcher's rate limiter; this type only maps
//! HTTP outcomes to [`SinkError`]s:
//!
//! | Response                 | Result                          |
//! |--------------------------|---------------------------------|
//! | 2xx                      | delivered                       |
//! | 429                      | `RateLimited(retry_after)`      |
//! | 5xx, network failure     | `Transient`                     |
//! | other 4xx                | `Permanent` (this message only) |

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;

use crate::application::ports::{Sink, SinkError};

/// Bot API base URL.
pub const TELEGRAM_API_URL: &str = "https://api.telegram.org";

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);
const DEFAULT_RETRY_AFTER: Duration = Duration::from_secs(1);

/// Telegram sink configuration.
#[derive(Clone)]
pub struct TelegramConfig {
    /// Bot token from @BotFather.
    pub bot_token: String,
    /// Destination chat.
    pub chat_id: String,
    /// API base URL.
    pub api_url: String,
}

impl TelegramConfig {
    /// Configuration against the public Bot API.
    #[must_use]
    pub fn new(bot_token: impl Into<String>, chat_id: impl Into<String>) -> Self {
        Self {
            bot_token: bot_token.into(),
            chat_id: chat_id.into(),
            api_url: TELEGRAM_API_URL.to_string(),
        }
    }

    /// Point at another API host.
    #[must_use]
    pub fn with_api_url(mut self, api_url: impl Into<String>) -> Self {
        self.api_url = api_url.into().trim_end_matches('/').to_string();
        self
    }
}

impl std::fmt::Debug for TelegramConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TelegramConfig")
            .field("bot_token", &"[REDACTED]")
            .field("chat_id", &self.chat_id)
            .field("api_url", &self.api_url)
            .finish()
    }
}

/// Whether `token` looks like `<bot id>:<secret>`.
#[must_use]
pub fn is_valid_token(token: &str) -> bool {
    let Some((id, secret)) = token.split_once(':') else {
        return false;
    };
    !id.is_empty()
        && id.bytes().all(|b| b.is_ascii_digit())
        && !secret.is_empty()
        && secret
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'_' || b == b'-')
}

/// Start-up check outcome for the bot token.
#[derive(Debug, thiserror::Error)]
pub enum VerifyError {
    /// Telegram refused the token.
    #[error("Telegram rejected the bot token (HTTP {0})")]
    Unauthorized(u16),

    /// Telegram could not be reached or answered oddly.
    #[error("Telegram verification unavailable: {0}")]
    Unavailable(String),
}

#[derive(Debug, Deserialize)]
struct ApiResponse {
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    parameters: Option<ResponseParameters>,
}

#[derive(Debug, Deserialize)]
struct ResponseParameters {
    #[serde(default)]
    retry_after: Option<u64>,
}

/// Telegram Bot API sink.
pub struct TelegramSink {
    config: TelegramConfig,
    client: reqwest::Client,
}

impl TelegramSink {
    /// Create a sink.
    ///
    /// # Errors
    ///
    /// Returns the `reqwest` error if the HTTP client cannot be built.
    pub fn new(config: TelegramConfig) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        Ok(Self { config, client })
    }

    fn method_url(&self, method: &str) -> String {
        format!(
            "{}/bot{}/{method}",
            self.config.api_url, self.config.bot_token
        )
    }

    /// Call `getMe` to check the token.
    ///
    /// # Errors
    ///
    /// [`VerifyError::Unauthorized`] when Telegram rejects the token,
    /// [`VerifyError::Unavailable`] for anything else.
    pub async fn verify(&self) -> Result<(), VerifyError> {
        let response = self
            .client
            .get(self.method_url("getMe"))
            .send()
            .await
            .map_err(|e| VerifyError::Unavailable(redact(&e.to_string(), &self.config.bot_token)))?;

        let status = response.status();
        if status.is_success() {
            tracing::debug!("Telegram bot token verified");
            return Ok(());
        }
        if status.as_u16() == 401 || status.as_u16() == 404 {
            return Err(VerifyError::Unauthorized(status.as_u16()));
        }
        Err(VerifyError::Unavailable(format!("HTTP {status}")))
    }
}

#[async_trait]
impl Sink for TelegramSink {
    fn name(&self) -> &'static str {
        "telegram"
    }

    async fn deliver(&self, text: &str) -> Result<(), SinkError> {
        let params = serde_json::json!({
            "chat_id": self.config.chat_id,
            "text": text,
            "disable_web_page_preview": true,
        });

        let response = self
            .client
            .post(self.method_url("sendMessage"))
            .json(&params)
            .send()
            .await
            .map_err(|e| SinkError::Transient(redact(&e.to_string(), &self.config.bot_token)))?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }

        let body = response.text().await.unwrap_or_default();
        Err(classify_failure(status.as_u16(), &body))
    }
}

fn classify_failure(status: u16, body: &str) -> SinkError {
    let parsed: Option<ApiResponse> = serde_json::from_str(body).ok();
    let description = parsed
        .as_ref()
        .and_then(|r| r.description.clone())
        .unwrap_or_else(|| format!("HTTP {status}"));

    match status {
        429 => {
            let retry_after = parsed
                .and_then(|r| r.parameters)
                .and_then(|p| p.retry_after)
                .map_or(DEFAULT_RETRY_AFTER, Duration::from_secs);
            SinkError::RateLimited(retry_after)
        }
        500..=599 => SinkError::Transient(description),
        _ => SinkError::Permanent(description),
    }
}

fn redact(message: &str, token: &str) -> String {
    if token.is_empty() {
        message.to_string()
    } else {
        message.replace(token, "[REDACTED]")
    }
}

#[cfg(test)]
mod tests {
    use tokio::net::TcpListener;

    use super::*;
    use crate::infrastructure::test_support::serve_once;

    const TOKEN: &str = "123456:ABC-def_ghi";

    #[test]
    fn token_format() {
        assert!(is_valid_token(TOKEN));
        assert!(!is_valid_token("123456"));
        assert!(!is_valid_token(":abc"));
        assert!(!is_valid_token("abc:def"));
        assert!(!is_valid_token("123:"));
        assert!(!is_valid_token("123:has space"));
    }

    #[test]
    fn rate_limit_uses_retry_after() {
        let body = r#"{"ok":false,"error_code":429,"description":"Too Many Requests: retry after 5","parameters":{"retry_after":5}}"#;
        assert_eq!(
            classify_failure(429, body),
            SinkError::RateLimited(Duration::from_secs(5))
        );
        assert_eq!(
            classify_failure(429, "not json"),
            SinkError::RateLimited(DEFAULT_RETRY_AFTER)
        );
    }

    #[test]
    fn server_errors_are_transient() {
        assert!(matches!(classify_failure(502, ""), SinkError::Transient(_)));
    }

    #[test]
    fn client_errors_are_permanent() {
        let body = r#"{"ok":false,"error_code":400,"description":"Bad Request: chat not found"}"#;
        assert_eq!(
            classify_failure(400, body),
            SinkError::Permanent("Bad Request: chat not found".to_string())
        );
        assert!(matches!(classify_failure(403, ""), SinkError::Permanent(_)));
    }

    #[test]
    fn debug_redacts_token() {
        let debug = format!("{:?}", TelegramConfig::new(TOKEN, "42"));
        assert!(!debug.contains(TOKEN));
        assert!(debug.contains("42"));
    }

    #[test]
    fn redact_hides_token() {
        let msg = format!("error sending request for url (https://api.telegram.org/bot{TOKEN}/sendMessage)");
        assert!(!redact(&msg, TOKEN).contains(TOKEN));
    }

    #[tokio::test]
    async fn deliver_posts_send_message() {
        let (base, server) = serve_once("HTTP/1.1 200 OK", r#"{"ok":true,"result":{}}"#).await;
        let sink = TelegramSink::new(TelegramConfig::new(TOKEN, "42").with_api_url(base)).unwrap();

        sink.deliver("FILL BTCUSDT Buy").await.unwrap();

        let request = server.await.unwrap();
        assert!(request.starts_with(&format!("POST /bot{TOKEN}/sendMessage")));
        assert!(request.contains(r#""chat_id":"42""#));
        assert!(request.contains(r#""text":"FILL BTCUSDT Buy""#));
    }

    #[tokio::test]
    async fn deliver_maps_rate_limit() {
        let (base, server) = serve_once(
            "HTTP/1.1 429 Too Many Requests",
            r#"{"ok":false,"error_code":429,"parameters":{"retry_after":3}}"#,
        )
        .await;
        let sink = TelegramSink::new(TelegramConfig::new(TOKEN, "42").with_api_url(base)).unwrap();

        assert_eq!(
            sink.deliver("x").await,
            Err(SinkError::RateLimited(Duration::from_secs(3)))
        );
        server.await.unwrap();
    }

    #[tokio::test]
    async fn unreachable_api_is_transient() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let sink = TelegramSink::new(
            TelegramConfig::new(TOKEN, "42").with_api_url(format!("http://{addr}")),
        )
        .unwrap();
        match sink.deliver("x").await {
            Err(SinkError::Transient(msg)) => assert!(!msg.contains(TOKEN)),
            other => panic!("expected transient error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn verify_rejects_bad_token() {
        let (base, server) = serve_once(
            "HTTP/1.1 401 Unauthorized",
            r#"{"ok":false,"error_code":401,"description":"Unauthorized"}"#,
        )
        .await;
        let sink = TelegramSink::new(TelegramConfig::new(TOKEN, "42").with_api_url(base)).unwrap();

        assert!(matches!(
            sink.verify().await,
            Err(VerifyError::Unauthorized(401))
        ));
        server.await.unwrap();
    }
}
