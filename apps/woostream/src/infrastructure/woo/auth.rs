//! WOO X Authentication
//!
//! Credential handling and request signing for the private WebSocket stream
//! and the signed REST endpoints.
//!
//! # Signature
//!
//! The canonical string is the request parameters sorted by key and joined
//! as `key=value` pairs with `&`, followed by `|` and the millisecond
//! timestamp. With no parameters (the WebSocket auth frame, `GET` without a
//! query) it is just `|{timestamp}`. The signature is HMAC-SHA256 of that
//! string keyed with the API secret, hex encoded in upper case.
//!
//! # Authentication Flow
//!
//! 1. Connect to `wss://wss.woo.org/v2/ws/private/stream/{application_id}`
//! 2. Send `{"id":"...","event":"auth","params":{"apikey":"...","sign":"...","timestamp":"..."}}`
//! 3. Receive `{"id":"...","event":"auth","success":true,"ts":...}` or `success:false`

use std::time::Duration;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use thiserror::Error;

use super::messages::{AuthParams, AuthRequest};

type HmacSha256 = Hmac<Sha256>;

/// Time allowed between sending the auth frame and receiving its
/// acknowledgment.
pub const AUTH_TIMEOUT: Duration = Duration::from_secs(10);

/// Errors around credentials and authentication.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuthError {
    /// Credentials are unusable as supplied.
    #[error("malformed credentials: {0}")]
    Malformed(String),

    /// The exchange rejected the auth frame.
    #[error("authentication rejected: {0}")]
    Rejected(String),

    /// No acknowledgment arrived in time.
    #[error("authentication timeout: no acknowledgment within {0:?}")]
    Timeout(Duration),
}

/// WOO X API credentials.
///
/// The `Debug` implementation redacts the secret for safe logging.
#[derive(Clone)]
pub struct Credentials {
    application_id: String,
    public_key: String,
    secret_key: String,
}

impl Credentials {
    /// Validate and wrap a key pair.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::Malformed`] if the application id or secret is
    /// empty, or the public key is not valid base64.
    pub fn new(
        application_id: impl Into<String>,
        public_key: impl Into<String>,
        secret_key: impl Into<String>,
    ) -> Result<Self, AuthError> {
        let application_id = application_id.into().trim().to_string();
        let public_key = public_key.into().trim().to_string();
        let secret_key = secret_key.into();

        if application_id.is_empty() {
            return Err(AuthError::Malformed(
                "application id cannot be empty".to_string(),
            ));
        }
        if public_key.is_empty() {
            return Err(AuthError::Malformed(
                "API public key cannot be empty".to_string(),
            ));
        }
        if STANDARD.decode(&public_key).is_err() {
            return Err(AuthError::Malformed(
                "API public key is not valid base64".to_string(),
            ));
        }
        if secret_key.is_empty() {
            return Err(AuthError::Malformed(
                "API secret key cannot be empty".to_string(),
            ));
        }

        Ok(Self {
            application_id,
            public_key,
            secret_key,
        })
    }

    /// Application id (part of the stream URL).
    #[must_use]
    pub fn application_id(&self) -> &str {
        &self.application_id
    }

    /// Public API key.
    #[must_use]
    pub fn public_key(&self) -> &str {
        &self.public_key
    }

    /// Sign a request made at `timestamp_ms` with the given parameters.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::Malformed`] if the secret cannot key the MAC.
    pub fn sign(&self, timestamp_ms: i64, params: &[(&str, &str)]) -> Result<String, AuthError> {
        sign(&self.secret_key, timestamp_ms, params)
    }

    /// Build the auth frame for the private stream.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::Malformed`] if signing fails.
    pub fn auth_request(&self, id: String, timestamp_ms: i64) -> Result<AuthRequest, AuthError> {
        Ok(AuthRequest::new(
            id,
            AuthParams {
                apikey: self.public_key.clone(),
                sign: self.sign(timestamp_ms, &[])?,
                timestamp: timestamp_ms.to_string(),
            },
        ))
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("application_id", &self.application_id)
            .field("public_key", &self.public_key)
            .field("secret_key", &"[REDACTED]")
            .finish()
    }
}

/// Canonical string covered by the signature.
#[must_use]
pub fn canonical_string(timestamp_ms: i64, params: &[(&str, &str)]) -> String {
    let mut sorted = params.to_vec();
    sorted.sort_unstable_by(|a, b| a.0.cmp(b.0));
    let query = sorted
        .iter()
        .map(|(key, value)| format!("{key}={value}"))
        .collect::<Vec<_>>()
        .join("&");
    format!("{query}|{timestamp_ms}")
}

/// HMAC-SHA256 signature, upper-case hex.
///
/// # Errors
///
/// Returns [`AuthError::Malformed`] if the secret is empty or rejected as a
/// MAC key.
pub fn sign(secret_key: &str, timestamp_ms: i64, params: &[(&str, &str)]) -> Result<String, AuthError> {
    if secret_key.is_empty() {
        return Err(AuthError::Malformed(
            "API secret key cannot be empty".to_string(),
        ));
    }
    let mut mac = HmacSha256::new_from_slice(secret_key.as_bytes())
        .map_err(|e| AuthError::Malformed(format!("unusable secret key: {e}")))?;
    mac.update(canonical_string(timestamp_ms, params).as_bytes());
    Ok(hex::encode_upper(mac.finalize().into_bytes()))
}
