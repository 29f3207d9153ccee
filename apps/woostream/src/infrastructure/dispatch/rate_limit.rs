//! Token Bucket Rate Limiter
//!
//! Paces one sink's deliveries. Limiting only ever delays: `acquire` waits
//! for a token and never refuses.

use std::time::Duration;

use tokio::time::Instant;

/// Token bucket with lazy refill.
///
/// `tokens = min(capacity, tokens + elapsed × refill_rate)`, recomputed on
/// every access. Starts full.
#[derive(Debug, Clone)]
pub struct TokenBucket {
    capacity: f64,
    tokens: f64,
    refill_rate: f64,
    last_refill: Instant,
}

impl TokenBucket {
    /// Bucket holding `capacity` tokens, refilled at `refill_per_sec`.
    ///
    /// Both values are clamped to at least one.
    #[must_use]
    pub fn new(capacity: u32, refill_per_sec: f64) -> Self {
        let capacity = f64::from(capacity.max(1));
        Self {
            capacity,
            tokens: capacity,
            refill_rate: if refill_per_sec.is_finite() {
                refill_per_sec.max(1.0)
            } else {
                1.0
            },
            last_refill: Instant::now(),
        }
    }

    /// Maximum burst.
    #[must_use]
    pub const fn capacity(&self) -> f64 {
        self.capacity
    }

    /// Tokens added per second.
    #[must_use]
    pub const fn refill_rate(&self) -> f64 {
        self.refill_rate
    }

    /// Tokens available right now.
    pub fn available(&mut self) -> f64 {
        self.refill_at(Instant::now());
        self.tokens
    }

    /// Take a token if one is available, otherwise report how long until
    /// one will be.
    ///
    /// # Errors
    ///
    /// Returns the wait time when the bucket is empty.
    pub fn try_acquire(&mut self) -> Result<(), Duration> {
        self.try_acquire_at(Instant::now())
    }

    /// Wait for a token and take it.
    pub async fn acquire(&mut self) {
        while let Err(wait) = self.try_acquire() {
            tokio::time::sleep(wait).await;
        }
    }

    fn try_acquire_at(&mut self, now: Instant) -> Result<(), Duration> {
        self.refill_at(now);
        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            Ok(())
        } else {
            let deficit = 1.0 - self.tokens;
            Err(Duration::from_secs_f64(deficit / self.refill_rate))
        }
    }

    fn refill_at(&mut self, now: Instant) {
        let elapsed = now.saturating_duration_since(self.last_refill);
        self.tokens = elapsed
            .as_secs_f64()
            .mul_add(self.refill_rate, self.tokens)
            .min(self.capacity);
        self.last_refill = now;
    }
}

/// Pacing applied by a sink worker before each delivery attempt.
#[derive(Debug, Clone)]
pub enum RateLimiter {
    /// No pacing.
    Unlimited,
    /// Token bucket pacing.
    TokenBucket(TokenBucket),
}

impl RateLimiter {
    /// No pacing.
    #[must_use]
    pub const fn unlimited() -> Self {
        Self::Unlimited
    }

    /// Token bucket with `capacity` burst and `refill_per_sec` steady rate.
    #[must_use]
    pub fn token_bucket(capacity: u32, refill_per_sec: f64) -> Self {
        Self::TokenBucket(TokenBucket::new(capacity, refill_per_sec))
    }

    /// Wait until a delivery may proceed.
    pub async fn acquire(&mut self) {
        match self {
            Self::Unlimited => {}
            Self::TokenBucket(bucket) => bucket.acquire().await,
        }
    }
}
