//! Request gating and backoff for the parts API
//!
//! The remote API enforces a strict per-store rate limit. Every API call
//! goes through a single [`RequestGate`]:
//!
//! - Calls are serialized: a [`GatePermit`] is held for the whole request,
//!   including any 429 retries, so at most one API call is in flight.
//! - Consecutive calls start at least `min_interval` apart.
//! - 429 responses back off exponentially (or by `Retry-After` when the
//!   server sends one), bounded by `max_retries` and `max_backoff`.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use partsync_api::rate_limit::{GateConfig, RequestGate};
//!
//! # async fn example() {
//! let gate = RequestGate::new(GateConfig::default());
//! let mut permit = gate.acquire().await;
//! // ... send request; on 429:
//! permit.back_off(0, None).await;
//! # }
//! ```

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use partsync_core::config::RateLimitingConfig;
use tokio::sync::{Mutex, MutexGuard};
use tokio::time::Instant;
use tracing::{debug, warn};

// ============================================================================
// GateConfig
// ============================================================================

/// Timing parameters for the [`RequestGate`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GateConfig {
    /// Minimum time between the starts of two consecutive calls
    pub min_interval: Duration,
    /// Retries after a 429 before giving up (total attempts = retries + 1)
    pub max_retries: u32,
    /// First backoff delay; doubled on every further retry
    pub base_backoff: Duration,
    /// Upper bound for any single backoff delay
    pub max_backoff: Duration,
}

impl Default for GateConfig {
    fn default() -> Self {
        Self::from(&RateLimitingConfig::default())
    }
}

impl From<&RateLimitingConfig> for GateConfig {
    fn from(cfg: &RateLimitingConfig) -> Self {
        Self {
            min_interval: Duration::from_millis(cfg.min_interval_ms),
            max_retries: cfg.max_retries,
            base_backoff: Duration::from_millis(cfg.base_backoff_ms),
            max_backoff: Duration::from_secs(cfg.max_backoff_secs),
        }
    }
}

impl GateConfig {
    /// Delay before retry number `attempt` (0-based)
    ///
    /// `base * 2^attempt`, or the server's `Retry-After` when larger,
    /// capped at `max_backoff`.
    pub fn backoff_delay(&self, attempt: u32, retry_after: Option<Duration>) -> Duration {
        let exp = self
            .base_backoff
            .checked_mul(2u32.saturating_pow(attempt))
            .unwrap_or(self.max_backoff);
        let delay = match retry_after {
            Some(server) if server > exp => server,
            _ => exp,
        };
        delay.min(self.max_backoff)
    }
}

// ============================================================================
// RequestGate
// ============================================================================

/// Single token serializing every API call
#[derive(Debug)]
pub struct RequestGate {
    config: GateConfig,
    /// Start time of the most recent call
    last_call: Mutex<Option<Instant>>,
    calls: AtomicU64,
    throttled: AtomicU64,
}

impl RequestGate {
    pub fn new(config: GateConfig) -> Self {
        Self {
            config,
            last_call: Mutex::new(None),
            calls: AtomicU64::new(0),
            throttled: AtomicU64::new(0),
        }
    }

    pub fn with_defaults() -> Self {
        Self::new(GateConfig::default())
    }

    pub fn config(&self) -> &GateConfig {
        &self.config
    }

    /// Wait for the token and for `min_interval` since the previous call
    ///
    /// The returned permit must be held while the request is sent.
    pub async fn acquire(&self) -> GatePermit<'_> {
        let mut last = self.last_call.lock().await;
        if let Some(prev) = *last {
            let ready_at = prev + self.config.min_interval;
            if Instant::now() < ready_at {
                debug!(
                    wait_ms = (ready_at - Instant::now()).as_millis() as u64,
                    "Waiting for API gate"
                );
                tokio::time::sleep_until(ready_at).await;
            }
        }
        *last = Some(Instant::now());
        self.calls.fetch_add(1, Ordering::Relaxed);
        GatePermit {
            last,
            gate: self,
        }
    }

    /// Total calls that have passed the gate, including retries
    pub fn call_count(&self) -> u64 {
        self.calls.load(Ordering::Relaxed)
    }

    /// Total 429 responses reported through permits
    pub fn throttle_count(&self) -> u64 {
        self.throttled.load(Ordering::Relaxed)
    }
}

impl Default for RequestGate {
    fn default() -> Self {
        Self::with_defaults()
    }
}

/// Exclusive right to talk to the API; dropping it releases the gate
pub struct GatePermit<'a> {
    last: MutexGuard<'a, Option<Instant>>,
    gate: &'a RequestGate,
}

impl GatePermit<'_> {
    /// Sleep before retry `attempt`, then restamp the call time
    ///
    /// The gate stays held while sleeping, so every other caller waits out
    /// the backoff too.
    pub async fn back_off(&mut self, attempt: u32, retry_after: Option<Duration>) -> Duration {
        let delay = self.gate.config.backoff_delay(attempt, retry_after);
        self.gate.throttled.fetch_add(1, Ordering::Relaxed);
        tokio::time::sleep(delay).await;
        *self.last = Some(Instant::now());
        self.gate.calls.fetch_add(1, Ordering::Relaxed);
        delay
    }

    pub fn max_retries(&self) -> u32 {
        self.gate.config.max_retries
    }
}

// ============================================================================
// Retry-After parsing
// ============================================================================

/// Parse a `Retry-After` header value
///
/// Supports both integer seconds and HTTP-date (RFC 2822) formats. Dates
/// more than an hour out, in the past, or unparseable yield `default`.
pub fn parse_retry_after(value: &str, default: Duration) -> Duration {
    if let Ok(seconds) = value.trim().parse::<u64>() {
        return Duration::from_secs(seconds);
    }

    if let Ok(date) = chrono::DateTime::parse_from_rfc2822(value.trim()) {
        let now = chrono::Utc::now();
        let target = date.with_timezone(&chrono::Utc);
        if target > now {
            let diff = target - now;
            if let Some(secs) = diff
                .num_seconds()
                .try_into()
                .ok()
                .filter(|&s: &u64| s <= 3600)
            {
                return Duration::from_secs(secs);
            }
        }
    }

    warn!(value, "Could not parse Retry-After header, using default");
    default
}
