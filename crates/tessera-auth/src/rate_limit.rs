//! Fixed-window rate limiting
//!
//! Soft admission control in front of the auth pipeline: each client key
//! may make `requests` requests per `window`. Counters live in a
//! [`DashMap`] and reset under the entry lock when a window ends, so
//! concurrent requests never double-reset a window.
//!
//! ## Usage
//!
//! ```rust
//! use std::time::Duration;
//! use tessera_auth::rate_limit::{RateLimitKey, RateLimiter};
//!
//! let limiter = RateLimiter::new(2, Duration::from_secs(60));
//! let key = RateLimitKey::ip("192.168.1.1");
//!
//! assert!(limiter.check(&key).is_ok());
//! assert!(limiter.check(&key).is_ok());
//! let info = limiter.check(&key).unwrap_err();
//! assert!(info.retry_after <= Duration::from_secs(60));
//! ```

use std::time::{Duration, Instant};

use dashmap::DashMap;
use http::HeaderMap;

use crate::auth_metrics;
use crate::config::RateLimitSettings;

/// Number of tracked keys above which stale windows are purged
const PURGE_THRESHOLD: usize = 10_000;

/// Key for rate limiting (IP, user ID, session)
#[derive(Debug, Clone, Hash, PartialEq, Eq)]
pub struct RateLimitKey {
    /// Key type (ip, user, session)
    pub key_type: &'static str,
    pub value: String,
}

impl RateLimitKey {
    pub fn ip(ip: impl Into<String>) -> Self {
        Self {
            key_type: "ip",
            value: ip.into(),
        }
    }

    pub fn user(user_id: impl Into<String>) -> Self {
        Self {
            key_type: "user",
            value: user_id.into(),
        }
    }

    pub fn session(session_id: impl Into<String>) -> Self {
        Self {
            key_type: "session",
            value: session_id.into(),
        }
    }
}

impl std::fmt::Display for RateLimitKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.key_type, self.value)
    }
}

/// Information about a rate limit violation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimitInfo {
    /// Time until the current window ends
    pub retry_after: Duration,
    /// Requests counted in the current window
    pub current_count: u32,
    pub limit: u32,
    pub window: Duration,
}

impl RateLimitInfo {
    /// Whole seconds for a `Retry-After` header, rounded up
    pub fn retry_after_secs(&self) -> u64 {
        let secs = self.retry_after.as_secs();
        if self.retry_after.subsec_nanos() > 0 {
            secs + 1
        } else {
            secs.max(1)
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct Window {
    started: Instant,
    count: u32,
}

/// Fixed-window limiter keyed per client
#[derive(Debug)]
pub struct RateLimiter {
    requests: u32,
    window: Duration,
    enabled: bool,
    windows: DashMap<RateLimitKey, Window>,
}

impl RateLimiter {
    /// Allow `requests` per `window` for every key
    pub fn new(requests: u32, window: Duration) -> Self {
        Self {
            requests,
            window,
            enabled: true,
            windows: DashMap::new(),
        }
    }

    pub fn from_settings(settings: &RateLimitSettings) -> Self {
        Self {
            enabled: settings.enabled,
            ..Self::new(settings.requests, Duration::from_secs(settings.window_secs))
        }
    }

    /// A limiter that admits everything
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Self::new(u32::MAX, Duration::from_secs(1))
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Count a request for `key`
    ///
    /// Returns `Ok(())` if allowed, `Err(RateLimitInfo)` if rate limited.
    pub fn check(&self, key: &RateLimitKey) -> Result<(), RateLimitInfo> {
        if !self.enabled {
            return Ok(());
        }

        let now = Instant::now();
        let result = {
            let mut entry = self.windows.entry(key.clone()).or_insert(Window {
                started: now,
                count: 0,
            });

            if now.duration_since(entry.started) >= self.window {
                entry.started = now;
                entry.count = 0;
            }

            if entry.count >= self.requests {
                Err(RateLimitInfo {
                    retry_after: self.window.saturating_sub(now.duration_since(entry.started)),
                    current_count: entry.count,
                    limit: self.requests,
                    window: self.window,
                })
            } else {
                entry.count += 1;
                Ok(())
            }
        };

        if result.is_err() {
            auth_metrics::record_rate_limited();
        }
        if self.windows.len() > PURGE_THRESHOLD {
            self.purge_stale();
        }
        result
    }

    /// Drop keys whose window has ended
    pub fn purge_stale(&self) -> usize {
        let now = Instant::now();
        let before = self.windows.len();
        self.windows
            .retain(|_, w| now.duration_since(w.started) < self.window);
        before.saturating_sub(self.windows.len())
    }

    /// Forget the counter for `key`
    pub fn reset(&self, key: &RateLimitKey) {
        self.windows.remove(key);
    }
}

/// Client IP from `x-forwarded-for` (first hop) or `x-real-ip`
///
/// These headers are client-controlled unless a trusted proxy overwrites
/// them; deploy behind one when rate limiting by IP.
pub fn client_ip(headers: &HeaderMap) -> Option<String> {
    headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|ip| !ip.is_empty())
        .or_else(|| headers.get("x-real-ip").and_then(|v| v.to_str().ok()))
        .map(str::to_string)
}
