//! Sliding-window rate limiter for outbound broker calls.
//!
//! Enforces per-minute and per-hour caps plus a minimum cooldown between
//! calls. `check` is non-blocking and returns a structured decision;
//! `acquire` blocks until a slot opens.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::Instant;

/// Rate limiter configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    /// Maximum calls per rolling minute.
    pub max_per_minute: u32,
    /// Maximum calls per rolling hour.
    pub max_per_hour: u32,
    /// Minimum spacing between consecutive calls.
    pub min_cooldown: Duration,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_per_minute: 180,
            max_per_hour: 9_000,
            min_cooldown: Duration::from_millis(50),
        }
    }
}

/// Outcome of a non-blocking rate check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateDecision {
    /// Whether the call may proceed now.
    pub allowed: bool,
    /// How long to wait before trying again.
    pub wait: Duration,
    /// Which limit refused the call.
    pub reason: Option<String>,
}

impl RateDecision {
    const fn allowed() -> Self {
        Self {
            allowed: true,
            wait: Duration::ZERO,
            reason: None,
        }
    }

    fn refused(wait: Duration, reason: impl Into<String>) -> Self {
        Self {
            allowed: false,
            wait,
            reason: Some(reason.into()),
        }
    }
}

#[derive(Debug, Default)]
struct Window {
    calls: VecDeque<Instant>,
    last_call: Option<Instant>,
}

/// Sliding-window rate limiter.
#[derive(Debug)]
pub struct RateLimiter {
    config: RateLimitConfig,
    window: Mutex<Window>,
}

impl RateLimiter {
    /// Create a limiter.
    #[must_use]
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            config,
            window: Mutex::new(Window::default()),
        }
    }

    /// Non-blocking check. On `allowed`, the call is recorded.
    #[allow(clippy::unwrap_used)]
    pub fn check(&self) -> RateDecision {
        let now = Instant::now();
        let mut window = self.window.lock().unwrap();

        while let Some(front) = window.calls.front() {
            if now.duration_since(*front) > Duration::from_secs(3600) {
                window.calls.pop_front();
            } else {
                break;
            }
        }

        if let Some(last) = window.last_call {
            let since = now.duration_since(last);
            if since < self.config.min_cooldown {
                return RateDecision::refused(self.config.min_cooldown - since, "cooldown");
            }
        }

        let minute_ago = now.checked_sub(Duration::from_secs(60));
        let in_last_minute = minute_ago.map_or(window.calls.len(), |cutoff| {
            window.calls.iter().filter(|t| **t > cutoff).count()
        });
        if in_last_minute >= self.config.max_per_minute as usize {
            let oldest_in_minute = minute_ago
                .and_then(|cutoff| window.calls.iter().find(|t| **t > cutoff).copied());
            let wait = oldest_in_minute.map_or(Duration::from_secs(1), |t| {
                Duration::from_secs(60).saturating_sub(now.duration_since(t))
            });
            return RateDecision::refused(wait, "per-minute cap");
        }

        if window.calls.len() >= self.config.max_per_hour as usize {
            let wait = window.calls.front().map_or(Duration::from_secs(60), |t| {
                Duration::from_secs(3600).saturating_sub(now.duration_since(*t))
            });
            return RateDecision::refused(wait, "per-hour cap");
        }

        window.calls.push_back(now);
        window.last_call = Some(now);
        RateDecision::allowed()
    }

    /// Block until a slot opens, then record the call.
    pub async fn acquire(&self) {
        loop {
            let decision = self.check();
            if decision.allowed {
                return;
            }
            tracing::debug!(
                wait_ms = decision.wait.as_millis(),
                reason = decision.reason.as_deref().unwrap_or(""),
                "Outbound call rate limited"
            );
            tokio::time::sleep(decision.wait.max(Duration::from_millis(1))).await;
        }
    }
}
