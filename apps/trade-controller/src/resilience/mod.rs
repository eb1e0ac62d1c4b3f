//! Resilience primitives for outbound broker traffic.

mod rate_limit;

pub use rate_limit::{RateDecision, RateLimitConfig, RateLimiter};
