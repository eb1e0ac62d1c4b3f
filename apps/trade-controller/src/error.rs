//! Broker and transport error classification.
//!
//! Maps raw failures to a typed kind plus retry and recovery policy. The
//! classifier is pure and total: every input produces a kind, and the same
//! input always produces the same result.
//!
//! Permanent patterns take precedence over transient ones; a structured
//! status code, when available, is consulted only after the message patterns
//! fail to match.

use std::time::Duration;

use crate::broker::BrokerError;

/// Classified failure kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Not enough buying power.
    InsufficientFunds,
    /// Unknown or untradable symbol.
    InvalidSymbol,
    /// Market closed for the requested session.
    MarketClosed,
    /// Broker rate limit hit.
    RateLimited,
    /// Transport-level failure.
    NetworkError,
    /// Deadline exceeded; effect unknown.
    Timeout,
    /// Broker rejected the order outright.
    BrokerRejection,
    /// Order or position not found.
    NotFound,
    /// Local validation failure.
    ValidationError,
    /// Anything else.
    Unknown,
}

impl ErrorKind {
    /// Whether failures of this kind are worth retrying as-is.
    #[must_use]
    pub const fn retryable(&self) -> bool {
        matches!(
            self,
            Self::MarketClosed | Self::RateLimited | Self::NetworkError | Self::Timeout | Self::Unknown
        )
    }

    /// Default delay before the next attempt.
    #[must_use]
    pub const fn default_delay(&self) -> Duration {
        match self {
            Self::MarketClosed => Duration::from_secs(60),
            Self::RateLimited => Duration::from_secs(5),
            Self::NetworkError => Duration::from_secs(2),
            Self::Timeout => Duration::from_secs(1),
            Self::Unknown => Duration::from_secs(3),
            _ => Duration::ZERO,
        }
    }

    /// Default recovery strategy.
    #[must_use]
    pub const fn default_recovery(&self) -> RecoveryStrategy {
        match self {
            Self::InsufficientFunds | Self::BrokerRejection => RecoveryStrategy::AdjustAndRetry,
            Self::InvalidSymbol => RecoveryStrategy::ManualIntervention,
            Self::MarketClosed => RecoveryStrategy::WaitForMarketOpen,
            Self::RateLimited | Self::NetworkError | Self::Unknown => {
                RecoveryStrategy::RetryWithBackoff
            }
            Self::Timeout | Self::NotFound => RecoveryStrategy::CheckAndSync,
            Self::ValidationError => RecoveryStrategy::None,
        }
    }

    /// Label for logs and metrics.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::InsufficientFunds => "INSUFFICIENT_FUNDS",
            Self::InvalidSymbol => "INVALID_SYMBOL",
            Self::MarketClosed => "MARKET_CLOSED",
            Self::RateLimited => "RATE_LIMITED",
            Self::NetworkError => "NETWORK_ERROR",
            Self::Timeout => "TIMEOUT",
            Self::BrokerRejection => "BROKER_REJECTION",
            Self::NotFound => "NOT_FOUND",
            Self::ValidationError => "VALIDATION_ERROR",
            Self::Unknown => "UNKNOWN",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Post-failure action chosen by the classifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryStrategy {
    /// Sleep and resubmit unchanged.
    RetryWithBackoff,
    /// Look the submission up by client order ID before retrying; the
    /// failure may have been on the response path.
    CheckAndSync,
    /// Shrink the request (halve qty/notional) and try once more.
    AdjustAndRetry,
    /// Re-query market status and retry once if trading has resumed.
    WaitForMarketOpen,
    /// Leave for an operator.
    ManualIntervention,
    /// Give up.
    None,
}

/// A classified error with its retry policy attached.
#[derive(Debug, Clone)]
pub struct ClassifiedError {
    /// Failure kind.
    pub kind: ErrorKind,
    /// Whether an unchanged retry is worthwhile.
    pub retryable: bool,
    /// Suggested delay before the next attempt.
    pub suggested_delay: Duration,
    /// Recovery strategy to apply when retries are exhausted or pointless.
    pub recovery: RecoveryStrategy,
    /// Human-readable message, carried verbatim into events and `last_error`.
    pub message: String,
}

impl ClassifiedError {
    /// Build a classified error from a kind with its default policy.
    #[must_use]
    pub fn of(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            retryable: kind.retryable(),
            suggested_delay: kind.default_delay(),
            recovery: kind.default_recovery(),
            message: message.into(),
        }
    }

    /// Build a validation error.
    #[must_use]
    pub fn validation(message: impl Into<String>) -> Self {
        Self::of(ErrorKind::ValidationError, message)
    }

    /// Override the recovery strategy.
    #[must_use]
    pub const fn with_recovery(mut self, recovery: RecoveryStrategy) -> Self {
        self.recovery = recovery;
        self
    }
}

impl std::fmt::Display for ClassifiedError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}] {}", self.kind, self.message)
    }
}

/// Classify a structured broker error.
#[must_use]
pub fn classify_broker_error(err: &BrokerError) -> ClassifiedError {
    let message = err.to_string();
    match err {
        BrokerError::Network(_) => ClassifiedError::of(ErrorKind::NetworkError, message),
        BrokerError::Timeout { .. } => ClassifiedError::of(ErrorKind::Timeout, message),
        BrokerError::RateLimited { retry_after_secs } => {
            let mut classified = ClassifiedError::of(ErrorKind::RateLimited, message);
            if let Some(secs) = retry_after_secs {
                classified.suggested_delay = Duration::from_secs(*secs);
            }
            classified
        }
        BrokerError::InsufficientFunds(_) => {
            ClassifiedError::of(ErrorKind::InsufficientFunds, message)
        }
        BrokerError::InvalidSymbol(_) => ClassifiedError::of(ErrorKind::InvalidSymbol, message),
        BrokerError::MarketClosed(_) => ClassifiedError::of(ErrorKind::MarketClosed, message),
        BrokerError::OrderRejected(_) => ClassifiedError::of(ErrorKind::BrokerRejection, message),
        BrokerError::NotFound(_) => ClassifiedError::of(ErrorKind::NotFound, message),
        BrokerError::AuthenticationFailed => {
            ClassifiedError::of(ErrorKind::BrokerRejection, message)
                .with_recovery(RecoveryStrategy::ManualIntervention)
        }
        BrokerError::Api {
            status, message: m, ..
        } => classify_message(m, *status),
    }
}

/// Classify an opaque error message with an optional transport status code.
///
/// Permanent patterns are checked before transient ones so a message like
/// "order rejected after network retry" lands on the permanent side.
#[must_use]
pub fn classify_message(message: &str, status: Option<u16>) -> ClassifiedError {
    let lower = message.to_lowercase();

    // Permanent patterns first.
    if lower.contains("insufficient") && (lower.contains("fund") || lower.contains("buying power"))
    {
        return ClassifiedError::of(ErrorKind::InsufficientFunds, message);
    }
    if lower.contains("invalid symbol")
        || lower.contains("unknown symbol")
        || lower.contains("asset not found")
        || lower.contains("not tradable")
    {
        return ClassifiedError::of(ErrorKind::InvalidSymbol, message);
    }
    if lower.contains("not found") || lower.contains("does not exist") {
        return ClassifiedError::of(ErrorKind::NotFound, message);
    }
    if lower.contains("rejected") || lower.contains("unprocessable") || lower.contains("forbidden")
    {
        return ClassifiedError::of(ErrorKind::BrokerRejection, message);
    }
    if lower.contains("validation") || lower.contains("bad request") {
        return ClassifiedError::of(ErrorKind::ValidationError, message);
    }

    // Transient patterns.
    if lower.contains("market") && (lower.contains("closed") || lower.contains("not open")) {
        return ClassifiedError::of(ErrorKind::MarketClosed, message);
    }
    if lower.contains("rate limit") || lower.contains("too many requests") || lower.contains("429")
    {
        return ClassifiedError::of(ErrorKind::RateLimited, message);
    }
    if lower.contains("timeout") || lower.contains("timed out") || lower.contains("deadline") {
        return ClassifiedError::of(ErrorKind::Timeout, message);
    }
    if lower.contains("econnrefused")
        || lower.contains("econnreset")
        || lower.contains("connection")
        || lower.contains("network")
        || lower.contains("dns")
        || lower.contains("socket")
        || lower.contains("broken pipe")
    {
        return ClassifiedError::of(ErrorKind::NetworkError, message);
    }

    // Status-code fallback.
    if let Some(code) = status {
        return match code {
            429 => ClassifiedError::of(ErrorKind::RateLimited, message),
            408 => ClassifiedError::of(ErrorKind::Timeout, message),
            404 => ClassifiedError::of(ErrorKind::NotFound, message),
            403 | 422 => ClassifiedError::of(ErrorKind::BrokerRejection, message),
            400 => ClassifiedError::of(ErrorKind::ValidationError, message),
            500..=599 => ClassifiedError::of(ErrorKind::NetworkError, message),
            _ => ClassifiedError::of(ErrorKind::Unknown, message),
        };
    }

    ClassifiedError::of(ErrorKind::Unknown, message)
}
