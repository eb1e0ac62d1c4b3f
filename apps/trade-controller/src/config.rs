//! Layered configuration.
//!
//! Values come from an optional TOML file overlaid with
//! `TRADE_CONTROLLER__*` environment variables (double underscore nests
//! sections, e.g. `TRADE_CONTROLLER__WORKER__POLL_INTERVAL_SECS=2`).

use std::time::Duration;

use config::{Config, Environment, File};
use serde::Deserialize;

use crate::execution::{EngineConfig, ReconcilerConfig};
use crate::queue::WorkerConfig;
use crate::resilience::RateLimitConfig;

/// Top-level configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ControllerConfig {
    /// Path to the Turso store.
    pub store_path: String,
    /// Trading environment label: PAPER or LIVE.
    pub environment: String,
    /// Worker settings.
    pub worker: WorkerSettings,
    /// Engine settings.
    pub engine: EngineSettings,
    /// Reconciler settings.
    pub reconciler: ReconcilerSettings,
    /// Outbound rate limit settings.
    pub rate_limit: RateLimitSettings,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            store_path: "trade-controller.db".to_string(),
            environment: "PAPER".to_string(),
            worker: WorkerSettings::default(),
            engine: EngineSettings::default(),
            reconciler: ReconcilerSettings::default(),
            rate_limit: RateLimitSettings::default(),
        }
    }
}

impl ControllerConfig {
    /// Load from `trade-controller.toml` (when present) plus environment
    /// overrides.
    pub fn load() -> Result<Self, config::ConfigError> {
        Config::builder()
            .add_source(File::with_name("trade-controller").required(false))
            .add_source(Environment::with_prefix("TRADE_CONTROLLER").separator("__"))
            .build()?
            .try_deserialize()
    }

    /// Whether this is the live environment.
    #[must_use]
    pub fn is_live(&self) -> bool {
        self.environment.eq_ignore_ascii_case("LIVE")
    }
}

/// Worker section.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WorkerSettings {
    /// Poll interval when the queue is empty, in seconds.
    pub poll_interval_secs: u64,
}

impl Default for WorkerSettings {
    fn default() -> Self {
        Self {
            poll_interval_secs: 5,
        }
    }
}

impl WorkerSettings {
    /// Convert to the runtime worker config.
    #[must_use]
    pub fn to_worker_config(&self) -> WorkerConfig {
        WorkerConfig {
            poll_interval: Duration::from_secs(self.poll_interval_secs),
            types_filter: None,
        }
    }
}

/// Engine section.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EngineSettings {
    /// Per-attempt submit timeout, in seconds.
    pub submit_timeout_secs: u64,
    /// Submit attempts before recovery.
    pub max_retries: u32,
    /// Monitor poll interval, in milliseconds.
    pub monitor_interval_ms: u64,
    /// Overall monitoring budget, in seconds.
    pub monitor_budget_secs: u64,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            submit_timeout_secs: 30,
            max_retries: 3,
            monitor_interval_ms: 1_000,
            monitor_budget_secs: 30,
        }
    }
}

impl EngineSettings {
    /// Convert to the runtime engine config.
    #[must_use]
    pub fn to_engine_config(&self) -> EngineConfig {
        EngineConfig {
            submit_timeout: Duration::from_secs(self.submit_timeout_secs),
            max_retries: self.max_retries,
            monitor_interval: Duration::from_millis(self.monitor_interval_ms),
            monitor_budget: Duration::from_secs(self.monitor_budget_secs),
        }
    }
}

/// Reconciler section.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ReconcilerSettings {
    /// ORDER_SYNC enqueue interval, in seconds.
    pub sync_interval_secs: u64,
    /// Unreal-order sweep interval, in seconds.
    pub unreal_scan_interval_secs: u64,
    /// Broker orders inspected per sweep.
    pub unreal_scan_depth: usize,
    /// Stale-order threshold, in hours.
    pub stale_age_hours: u64,
}

impl Default for ReconcilerSettings {
    fn default() -> Self {
        Self {
            sync_interval_secs: 60,
            unreal_scan_interval_secs: 300,
            unreal_scan_depth: 500,
            stale_age_hours: 24,
        }
    }
}

impl ReconcilerSettings {
    /// Convert to the runtime reconciler config.
    #[must_use]
    pub fn to_reconciler_config(&self) -> ReconcilerConfig {
        ReconcilerConfig {
            sync_interval: Duration::from_secs(self.sync_interval_secs),
            unreal_scan_interval: Duration::from_secs(self.unreal_scan_interval_secs),
            unreal_scan_depth: self.unreal_scan_depth,
            stale_age: Duration::from_secs(self.stale_age_hours * 3600),
        }
    }
}

/// Rate limit section.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RateLimitSettings {
    /// Calls per rolling minute.
    pub max_per_minute: u32,
    /// Calls per rolling hour.
    pub max_per_hour: u32,
    /// Minimum spacing between calls, in milliseconds.
    pub min_cooldown_ms: u64,
}

impl Default for RateLimitSettings {
    fn default() -> Self {
        Self {
            max_per_minute: 180,
            max_per_hour: 9_000,
            min_cooldown_ms: 50,
        }
    }
}

impl RateLimitSettings {
    /// Convert to the runtime rate limit config.
    #[must_use]
    pub fn to_rate_limit_config(&self) -> RateLimitConfig {
        RateLimitConfig {
            max_per_minute: self.max_per_minute,
            max_per_hour: self.max_per_hour,
            min_cooldown: Duration::from_millis(self.min_cooldown_ms),
        }
    }
}
