//! Bus configuration.
//!
//! Every field is optional when deserializing; missing fields take the
//! defaults below. Environment variables overlay the defaults via
//! [`BusConfig::from_env`].

use crate::error::ConfigError;
use crate::retry::RetryPolicy;
use serde::{Deserialize, Serialize};
use std::env;
use std::str::FromStr;
use std::time::Duration;

/// Event bus configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BusConfig {
    /// Attempts per delivery when the subscription retries on failure.
    pub max_retries: u32,
    /// Base delay for exponential backoff (in milliseconds).
    pub retry_delay_ms: u64,
    /// Capture deliveries that exhausted their retries.
    pub dead_letter_enabled: bool,
    /// Retain published events for replay.
    pub event_sourcing_enabled: bool,
    /// Recorded failures before a subscriber's circuit opens.
    pub circuit_breaker_threshold: u32,
    /// Time an open circuit waits before letting a probe through (in milliseconds).
    pub circuit_breaker_timeout_ms: u64,
    /// Maximum events retained in the event store.
    pub event_store_capacity: usize,
    /// Maximum correlations tracked at once.
    pub correlation_capacity: usize,
    /// Maximum dead-letter entries retained.
    pub dead_letter_capacity: usize,
    /// Maximum topics with delivery counters; the oldest topic is dropped first.
    pub topic_metrics_capacity: usize,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            retry_delay_ms: 1000,
            dead_letter_enabled: true,
            event_sourcing_enabled: true,
            circuit_breaker_threshold: 5,
            circuit_breaker_timeout_ms: 60_000,
            event_store_capacity: 10_000,
            correlation_capacity: 1000,
            dead_letter_capacity: 1000,
            topic_metrics_capacity: 1000,
        }
    }
}

impl BusConfig {
    /// Create configuration from environment variables.
    ///
    /// # Environment Variables
    ///
    /// - `SB_MAX_RETRIES` (default: 3)
    /// - `SB_RETRY_DELAY_MS` (default: 1000)
    /// - `SB_DEAD_LETTER_ENABLED` (default: true)
    /// - `SB_EVENT_SOURCING_ENABLED` (default: true)
    /// - `SB_CIRCUIT_BREAKER_THRESHOLD` (default: 5)
    /// - `SB_CIRCUIT_BREAKER_TIMEOUT_MS` (default: 60000)
    /// - `SB_EVENT_STORE_CAPACITY` (default: 10000)
    /// - `SB_CORRELATION_CAPACITY` (default: 1000)
    /// - `SB_DEAD_LETTER_CAPACITY` (default: 1000)
    /// - `SB_TOPIC_METRICS_CAPACITY` (default: 1000)
    ///
    /// Values that fail to parse keep the default.
    pub fn from_env() -> Self {
        Self::default().with_env_overrides()
    }

    /// Overlay environment variables onto this configuration.
    #[must_use]
    pub fn with_env_overrides(mut self) -> Self {
        override_from_env(&mut self.max_retries, "SB_MAX_RETRIES");
        override_from_env(&mut self.retry_delay_ms, "SB_RETRY_DELAY_MS");
        override_flag_from_env(&mut self.dead_letter_enabled, "SB_DEAD_LETTER_ENABLED");
        override_flag_from_env(&mut self.event_sourcing_enabled, "SB_EVENT_SOURCING_ENABLED");
        override_from_env(
            &mut self.circuit_breaker_threshold,
            "SB_CIRCUIT_BREAKER_THRESHOLD",
        );
        override_from_env(
            &mut self.circuit_breaker_timeout_ms,
            "SB_CIRCUIT_BREAKER_TIMEOUT_MS",
        );
        override_from_env(&mut self.event_store_capacity, "SB_EVENT_STORE_CAPACITY");
        override_from_env(&mut self.correlation_capacity, "SB_CORRELATION_CAPACITY");
        override_from_env(&mut self.dead_letter_capacity, "SB_DEAD_LETTER_CAPACITY");
        override_from_env(&mut self.topic_metrics_capacity, "SB_TOPIC_METRICS_CAPACITY");
        self
    }

    /// Parse configuration from a TOML document.
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        toml::from_str(content).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_retries == 0 {
            return Err(ConfigError::Invalid("max_retries cannot be 0".into()));
        }

        if self.circuit_breaker_threshold == 0 {
            return Err(ConfigError::Invalid(
                "circuit_breaker_threshold cannot be 0".into(),
            ));
        }

        let capacities = [
            ("event_store_capacity", self.event_store_capacity),
            ("correlation_capacity", self.correlation_capacity),
            ("dead_letter_capacity", self.dead_letter_capacity),
            ("topic_metrics_capacity", self.topic_metrics_capacity),
        ];
        for (name, value) in capacities {
            if value == 0 {
                return Err(ConfigError::Invalid(format!("{name} cannot be 0")));
            }
        }

        Ok(())
    }

    /// Base backoff delay.
    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    /// Open-circuit cooldown.
    pub fn circuit_breaker_timeout(&self) -> Duration {
        Duration::from_millis(self.circuit_breaker_timeout_ms)
    }

    /// Retry policy derived from this configuration.
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::exponential(self.max_retries, self.retry_delay())
    }
}

fn override_from_env<T: FromStr>(target: &mut T, var: &str) {
    if let Some(value) = env::var(var).ok().and_then(|v| v.trim().parse().ok()) {
        *target = value;
    }
}

fn override_flag_from_env(target: &mut bool, var: &str) {
    if let Ok(value) = env::var(var) {
        let value = value.trim().to_lowercase();
        *target = value == "true" || value == "1";
    }
}
