//! Error types for the event bus.

use crate::subscriber::SubscriptionId;
use thiserror::Error;

/// Errors produced by the delivery pipeline and the bus facade.
///
/// Delivery failures are reported to publishers as counts inside
/// [`PublishResult`](crate::PublishResult); they only appear as values of this
/// type inside the pipeline and in dead-letter bookkeeping.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BusError {
    /// The subscriber's circuit breaker is open; the handler was not invoked.
    #[error("Circuit breaker open for subscriber {subscriber}")]
    CircuitOpen { subscriber: SubscriptionId },

    /// The handler failed on every attempt of its retry budget.
    #[error("Handler for subscriber {subscriber} failed after {attempts} attempt(s): {message}")]
    HandlerFailed {
        subscriber: SubscriptionId,
        attempts: u32,
        message: String,
    },

    /// No dead-letter entry exists at the requested index.
    #[error("Dead letter index {index} out of range (queue length {len})")]
    DeadLetterNotFound { index: usize, len: usize },

    /// The bus stopped accepting publishes.
    #[error("Event bus is shutting down")]
    ShuttingDown,
}

/// Result type for bus operations.
pub type BusResult<T> = Result<T, BusError>;

/// Configuration errors.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// The configuration source could not be parsed.
    #[error("failed to parse configuration: {0}")]
    Parse(String),

    /// A value is outside its allowed range.
    #[error("invalid configuration: {0}")]
    Invalid(String),
}
