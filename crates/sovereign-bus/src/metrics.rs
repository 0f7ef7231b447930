//! # Bus Metrics
//!
//! Prometheus metrics for monitoring delivery health.
//!
//! ## Usage
//!
//! Enable with the `metrics` feature:
//! ```toml
//! sovereign-bus = { path = "...", features = ["metrics"] }
//! ```
//!
//! ## Metrics Exported
//!
//! - `sovereign_bus_events_published_total` - Counter of published events (by topic)
//! - `sovereign_bus_deliveries_total` - Counter of delivery outcomes (by topic, outcome)
//! - `sovereign_bus_dead_letters_total` - Counter of dead-lettered deliveries
//! - `sovereign_bus_circuit_opened_total` - Counter of circuit transitions to open
//! - `sovereign_bus_delivery_duration_seconds` - Histogram of pipeline durations

#[cfg(feature = "metrics")]
use lazy_static::lazy_static;

#[cfg(feature = "metrics")]
use prometheus::{
    register_histogram, register_int_counter, register_int_counter_vec, Histogram, IntCounter,
    IntCounterVec,
};

#[cfg(feature = "metrics")]
lazy_static! {
    /// Total events published, labeled by topic
    pub static ref EVENTS_PUBLISHED: IntCounterVec = register_int_counter_vec!(
        "sovereign_bus_events_published_total",
        "Total number of events published",
        &["topic"]
    )
    .expect("Failed to create EVENTS_PUBLISHED metric");

    /// Delivery outcomes, labeled by topic and outcome (delivered/skipped/failed)
    pub static ref DELIVERIES: IntCounterVec = register_int_counter_vec!(
        "sovereign_bus_deliveries_total",
        "Total number of subscriber deliveries by outcome",
        &["topic", "outcome"]
    )
    .expect("Failed to create DELIVERIES metric");

    /// Total dead-lettered deliveries
    pub static ref DEAD_LETTERS: IntCounter = register_int_counter!(
        "sovereign_bus_dead_letters_total",
        "Total number of deliveries moved to the dead letter queue"
    )
    .expect("Failed to create DEAD_LETTERS metric");

    /// Total circuit transitions to open
    pub static ref CIRCUITS_OPENED: IntCounter = register_int_counter!(
        "sovereign_bus_circuit_opened_total",
        "Total number of subscriber circuit breakers opened"
    )
    .expect("Failed to create CIRCUITS_OPENED metric");

    /// Delivery pipeline duration, retries and backoff included
    pub static ref DELIVERY_DURATION: Histogram = register_histogram!(
        "sovereign_bus_delivery_duration_seconds",
        "Time spent delivering one event to one subscriber",
        prometheus::exponential_buckets(0.0001, 2.0, 16)
            .expect("valid histogram buckets")
    )
    .expect("Failed to create DELIVERY_DURATION metric");
}

// =============================================================================
// METRIC RECORDING FUNCTIONS
// =============================================================================

/// Record a published event
#[cfg(feature = "metrics")]
pub fn record_published(topic: &str) {
    EVENTS_PUBLISHED.with_label_values(&[topic]).inc();
}

/// Record one delivery outcome
#[cfg(feature = "metrics")]
pub fn record_delivery(topic: &str, outcome: &str, seconds: f64) {
    DELIVERIES.with_label_values(&[topic, outcome]).inc();
    DELIVERY_DURATION.observe(seconds);
}

/// Record a dead-lettered delivery
#[cfg(feature = "metrics")]
pub fn record_dead_letter() {
    DEAD_LETTERS.inc();
}

/// Record a circuit opening
#[cfg(feature = "metrics")]
pub fn record_circuit_opened() {
    CIRCUITS_OPENED.inc();
}

// =============================================================================
// NO-OP IMPLEMENTATIONS (when metrics feature disabled)
// =============================================================================

#[cfg(not(feature = "metrics"))]
pub fn record_published(_topic: &str) {}

#[cfg(not(feature = "metrics"))]
pub fn record_delivery(_topic: &str, _outcome: &str, _seconds: f64) {}

#[cfg(not(feature = "metrics"))]
pub fn record_dead_letter() {}

#[cfg(not(feature = "metrics"))]
pub fn record_circuit_opened() {}
