//! Per-subscriber circuit breakers.
//!
//! Isolates a consistently failing handler: once it has accumulated
//! `threshold` recorded failures, deliveries to it fail fast until the
//! cooldown elapses.
//!
//! # Circuit Breaker States
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────┐
//! │                    CIRCUIT BREAKER STATE MACHINE                    │
//! ├─────────────────────────────────────────────────────────────────────┤
//! │                                                                     │
//! │      ┌──────────┐          ┌──────────┐          ┌──────────┐       │
//! │      │  CLOSED  │ ───────► │   OPEN   │ ───────► │HALF-OPEN │       │
//! │      │ (normal) │ failures │ (reject) │  timeout │  (probe) │       │
//! │      └──────────┘ >= thres └──────────┘          └──────────┘       │
//! │            ▲                     ▲                     │            │
//! │            │                     └──── failure ────────┤            │
//! │            └──────── success with failures == 0 ───────┘            │
//! └─────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Failures are not reset by a success; each success decrements the count
//! by one (floored at zero) so short error bursts decay instead of
//! flipping the breaker back and forth.
//!
//! A breaker exists from subscribe to unsubscribe. Outcomes recorded for a
//! subscriber without one (removed while a delivery was in flight) are
//! dropped.

use crate::events::current_timestamp_ms;
use crate::metrics;
use crate::subscriber::SubscriptionId;
use parking_lot::RwLock;
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Circuit breaker state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    /// Normal operation - deliveries pass through
    Closed,
    /// Deliveries are rejected immediately
    Open,
    /// Cooldown elapsed - deliveries pass through as probes
    HalfOpen,
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CircuitState::Closed => write!(f, "closed"),
            CircuitState::Open => write!(f, "open"),
            CircuitState::HalfOpen => write!(f, "half-open"),
        }
    }
}

/// Circuit breaker configuration
#[derive(Debug, Clone, Copy)]
pub struct CircuitBreakerConfig {
    /// Recorded failures before the circuit opens
    pub failure_threshold: u32,
    /// Duration before half-open from open state
    pub open_timeout: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            open_timeout: Duration::from_secs(60),
        }
    }
}

/// Read-only view of one subscriber's breaker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BreakerSnapshot {
    pub state: CircuitState,
    pub failures: u32,
    /// Unix millis of the last recorded failure.
    pub last_failure_at: Option<u64>,
    /// Unix millis of the last transition to OPEN.
    pub opened_at: Option<u64>,
}

/// Number of breakers in each state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BreakerCounts {
    pub closed: usize,
    pub open: usize,
    pub half_open: usize,
}

/// Per-subscriber circuit state
#[derive(Debug)]
struct SubscriberCircuit {
    state: CircuitState,
    failures: u32,
    last_failure_at: Option<u64>,
    opened_at_ms: Option<u64>,
    /// Monotonic instant of the transition to OPEN, used for the cooldown.
    opened_at: Option<Instant>,
}

impl SubscriberCircuit {
    fn new() -> Self {
        Self {
            state: CircuitState::Closed,
            failures: 0,
            last_failure_at: None,
            opened_at_ms: None,
            opened_at: None,
        }
    }

    fn snapshot(&self) -> BreakerSnapshot {
        BreakerSnapshot {
            state: self.state,
            failures: self.failures,
            last_failure_at: self.last_failure_at,
            opened_at: self.opened_at_ms,
        }
    }
}

/// Circuit breakers for all subscribers of one bus.
pub struct CircuitBreakerRegistry {
    circuits: RwLock<HashMap<SubscriptionId, SubscriberCircuit>>,
    config: CircuitBreakerConfig,
}

impl CircuitBreakerRegistry {
    /// Create a new registry
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            circuits: RwLock::new(HashMap::new()),
            config,
        }
    }

    /// Start tracking a new subscriber, CLOSED with no failures.
    pub fn register(&self, subscriber: SubscriptionId) {
        self.circuits
            .write()
            .entry(subscriber)
            .or_insert_with(SubscriberCircuit::new);
    }

    /// Check whether a delivery to the subscriber may proceed.
    ///
    /// An OPEN circuit whose cooldown has elapsed moves to HALF_OPEN and lets
    /// the delivery through, whatever its failure count.
    pub fn allow(&self, subscriber: SubscriptionId) -> bool {
        let mut circuits = self.circuits.write();
        let Some(circuit) = circuits.get_mut(&subscriber) else {
            return true;
        };

        if circuit.state != CircuitState::Open {
            return true;
        }

        let Some(opened_at) = circuit.opened_at else {
            return true;
        };

        let elapsed = opened_at.elapsed();
        if elapsed >= self.config.open_timeout {
            info!(
                subscriber = %subscriber,
                failures = circuit.failures,
                "Circuit breaker transitioning to half-open"
            );
            circuit.state = CircuitState::HalfOpen;
            true
        } else {
            debug!(
                subscriber = %subscriber,
                remaining_ms = self.config.open_timeout.saturating_sub(elapsed).as_millis() as u64,
                "Circuit breaker is open, rejecting delivery"
            );
            false
        }
    }

    /// Record a successful delivery.
    pub fn record_success(&self, subscriber: SubscriptionId) {
        let mut circuits = self.circuits.write();
        let Some(circuit) = circuits.get_mut(&subscriber) else {
            return;
        };

        circuit.failures = circuit.failures.saturating_sub(1);

        if circuit.state == CircuitState::HalfOpen && circuit.failures == 0 {
            info!(subscriber = %subscriber, "Circuit breaker closing after recovery");
            circuit.state = CircuitState::Closed;
            circuit.opened_at = None;
        }
    }

    /// Record a failed handler invocation and return the resulting state.
    ///
    /// A subscriber without a breaker stays untracked and reads as CLOSED.
    pub fn record_failure(&self, subscriber: SubscriptionId) -> CircuitState {
        let mut circuits = self.circuits.write();
        let Some(circuit) = circuits.get_mut(&subscriber) else {
            debug!(subscriber = %subscriber, "Failure for removed subscriber not recorded");
            return CircuitState::Closed;
        };

        circuit.failures = circuit.failures.saturating_add(1);
        circuit.last_failure_at = Some(current_timestamp_ms());

        if circuit.failures >= self.config.failure_threshold {
            if circuit.state != CircuitState::Open {
                warn!(
                    subscriber = %subscriber,
                    failures = circuit.failures,
                    threshold = self.config.failure_threshold,
                    "Circuit breaker opening"
                );
                metrics::record_circuit_opened();
            }
            circuit.state = CircuitState::Open;
            circuit.opened_at = Some(Instant::now());
            circuit.opened_at_ms = Some(current_timestamp_ms());
        }

        circuit.state
    }

    /// Snapshot of one subscriber's breaker, if the subscriber is registered.
    pub fn snapshot(&self, subscriber: SubscriptionId) -> Option<BreakerSnapshot> {
        self.circuits
            .read()
            .get(&subscriber)
            .map(SubscriberCircuit::snapshot)
    }

    /// Current state of one subscriber's breaker.
    pub fn state(&self, subscriber: SubscriptionId) -> CircuitState {
        self.circuits
            .read()
            .get(&subscriber)
            .map_or(CircuitState::Closed, |c| c.state)
    }

    /// Force a breaker back to CLOSED with no failures.
    ///
    /// Returns `false` if the subscriber has no breaker.
    pub fn reset(&self, subscriber: SubscriptionId) -> bool {
        let mut circuits = self.circuits.write();
        match circuits.get_mut(&subscriber) {
            Some(circuit) => {
                info!(subscriber = %subscriber, state = %circuit.state, "Circuit breaker reset");
                *circuit = SubscriberCircuit::new();
                true
            }
            None => false,
        }
    }

    /// Drop the breaker of a removed subscriber.
    pub fn remove(&self, subscriber: SubscriptionId) {
        self.circuits.write().remove(&subscriber);
    }

    /// Breakers per state.
    pub fn counts(&self) -> BreakerCounts {
        let circuits = self.circuits.read();
        let mut counts = BreakerCounts::default();
        for circuit in circuits.values() {
            match circuit.state {
                CircuitState::Closed => counts.closed += 1,
                CircuitState::Open => counts.open += 1,
                CircuitState::HalfOpen => counts.half_open += 1,
            }
        }
        counts
    }

    /// Configured thresholds.
    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }
}
