//! # Delivery Pipeline
//!
//! Delivers one event to one subscription:
//!
//! ```text
//! circuit check ──open──→ Err(CircuitOpen)            (handler not invoked)
//!      │
//!   filter ──false──→ Ok(Skipped)
//!      │
//!  transform (copy handed to the handler; the stored event is unchanged)
//!      │
//!  attempt 1..=N ──ok──→ processed++, breaker success ──→ Ok(Delivered)
//!      │ err
//!      ├── failed++, breaker failure
//!      └── sleep(base * 2^(k-1)) if attempts remain
//!      │
//!  exhausted ──→ dead letter (if enabled) ──→ Err(HandlerFailed)
//! ```
//!
//! Retries of one delivery are strictly sequential. A panicking handler is
//! treated as a failed attempt so it cannot take down sibling deliveries.
//! [`DeliveryPipeline::redeliver`] runs the same steps but never
//! dead-letters; it serves manual dead-letter retries.

use crate::circuit_breaker::{BreakerCounts, BreakerSnapshot, CircuitBreakerRegistry};
use crate::dead_letter::{DeadLetterError, DeadLetterQueue, DeadLetterSubscriber};
use crate::error::{BusError, BusResult};
use crate::events::Event;
use crate::metrics;
use crate::retry::RetryPolicy;
use crate::subscriber::{Subscription, SubscriptionId};
use futures::FutureExt;
use parking_lot::Mutex;
use serde::Serialize;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tracing::{debug, warn};

/// Why a delivery was skipped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SkipReason {
    /// The subscription filter rejected the event.
    Filtered,
}

/// Successful end state of a delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryOutcome {
    /// The handler completed.
    Delivered,
    /// The handler was not invoked on purpose.
    Skipped(SkipReason),
}

/// Retry, circuit-breaking and dead-letter policy shared by all deliveries
/// of one bus.
pub struct DeliveryPipeline {
    policy: RetryPolicy,
    dead_letter_enabled: bool,
    breakers: CircuitBreakerRegistry,
    dead_letters: Mutex<DeadLetterQueue>,
}

impl DeliveryPipeline {
    pub fn new(
        policy: RetryPolicy,
        dead_letter_enabled: bool,
        breakers: CircuitBreakerRegistry,
        dead_letters: DeadLetterQueue,
    ) -> Self {
        Self {
            policy,
            dead_letter_enabled,
            breakers,
            dead_letters: Mutex::new(dead_letters),
        }
    }

    /// Run the pipeline for one subscription.
    pub async fn deliver(
        &self,
        subscription: &Subscription,
        event: &Arc<Event>,
    ) -> BusResult<DeliveryOutcome> {
        self.run(subscription, event, self.dead_letter_enabled).await
    }

    /// Run the pipeline without dead-lettering an exhausted delivery.
    pub async fn redeliver(
        &self,
        subscription: &Subscription,
        event: &Arc<Event>,
    ) -> BusResult<DeliveryOutcome> {
        self.run(subscription, event, false).await
    }

    async fn run(
        &self,
        subscription: &Subscription,
        event: &Arc<Event>,
        dead_letter: bool,
    ) -> BusResult<DeliveryOutcome> {
        let subscriber = subscription.id();

        if !self.breakers.allow(subscriber) {
            return Err(BusError::CircuitOpen { subscriber });
        }

        subscription.mark_received();

        let options = subscription.options();
        if let Some(filter) = &options.filter {
            if !filter(event) {
                debug!(subscriber = %subscriber, event_id = %event.id, "Delivery filtered");
                return Ok(DeliveryOutcome::Skipped(SkipReason::Filtered));
            }
        }

        let delivered = match &options.transform {
            Some(transform) => Arc::new(transform(event)),
            None => Arc::clone(event),
        };

        let attempts = self.policy.attempts_for(options.retry_on_failure);
        let mut last_error = None;

        for attempt in 1..=attempts {
            match self.invoke(subscription, Arc::clone(&delivered)).await {
                Ok(()) => {
                    subscription.mark_processed();
                    self.breakers.record_success(subscriber);
                    debug!(
                        subscriber = %subscriber,
                        event_id = %event.id,
                        attempt,
                        "Event delivered"
                    );
                    return Ok(DeliveryOutcome::Delivered);
                }
                Err(error) => {
                    subscription.mark_failed();
                    let state = self.breakers.record_failure(subscriber);
                    warn!(
                        subscriber = %subscriber,
                        event_id = %event.id,
                        topic = %event.event_type,
                        attempt,
                        attempts,
                        circuit = %state,
                        error = %error,
                        "Handler failed"
                    );
                    last_error = Some(error);

                    if attempt < attempts {
                        tokio::time::sleep(self.policy.delay_after(attempt)).await;
                    }
                }
            }
        }

        let error = last_error.unwrap_or_else(|| anyhow::anyhow!("no delivery attempt made"));

        if dead_letter {
            self.dead_letters.lock().push(
                Arc::clone(event),
                DeadLetterSubscriber {
                    id: subscriber,
                    event_type: subscription.event_type().to_string(),
                },
                DeadLetterError::from_error(&error),
            );
            metrics::record_dead_letter();
            warn!(
                subscriber = %subscriber,
                event_id = %event.id,
                "Delivery dead-lettered after exhausting retries"
            );
        }

        Err(BusError::HandlerFailed {
            subscriber,
            attempts,
            message: error.to_string(),
        })
    }

    async fn invoke(&self, subscription: &Subscription, event: Arc<Event>) -> anyhow::Result<()> {
        match AssertUnwindSafe(subscription.handler().handle(event))
            .catch_unwind()
            .await
        {
            Ok(result) => result,
            Err(panic) => {
                let reason = panic
                    .downcast_ref::<&str>()
                    .map(|s| (*s).to_string())
                    .or_else(|| panic.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "unknown panic".to_string());
                Err(anyhow::anyhow!("handler panicked: {reason}"))
            }
        }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    pub fn breakers(&self) -> &CircuitBreakerRegistry {
        &self.breakers
    }

    pub fn dead_letters(&self) -> &Mutex<DeadLetterQueue> {
        &self.dead_letters
    }

    pub fn breaker(&self, subscriber: SubscriptionId) -> Option<BreakerSnapshot> {
        self.breakers.snapshot(subscriber)
    }

    pub fn breaker_counts(&self) -> BreakerCounts {
        self.breakers.counts()
    }
}
