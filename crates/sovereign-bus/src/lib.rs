//! # Sovereign Bus - In-Process Event Bus
//!
//! Publish/subscribe dispatch for cross-domain integration inside one
//! process, with delivery policy around every handler.
//!
//! ## Delivery
//!
//! ```text
//! ┌──────────────┐                    ┌──────────────┐
//! │  Publisher   │                    │  Subscriber  │
//! │              │    publish()       │   handler    │
//! │              │ ──────┐            │              │
//! └──────────────┘       │            └──────────────┘
//!                        ▼                    ↑
//!                  ┌──────────────┐   retry  │  circuit breaker
//!                  │  Event Bus   │ ─────────┘  dead letter queue
//!                  │              │
//!                  └──────────────┘
//!                    │         │
//!              EventStore   CorrelationTracker
//! ```
//!
//! - **Priority:** higher-priority subscriptions of a topic run first
//! - **Wildcards:** `*` in a topic matches any run of characters
//! - **Retry:** exponential backoff, `retry_delay * 2^(attempt - 1)`
//! - **Circuit breaking:** per subscriber, fail fast once the threshold is hit
//! - **Replay:** stored events are re-published under a derived correlation id
//! - **Dead letters:** exhausted deliveries are kept for manual retry
//!
//! ## Example
//!
//! ```no_run
//! use serde_json::json;
//! use sovereign_bus::{Event, EventBus, PublishOptions, SubscriptionOptions};
//! use std::sync::Arc;
//!
//! # async fn demo() -> Result<(), sovereign_bus::BusError> {
//! let bus = EventBus::with_defaults();
//! bus.subscribe(
//!     "commerce.order.*",
//!     |event: Arc<Event>| async move {
//!         println!("order event {}", event.id);
//!         Ok::<(), anyhow::Error>(())
//!     },
//!     SubscriptionOptions::new().priority(10),
//! );
//!
//! let result = bus
//!     .publish("commerce.order.created", json!({"orderId": 1}), PublishOptions::new())
//!     .await?;
//! assert_eq!(result.delivered_to, 1);
//! # Ok(())
//! # }
//! ```

// Nursery lints that are too strict
#![allow(clippy::missing_const_for_fn)]
// Allow in tests
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]
#![cfg_attr(test, allow(clippy::panic))]

pub mod circuit_breaker;
pub mod config;
pub mod correlation;
pub mod dead_letter;
pub mod delivery;
pub mod error;
pub mod events;
pub mod metrics;
pub mod publisher;
pub mod retry;
pub mod store;
pub mod subscriber;

// Re-export main types
pub use circuit_breaker::{BreakerCounts, BreakerSnapshot, CircuitBreakerConfig, CircuitState};
pub use config::BusConfig;
pub use correlation::{CorrelatedEvent, Correlation};
pub use dead_letter::{DeadLetterEntry, DeadLetterError, DeadLetterSubscriber};
pub use delivery::{DeliveryOutcome, SkipReason};
pub use error::{BusError, BusResult, ConfigError};
pub use events::{Event, EventId, PublishOptions, PublishResult};
pub use publisher::{BusStats, DeadLetterRetry, EventBus, EventPublisher, ReplayReport, TopicMetrics};
pub use retry::RetryPolicy;
pub use store::ReplayCriteria;
pub use subscriber::{
    EventHandler, HandlerResult, SubscriptionId, SubscriptionInfo, SubscriptionOptions,
    SubscriptionStats,
};
