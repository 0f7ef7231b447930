//! # Event Bus
//!
//! The public face of the bus: publish, subscribe, replay, dead-letter
//! retry and statistics.
//!
//! ```text
//! publish(topic, payload)
//!     │
//!     ├── build Event ──→ EventStore (if sourcing) ──→ CorrelationTracker
//!     │
//!     ├── resolve subscriptions (exact, then patterns)
//!     │
//!     └── join_all ─┬─→ pipeline(sub A) ─┐
//!                   ├─→ pipeline(sub B) ─┼──→ PublishResult { delivered_to, failures }
//!                   └─→ pipeline(sub C) ─┘
//! ```
//!
//! A failing subscriber never affects its siblings, and `publish` only
//! returns an error once the bus is shutting down.

use crate::circuit_breaker::{BreakerCounts, BreakerSnapshot, CircuitBreakerConfig, CircuitBreakerRegistry};
use crate::config::BusConfig;
use crate::correlation::{Correlation, CorrelationTracker};
use crate::dead_letter::{DeadLetterEntry, DeadLetterQueue};
use crate::delivery::{DeliveryOutcome, DeliveryPipeline};
use crate::error::{BusError, BusResult};
use crate::events::{Event, EventId, PublishOptions, PublishResult, REPLAY_SUFFIX, RETRY_SUFFIX};
use crate::metrics;
use crate::store::{EventStore, ReplayCriteria};
use crate::subscriber::{EventHandler, Subscription, SubscriptionId, SubscriptionInfo, SubscriptionOptions, SubscriptionRegistry};
use async_trait::async_trait;
use futures::future::join_all;
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Trait for publishing events to the bus.
///
/// Domain services depend on this rather than on [`EventBus`] so they can be
/// exercised against a recording publisher.
#[async_trait]
pub trait EventPublisher: Send + Sync {
    /// Publish an event; see [`EventBus::publish`].
    async fn publish(
        &self,
        topic: &str,
        payload: Value,
        options: PublishOptions,
    ) -> BusResult<PublishResult>;
}

/// Per-topic delivery counters.
///
/// At most `topic_metrics_capacity` topics are tracked; the topic first seen
/// longest ago is dropped to make room for a new one.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TopicMetrics {
    pub published: u64,
    pub delivered: u64,
    pub failed: u64,
}

/// Topic counters bounded by insertion order.
struct TopicMetricsTable {
    counters: HashMap<String, TopicMetrics>,
    order: VecDeque<String>,
    capacity: usize,
}

impl TopicMetricsTable {
    fn with_capacity(capacity: usize) -> Self {
        Self {
            counters: HashMap::new(),
            order: VecDeque::new(),
            capacity: capacity.max(1),
        }
    }

    fn entry(&mut self, topic: &str) -> &mut TopicMetrics {
        if !self.counters.contains_key(topic) {
            if self.order.len() >= self.capacity {
                if let Some(oldest) = self.order.pop_front() {
                    self.counters.remove(&oldest);
                }
            }
            self.order.push_back(topic.to_string());
        }
        self.counters.entry(topic.to_string()).or_default()
    }

    fn get(&self, topic: &str) -> Option<TopicMetrics> {
        self.counters.get(topic).copied()
    }

    fn snapshot(&self) -> BTreeMap<String, TopicMetrics> {
        self.counters
            .iter()
            .map(|(topic, metrics)| (topic.clone(), *metrics))
            .collect()
    }
}

/// Snapshot of bus state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BusStats {
    pub total_subscribers: usize,
    pub topics: usize,
    pub event_store_size: usize,
    pub dead_letter_size: usize,
    pub correlations: usize,
    pub circuit_breakers: BreakerCounts,
    pub topic_metrics: BTreeMap<String, TopicMetrics>,
}

/// Outcome of a replay.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ReplayReport {
    /// Stored events matching the criteria.
    pub total: usize,
    /// Re-published with every delivery completing.
    pub replayed: usize,
    /// Re-published with at least one failed delivery, or rejected.
    pub failed: usize,
}

/// Outcome of a manual dead-letter retry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeadLetterRetry {
    pub success: bool,
    /// Id of the re-published event, if a publish happened.
    pub event_id: Option<EventId>,
    pub error: Option<String>,
}

impl DeadLetterRetry {
    fn failed(event_id: Option<EventId>, error: impl Into<String>) -> Self {
        Self {
            success: false,
            event_id,
            error: Some(error.into()),
        }
    }
}

/// In-process event bus.
///
/// Shared as `Arc<EventBus>`. No lock is held across an await.
pub struct EventBus {
    config: BusConfig,
    subscriptions: RwLock<SubscriptionRegistry>,
    store: Mutex<EventStore>,
    correlations: Mutex<CorrelationTracker>,
    pipeline: DeliveryPipeline,
    topic_metrics: Mutex<TopicMetricsTable>,
    accepting: AtomicBool,
    in_flight: AtomicUsize,
    idle: Notify,
}

/// How a publish treats deliveries that exhaust their retries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Delivery {
    /// Dead-letter per configuration.
    Fresh,
    /// Manual dead-letter retry; never dead-letters again.
    Redelivery,
}

/// Tracks one publish in flight for [`EventBus::drain`].
struct InFlight<'a> {
    bus: &'a EventBus,
}

impl<'a> InFlight<'a> {
    fn enter(bus: &'a EventBus) -> Self {
        bus.in_flight.fetch_add(1, Ordering::SeqCst);
        Self { bus }
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        if self.bus.in_flight.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.bus.idle.notify_waiters();
        }
    }
}

impl EventBus {
    /// Create a bus from configuration.
    pub fn new(config: BusConfig) -> Self {
        let pipeline = DeliveryPipeline::new(
            config.retry_policy(),
            config.dead_letter_enabled,
            CircuitBreakerRegistry::new(CircuitBreakerConfig {
                failure_threshold: config.circuit_breaker_threshold,
                open_timeout: config.circuit_breaker_timeout(),
            }),
            DeadLetterQueue::with_capacity(config.dead_letter_capacity),
        );

        Self {
            subscriptions: RwLock::new(SubscriptionRegistry::new()),
            store: Mutex::new(EventStore::with_capacity(config.event_store_capacity)),
            correlations: Mutex::new(CorrelationTracker::with_capacity(config.correlation_capacity)),
            pipeline,
            topic_metrics: Mutex::new(TopicMetricsTable::with_capacity(
                config.topic_metrics_capacity,
            )),
            accepting: AtomicBool::new(true),
            in_flight: AtomicUsize::new(0),
            idle: Notify::new(),
            config,
        }
    }

    /// Create a bus with default configuration.
    pub fn with_defaults() -> Self {
        Self::new(BusConfig::default())
    }

    pub fn config(&self) -> &BusConfig {
        &self.config
    }

    /// Publish an event to every matching subscription.
    ///
    /// Deliveries run concurrently; the call completes once each of them
    /// has succeeded, been skipped, or failed for good. Delivery failures
    /// are reported as counts, never as `Err`.
    ///
    /// # Errors
    ///
    /// [`BusError::ShuttingDown`] once [`shutdown`](Self::shutdown) began.
    pub async fn publish(
        &self,
        topic: &str,
        payload: Value,
        options: PublishOptions,
    ) -> BusResult<PublishResult> {
        self.publish_as(topic, payload, options, Delivery::Fresh).await
    }

    async fn publish_as(
        &self,
        topic: &str,
        payload: Value,
        options: PublishOptions,
        delivery: Delivery,
    ) -> BusResult<PublishResult> {
        let _in_flight = InFlight::enter(self);
        if !self.is_accepting() {
            debug!(topic, "Publish rejected, bus is shutting down");
            return Err(BusError::ShuttingDown);
        }

        let event = Arc::new(Event::new(topic, payload, options));
        Ok(self.dispatch(event, delivery).await)
    }

    async fn dispatch(&self, event: Arc<Event>, delivery: Delivery) -> PublishResult {
        let topic = event.event_type.as_str();
        metrics::record_published(topic);

        if self.config.event_sourcing_enabled {
            self.store.lock().append(Arc::clone(&event));
        }
        self.correlations.lock().track(&event);

        let subscribers = self.subscriptions.read().resolve(topic);
        self.topic_metrics.lock().entry(topic).published += 1;

        if subscribers.is_empty() {
            warn!(topic, event_id = %event.id, "No subscribers for event");
            return PublishResult::undelivered(event.id);
        }

        let outcomes = join_all(
            subscribers
                .iter()
                .map(|subscription| self.deliver_recorded(subscription, &event, delivery)),
        )
        .await;

        let mut result = PublishResult::undelivered(event.id);
        for outcome in outcomes {
            match outcome {
                Ok(DeliveryOutcome::Delivered) => result.delivered_to += 1,
                Ok(DeliveryOutcome::Skipped(_)) => {
                    result.delivered_to += 1;
                    result.skipped += 1;
                }
                Err(_) => result.failures += 1,
            }
        }

        {
            let mut topic_metrics = self.topic_metrics.lock();
            let counters = topic_metrics.entry(topic);
            counters.delivered += result.delivered_to as u64;
            counters.failed += result.failures as u64;
        }

        debug!(
            topic,
            event_id = %event.id,
            subscribers = subscribers.len(),
            delivered = result.delivered_to,
            failures = result.failures,
            "Event published"
        );
        result
    }

    async fn deliver_recorded(
        &self,
        subscription: &Subscription,
        event: &Arc<Event>,
        delivery: Delivery,
    ) -> BusResult<DeliveryOutcome> {
        let started = Instant::now();
        let outcome = match delivery {
            Delivery::Fresh => self.pipeline.deliver(subscription, event).await,
            Delivery::Redelivery => self.pipeline.redeliver(subscription, event).await,
        };
        let label = match &outcome {
            Ok(DeliveryOutcome::Delivered) => "delivered",
            Ok(DeliveryOutcome::Skipped(_)) => "skipped",
            Err(BusError::CircuitOpen { .. }) => "circuit_open",
            Err(_) => "failed",
        };
        metrics::record_delivery(&event.event_type, label, started.elapsed().as_secs_f64());
        outcome
    }

    /// Register a handler for a topic or `*` pattern.
    pub fn subscribe<H>(&self, topic: &str, handler: H, options: SubscriptionOptions) -> SubscriptionId
    where
        H: EventHandler + 'static,
    {
        let mut subscriptions = self.subscriptions.write();
        let id = subscriptions.insert(topic, Arc::new(handler), options);
        self.pipeline.breakers().register(id);
        id
    }

    /// Remove a subscription and its circuit breaker.
    ///
    /// Returns `false` if the id is unknown or was already removed.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut subscriptions = self.subscriptions.write();
        match subscriptions.remove(id) {
            Some(_) => {
                self.pipeline.breakers().remove(id);
                true
            }
            None => {
                debug!(subscription = %id, "Unsubscribe of unknown subscription");
                false
            }
        }
    }

    /// Re-publish stored events matching `criteria`, oldest first.
    ///
    /// Each event goes out as a new event with a `_replay` correlation id
    /// and `replayed: true` metadata. Matches are captured before the first
    /// re-publish, so replayed events are never themselves replayed by the
    /// same call. Failures are counted and do not stop the replay.
    pub async fn replay_events(&self, criteria: ReplayCriteria) -> ReplayReport {
        let matching = self.store.lock().query(&criteria);
        let mut report = ReplayReport {
            total: matching.len(),
            ..ReplayReport::default()
        };
        info!(total = report.total, "Replaying events");

        for original in matching {
            let options = original.derived_options(REPLAY_SUFFIX, "replayed");
            match self
                .publish(&original.event_type, original.payload.clone(), options)
                .await
            {
                Ok(result) if result.fully_delivered() => report.replayed += 1,
                Ok(_) => report.failed += 1,
                Err(e) => {
                    warn!(event_id = %original.id, error = %e, "Replay publish rejected");
                    report.failed += 1;
                }
            }
        }

        info!(
            total = report.total,
            replayed = report.replayed,
            failed = report.failed,
            "Replay complete"
        );
        report
    }

    /// Snapshot of the dead-letter queue, oldest first.
    pub fn dead_letter_queue(&self) -> Vec<DeadLetterEntry> {
        self.pipeline.dead_letters().lock().snapshot()
    }

    /// Re-publish the dead letter at `index` with a `_retry` correlation id.
    ///
    /// The entry is removed only if every delivery of the re-publish
    /// completes. A failed retry never dead-letters, so the queue is left
    /// exactly as it was.
    pub async fn retry_dead_letter(&self, index: usize) -> DeadLetterRetry {
        let lookup = {
            let dead_letters = self.pipeline.dead_letters().lock();
            dead_letters
                .get(index)
                .cloned()
                .ok_or(BusError::DeadLetterNotFound {
                    index,
                    len: dead_letters.len(),
                })
        };
        let entry = match lookup {
            Ok(entry) => entry,
            Err(e) => {
                warn!(index, error = %e, "Dead letter retry failed");
                return DeadLetterRetry::failed(None, e.to_string());
            }
        };

        let original = &entry.event;
        let options = original.derived_options(RETRY_SUFFIX, "retried");
        match self
            .publish_as(
                &original.event_type,
                original.payload.clone(),
                options,
                Delivery::Redelivery,
            )
            .await
        {
            Ok(result) if result.fully_delivered() => {
                self.pipeline
                    .dead_letters()
                    .lock()
                    .remove_sequence(entry.sequence);
                info!(
                    index,
                    original_event_id = %original.id,
                    event_id = %result.event_id,
                    "Dead letter retried successfully"
                );
                DeadLetterRetry {
                    success: true,
                    event_id: Some(result.event_id),
                    error: None,
                }
            }
            Ok(result) => {
                warn!(
                    index,
                    original_event_id = %original.id,
                    failures = result.failures,
                    "Dead letter retry failed"
                );
                DeadLetterRetry::failed(
                    Some(result.event_id),
                    format!("{} delivery(ies) failed", result.failures),
                )
            }
            Err(e) => DeadLetterRetry::failed(None, e.to_string()),
        }
    }

    /// Remove every dead letter, returning how many were dropped.
    pub fn clear_dead_letter_queue(&self) -> usize {
        let removed = self.pipeline.dead_letters().lock().clear();
        info!(removed, "Dead letter queue cleared");
        removed
    }

    /// Snapshot of bus state.
    pub fn stats(&self) -> BusStats {
        let (total_subscribers, topics) = {
            let subscriptions = self.subscriptions.read();
            (subscriptions.len(), subscriptions.topic_count())
        };

        BusStats {
            total_subscribers,
            topics,
            event_store_size: self.store.lock().len(),
            dead_letter_size: self.pipeline.dead_letters().lock().len(),
            correlations: self.correlations.lock().len(),
            circuit_breakers: self.pipeline.breaker_counts(),
            topic_metrics: self.topic_metrics.lock().snapshot(),
        }
    }

    /// Events of one correlation chain, in publish order.
    pub fn correlation(&self, correlation_id: &str) -> Option<Correlation> {
        self.correlations.lock().get(correlation_id)
    }

    /// Stored events matching `criteria`, without re-publishing them.
    pub fn events(&self, criteria: &ReplayCriteria) -> Vec<Arc<Event>> {
        self.store.lock().query(criteria)
    }

    pub fn subscription(&self, id: SubscriptionId) -> Option<SubscriptionInfo> {
        self.subscriptions.read().get(id).map(|s| s.info())
    }

    /// Subscriptions registered under exactly `topic` (a topic or a pattern).
    pub fn subscriptions(&self, topic: &str) -> Vec<SubscriptionInfo> {
        self.subscriptions
            .read()
            .for_topic(topic)
            .iter()
            .map(|s| s.info())
            .collect()
    }

    pub fn circuit_breaker(&self, id: SubscriptionId) -> Option<BreakerSnapshot> {
        self.pipeline.breaker(id)
    }

    /// Force a subscriber's breaker back to closed.
    pub fn reset_circuit_breaker(&self, id: SubscriptionId) -> bool {
        self.pipeline.breakers().reset(id)
    }

    pub fn topic_metrics(&self, topic: &str) -> Option<TopicMetrics> {
        self.topic_metrics.lock().get(topic)
    }

    /// Whether new publishes are accepted.
    pub fn is_accepting(&self) -> bool {
        self.accepting.load(Ordering::SeqCst)
    }

    /// Wait until no publish is in flight.
    pub async fn drain(&self) {
        loop {
            let idle = self.idle.notified();
            tokio::pin!(idle);
            idle.as_mut().enable();
            if self.in_flight.load(Ordering::SeqCst) == 0 {
                return;
            }
            idle.await;
        }
    }

    /// Stop accepting publishes and wait for those in flight.
    pub async fn shutdown(&self) {
        if self.accepting.swap(false, Ordering::SeqCst) {
            info!(
                in_flight = self.in_flight.load(Ordering::SeqCst),
                "Event bus shutting down"
            );
        }
        self.drain().await;
        info!("Event bus drained");
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::with_defaults()
    }
}

#[async_trait]
impl EventPublisher for EventBus {
    async fn publish(
        &self,
        topic: &str,
        payload: Value,
        options: PublishOptions,
    ) -> BusResult<PublishResult> {
        EventBus::publish(self, topic, payload, options).await
    }
}
