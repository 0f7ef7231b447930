//! # Subscriptions
//!
//! Defines the subscription side of the event bus: the handler capability,
//! per-subscription options and counters, and the registry that resolves a
//! published topic to the subscriptions that should receive it.
//!
//! ## Resolution Order
//!
//! ```text
//! publish("order.created")
//!     │
//!     ├── exact bucket "order.created"   [prio 10, prio 5, ...]   (priority-sorted)
//!     │
//!     └── pattern buckets, in registration order
//!             "order.*"                  [prio 7, prio 1]         (priority-sorted)
//!             "*"                        [prio 9]
//! ```
//!
//! Exact matches always come first. Pattern matches follow regardless of
//! their priority; buckets are sorted internally but never merged.

use crate::events::Event;
use async_trait::async_trait;
use regex::Regex;
use serde::Serialize;
use std::cmp::Reverse;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};

/// Default subscription priority.
pub const DEFAULT_PRIORITY: i32 = 5;

/// Wildcard character in topic patterns.
pub const WILDCARD: char = '*';

/// Outcome of a handler invocation.
pub type HandlerResult = anyhow::Result<()>;

/// Identifier of a subscription, issued in increasing order and never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct SubscriptionId(u64);

impl SubscriptionId {
    /// Wrap a raw id.
    #[must_use]
    pub const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    /// The raw numeric id.
    #[must_use]
    pub const fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Something that consumes events.
///
/// Implemented for any `Fn(Arc<Event>) -> impl Future<Output = HandlerResult>`
/// closure, so both domain services and ad-hoc closures can subscribe.
#[async_trait]
pub trait EventHandler: Send + Sync {
    /// Handle one delivery. An `Err` counts as a failed attempt.
    async fn handle(&self, event: Arc<Event>) -> HandlerResult;
}

#[async_trait]
impl<F, Fut> EventHandler for F
where
    F: Fn(Arc<Event>) -> Fut + Send + Sync,
    Fut: Future<Output = HandlerResult> + Send + 'static,
{
    async fn handle(&self, event: Arc<Event>) -> HandlerResult {
        (self)(event).await
    }
}

/// Predicate deciding whether a subscription wants an event.
pub type EventFilter = Arc<dyn Fn(&Event) -> bool + Send + Sync>;

/// Rewrites the event handed to a handler.
pub type EventTransform = Arc<dyn Fn(&Event) -> Event + Send + Sync>;

/// Per-subscription delivery options.
#[derive(Clone)]
pub struct SubscriptionOptions {
    /// Higher priorities are delivered first within a bucket.
    pub priority: i32,
    /// Deliveries for which this returns `false` are skipped.
    pub filter: Option<EventFilter>,
    /// Applied before the handler; stored events are unaffected.
    pub transform: Option<EventTransform>,
    /// Use the full retry budget instead of a single attempt.
    pub retry_on_failure: bool,
}

impl SubscriptionOptions {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    #[must_use]
    pub fn filter(mut self, filter: impl Fn(&Event) -> bool + Send + Sync + 'static) -> Self {
        self.filter = Some(Arc::new(filter));
        self
    }

    #[must_use]
    pub fn transform(
        mut self,
        transform: impl Fn(&Event) -> Event + Send + Sync + 'static,
    ) -> Self {
        self.transform = Some(Arc::new(transform));
        self
    }

    #[must_use]
    pub fn retry_on_failure(mut self, retry: bool) -> Self {
        self.retry_on_failure = retry;
        self
    }
}

impl Default for SubscriptionOptions {
    fn default() -> Self {
        Self {
            priority: DEFAULT_PRIORITY,
            filter: None,
            transform: None,
            retry_on_failure: true,
        }
    }
}

impl fmt::Debug for SubscriptionOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubscriptionOptions")
            .field("priority", &self.priority)
            .field("filter", &self.filter.is_some())
            .field("transform", &self.transform.is_some())
            .field("retry_on_failure", &self.retry_on_failure)
            .finish()
    }
}

/// Delivery counters of one subscription.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SubscriptionStats {
    /// Deliveries that passed the circuit check.
    pub received: u64,
    /// Handler invocations that succeeded.
    pub processed: u64,
    /// Handler invocations that failed.
    pub failed: u64,
}

#[derive(Debug, Default)]
struct SubscriptionCounters {
    received: AtomicU64,
    processed: AtomicU64,
    failed: AtomicU64,
}

/// A standing registration of interest in a topic or topic pattern.
pub struct Subscription {
    id: SubscriptionId,
    event_type: String,
    handler: Arc<dyn EventHandler>,
    options: SubscriptionOptions,
    counters: SubscriptionCounters,
}

impl Subscription {
    pub(crate) fn new(
        id: SubscriptionId,
        event_type: String,
        handler: Arc<dyn EventHandler>,
        options: SubscriptionOptions,
    ) -> Self {
        Self {
            id,
            event_type,
            handler,
            options,
            counters: SubscriptionCounters::default(),
        }
    }

    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    /// The topic or pattern this subscription was registered for.
    pub fn event_type(&self) -> &str {
        &self.event_type
    }

    pub fn priority(&self) -> i32 {
        self.options.priority
    }

    pub fn options(&self) -> &SubscriptionOptions {
        &self.options
    }

    pub(crate) fn handler(&self) -> &Arc<dyn EventHandler> {
        &self.handler
    }

    pub fn stats(&self) -> SubscriptionStats {
        SubscriptionStats {
            received: self.counters.received.load(Ordering::Relaxed),
            processed: self.counters.processed.load(Ordering::Relaxed),
            failed: self.counters.failed.load(Ordering::Relaxed),
        }
    }

    pub(crate) fn mark_received(&self) {
        self.counters.received.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn mark_processed(&self) {
        self.counters.processed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn mark_failed(&self) {
        self.counters.failed.fetch_add(1, Ordering::Relaxed);
    }

    /// Read-only view for callers outside the bus.
    pub fn info(&self) -> SubscriptionInfo {
        SubscriptionInfo {
            id: self.id,
            event_type: self.event_type.clone(),
            priority: self.options.priority,
            retry_on_failure: self.options.retry_on_failure,
            stats: self.stats(),
        }
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("event_type", &self.event_type)
            .field("options", &self.options)
            .field("stats", &self.stats())
            .finish()
    }
}

/// Snapshot of a subscription.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscriptionInfo {
    pub id: SubscriptionId,
    pub event_type: String,
    pub priority: i32,
    pub retry_on_failure: bool,
    pub stats: SubscriptionStats,
}

/// Whether a topic string is a wildcard pattern.
pub fn is_pattern(topic: &str) -> bool {
    topic.contains(WILDCARD)
}

/// Compile a `*`-glob into an anchored regex.
///
/// Every non-wildcard character matches literally; `*` matches any run of
/// characters, dots included.
pub fn compile_pattern(pattern: &str) -> Result<Regex, regex::Error> {
    let body = pattern
        .split(WILDCARD)
        .map(regex::escape)
        .collect::<Vec<_>>()
        .join(".*");
    Regex::new(&format!("^{body}$"))
}

#[derive(Debug)]
struct TopicPattern {
    topic: String,
    regex: Regex,
}

/// Live subscriptions by id and by topic.
#[derive(Default)]
pub struct SubscriptionRegistry {
    subscriptions: HashMap<SubscriptionId, Arc<Subscription>>,
    next_id: u64,
    /// Topic (exact or pattern) to ids, sorted by descending priority.
    topics: HashMap<String, Vec<SubscriptionId>>,
    /// Pattern topics in registration order.
    patterns: Vec<TopicPattern>,
}

impl SubscriptionRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler for a topic or pattern.
    pub fn insert(
        &mut self,
        topic: &str,
        handler: Arc<dyn EventHandler>,
        options: SubscriptionOptions,
    ) -> SubscriptionId {
        let id = SubscriptionId(self.next_id);
        self.next_id += 1;
        let subscription = Arc::new(Subscription::new(id, topic.to_string(), handler, options));
        self.subscriptions.insert(id, subscription);

        if !self.topics.contains_key(topic) && is_pattern(topic) {
            match compile_pattern(topic) {
                Ok(regex) => self.patterns.push(TopicPattern {
                    topic: topic.to_string(),
                    regex,
                }),
                Err(e) => warn!(topic, error = %e, "Unusable topic pattern; only exact publishes will match"),
            }
        }

        let subscriptions = &self.subscriptions;
        let bucket = self.topics.entry(topic.to_string()).or_default();
        bucket.push(id);
        bucket.sort_by_key(|id| {
            Reverse(subscriptions.get(id).map_or(i32::MIN, |s| s.priority()))
        });

        debug!(subscription = %id, topic, "Subscription registered");
        id
    }

    /// Remove a subscription, pruning its topic when it becomes empty.
    pub fn remove(&mut self, id: SubscriptionId) -> Option<Arc<Subscription>> {
        let subscription = self.subscriptions.remove(&id)?;
        let topic = subscription.event_type();

        if let Some(bucket) = self.topics.get_mut(topic) {
            if let Some(position) = bucket.iter().position(|candidate| *candidate == id) {
                bucket.remove(position);
            }
            if bucket.is_empty() {
                self.topics.remove(topic);
                self.patterns.retain(|p| p.topic != topic);
            }
        }

        debug!(subscription = %id, topic, "Subscription removed");
        Some(subscription)
    }

    /// Subscriptions that should receive a publish to `topic`.
    ///
    /// Exact matches first (priority order), then pattern matches bucket by
    /// bucket in registration order, without duplicates.
    pub fn resolve(&self, topic: &str) -> Vec<Arc<Subscription>> {
        let mut seen = HashSet::new();
        let mut matched = Vec::new();

        let exact = self.topics.get(topic).into_iter().flatten();
        let wildcard = self
            .patterns
            .iter()
            .filter(|pattern| pattern.regex.is_match(topic))
            .filter_map(|pattern| self.topics.get(&pattern.topic))
            .flatten();

        for id in exact.chain(wildcard) {
            if !seen.insert(*id) {
                continue;
            }
            if let Some(subscription) = self.get(*id) {
                matched.push(subscription);
            }
        }
        matched
    }

    /// Look up a live subscription.
    pub fn get(&self, id: SubscriptionId) -> Option<Arc<Subscription>> {
        self.subscriptions.get(&id).cloned()
    }

    /// Subscriptions registered under exactly this topic or pattern string.
    pub fn for_topic(&self, topic: &str) -> Vec<Arc<Subscription>> {
        self.topics
            .get(topic)
            .into_iter()
            .flatten()
            .filter_map(|id| self.get(*id))
            .collect()
    }

    /// Total live subscriptions.
    pub fn len(&self) -> usize {
        self.subscriptions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.subscriptions.is_empty()
    }

    /// Number of distinct topics and patterns with at least one subscriber.
    pub fn topic_count(&self) -> usize {
        self.topics.len()
    }
}
