//! # Event Store
//!
//! Bounded, append-only log of published events kept for replay. It is not
//! a durable record and offers no delivery guarantee; once full, every
//! append drops the oldest event.

use crate::events::Event;
use std::collections::VecDeque;
use std::sync::Arc;

/// Default number of events retained.
pub const DEFAULT_EVENT_STORE_CAPACITY: usize = 10_000;

/// Selection of stored events for replay or inspection.
///
/// Every axis is optional; an absent axis does not filter. Time bounds are
/// inclusive.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReplayCriteria {
    pub start_time: Option<u64>,
    pub end_time: Option<u64>,
    pub event_types: Option<Vec<String>>,
    pub correlation_id: Option<String>,
}

impl ReplayCriteria {
    /// Criteria matching every stored event.
    #[must_use]
    pub fn all() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn start_time(mut self, millis: u64) -> Self {
        self.start_time = Some(millis);
        self
    }

    #[must_use]
    pub fn end_time(mut self, millis: u64) -> Self {
        self.end_time = Some(millis);
        self
    }

    #[must_use]
    pub fn event_types<I, S>(mut self, types: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.event_types = Some(types.into_iter().map(Into::into).collect());
        self
    }

    #[must_use]
    pub fn correlation_id(mut self, correlation_id: impl Into<String>) -> Self {
        self.correlation_id = Some(correlation_id.into());
        self
    }

    /// Check if an event satisfies every present axis.
    pub fn matches(&self, event: &Event) -> bool {
        if self.start_time.is_some_and(|start| event.timestamp < start) {
            return false;
        }
        if self.end_time.is_some_and(|end| event.timestamp > end) {
            return false;
        }
        if let Some(types) = &self.event_types {
            if !types.iter().any(|t| *t == event.event_type) {
                return false;
            }
        }
        if let Some(correlation_id) = &self.correlation_id {
            if *correlation_id != event.correlation_id {
                return false;
            }
        }
        true
    }
}

/// Ring buffer of the most recent events.
#[derive(Debug)]
pub struct EventStore {
    events: VecDeque<Arc<Event>>,
    capacity: usize,
    /// Events dropped to stay within capacity.
    evicted: u64,
}

impl EventStore {
    /// Create a store with the default capacity.
    #[must_use]
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_EVENT_STORE_CAPACITY)
    }

    /// Create a store holding at most `capacity` events.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            events: VecDeque::with_capacity(capacity.min(1024)),
            capacity,
            evicted: 0,
        }
    }

    /// Append an event, evicting the oldest when full.
    pub fn append(&mut self, event: Arc<Event>) {
        self.events.push_back(event);
        while self.events.len() > self.capacity {
            self.events.pop_front();
            self.evicted += 1;
        }
    }

    /// Matching events in append order.
    pub fn query(&self, criteria: &ReplayCriteria) -> Vec<Arc<Event>> {
        self.events
            .iter()
            .filter(|event| criteria.matches(event))
            .cloned()
            .collect()
    }

    /// All retained events, oldest first.
    pub fn iter(&self) -> impl Iterator<Item = &Arc<Event>> {
        self.events.iter()
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Total events dropped since creation.
    pub fn evicted(&self) -> u64 {
        self.evicted
    }
}

impl Default for EventStore {
    fn default() -> Self {
        Self::new()
    }
}
