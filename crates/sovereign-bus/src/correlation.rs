//! Correlation chain tracking.
//!
//! Maps a correlation id to the events published under it, in publish order.
//! The map is bounded; when full, the correlation that was created first is
//! evicted (insertion order, not last use).

use crate::events::{Event, EventId};
use serde::Serialize;
use std::collections::{HashMap, VecDeque};

/// Default number of correlations tracked.
pub const DEFAULT_CORRELATION_CAPACITY: usize = 1000;

/// One event within a correlation chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CorrelatedEvent {
    pub event_id: EventId,
    pub event_type: String,
    pub timestamp: u64,
}

/// Events sharing one correlation id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Correlation {
    pub id: String,
    pub events: Vec<CorrelatedEvent>,
    /// Timestamp of the first event seen for this id.
    pub started_at: u64,
}

/// Bounded correlation map with O(1) eviction.
#[derive(Debug)]
pub struct CorrelationTracker {
    correlations: HashMap<String, Correlation>,
    /// Correlation ids in creation order.
    order: VecDeque<String>,
    capacity: usize,
}

impl CorrelationTracker {
    #[must_use]
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CORRELATION_CAPACITY)
    }

    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            correlations: HashMap::new(),
            order: VecDeque::new(),
            capacity: capacity.max(1),
        }
    }

    /// Add an event to its correlation chain, creating the chain if needed.
    pub fn track(&mut self, event: &Event) {
        let entry = CorrelatedEvent {
            event_id: event.id,
            event_type: event.event_type.clone(),
            timestamp: event.timestamp,
        };

        if let Some(correlation) = self.correlations.get_mut(&event.correlation_id) {
            correlation.events.push(entry);
            return;
        }

        self.correlations.insert(
            event.correlation_id.clone(),
            Correlation {
                id: event.correlation_id.clone(),
                events: vec![entry],
                started_at: event.timestamp,
            },
        );
        self.order.push_back(event.correlation_id.clone());

        while self.correlations.len() > self.capacity {
            let Some(oldest) = self.order.pop_front() else {
                break;
            };
            self.correlations.remove(&oldest);
        }
    }

    /// Copy of one correlation chain.
    pub fn get(&self, correlation_id: &str) -> Option<Correlation> {
        self.correlations.get(correlation_id).cloned()
    }

    pub fn len(&self) -> usize {
        self.correlations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.correlations.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl Default for CorrelationTracker {
    fn default() -> Self {
        Self::new()
    }
}
