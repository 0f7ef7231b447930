//! # Dead Letter Queue
//!
//! Deliveries that exhausted their retry budget land here for manual
//! inspection and retry. An entry leaves the queue only through a successful
//! manual retry, an operator purge, or eviction once the queue is full.

use crate::events::{current_timestamp_ms, Event};
use crate::subscriber::SubscriptionId;
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::Arc;

/// Default number of dead letters retained.
pub const DEFAULT_DEAD_LETTER_CAPACITY: usize = 1000;

/// The subscription whose delivery failed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeadLetterSubscriber {
    pub id: SubscriptionId,
    pub event_type: String,
}

/// The final error of the failed delivery.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeadLetterError {
    /// Top-level error message.
    pub message: String,
    /// Full error chain.
    pub detail: String,
}

impl DeadLetterError {
    /// Capture an error together with its cause chain.
    pub fn from_error(error: &anyhow::Error) -> Self {
        Self {
            message: error.to_string(),
            detail: format!("{error:?}"),
        }
    }
}

/// One failed delivery.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeadLetterEntry {
    /// Monotonic position assigned on insertion.
    pub sequence: u64,
    pub event: Arc<Event>,
    pub subscriber: DeadLetterSubscriber,
    pub error: DeadLetterError,
    /// Unix millis when the entry was recorded.
    pub failed_at: u64,
}

/// Bounded FIFO of dead letters.
#[derive(Debug)]
pub struct DeadLetterQueue {
    entries: VecDeque<DeadLetterEntry>,
    capacity: usize,
    next_sequence: u64,
}

impl DeadLetterQueue {
    #[must_use]
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_DEAD_LETTER_CAPACITY)
    }

    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: VecDeque::new(),
            capacity: capacity.max(1),
            next_sequence: 0,
        }
    }

    /// Record a failed delivery, evicting the oldest entry when full.
    ///
    /// Returns the sequence number of the new entry.
    pub fn push(
        &mut self,
        event: Arc<Event>,
        subscriber: DeadLetterSubscriber,
        error: DeadLetterError,
    ) -> u64 {
        let sequence = self.next_sequence;
        self.next_sequence += 1;

        self.entries.push_back(DeadLetterEntry {
            sequence,
            event,
            subscriber,
            error,
            failed_at: current_timestamp_ms(),
        });
        while self.entries.len() > self.capacity {
            self.entries.pop_front();
        }
        sequence
    }

    /// Entry at a queue position.
    pub fn get(&self, index: usize) -> Option<&DeadLetterEntry> {
        self.entries.get(index)
    }

    /// Remove the entry with the given sequence number, wherever it now sits.
    pub fn remove_sequence(&mut self, sequence: u64) -> Option<DeadLetterEntry> {
        let position = self.entries.iter().position(|e| e.sequence == sequence)?;
        self.entries.remove(position)
    }

    /// Copy of every entry, oldest first.
    pub fn snapshot(&self) -> Vec<DeadLetterEntry> {
        self.entries.iter().cloned().collect()
    }

    /// Remove all entries, returning how many were dropped.
    pub fn clear(&mut self) -> usize {
        let removed = self.entries.len();
        self.entries.clear();
        removed
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for DeadLetterQueue {
    fn default() -> Self {
        Self::new()
    }
}
