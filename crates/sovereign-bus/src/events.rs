//! # Events
//!
//! The immutable facts that flow through the bus, plus the options and
//! results of publishing them.
//!
//! Events are handed to subscribers as `Arc<Event>`. Replay and dead-letter
//! retry never touch a stored event; they build a new one with a derived
//! correlation id (`<original>_replay`, `<original>_retry`).

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};
use uuid::Uuid;

/// Default payload schema version.
pub const DEFAULT_EVENT_VERSION: &str = "1.0";

/// Correlation suffix for replayed events.
pub const REPLAY_SUFFIX: &str = "_replay";

/// Correlation suffix for dead-letter retries.
pub const RETRY_SUFFIX: &str = "_retry";

/// Unique event identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EventId(Uuid);

impl EventId {
    /// Generate a fresh identifier.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// The underlying UUID.
    #[must_use]
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for EventId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

/// An event published to the bus.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    /// Unique identifier.
    pub id: EventId,
    /// Dot-namespaced topic, e.g. `commerce.order.created`.
    #[serde(rename = "type")]
    pub event_type: String,
    /// Opaque publisher-supplied value.
    pub payload: Value,
    /// Creation instant (milliseconds since the Unix epoch).
    pub timestamp: u64,
    /// Payload schema version.
    pub version: String,
    /// Groups related events of one workflow.
    pub correlation_id: String,
    /// Id of the event that caused this one, if the publisher supplied it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub causation_id: Option<String>,
    /// Auxiliary context (`replayed`, `retried`, ...).
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

impl Event {
    /// Build a new event from a topic, payload and publish options.
    ///
    /// Generates the id, the timestamp and, when absent, the correlation id.
    pub fn new(topic: impl Into<String>, payload: Value, options: PublishOptions) -> Self {
        Self {
            id: EventId::new(),
            event_type: topic.into(),
            payload,
            timestamp: current_timestamp_ms(),
            version: options
                .version
                .unwrap_or_else(|| DEFAULT_EVENT_VERSION.to_string()),
            correlation_id: options
                .correlation_id
                .unwrap_or_else(|| Uuid::new_v4().to_string()),
            causation_id: options.causation_id,
            metadata: options.metadata,
        }
    }

    /// Whether this event was produced by a replay.
    #[must_use]
    pub fn is_replayed(&self) -> bool {
        self.metadata
            .get("replayed")
            .and_then(Value::as_bool)
            .unwrap_or(false)
    }

    /// Whether this event was produced by a dead-letter retry.
    #[must_use]
    pub fn is_retried(&self) -> bool {
        self.metadata
            .get("retried")
            .and_then(Value::as_bool)
            .unwrap_or(false)
    }

    /// Publish options that re-emit this event under a derived correlation id.
    ///
    /// Version and causation carry over; `flag` is set to `true` in the
    /// metadata alongside the original event id.
    pub(crate) fn derived_options(&self, suffix: &str, flag: &str) -> PublishOptions {
        let mut options = PublishOptions::new()
            .version(self.version.clone())
            .correlation_id(format!("{}{}", self.correlation_id, suffix));
        options.causation_id = self.causation_id.clone();
        options.metadata = self.metadata.clone();
        options
            .metadata(flag, Value::Bool(true))
            .metadata("originalEventId", Value::String(self.id.to_string()))
    }
}

/// Optional fields supplied by a publisher.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PublishOptions {
    pub version: Option<String>,
    pub correlation_id: Option<String>,
    pub causation_id: Option<String>,
    pub metadata: Map<String, Value>,
}

impl PublishOptions {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn version(mut self, version: impl Into<String>) -> Self {
        self.version = Some(version.into());
        self
    }

    #[must_use]
    pub fn correlation_id(mut self, correlation_id: impl Into<String>) -> Self {
        self.correlation_id = Some(correlation_id.into());
        self
    }

    #[must_use]
    pub fn causation_id(mut self, causation_id: impl Into<String>) -> Self {
        self.causation_id = Some(causation_id.into());
        self
    }

    #[must_use]
    pub fn metadata(mut self, key: impl Into<String>, value: Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    /// Continue the workflow of `parent`: same correlation, parent as cause.
    #[must_use]
    pub fn caused_by(mut self, parent: &Event) -> Self {
        self.correlation_id = Some(parent.correlation_id.clone());
        self.causation_id = Some(parent.id.to_string());
        self
    }
}

/// Aggregate outcome of one `publish` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PublishResult {
    /// The bus accepted and dispatched the event.
    pub success: bool,
    /// Id of the published event.
    pub event_id: EventId,
    /// Deliveries that completed without error (filtered skips included).
    pub delivered_to: usize,
    /// Deliveries skipped by a subscription filter.
    pub skipped: usize,
    /// Deliveries rejected after retries and dead-lettering.
    pub failures: usize,
}

impl PublishResult {
    /// Result for a publish that matched no subscriber.
    pub(crate) fn undelivered(event_id: EventId) -> Self {
        Self {
            success: true,
            event_id,
            delivered_to: 0,
            skipped: 0,
            failures: 0,
        }
    }

    /// Every matched delivery completed.
    #[must_use]
    pub fn fully_delivered(&self) -> bool {
        self.failures == 0
    }
}

/// Current Unix time in milliseconds.
pub fn current_timestamp_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
