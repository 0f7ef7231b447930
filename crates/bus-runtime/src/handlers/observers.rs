//! Subscribers that only observe: customer notifications and analytics.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use sovereign_bus::{Event, EventHandler, HandlerResult};
use sovereign_telemetry::{log_bus_event, log_event};

/// Notifies customers when a workflow step completes.
#[derive(Clone, Default)]
pub struct NotificationsHandler {
    sent: Arc<AtomicU64>,
}

impl NotificationsHandler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Notifications sent so far.
    pub fn sent(&self) -> u64 {
        self.sent.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl EventHandler for NotificationsHandler {
    async fn handle(&self, event: Arc<Event>) -> HandlerResult {
        let recipient = event.payload["orderId"].as_str().unwrap_or("unknown");
        self.sent.fetch_add(1, Ordering::Relaxed);
        log_bus_event!(info, "notifications", "Customer notified", event, recipient);
        Ok(())
    }
}

/// Counts every event by topic. Losing a sample is acceptable, so this
/// subscriber runs without retries.
#[derive(Clone, Default)]
pub struct AnalyticsHandler {
    counts: Arc<Mutex<BTreeMap<String, u64>>>,
}

impl AnalyticsHandler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Events seen per topic.
    pub fn counts(&self) -> BTreeMap<String, u64> {
        self.counts.lock().clone()
    }

    /// Events seen for one topic.
    pub fn count(&self, topic: &str) -> u64 {
        self.counts.lock().get(topic).copied().unwrap_or(0)
    }
}

#[async_trait]
impl EventHandler for AnalyticsHandler {
    async fn handle(&self, event: Arc<Event>) -> HandlerResult {
        let total = {
            let mut counts = self.counts.lock();
            let count = counts.entry(event.event_type.clone()).or_insert(0);
            *count += 1;
            *count
        };
        if event.is_replayed() {
            log_event!(debug, "analytics", "Replayed event observed", topic = %event.event_type);
        }
        log_bus_event!(debug, "analytics", "Event counted", event, total);
        Ok(())
    }
}
