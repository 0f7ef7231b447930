//! # Sovereign Bus Runtime
//!
//! Hosts one [`EventBus`] with the commerce domain subscribers attached.
//!
//! ## Startup Sequence
//!
//! 1. Load configuration (TOML file, then `SB_*` environment overrides)
//! 2. Validate configuration
//! 3. Wire domain subscribers
//! 4. Serve publishes until shutdown (or run the scripted demo)
//!
//! ## Shutdown Sequence
//!
//! 1. Stop accepting publishes and drain those in flight
//! 2. Remove every subscription
//! 3. Log final statistics and metrics

pub mod handlers;

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use parking_lot::Mutex;
use serde_json::json;
use sovereign_bus::{
    BusConfig, BusStats, EventBus, EventPublisher, PublishOptions, ReplayCriteria, SubscriptionId,
    SubscriptionOptions,
};
use tracing::{debug, info, warn};

use crate::handlers::{
    topics, AnalyticsHandler, NotificationsHandler, OrdersHandler, PaymentsHandler,
};

/// Load bus configuration from an optional TOML file plus environment overrides.
pub fn load_config(path: Option<&Path>) -> Result<BusConfig> {
    let config = match path {
        Some(path) => {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file {}", path.display()))?;
            let config = BusConfig::from_toml_str(&content)
                .with_context(|| format!("Failed to parse config file {}", path.display()))?;
            info!(path = %path.display(), "Loaded configuration file");
            config
        }
        None => BusConfig::default(),
    };

    let config = config.with_env_overrides();
    config.validate().context("Invalid bus configuration")?;
    Ok(config)
}

/// The runtime owning the bus and its domain subscribers.
///
/// Publishing subscribers hold the bus; [`shutdown`](Self::shutdown) removes
/// them so the bus can be dropped.
pub struct BusRuntime {
    bus: Arc<EventBus>,
    notifications: NotificationsHandler,
    analytics: AnalyticsHandler,
    subscriptions: Mutex<Vec<SubscriptionId>>,
}

impl BusRuntime {
    /// Create a runtime with a fresh bus.
    pub fn new(config: BusConfig) -> Self {
        info!(
            max_retries = config.max_retries,
            retry_delay_ms = config.retry_delay_ms,
            circuit_breaker_threshold = config.circuit_breaker_threshold,
            event_sourcing = config.event_sourcing_enabled,
            dead_letters = config.dead_letter_enabled,
            "Creating event bus runtime"
        );

        Self {
            bus: Arc::new(EventBus::new(config)),
            notifications: NotificationsHandler::new(),
            analytics: AnalyticsHandler::new(),
            subscriptions: Mutex::new(Vec::new()),
        }
    }

    /// Wire the domain subscribers. Calling it twice is a no-op.
    pub fn start(&self) -> Result<()> {
        let mut subscriptions = self.subscriptions.lock();
        if !subscriptions.is_empty() {
            warn!("Runtime already started");
            return Ok(());
        }

        let publisher: Arc<dyn EventPublisher> = self.bus.clone();

        subscriptions.push(self.bus.subscribe(
            topics::ORDER_EVENTS,
            OrdersHandler::new(Arc::clone(&publisher)),
            SubscriptionOptions::new().priority(10),
        ));
        subscriptions.push(self.bus.subscribe(
            topics::PAYMENT_REQUESTED,
            PaymentsHandler::new(Arc::clone(&publisher)),
            SubscriptionOptions::new().priority(10),
        ));
        subscriptions.push(self.bus.subscribe(
            topics::COMPLETIONS,
            self.notifications.clone(),
            SubscriptionOptions::new().priority(2),
        ));
        subscriptions.push(self.bus.subscribe(
            topics::EVERYTHING,
            self.analytics.clone(),
            SubscriptionOptions::new().priority(1).retry_on_failure(false),
        ));

        info!(subscribers = subscriptions.len(), "Domain subscribers wired");
        Ok(())
    }

    /// Publish a scripted checkout flow: one good order, one order whose
    /// payment is rejected, then a replay of the good one.
    pub async fn run_demo(&self) -> Result<BusStats> {
        info!("Running commerce demo flow");

        let orders = [("ord-1001", 12.5), ("ord-1002", 0.0)];
        for (order_id, amount) in orders {
            let result = self
                .bus
                .publish(
                    topics::ORDER_CREATED,
                    json!({ "orderId": order_id, "amount": amount, "currency": "PI" }),
                    PublishOptions::new().correlation_id(format!("checkout-{order_id}")),
                )
                .await?;
            info!(
                order_id,
                delivered_to = result.delivered_to,
                failures = result.failures,
                "Order published"
            );
        }

        if let Some(chain) = self.bus.correlation("checkout-ord-1001") {
            let steps: Vec<&str> = chain.events.iter().map(|e| e.event_type.as_str()).collect();
            info!(correlation_id = %chain.id, ?steps, "Checkout chain");
        }

        for entry in self.bus.dead_letter_queue() {
            warn!(
                topic = %entry.event.event_type,
                subscriber = %entry.subscriber.id,
                error = %entry.error.message,
                "Dead letter"
            );
        }

        let report = self
            .bus
            .replay_events(
                ReplayCriteria::all()
                    .event_types([topics::ORDER_CREATED])
                    .correlation_id("checkout-ord-1001"),
            )
            .await;
        info!(
            total = report.total,
            replayed = report.replayed,
            failed = report.failed,
            "Replay finished"
        );

        let stats = self.bus.stats();
        self.log_stats(&stats);
        Ok(stats)
    }

    /// Drain the bus, detach subscribers and log final state.
    pub async fn shutdown(&self) {
        info!("Initiating graceful shutdown...");
        self.bus.shutdown().await;

        let ids: Vec<SubscriptionId> = self.subscriptions.lock().drain(..).collect();
        for id in ids {
            self.bus.unsubscribe(id);
        }

        self.log_stats(&self.bus.stats());
        info!(
            notifications_sent = self.notifications.sent(),
            topics_observed = self.analytics.counts().len(),
            "Subscriber totals"
        );

        match sovereign_telemetry::encode_metrics() {
            Ok(text) => debug!(metrics = %text, "Final metrics"),
            Err(e) => warn!(error = %e, "Failed to encode metrics"),
        }

        info!("Shutdown complete");
    }

    fn log_stats(&self, stats: &BusStats) {
        match serde_json::to_string(stats) {
            Ok(json) => info!(stats = %json, "Bus statistics"),
            Err(e) => warn!(error = %e, "Failed to serialize bus statistics"),
        }
    }

    pub fn bus(&self) -> Arc<EventBus> {
        Arc::clone(&self.bus)
    }

    pub fn notifications(&self) -> &NotificationsHandler {
        &self.notifications
    }

    pub fn analytics(&self) -> &AnalyticsHandler {
        &self.analytics
    }
}
