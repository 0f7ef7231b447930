//! Order and payment subscribers.

use std::sync::Arc;

use anyhow::{bail, Context};
use async_trait::async_trait;
use serde_json::json;
use sovereign_bus::{Event, EventHandler, EventPublisher, HandlerResult, PublishOptions};
use sovereign_telemetry::log_bus_event;

use super::topics;

/// Turns new orders into payment requests.
pub struct OrdersHandler {
    publisher: Arc<dyn EventPublisher>,
}

impl OrdersHandler {
    pub fn new(publisher: Arc<dyn EventPublisher>) -> Self {
        Self { publisher }
    }
}

#[async_trait]
impl EventHandler for OrdersHandler {
    async fn handle(&self, event: Arc<Event>) -> HandlerResult {
        if event.event_type != topics::ORDER_CREATED {
            log_bus_event!(debug, "orders", "Order lifecycle event", event);
            return Ok(());
        }

        let order_id = event.payload["orderId"]
            .as_str()
            .context("order event without orderId")?;
        let amount = event.payload["amount"]
            .as_f64()
            .context("order event without amount")?;

        log_bus_event!(info, "orders", "Requesting payment", event, order_id, amount);
        self.publisher
            .publish(
                topics::PAYMENT_REQUESTED,
                json!({ "orderId": order_id, "amount": amount }),
                PublishOptions::new().caused_by(&event),
            )
            .await?;
        Ok(())
    }
}

/// Settles payment requests and reports completion.
pub struct PaymentsHandler {
    publisher: Arc<dyn EventPublisher>,
}

impl PaymentsHandler {
    pub fn new(publisher: Arc<dyn EventPublisher>) -> Self {
        Self { publisher }
    }
}

#[async_trait]
impl EventHandler for PaymentsHandler {
    async fn handle(&self, event: Arc<Event>) -> HandlerResult {
        let order_id = event.payload["orderId"].clone();
        let amount = event.payload["amount"].as_f64().unwrap_or_default();
        if amount.is_nan() || amount <= 0.0 {
            bail!("payment for order {order_id} rejected: amount {amount} must be positive");
        }

        let payment_id = format!("pi-{}", event.id);
        let completed = json!({
            "orderId": order_id,
            "paymentId": payment_id,
            "amount": amount,
        });

        self.publisher
            .publish(
                topics::PAYMENT_COMPLETED,
                completed.clone(),
                PublishOptions::new().caused_by(&event),
            )
            .await?;
        self.publisher
            .publish(
                topics::ORDER_PAID,
                completed,
                PublishOptions::new().caused_by(&event),
            )
            .await?;

        log_bus_event!(info, "payments", "Payment completed", event, payment_id = %payment_id);
        Ok(())
    }
}
