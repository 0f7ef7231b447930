//! # Domain Subscribers
//!
//! Stand-ins for the commerce domains that talk to each other only through
//! the bus.
//!
//! ```text
//! commerce.order.created ──→ orders ──→ payments.pi.requested
//!                                               │
//!                                          payments
//!                                               │
//!                 commerce.order.paid ←─────────┴──────→ payments.pi.completed
//!                                                               │
//!                                                        notifications
//!
//! analytics observes every topic ("*")
//! ```

pub mod commerce;
pub mod observers;

pub use commerce::{OrdersHandler, PaymentsHandler};
pub use observers::{AnalyticsHandler, NotificationsHandler};

/// Topics published and consumed by the domain subscribers.
pub mod topics {
    pub const ORDER_CREATED: &str = "commerce.order.created";
    pub const ORDER_PAID: &str = "commerce.order.paid";
    pub const ORDER_EVENTS: &str = "commerce.order.*";
    pub const PAYMENT_REQUESTED: &str = "payments.pi.requested";
    pub const PAYMENT_COMPLETED: &str = "payments.pi.completed";
    pub const COMPLETIONS: &str = "*.completed";
    pub const EVERYTHING: &str = "*";
}
