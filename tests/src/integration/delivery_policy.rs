//! # Delivery Policy Scenarios
//!
//! Retry budgets, exponential backoff, per-subscriber circuit breaking and
//! the dead-letter lifecycle, observed through the public bus API.

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use serde_json::json;
    use sovereign_bus::{
        BusConfig, CircuitState, Event, EventBus, PublishOptions, SubscriptionOptions,
    };

    use crate::integration::fixtures::{config, Recorder};

    // =========================================================================
    // RETRY AND BACKOFF
    // =========================================================================

    #[tokio::test(start_paused = true)]
    async fn test_always_failing_handler_invoked_max_retries_times() {
        let bus = EventBus::new(config());
        let recorder = Recorder::broken();
        bus.subscribe("inventory.reserve", recorder.handler(), SubscriptionOptions::new());

        let result = bus
            .publish("inventory.reserve", json!({"sku": "PI-01"}), PublishOptions::new())
            .await
            .unwrap();

        assert!(result.success);
        assert_eq!(result.delivered_to, 0);
        assert_eq!(result.failures, 1);
        assert_eq!(recorder.calls(), 3);
        assert_eq!(
            recorder.gaps(),
            vec![Duration::from_millis(1000), Duration::from_millis(2000)]
        );
        assert_eq!(bus.dead_letter_queue().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_backoff_with_larger_budget() {
        let bus = EventBus::new(BusConfig {
            max_retries: 5,
            retry_delay_ms: 50,
            circuit_breaker_threshold: 100,
            ..BusConfig::default()
        });
        let recorder = Recorder::broken();
        bus.subscribe("t", recorder.handler(), SubscriptionOptions::new());

        bus.publish("t", json!({}), PublishOptions::new()).await.unwrap();

        let expected: Vec<Duration> = [50, 100, 200, 400]
            .into_iter()
            .map(Duration::from_millis)
            .collect();
        assert_eq!(recorder.gaps(), expected);
    }

    #[tokio::test(start_paused = true)]
    async fn test_flaky_handler_recovers_within_budget() {
        let bus = EventBus::new(config());
        let recorder = Recorder::flaky(2);
        let id = bus.subscribe("t", recorder.handler(), SubscriptionOptions::new());

        let result = bus.publish("t", json!({}), PublishOptions::new()).await.unwrap();

        assert_eq!(result.delivered_to, 1);
        assert_eq!(result.failures, 0);
        assert_eq!(recorder.calls(), 3);
        assert!(bus.dead_letter_queue().is_empty());

        let stats = bus.subscription(id).unwrap().stats;
        assert_eq!((stats.received, stats.processed, stats.failed), (1, 1, 2));
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_retry_means_one_invocation_and_one_dead_letter_per_publish() {
        let bus = EventBus::new(config());
        let recorder = Recorder::broken();
        bus.subscribe(
            "t",
            recorder.handler(),
            SubscriptionOptions::new().retry_on_failure(false),
        );

        for _ in 0..2 {
            let result = bus.publish("t", json!({}), PublishOptions::new()).await.unwrap();
            assert_eq!(result.failures, 1);
        }

        assert_eq!(recorder.calls(), 2);
        assert_eq!(bus.dead_letter_queue().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhaustion_without_dead_letters() {
        let bus = EventBus::new(BusConfig {
            dead_letter_enabled: false,
            ..config()
        });
        let recorder = Recorder::broken();
        bus.subscribe("t", recorder.handler(), SubscriptionOptions::new());

        let result = bus.publish("t", json!({}), PublishOptions::new()).await.unwrap();

        assert_eq!(result.failures, 1);
        assert!(bus.dead_letter_queue().is_empty());
        assert_eq!(bus.stats().dead_letter_size, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failing_subscriber_does_not_affect_siblings() {
        let bus = EventBus::new(config());
        let broken = Recorder::broken();
        let healthy = Recorder::healthy();
        bus.subscribe("t", broken.handler(), SubscriptionOptions::new().priority(9));
        bus.subscribe("t", healthy.handler(), SubscriptionOptions::new());

        let result = bus.publish("t", json!({}), PublishOptions::new()).await.unwrap();

        assert_eq!(result.delivered_to, 1);
        assert_eq!(result.failures, 1);
        assert_eq!(healthy.calls(), 1);
        assert_eq!(broken.calls(), 3);
    }

    // =========================================================================
    // CIRCUIT BREAKER
    // =========================================================================

    #[tokio::test(start_paused = true)]
    async fn test_circuit_opens_after_threshold_and_half_opens_after_timeout() {
        let bus = EventBus::new(BusConfig {
            max_retries: 1,
            ..config()
        });
        let recorder = Recorder::broken();
        let id = bus.subscribe("t", recorder.handler(), SubscriptionOptions::new());

        for _ in 0..5 {
            bus.publish("t", json!({}), PublishOptions::new()).await.unwrap();
        }
        let breaker = bus.circuit_breaker(id).unwrap();
        assert_eq!(breaker.state, CircuitState::Open);
        assert_eq!(breaker.failures, 5);
        assert!(breaker.opened_at.is_some());

        // Open: fail fast without invoking the handler or dead-lettering.
        let rejected = bus.publish("t", json!({}), PublishOptions::new()).await.unwrap();
        assert_eq!(rejected.failures, 1);
        assert_eq!(recorder.calls(), 5);
        assert_eq!(bus.dead_letter_queue().len(), 5);

        // Still open just before the cooldown ends.
        tokio::time::advance(Duration::from_millis(59_999)).await;
        bus.publish("t", json!({}), PublishOptions::new()).await.unwrap();
        assert_eq!(recorder.calls(), 5);

        // Cooldown elapsed: the next attempt goes through despite 5 failures.
        tokio::time::advance(Duration::from_millis(1)).await;
        recorder.heal();
        let half_open_result = bus.publish("t", json!({}), PublishOptions::new()).await.unwrap();
        assert_eq!(half_open_result.delivered_to, 1);
        assert_eq!(recorder.calls(), 6);

        // One success decrements the count; the breaker stays half-open.
        let breaker = bus.circuit_breaker(id).unwrap();
        assert_eq!(breaker.state, CircuitState::HalfOpen);
        assert_eq!(breaker.failures, 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_half_open_closes_once_failures_decay() {
        let bus = EventBus::new(BusConfig {
            max_retries: 1,
            circuit_breaker_threshold: 2,
            circuit_breaker_timeout_ms: 1000,
            ..config()
        });
        let recorder = Recorder::flaky(2);
        let id = bus.subscribe("t", recorder.handler(), SubscriptionOptions::new());

        bus.publish("t", json!({}), PublishOptions::new()).await.unwrap();
        bus.publish("t", json!({}), PublishOptions::new()).await.unwrap();
        assert_eq!(bus.circuit_breaker(id).unwrap().state, CircuitState::Open);

        tokio::time::advance(Duration::from_secs(1)).await;
        bus.publish("t", json!({}), PublishOptions::new()).await.unwrap();
        bus.publish("t", json!({}), PublishOptions::new()).await.unwrap();

        assert_eq!(bus.circuit_breaker(id).unwrap().state, CircuitState::Closed);
        assert_eq!(bus.stats().circuit_breakers.closed, 1);
        assert_eq!(bus.stats().circuit_breakers.half_open, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_breakers_are_per_subscriber() {
        let bus = EventBus::new(BusConfig {
            max_retries: 1,
            circuit_breaker_threshold: 1,
            ..config()
        });
        let broken = Recorder::broken();
        let healthy = Recorder::healthy();
        let broken_id = bus.subscribe("t", broken.handler(), SubscriptionOptions::new());
        let healthy_id = bus.subscribe("t", healthy.handler(), SubscriptionOptions::new());

        bus.publish("t", json!({}), PublishOptions::new()).await.unwrap();
        bus.publish("t", json!({}), PublishOptions::new()).await.unwrap();

        assert_eq!(bus.circuit_breaker(broken_id).unwrap().state, CircuitState::Open);
        let healthy_breaker = bus.circuit_breaker(healthy_id).unwrap();
        assert_eq!(healthy_breaker.state, CircuitState::Closed);
        assert_eq!(healthy_breaker.failures, 0);
        assert_eq!(broken.calls(), 1);
        assert_eq!(healthy.calls(), 2);
    }

    // =========================================================================
    // DEAD LETTER QUEUE
    // =========================================================================

    #[tokio::test(start_paused = true)]
    async fn test_dead_letter_entry_contents() {
        let bus = EventBus::new(config());
        let recorder = Recorder::broken();
        let id = bus.subscribe("payments.*", recorder.handler(), SubscriptionOptions::new());

        let result = bus
            .publish(
                "payments.pi.requested",
                json!({"orderId": "ord-9"}),
                PublishOptions::new().correlation_id("checkout-9"),
            )
            .await
            .unwrap();

        let entry = &bus.dead_letter_queue()[0];
        assert_eq!(entry.event.id, result.event_id);
        assert_eq!(entry.subscriber.id, id);
        assert_eq!(entry.subscriber.event_type, "payments.*");
        assert_eq!(entry.error.message, "downstream unavailable");
        assert!(entry.failed_at >= entry.event.timestamp);
    }

    #[tokio::test(start_paused = true)]
    async fn test_dead_letter_retry_round_trip() {
        let bus = EventBus::new(BusConfig {
            circuit_breaker_threshold: 100,
            ..config()
        });
        let recorder = Recorder::broken();
        bus.subscribe("t", recorder.handler(), SubscriptionOptions::new());
        bus.publish("t", json!({"n": 1}), PublishOptions::new().correlation_id("c-1"))
            .await
            .unwrap();
        bus.publish("t", json!({"n": 2}), PublishOptions::new().correlation_id("c-2"))
            .await
            .unwrap();
        assert_eq!(bus.dead_letter_queue().len(), 2);

        // Still failing: the queue is left exactly as it was.
        let before = bus.dead_letter_queue();
        let failed = bus.retry_dead_letter(1).await;
        assert!(!failed.success);
        assert!(failed.event_id.is_some());
        assert_eq!(bus.dead_letter_queue(), before);
        assert_eq!(recorder.calls(), 9);

        // Recovered: exactly the retried entry is removed.
        recorder.heal();
        let retried = bus.retry_dead_letter(1).await;
        assert!(retried.success);
        let remaining: Vec<String> = bus
            .dead_letter_queue()
            .iter()
            .map(|e| e.event.correlation_id.clone())
            .collect();
        assert_eq!(remaining, vec!["c-1".to_string()]);

        let last = recorder.events().pop().unwrap();
        assert_eq!(last.correlation_id, "c-2_retry");
        assert!(last.is_retried());
        assert_eq!(last.payload, json!({"n": 2}));
    }

    #[tokio::test]
    async fn test_clear_dead_letter_queue() {
        let bus = EventBus::new(BusConfig {
            max_retries: 1,
            ..config()
        });
        let recorder = Recorder::broken();
        bus.subscribe("t", recorder.handler(), SubscriptionOptions::new());
        bus.publish("t", json!({}), PublishOptions::new()).await.unwrap();

        assert_eq!(bus.clear_dead_letter_queue(), 1);
        assert!(bus.dead_letter_queue().is_empty());
        assert!(!bus.retry_dead_letter(0).await.success);
    }

    #[tokio::test]
    async fn test_dead_letter_queue_bounded() {
        let bus = EventBus::new(BusConfig {
            max_retries: 1,
            circuit_breaker_threshold: 1000,
            dead_letter_capacity: 3,
            ..config()
        });
        let recorder = Recorder::broken();
        bus.subscribe("t", recorder.handler(), SubscriptionOptions::new());

        for n in 0..5 {
            bus.publish("t", json!({ "n": n }), PublishOptions::new()).await.unwrap();
        }

        let payloads: Vec<_> = bus
            .dead_letter_queue()
            .iter()
            .map(|e| e.event.payload["n"].clone())
            .collect();
        assert_eq!(payloads, vec![json!(2), json!(3), json!(4)]);
    }

    // =========================================================================
    // FILTER AND TRANSFORM
    // =========================================================================

    #[tokio::test]
    async fn test_filter_and_transform_leave_store_untouched() {
        let bus = EventBus::new(config());
        let recorder = Recorder::healthy();
        bus.subscribe(
            "commerce.order.created",
            recorder.handler(),
            SubscriptionOptions::new()
                .filter(|event: &Event| event.payload["amount"].as_f64().unwrap_or(0.0) >= 10.0)
                .transform(|event: &Event| {
                    let mut redacted = event.clone();
                    redacted.payload["customer"] = json!("<redacted>");
                    redacted
                }),
        );

        let small = bus
            .publish(
                "commerce.order.created",
                json!({"amount": 1.0, "customer": "alice"}),
                PublishOptions::new(),
            )
            .await
            .unwrap();
        let large = bus
            .publish(
                "commerce.order.created",
                json!({"amount": 25.0, "customer": "bob"}),
                PublishOptions::new(),
            )
            .await
            .unwrap();

        assert_eq!((small.delivered_to, small.skipped), (1, 1));
        assert_eq!((large.delivered_to, large.skipped), (1, 0));
        assert_eq!(recorder.calls(), 1);
        assert_eq!(recorder.events()[0].payload["customer"], json!("<redacted>"));

        let stored = bus.events(&sovereign_bus::ReplayCriteria::all());
        assert_eq!(stored[1].payload["customer"], json!("bob"));
    }
}
