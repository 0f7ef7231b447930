//! # Commerce Flow Scenarios
//!
//! Topic resolution order, concurrent fan-out and the runtime's domain
//! subscribers working together through one bus.

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use bus_runtime::handlers::topics;
    use bus_runtime::BusRuntime;
    use parking_lot::Mutex;
    use serde_json::json;
    use sovereign_bus::{BusConfig, Event, EventBus, PublishOptions, SubscriptionOptions};
    use tokio::time::Instant;

    use crate::integration::fixtures::{config, Recorder};

    /// Handler appending `label` to a shared log.
    fn labelled(log: &Arc<Mutex<Vec<&'static str>>>, label: &'static str) -> impl sovereign_bus::EventHandler + 'static {
        let log = Arc::clone(log);
        move |_event: Arc<Event>| {
            let log = Arc::clone(&log);
            async move {
                log.lock().push(label);
                Ok::<(), anyhow::Error>(())
            }
        }
    }

    // =========================================================================
    // TOPIC RESOLUTION
    // =========================================================================

    #[tokio::test]
    async fn test_exact_match_delivered_before_wildcard() {
        let bus = EventBus::new(config());
        let log = Arc::new(Mutex::new(Vec::new()));
        bus.subscribe("order.*", labelled(&log, "wildcard"), SubscriptionOptions::new().priority(5));
        bus.subscribe("order.created", labelled(&log, "exact"), SubscriptionOptions::new().priority(10));

        let result = bus
            .publish("order.created", json!({}), PublishOptions::new())
            .await
            .unwrap();

        assert_eq!(result.delivered_to, 2);
        assert_eq!(*log.lock(), vec!["exact", "wildcard"]);
    }

    #[tokio::test]
    async fn test_wildcard_priority_does_not_overtake_exact() {
        let bus = EventBus::new(config());
        let log = Arc::new(Mutex::new(Vec::new()));
        bus.subscribe("order.*", labelled(&log, "wildcard"), SubscriptionOptions::new().priority(100));
        bus.subscribe("order.created", labelled(&log, "exact-low"), SubscriptionOptions::new().priority(1));
        bus.subscribe("order.created", labelled(&log, "exact-high"), SubscriptionOptions::new().priority(7));

        bus.publish("order.created", json!({}), PublishOptions::new())
            .await
            .unwrap();

        assert_eq!(*log.lock(), vec!["exact-high", "exact-low", "wildcard"]);
    }

    #[tokio::test]
    async fn test_pattern_matching_rules() {
        let bus = EventBus::new(config());
        let orders = Recorder::healthy();
        let middle = Recorder::healthy();
        bus.subscribe("commerce.order.*", orders.handler(), SubscriptionOptions::new());
        bus.subscribe("commerce.*.created", middle.handler(), SubscriptionOptions::new());

        for topic in [
            "commerce.order.created",
            "commerce.order.line.added",
            "commerce.cart.created",
            "commerce.orders.created",
            "xcommerce.order.created",
        ] {
            bus.publish(topic, json!({}), PublishOptions::new()).await.unwrap();
        }

        let seen = |recorder: &Recorder| -> Vec<String> {
            recorder.events().iter().map(|e| e.event_type.clone()).collect()
        };
        assert_eq!(
            seen(&orders),
            vec!["commerce.order.created", "commerce.order.line.added"]
        );
        assert_eq!(
            seen(&middle),
            vec![
                "commerce.order.created",
                "commerce.cart.created",
                "commerce.orders.created"
            ]
        );
    }

    #[tokio::test]
    async fn test_overlapping_patterns_each_delivered_once() {
        let bus = EventBus::new(config());
        let all = Recorder::healthy();
        let orders = Recorder::healthy();
        bus.subscribe("*", all.handler(), SubscriptionOptions::new());
        bus.subscribe("order.*", orders.handler(), SubscriptionOptions::new());

        let result = bus
            .publish("order.created", json!({}), PublishOptions::new())
            .await
            .unwrap();

        assert_eq!(result.delivered_to, 2);
        assert_eq!(all.calls(), 1);
        assert_eq!(orders.calls(), 1);
    }

    // =========================================================================
    // CONCURRENCY
    // =========================================================================

    #[tokio::test(start_paused = true)]
    async fn test_fan_out_runs_subscribers_concurrently() {
        let bus = EventBus::new(config());
        for _ in 0..3 {
            bus.subscribe(
                "slow",
                |_event: Arc<Event>| async {
                    tokio::time::sleep(Duration::from_secs(1)).await;
                    Ok::<(), anyhow::Error>(())
                },
                SubscriptionOptions::new(),
            );
        }

        let started = Instant::now();
        let result = bus.publish("slow", json!({}), PublishOptions::new()).await.unwrap();

        assert_eq!(result.delivered_to, 3);
        assert_eq!(started.elapsed(), Duration::from_secs(1));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_publishers() {
        let bus = Arc::new(EventBus::new(config()));
        let recorder = Recorder::healthy();
        bus.subscribe("load.*", recorder.handler(), SubscriptionOptions::new());

        let tasks: Vec<_> = (0..8)
            .map(|worker| {
                let bus = Arc::clone(&bus);
                tokio::spawn(async move {
                    for n in 0..25 {
                        bus.publish(
                            &format!("load.worker{worker}"),
                            json!({ "n": n }),
                            PublishOptions::new(),
                        )
                        .await
                        .unwrap();
                    }
                })
            })
            .collect();
        for result in futures::future::join_all(tasks).await {
            result.unwrap();
        }

        assert_eq!(recorder.calls(), 200);
        let stats = bus.stats();
        assert_eq!(stats.event_store_size, 200);
        assert_eq!(stats.topic_metrics.len(), 8);
        assert!(stats.topic_metrics.values().all(|m| m.published == 25 && m.delivered == 25));
    }

    // =========================================================================
    // RUNTIME SUBSCRIBERS
    // =========================================================================

    fn runtime() -> BusRuntime {
        let runtime = BusRuntime::new(BusConfig {
            retry_delay_ms: 100,
            ..BusConfig::default()
        });
        runtime.start().unwrap();
        runtime
    }

    #[tokio::test]
    async fn test_checkout_choreography() {
        let runtime = runtime();
        let bus = runtime.bus();

        let order = bus
            .publish(
                topics::ORDER_CREATED,
                json!({"orderId": "ord-77", "amount": 40.0}),
                PublishOptions::new().correlation_id("checkout-77"),
            )
            .await
            .unwrap();
        assert_eq!(order.failures, 0);

        let chain = bus.correlation("checkout-77").unwrap();
        let steps: Vec<&str> = chain.events.iter().map(|e| e.event_type.as_str()).collect();
        assert_eq!(
            steps,
            vec![
                topics::ORDER_CREATED,
                topics::PAYMENT_REQUESTED,
                topics::PAYMENT_COMPLETED,
                topics::ORDER_PAID
            ]
        );

        let stored = bus.events(&sovereign_bus::ReplayCriteria::all().correlation_id("checkout-77"));
        let request = stored
            .iter()
            .find(|e| e.event_type == topics::PAYMENT_REQUESTED)
            .unwrap();
        assert_eq!(request.causation_id, Some(order.event_id.to_string()));

        assert_eq!(runtime.notifications().sent(), 1);
        assert_eq!(runtime.analytics().counts().values().sum::<u64>(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rejected_payment_then_manual_retry() {
        let runtime = runtime();
        let bus = runtime.bus();

        bus.publish(
            topics::ORDER_CREATED,
            json!({"orderId": "ord-0", "amount": 0.0}),
            PublishOptions::new().correlation_id("checkout-0"),
        )
        .await
        .unwrap();

        let dead_letters = bus.dead_letter_queue();
        assert_eq!(dead_letters.len(), 1);
        assert_eq!(dead_letters[0].event.event_type, topics::PAYMENT_REQUESTED);
        assert!(dead_letters[0].error.message.contains("must be positive"));

        // The payload itself is bad, so a manual retry fails again.
        let retry = bus.retry_dead_letter(0).await;
        assert!(!retry.success);
        assert_eq!(bus.dead_letter_queue(), dead_letters);
        assert_eq!(runtime.notifications().sent(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_demo_then_shutdown() {
        let runtime = runtime();

        let stats = runtime.run_demo().await.unwrap();
        assert_eq!(stats.total_subscribers, 4);
        assert_eq!(stats.dead_letter_size, 1);

        runtime.shutdown().await;
        let bus = runtime.bus();
        assert_eq!(bus.stats().total_subscribers, 0);
        assert!(bus
            .publish("t", json!({}), PublishOptions::new())
            .await
            .is_err());
    }
}
