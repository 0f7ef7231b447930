//! # Sovereign Bus Benchmarks
//!
//! | Scenario | What is measured |
//! |----------|------------------|
//! | publish_fan_out | publish latency by number of exact subscribers |
//! | wildcard_resolution | publish latency with many registered patterns |
//! | replay | re-publishing a full event store |

use std::sync::Arc;
use std::time::Duration;

use criterion::{black_box, BatchSize, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use serde_json::json;
use sovereign_bus::{BusConfig, Event, EventBus, PublishOptions, ReplayCriteria, SubscriptionOptions};
use tokio::runtime::Runtime;

fn runtime() -> Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .expect("tokio runtime")
}

fn noop(bus: &EventBus, topic: &str) {
    bus.subscribe(
        topic,
        |event: Arc<Event>| async move {
            black_box(&event.payload);
            Ok::<(), anyhow::Error>(())
        },
        SubscriptionOptions::new(),
    );
}

fn bench_publish_fan_out(c: &mut Criterion) {
    let rt = runtime();
    let mut group = c.benchmark_group("publish_fan_out");
    group.measurement_time(Duration::from_secs(5));

    for subscribers in [1usize, 10, 100] {
        let bus = EventBus::new(BusConfig::default());
        for _ in 0..subscribers {
            noop(&bus, "commerce.order.created");
        }

        group.throughput(Throughput::Elements(subscribers as u64));
        group.bench_with_input(
            BenchmarkId::from_parameter(subscribers),
            &subscribers,
            |b, _| {
                b.iter(|| {
                    rt.block_on(bus.publish(
                        "commerce.order.created",
                        json!({"orderId": "ord-1", "amount": 12.5}),
                        PublishOptions::new(),
                    ))
                })
            },
        );
    }
    group.finish();
}

fn bench_wildcard_resolution(c: &mut Criterion) {
    let rt = runtime();
    let mut group = c.benchmark_group("wildcard_resolution");

    for patterns in [10usize, 100, 1000] {
        let bus = EventBus::new(BusConfig::default());
        for n in 0..patterns {
            noop(&bus, &format!("domain{n}.*"));
        }

        group.bench_with_input(BenchmarkId::from_parameter(patterns), &patterns, |b, _| {
            b.iter(|| rt.block_on(bus.publish("domain7.event", json!(null), PublishOptions::new())))
        });
    }
    group.finish();
}

fn bench_replay(c: &mut Criterion) {
    let rt = runtime();
    let mut group = c.benchmark_group("replay");
    group.sample_size(10);

    group.bench_function("replay_1000_events", |b| {
        b.iter_batched(
            || {
                let bus = EventBus::new(BusConfig::default());
                noop(&bus, "*");
                rt.block_on(async {
                    for n in 0..1000 {
                        let _ = bus.publish("t", json!({ "n": n }), PublishOptions::new()).await;
                    }
                });
                bus
            },
            |bus| rt.block_on(bus.replay_events(ReplayCriteria::all())),
            BatchSize::LargeInput,
        )
    });
    group.finish();
}

criterion_group!(
    benches,
    bench_publish_fan_out,
    bench_wildcard_resolution,
    bench_replay
);
criterion_main!(benches);
