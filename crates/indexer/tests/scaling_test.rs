//! End-to-end tests for active indexer autoscaling.
//!
//! The mock transport is given latency so bulk requests pile up: the free
//! buffer list drains, indexers wait, and the controller sees pressure on
//! its ticks. Assertions poll with generous timeouts; scaling actions are
//! tick-driven and inherently asynchronous.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;

use ship_indexer::test_utils::{item, items_response, ok_response, MockTransport};
use ship_indexer::{Config, Indexer, ScaleActionConfig, ScalingConfig, Stats};
use ship_model::{Batch, DataStream, Event};

fn single_event_batch() -> Batch {
    let mut batch = Batch::new();
    batch.push(Event::new(
        Utc::now(),
        DataStream::new("logs", "apm_server", "testing"),
    ));
    batch
}

async fn send_events(indexer: &Indexer, count: usize) {
    for _ in 0..count {
        indexer
            .process_batch(&single_event_batch())
            .await
            .expect("process_batch");
    }
}

fn scaling(up: (u32, Duration), down: (u32, Duration)) -> ScalingConfig {
    ScalingConfig {
        disabled: false,
        idle_interval: Duration::from_millis(50),
        scale_up: ScaleActionConfig {
            threshold: up.0,
            cool_down: up.1,
        },
        scale_down: ScaleActionConfig {
            threshold: down.0,
            cool_down: down.1,
        },
    }
}

/// Per-event flushes with visible transport latency: every event becomes
/// one bulk request and the buffer pool saturates under load.
fn per_event_flush_config(scaling: ScalingConfig) -> Config {
    Config::default()
        .with_flush_bytes(1)
        .with_flush_interval(Duration::from_millis(1))
        .with_cpu_count(12)
        .with_scaling(scaling)
}

async fn wait_for_indexers(indexer: &Indexer, target: u64, limit: u64, what: &str) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
    loop {
        let stats = indexer.stats();
        assert!(
            stats.indexers_active <= limit,
            "indexers_active {} exceeded limit {limit}",
            stats.indexers_active
        );
        if stats.indexers_active == target {
            return;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "timed out waiting for {what}; stats: {stats:?}"
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

async fn wait_for_bulk_requests(indexer: &Indexer, target: u64) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
    while indexer.stats().bulk_requests < target {
        assert!(
            tokio::time::Instant::now() < deadline,
            "timed out waiting for {target} bulk requests; stats: {:?}",
            indexer.stats()
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// Wait until every added event has a terminal outcome and all buffers
/// are back on the free list, so exact stats comparisons are stable.
async fn wait_for_drained(indexer: &Indexer) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
    loop {
        let stats = indexer.stats();
        if stats.active == 0 && stats.available_bulk_requests == 10 {
            return;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "timed out waiting for the pool to drain; stats: {stats:?}"
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn upscales_under_pressure_then_downscales_when_idle() {
    let transport = MockTransport::success().with_latency(Duration::from_millis(100));
    let indexer = Indexer::new(
        transport,
        per_event_flush_config(scaling(
            (1, Duration::from_nanos(1)),
            (2, Duration::from_millis(1)),
        )),
    )
    .unwrap();

    // 12 CPUs -> limit of 3 active indexers.
    send_events(&indexer, 20).await;
    wait_for_indexers(&indexer, 3, 3, "upscale to the active limit").await;
    wait_for_indexers(&indexer, 1, 3, "downscale once idle").await;
    wait_for_bulk_requests(&indexer, 20).await;
    wait_for_drained(&indexer).await;

    let mut stats = indexer.stats();
    stats.bytes_total = 0;
    assert_eq!(
        stats,
        Stats {
            added: 20,
            indexed: 20,
            bulk_requests: 20,
            indexers_created: 2,
            indexers_destroyed: 2,
            indexers_active: 1,
            available_bulk_requests: 10,
            ..Stats::default()
        }
    );

    indexer.close().await.unwrap();
    assert_eq!(indexer.stats().indexers_active, 0);
    // Stops performed by close are not scaling actions.
    assert_eq!(indexer.stats().indexers_destroyed, 2);
}

#[tokio::test(flavor = "multi_thread")]
async fn cpu_count_change_overrides_downscale_cooldown() {
    let transport = MockTransport::success().with_latency(Duration::from_millis(100));
    let indexer = Indexer::new(
        transport,
        // A one-hour downscale cooldown: only the active limit breach
        // may shrink the pool within this test.
        per_event_flush_config(scaling(
            (2, Duration::from_nanos(1)),
            (100, Duration::from_secs(3600)),
        )),
    )
    .unwrap();

    send_events(&indexer, 40).await;
    wait_for_indexers(&indexer, 3, 3, "upscale to the active limit").await;

    // Shrink the CPU budget: limit drops to 1 and the breach is
    // corrected immediately, cooldown notwithstanding.
    indexer.set_cpu_count(4);
    wait_for_indexers(&indexer, 1, 3, "forced downscale to the new limit").await;
    wait_for_bulk_requests(&indexer, 40).await;
    wait_for_drained(&indexer).await;

    let mut stats = indexer.stats();
    stats.bytes_total = 0;
    assert_eq!(
        stats,
        Stats {
            added: 40,
            indexed: 40,
            bulk_requests: 40,
            indexers_created: 2,
            indexers_destroyed: 2,
            indexers_active: 1,
            available_bulk_requests: 10,
            ..Stats::default()
        }
    );

    indexer.close().await.unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn upscale_cooldown_limits_growth() {
    let transport = MockTransport::success().with_latency(Duration::from_millis(100));
    let indexer = Indexer::new(
        transport,
        per_event_flush_config(scaling(
            (1, Duration::from_secs(3600)),
            (100, Duration::from_secs(3600)),
        )),
    )
    .unwrap();

    // Sustained pressure, but the cooldown allows a single upscale.
    send_events(&indexer, 40).await;
    wait_for_indexers(&indexer, 2, 3, "a single upscale").await;
    wait_for_bulk_requests(&indexer, 40).await;

    // No further growth happens while the cooldown holds.
    tokio::time::sleep(Duration::from_millis(200)).await;
    let stats = indexer.stats();
    assert_eq!(stats.indexers_active, 2);
    assert_eq!(stats.indexers_created, 1);
    assert_eq!(stats.indexers_destroyed, 0);

    indexer.close().await.unwrap();
    let stats = indexer.stats();
    assert_eq!(stats.indexers_active, 0);
    assert_eq!(stats.indexers_destroyed, 0);
}

#[tokio::test(flavor = "multi_thread")]
async fn throttling_downscales_then_recovery_upscales() {
    let throttling = Arc::new(AtomicBool::new(false));
    let throttling_in_handler = Arc::clone(&throttling);
    let transport = MockTransport::new(move |payload| {
        if throttling_in_handler.load(Ordering::Relaxed) {
            items_response(
                payload
                    .docs
                    .iter()
                    .map(|_| item(429, Some(("circuit_breaking_exception", "too much load"))))
                    .collect(),
            )
        } else {
            ok_response(payload)
        }
    })
    .with_latency(Duration::from_millis(50));
    let indexer = Indexer::new(
        transport,
        per_event_flush_config(scaling(
            (1, Duration::from_nanos(1)),
            (100, Duration::from_millis(100)),
        )),
    )
    .unwrap();

    // Healthy downstream: pressure scales the pool to the limit.
    send_events(&indexer, 20).await;
    wait_for_indexers(&indexer, 3, 3, "initial upscale").await;
    wait_for_bulk_requests(&indexer, 20).await;

    // Downstream starts throttling: every item comes back 429 and the
    // pool sheds indexers one tick at a time, cooldown ignored.
    throttling.store(true, Ordering::Relaxed);
    send_events(&indexer, 5).await;
    wait_for_indexers(&indexer, 1, 3, "throttle-driven downscale").await;
    wait_for_bulk_requests(&indexer, 25).await;

    // Recovery: successful traffic washes the 429 rate out of the window
    // and pressure grows the pool back to the limit.
    throttling.store(false, Ordering::Relaxed);
    send_events(&indexer, 600).await;
    wait_for_indexers(&indexer, 3, 3, "post-recovery upscale").await;
    wait_for_bulk_requests(&indexer, 625).await;
    wait_for_drained(&indexer).await;

    let stats = indexer.stats();
    assert_eq!(stats.indexers_active, 3);
    assert_eq!(stats.indexers_created, 4);
    assert_eq!(stats.indexers_destroyed, 2);
    assert_eq!(stats.too_many_requests, 5);
    assert_eq!(stats.failed, 5);
    assert_eq!(stats.indexed, 620);

    indexer.close().await.unwrap();
    let stats = indexer.stats();
    assert_eq!(stats.indexers_active, 0);
    assert_eq!(stats.added, stats.indexed + stats.failed);
}

#[tokio::test(flavor = "multi_thread")]
async fn scaling_disabled_keeps_one_indexer() {
    let transport = MockTransport::success().with_latency(Duration::from_millis(20));
    let indexer = Indexer::new(
        transport,
        Config::default()
            .with_flush_bytes(1)
            .with_flush_interval(Duration::from_millis(1))
            .with_cpu_count(12)
            .with_scaling(ScalingConfig {
                disabled: true,
                ..ScalingConfig::default()
            }),
    )
    .unwrap();

    send_events(&indexer, 30).await;
    wait_for_bulk_requests(&indexer, 30).await;

    let stats = indexer.stats();
    assert_eq!(stats.indexers_active, 1);
    assert_eq!(stats.indexers_created, 0);
    assert_eq!(stats.indexers_destroyed, 0);

    indexer.close().await.unwrap();
    assert_eq!(indexer.stats().indexers_active, 0);
}
