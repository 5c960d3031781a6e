//! Scaling controller
//!
//! A periodic control loop that grows the active indexer set under
//! pressure and shrinks it when idle or when the downstream store is
//! throttling. The indexer count is bounded by `max(1, cpus / 4)`: each
//! active indexer can saturate a fraction of a core on compression, and
//! that bound overrides every cooldown.

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::time::MissedTickBehavior;

use crate::config::ScalingConfig;
use crate::pool::PoolInner;

/// Recent 429 rate above which one indexer is shed per tick.
const THROTTLE_RATE_LIMIT: f64 = 0.01;

// =============================================================================
// Decision logic
// =============================================================================

/// Mutable controller state carried between ticks.
#[derive(Debug, Default)]
pub(crate) struct ScalingState {
    up_ticks: u32,
    down_ticks: u32,
    last_up: Option<Instant>,
    last_down: Option<Instant>,
}

/// One tick's observation of the pool.
#[derive(Debug, Clone, Copy)]
pub(crate) struct TickSample {
    /// Indexers started and not yet signaled to stop.
    pub(crate) active: u64,
    /// `max(1, cpus / 4)`.
    pub(crate) limit: u64,
    /// Inbox had pending items, or an indexer waited for a free buffer
    /// since the previous tick.
    pub(crate) pressure: bool,
    /// Recent fraction of items rejected with 429.
    pub(crate) throttle_rate: f64,
}

#[derive(Debug, PartialEq, Eq)]
pub(crate) enum Decision {
    None,
    ScaleUp,
    ScaleDown(u64),
}

/// Pure per-tick decision. Cooldowns gate ordinary scaling; breaching the
/// active limit and downstream throttling both override the scale-down
/// cooldown.
pub(crate) fn decide(
    state: &mut ScalingState,
    sample: &TickSample,
    now: Instant,
    config: &ScalingConfig,
) -> Decision {
    if sample.active > sample.limit {
        state.down_ticks = 0;
        state.last_down = Some(now);
        return Decision::ScaleDown(sample.active - sample.limit);
    }

    if sample.throttle_rate > THROTTLE_RATE_LIMIT {
        state.up_ticks = 0;
        state.down_ticks = 0;
        if sample.active > 1 {
            state.last_down = Some(now);
            return Decision::ScaleDown(1);
        }
        return Decision::None;
    }

    if sample.pressure {
        state.down_ticks = 0;
        if sample.active >= sample.limit {
            return Decision::None;
        }
        state.up_ticks += 1;
        if state.up_ticks >= config.scale_up.threshold
            && cooled(state.last_up, config.scale_up.cool_down, now)
        {
            state.up_ticks = 0;
            state.last_up = Some(now);
            return Decision::ScaleUp;
        }
        Decision::None
    } else {
        state.up_ticks = 0;
        state.down_ticks += 1;
        if state.down_ticks >= config.scale_down.threshold
            && sample.active > 1
            && cooled(state.last_down, config.scale_down.cool_down, now)
        {
            state.down_ticks = 0;
            state.last_down = Some(now);
            return Decision::ScaleDown(1);
        }
        Decision::None
    }
}

fn cooled(last: Option<Instant>, cool_down: Duration, now: Instant) -> bool {
    match last {
        None => true,
        Some(at) => now.duration_since(at) >= cool_down,
    }
}

// =============================================================================
// Controller task
// =============================================================================

pub(crate) struct ScalingController {
    inner: Arc<PoolInner>,
}

impl ScalingController {
    pub(crate) fn spawn(inner: Arc<PoolInner>) {
        let guard = inner.task_guard();
        let controller = Self { inner };
        tokio::spawn(async move {
            let _guard = guard;
            controller.run().await;
        });
    }

    async fn run(self) {
        let config = self.inner.config.scaling;
        let mut shutdown = self.inner.shutdown_tx.subscribe();
        let mut ticker = tokio::time::interval_at(
            tokio::time::Instant::now() + config.idle_interval,
            config.idle_interval,
        );
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        let mut state = ScalingState::default();
        loop {
            tokio::select! {
                _ = shutdown.wait_for(|closed| *closed) => break,
                _ = ticker.tick() => {}
            }
            self.tick(&mut state, &config);
        }
        tracing::debug!("scaling controller stopped");
    }

    fn tick(&self, state: &mut ScalingState, config: &ScalingConfig) {
        // Drain the wait counter unconditionally so one burst of waits
        // signals exactly one tick.
        let waited = self.inner.buffer_waits.swap(0, Ordering::Relaxed) > 0;
        let sample = TickSample {
            active: self.inner.worker_count(),
            limit: self.inner.active_limit(),
            pressure: waited || !self.inner.items_rx.is_empty(),
            throttle_rate: self.inner.sample_throttle_rate(),
        };

        match decide(state, &sample, Instant::now(), config) {
            Decision::None => {}
            Decision::ScaleUp => {
                tracing::info!(active = sample.active, "scaling up active indexers");
                self.inner.spawn_worker(true);
            }
            Decision::ScaleDown(count) => {
                tracing::info!(
                    active = sample.active,
                    count,
                    throttle_rate = sample.throttle_rate,
                    "scaling down active indexers"
                );
                for _ in 0..count {
                    if !self.inner.stop_worker() {
                        break;
                    }
                }
            }
        }
    }
}

#[cfg(test)]
#[path = "scaling_test.rs"]
mod scaling_test;
