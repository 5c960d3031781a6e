//! Tests for the scaling decision logic

use std::time::{Duration, Instant};

use super::{decide, Decision, ScalingState, TickSample};
use crate::config::{ScaleActionConfig, ScalingConfig};

fn config(up: (u32, Duration), down: (u32, Duration)) -> ScalingConfig {
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

fn sample(active: u64, limit: u64, pressure: bool) -> TickSample {
    TickSample {
        active,
        limit,
        pressure,
        throttle_rate: 0.0,
    }
}

#[test]
fn test_upscale_after_threshold_pressured_ticks() {
    let config = config((3, Duration::ZERO), (10, Duration::ZERO));
    let mut state = ScalingState::default();
    let now = Instant::now();

    assert_eq!(decide(&mut state, &sample(1, 4, true), now, &config), Decision::None);
    assert_eq!(decide(&mut state, &sample(1, 4, true), now, &config), Decision::None);
    assert_eq!(
        decide(&mut state, &sample(1, 4, true), now, &config),
        Decision::ScaleUp
    );
    // Counter resets after acting.
    assert_eq!(decide(&mut state, &sample(2, 4, true), now, &config), Decision::None);
}

#[test]
fn test_upscale_respects_cooldown() {
    let config = config((1, Duration::from_secs(60)), (10, Duration::ZERO));
    let mut state = ScalingState::default();
    let start = Instant::now();

    assert_eq!(
        decide(&mut state, &sample(1, 4, true), start, &config),
        Decision::ScaleUp
    );
    assert_eq!(
        decide(&mut state, &sample(2, 4, true), start + Duration::from_secs(1), &config),
        Decision::None
    );
    assert_eq!(
        decide(&mut state, &sample(2, 4, true), start + Duration::from_secs(61), &config),
        Decision::ScaleUp
    );
}

#[test]
fn test_no_upscale_at_limit() {
    let config = config((1, Duration::ZERO), (10, Duration::ZERO));
    let mut state = ScalingState::default();
    let now = Instant::now();

    assert_eq!(decide(&mut state, &sample(4, 4, true), now, &config), Decision::None);
}

#[test]
fn test_idle_ticks_scale_down() {
    let config = config((1, Duration::ZERO), (2, Duration::ZERO));
    let mut state = ScalingState::default();
    let now = Instant::now();

    assert_eq!(decide(&mut state, &sample(3, 4, false), now, &config), Decision::None);
    assert_eq!(
        decide(&mut state, &sample(3, 4, false), now, &config),
        Decision::ScaleDown(1)
    );
}

#[test]
fn test_never_scales_below_one() {
    let config = config((1, Duration::ZERO), (1, Duration::ZERO));
    let mut state = ScalingState::default();
    let now = Instant::now();

    assert_eq!(decide(&mut state, &sample(1, 4, false), now, &config), Decision::None);
}

#[test]
fn test_pressure_resets_idle_streak() {
    let config = config((10, Duration::ZERO), (2, Duration::ZERO));
    let mut state = ScalingState::default();
    let now = Instant::now();

    assert_eq!(decide(&mut state, &sample(2, 4, false), now, &config), Decision::None);
    assert_eq!(decide(&mut state, &sample(2, 4, true), now, &config), Decision::None);
    // The idle streak restarted, so one more idle tick is not enough.
    assert_eq!(decide(&mut state, &sample(2, 4, false), now, &config), Decision::None);
    assert_eq!(
        decide(&mut state, &sample(2, 4, false), now, &config),
        Decision::ScaleDown(1)
    );
}

#[test]
fn test_active_limit_breach_ignores_cooldown() {
    let config = config((1, Duration::ZERO), (100, Duration::from_secs(3600)));
    let mut state = ScalingState::default();
    let now = Instant::now();

    // A fresh scale-down just happened; the cooldown would normally gate.
    state.last_down = Some(now);
    assert_eq!(
        decide(&mut state, &sample(3, 1, false), now, &config),
        Decision::ScaleDown(2)
    );
}

#[test]
fn test_throttle_rate_forces_downscale() {
    let config = config((1, Duration::ZERO), (100, Duration::from_secs(3600)));
    let mut state = ScalingState::default();
    let now = Instant::now();
    state.last_down = Some(now);

    let throttled = TickSample {
        active: 3,
        limit: 3,
        pressure: true,
        throttle_rate: 0.5,
    };
    assert_eq!(decide(&mut state, &throttled, now, &config), Decision::ScaleDown(1));

    // At one indexer the throttle signal stops shedding.
    let throttled_floor = TickSample {
        active: 1,
        limit: 3,
        pressure: false,
        throttle_rate: 0.5,
    };
    assert_eq!(decide(&mut state, &throttled_floor, now, &config), Decision::None);
}

#[test]
fn test_throttle_rate_below_limit_is_ignored() {
    let config = config((1, Duration::ZERO), (2, Duration::ZERO));
    let mut state = ScalingState::default();
    let now = Instant::now();

    let quiet = TickSample {
        active: 2,
        limit: 4,
        pressure: true,
        throttle_rate: 0.005,
    };
    // Below 1%: treated as a normal pressured tick.
    assert_eq!(decide(&mut state, &quiet, now, &config), Decision::ScaleUp);
}
