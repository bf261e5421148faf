//! End-to-end engine scenarios.
//!
//! These tests drive the engine the way the monitor does (requests,
//! dispatcher outcomes, and poll batches on a simulated clock) and check the
//! properties operators rely on:
//! - the requested mode shows immediately
//! - a slow device never makes the display flicker back
//! - intents resolve by confirmation, failure, or expiry

use std::time::{Duration, Instant};

use chrono::Utc;
use coldwatch_id::DeviceId;
use coldwatch_reconcile::{
    DispatchOutcome, EngineConfig, HealthState, HistoryEntry, IntentEvent, OperatingMode,
    ReconcileEngine, Snapshot, SnapshotBatch,
};
use proptest::prelude::*;

const WINDOW: Duration = Duration::from_secs(45);

fn device() -> DeviceId {
    DeviceId::parse("box_01").unwrap()
}

fn engine() -> ReconcileEngine {
    ReconcileEngine::new(
        [device()],
        EngineConfig {
            expiration_window: WINDOW,
        },
    )
}

fn reading(live: bool) -> Snapshot {
    Snapshot {
        health_score: Some(75),
        temperature: Some(5.0),
        history: vec![HistoryEntry {
            time: Some(Utc::now()),
            temperature: Some(5.0),
            lid_open: false,
            mode: Some(if live { "LIVE" } else { "ECO" }.to_string()),
        }],
        ..Default::default()
    }
}

fn batch(snapshot: Snapshot) -> SnapshotBatch {
    SnapshotBatch::new(vec![(device(), snapshot)])
}

#[test]
fn test_stable_device_display() {
    let mut engine = engine();
    let snapshot = Snapshot {
        operational_status: None,
        health_score: Some(75),
        temperature: Some(5.0),
        tampered: false,
        lid_open: false,
        ..Default::default()
    };
    engine.apply_batch(&batch(snapshot), Instant::now());

    let view = engine.view(&device()).unwrap();
    assert_eq!(view.health_state, HealthState::Stable);
    assert_eq!(view.status_label, "75% Saúde");
    assert_eq!(view.display_temperature, Some(5.0));
}

#[test]
fn test_fraud_overrides_temperature() {
    let mut engine = engine();
    let snapshot = Snapshot {
        health_score: Some(0),
        temperature: Some(25.0),
        ..Default::default()
    };
    engine.apply_batch(&batch(snapshot), Instant::now());
    assert_eq!(
        engine.view(&device()).unwrap().health_state,
        HealthState::Fraud
    );
}

#[test]
fn test_optimistic_update_regardless_of_polled_mode() {
    for polled_live in [false, true] {
        for target in [OperatingMode::Eco, OperatingMode::Live] {
            let mut engine = engine();
            let t0 = Instant::now();
            engine.apply_batch(&batch(reading(polled_live)), t0);

            engine.request_mode_change(&device(), target, t0).unwrap();

            let view = engine.view(&device()).unwrap();
            assert_eq!(view.display_mode, target);
            assert!(view.is_mode_transitioning);
        }
    }
}

#[test]
fn test_slow_device_converges_without_flicker() {
    let mut engine = engine();
    let t0 = Instant::now();
    engine.apply_batch(&batch(reading(false)), t0);

    let req = engine
        .request_mode_change(&device(), OperatingMode::Live, t0)
        .unwrap();
    engine
        .apply_dispatch_outcome(&device(), req.ticket, DispatchOutcome::Acknowledged)
        .unwrap();

    // t=2s: device still reports eco.
    let events = engine.apply_batch(&batch(reading(false)), t0 + Duration::from_secs(2));
    assert!(events.is_empty());
    let view = engine.view(&device()).unwrap();
    assert_eq!(view.display_mode, OperatingMode::Live);
    assert!(view.is_mode_transitioning);

    // t=5s: device reports live.
    let events = engine.apply_batch(&batch(reading(true)), t0 + Duration::from_secs(5));
    assert_eq!(
        events,
        vec![IntentEvent::Confirmed {
            device_id: device(),
            ticket: req.ticket,
            mode: OperatingMode::Live,
        }]
    );
    let view = engine.view(&device()).unwrap();
    assert_eq!(view.display_mode, OperatingMode::Live);
    assert!(!view.is_mode_transitioning);
    assert!(engine.pending_intent(&device()).is_none());
}

#[test]
fn test_never_converging_intent_expires() {
    let mut engine = engine();
    let t0 = Instant::now();
    engine.apply_batch(&batch(reading(false)), t0);
    let req = engine
        .request_mode_change(&device(), OperatingMode::Live, t0)
        .unwrap();

    let mut t = t0;
    while t < t0 + WINDOW {
        t += Duration::from_secs(3);
        if t > t0 + WINDOW {
            break;
        }
        let events = engine.apply_batch(&batch(reading(false)), t);
        assert!(events.is_empty());
        assert_eq!(
            engine.view(&device()).unwrap().display_mode,
            OperatingMode::Live
        );
    }

    let events = engine.apply_batch(&batch(reading(false)), t0 + Duration::from_secs(46));
    assert_eq!(
        events,
        vec![IntentEvent::Expired {
            device_id: device(),
            ticket: req.ticket,
            target_mode: OperatingMode::Live,
            fallback_mode: OperatingMode::Eco,
        }]
    );
    let view = engine.view(&device()).unwrap();
    assert_eq!(view.display_mode, OperatingMode::Eco);
    assert!(!view.is_mode_transitioning);
}

#[test]
fn test_health_classified_while_intent_pending() {
    let mut engine = engine();
    let t0 = Instant::now();
    engine
        .request_mode_change(&device(), OperatingMode::Live, t0)
        .unwrap();

    let mut open = reading(false);
    open.lid_open = true;
    engine.apply_batch(&batch(open), t0 + Duration::from_secs(1));

    let view = engine.view(&device()).unwrap();
    assert_eq!(view.health_state, HealthState::Violation);
    assert!(view.is_mode_transitioning);
}

#[test]
fn test_dispatch_result_after_many_cycles() {
    let mut engine = engine();
    let t0 = Instant::now();
    engine.apply_batch(&batch(reading(false)), t0);
    let req = engine
        .request_mode_change(&device(), OperatingMode::Live, t0)
        .unwrap();

    for i in 1..=5 {
        engine.apply_batch(&batch(reading(false)), t0 + Duration::from_secs(3 * i));
    }

    let event = engine
        .apply_dispatch_outcome(&device(), req.ticket, DispatchOutcome::Failed)
        .unwrap();
    assert!(matches!(event, Some(IntentEvent::DispatchFailed { .. })));
    assert_eq!(
        engine.view(&device()).unwrap().display_mode,
        OperatingMode::Eco
    );
}

fn arb_reading() -> impl Strategy<Value = Snapshot> {
    (
        proptest::option::of(0u8..=100),
        proptest::option::of(-10.0f64..30.0),
        any::<bool>(),
        any::<bool>(),
        proptest::option::of(any::<bool>()),
    )
        .prop_map(|(health_score, temperature, lid_open, fetch_failed, live)| {
            let mut snapshot = match live {
                Some(live) => reading(live),
                None => Snapshot::default(),
            };
            snapshot.health_score = health_score;
            snapshot.temperature = temperature;
            snapshot.lid_open = lid_open;
            snapshot.fetch_failed = fetch_failed;
            snapshot
        })
}

proptest! {
    #[test]
    fn prop_batch_application_idempotent(
        first in arb_reading(),
        second in arb_reading(),
        pending in proptest::option::of(any::<bool>()),
        elapsed_secs in 0u64..90,
    ) {
        let mut engine = engine();
        let t0 = Instant::now();
        engine.apply_batch(&batch(first), t0);
        if let Some(live) = pending {
            engine.request_mode_change(&device(), OperatingMode::from(live), t0).unwrap();
        }

        let now = t0 + Duration::from_secs(elapsed_secs);
        let b = batch(second);
        engine.apply_batch(&b, now);
        let once = engine.views();
        engine.apply_batch(&b, now);
        prop_assert_eq!(once, engine.views());
    }

    #[test]
    fn prop_unexpired_intent_never_flickers(
        target_live in any::<bool>(),
        elapsed_secs in 0u64..=45,
    ) {
        let mut engine = engine();
        let t0 = Instant::now();
        let target = OperatingMode::from(target_live);
        engine.request_mode_change(&device(), target, t0).unwrap();

        engine.apply_batch(&batch(reading(!target_live)), t0 + Duration::from_secs(elapsed_secs));

        let view = engine.view(&device()).unwrap();
        prop_assert_eq!(view.display_mode, target);
        prop_assert!(view.is_mode_transitioning);
    }
}
