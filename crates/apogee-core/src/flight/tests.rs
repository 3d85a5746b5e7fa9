use super::*;
use crate::config::GRAVITY_MPS2;

const TICK_US: Micros = 5_000;

fn estimate(timestamp_us: Micros, altitude_m: f32, velocity_mps: f32, accel_mps2: f32) -> StateEstimate {
    StateEstimate {
        timestamp_us,
        altitude_m,
        velocity_mps,
        accel_mps2,
        confidence: 0.9,
        source_agreement: true,
    }
}

fn armed_machine() -> FlightStateMachine {
    let mut sm = FlightStateMachine::new(DetectionConfig::default(), 0);
    sm.arm(0).unwrap();
    sm
}

/// Drive the machine through ticks of a constant estimate until it
/// transitions or `max_ticks` elapse.
fn run_until_transition(
    sm: &mut FlightStateMachine,
    start_us: Micros,
    altitude_m: f32,
    velocity_mps: f32,
    accel_mps2: f32,
    max_ticks: u32,
) -> Option<Transition> {
    for i in 0..max_ticks {
        let ts = start_us + Micros::from(i) * TICK_US;
        let e = estimate(ts, altitude_m, velocity_mps, accel_mps2);
        if let Some(tr) = sm.update(&e, FaultFlags::default()) {
            return Some(tr);
        }
    }
    None
}

#[test]
fn test_initial_phase_is_idle() {
    let sm = FlightStateMachine::new(DetectionConfig::default(), 0);
    assert_eq!(sm.phase(), FlightPhase::Idle);
}

#[test]
fn test_arm_only_from_idle() {
    let mut sm = FlightStateMachine::new(DetectionConfig::default(), 0);
    assert!(sm.arm(0).is_some());
    assert_eq!(sm.phase(), FlightPhase::Armed);
    assert!(sm.arm(TICK_US).is_none(), "double arm is refused");
}

#[test]
fn test_disarm_allowed_only_before_boost() {
    let mut sm = armed_machine();
    let tr = run_until_transition(&mut sm, TICK_US, 0.0, 5.0, 5.0 * GRAVITY_MPS2, 100).unwrap();
    assert_eq!(tr.to, FlightPhase::Boost);
    assert!(sm.disarm(tr.timestamp_us + TICK_US).is_none());
    assert_eq!(sm.phase(), FlightPhase::Boost);
}

#[test]
fn test_liftoff_requires_sustained_acceleration() {
    let mut sm = armed_machine();

    // A single high-G spike (one tick) is vibration, not liftoff.
    let spike = estimate(TICK_US, 0.0, 0.0, 8.0 * GRAVITY_MPS2);
    assert!(sm.update(&spike, FaultFlags::default()).is_none());
    let quiet = estimate(2 * TICK_US, 0.0, 0.0, 0.0);
    assert!(sm.update(&quiet, FaultFlags::default()).is_none());
    assert_eq!(sm.phase(), FlightPhase::Armed);

    // Sustained acceleration past the debounce window is liftoff.
    let tr = run_until_transition(&mut sm, 3 * TICK_US, 1.0, 10.0, 8.0 * GRAVITY_MPS2, 100);
    assert_eq!(tr.unwrap().to, FlightPhase::Boost);
}

#[test]
fn test_nominal_phase_sequence_in_order() {
    let mut sm = armed_machine();
    let mut visited = std::vec![FlightPhase::Armed];
    let mut ts = TICK_US;

    // Boost: 8 g for as long as it takes.
    let tr = run_until_transition(&mut sm, ts, 50.0, 80.0, 8.0 * GRAVITY_MPS2, 200).unwrap();
    visited.push(tr.to);
    ts = tr.timestamp_us + TICK_US;

    // Burnout: near-zero thrust.
    let tr = run_until_transition(&mut sm, ts, 400.0, 60.0, -1.0 * GRAVITY_MPS2, 200).unwrap();
    visited.push(tr.to);
    assert!(tr.deploy.is_none(), "single stage: no staging charge");
    ts = tr.timestamp_us + TICK_US;

    // Coast then descent through apogee.
    let tr = run_until_transition(&mut sm, ts, 800.0, -5.0, -GRAVITY_MPS2, 200).unwrap();
    assert_eq!(tr.to, FlightPhase::Apogee);
    visited.push(tr.to);
    ts = tr.timestamp_us + TICK_US;

    // Apogee commands the drogue on the next tick.
    let e = estimate(ts, 800.0, -6.0, -GRAVITY_MPS2);
    let tr = sm.update(&e, FaultFlags::default()).unwrap();
    assert_eq!(tr.to, FlightPhase::DrogueDescent);
    assert_eq!(tr.deploy, Some(DeployEvent::Drogue));
    visited.push(tr.to);
    ts = tr.timestamp_us + TICK_US;

    // Below the main deployment altitude.
    let tr = run_until_transition(&mut sm, ts, 250.0, -20.0, 0.0, 10).unwrap();
    assert_eq!(tr.to, FlightPhase::MainDescent);
    assert_eq!(tr.deploy, Some(DeployEvent::Main));
    visited.push(tr.to);
    ts = tr.timestamp_us + TICK_US;

    // Stable near the ground.
    let tr = run_until_transition(&mut sm, ts, 1.0, 0.0, 0.0, 2_000).unwrap();
    assert_eq!(tr.to, FlightPhase::Landed);
    visited.push(tr.to);

    assert_eq!(
        visited,
        std::vec![
            FlightPhase::Armed,
            FlightPhase::Boost,
            FlightPhase::Coast,
            FlightPhase::Apogee,
            FlightPhase::DrogueDescent,
            FlightPhase::MainDescent,
            FlightPhase::Landed,
        ],
        "phases visited strictly in order, none skipped or revisited"
    );
}

#[test]
fn test_apogee_fires_exactly_once() {
    let mut sm = armed_machine();
    let mut apogee_transitions = 0;
    let mut ts = TICK_US;

    let profile = [
        // (altitude, velocity, accel, ticks)
        (50.0, 80.0, 8.0 * GRAVITY_MPS2, 100),
        (400.0, 60.0, -GRAVITY_MPS2, 100),
        (800.0, -5.0, -GRAVITY_MPS2, 200),
        (600.0, -20.0, 0.0, 200),
        (100.0, -5.0, 0.0, 200),
        (1.0, 0.0, 0.0, 1_200),
    ];
    for (alt, vel, acc, ticks) in profile {
        for _ in 0..ticks {
            let e = estimate(ts, alt, vel, acc);
            if let Some(tr) = sm.update(&e, FaultFlags::default()) {
                if tr.to == FlightPhase::Apogee {
                    apogee_transitions += 1;
                }
            }
            ts += TICK_US;
        }
    }
    assert_eq!(apogee_transitions, 1);
    assert_eq!(sm.phase(), FlightPhase::Landed);
}

#[test]
fn test_apogee_zero_cross_needs_debounce() {
    let mut sm = armed_machine();
    let mut ts = TICK_US;
    let tr = run_until_transition(&mut sm, ts, 50.0, 80.0, 8.0 * GRAVITY_MPS2, 100).unwrap();
    ts = tr.timestamp_us + TICK_US;
    let tr = run_until_transition(&mut sm, ts, 400.0, 60.0, -GRAVITY_MPS2, 100).unwrap();
    assert_eq!(tr.to, FlightPhase::Coast);
    ts = tr.timestamp_us + TICK_US;

    // Noise flickers around zero velocity near the peak: alternating signs
    // must never accumulate into an apogee call.
    for i in 0..200u64 {
        let vel = if i % 2 == 0 { -3.0 } else { 1.0 };
        let e = estimate(ts, 800.0, vel, -GRAVITY_MPS2);
        assert!(sm.update(&e, FaultFlags::default()).is_none());
        ts += TICK_US;
    }
    assert_eq!(sm.phase(), FlightPhase::Coast);
}

#[test]
fn test_apogee_timeout_fallback() {
    let mut sm = armed_machine();
    let mut ts = TICK_US;
    let tr = run_until_transition(&mut sm, ts, 50.0, 80.0, 8.0 * GRAVITY_MPS2, 100).unwrap();
    ts = tr.timestamp_us + TICK_US;
    let tr = run_until_transition(&mut sm, ts, 400.0, 60.0, -GRAVITY_MPS2, 100).unwrap();
    assert_eq!(tr.to, FlightPhase::Coast);
    ts = tr.timestamp_us + TICK_US;

    // Velocity estimate stuck slightly positive (dead baro, drift): the
    // coast timeout still forces the apogee event.
    let timeout_ticks = (DetectionConfig::default().coast_timeout_us / TICK_US) as u32 + 10;
    let tr = run_until_transition(&mut sm, ts, 800.0, 0.5, -GRAVITY_MPS2, timeout_ticks).unwrap();
    assert_eq!(tr.to, FlightPhase::Apogee);
    assert_eq!(tr.cause, TransitionCause::ApogeeTimeout);
}

#[test]
fn test_staging_charge_commanded_at_burnout() {
    let mut sm = FlightStateMachine::new(DetectionConfig::default(), 1);
    sm.arm(0).unwrap();
    let tr = run_until_transition(&mut sm, TICK_US, 50.0, 80.0, 8.0 * GRAVITY_MPS2, 100).unwrap();
    let ts = tr.timestamp_us + TICK_US;
    let tr = run_until_transition(&mut sm, ts, 400.0, 60.0, -GRAVITY_MPS2, 100).unwrap();
    assert_eq!(tr.to, FlightPhase::Coast);
    assert_eq!(tr.deploy, Some(DeployEvent::Stage(0)));
}

#[test]
fn test_sensor_silence_aborts_after_fault_window() {
    let mut sm = armed_machine();
    let faults = FaultFlags {
        sensor_silent: true,
        ..FaultFlags::default()
    };

    let window_ticks = (DetectionConfig::default().fault_window_us / TICK_US) as u64 + 2;
    let mut aborted = None;
    for i in 0..window_ticks {
        let e = estimate(TICK_US + i * TICK_US, 0.0, 0.0, 0.0);
        if let Some(tr) = sm.update(&e, faults) {
            aborted = Some(tr);
            break;
        }
    }
    let tr = aborted.expect("abort fires once the fault window elapses");
    assert_eq!(tr.to, FlightPhase::Aborted);
    assert_eq!(tr.cause, TransitionCause::Abort(AbortReason::SensorSilence));
}

#[test]
fn test_transient_fault_does_not_abort() {
    let mut sm = armed_machine();
    let faulted = FaultFlags {
        sensor_silent: true,
        ..FaultFlags::default()
    };
    // Alternate faulted and healthy ticks: the hold clock resets each time.
    for i in 0..1_000u64 {
        let e = estimate(TICK_US + i * TICK_US, 0.0, 0.0, 0.0);
        let f = if i % 2 == 0 {
            faulted
        } else {
            FaultFlags::default()
        };
        assert!(sm.update(&e, f).is_none());
    }
    assert_eq!(sm.phase(), FlightPhase::Armed);
}

#[test]
fn test_ignition_failure_aborts_immediately() {
    let mut sm = armed_machine();
    let mut ts = TICK_US;
    let tr = run_until_transition(&mut sm, ts, 50.0, 80.0, 8.0 * GRAVITY_MPS2, 100).unwrap();
    ts = tr.timestamp_us + TICK_US;

    let faults = FaultFlags {
        ignition_failed: Some(DeployEvent::Drogue),
        ..FaultFlags::default()
    };
    let e = estimate(ts, 400.0, 60.0, 0.0);
    let tr = sm.update(&e, faults).unwrap();
    assert_eq!(tr.to, FlightPhase::Aborted);
    assert_eq!(
        tr.cause,
        TransitionCause::Abort(AbortReason::IgnitionFailure(DeployEvent::Drogue))
    );
}

#[test]
fn test_terminal_phases_stay_terminal() {
    let mut sm = armed_machine();
    sm.abort(AbortReason::SensorSilence, TICK_US).unwrap();
    assert_eq!(sm.phase(), FlightPhase::Aborted);

    let e = estimate(2 * TICK_US, 100.0, 50.0, 8.0 * GRAVITY_MPS2);
    assert!(sm.update(&e, FaultFlags::default()).is_none());
    assert!(sm.abort(AbortReason::SensorSilence, 3 * TICK_US).is_none());
}
