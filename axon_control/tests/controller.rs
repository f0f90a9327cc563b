//! Integration flows driving the full cycle body against the simulated
//! drive: startup to OperationEnabled, a complete trapezoidal move, fault
//! recovery, bus-error abort, soft working-counter faults, and command
//! rejection.

use std::sync::Arc;
use std::time::Duration;

use axon_common::bus::{BusError, BusLayer, BusState};
use axon_common::cia402::{OperationMode, objects};
use axon_common::shared::{MotionCommand, MotionState, SharedContext};
use axon_control::bus::sim::{SimBus, SimConfig};
use axon_control::config::ControllerConfig;
use axon_control::cycle::CycleRunner;
use axon_control::error::ControlError;
use axon_control::supervisor::Supervisor;

/// One revolution in counts (2^21), the reference move of the test drive.
const REV_COUNTS: i64 = 2_097_152;

struct Harness {
    sim: Arc<SimBus>,
    shared: Arc<SharedContext>,
    runner: CycleRunner,
}

/// Mirror of the pre-loop startup the supervisor performs: configure the
/// operation mode via SDO and bring the bus to SafeOperational.
fn harness(mode: OperationMode) -> Harness {
    let sim = Arc::new(SimBus::new(SimConfig::default()));
    let shared = Arc::new(SharedContext::new());
    let config = ControllerConfig::default();

    sim.sdo_write(objects::MODE_OF_OPERATION, 0, &[(mode as i8) as u8])
        .unwrap();
    sim.request_state(BusState::SafeOperational).unwrap();
    for _ in 0..4 {
        sim.read_state().unwrap();
    }
    assert_eq!(sim.read_state().unwrap(), BusState::SafeOperational);

    let runner = CycleRunner::new(
        sim.clone() as Arc<dyn BusLayer>,
        shared.clone(),
        &config,
        mode,
    );
    Harness {
        sim,
        shared,
        runner,
    }
}

/// Run cycles until `predicate` holds, failing after `max` cycles.
fn run_until(
    harness: &mut Harness,
    max: usize,
    predicate: impl Fn(&Harness) -> bool,
) -> usize {
    for cycle in 0..max {
        if predicate(harness) {
            return cycle;
        }
        harness.runner.cycle_body().unwrap();
    }
    panic!("condition not reached within {max} cycles");
}

#[test]
fn startup_reaches_operation_enabled() {
    let mut h = harness(OperationMode::CyclicSynchronousPosition);
    run_until(&mut h, 50, |h| {
        let s = h.shared.snapshot();
        s.bus_operational && s.drive_operational
    });

    let snapshot = h.shared.snapshot();
    assert_eq!(snapshot.status_word, 0x0027);
    assert!(!snapshot.fault);
    assert_eq!(snapshot.motion_state, MotionState::Idle);
    // Mode was configured once, before the bus went operational.
    assert_eq!(h.sim.mode(), 8);
}

#[test]
fn full_move_comes_to_rest_on_target() {
    let mut h = harness(OperationMode::CyclicSynchronousPosition);
    run_until(&mut h, 50, |h| h.shared.snapshot().drive_operational);

    h.shared
        .submit(MotionCommand::Move {
            target: REV_COUNTS,
            max_velocity: 1_048_576.0, // 180 deg/s
            acceleration: 2_097_152.0, // 360 deg/s²
        })
        .unwrap();

    // Record the phase sequence while the move runs.
    let mut phases = vec![h.shared.snapshot().motion_state];
    let mut move_seen = false;
    for _ in 0..2_000 {
        h.runner.cycle_body().unwrap();
        let state = h.shared.snapshot().motion_state;
        if *phases.last().unwrap() != state {
            phases.push(state);
        }
        if state != MotionState::Idle {
            move_seen = true;
        } else if move_seen {
            break;
        }
    }
    assert_eq!(
        phases,
        vec![
            MotionState::Idle,
            MotionState::Accelerating,
            MotionState::Cruising,
            MotionState::Decelerating,
            MotionState::Idle,
        ]
    );

    // Let the simulated axis settle onto the final setpoint, then check it
    // landed inside the arrival band of the commanded revolution.
    for _ in 0..50 {
        h.runner.cycle_body().unwrap();
    }
    let error = (h.sim.actual_position() - REV_COUNTS as f64).abs();
    assert!(error <= 100.0, "axis rest position off target by {error}");
    assert_eq!(h.shared.snapshot().wkc_shortfalls, 0);
}

#[test]
fn fault_before_enable_holds_reset_until_clear() {
    let mut h = harness(OperationMode::CyclicSynchronousPosition);
    h.sim.inject_fault(0x7500);

    // Reach the point where the bus is up and the fault is visible.
    run_until(&mut h, 50, |h| {
        let s = h.shared.snapshot();
        s.bus_operational && s.fault
    });

    // While the fault bit is set: fault-reset every cycle, never operational.
    let mut reset_cycles = 0;
    while h.shared.snapshot().fault {
        let s = h.shared.snapshot();
        assert_eq!(s.control_word, 0x0080);
        assert!(!s.drive_operational);
        h.runner.cycle_body().unwrap();
        reset_cycles += 1;
        assert!(reset_cycles < 50, "fault never cleared");
    }
    assert!(reset_cycles >= 2, "reset was not resubmitted across cycles");

    // After the clear the normal enable sequence resumes.
    run_until(&mut h, 50, |h| h.shared.snapshot().drive_operational);
    assert!(!h.shared.snapshot().fault);
}

#[test]
fn bus_error_aborts_within_one_cycle_without_retry() {
    let mut h = harness(OperationMode::CyclicSynchronousPosition);
    let requests_before = h.sim.state_requests();
    h.sim.inject_bus_error(0x001A);

    let err = h.runner.cycle_body().unwrap_err();
    assert!(matches!(
        err,
        ControlError::Bus(BusError::Hardware { al_status: 0x001A })
    ));
    // Shutdown raised within the same cycle; no Operational request was
    // ever attempted, let alone a second one.
    assert!(h.shared.shutdown_requested());
    assert_eq!(h.sim.state_requests(), requests_before);
}

#[test]
fn wkc_shortfall_is_soft() {
    let mut h = harness(OperationMode::CyclicSynchronousPosition);
    run_until(&mut h, 50, |h| h.shared.snapshot().drive_operational);

    h.sim.drop_working_counter(1);
    h.runner.cycle_body().unwrap();
    assert_eq!(h.shared.snapshot().wkc_shortfalls, 1);
    assert!(!h.shared.shutdown_requested());

    // The next cycle is healthy again and the count stands still.
    h.runner.cycle_body().unwrap();
    let snapshot = h.shared.snapshot();
    assert_eq!(snapshot.wkc_shortfalls, 1);
    assert!(snapshot.drive_operational);
}

#[test]
fn invalid_command_never_reaches_the_profiler() {
    let mut h = harness(OperationMode::CyclicSynchronousPosition);
    run_until(&mut h, 50, |h| h.shared.snapshot().drive_operational);

    let err = h
        .shared
        .submit(MotionCommand::Move {
            target: REV_COUNTS,
            max_velocity: 1_000.0,
            acceleration: 0.0,
        })
        .unwrap_err();
    assert!(err.to_string().contains("acceleration"));

    for _ in 0..10 {
        h.runner.cycle_body().unwrap();
    }
    // No profiler state was mutated; the axis never left Idle.
    assert_eq!(h.shared.snapshot().motion_state, MotionState::Idle);
}

#[test]
fn velocity_mode_writes_setpoint_directly() {
    let mut h = harness(OperationMode::CyclicSynchronousVelocity);
    run_until(&mut h, 50, |h| h.shared.snapshot().drive_operational);
    assert_eq!(h.sim.mode(), 9);

    let position_before = h.sim.actual_position();
    h.shared
        .submit(MotionCommand::Velocity { target: 58_254.2 }) // 10 deg/s
        .unwrap();
    for _ in 0..100 {
        h.runner.cycle_body().unwrap();
    }
    let snapshot = h.shared.snapshot();
    assert_eq!(snapshot.actual_velocity, 58_254);
    assert!(h.sim.actual_position() > position_before);
    // Velocity operation bypasses the profiler.
    assert_eq!(snapshot.motion_state, MotionState::Idle);
}

#[test]
fn retarget_mid_move_is_adopted_next_cycle() {
    let mut h = harness(OperationMode::CyclicSynchronousPosition);
    run_until(&mut h, 50, |h| h.shared.snapshot().drive_operational);

    h.shared
        .submit(MotionCommand::Move {
            target: REV_COUNTS,
            max_velocity: 1_048_576.0,
            acceleration: 2_097_152.0,
        })
        .unwrap();
    run_until(&mut h, 100, |h| {
        h.shared.snapshot().motion_state == MotionState::Accelerating
    });

    // Override mid-move with a closer target; the move still terminates and
    // the axis comes to rest on the *new* target.
    h.shared
        .submit(MotionCommand::Move {
            target: REV_COUNTS / 4,
            max_velocity: 1_048_576.0,
            acceleration: 2_097_152.0,
        })
        .unwrap();
    let mut was_moving = false;
    for _ in 0..2_000 {
        h.runner.cycle_body().unwrap();
        match h.shared.snapshot().motion_state {
            MotionState::Idle if was_moving => break,
            MotionState::Idle => {}
            _ => was_moving = true,
        }
    }
    for _ in 0..50 {
        h.runner.cycle_body().unwrap();
    }
    let error = (h.sim.actual_position() - (REV_COUNTS / 4) as f64).abs();
    assert!(error <= 100.0, "rest position off new target by {error}");
}

// ─── Supervisor-level flows ─────────────────────────────────────────

#[test]
fn supervisor_mode_sdo_failure_is_fatal() {
    let sim = Arc::new(SimBus::new(SimConfig::default()));
    sim.fail_sdo_writes(true);
    let shared = Arc::new(SharedContext::new());
    let config = ControllerConfig::default();
    let supervisor = Supervisor::new(sim as Arc<dyn BusLayer>, shared, &config);

    let err = supervisor
        .configure_drive(OperationMode::CyclicSynchronousPosition)
        .unwrap_err();
    assert!(matches!(err, ControlError::ModeConfiguration { .. }));
}

#[test]
fn supervisor_declares_startup_failure_after_budget() {
    let sim = Arc::new(SimBus::new(SimConfig::default()));
    let shared = Arc::new(SharedContext::new());
    let mut config = ControllerConfig::default();
    config.cycle.startup_timeout_ms = 60;
    let supervisor = Supervisor::new(sim as Arc<dyn BusLayer>, shared, &config);

    // No cyclic thread is running, so the controller can never come up.
    let err = supervisor
        .run(MotionCommand::Velocity { target: 0.0 })
        .unwrap_err();
    match err {
        ControlError::StartupTimeout { timeout_ms, .. } => assert_eq!(timeout_ms, 60),
        other => panic!("expected StartupTimeout, got {other}"),
    }
}

#[test]
fn cyclic_loop_exits_cooperatively_on_shutdown() {
    let h = harness(OperationMode::CyclicSynchronousPosition);
    let Harness {
        shared, mut runner, ..
    } = h;

    let flag = shared.clone();
    let cyclic = std::thread::spawn(move || runner.run());

    std::thread::sleep(Duration::from_millis(100));
    flag.request_shutdown();
    let result = cyclic.join().expect("cyclic thread panicked");
    assert!(result.is_ok());
    // The loop got through startup while it ran.
    assert!(flag.snapshot().cycle_count > 0);
}
