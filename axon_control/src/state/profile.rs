//! Trapezoidal motion profiler.
//!
//! Generates, per cycle, the next position setpoint following a trapezoidal
//! velocity law toward an absolute target: accelerate at a constant rate,
//! cruise at the velocity limit, decelerate so the axis comes to rest on the
//! target. Phase transitions hinge on the stopping distance `v² / 2a`
//! recomputed from the live velocity every cycle, so a retargeted move
//! re-plans immediately with no blending.
//!
//! Within one move the phases only advance: Idle → Accelerating →
//! {Cruising →} Decelerating → Idle. On arrival the velocity is zeroed and
//! the position snapped exactly onto the target.

use axon_common::shared::MotionState;

/// Arrival-tolerance policy. These are tunable configuration, not protocol:
/// arrival is declared when the remaining distance falls inside
/// `position_tolerance`, when the target is passed in the direction of
/// travel, when the axis is both slow (below `velocity_tolerance`) and close
/// (inside `coarse_tolerance`), or when the velocity crosses zero while
/// decelerating.
#[derive(Debug, Clone, Copy)]
pub struct ProfileConfig {
    /// Arrival band [counts].
    pub position_tolerance: f64,
    /// Low-speed threshold [counts/s].
    pub velocity_tolerance: f64,
    /// Coarse arrival band applied below the low-speed threshold [counts].
    pub coarse_tolerance: f64,
}

impl Default for ProfileConfig {
    fn default() -> Self {
        Self {
            position_tolerance: 100.0,
            velocity_tolerance: 100.0,
            coarse_tolerance: 1_000.0,
        }
    }
}

/// The profiler. Positions and velocities are kept in `f64` counts so the
/// forward-Euler integration does not accumulate quantization error; the
/// output record receives the truncated integer value.
#[derive(Debug, Clone)]
pub struct TrapezoidProfile {
    config: ProfileConfig,
    state: MotionState,
    position: f64,
    velocity: f64,
    target: f64,
    max_velocity: f64,
    acceleration: f64,
}

impl TrapezoidProfile {
    pub fn new(config: ProfileConfig) -> Self {
        Self {
            config,
            state: MotionState::Idle,
            position: 0.0,
            velocity: 0.0,
            target: 0.0,
            max_velocity: 0.0,
            acceleration: 0.0,
        }
    }

    #[inline]
    pub fn state(&self) -> MotionState {
        self.state
    }

    /// Internal position reference [counts].
    #[inline]
    pub fn position(&self) -> f64 {
        self.position
    }

    /// Internal velocity reference [counts/s].
    #[inline]
    pub fn velocity(&self) -> f64 {
        self.velocity
    }

    /// Initialize the motion origin from the drive's actual position.
    ///
    /// Called on the cycle OperationEnabled is first observed, so the first
    /// setpoint handed to the drive equals where the axis already is.
    pub fn sync_to(&mut self, actual_position: i32) {
        self.position = actual_position as f64;
        self.target = self.position;
        self.velocity = 0.0;
        self.state = MotionState::Idle;
    }

    /// Adopt a new move. Overrides any move in progress; the next `step`
    /// re-evaluates phases against the new target and limits.
    ///
    /// Limits are validated at command submission; this only debug-asserts.
    pub fn load(&mut self, target: i64, max_velocity: f64, acceleration: f64) {
        debug_assert!(acceleration > 0.0, "acceleration validated at submission");
        debug_assert!(max_velocity > 0.0, "velocity limit validated at submission");
        self.target = target as f64;
        self.max_velocity = max_velocity;
        self.acceleration = acceleration;
        self.state = MotionState::Accelerating;
    }

    /// Advance one cycle of `dt` seconds and return the position setpoint.
    pub fn step(&mut self, dt: f64) -> i64 {
        if self.state == MotionState::Idle {
            return self.position as i64;
        }

        let distance = self.target - self.position;
        // Ties default to the positive direction.
        let direction = if distance >= 0.0 { 1.0 } else { -1.0 };
        let decel_distance = self.velocity * self.velocity / (2.0 * self.acceleration);

        // Phase transitions, evaluated in state order.
        match self.state {
            MotionState::Accelerating => {
                if distance.abs() <= decel_distance {
                    self.state = MotionState::Decelerating;
                } else if direction * self.velocity >= self.max_velocity {
                    self.state = MotionState::Cruising;
                }
            }
            MotionState::Cruising => {
                if distance.abs() <= decel_distance {
                    self.state = MotionState::Decelerating;
                }
            }
            MotionState::Decelerating => {
                if self.arrived(distance, direction) {
                    return self.finish();
                }
            }
            MotionState::Idle => unreachable!(),
        }

        // Velocity update by phase.
        match self.state {
            MotionState::Accelerating => {
                self.velocity += direction * self.acceleration * dt;
                if direction * self.velocity > self.max_velocity {
                    self.velocity = direction * self.max_velocity;
                }
            }
            MotionState::Cruising => {
                self.velocity = direction * self.max_velocity;
            }
            MotionState::Decelerating => {
                self.velocity -= direction * self.acceleration * dt;
                if direction * self.velocity <= 0.0 {
                    // Velocity crossed zero in the commanded direction.
                    return self.finish();
                }
            }
            MotionState::Idle => {}
        }

        // Explicit forward-Euler integration.
        self.position += self.velocity * dt;
        self.position as i64
    }

    fn arrived(&self, distance: f64, direction: f64) -> bool {
        distance.abs() <= self.config.position_tolerance
            || direction * distance < 0.0
            || (self.velocity.abs() < self.config.velocity_tolerance
                && distance.abs() < self.config.coarse_tolerance)
    }

    fn finish(&mut self) -> i64 {
        self.velocity = 0.0;
        self.position = self.target;
        self.state = MotionState::Idle;
        self.position as i64
    }
}

// ─── Tests ──────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    const DT: f64 = 0.002;

    /// Reference scenario: one revolution at 2^21 counts/rev.
    /// 360° at 180°/s with 360°/s² acceleration.
    const REV_COUNTS: i64 = 2_097_152;
    const VMAX: f64 = 1_048_576.0;
    const ACCEL: f64 = 2_097_152.0;

    fn profile() -> TrapezoidProfile {
        let mut p = TrapezoidProfile::new(ProfileConfig::default());
        p.sync_to(0);
        p
    }

    /// Run until Idle, recording every phase visited. Panics if the move
    /// does not terminate within `max_cycles`.
    fn run_to_idle(p: &mut TrapezoidProfile, max_cycles: usize) -> Vec<MotionState> {
        let mut phases = vec![p.state()];
        for _ in 0..max_cycles {
            p.step(DT);
            if *phases.last().unwrap() != p.state() {
                phases.push(p.state());
            }
            if p.state() == MotionState::Idle {
                return phases;
            }
        }
        panic!("profile did not reach Idle within {max_cycles} cycles");
    }

    #[test]
    fn full_revolution_terminates_exactly_on_target() {
        let mut p = profile();
        p.load(REV_COUNTS, VMAX, ACCEL);
        let phases = run_to_idle(&mut p, 2_000);
        assert_eq!(
            phases,
            vec![
                MotionState::Accelerating,
                MotionState::Cruising,
                MotionState::Decelerating,
                MotionState::Idle,
            ]
        );
        // Snapped, not asymptotic.
        assert_eq!(p.position(), REV_COUNTS as f64);
        assert_eq!(p.velocity(), 0.0);
        assert_eq!(p.step(DT), REV_COUNTS);
    }

    #[test]
    fn velocity_never_exceeds_limit() {
        let mut p = profile();
        p.load(REV_COUNTS, VMAX, ACCEL);
        for _ in 0..2_000 {
            p.step(DT);
            assert!(
                p.velocity().abs() <= VMAX + 1e-9,
                "velocity {} exceeds limit",
                p.velocity()
            );
            if p.state() == MotionState::Idle {
                break;
            }
        }
        assert_eq!(p.state(), MotionState::Idle);
    }

    #[test]
    fn short_move_skips_cruising() {
        let mut p = profile();
        // Stopping distance catches up with the remaining distance long
        // before the velocity limit is reached.
        p.load(10_000, VMAX, ACCEL);
        let phases = run_to_idle(&mut p, 2_000);
        assert_eq!(
            phases,
            vec![
                MotionState::Accelerating,
                MotionState::Decelerating,
                MotionState::Idle,
            ]
        );
        assert_eq!(p.position(), 10_000.0);
    }

    #[test]
    fn negative_direction_is_monotonic() {
        let mut p = profile();
        p.sync_to(500_000);
        p.load(-500_000, VMAX, ACCEL);
        let mut previous = p.position();
        for _ in 0..2_000 {
            p.step(DT);
            assert!(
                p.position() <= previous + 1e-9,
                "position moved away from a lower target"
            );
            assert!(p.velocity() <= 0.0, "velocity against commanded direction");
            previous = p.position();
            if p.state() == MotionState::Idle {
                break;
            }
        }
        assert_eq!(p.state(), MotionState::Idle);
        assert_eq!(p.position(), -500_000.0);
    }

    #[test]
    fn deceleration_starts_exactly_at_stopping_distance() {
        let mut p = profile();
        p.load(REV_COUNTS, VMAX, ACCEL);
        let mut held_before = None;
        for _ in 0..2_000 {
            let distance = (REV_COUNTS as f64 - p.position()).abs();
            let decel_distance = p.velocity() * p.velocity() / (2.0 * ACCEL);
            let state_before = p.state();
            p.step(DT);
            if state_before != MotionState::Decelerating
                && p.state() == MotionState::Decelerating
            {
                // The trigger condition held on this cycle...
                assert!(distance <= decel_distance);
                // ...and not one cycle earlier (tie favors continuing).
                let (d, dd) = held_before.expect("transition on the first cycle");
                assert!(d > dd);
                return;
            }
            held_before = Some((distance, decel_distance));
        }
        panic!("never entered Decelerating");
    }

    #[test]
    fn phases_never_regress_within_a_move() {
        let mut p = profile();
        p.load(REV_COUNTS, VMAX, ACCEL);
        let mut highest = MotionState::Accelerating as u8;
        for _ in 0..2_000 {
            p.step(DT);
            if p.state() == MotionState::Idle {
                return;
            }
            let rank = p.state() as u8;
            assert!(rank >= highest, "phase regressed to {:?}", p.state());
            highest = rank;
        }
        panic!("did not terminate");
    }

    #[test]
    fn retarget_mid_move_replans_immediately() {
        let mut p = profile();
        p.load(REV_COUNTS, VMAX, ACCEL);
        for _ in 0..200 {
            p.step(DT);
        }
        assert_ne!(p.state(), MotionState::Idle);
        // Extend the move: the profiler re-enters Accelerating and still
        // terminates exactly on the new target.
        p.load(2 * REV_COUNTS, VMAX, ACCEL);
        assert_eq!(p.state(), MotionState::Accelerating);
        run_to_idle(&mut p, 4_000);
        assert_eq!(p.position(), (2 * REV_COUNTS) as f64);
    }

    #[test]
    fn zero_distance_move_terminates() {
        let mut p = profile();
        p.sync_to(1_234);
        p.load(1_234, VMAX, ACCEL);
        run_to_idle(&mut p, 10);
        assert_eq!(p.position(), 1_234.0);
        assert_eq!(p.velocity(), 0.0);
    }

    #[test]
    fn idle_profile_holds_position() {
        let mut p = profile();
        p.sync_to(42);
        for _ in 0..10 {
            assert_eq!(p.step(DT), 42);
        }
        assert_eq!(p.state(), MotionState::Idle);
    }
}
