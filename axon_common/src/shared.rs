//! Lock-free status/command channel between the cyclic loop and the
//! supervisor.
//!
//! Single-writer-per-field discipline: the real-time loop is the sole writer
//! of the snapshot fields, the supervisor is the sole writer of the command
//! cell (and of the last-error-code field it fills from diagnostics). All
//! cross-thread fields are plain atomics; neither thread ever blocks on the
//! other. Readers may observe a torn view across fields - the snapshot is
//! eventually consistent, not transactional.

use std::sync::atomic::{
    AtomicBool, AtomicI32, AtomicI64, AtomicU8, AtomicU16, AtomicU32, AtomicU64, Ordering,
};

use thiserror::Error;

// ─── Motion Vocabulary ──────────────────────────────────────────────

/// Profiler phase, mutated only inside the cyclic loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum MotionState {
    Idle = 0,
    Accelerating = 1,
    Cruising = 2,
    Decelerating = 3,
}

impl MotionState {
    #[inline]
    pub const fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::Idle),
            1 => Some(Self::Accelerating),
            2 => Some(Self::Cruising),
            3 => Some(Self::Decelerating),
            _ => None,
        }
    }
}

impl Default for MotionState {
    fn default() -> Self {
        Self::Idle
    }
}

/// A motion request, written by the supervisor and adopted by the profiler
/// on its next cycle. Overrides any move in progress; no blending.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MotionCommand {
    /// Trapezoidal move to an absolute position.
    Move {
        /// Absolute target [counts].
        target: i64,
        /// Velocity limit magnitude [counts/s].
        max_velocity: f64,
        /// Acceleration magnitude [counts/s²]; must be positive.
        acceleration: f64,
    },
    /// Direct velocity setpoint (CSV operation).
    Velocity {
        /// Commanded velocity [counts/s].
        target: f64,
    },
}

/// A command rejected before adoption. Returned to the issuer; the profiler
/// never sees it.
#[derive(Debug, Clone, Copy, PartialEq, Error)]
pub enum CommandError {
    /// Zero or negative acceleration would divide by zero in the
    /// deceleration-distance formula.
    #[error("acceleration must be positive and finite, got {0}")]
    InvalidAcceleration(f64),

    #[error("velocity limit must be positive and finite, got {0}")]
    InvalidVelocityLimit(f64),

    #[error("velocity setpoint must be finite, got {0}")]
    InvalidVelocity(f64),
}

impl MotionCommand {
    /// Validate limits before the command may be submitted.
    pub fn validate(&self) -> Result<(), CommandError> {
        match *self {
            MotionCommand::Move {
                max_velocity,
                acceleration,
                ..
            } => {
                if !(acceleration.is_finite() && acceleration > 0.0) {
                    return Err(CommandError::InvalidAcceleration(acceleration));
                }
                if !(max_velocity.is_finite() && max_velocity > 0.0) {
                    return Err(CommandError::InvalidVelocityLimit(max_velocity));
                }
                Ok(())
            }
            MotionCommand::Velocity { target } => {
                if !target.is_finite() {
                    return Err(CommandError::InvalidVelocity(target));
                }
                Ok(())
            }
        }
    }
}

// ─── Snapshot ───────────────────────────────────────────────────────

/// One coherent-enough view of the controller, assembled from atomic loads.
#[derive(Debug, Clone, Copy, Default)]
pub struct StatusSnapshot {
    pub bus_operational: bool,
    pub drive_operational: bool,
    pub fault: bool,
    pub status_word: u16,
    pub control_word: u16,
    /// Last diagnostic error code read by the supervisor; 0 if none.
    pub last_error_code: u16,
    pub actual_position: i32,
    pub actual_velocity: i32,
    pub motion_state: MotionState,
    pub cycle_count: u64,
    pub wkc_shortfalls: u64,
}

// ─── Command Cell ───────────────────────────────────────────────────

// Command-cell kind discriminants; 0 means the cell was never written.
const KIND_MOVE: u8 = 1;
const KIND_VELOCITY: u8 = 2;

/// Single-slot command mailbox. The payload is stored first, then the
/// sequence counter is bumped with Release ordering; the reader adopts on
/// observing a new sequence with Acquire. A racing resubmission can tear the
/// payload, which the single-writer rule excludes.
#[derive(Debug, Default)]
struct CommandCell {
    seq: AtomicU32,
    kind: AtomicU8,
    target: AtomicI64,
    max_velocity_bits: AtomicU64,
    acceleration_bits: AtomicU64,
    velocity_bits: AtomicU64,
}

// ─── Shared Context ─────────────────────────────────────────────────

/// The one structure shared between the real-time and supervisory threads.
///
/// Constructed once at startup and handed to both tasks behind an `Arc`.
#[derive(Debug, Default)]
pub struct SharedContext {
    shutdown: AtomicBool,
    bus_operational: AtomicBool,
    drive_operational: AtomicBool,
    fault: AtomicBool,
    status_word: AtomicU16,
    control_word: AtomicU16,
    last_error_code: AtomicU16,
    actual_position: AtomicI32,
    actual_velocity: AtomicI32,
    motion_state: AtomicU8,
    cycle_count: AtomicU64,
    wkc_shortfalls: AtomicU64,
    command: CommandCell,
}

impl SharedContext {
    pub fn new() -> Self {
        Self::default()
    }

    // ── Shutdown flag (either side may set, both observe) ──

    pub fn request_shutdown(&self) {
        self.shutdown.store(true, Ordering::Release);
    }

    #[inline]
    pub fn shutdown_requested(&self) -> bool {
        self.shutdown.load(Ordering::Acquire)
    }

    // ── Supervisor side ──

    /// Submit a motion command for adoption on the next cycle.
    ///
    /// Invalid limits are rejected here, before any profiler state can be
    /// touched - never silently clamped.
    pub fn submit(&self, command: MotionCommand) -> Result<(), CommandError> {
        command.validate()?;
        let cell = &self.command;
        match command {
            MotionCommand::Move {
                target,
                max_velocity,
                acceleration,
            } => {
                cell.target.store(target, Ordering::Relaxed);
                cell.max_velocity_bits
                    .store(max_velocity.to_bits(), Ordering::Relaxed);
                cell.acceleration_bits
                    .store(acceleration.to_bits(), Ordering::Relaxed);
                cell.kind.store(KIND_MOVE, Ordering::Relaxed);
            }
            MotionCommand::Velocity { target } => {
                cell.velocity_bits.store(target.to_bits(), Ordering::Relaxed);
                cell.kind.store(KIND_VELOCITY, Ordering::Relaxed);
            }
        }
        cell.seq.fetch_add(1, Ordering::Release);
        Ok(())
    }

    /// Record the diagnostic error code looked up after a fault.
    pub fn set_last_error_code(&self, code: u16) {
        self.last_error_code.store(code, Ordering::Relaxed);
    }

    /// Assemble the current view. Fields may be torn across cycles.
    pub fn snapshot(&self) -> StatusSnapshot {
        StatusSnapshot {
            bus_operational: self.bus_operational.load(Ordering::Relaxed),
            drive_operational: self.drive_operational.load(Ordering::Relaxed),
            fault: self.fault.load(Ordering::Relaxed),
            status_word: self.status_word.load(Ordering::Relaxed),
            control_word: self.control_word.load(Ordering::Relaxed),
            last_error_code: self.last_error_code.load(Ordering::Relaxed),
            actual_position: self.actual_position.load(Ordering::Relaxed),
            actual_velocity: self.actual_velocity.load(Ordering::Relaxed),
            motion_state: MotionState::from_u8(self.motion_state.load(Ordering::Relaxed))
                .unwrap_or_default(),
            cycle_count: self.cycle_count.load(Ordering::Relaxed),
            wkc_shortfalls: self.wkc_shortfalls.load(Ordering::Relaxed),
        }
    }

    // ── Real-time side ──

    /// Adopt a newly submitted command, if any.
    ///
    /// `last_seq` is the caller's adoption cursor; it is advanced on every
    /// observed submission so each command is adopted exactly once.
    pub fn take_command(&self, last_seq: &mut u32) -> Option<MotionCommand> {
        let cell = &self.command;
        let seq = cell.seq.load(Ordering::Acquire);
        if seq == *last_seq {
            return None;
        }
        *last_seq = seq;
        match cell.kind.load(Ordering::Relaxed) {
            KIND_MOVE => Some(MotionCommand::Move {
                target: cell.target.load(Ordering::Relaxed),
                max_velocity: f64::from_bits(cell.max_velocity_bits.load(Ordering::Relaxed)),
                acceleration: f64::from_bits(cell.acceleration_bits.load(Ordering::Relaxed)),
            }),
            KIND_VELOCITY => Some(MotionCommand::Velocity {
                target: f64::from_bits(cell.velocity_bits.load(Ordering::Relaxed)),
            }),
            _ => None,
        }
    }

    /// Publish the end-of-cycle status. Writes every snapshot field except
    /// `last_error_code`, which the supervisor owns.
    pub fn publish(&self, snapshot: &StatusSnapshot) {
        self.bus_operational
            .store(snapshot.bus_operational, Ordering::Relaxed);
        self.drive_operational
            .store(snapshot.drive_operational, Ordering::Relaxed);
        self.fault.store(snapshot.fault, Ordering::Relaxed);
        self.status_word
            .store(snapshot.status_word, Ordering::Relaxed);
        self.control_word
            .store(snapshot.control_word, Ordering::Relaxed);
        self.actual_position
            .store(snapshot.actual_position, Ordering::Relaxed);
        self.actual_velocity
            .store(snapshot.actual_velocity, Ordering::Relaxed);
        self.motion_state
            .store(snapshot.motion_state as u8, Ordering::Relaxed);
        self.cycle_count
            .store(snapshot.cycle_count, Ordering::Relaxed);
        self.wkc_shortfalls
            .store(snapshot.wkc_shortfalls, Ordering::Release);
    }
}

// ─── Tests ──────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn submit_then_take() {
        let ctx = SharedContext::new();
        let mut cursor = 0u32;
        assert_eq!(ctx.take_command(&mut cursor), None);

        let cmd = MotionCommand::Move {
            target: 2_097_152,
            max_velocity: 1_048_576.0,
            acceleration: 2_097_152.0,
        };
        ctx.submit(cmd).unwrap();
        assert_eq!(ctx.take_command(&mut cursor), Some(cmd));
        // Adopted exactly once.
        assert_eq!(ctx.take_command(&mut cursor), None);
    }

    #[test]
    fn zero_acceleration_rejected_before_adoption() {
        let ctx = SharedContext::new();
        let mut cursor = 0u32;
        let err = ctx
            .submit(MotionCommand::Move {
                target: 1000,
                max_velocity: 100.0,
                acceleration: 0.0,
            })
            .unwrap_err();
        assert_eq!(err, CommandError::InvalidAcceleration(0.0));
        // Nothing reached the cell.
        assert_eq!(ctx.take_command(&mut cursor), None);
    }

    #[test]
    fn negative_acceleration_rejected() {
        let cmd = MotionCommand::Move {
            target: 0,
            max_velocity: 100.0,
            acceleration: -10.0,
        };
        assert!(matches!(
            cmd.validate(),
            Err(CommandError::InvalidAcceleration(_))
        ));
    }

    #[test]
    fn non_finite_velocity_setpoint_rejected() {
        let cmd = MotionCommand::Velocity { target: f64::NAN };
        assert!(matches!(cmd.validate(), Err(CommandError::InvalidVelocity(_))));
    }

    #[test]
    fn resubmission_overrides() {
        let ctx = SharedContext::new();
        let mut cursor = 0u32;
        ctx.submit(MotionCommand::Velocity { target: 10.0 }).unwrap();
        ctx.submit(MotionCommand::Velocity { target: 20.0 }).unwrap();
        // Only the latest command is visible.
        assert_eq!(
            ctx.take_command(&mut cursor),
            Some(MotionCommand::Velocity { target: 20.0 })
        );
        assert_eq!(ctx.take_command(&mut cursor), None);
    }

    #[test]
    fn publish_round_trip_preserves_error_code() {
        let ctx = SharedContext::new();
        ctx.set_last_error_code(0x7500);
        let published = StatusSnapshot {
            bus_operational: true,
            drive_operational: true,
            status_word: 0x0027,
            actual_position: -42,
            motion_state: MotionState::Cruising,
            cycle_count: 99,
            ..Default::default()
        };
        ctx.publish(&published);
        let seen = ctx.snapshot();
        assert!(seen.bus_operational && seen.drive_operational);
        assert_eq!(seen.status_word, 0x0027);
        assert_eq!(seen.actual_position, -42);
        assert_eq!(seen.motion_state, MotionState::Cruising);
        assert_eq!(seen.cycle_count, 99);
        // Supervisor-owned field untouched by publish.
        assert_eq!(seen.last_error_code, 0x7500);
    }

    #[test]
    fn shutdown_flag() {
        let ctx = SharedContext::new();
        assert!(!ctx.shutdown_requested());
        ctx.request_shutdown();
        assert!(ctx.shutdown_requested());
    }
}
