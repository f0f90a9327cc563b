//! Deterministic real-time cycle: exchange → state derivation → setpoint →
//! publish.
//!
//! ## RT setup sequence
//! 1. `mlockall(MCL_CURRENT | MCL_FUTURE)` — lock all pages.
//! 2. Prefault stack pages.
//! 3. `sched_setaffinity` — pin to the configured core.
//! 4. `sched_setscheduler(SCHED_FIFO, priority)`.
//!
//! ## Pacing
//! The next absolute wake time is the previous wake time plus the fixed
//! period (never "now + period"), so scheduling jitter does not accumulate
//! as drift. With the `rt` feature the sleep is
//! `clock_nanosleep(TIMER_ABSTIME)` on `CLOCK_MONOTONIC`; the simulation
//! fallback sleeps until the same absolute `Instant`.
//!
//! ## Cycle body
//! One synchronous bus exchange per tick, then strictly sequential
//! non-blocking work: working-counter supervision, bus readiness, CiA 402
//! drive machine, motion profiler, snapshot publication. The sleep before
//! the exchange is the only suspension point; a working-counter shortfall is
//! a counted soft fault, never an abort. Shutdown is cooperative and only
//! honored at cycle boundaries.

use std::sync::Arc;
use std::time::Duration;

use heapless::HistoryBuffer;
use tracing::{debug, info, warn};

use axon_common::bus::BusLayer;
use axon_common::cia402::{DriveState, OperationMode};
use axon_common::pdo::ProcessDataOut;
use axon_common::shared::{MotionCommand, MotionState, SharedContext, StatusSnapshot};

use crate::bus::monitor::BusMonitor;
use crate::config::ControllerConfig;
use crate::error::ControlError;
use crate::state::drive::DriveCommander;
use crate::state::profile::TrapezoidProfile;

/// Cycle numbers of the most recent working-counter shortfalls, kept for the
/// shutdown diagnostic dump without allocating in the loop.
const SHORTFALL_RING: usize = 8;

// ─── Cycle Statistics ───────────────────────────────────────────────

/// O(1) per-cycle timing statistics, updated without allocation.
#[derive(Debug, Clone)]
pub struct CycleStats {
    /// Total cycles executed.
    pub cycle_count: u64,
    /// Last cycle duration [ns].
    pub last_cycle_ns: i64,
    /// Minimum cycle duration [ns].
    pub min_cycle_ns: i64,
    /// Maximum cycle duration [ns].
    pub max_cycle_ns: i64,
    /// Running sum for average computation.
    pub sum_cycle_ns: i64,
    /// Number of cycles whose body exceeded the period.
    pub overruns: u64,
    /// Maximum wake-up latency [ns].
    pub max_latency_ns: i64,
}

impl CycleStats {
    pub const fn new() -> Self {
        Self {
            cycle_count: 0,
            last_cycle_ns: 0,
            min_cycle_ns: i64::MAX,
            max_cycle_ns: 0,
            sum_cycle_ns: 0,
            overruns: 0,
            max_latency_ns: 0,
        }
    }

    /// Record a cycle duration. O(1), no allocation.
    #[inline]
    pub fn record(&mut self, duration_ns: i64, latency_ns: i64) {
        self.cycle_count += 1;
        self.last_cycle_ns = duration_ns;
        if duration_ns < self.min_cycle_ns {
            self.min_cycle_ns = duration_ns;
        }
        if duration_ns > self.max_cycle_ns {
            self.max_cycle_ns = duration_ns;
        }
        self.sum_cycle_ns += duration_ns;
        if latency_ns > self.max_latency_ns {
            self.max_latency_ns = latency_ns;
        }
    }

    /// Average cycle time [ns] (0 if no cycles).
    #[inline]
    pub fn avg_cycle_ns(&self) -> i64 {
        if self.cycle_count == 0 {
            0
        } else {
            self.sum_cycle_ns / self.cycle_count as i64
        }
    }
}

impl Default for CycleStats {
    fn default() -> Self {
        Self::new()
    }
}

// ─── RT Setup ───────────────────────────────────────────────────────

/// Lock all current and future memory pages.
///
/// No-op when the `rt` feature is not enabled.
#[cfg(feature = "rt")]
fn rt_mlockall() -> Result<(), ControlError> {
    use nix::sys::mman::{MlockAllFlags, mlockall};
    mlockall(MlockAllFlags::MCL_CURRENT | MlockAllFlags::MCL_FUTURE)
        .map_err(|e| ControlError::RtSetup(format!("mlockall failed: {e}")))?;
    Ok(())
}

#[cfg(not(feature = "rt"))]
fn rt_mlockall() -> Result<(), ControlError> {
    Ok(()) // No-op in simulation mode
}

/// Prefault stack pages so the loop never page-faults.
fn prefault_stack() {
    let mut buf = [0u8; 256 * 1024];
    for byte in buf.iter_mut() {
        unsafe { core::ptr::write_volatile(byte, 0xFF) };
    }
    core::hint::black_box(&buf);
}

/// Pin the current thread to a CPU core.
#[cfg(feature = "rt")]
fn rt_set_affinity(cpu: usize) -> Result<(), ControlError> {
    use nix::sched::{CpuSet, sched_setaffinity};
    use nix::unistd::Pid;

    let mut cpuset = CpuSet::new();
    cpuset
        .set(cpu)
        .map_err(|e| ControlError::RtSetup(format!("CpuSet::set({cpu}) failed: {e}")))?;
    sched_setaffinity(Pid::from_raw(0), &cpuset)
        .map_err(|e| ControlError::RtSetup(format!("sched_setaffinity failed: {e}")))?;
    Ok(())
}

#[cfg(not(feature = "rt"))]
fn rt_set_affinity(_cpu: usize) -> Result<(), ControlError> {
    Ok(())
}

/// Set SCHED_FIFO with the given priority.
#[cfg(feature = "rt")]
fn rt_set_scheduler(priority: i32) -> Result<(), ControlError> {
    let param = libc::sched_param {
        sched_priority: priority,
    };
    let ret = unsafe { libc::sched_setscheduler(0, libc::SCHED_FIFO, &param) };
    if ret != 0 {
        let err = std::io::Error::last_os_error();
        return Err(ControlError::RtSetup(format!(
            "sched_setscheduler(SCHED_FIFO, {priority}) failed: {err}"
        )));
    }
    Ok(())
}

#[cfg(not(feature = "rt"))]
fn rt_set_scheduler(_priority: i32) -> Result<(), ControlError> {
    Ok(())
}

/// Full RT setup; call from the cyclic thread before entering the loop.
pub fn rt_setup(cpu_core: usize, rt_priority: i32) -> Result<(), ControlError> {
    rt_mlockall()?;
    prefault_stack();
    rt_set_affinity(cpu_core)?;
    rt_set_scheduler(rt_priority)?;
    Ok(())
}

// ─── Cycle Runner ───────────────────────────────────────────────────

/// Owns everything the cyclic thread touches: the bus handle, the readiness
/// monitor, the drive commander, the profiler, and the output record.
pub struct CycleRunner {
    bus: Arc<dyn BusLayer>,
    shared: Arc<SharedContext>,
    monitor: BusMonitor,
    commander: DriveCommander,
    profiler: TrapezoidProfile,
    output: ProcessDataOut,
    mode: OperationMode,
    velocity_setpoint: f64,
    command_cursor: u32,
    expected_wkc: u16,
    cycle_time: Duration,
    cycle_time_s: f64,
    cycles: u64,
    wkc_shortfalls: u64,
    wkc_low: bool,
    shortfall_cycles: HistoryBuffer<u64, SHORTFALL_RING>,
    pub stats: CycleStats,
}

impl CycleRunner {
    pub fn new(
        bus: Arc<dyn BusLayer>,
        shared: Arc<SharedContext>,
        config: &ControllerConfig,
        mode: OperationMode,
    ) -> Self {
        let output = ProcessDataOut {
            // Fixed for the life of the run; also configured via SDO before
            // the bus goes operational.
            mode_of_operation: mode as i8,
            ..ProcessDataOut::default()
        };
        let expected_wkc = bus.expected_working_counter();
        Self {
            bus,
            shared,
            monitor: BusMonitor::new(),
            commander: DriveCommander::new(),
            profiler: TrapezoidProfile::new(config.profile_config()),
            output,
            mode,
            velocity_setpoint: 0.0,
            command_cursor: 0,
            expected_wkc,
            cycle_time: config.cycle_time(),
            cycle_time_s: config.cycle_time_s(),
            cycles: 0,
            wkc_shortfalls: 0,
            wkc_low: false,
            shortfall_cycles: HistoryBuffer::new(),
            stats: CycleStats::new(),
        }
    }

    /// Enter the cyclic loop until shutdown is requested or a fatal error
    /// occurs. Fatal exits set the shared shutdown flag themselves.
    pub fn run(&mut self) -> Result<(), ControlError> {
        info!(
            backend = self.bus.name(),
            period_us = self.cycle_time.as_micros() as u64,
            "entering cyclic loop"
        );
        let result = self.run_loop();
        if result.is_err() {
            self.shared.request_shutdown();
        }
        let recent: heapless::Vec<u64, SHORTFALL_RING> =
            self.shortfall_cycles.oldest_ordered().copied().collect();
        debug!(
            cycles = self.stats.cycle_count,
            avg_ns = self.stats.avg_cycle_ns(),
            max_ns = self.stats.max_cycle_ns,
            overruns = self.stats.overruns,
            wkc_shortfalls = self.wkc_shortfalls,
            recent_shortfall_cycles = ?recent,
            "cyclic loop exited"
        );
        result
    }

    #[cfg(not(feature = "rt"))]
    fn run_loop(&mut self) -> Result<(), ControlError> {
        use std::time::Instant;

        let period = self.cycle_time;
        let mut next_wake = Instant::now();
        loop {
            // Absolute accumulation: period added to the previous wake time.
            next_wake += period;
            if let Some(remaining) = next_wake.checked_duration_since(Instant::now()) {
                std::thread::sleep(remaining);
            }
            let late = Instant::now().saturating_duration_since(next_wake);

            let started = Instant::now();
            self.cycle_body()?;
            let duration = started.elapsed();

            self.stats
                .record(duration.as_nanos() as i64, late.as_nanos() as i64);
            if duration > period {
                self.stats.overruns += 1;
            }

            // Checked once per iteration; the in-flight cycle has completed.
            if self.shared.shutdown_requested() {
                return Ok(());
            }
        }
    }

    #[cfg(feature = "rt")]
    fn run_loop(&mut self) -> Result<(), ControlError> {
        use nix::time::{ClockId, clock_gettime};

        let clock = ClockId::CLOCK_MONOTONIC;
        let period_ns = self.cycle_time.as_nanos() as i64;
        let mut next_wake = clock_gettime(clock)
            .map_err(|e| ControlError::RtSetup(format!("clock_gettime: {e}")))?;

        loop {
            next_wake = timespec_add_ns(next_wake, period_ns);
            sleep_until(clock, &next_wake);
            let woke = clock_gettime(clock)
                .map_err(|e| ControlError::RtSetup(format!("clock_gettime: {e}")))?;
            let latency_ns = timespec_diff_ns(&woke, &next_wake).max(0);

            self.cycle_body()?;

            let done = clock_gettime(clock)
                .map_err(|e| ControlError::RtSetup(format!("clock_gettime: {e}")))?;
            let duration_ns = timespec_diff_ns(&done, &woke);
            self.stats.record(duration_ns, latency_ns);
            if duration_ns > period_ns {
                self.stats.overruns += 1;
            }

            if self.shared.shutdown_requested() {
                return Ok(());
            }
        }
    }

    /// One cycle: exchange → readiness → drive machine → setpoint → publish.
    ///
    /// Strictly sequential and non-blocking; the only suspension points are
    /// the scheduler sleep before this runs and the bounded-timeout exchange
    /// inside the bus layer.
    pub fn cycle_body(&mut self) -> Result<(), ControlError> {
        let exchange = self.bus.exchange(&self.output)?;
        let input = exchange.input;

        // Working-counter supervision: a shortfall on an operational bus is
        // a soft communication fault. Count it, remember when, continue.
        if self.monitor.is_operational() {
            if exchange.working_counter < self.expected_wkc {
                self.wkc_shortfalls += 1;
                self.shortfall_cycles.write(self.cycles);
                if !self.wkc_low {
                    warn!(
                        observed = exchange.working_counter,
                        expected = self.expected_wkc,
                        "working counter below expected"
                    );
                    self.wkc_low = true;
                }
            } else {
                self.wkc_low = false;
            }
        }

        if !self.monitor.is_operational() {
            if let Err(err) = self.monitor.poll(self.bus.as_ref()) {
                self.shared.request_shutdown();
                return Err(err.into());
            }
        }

        let mut fault = false;
        if self.monitor.is_operational() {
            let update = self.commander.update(input.status_word);
            fault = update.state == DriveState::Fault;
            self.output.control_word = update.control_word.bits();

            if update.state != DriveState::OperationEnabled {
                // Hold the target on the measured position so enabling the
                // drive cannot command a jump.
                self.output.target_position = input.actual_position;
                self.output.target_velocity = 0;
            } else {
                if update.newly_enabled {
                    self.profiler.sync_to(input.actual_position);
                    self.velocity_setpoint = 0.0;
                    self.output.target_position = input.actual_position;
                    info!(
                        origin = { input.actual_position },
                        "drive operation enabled"
                    );
                }

                if let Some(command) = self.shared.take_command(&mut self.command_cursor) {
                    self.adopt(command);
                }

                match self.mode {
                    OperationMode::CyclicSynchronousPosition => {
                        let target = self.profiler.step(self.cycle_time_s);
                        self.output.target_position = target as i32;
                    }
                    OperationMode::CyclicSynchronousVelocity => {
                        self.output.target_velocity = self.velocity_setpoint as i32;
                    }
                }
            }
        }

        self.cycles += 1;
        self.shared.publish(&StatusSnapshot {
            bus_operational: self.monitor.is_operational(),
            drive_operational: self.commander.is_enabled(),
            fault,
            status_word: input.status_word,
            control_word: self.output.control_word,
            last_error_code: 0, // supervisor-owned; ignored by publish
            actual_position: input.actual_position,
            actual_velocity: input.actual_velocity,
            motion_state: self.motion_state(),
            cycle_count: self.cycles,
            wkc_shortfalls: self.wkc_shortfalls,
        });
        Ok(())
    }

    fn motion_state(&self) -> MotionState {
        match self.mode {
            OperationMode::CyclicSynchronousPosition => self.profiler.state(),
            // Velocity operation bypasses the profiler.
            OperationMode::CyclicSynchronousVelocity => MotionState::Idle,
        }
    }

    fn adopt(&mut self, command: MotionCommand) {
        match (self.mode, command) {
            (
                OperationMode::CyclicSynchronousPosition,
                MotionCommand::Move {
                    target,
                    max_velocity,
                    acceleration,
                },
            ) => {
                self.profiler.load(target, max_velocity, acceleration);
                // New setpoint: toggle the ack bit for this cycle's word.
                self.commander.toggle_setpoint_ack();
                self.output.control_word = self.commander.control_word().bits();
                info!(goal = target, max_velocity, acceleration, "move adopted");
            }
            (OperationMode::CyclicSynchronousVelocity, MotionCommand::Velocity { target }) => {
                self.velocity_setpoint = target;
                info!(setpoint = target, "velocity setpoint adopted");
            }
            (mode, command) => {
                warn!(?mode, ?command, "command does not match operation mode; ignored");
            }
        }
    }
}

// ─── Time Helpers ───────────────────────────────────────────────────

#[cfg(feature = "rt")]
fn sleep_until(clock: nix::time::ClockId, deadline: &nix::sys::time::TimeSpec) {
    use nix::time::{ClockNanosleepFlags, clock_nanosleep};
    // TIMER_ABSTIME: an interrupted sleep re-targets the same absolute
    // deadline, so signals cannot stretch the period.
    let _ = clock_nanosleep(clock, ClockNanosleepFlags::TIMER_ABSTIME, deadline);
}

/// Add nanoseconds to a TimeSpec.
#[cfg(feature = "rt")]
fn timespec_add_ns(ts: nix::sys::time::TimeSpec, ns: i64) -> nix::sys::time::TimeSpec {
    use nix::sys::time::TimeSpec;
    let mut secs = ts.tv_sec();
    let mut nanos = ts.tv_nsec() + ns;
    while nanos >= 1_000_000_000 {
        secs += 1;
        nanos -= 1_000_000_000;
    }
    while nanos < 0 {
        secs -= 1;
        nanos += 1_000_000_000;
    }
    TimeSpec::new(secs, nanos)
}

/// Difference (a - b) in nanoseconds.
#[cfg(feature = "rt")]
fn timespec_diff_ns(a: &nix::sys::time::TimeSpec, b: &nix::sys::time::TimeSpec) -> i64 {
    (a.tv_sec() - b.tv_sec()) * 1_000_000_000 + (a.tv_nsec() - b.tv_nsec())
}

// ─── Tests ──────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cycle_stats_basic() {
        let mut stats = CycleStats::new();
        assert_eq!(stats.cycle_count, 0);
        assert_eq!(stats.avg_cycle_ns(), 0);

        stats.record(500_000, 1_000);
        assert_eq!(stats.cycle_count, 1);
        assert_eq!(stats.min_cycle_ns, 500_000);
        assert_eq!(stats.max_cycle_ns, 500_000);
        assert_eq!(stats.max_latency_ns, 1_000);
        assert_eq!(stats.avg_cycle_ns(), 500_000);

        stats.record(600_000, 500);
        assert_eq!(stats.min_cycle_ns, 500_000);
        assert_eq!(stats.max_cycle_ns, 600_000);
        assert_eq!(stats.max_latency_ns, 1_000);
        assert_eq!(stats.avg_cycle_ns(), 550_000);
    }

    #[test]
    fn rt_setup_without_rt_feature_is_noop() {
        #[cfg(not(feature = "rt"))]
        {
            assert!(rt_setup(0, 80).is_ok());
        }
    }
}
