//! Supervisory task: startup sequencing, command submission, diagnostics.
//!
//! Everything with unbounded latency lives here, out of the cyclic path:
//! the pre-loop SDO configuration, the startup-timeout policy, the fault
//! error-code lookup, and periodic human-readable status. The supervisor
//! talks to the cyclic thread exclusively through the shared context.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use axon_common::bus::{BusError, BusLayer, BusState};
use axon_common::cia402::{OperationMode, StatusWord, objects};
use axon_common::shared::{MotionCommand, MotionState, SharedContext};
use axon_common::units::UnitScale;

use crate::config::ControllerConfig;
use crate::error::ControlError;

/// How often the supervisor wakes to poll the snapshot.
const POLL_INTERVAL: Duration = Duration::from_millis(20);
/// How often a status line is rendered while running.
const RENDER_INTERVAL: Duration = Duration::from_millis(500);

pub struct Supervisor {
    bus: Arc<dyn BusLayer>,
    shared: Arc<SharedContext>,
    scale: UnitScale,
    startup_timeout: Duration,
}

impl Supervisor {
    pub fn new(
        bus: Arc<dyn BusLayer>,
        shared: Arc<SharedContext>,
        config: &ControllerConfig,
    ) -> Self {
        Self {
            bus,
            shared,
            scale: config.unit_scale(),
            startup_timeout: config.startup_timeout(),
        }
    }

    /// Pre-loop drive configuration: set the mode of operation via SDO and
    /// bring the bus to SafeOperational. Both failures are fatal before the
    /// real-time loop ever starts.
    pub fn configure_drive(&self, mode: OperationMode) -> Result<(), ControlError> {
        self.bus
            .sdo_write(objects::MODE_OF_OPERATION, 0, &[(mode as i8) as u8])
            .map_err(|source| ControlError::ModeConfiguration { mode, source })?;
        info!(?mode, "mode of operation configured");

        self.bus.request_state(BusState::SafeOperational)?;
        self.await_bus_state(BusState::SafeOperational)?;
        info!("bus reached SafeOperational");
        Ok(())
    }

    /// Read the vendor driver-status object (diagnostic probe).
    pub fn probe_driver_status(&self) -> Result<u16, BusError> {
        self.bus
            .sdo_read_u16(objects::DIAGNOSTIC, objects::DIAGNOSTIC_DRIVER_STATUS)
    }

    /// Supervise a run: wait for the controller to come up, submit the
    /// motion command, then watch until completion or shutdown.
    pub fn run(&self, command: MotionCommand) -> Result<(), ControlError> {
        self.wait_until_operational()?;
        if self.shared.shutdown_requested() {
            return Ok(());
        }

        self.shared.submit(command)?;
        info!(?command, "motion command submitted");

        let mut move_active_seen = false;
        let mut fault_recorded = false;
        let mut last_render = Instant::now() - RENDER_INTERVAL;

        while !self.shared.shutdown_requested() {
            let snapshot = self.shared.snapshot();

            if snapshot.fault {
                self.record_fault_code(&mut fault_recorded);
            } else {
                fault_recorded = false;
            }

            if last_render.elapsed() >= RENDER_INTERVAL {
                let position_deg = self.scale.counts_to_degrees(snapshot.actual_position as f64);
                let velocity_dps = self.scale.counts_to_degrees(snapshot.actual_velocity as f64);
                let status = StatusWord::from_bits_retain(snapshot.status_word);
                info!(
                    position_deg,
                    velocity_dps,
                    state = ?snapshot.motion_state,
                    status = ?status,
                    "axis status"
                );
                last_render = Instant::now();
            }

            if let MotionCommand::Move { .. } = command {
                if snapshot.motion_state != MotionState::Idle {
                    move_active_seen = true;
                } else if move_active_seen {
                    info!(
                        position = snapshot.actual_position,
                        "target reached, motion complete"
                    );
                    break;
                }
            }

            std::thread::sleep(POLL_INTERVAL);
        }
        Ok(())
    }

    /// Startup budget: the bus must come up and the drive must enable within
    /// the configured timeout, otherwise the run is declared failed with
    /// enough context for offline diagnosis.
    fn wait_until_operational(&self) -> Result<(), ControlError> {
        let deadline = Instant::now() + self.startup_timeout;
        let mut fault_recorded = false;

        loop {
            if self.shared.shutdown_requested() {
                // The cyclic thread (or the operator) aborted; it reports
                // its own error.
                return Ok(());
            }
            let snapshot = self.shared.snapshot();
            if snapshot.bus_operational && snapshot.drive_operational {
                info!("bus and drive operational");
                return Ok(());
            }
            if snapshot.fault {
                self.record_fault_code(&mut fault_recorded);
            }
            if Instant::now() >= deadline {
                let snapshot = self.shared.snapshot();
                return Err(ControlError::StartupTimeout {
                    timeout_ms: self.startup_timeout.as_millis() as u64,
                    fault: snapshot.fault,
                    status_word: snapshot.status_word,
                    control_word: snapshot.control_word,
                    error_code: snapshot.last_error_code,
                });
            }
            std::thread::sleep(POLL_INTERVAL);
        }
    }

    fn await_bus_state(&self, target: BusState) -> Result<(), ControlError> {
        let deadline = Instant::now() + self.startup_timeout;
        loop {
            let observed = self.bus.read_state()?;
            if observed == target {
                return Ok(());
            }
            if observed == BusState::Error {
                return Err(BusError::Hardware {
                    al_status: self.bus.al_status_code(),
                }
                .into());
            }
            if Instant::now() >= deadline {
                return Err(ControlError::StateTransitionTimeout {
                    target,
                    observed,
                    timeout_ms: self.startup_timeout.as_millis() as u64,
                });
            }
            std::thread::sleep(Duration::from_millis(10));
        }
    }

    /// Look up the diagnostic error code once per fault episode. A failed
    /// read is soft: logged, retried on the next poll.
    fn record_fault_code(&self, recorded: &mut bool) {
        if *recorded {
            return;
        }
        match self
            .bus
            .sdo_read_u16(objects::DIAGNOSTIC, objects::DIAGNOSTIC_LAST_ERROR)
        {
            Ok(code) => {
                self.shared.set_last_error_code(code);
                warn!("drive fault, error code 0x{code:04X}");
                *recorded = true;
            }
            Err(err) => debug!("diagnostic read failed: {err}"),
        }
    }
}
