//! Simulated drive + bus backend.
//!
//! Stands in for the EtherCAT master during tests and `--sim` runs: models
//! the slave state machine with configurable transition latency, distributed
//! clock sync after a number of cyclic exchanges, a CiA 402 drive that walks
//! its power state machine in response to control words, and first-order
//! position tracking of the commanded target. Fault and bus-error injection
//! hooks drive the failure-path tests.

use std::sync::Mutex;

use axon_common::bus::{BusError, BusLayer, BusState, Exchange};
use axon_common::cia402::objects;
use axon_common::pdo::{ProcessDataIn, ProcessDataOut};

/// Tunables for the simulated bus and drive.
#[derive(Debug, Clone)]
pub struct SimConfig {
    /// Slave state after the (out-of-scope) discovery/configuration phase.
    pub initial_state: BusState,
    /// Ticks a requested state transition takes to complete.
    pub transition_ticks: u32,
    /// Cyclic exchanges until distributed clocks report synchronized.
    pub sync_after_ticks: u64,
    /// Exchanges until the drive leaves NotReady after power-up.
    pub drive_boot_ticks: u32,
    /// Consecutive fault-reset cycles needed to clear an injected fault.
    pub fault_reset_ticks: u32,
    /// Healthy working counter for a full exchange.
    pub expected_wkc: u16,
    /// Cycle period used to derive the reported actual velocity [s].
    pub cycle_time_s: f64,
    /// First-order position tracking gain per cycle (0..=1].
    pub tracking_gain: f64,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            initial_state: BusState::PreOperational,
            transition_ticks: 2,
            sync_after_ticks: 5,
            drive_boot_ticks: 2,
            fault_reset_ticks: 3,
            expected_wkc: 3,
            cycle_time_s: 0.002,
            tracking_gain: 0.5,
        }
    }
}

// CiA 402 status patterns the model moves between.
const STATUS_NOT_READY: u16 = 0x0000;
const STATUS_SWITCH_ON_DISABLED: u16 = 0x0040;
const STATUS_READY_TO_SWITCH_ON: u16 = 0x0021;
const STATUS_SWITCHED_ON: u16 = 0x0023;
const STATUS_OPERATION_ENABLED: u16 = 0x0027;
const STATUS_FAULT: u16 = 0x0008;

#[derive(Debug)]
struct DriveModel {
    status: u16,
    boot_ticks_left: u32,
    fault: bool,
    fault_code: u16,
    reset_progress: u32,
    position: f64,
    velocity: f64,
    mode: i8,
    driver_status: u16,
}

impl DriveModel {
    fn new(boot_ticks: u32) -> Self {
        Self {
            status: STATUS_NOT_READY,
            boot_ticks_left: boot_ticks,
            fault: false,
            fault_code: 0,
            reset_progress: 0,
            position: 0.0,
            velocity: 0.0,
            mode: 0,
            driver_status: 0x0001,
        }
    }

    /// Walk the power state machine one cycle for the given control word.
    fn react(&mut self, control_word: u16, reset_ticks: u32) {
        if self.boot_ticks_left > 0 {
            self.boot_ticks_left -= 1;
            if self.boot_ticks_left == 0 {
                self.status = STATUS_SWITCH_ON_DISABLED;
            }
            return;
        }

        if self.fault {
            self.status = STATUS_FAULT;
            if control_word & 0x0080 != 0 {
                self.reset_progress += 1;
                if self.reset_progress >= reset_ticks {
                    self.fault = false;
                    self.reset_progress = 0;
                    self.status = STATUS_SWITCH_ON_DISABLED;
                }
            } else {
                self.reset_progress = 0;
            }
            return;
        }

        // Mode-specific bits (setpoint ack among them) do not affect the
        // power state machine.
        let command = control_word & 0x008F;
        self.status = match (self.status, command) {
            (STATUS_SWITCH_ON_DISABLED, 0x0006) => STATUS_READY_TO_SWITCH_ON,
            (STATUS_READY_TO_SWITCH_ON, 0x0007) => STATUS_SWITCHED_ON,
            (STATUS_SWITCHED_ON, 0x000F) => STATUS_OPERATION_ENABLED,
            (STATUS_OPERATION_ENABLED, 0x000F) => STATUS_OPERATION_ENABLED,
            (STATUS_OPERATION_ENABLED, 0x0007) => STATUS_SWITCHED_ON,
            (_, 0x0006) => STATUS_READY_TO_SWITCH_ON,
            (status, _) => status,
        };
    }

    /// Track the commanded target while operation is enabled.
    fn follow(&mut self, output: &ProcessDataOut, gain: f64, dt: f64) {
        if self.status != STATUS_OPERATION_ENABLED {
            self.velocity = 0.0;
            return;
        }
        match self.mode {
            9 => {
                self.velocity = { output.target_velocity } as f64;
                self.position += self.velocity * dt;
            }
            _ => {
                let target = { output.target_position } as f64;
                let step = (target - self.position) * gain;
                self.position += step;
                self.velocity = step / dt;
            }
        }
    }

    fn input(&self, target_position: i32) -> ProcessDataIn {
        ProcessDataIn {
            status_word: self.status,
            actual_position: self.position as i32,
            actual_velocity: self.velocity as i32,
            actual_torque: 0,
            following_error: target_position.wrapping_sub(self.position as i32),
            mode_of_operation_display: self.mode,
            touch_probe_status: 0,
            touch_probe_position: 0,
        }
    }
}

#[derive(Debug)]
struct SimState {
    bus_state: BusState,
    pending: Option<(BusState, u32)>,
    al_status: u16,
    exchanges: u64,
    state_requests: u32,
    wkc_drop: u32,
    fail_sdo_writes: bool,
    drive: DriveModel,
}

/// The simulated backend. Interior mutability keeps the trait object usable
/// from both threads; every lock section is short and bounded.
#[derive(Debug)]
pub struct SimBus {
    config: SimConfig,
    state: Mutex<SimState>,
}

impl SimBus {
    pub fn new(config: SimConfig) -> Self {
        let state = SimState {
            bus_state: config.initial_state,
            pending: None,
            al_status: 0,
            exchanges: 0,
            state_requests: 0,
            wkc_drop: 0,
            fail_sdo_writes: false,
            drive: DriveModel::new(config.drive_boot_ticks),
        };
        Self {
            config,
            state: Mutex::new(state),
        }
    }

    fn locked(&self) -> std::sync::MutexGuard<'_, SimState> {
        self.state.lock().expect("sim state poisoned")
    }

    fn advance_bus(state: &mut SimState) {
        if state.bus_state == BusState::Error {
            return;
        }
        if let Some((target, ticks_left)) = state.pending {
            if ticks_left <= 1 {
                state.bus_state = target;
                state.pending = None;
            } else {
                state.pending = Some((target, ticks_left - 1));
            }
        }
    }

    // ── Test / fault-injection hooks ──

    /// Put the drive into the fault state with the given error code.
    pub fn inject_fault(&self, code: u16) {
        let mut state = self.locked();
        state.drive.fault = true;
        state.drive.fault_code = code;
        state.drive.status = STATUS_FAULT;
    }

    /// Put the slave into the hardware error state.
    pub fn inject_bus_error(&self, al_status: u16) {
        let mut state = self.locked();
        state.bus_state = BusState::Error;
        state.al_status = al_status;
        state.pending = None;
    }

    /// Return a short working counter for the next `cycles` exchanges.
    pub fn drop_working_counter(&self, cycles: u32) {
        self.locked().wkc_drop = cycles;
    }

    /// Make subsequent SDO writes fail.
    pub fn fail_sdo_writes(&self, fail: bool) {
        self.locked().fail_sdo_writes = fail;
    }

    /// Number of state-transition requests observed.
    pub fn state_requests(&self) -> u32 {
        self.locked().state_requests
    }

    /// Drive-side actual position [counts].
    pub fn actual_position(&self) -> f64 {
        self.locked().drive.position
    }

    /// Drive-side mode of operation, as configured via SDO.
    pub fn mode(&self) -> i8 {
        self.locked().drive.mode
    }
}

impl BusLayer for SimBus {
    fn name(&self) -> &'static str {
        "sim"
    }

    fn exchange(&self, output: &ProcessDataOut) -> Result<Exchange, BusError> {
        let mut state = self.locked();
        state.exchanges += 1;
        Self::advance_bus(&mut state);

        // Outputs are only applied once the bus is Operational.
        if state.bus_state == BusState::Operational {
            state.drive.react({ output.control_word }, self.config.fault_reset_ticks);
            let (gain, dt) = (self.config.tracking_gain, self.config.cycle_time_s);
            state.drive.follow(output, gain, dt);
        } else {
            // Outputs ignored; the drive still powers itself up.
            state.drive.react(0, self.config.fault_reset_ticks);
        }

        let working_counter = if state.wkc_drop > 0 {
            state.wkc_drop -= 1;
            0
        } else if state.bus_state == BusState::Operational {
            self.config.expected_wkc
        } else {
            1
        };

        Ok(Exchange {
            input: state.drive.input({ output.target_position }),
            working_counter,
        })
    }

    fn request_state(&self, target: BusState) -> Result<(), BusError> {
        let mut state = self.locked();
        state.state_requests += 1;
        if state.bus_state == BusState::Error {
            return Err(BusError::StateRequest {
                target,
                reason: "slave is in error state".into(),
            });
        }
        state.pending = Some((target, self.config.transition_ticks));
        Ok(())
    }

    fn read_state(&self) -> Result<BusState, BusError> {
        let mut state = self.locked();
        Self::advance_bus(&mut state);
        Ok(state.bus_state)
    }

    fn al_status_code(&self) -> u16 {
        self.locked().al_status
    }

    fn sdo_read(&self, index: u16, sub: u8, buf: &mut [u8]) -> Result<usize, BusError> {
        let state = self.locked();
        let value: u16 = match (index, sub) {
            (objects::DIAGNOSTIC, objects::DIAGNOSTIC_LAST_ERROR) => state.drive.fault_code,
            (objects::DIAGNOSTIC, objects::DIAGNOSTIC_DRIVER_STATUS) => state.drive.driver_status,
            (objects::MODE_OF_OPERATION, 0) => {
                if buf.is_empty() {
                    return Err(BusError::SdoRead {
                        index,
                        sub,
                        reason: "buffer too small".into(),
                    });
                }
                buf[0] = state.drive.mode as u8;
                return Ok(1);
            }
            _ => {
                return Err(BusError::SdoRead {
                    index,
                    sub,
                    reason: "object not in dictionary".into(),
                });
            }
        };
        if buf.len() < 2 {
            return Err(BusError::SdoRead {
                index,
                sub,
                reason: "buffer too small".into(),
            });
        }
        buf[..2].copy_from_slice(&value.to_le_bytes());
        Ok(2)
    }

    fn sdo_write(&self, index: u16, sub: u8, data: &[u8]) -> Result<(), BusError> {
        let mut state = self.locked();
        if state.fail_sdo_writes {
            return Err(BusError::SdoWrite {
                index,
                sub,
                reason: "injected failure".into(),
            });
        }
        match (index, sub) {
            (objects::MODE_OF_OPERATION, 0) if data.len() == 1 => {
                state.drive.mode = data[0] as i8;
                Ok(())
            }
            _ => Err(BusError::SdoWrite {
                index,
                sub,
                reason: "object not writable".into(),
            }),
        }
    }

    fn clock_synchronized(&self) -> bool {
        self.locked().exchanges >= self.config.sync_after_ticks
    }

    fn expected_working_counter(&self) -> u16 {
        self.config.expected_wkc
    }
}

// ─── Tests ──────────────────────────────────────────────────────────
