//! Bus readiness state machine.
//!
//! Walks the bus from its post-configuration state to Operational: wait for
//! distributed-clock sync, issue the Operational request exactly once, then
//! poll the reported slave state until it matches. A reported hardware error
//! state is fatal and is never retried from here - it is reported upward and
//! the caller triggers global shutdown.

use tracing::info;

use axon_common::bus::{BusError, BusLayer, BusState};

/// Readiness phase of the cyclic bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BusPhase {
    /// Distributed clocks not yet synchronized.
    WaitingForClockSync,
    /// Operational requested, waiting for the slave to report it.
    RequestingOperational,
    /// Cyclic outputs are live.
    Operational,
    /// Hardware error observed; terminal.
    Error,
}

#[derive(Debug)]
pub struct BusMonitor {
    phase: BusPhase,
}

impl BusMonitor {
    pub fn new() -> Self {
        Self {
            phase: BusPhase::WaitingForClockSync,
        }
    }

    #[inline]
    pub fn phase(&self) -> BusPhase {
        self.phase
    }

    #[inline]
    pub fn is_operational(&self) -> bool {
        self.phase == BusPhase::Operational
    }

    /// Advance one cycle. Called once per cycle until Operational.
    pub fn poll(&mut self, bus: &dyn BusLayer) -> Result<BusPhase, BusError> {
        match self.phase {
            BusPhase::Operational => {}
            BusPhase::Error => {
                return Err(BusError::Hardware {
                    al_status: bus.al_status_code(),
                });
            }
            BusPhase::WaitingForClockSync => {
                if let BusState::Error = bus.read_state()? {
                    return self.fail(bus);
                }
                if bus.clock_synchronized() {
                    // Issued exactly once: the phase advances with the request.
                    bus.request_state(BusState::Operational)?;
                    info!("clock synchronized, Operational state requested");
                    self.phase = BusPhase::RequestingOperational;
                }
            }
            BusPhase::RequestingOperational => match bus.read_state()? {
                BusState::Operational => {
                    info!("bus reached Operational");
                    self.phase = BusPhase::Operational;
                }
                BusState::Error => return self.fail(bus),
                _ => {}
            },
        }
        Ok(self.phase)
    }

    fn fail(&mut self, bus: &dyn BusLayer) -> Result<BusPhase, BusError> {
        self.phase = BusPhase::Error;
        Err(BusError::Hardware {
            al_status: bus.al_status_code(),
        })
    }
}

impl Default for BusMonitor {
    fn default() -> Self {
        Self::new()
    }
}

// ─── Tests ──────────────────────────────────────────────────────────
