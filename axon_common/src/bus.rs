//! Fieldbus collaborator interface.
//!
//! The controller core never talks to the wire itself; it drives whatever
//! implements [`BusLayer`]. Network initialization, slave discovery, PDO
//! mapping, distributed-clock establishment and the mailbox protocol all
//! live behind this trait.

use thiserror::Error;

use crate::pdo::{ProcessDataIn, ProcessDataOut};

/// Communication state of the slave, as reported by the bus layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BusState {
    Init,
    PreOperational,
    SafeOperational,
    Operational,
    /// Hardware error state; fatal, not recoverable by the controller.
    Error,
}

/// Error types for bus-layer operations.
#[derive(Debug, Clone, Error)]
pub enum BusError {
    /// Process-data exchange failed outright (not a working-counter shortfall).
    #[error("process-data exchange failed: {0}")]
    Exchange(String),

    /// A state-transition request was refused.
    #[error("state request {target:?} refused: {reason}")]
    StateRequest { target: BusState, reason: String },

    /// Acknowledged object-dictionary read failed.
    #[error("SDO read 0x{index:04X}:{sub:02X} failed: {reason}")]
    SdoRead { index: u16, sub: u8, reason: String },

    /// Acknowledged object-dictionary write failed.
    #[error("SDO write 0x{index:04X}:{sub:02X} failed: {reason}")]
    SdoWrite { index: u16, sub: u8, reason: String },

    /// The slave entered its hardware error state.
    #[error("slave in hardware error state (AL status 0x{al_status:04X})")]
    Hardware { al_status: u16 },
}

/// One cycle's worth of exchanged process data.
#[derive(Debug, Clone, Copy)]
pub struct Exchange {
    /// Refreshed drive → master record.
    pub input: ProcessDataIn,
    /// Observed working counter for the exchange.
    pub working_counter: u16,
}

/// Interface to the cyclic fieldbus master.
///
/// `exchange` is called exactly once per cycle and only from the real-time
/// thread; it owns the only timeout inside the cyclic path. The mailbox
/// operations (`sdo_read`/`sdo_write`) and state management may be called
/// from the supervisory thread concurrently with the cyclic exchange.
pub trait BusLayer: Send + Sync {
    /// Backend identifier (e.g. "sim").
    fn name(&self) -> &'static str;

    /// Send `output`, refresh the inputs, return the observed working counter.
    fn exchange(&self, output: &ProcessDataOut) -> Result<Exchange, BusError>;

    /// Request a slave state transition. Idempotent on the wire; callers
    /// are expected to issue it once per intended transition.
    fn request_state(&self, target: BusState) -> Result<(), BusError>;

    /// Last observed slave state.
    fn read_state(&self) -> Result<BusState, BusError>;

    /// AL status code accompanying [`BusState::Error`]; 0 otherwise.
    fn al_status_code(&self) -> u16;

    /// Acknowledged object-dictionary read into `buf`; returns bytes read.
    fn sdo_read(&self, index: u16, sub: u8, buf: &mut [u8]) -> Result<usize, BusError>;

    /// Acknowledged object-dictionary write.
    fn sdo_write(&self, index: u16, sub: u8, data: &[u8]) -> Result<(), BusError>;

    /// Whether distributed-clock synchronization has been established.
    fn clock_synchronized(&self) -> bool;

    /// Expected working counter for a healthy exchange, derived from the
    /// configured topology.
    fn expected_working_counter(&self) -> u16;

    /// Convenience u16 read (little-endian).
    fn sdo_read_u16(&self, index: u16, sub: u8) -> Result<u16, BusError> {
        let mut buf = [0u8; 2];
        let n = self.sdo_read(index, sub, &mut buf)?;
        if n != 2 {
            return Err(BusError::SdoRead {
                index,
                sub,
                reason: format!("expected 2 bytes, got {n}"),
            });
        }
        Ok(u16::from_le_bytes(buf))
    }
}
