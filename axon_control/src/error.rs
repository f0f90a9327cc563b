//! Fatal-error taxonomy for the controller.
//!
//! Everything here triggers shutdown; soft faults (working-counter
//! shortfalls, failed diagnostic reads) are logged and counted instead and
//! never appear as errors.

use thiserror::Error;

use axon_common::bus::{BusError, BusState};
use axon_common::cia402::OperationMode;
use axon_common::shared::CommandError;

use crate::config::ConfigError;

#[derive(Debug, Error)]
pub enum ControlError {
    /// Bus-layer failure inside the cyclic path or during state management.
    #[error("bus layer error: {0}")]
    Bus(#[from] BusError),

    /// The initial mode-of-operation SDO write failed; aborts before the
    /// real-time loop starts.
    #[error("failed to set mode of operation {mode:?}: {source}")]
    ModeConfiguration {
        mode: OperationMode,
        source: BusError,
    },

    /// The bus did not reach the requested state within the startup budget.
    #[error("bus did not reach {target:?} within {timeout_ms} ms (last observed {observed:?})")]
    StateTransitionTimeout {
        target: BusState,
        observed: BusState,
        timeout_ms: u64,
    },

    /// The drive did not become operational within the startup budget.
    #[error(
        "drive not operational within {timeout_ms} ms \
         (fault={fault}, status=0x{status_word:04X}, control=0x{control_word:04X}, \
         error=0x{error_code:04X})"
    )]
    StartupTimeout {
        timeout_ms: u64,
        fault: bool,
        status_word: u16,
        control_word: u16,
        error_code: u16,
    },

    /// A motion command was rejected at submission.
    #[error("invalid motion command: {0}")]
    Command(#[from] CommandError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    /// RT setup (mlockall / affinity / scheduler) failed.
    #[error("real-time setup failed: {0}")]
    RtSetup(String),

    /// Process-level startup plumbing failed (signal handler, thread spawn).
    #[error("startup failed: {0}")]
    Startup(String),
}
