//! CiA 402 power-drive-system vocabulary.
//!
//! Status/control word bit layouts, the operation-mode enum (object 0x6060),
//! and the priority-ordered status-pattern table from which the drive state
//! is re-derived every cycle. The table is data, not logic, so the policy can
//! be tested in isolation from timing.

use bitflags::bitflags;

// ─── Object Dictionary Addresses ────────────────────────────────────

/// Object-dictionary entries the controller touches outside the cyclic data.
pub mod objects {
    /// Mode of operation select (i8).
    pub const MODE_OF_OPERATION: u16 = 0x6060;
    /// Control word (u16); also mapped cyclically.
    pub const CONTROL_WORD: u16 = 0x6040;
    /// Vendor diagnostic block.
    pub const DIAGNOSTIC: u16 = 0x3C13;
    /// Sub-index of the last-error-code entry (u16).
    pub const DIAGNOSTIC_LAST_ERROR: u8 = 0x84;
    /// Sub-index of the vendor driver-status entry (u16).
    pub const DIAGNOSTIC_DRIVER_STATUS: u8 = 0xD5;
}

// ─── Status / Control Words ─────────────────────────────────────────

bitflags! {
    /// CiA 402 status word (object 0x6041).
    ///
    /// Unlisted bits are operation-mode or manufacturer specific and are
    /// carried through untouched via `from_bits_retain`.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct StatusWord: u16 {
        const READY_TO_SWITCH_ON = 0x0001;
        const SWITCHED_ON        = 0x0002;
        const OPERATION_ENABLED  = 0x0004;
        const FAULT              = 0x0008;
        const VOLTAGE_ENABLED    = 0x0010;
        const QUICK_STOP         = 0x0020;
        const SWITCH_ON_DISABLED = 0x0040;
        const WARNING            = 0x0080;
        const REMOTE             = 0x0200;
        const TARGET_REACHED     = 0x0400;
        const INTERNAL_LIMIT     = 0x0800;
    }
}

bitflags! {
    /// CiA 402 control word (object 0x6040).
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct ControlWord: u16 {
        const SWITCH_ON        = 0x0001;
        const ENABLE_VOLTAGE   = 0x0002;
        const QUICK_STOP       = 0x0004;
        const ENABLE_OPERATION = 0x0008;
        /// Mode-specific bit 4; toggled to latch a new position setpoint.
        const SETPOINT_ACK     = 0x0010;
        const FAULT_RESET      = 0x0080;
        const HALT             = 0x0100;
    }
}

impl ControlWord {
    /// "Shutdown" command (transitions 2, 6, 8).
    pub const CMD_SHUTDOWN: ControlWord = ControlWord::from_bits_retain(0x0006);
    /// "Switch on" command (transition 3).
    pub const CMD_SWITCH_ON: ControlWord = ControlWord::from_bits_retain(0x0007);
    /// "Enable operation" command (transitions 4, 16).
    pub const CMD_ENABLE_OPERATION: ControlWord = ControlWord::from_bits_retain(0x000F);
    /// "Fault reset" command (transition 15).
    pub const CMD_FAULT_RESET: ControlWord = ControlWord::from_bits_retain(0x0080);
}

// ─── Operation Modes ────────────────────────────────────────────────

/// Drive control-loop mode (object 0x6060), fixed for the life of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i8)]
pub enum OperationMode {
    /// CSP - cyclic synchronous position.
    CyclicSynchronousPosition = 8,
    /// CSV - cyclic synchronous velocity.
    CyclicSynchronousVelocity = 9,
}

impl OperationMode {
    /// Convert from the raw mode-of-operation-display value.
    #[inline]
    pub const fn from_i8(value: i8) -> Option<Self> {
        match value {
            8 => Some(Self::CyclicSynchronousPosition),
            9 => Some(Self::CyclicSynchronousVelocity),
            _ => None,
        }
    }
}

// ─── Drive State Derivation ─────────────────────────────────────────

/// CiA 402 power-drive-system state.
///
/// Always re-derived from the latest status word via [`evaluate`]; never
/// cached, so it cannot drift from what the drive reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum DriveState {
    /// Not ready to switch on (initialization running).
    NotReady = 0,
    /// Switch on disabled.
    SwitchOnDisabled = 1,
    /// Ready to switch on.
    ReadyToSwitchOn = 2,
    /// Switched on, operation not yet enabled.
    SwitchedOn = 3,
    /// Operation enabled - motion-capable.
    OperationEnabled = 4,
    /// Fault active.
    Fault = 5,
}

impl DriveState {
    #[inline]
    pub const fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::NotReady),
            1 => Some(Self::SwitchOnDisabled),
            2 => Some(Self::ReadyToSwitchOn),
            3 => Some(Self::SwitchedOn),
            4 => Some(Self::OperationEnabled),
            5 => Some(Self::Fault),
            _ => None,
        }
    }
}

/// One row of the status-pattern table: `status & mask == value` derives
/// `state`, and `response` is the control word to issue while in it.
#[derive(Debug, Clone, Copy)]
pub struct StatusPattern {
    pub mask: u16,
    pub value: u16,
    pub state: DriveState,
    /// `None` holds the previously issued control word.
    pub response: Option<ControlWord>,
}

/// Priority-ordered status patterns, evaluated top to bottom.
///
/// The fault row comes first: a set fault bit outranks every other pattern
/// regardless of what the remaining bits claim.
pub const STATUS_PATTERNS: [StatusPattern; 6] = [
    StatusPattern {
        mask: 0x0008,
        value: 0x0008,
        state: DriveState::Fault,
        response: Some(ControlWord::CMD_FAULT_RESET),
    },
    StatusPattern {
        mask: 0x004F,
        value: 0x0040,
        state: DriveState::SwitchOnDisabled,
        response: Some(ControlWord::CMD_SHUTDOWN),
    },
    StatusPattern {
        mask: 0x006F,
        value: 0x0021,
        state: DriveState::ReadyToSwitchOn,
        response: Some(ControlWord::CMD_SWITCH_ON),
    },
    StatusPattern {
        mask: 0x006F,
        value: 0x0023,
        state: DriveState::SwitchedOn,
        response: Some(ControlWord::CMD_ENABLE_OPERATION),
    },
    StatusPattern {
        mask: 0x006F,
        value: 0x0027,
        state: DriveState::OperationEnabled,
        response: Some(ControlWord::CMD_ENABLE_OPERATION),
    },
    StatusPattern {
        mask: 0x004F,
        value: 0x0000,
        state: DriveState::NotReady,
        response: None,
    },
];

/// Result of evaluating a status word against [`STATUS_PATTERNS`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Evaluation {
    pub state: DriveState,
    pub response: Option<ControlWord>,
}

/// Derive the drive state and the control word to answer with.
///
/// Pure function of the status word: same input, same output, no history.
/// A pattern matching no row derives [`DriveState::NotReady`] with no
/// control-word change.
pub fn evaluate(status_word: u16) -> Evaluation {
    for pattern in &STATUS_PATTERNS {
        if status_word & pattern.mask == pattern.value {
            return Evaluation {
                state: pattern.state,
                response: pattern.response,
            };
        }
    }
    Evaluation {
        state: DriveState::NotReady,
        response: None,
    }
}

// ─── Tests ──────────────────────────────────────────────────────────
