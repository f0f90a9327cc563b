//! CiA 402 drive enabling, re-evaluated every cycle.
//!
//! The state itself is derived fresh from the status word each cycle
//! ([`axon_common::cia402::evaluate`]); this module owns the one piece of
//! state that legitimately persists across cycles: the last issued control
//! word (held when no pattern demands a new one) and the setpoint-ack bit.

use axon_common::cia402::{self, ControlWord, DriveState};

/// Outcome of one drive-machine cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DriveUpdate {
    /// State derived from the status word this cycle.
    pub state: DriveState,
    /// Control word to place in the output record this cycle.
    pub control_word: ControlWord,
    /// True on the single cycle OperationEnabled is first observed; the
    /// caller initializes the motion origin from the actual position then.
    pub newly_enabled: bool,
}

/// Issues one control word per cycle to walk the drive to OperationEnabled
/// and keep it there, resubmitting fault-reset while the fault bit is set.
#[derive(Debug)]
pub struct DriveCommander {
    control_word: ControlWord,
    setpoint_ack: bool,
    enabled: bool,
}

impl DriveCommander {
    pub fn new() -> Self {
        Self {
            control_word: ControlWord::empty(),
            setpoint_ack: false,
            enabled: false,
        }
    }

    /// Whether the last evaluated status word showed OperationEnabled.
    #[inline]
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    #[inline]
    pub fn control_word(&self) -> ControlWord {
        self.control_word
    }

    /// Evaluate the latest status word and pick this cycle's control word.
    pub fn update(&mut self, status_word: u16) -> DriveUpdate {
        let eval = cia402::evaluate(status_word);
        let operational = eval.state == DriveState::OperationEnabled;
        let newly_enabled = operational && !self.enabled;
        self.enabled = operational;

        if let Some(mut response) = eval.response {
            if operational && self.setpoint_ack {
                response |= ControlWord::SETPOINT_ACK;
            }
            self.control_word = response;
        }

        DriveUpdate {
            state: eval.state,
            control_word: self.control_word,
            newly_enabled,
        }
    }

    /// Flip the setpoint-acknowledge bit so the drive latches a new position
    /// target exactly once. Takes effect in the current cycle's word and is
    /// held stable until the next new setpoint.
    pub fn toggle_setpoint_ack(&mut self) {
        self.setpoint_ack = !self.setpoint_ack;
        self.control_word.toggle(ControlWord::SETPOINT_ACK);
    }
}

impl Default for DriveCommander {
    fn default() -> Self {
        Self::new()
    }
}

// ─── Tests ──────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn walks_the_enable_sequence() {
        let mut commander = DriveCommander::new();

        let up = commander.update(0x0040);
        assert_eq!(up.state, DriveState::SwitchOnDisabled);
        assert_eq!(up.control_word, ControlWord::CMD_SHUTDOWN);

        let up = commander.update(0x0021);
        assert_eq!(up.state, DriveState::ReadyToSwitchOn);
        assert_eq!(up.control_word, ControlWord::CMD_SWITCH_ON);

        let up = commander.update(0x0023);
        assert_eq!(up.state, DriveState::SwitchedOn);
        assert_eq!(up.control_word, ControlWord::CMD_ENABLE_OPERATION);

        let up = commander.update(0x0027);
        assert_eq!(up.state, DriveState::OperationEnabled);
        assert!(up.newly_enabled);
        assert!(commander.is_enabled());
    }

    #[test]
    fn newly_enabled_fires_once() {
        let mut commander = DriveCommander::new();
        assert!(commander.update(0x0027).newly_enabled);
        assert!(!commander.update(0x0027).newly_enabled);
    }

    #[test]
    fn fault_reset_issued_every_cycle_until_clear() {
        let mut commander = DriveCommander::new();
        commander.update(0x0027);
        assert!(commander.is_enabled());

        for _ in 0..5 {
            let up = commander.update(0x0008);
            assert_eq!(up.state, DriveState::Fault);
            assert_eq!(up.control_word, ControlWord::CMD_FAULT_RESET);
            assert!(!commander.is_enabled());
        }

        // Fault bit clears into switch-on-disabled; normal sequence resumes.
        let up = commander.update(0x0040);
        assert_eq!(up.state, DriveState::SwitchOnDisabled);
        assert_eq!(up.control_word, ControlWord::CMD_SHUTDOWN);
    }

    #[test]
    fn unknown_pattern_holds_previous_word() {
        let mut commander = DriveCommander::new();
        commander.update(0x0040);
        let held = commander.control_word();
        // Quick-stop-active style pattern matches no table row.
        let up = commander.update(0x0007);
        assert_eq!(up.state, DriveState::NotReady);
        assert_eq!(up.control_word, held);
    }

    #[test]
    fn setpoint_ack_toggles_and_holds() {
        let mut commander = DriveCommander::new();
        commander.update(0x0027);
        assert!(!commander.control_word().contains(ControlWord::SETPOINT_ACK));

        commander.toggle_setpoint_ack();
        assert!(commander.control_word().contains(ControlWord::SETPOINT_ACK));
        // Held across subsequent cycles.
        let up = commander.update(0x0027);
        assert!(up.control_word.contains(ControlWord::SETPOINT_ACK));

        commander.toggle_setpoint_ack();
        let up = commander.update(0x0027);
        assert!(!up.control_word.contains(ControlWord::SETPOINT_ACK));
    }
}
