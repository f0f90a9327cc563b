//! Cyclic process-data records.
//!
//! Both records are bit-exact to the drive's PDO mapping: little-endian,
//! fixed field order, no padding. Sizes are pinned at compile time; the
//! explicit byte codecs keep the wire layout independent of host endianness.

use static_assertions::const_assert_eq;

/// Master → drive record (RxPDO from the drive's perspective).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[repr(C, packed)]
pub struct ProcessDataOut {
    pub control_word: u16,
    pub target_position: i32,
    pub target_velocity: i32,
    pub target_torque: i16,
    pub mode_of_operation: i8,
    pub velocity_offset: i32,
}

const_assert_eq!(core::mem::size_of::<ProcessDataOut>(), ProcessDataOut::SIZE);

impl ProcessDataOut {
    pub const SIZE: usize = 17;

    /// Serialize to the wire layout.
    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut buf = [0u8; Self::SIZE];
        buf[0..2].copy_from_slice(&self.control_word.to_le_bytes());
        buf[2..6].copy_from_slice(&{ self.target_position }.to_le_bytes());
        buf[6..10].copy_from_slice(&{ self.target_velocity }.to_le_bytes());
        buf[10..12].copy_from_slice(&{ self.target_torque }.to_le_bytes());
        buf[12] = self.mode_of_operation as u8;
        buf[13..17].copy_from_slice(&{ self.velocity_offset }.to_le_bytes());
        buf
    }
}

/// Drive → master record (TxPDO from the drive's perspective).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[repr(C, packed)]
pub struct ProcessDataIn {
    pub status_word: u16,
    pub actual_position: i32,
    pub actual_velocity: i32,
    pub actual_torque: i16,
    pub following_error: i32,
    pub mode_of_operation_display: i8,
    pub touch_probe_status: u16,
    pub touch_probe_position: i32,
}

const_assert_eq!(core::mem::size_of::<ProcessDataIn>(), ProcessDataIn::SIZE);

impl ProcessDataIn {
    pub const SIZE: usize = 23;

    /// Deserialize from the wire layout.
    pub fn from_bytes(buf: &[u8; Self::SIZE]) -> Self {
        Self {
            status_word: u16::from_le_bytes([buf[0], buf[1]]),
            actual_position: i32::from_le_bytes([buf[2], buf[3], buf[4], buf[5]]),
            actual_velocity: i32::from_le_bytes([buf[6], buf[7], buf[8], buf[9]]),
            actual_torque: i16::from_le_bytes([buf[10], buf[11]]),
            following_error: i32::from_le_bytes([buf[12], buf[13], buf[14], buf[15]]),
            mode_of_operation_display: buf[16] as i8,
            touch_probe_status: u16::from_le_bytes([buf[17], buf[18]]),
            touch_probe_position: i32::from_le_bytes([buf[19], buf[20], buf[21], buf[22]]),
        }
    }
}
