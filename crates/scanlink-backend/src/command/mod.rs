//! Scanner command set
//!
//! Typed builders for a SCSI-2 style scanner command set, an opcode table
//! with per-device overrides, and the command service that executes them
//! over a transport.

pub mod cdb;
mod error;
mod service;

pub use cdb::{
    CalibrationInfo, Command, ImageComposition, Inquiry, InquiryData, ObjectPosition,
    PositionAction, ReadData, ReleaseUnit, RequestSense, ReserveUnit, Scan, SendData, SetWindow,
    TestUnitReady, WindowDescriptor, CALIBRATION_INFO_LEN, INQUIRY_ALLOCATION,
    WINDOW_DESCRIPTOR_LEN, WINDOW_HEADER_LEN,
};
pub use error::CommandError;
pub use service::{CommandService, RetryPolicy};

use crate::config::OpcodeOverrides;

/// Standard scanner command opcodes
pub mod opcode {
    pub const TEST_UNIT_READY: u8 = 0x00;
    pub const REQUEST_SENSE: u8 = 0x03;
    pub const INQUIRY: u8 = 0x12;
    pub const RESERVE_UNIT: u8 = 0x16;
    pub const RELEASE_UNIT: u8 = 0x17;
    pub const SCAN: u8 = 0x1B;
    pub const SET_WINDOW: u8 = 0x24;
    pub const READ: u8 = 0x28;
    pub const SEND: u8 = 0x2A;
    pub const OBJECT_POSITION: u8 = 0x31;
}

/// Data type codes for READ and SEND
pub mod data_type {
    /// Image data of the current scan
    pub const IMAGE: u8 = 0x00;
    /// Shading reference (READ) or shading correction profile (SEND)
    pub const SHADING: u8 = 0x80;
    /// Calibration geometry record (READ)
    pub const CALIBRATION_INFO: u8 = 0x81;
}

/// Data type qualifier selecting the color plane of shading data
pub mod color_qualifier {
    /// All planes, combined profile
    pub const ALL: u16 = 0x0000;
    pub const RED: u16 = 0x0001;
    pub const GREEN: u16 = 0x0002;
    pub const BLUE: u16 = 0x0003;

    /// Qualifier for color plane `index` (0 = red)
    pub fn for_plane(index: usize) -> u16 {
        match index {
            0 => RED,
            1 => GREEN,
            _ => BLUE,
        }
    }
}

/// Command identity independent of opcode numbering
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandKind {
    TestUnitReady,
    RequestSense,
    Inquiry,
    ReserveUnit,
    ReleaseUnit,
    Scan,
    SetWindow,
    Read,
    Send,
    ObjectPosition,
}

/// Resolved opcodes for one device
///
/// Starts from the standard opcodes and applies any per-device overrides.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OpcodeTable {
    pub test_unit_ready: u8,
    pub request_sense: u8,
    pub inquiry: u8,
    pub reserve_unit: u8,
    pub release_unit: u8,
    pub scan: u8,
    pub set_window: u8,
    pub read: u8,
    pub send: u8,
    pub object_position: u8,
}

impl Default for OpcodeTable {
    fn default() -> Self {
        Self {
            test_unit_ready: opcode::TEST_UNIT_READY,
            request_sense: opcode::REQUEST_SENSE,
            inquiry: opcode::INQUIRY,
            reserve_unit: opcode::RESERVE_UNIT,
            release_unit: opcode::RELEASE_UNIT,
            scan: opcode::SCAN,
            set_window: opcode::SET_WINDOW,
            read: opcode::READ,
            send: opcode::SEND,
            object_position: opcode::OBJECT_POSITION,
        }
    }
}

impl OpcodeTable {
    /// Create an opcode table with device-specific overrides applied
    pub fn from_overrides(overrides: &OpcodeOverrides) -> Self {
        let defaults = Self::default();
        Self {
            test_unit_ready: overrides
                .test_unit_ready
                .unwrap_or(defaults.test_unit_ready),
            request_sense: overrides.request_sense.unwrap_or(defaults.request_sense),
            inquiry: overrides.inquiry.unwrap_or(defaults.inquiry),
            reserve_unit: overrides.reserve_unit.unwrap_or(defaults.reserve_unit),
            release_unit: overrides.release_unit.unwrap_or(defaults.release_unit),
            scan: overrides.scan.unwrap_or(defaults.scan),
            set_window: overrides.set_window.unwrap_or(defaults.set_window),
            read: overrides.read.unwrap_or(defaults.read),
            send: overrides.send.unwrap_or(defaults.send),
            object_position: overrides
                .object_position
                .unwrap_or(defaults.object_position),
        }
    }

    /// Opcode for a command kind
    pub fn opcode(&self, kind: CommandKind) -> u8 {
        match kind {
            CommandKind::TestUnitReady => self.test_unit_ready,
            CommandKind::RequestSense => self.request_sense,
            CommandKind::Inquiry => self.inquiry,
            CommandKind::ReserveUnit => self.reserve_unit,
            CommandKind::ReleaseUnit => self.release_unit,
            CommandKind::Scan => self.scan,
            CommandKind::SetWindow => self.set_window,
            CommandKind::Read => self.read,
            CommandKind::Send => self.send,
            CommandKind::ObjectPosition => self.object_position,
        }
    }

    /// Reverse lookup, used by device-side command decoding
    pub fn kind_of(&self, op: u8) -> Option<CommandKind> {
        const KINDS: [CommandKind; 10] = [
            CommandKind::TestUnitReady,
            CommandKind::RequestSense,
            CommandKind::Inquiry,
            CommandKind::ReserveUnit,
            CommandKind::ReleaseUnit,
            CommandKind::Scan,
            CommandKind::SetWindow,
            CommandKind::Read,
            CommandKind::Send,
            CommandKind::ObjectPosition,
        ];
        KINDS.into_iter().find(|kind| self.opcode(*kind) == op)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_overrides_apply() {
        let overrides = OpcodeOverrides {
            read: Some(0xC8),
            send: Some(0xCA),
            ..Default::default()
        };
        let table = OpcodeTable::from_overrides(&overrides);
        assert_eq!(table.read, 0xC8);
        assert_eq!(table.send, 0xCA);
        assert_eq!(table.inquiry, opcode::INQUIRY);
        assert_eq!(table.kind_of(0xC8), Some(CommandKind::Read));
        assert_eq!(table.kind_of(opcode::READ), None);
    }

    #[test]
    fn test_default_reverse_lookup() {
        let table = OpcodeTable::default();
        assert_eq!(table.kind_of(0x24), Some(CommandKind::SetWindow));
        assert_eq!(table.kind_of(0xFF), None);
    }
}
