//! Sense data and device status classification
//!
//! A device that fails a command answers CHECK CONDITION and reports the
//! cause as fixed-format sense data (sense key + additional sense code).
//! Classification turns that report into a [`DeviceStatus`] exactly once,
//! at the transport boundary.

use std::fmt;

/// Length of fixed-format sense data
pub const SENSE_LENGTH: usize = 18;

/// Fixed-format response code (current errors)
const RESPONSE_CODE_CURRENT: u8 = 0x70;

/// Sense keys
pub mod sense_key {
    pub const NO_SENSE: u8 = 0x00;
    pub const RECOVERED_ERROR: u8 = 0x01;
    pub const NOT_READY: u8 = 0x02;
    pub const MEDIUM_ERROR: u8 = 0x03;
    pub const HARDWARE_ERROR: u8 = 0x04;
    pub const ILLEGAL_REQUEST: u8 = 0x05;
    pub const UNIT_ATTENTION: u8 = 0x06;
    pub const ABORTED_COMMAND: u8 = 0x0B;
}

/// Additional sense codes (ASC)
pub mod asc {
    /// Logical unit not ready (ASCQ 0x01: becoming ready)
    pub const NOT_READY: u8 = 0x04;
    /// Invalid field in CDB
    pub const INVALID_FIELD_IN_CDB: u8 = 0x24;
    /// Invalid field in parameter list
    pub const INVALID_FIELD_IN_PARAMETERS: u8 = 0x26;
    /// Power on, reset or bus device reset occurred
    pub const POWER_ON_RESET: u8 = 0x29;
    /// Medium not present (document feeder empty)
    pub const MEDIUM_NOT_PRESENT: u8 = 0x3A;
    /// Sequential positioning error; ASCQ 0x05 is a paper jam
    pub const POSITIONING_ERROR: u8 = 0x3B;
    /// Vendor-range code used for an open cover or feeder lid
    pub const COVER_OPEN: u8 = 0x80;
}

/// ASCQ qualifying [`asc::POSITIONING_ERROR`] as a paper jam
pub const ASCQ_PAPER_JAM: u8 = 0x05;

/// Classified outcome of a device status report
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceStatus {
    Good,
    /// Device is warming up or still processing; retry later
    Busy,
    NoMedia,
    CoverOpen,
    Jammed,
    /// Device rejected the command or its parameters
    InvalidRequest,
    /// Anything else: hardware fault, aborted command, unknown sense
    DeviceFault,
}

impl fmt::Display for DeviceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DeviceStatus::Good => "good",
            DeviceStatus::Busy => "busy",
            DeviceStatus::NoMedia => "no media",
            DeviceStatus::CoverOpen => "cover open",
            DeviceStatus::Jammed => "jammed",
            DeviceStatus::InvalidRequest => "invalid request",
            DeviceStatus::DeviceFault => "device fault",
        };
        f.write_str(s)
    }
}

/// Decoded fixed-format sense data
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SenseData {
    pub key: u8,
    pub asc: u8,
    pub ascq: u8,
}

impl SenseData {
    pub fn new(key: u8, asc: u8, ascq: u8) -> Self {
        Self { key, asc, ascq }
    }

    /// Parse fixed-format sense bytes.
    ///
    /// Layout: byte 0 response code, byte 2 low nibble sense key, byte 7
    /// additional length, bytes 12/13 ASC/ASCQ. Truncated data yields
    /// zero ASC/ASCQ.
    pub fn parse(data: &[u8]) -> Option<Self> {
        if data.len() < 3 {
            return None;
        }
        let key = data[2] & 0x0F;
        let asc = data.get(12).copied().unwrap_or(0);
        let ascq = data.get(13).copied().unwrap_or(0);
        Some(Self { key, asc, ascq })
    }

    /// Encode as fixed-format sense bytes
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = vec![0u8; SENSE_LENGTH];
        out[0] = RESPONSE_CODE_CURRENT;
        out[2] = self.key & 0x0F;
        out[7] = (SENSE_LENGTH - 8) as u8;
        out[12] = self.asc;
        out[13] = self.ascq;
        out
    }

    /// Standard classification, used by transports without device quirks
    pub fn classify(&self) -> DeviceStatus {
        match (self.key, self.asc, self.ascq) {
            (sense_key::NO_SENSE | sense_key::RECOVERED_ERROR, _, _) => DeviceStatus::Good,

            // Feeder faults are identified by ASC regardless of key
            (_, asc::MEDIUM_NOT_PRESENT, _) => DeviceStatus::NoMedia,
            (_, asc::POSITIONING_ERROR, ASCQ_PAPER_JAM) => DeviceStatus::Jammed,
            (_, asc::COVER_OPEN, _) => DeviceStatus::CoverOpen,

            (sense_key::NOT_READY, _, _) => DeviceStatus::Busy,
            (sense_key::UNIT_ATTENTION, _, _) => DeviceStatus::Busy,
            (sense_key::ILLEGAL_REQUEST, _, _) => DeviceStatus::InvalidRequest,

            _ => DeviceStatus::DeviceFault,
        }
    }
}

impl fmt::Display for SenseData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "key 0x{:02X} asc 0x{:02X} ascq 0x{:02X}",
            self.key, self.asc, self.ascq
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(sense_key::NO_SENSE, 0x00, 0x00, DeviceStatus::Good)]
    #[case(sense_key::NOT_READY, asc::NOT_READY, 0x01, DeviceStatus::Busy)]
    #[case(sense_key::UNIT_ATTENTION, asc::POWER_ON_RESET, 0x00, DeviceStatus::Busy)]
    #[case(sense_key::NOT_READY, asc::MEDIUM_NOT_PRESENT, 0x00, DeviceStatus::NoMedia)]
    #[case(sense_key::MEDIUM_ERROR, asc::POSITIONING_ERROR, ASCQ_PAPER_JAM, DeviceStatus::Jammed)]
    #[case(sense_key::HARDWARE_ERROR, asc::COVER_OPEN, 0x00, DeviceStatus::CoverOpen)]
    #[case(
        sense_key::ILLEGAL_REQUEST,
        asc::INVALID_FIELD_IN_CDB,
        0x00,
        DeviceStatus::InvalidRequest
    )]
    #[case(sense_key::HARDWARE_ERROR, 0x44, 0x00, DeviceStatus::DeviceFault)]
    #[case(sense_key::ABORTED_COMMAND, 0x00, 0x00, DeviceStatus::DeviceFault)]
    fn test_classification(
        #[case] key: u8,
        #[case] asc: u8,
        #[case] ascq: u8,
        #[case] expected: DeviceStatus,
    ) {
        let sense = SenseData::new(key, asc, ascq);
        assert_eq!(sense.classify(), expected);
    }

    #[test]
    fn test_encode_parse() {
        let sense = SenseData::new(sense_key::NOT_READY, asc::MEDIUM_NOT_PRESENT, 0x00);
        let bytes = sense.to_bytes();
        assert_eq!(bytes.len(), SENSE_LENGTH);
        assert_eq!(bytes[0], 0x70);
        assert_eq!(SenseData::parse(&bytes), Some(sense));
    }

    #[test]
    fn test_parse_truncated() {
        assert_eq!(SenseData::parse(&[0x70]), None);
        let sense = SenseData::parse(&[0x70, 0x00, 0x02]).unwrap();
        assert_eq!(sense.key, sense_key::NOT_READY);
        assert_eq!(sense.asc, 0);
    }
}
