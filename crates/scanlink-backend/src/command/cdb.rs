//! Typed command descriptor block (CDB) builders
//!
//! Every multi-byte field is serialized big-endian. 6-byte CDBs carry an
//! 8-bit allocation/transfer length in byte 4; 10-byte CDBs carry a 24-bit
//! transfer length in bytes 6..9.

use super::{data_type, CommandError, CommandKind};

/// Bytes requested by INQUIRY
pub const INQUIRY_ALLOCATION: u8 = 96;

/// Length of the standard INQUIRY header preceding the vendor area
pub const INQUIRY_STANDARD_LEN: usize = 36;

/// SET WINDOW parameter header length
pub const WINDOW_HEADER_LEN: usize = 8;

/// Window descriptor length
pub const WINDOW_DESCRIPTOR_LEN: usize = 40;

/// Calibration info record length
pub const CALIBRATION_INFO_LEN: usize = 8;

/// Fixed-format sense length requested by REQUEST SENSE
const SENSE_ALLOCATION: u8 = 18;

/// Largest value a 24-bit transfer length can carry
pub const MAX_TRANSFER_LENGTH: usize = 0x00FF_FFFF;

/// Callers keep `value` within [`MAX_TRANSFER_LENGTH`]
fn put_u24(buf: &mut [u8], value: usize) {
    let v = value.min(MAX_TRANSFER_LENGTH) as u32;
    buf[0] = (v >> 16) as u8;
    buf[1] = (v >> 8) as u8;
    buf[2] = v as u8;
}

fn get_u24(buf: &[u8]) -> usize {
    ((buf[0] as usize) << 16) | ((buf[1] as usize) << 8) | buf[2] as usize
}

fn be_u16(buf: &[u8], at: usize) -> u16 {
    u16::from_be_bytes([buf[at], buf[at + 1]])
}

fn be_u32(buf: &[u8], at: usize) -> u32 {
    u32::from_be_bytes([buf[at], buf[at + 1], buf[at + 2], buf[at + 3]])
}

/// A command the scanner understands
pub trait Command {
    /// Which opcode-table entry this command uses
    const KIND: CommandKind;

    /// Serialize the CDB using the device's opcode
    fn cdb(&self, opcode: u8) -> Vec<u8>;

    /// Data-out bytes
    fn payload(&self) -> Vec<u8> {
        Vec::new()
    }

    /// Maximum data-in bytes
    fn response_len(&self) -> usize {
        0
    }
}

fn six_byte(opcode: u8, length: u8) -> Vec<u8> {
    vec![opcode, 0, 0, 0, length, 0]
}

/// TEST UNIT READY
#[derive(Debug, Clone, Copy)]
pub struct TestUnitReady;

impl Command for TestUnitReady {
    const KIND: CommandKind = CommandKind::TestUnitReady;

    fn cdb(&self, opcode: u8) -> Vec<u8> {
        six_byte(opcode, 0)
    }
}

/// REQUEST SENSE
#[derive(Debug, Clone, Copy)]
pub struct RequestSense;

impl Command for RequestSense {
    const KIND: CommandKind = CommandKind::RequestSense;

    fn cdb(&self, opcode: u8) -> Vec<u8> {
        six_byte(opcode, SENSE_ALLOCATION)
    }

    fn response_len(&self) -> usize {
        SENSE_ALLOCATION as usize
    }
}

/// INQUIRY
#[derive(Debug, Clone, Copy)]
pub struct Inquiry {
    pub allocation: u8,
}

impl Default for Inquiry {
    fn default() -> Self {
        Self {
            allocation: INQUIRY_ALLOCATION,
        }
    }
}

impl Command for Inquiry {
    const KIND: CommandKind = CommandKind::Inquiry;

    fn cdb(&self, opcode: u8) -> Vec<u8> {
        six_byte(opcode, self.allocation)
    }

    fn response_len(&self) -> usize {
        self.allocation as usize
    }
}

/// RESERVE UNIT
#[derive(Debug, Clone, Copy)]
pub struct ReserveUnit;

impl Command for ReserveUnit {
    const KIND: CommandKind = CommandKind::ReserveUnit;

    fn cdb(&self, opcode: u8) -> Vec<u8> {
        six_byte(opcode, 0)
    }
}

/// RELEASE UNIT
#[derive(Debug, Clone, Copy)]
pub struct ReleaseUnit;

impl Command for ReleaseUnit {
    const KIND: CommandKind = CommandKind::ReleaseUnit;

    fn cdb(&self, opcode: u8) -> Vec<u8> {
        six_byte(opcode, 0)
    }
}

/// SCAN ("begin scan") for window 0
#[derive(Debug, Clone, Copy)]
pub struct Scan;

impl Command for Scan {
    const KIND: CommandKind = CommandKind::Scan;

    fn cdb(&self, opcode: u8) -> Vec<u8> {
        six_byte(opcode, 1)
    }

    fn payload(&self) -> Vec<u8> {
        vec![0]
    }
}

/// Image composition codes carried in the window descriptor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ImageComposition {
    Lineart = 0x00,
    Halftone = 0x01,
    Gray = 0x02,
    Color = 0x05,
}

impl ImageComposition {
    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0x00 => Some(Self::Lineart),
            0x01 => Some(Self::Halftone),
            0x02 => Some(Self::Gray),
            0x05 => Some(Self::Color),
            _ => None,
        }
    }
}

/// Device-side description of the scan rectangle, resolution and mode
///
/// Layout (40 bytes, big-endian):
///
/// | offset | size | field |
/// |---|---|---|
/// | 0 | 1 | window id |
/// | 2 | 2 | x resolution (dpi) |
/// | 4 | 2 | y resolution (dpi) |
/// | 6 | 4 | upper-left x (base dots) |
/// | 10 | 4 | upper-left y (base dots) |
/// | 14 | 4 | width (base dots) |
/// | 18 | 4 | length (base dots) |
/// | 22 | 1 | brightness |
/// | 23 | 1 | threshold |
/// | 24 | 1 | contrast |
/// | 25 | 1 | image composition |
/// | 26 | 1 | bits per sample |
/// | 28 | 1 | scan source |
/// | 29 | 1 | color filter (0 all, 1 red, 2 green, 3 blue) |
/// | 30 | 1 | flags: bit 0 line-interleaved color, bit 1 host y-scaling |
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowDescriptor {
    pub x_resolution: u16,
    pub y_resolution: u16,
    pub ulx: u32,
    pub uly: u32,
    pub width: u32,
    pub length: u32,
    pub brightness: u8,
    pub threshold: u8,
    pub contrast: u8,
    pub composition: ImageComposition,
    pub bits_per_sample: u8,
    pub source: u8,
    pub color_filter: u8,
    pub line_interleaved: bool,
    pub host_y_scaling: bool,
}

const FLAG_LINE_INTERLEAVED: u8 = 0x01;
const FLAG_HOST_Y_SCALING: u8 = 0x02;

impl WindowDescriptor {
    pub fn to_bytes(&self) -> [u8; WINDOW_DESCRIPTOR_LEN] {
        let mut out = [0u8; WINDOW_DESCRIPTOR_LEN];
        out[2..4].copy_from_slice(&self.x_resolution.to_be_bytes());
        out[4..6].copy_from_slice(&self.y_resolution.to_be_bytes());
        out[6..10].copy_from_slice(&self.ulx.to_be_bytes());
        out[10..14].copy_from_slice(&self.uly.to_be_bytes());
        out[14..18].copy_from_slice(&self.width.to_be_bytes());
        out[18..22].copy_from_slice(&self.length.to_be_bytes());
        out[22] = self.brightness;
        out[23] = self.threshold;
        out[24] = self.contrast;
        out[25] = self.composition as u8;
        out[26] = self.bits_per_sample;
        out[28] = self.source;
        out[29] = self.color_filter;
        let mut flags = 0;
        if self.line_interleaved {
            flags |= FLAG_LINE_INTERLEAVED;
        }
        if self.host_y_scaling {
            flags |= FLAG_HOST_Y_SCALING;
        }
        out[30] = flags;
        out
    }

    pub fn parse(data: &[u8]) -> Result<Self, CommandError> {
        if data.len() < WINDOW_DESCRIPTOR_LEN {
            return Err(CommandError::InvalidResponse(format!(
                "window descriptor too short: {} bytes",
                data.len()
            )));
        }
        let composition = ImageComposition::from_code(data[25]).ok_or_else(|| {
            CommandError::InvalidResponse(format!("unknown image composition 0x{:02X}", data[25]))
        })?;
        Ok(Self {
            x_resolution: be_u16(data, 2),
            y_resolution: be_u16(data, 4),
            ulx: be_u32(data, 6),
            uly: be_u32(data, 10),
            width: be_u32(data, 14),
            length: be_u32(data, 18),
            brightness: data[22],
            threshold: data[23],
            contrast: data[24],
            composition,
            bits_per_sample: data[26],
            source: data[28],
            color_filter: data[29],
            line_interleaved: data[30] & FLAG_LINE_INTERLEAVED != 0,
            host_y_scaling: data[30] & FLAG_HOST_Y_SCALING != 0,
        })
    }
}

/// SET WINDOW
#[derive(Debug, Clone, Copy)]
pub struct SetWindow {
    pub window: WindowDescriptor,
}

impl SetWindow {
    /// Decode the window from a SET WINDOW parameter list
    pub fn parse_payload(payload: &[u8]) -> Result<WindowDescriptor, CommandError> {
        if payload.len() < WINDOW_HEADER_LEN {
            return Err(CommandError::InvalidResponse(
                "window parameter list too short".to_string(),
            ));
        }
        let declared = be_u16(payload, 6) as usize;
        let body = &payload[WINDOW_HEADER_LEN..];
        if declared != WINDOW_DESCRIPTOR_LEN || body.len() < declared {
            return Err(CommandError::InvalidResponse(format!(
                "window descriptor length {} (have {})",
                declared,
                body.len()
            )));
        }
        WindowDescriptor::parse(body)
    }
}

impl Command for SetWindow {
    const KIND: CommandKind = CommandKind::SetWindow;

    fn cdb(&self, opcode: u8) -> Vec<u8> {
        let mut cdb = vec![opcode, 0, 0, 0, 0, 0, 0, 0, 0, 0];
        put_u24(&mut cdb[6..9], WINDOW_HEADER_LEN + WINDOW_DESCRIPTOR_LEN);
        cdb
    }

    fn payload(&self) -> Vec<u8> {
        let mut out = vec![0u8; WINDOW_HEADER_LEN];
        out[6..8].copy_from_slice(&(WINDOW_DESCRIPTOR_LEN as u16).to_be_bytes());
        out.extend_from_slice(&self.window.to_bytes());
        out
    }
}

/// READ (10-byte): `[op, 0, data type, 0, qualifier(2), length(3), 0]`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadData {
    pub data_type: u8,
    pub qualifier: u16,
    pub length: usize,
}

impl ReadData {
    pub fn image(length: usize) -> Self {
        Self {
            data_type: data_type::IMAGE,
            qualifier: 0,
            length,
        }
    }

    /// Decode a READ or SEND CDB's addressing fields
    pub fn parse(cdb: &[u8]) -> Result<Self, CommandError> {
        if cdb.len() < 10 {
            return Err(CommandError::InvalidResponse(format!(
                "10-byte CDB expected, got {}",
                cdb.len()
            )));
        }
        Ok(Self {
            data_type: cdb[2],
            qualifier: be_u16(cdb, 4),
            length: get_u24(&cdb[6..9]),
        })
    }
}

fn ten_byte_transfer(opcode: u8, data_type: u8, qualifier: u16, length: usize) -> Vec<u8> {
    let mut cdb = vec![opcode, 0, data_type, 0, 0, 0, 0, 0, 0, 0];
    cdb[4..6].copy_from_slice(&qualifier.to_be_bytes());
    put_u24(&mut cdb[6..9], length);
    cdb
}

impl Command for ReadData {
    const KIND: CommandKind = CommandKind::Read;

    fn cdb(&self, opcode: u8) -> Vec<u8> {
        ten_byte_transfer(opcode, self.data_type, self.qualifier, self.length)
    }

    fn response_len(&self) -> usize {
        self.length
    }
}

/// SEND (10-byte), same addressing as READ with a data-out payload
#[derive(Debug, Clone)]
pub struct SendData {
    pub data_type: u8,
    pub qualifier: u16,
    pub data: Vec<u8>,
}

impl Command for SendData {
    const KIND: CommandKind = CommandKind::Send;

    fn cdb(&self, opcode: u8) -> Vec<u8> {
        ten_byte_transfer(opcode, self.data_type, self.qualifier, self.data.len())
    }

    fn payload(&self) -> Vec<u8> {
        self.data.clone()
    }
}

/// OBJECT POSITION action codes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PositionAction {
    /// Return the carriage home / eject the sheet
    Unload = 0x00,
}

/// OBJECT POSITION
#[derive(Debug, Clone, Copy)]
pub struct ObjectPosition {
    pub action: PositionAction,
}

impl Command for ObjectPosition {
    const KIND: CommandKind = CommandKind::ObjectPosition;

    fn cdb(&self, opcode: u8) -> Vec<u8> {
        vec![opcode, self.action as u8, 0, 0, 0, 0, 0, 0, 0, 0]
    }
}

/// Decoded INQUIRY response
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InquiryData {
    /// Peripheral device type (0x06 for scanners)
    pub peripheral_type: u8,
    pub vendor: String,
    pub product: String,
    pub revision: String,
    /// Bytes following the standard 36-byte header
    pub vendor_specific: Vec<u8>,
}

/// Peripheral device type code of a scanner
pub const PERIPHERAL_SCANNER: u8 = 0x06;

fn ascii_field(data: &[u8]) -> String {
    String::from_utf8_lossy(data).trim().to_string()
}

fn padded(value: &str, len: usize) -> Vec<u8> {
    let mut out: Vec<u8> = value.bytes().take(len).collect();
    out.resize(len, b' ');
    out
}

impl InquiryData {
    pub fn parse(data: &[u8]) -> Result<Self, CommandError> {
        if data.len() < INQUIRY_STANDARD_LEN {
            return Err(CommandError::InvalidResponse(format!(
                "INQUIRY response too short: {} bytes",
                data.len()
            )));
        }
        Ok(Self {
            peripheral_type: data[0] & 0x1F,
            vendor: ascii_field(&data[8..16]),
            product: ascii_field(&data[16..32]),
            revision: ascii_field(&data[32..36]),
            vendor_specific: data[INQUIRY_STANDARD_LEN..].to_vec(),
        })
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = vec![0u8; 8];
        out[0] = self.peripheral_type & 0x1F;
        // Additional length counts the bytes after byte 4
        let total = INQUIRY_STANDARD_LEN + self.vendor_specific.len();
        out[4] = (total - 5).min(u8::MAX as usize) as u8;
        out.extend(padded(&self.vendor, 8));
        out.extend(padded(&self.product, 16));
        out.extend(padded(&self.revision, 4));
        out.extend_from_slice(&self.vendor_specific);
        out
    }
}

/// Calibration geometry reported by the device
///
/// Layout (8 bytes): lines (u16), pixels (u16), channels (u8),
/// bytes per sample (u8), 2 reserved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CalibrationInfo {
    pub lines: u16,
    pub pixels: u16,
    pub channels: u8,
    pub bytes_per_sample: u8,
}

impl CalibrationInfo {
    pub fn parse(data: &[u8]) -> Result<Self, CommandError> {
        if data.len() < CALIBRATION_INFO_LEN {
            return Err(CommandError::InvalidResponse(format!(
                "calibration info too short: {} bytes",
                data.len()
            )));
        }
        Ok(Self {
            lines: be_u16(data, 0),
            pixels: be_u16(data, 2),
            channels: data[4],
            bytes_per_sample: data[5],
        })
    }

    pub fn to_bytes(&self) -> [u8; CALIBRATION_INFO_LEN] {
        let mut out = [0u8; CALIBRATION_INFO_LEN];
        out[0..2].copy_from_slice(&self.lines.to_be_bytes());
        out[2..4].copy_from_slice(&self.pixels.to_be_bytes());
        out[4] = self.channels;
        out[5] = self.bytes_per_sample;
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::opcode;
    use pretty_assertions::assert_eq;

    fn window() -> WindowDescriptor {
        WindowDescriptor {
            x_resolution: 300,
            y_resolution: 600,
            ulx: 0x0102_0304,
            uly: 12,
            width: 1200,
            length: 1264,
            brightness: 0x80,
            threshold: 0x80,
            contrast: 0x80,
            composition: ImageComposition::Color,
            bits_per_sample: 8,
            source: 1,
            color_filter: 0,
            line_interleaved: true,
            host_y_scaling: false,
        }
    }

    #[test]
    fn test_read_cdb_layout() {
        let read = ReadData {
            data_type: data_type::SHADING,
            qualifier: 0x0102,
            length: 0x012345,
        };
        let cdb = read.cdb(opcode::READ);
        assert_eq!(
            cdb,
            vec![0x28, 0x00, 0x80, 0x00, 0x01, 0x02, 0x01, 0x23, 0x45, 0x00]
        );
        assert_eq!(ReadData::parse(&cdb).unwrap(), read);
    }

    #[test]
    fn test_window_is_big_endian() {
        let bytes = window().to_bytes();
        assert_eq!(&bytes[2..4], &[0x01, 0x2C]);
        assert_eq!(&bytes[6..10], &[0x01, 0x02, 0x03, 0x04]);
        assert_eq!(bytes[25], 0x05);
        assert_eq!(bytes[30], 0x01);
    }

    #[test]
    fn test_set_window_payload_decodes() {
        let cmd = SetWindow { window: window() };
        let cdb = cmd.cdb(opcode::SET_WINDOW);
        assert_eq!(get_u24(&cdb[6..9]), WINDOW_HEADER_LEN + WINDOW_DESCRIPTOR_LEN);
        let decoded = SetWindow::parse_payload(&cmd.payload()).unwrap();
        assert_eq!(decoded, window());
    }

    #[test]
    fn test_set_window_rejects_bad_length() {
        let mut payload = SetWindow { window: window() }.payload();
        payload[7] = 20;
        assert!(SetWindow::parse_payload(&payload).is_err());
    }

    #[test]
    fn test_inquiry_encode_parse() {
        let data = InquiryData {
            peripheral_type: PERIPHERAL_SCANNER,
            vendor: "ACME".to_string(),
            product: "FlatScan 600".to_string(),
            revision: "1.02".to_string(),
            vendor_specific: vec![1, 2, 3],
        };
        let bytes = data.to_bytes();
        assert_eq!(bytes.len(), INQUIRY_STANDARD_LEN + 3);
        assert_eq!(&bytes[8..16], b"ACME    ");
        assert_eq!(InquiryData::parse(&bytes).unwrap(), data);
    }

    #[test]
    fn test_inquiry_too_short() {
        assert!(InquiryData::parse(&[0u8; 20]).is_err());
    }

    #[test]
    fn test_transfer_length_saturates() {
        let cdb = ReadData::image(usize::MAX).cdb(opcode::READ);
        assert_eq!(get_u24(&cdb[6..9]), MAX_TRANSFER_LENGTH);
    }
}
