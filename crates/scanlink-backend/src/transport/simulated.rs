//! Simulated scanner for testing and demos
//!
//! Answers the whole command set in-process, generates deterministic image
//! data (line-interleaved with CCD row offsets when asked to) and a ramp
//! shading reference, and records what the host did so tests can inspect
//! it. Faults can be injected through [`SimulatedConfig`] or at runtime.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use scanlink_core::{ColorMode, ScanSource};
use tracing::trace;

use super::sense::{asc, sense_key};
use super::{ScannerTransport, SenseData, TransportError, TransportProvider};
use crate::command::cdb::PERIPHERAL_SCANNER;
use crate::command::{
    data_type, CalibrationInfo, CommandKind, ImageComposition, InquiryData, OpcodeTable,
    ReadData, SetWindow, WindowDescriptor,
};
use crate::config::{ImagePattern, SimulatedConfig, SimulatedFault};
use crate::geometry::mm_to_dots;
use crate::model::{AreaLimit, Capabilities};

/// ASC for an unsupported opcode
const ASC_INVALID_OPCODE: u8 = 0x20;
/// ASC for a command out of sequence
const ASC_SEQUENCE_ERROR: u8 = 0x2C;
/// ASC of an internal hardware failure
const ASC_HARDWARE_FAILURE: u8 = 0x44;
/// Filler for rows that precede the document
const LEAD_IN: u8 = 0xEE;

static NEXT_HANDLE: AtomicU64 = AtomicU64::new(1);

/// Scan in progress on the simulated device
#[derive(Debug)]
struct ActiveScan {
    window: WindowDescriptor,
    pixels: usize,
    channels: usize,
    bytes_per_sample: usize,
    bilevel: bool,
    /// Row offset between colors in delivered lines
    distance: usize,
    raw_bytes_per_line: usize,
    raw_lines: usize,
    next_line: usize,
    line_buf: Vec<u8>,
    line_pos: usize,
}

#[derive(Debug, Default)]
struct SimState {
    reserved_by: Option<u64>,
    open_handles: usize,
    command_log: Vec<CommandKind>,
    last_sense: Option<SenseData>,
    busy_polls_left: u32,
    busy_reads_left: u32,
    window: Option<WindowDescriptor>,
    scan: Option<ActiveScan>,
    image_reads: u32,
    image_bytes_read: usize,
    shading_offset: usize,
    uploaded_shading: Vec<(u16, Vec<u8>)>,
    fault: Option<SimulatedFault>,
    scans_started: u32,
}

struct Shared {
    config: SimulatedConfig,
    caps: Capabilities,
    opcodes: OpcodeTable,
    state: Mutex<SimState>,
}

/// In-process scanner; clones share the same device
#[derive(Clone)]
pub struct SimulatedScanner {
    shared: Arc<Shared>,
}

impl SimulatedScanner {
    pub fn new(config: SimulatedConfig) -> Self {
        let caps = capabilities_of(&config);
        let opcodes = OpcodeTable::from_overrides(&config.opcode_overrides);
        let state = SimState {
            fault: config.fault,
            ..SimState::default()
        };
        Self {
            shared: Arc::new(Shared {
                config,
                caps,
                opcodes,
                state: Mutex::new(state),
            }),
        }
    }

    /// Capabilities the device reports in INQUIRY
    pub fn capabilities(&self) -> &Capabilities {
        &self.shared.caps
    }

    /// Commands received so far, across all handles
    pub fn command_log(&self) -> Vec<CommandKind> {
        self.shared.state.lock().command_log.clone()
    }

    /// Number of commands of one kind received so far
    pub fn command_count(&self, kind: CommandKind) -> usize {
        self.shared
            .state
            .lock()
            .command_log
            .iter()
            .filter(|k| **k == kind)
            .count()
    }

    /// Shading profiles uploaded with SEND, as (qualifier, payload)
    pub fn uploaded_shading(&self) -> Vec<(u16, Vec<u8>)> {
        self.shared.state.lock().uploaded_shading.clone()
    }

    /// Image bytes delivered by READ
    pub fn image_bytes_read(&self) -> usize {
        self.shared.state.lock().image_bytes_read
    }

    pub fn is_reserved(&self) -> bool {
        self.shared.state.lock().reserved_by.is_some()
    }

    /// Handles opened and not yet closed or dropped
    pub fn open_handles(&self) -> usize {
        self.shared.state.lock().open_handles
    }

    pub fn scans_started(&self) -> u32 {
        self.shared.state.lock().scans_started
    }

    /// Raise (or clear) a fault
    ///
    /// An open cover is reported by TEST UNIT READY, the others at the
    /// next SCAN.
    pub fn set_fault(&self, fault: Option<SimulatedFault>) {
        self.shared.state.lock().fault = fault;
    }

    /// Answer the next `polls` TEST UNIT READY commands with "not ready"
    pub fn set_busy_polls(&self, polls: u32) {
        self.shared.state.lock().busy_polls_left = polls;
    }
}

#[async_trait]
impl TransportProvider for SimulatedScanner {
    async fn open(&self, name: &str) -> Result<Box<dyn ScannerTransport>, TransportError> {
        let id = NEXT_HANDLE.fetch_add(1, Ordering::Relaxed);
        self.shared.state.lock().open_handles += 1;
        trace!(name, handle = id, "Simulated handle opened");
        Ok(Box::new(SimulatedLink {
            shared: self.shared.clone(),
            name: name.to_string(),
            id,
            closed: false,
        }))
    }
}

/// Build capabilities from the simulated configuration
pub fn capabilities_of(config: &SimulatedConfig) -> Capabilities {
    let base = config.base_dpi;
    Capabilities {
        vendor: config.vendor.clone(),
        model: config.model.clone(),
        revision: "1.00".to_string(),
        modes: config.modes.clone(),
        optical_dpi: config.optical_dpi,
        min_dpi: config.min_dpi,
        max_dpi: config.max_dpi,
        base_dpi: base,
        // Letter width by A4 length
        flatbed: AreaLimit {
            width: mm_to_dots(215.9, base),
            length: mm_to_dots(297.0, base),
        },
        adf: config.adf,
        transparency: config.transparency.then(|| AreaLimit {
            width: mm_to_dots(50.8, base),
            length: mm_to_dots(127.0, base),
        }),
        host_calibration: config.host_calibration,
        reports_calibration_info: config.reports_calibration_info,
        host_y_scaling: config.host_y_scaling,
        per_color_shading: config.per_color_shading,
        supports_16bit: config.supports_16bit,
        ccd_distance: config.ccd_distance,
        max_transfer: config.max_transfer.min(u32::MAX as usize) as u32,
    }
}

type Reply = Result<Vec<u8>, TransportError>;

impl Shared {
    fn check(&self, state: &mut SimState, key: u8, asc: u8, ascq: u8) -> Reply {
        let sense = SenseData::new(key, asc, ascq);
        state.last_sense = Some(sense);
        let bytes = if self.config.autosense {
            sense.to_bytes()
        } else {
            Vec::new()
        };
        Err(TransportError::CheckCondition { sense: bytes })
    }

    fn illegal(&self, state: &mut SimState, asc: u8) -> Reply {
        self.check(state, sense_key::ILLEGAL_REQUEST, asc, 0)
    }

    fn handle(&self, handle: u64, cdb: &[u8], payload: &[u8], expected_len: usize) -> Reply {
        let mut state = self.state.lock();
        let Some(kind) = cdb.first().and_then(|op| self.opcodes.kind_of(*op)) else {
            return self.illegal(&mut state, ASC_INVALID_OPCODE);
        };
        state.command_log.push(kind);

        if kind != CommandKind::RequestSense {
            state.last_sense = None;
        }

        // Another handle holds the reservation
        let reserved_elsewhere = state.reserved_by.is_some_and(|id| id != handle);
        if reserved_elsewhere && !matches!(kind, CommandKind::Inquiry | CommandKind::RequestSense)
        {
            return Err(TransportError::DeviceBusy);
        }

        match kind {
            CommandKind::TestUnitReady => {
                if state.fault == Some(SimulatedFault::CoverOpen) {
                    return self.check(&mut state, sense_key::NOT_READY, asc::COVER_OPEN, 0);
                }
                if state.busy_polls_left > 0 {
                    state.busy_polls_left -= 1;
                    return self.check(&mut state, sense_key::NOT_READY, asc::NOT_READY, 0x01);
                }
                Ok(Vec::new())
            }
            CommandKind::RequestSense => {
                let sense = state
                    .last_sense
                    .take()
                    .unwrap_or_else(|| SenseData::new(sense_key::NO_SENSE, 0, 0));
                let mut bytes = sense.to_bytes();
                bytes.truncate(expected_len);
                Ok(bytes)
            }
            CommandKind::Inquiry => {
                let inquiry = InquiryData {
                    peripheral_type: PERIPHERAL_SCANNER,
                    vendor: self.caps.vendor.clone(),
                    product: self.caps.model.clone(),
                    revision: self.caps.revision.clone(),
                    vendor_specific: self.caps.to_block(),
                };
                let mut bytes = inquiry.to_bytes();
                bytes.truncate(expected_len);
                Ok(bytes)
            }
            CommandKind::ReserveUnit => {
                state.reserved_by = Some(handle);
                state.busy_polls_left = state.busy_polls_left.max(self.config.busy_polls);
                Ok(Vec::new())
            }
            CommandKind::ReleaseUnit => {
                if state.reserved_by == Some(handle) {
                    state.reserved_by = None;
                }
                state.scan = None;
                Ok(Vec::new())
            }
            CommandKind::SetWindow => match SetWindow::parse_payload(payload) {
                Ok(window) => {
                    if !self.window_fits(&window) {
                        return self.illegal(&mut state, asc::INVALID_FIELD_IN_PARAMETERS);
                    }
                    state.window = Some(window);
                    state.shading_offset = 0;
                    Ok(Vec::new())
                }
                Err(_) => self.illegal(&mut state, asc::INVALID_FIELD_IN_PARAMETERS),
            },
            CommandKind::Scan => self.begin_scan(&mut state),
            CommandKind::Read => {
                let request = match ReadData::parse(cdb) {
                    Ok(request) => request,
                    Err(_) => return self.illegal(&mut state, asc::INVALID_FIELD_IN_CDB),
                };
                let length = request.length.min(expected_len);
                match request.data_type {
                    data_type::IMAGE => self.read_image(&mut state, length),
                    data_type::SHADING => self.read_shading(&mut state, length),
                    data_type::CALIBRATION_INFO => self.read_calibration_info(&mut state),
                    _ => self.illegal(&mut state, asc::INVALID_FIELD_IN_CDB),
                }
            }
            CommandKind::Send => {
                let request = match ReadData::parse(cdb) {
                    Ok(request) => request,
                    Err(_) => return self.illegal(&mut state, asc::INVALID_FIELD_IN_CDB),
                };
                if request.data_type != data_type::SHADING || request.length != payload.len() {
                    return self.illegal(&mut state, asc::INVALID_FIELD_IN_CDB);
                }
                state
                    .uploaded_shading
                    .push((request.qualifier, payload.to_vec()));
                Ok(Vec::new())
            }
            CommandKind::ObjectPosition => {
                state.scan = None;
                Ok(Vec::new())
            }
        }
    }

    fn window_fits(&self, window: &WindowDescriptor) -> bool {
        let caps = &self.caps;
        let source = ScanSource::ALL
            .into_iter()
            .find(|s| s.code() == window.source);
        let Some(limit) = source.and_then(|s| caps.area_limit(s)) else {
            return false;
        };
        let mode_ok = match window.composition {
            ImageComposition::Lineart => caps.supports_mode(ColorMode::Lineart),
            ImageComposition::Halftone => caps.supports_mode(ColorMode::Halftone),
            ImageComposition::Gray => {
                caps.supports_mode(ColorMode::Gray)
                    || caps.supports_mode(ColorMode::ColorThreePass)
            }
            ImageComposition::Color => caps.supports_mode(ColorMode::Color),
        };
        mode_ok
            && window.x_resolution >= caps.min_dpi
            && window.x_resolution <= caps.max_dpi
            && window.width > 0
            && window.length > 0
            && window.ulx.saturating_add(window.width) <= limit.width
            && matches!(window.bits_per_sample, 1 | 8 | 16)
    }

    fn begin_scan(&self, state: &mut SimState) -> Reply {
        let Some(window) = state.window else {
            return self.illegal(state, ASC_SEQUENCE_ERROR);
        };
        if let Some(fault) = state.fault {
            return match fault {
                SimulatedFault::NoMedia => {
                    self.check(state, sense_key::NOT_READY, asc::MEDIUM_NOT_PRESENT, 0)
                }
                SimulatedFault::CoverOpen => {
                    self.check(state, sense_key::NOT_READY, asc::COVER_OPEN, 0)
                }
                SimulatedFault::Jammed => self.check(
                    state,
                    sense_key::MEDIUM_ERROR,
                    asc::POSITIONING_ERROR,
                    super::sense::ASCQ_PAPER_JAM,
                ),
                SimulatedFault::HardwareError => {
                    self.check(state, sense_key::HARDWARE_ERROR, ASC_HARDWARE_FAILURE, 0)
                }
            };
        }

        let base = usize::from(self.caps.base_dpi);
        let bilevel = matches!(
            window.composition,
            ImageComposition::Lineart | ImageComposition::Halftone
        );
        let mut pixels = window.width as usize * usize::from(window.x_resolution) / base;
        if bilevel {
            pixels &= !7;
        }
        let raw_lines = window.length as usize * usize::from(window.y_resolution) / base;
        let channels = if window.composition == ImageComposition::Color {
            3
        } else {
            1
        };
        let bytes_per_sample = usize::from(window.bits_per_sample.max(8) / 8);
        let raw_bytes_per_line = if bilevel {
            pixels / 8
        } else {
            pixels * channels * bytes_per_sample
        };
        let distance = if window.line_interleaved {
            self.caps
                .family()
                .line_distance(&self.caps, window.y_resolution)
        } else {
            0
        };

        state.scan = Some(ActiveScan {
            window,
            pixels,
            channels,
            bytes_per_sample,
            bilevel,
            distance,
            raw_bytes_per_line,
            raw_lines,
            next_line: 0,
            line_buf: Vec::new(),
            line_pos: 0,
        });
        state.busy_reads_left = self.config.busy_reads;
        state.scans_started += 1;
        Ok(Vec::new())
    }

    fn read_image(&self, state: &mut SimState, length: usize) -> Reply {
        if state.scan.is_none() {
            return self.illegal(state, ASC_SEQUENCE_ERROR);
        }
        if state.busy_reads_left > 0 {
            state.busy_reads_left -= 1;
            return self.check(state, sense_key::NOT_READY, asc::NOT_READY, 0x01);
        }
        if let Some(limit) = self.config.fail_after_reads {
            if state.image_reads >= limit {
                return Err(TransportError::Io("simulated bulk read failure".to_string()));
            }
        }
        state.image_reads += 1;

        let pattern = self.config.pattern;
        let mut out = Vec::with_capacity(length);
        if let Some(scan) = state.scan.as_mut() {
            while out.len() < length {
                if scan.line_pos == scan.line_buf.len() {
                    if scan.next_line >= scan.raw_lines {
                        break;
                    }
                    scan.line_buf = scan.generate_line(scan.next_line, pattern);
                    scan.next_line += 1;
                    scan.line_pos = 0;
                }
                let take = (length - out.len()).min(scan.line_buf.len() - scan.line_pos);
                out.extend_from_slice(&scan.line_buf[scan.line_pos..scan.line_pos + take]);
                scan.line_pos += take;
            }
        }
        state.image_bytes_read += out.len();
        Ok(out)
    }

    fn reference_info(&self, window: &WindowDescriptor) -> CalibrationInfo {
        let base = u32::from(self.caps.base_dpi);
        let pixels = window.width * u32::from(window.x_resolution) / base;
        CalibrationInfo {
            lines: self.config.calibration_lines,
            pixels: pixels.min(u32::from(u16::MAX)) as u16,
            channels: if window.composition == ImageComposition::Color {
                3
            } else {
                1
            },
            bytes_per_sample: window.bits_per_sample.max(8) / 8,
        }
    }

    fn read_calibration_info(&self, state: &mut SimState) -> Reply {
        if !self.config.reports_calibration_info {
            return self.illegal(state, asc::INVALID_FIELD_IN_CDB);
        }
        let Some(window) = state.window else {
            return self.illegal(state, ASC_SEQUENCE_ERROR);
        };
        Ok(self.reference_info(&window).to_bytes().to_vec())
    }

    /// Ramp reference: sample value tracks the pixel index, odd lines add one
    fn read_shading(&self, state: &mut SimState, length: usize) -> Reply {
        let Some(window) = state.window else {
            return self.illegal(state, ASC_SEQUENCE_ERROR);
        };
        let info = self.reference_info(&window);
        let channels = usize::from(info.channels);
        let bps = usize::from(info.bytes_per_sample);
        let sample_count = usize::from(info.pixels) * channels;
        if sample_count == 0 {
            return self.illegal(state, asc::INVALID_FIELD_IN_CDB);
        }

        let start = state.shading_offset / bps;
        let samples = length / bps;
        let mut out = Vec::with_capacity(samples * bps);
        for n in start..start + samples {
            let line = n / sample_count;
            let pixel = (n % sample_count) / channels;
            let value = ((pixel % 256) + (line % 2)).min(255) as u16;
            if bps == 2 {
                out.extend_from_slice(&(value * 257).to_be_bytes());
            } else {
                out.push(value as u8);
            }
        }
        state.shading_offset += out.len();
        Ok(out)
    }
}

impl ActiveScan {
    /// Sample of document line `doc` at `pixel` for color `channel`
    fn sample(&self, pattern: ImagePattern, doc: usize, pixel: usize, channel: usize) -> u16 {
        let value = match pattern {
            ImagePattern::LineTag => doc % 256,
            ImagePattern::Gradient => {
                let ramp = pixel * 255 / self.pixels.max(1);
                match channel {
                    0 => ramp,
                    1 => doc % 256,
                    _ => 255 - ramp,
                }
            }
        } as u16;
        if self.bytes_per_sample == 2 {
            value * 257
        } else {
            value
        }
    }

    fn push_sample(&self, out: &mut Vec<u8>, value: u16) {
        if self.bytes_per_sample == 2 {
            out.extend_from_slice(&value.to_be_bytes());
        } else {
            out.push(value as u8);
        }
    }

    fn generate_line(&self, line: usize, pattern: ImagePattern) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.raw_bytes_per_line);
        if self.bilevel {
            // Eight-line black and white bands
            let fill = if (line / 8) % 2 == 0 { 0x00 } else { 0xFF };
            out.resize(self.raw_bytes_per_line, fill);
            return out;
        }

        if self.channels == 3 && self.window.line_interleaved {
            // Red row leads, green and blue see earlier document lines
            for color in 0..3 {
                let lag = color * self.distance;
                match line.checked_sub(lag) {
                    Some(doc) => {
                        for pixel in 0..self.pixels {
                            let value = self.sample(pattern, doc, pixel, color);
                            self.push_sample(&mut out, value);
                        }
                    }
                    None => out.resize(out.len() + self.pixels * self.bytes_per_sample, LEAD_IN),
                }
            }
        } else if self.channels == 3 {
            for pixel in 0..self.pixels {
                for color in 0..3 {
                    let value = self.sample(pattern, line, pixel, color);
                    self.push_sample(&mut out, value);
                }
            }
        } else {
            let channel = usize::from(self.window.color_filter.saturating_sub(1)).min(2);
            for pixel in 0..self.pixels {
                let value = self.sample(pattern, line, pixel, channel);
                self.push_sample(&mut out, value);
            }
        }
        out
    }
}

/// One open handle to the simulated scanner
struct SimulatedLink {
    shared: Arc<Shared>,
    name: String,
    id: u64,
    closed: bool,
}

impl SimulatedLink {
    fn detach(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        let mut state = self.shared.state.lock();
        state.open_handles = state.open_handles.saturating_sub(1);
        // Reservations do not outlive the handle
        if state.reserved_by == Some(self.id) {
            state.reserved_by = None;
            state.scan = None;
        }
    }
}

#[async_trait]
impl ScannerTransport for SimulatedLink {
    async fn send(
        &mut self,
        cdb: &[u8],
        payload: &[u8],
        expected_len: usize,
    ) -> Result<Vec<u8>, TransportError> {
        if self.closed {
            return Err(TransportError::ConnectionClosed);
        }

        let config = &self.shared.config;
        let is_image_read = cdb.len() >= 3
            && self.shared.opcodes.kind_of(cdb[0]) == Some(CommandKind::Read)
            && cdb[2] == data_type::IMAGE;
        let mut delay = config.latency_ms;
        if is_image_read {
            delay += config.read_delay_ms;
        }
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }

        self.shared.handle(self.id, cdb, payload, expected_len)
    }

    fn max_transfer(&self) -> usize {
        self.shared.config.max_transfer
    }

    fn name(&self) -> &str {
        &self.name
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        self.detach();
        Ok(())
    }
}

impl Drop for SimulatedLink {
    fn drop(&mut self) {
        self.detach();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::CommandService;
    use crate::transport::DeviceStatus;

    async fn service(sim: &SimulatedScanner) -> CommandService {
        let handle = sim.open("sim:test").await.unwrap();
        CommandService::new(handle)
    }

    #[tokio::test]
    async fn test_inquiry_reports_capabilities() {
        let sim = SimulatedScanner::new(SimulatedConfig {
            ccd_distance: 8,
            adf: true,
            ..SimulatedConfig::default()
        });
        let mut svc = service(&sim).await;
        let inquiry = svc.inquiry().await.unwrap();
        assert_eq!(inquiry.peripheral_type, PERIPHERAL_SCANNER);
        let caps = Capabilities::from_inquiry(&inquiry).unwrap();
        assert_eq!(&caps, sim.capabilities());
    }

    #[tokio::test]
    async fn test_reservation_conflict() {
        let sim = SimulatedScanner::new(SimulatedConfig::default());
        let mut first = service(&sim).await;
        let mut second = service(&sim).await;
        first.reserve().await.unwrap();
        let err = second.reserve().await.unwrap_err();
        assert!(err.is_busy());

        first.close().await.unwrap();
        assert!(!sim.is_reserved());
        second.reserve().await.unwrap();
    }

    #[tokio::test]
    async fn test_scan_without_window_is_rejected() {
        let sim = SimulatedScanner::new(SimulatedConfig::default());
        let mut svc = service(&sim).await;
        let err = svc.start_scan().await.unwrap_err();
        assert_eq!(err.status(), Some(DeviceStatus::InvalidRequest));
    }

    #[tokio::test]
    async fn test_request_sense_without_autosense() {
        let sim = SimulatedScanner::new(SimulatedConfig {
            autosense: false,
            busy_polls: 1,
            ..SimulatedConfig::default()
        });
        let mut svc = service(&sim).await;
        svc.reserve().await.unwrap();
        let err = svc.test_unit_ready().await.unwrap_err();
        assert!(err.is_busy());
        assert_eq!(sim.command_count(CommandKind::RequestSense), 1);
    }

    #[tokio::test]
    async fn test_handles_are_counted() {
        let sim = SimulatedScanner::new(SimulatedConfig::default());
        let handle = sim.open("a").await.unwrap();
        let mut svc = service(&sim).await;
        assert_eq!(sim.open_handles(), 2);
        drop(handle);
        svc.close().await.unwrap();
        assert_eq!(sim.open_handles(), 0);
        assert!(matches!(
            svc.test_unit_ready().await,
            Err(crate::command::CommandError::Transport(
                TransportError::ConnectionClosed
            ))
        ));
    }
}
