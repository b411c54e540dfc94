//! Scan session: the per-device lifecycle state machine

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use scanlink_core::{
    ColorMode, DeviceDescriptor, OptionDescriptor, OptionId, OptionValue, ReadStatus,
    ReloadHints, ScanDevice, ScanError, ScanResult, Shape,
};
use tracing::{debug, info, info_span, warn, Instrument};
use uuid::Uuid;

use super::SessionState;
use crate::calibration;
use crate::command::cdb::PERIPHERAL_SCANNER;
use crate::command::{CommandService, OpcodeTable, PositionAction, RetryPolicy};
use crate::config::{CalibrationConfig, ScanConfig};
use crate::geometry::{self, ScanPlan, ScanRequest};
use crate::model::{Capabilities, ModelFamily};
use crate::options::OptionTable;
use crate::reader::{self, Polled, ReaderHandle, ReaderPlan};
use crate::transport::TransportProvider;

/// Identify the device behind `service`
pub(crate) async fn identify(service: &mut CommandService) -> ScanResult<Capabilities> {
    let inquiry = service.inquiry().await?;
    if inquiry.peripheral_type != PERIPHERAL_SCANNER {
        return Err(ScanError::Unsupported(format!(
            "peripheral type {:#04x} is not a scanner",
            inquiry.peripheral_type
        )));
    }
    Ok(Capabilities::from_inquiry(&inquiry)?)
}

pub(crate) fn describe(name: &str, caps: &Capabilities) -> DeviceDescriptor {
    DeviceDescriptor {
        name: name.to_string(),
        vendor: caps.vendor.clone(),
        model: caps.model.clone(),
        device_type: caps.device_type(),
    }
}

/// Output of the frame in progress
struct Frame {
    shape: Shape,
    pending: Bytes,
    delivered: usize,
}

impl Frame {
    fn new(shape: Shape) -> Self {
        Self {
            shape,
            pending: Bytes::new(),
            delivered: 0,
        }
    }

    fn copy_to(&mut self, buf: &mut [u8]) -> usize {
        let n = buf.len().min(self.pending.len());
        buf[..n].copy_from_slice(&self.pending.split_to(n));
        self.delivered += n;
        n
    }
}

/// One opened scanner
///
/// Owns the command service while idle; hands it to the reader task for
/// the duration of a frame and takes it back at end of frame, on error or
/// on cancel.
pub struct ScanSession {
    descriptor: DeviceDescriptor,
    caps: Capabilities,
    family: ModelFamily,
    config: ScanConfig,
    opcodes: OpcodeTable,
    provider: Arc<dyn TransportProvider>,
    service: Option<CommandService>,
    state: SessionState,
    options: OptionTable,
    pass: usize,
    reader: Option<ReaderHandle>,
    frame: Option<Frame>,
    non_blocking: bool,
    scan_id: Uuid,
    closed: bool,
}

impl ScanSession {
    /// Open `name` through `provider` and identify the device
    pub async fn open(
        name: &str,
        provider: Arc<dyn TransportProvider>,
        config: ScanConfig,
        opcodes: OpcodeTable,
    ) -> ScanResult<Self> {
        let transport = provider.open(name).await?;
        let mut service = CommandService::with_opcodes(transport, opcodes);
        let caps = match identify(&mut service).await {
            Ok(caps) => caps,
            Err(e) => {
                let _ = service.close().await;
                return Err(e);
            }
        };

        let family = caps.family();
        info!(
            device = name,
            vendor = %caps.vendor,
            model = %caps.model,
            family = ?family,
            "Scanner opened"
        );

        Ok(Self {
            descriptor: describe(name, &caps),
            options: OptionTable::new(&caps, &config),
            family,
            caps,
            config,
            opcodes,
            provider,
            service: Some(service),
            state: SessionState::Idle,
            pass: 0,
            reader: None,
            frame: None,
            non_blocking: false,
            scan_id: Uuid::nil(),
            closed: false,
        })
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn capabilities(&self) -> &Capabilities {
        &self.caps
    }

    /// Id of the current or most recent frame
    pub fn scan_id(&self) -> Uuid {
        self.scan_id
    }

    /// Pass index of a three-pass color scan
    pub fn pass(&self) -> usize {
        self.pass
    }

    fn plan(&self) -> ScanResult<(ScanRequest, ScanPlan)> {
        let request = self.options.request(self.pass);
        let plan = geometry::resolve(&self.caps, self.family, &request)?;
        Ok((request, plan))
    }

    async fn start_frame(&mut self, request: ScanRequest, plan: ScanPlan) -> ScanResult<()> {
        if self.service.is_none() {
            debug!("Reopening transport");
            let transport = self.provider.open(&self.descriptor.name).await?;
            self.service = Some(CommandService::with_opcodes(transport, self.opcodes));
        }
        let service = self
            .service
            .as_mut()
            .ok_or_else(|| ScanError::Io("transport not open".to_string()))?;

        service.reserve().await?;
        service
            .wait_ready(&RetryPolicy::from(&self.config.ready_poll))
            .await?;

        service.set_window(&plan.window).await?;

        let policy = self.options.calibration_policy();
        if calibration::required(&self.caps, policy, request.preview) {
            let settings = CalibrationConfig {
                policy,
                ..self.config.calibration
            };
            calibration::calibrate(service, &self.caps, &plan, request.mode, &settings).await?;
        }

        service.start_scan().await?;

        let service = self
            .service
            .take()
            .ok_or_else(|| ScanError::Io("transport not open".to_string()))?;
        let reader_plan = ReaderPlan::new(&plan, &self.config);
        self.reader = Some(reader::spawn(
            service,
            reader_plan,
            self.config.channel_depth,
            self.scan_id,
        ));
        self.frame = Some(Frame::new(plan.shape));
        self.state = SessionState::Scanning;

        info!(
            mode = %request.mode,
            source = %request.source,
            resolution = plan.resolution,
            pass = request.pass,
            pixels_per_line = plan.shape.pixels_per_line,
            lines = plan.shape.lines,
            raw_lines = plan.raw_lines,
            reorder = plan.reorder.is_some(),
            "Scan started"
        );
        Ok(())
    }

    /// Release the device and close the transport; always ends `Idle`
    async fn teardown(&mut self) {
        if let Some(mut service) = self.service.take() {
            if let Err(e) = service.release().await {
                debug!(error = %e, "Release failed during teardown");
            }
            if let Err(e) = service.close().await {
                debug!(error = %e, "Close failed during teardown");
            }
        }
        self.frame = None;
        self.non_blocking = false;
        self.state = SessionState::Idle;
    }

    /// Join the reader task and take the service back
    async fn reap_reader(&mut self) -> Option<ScanResult<reader::ReaderStats>> {
        let handle = self.reader.take()?;
        let outcome = handle.finish(self.config.join_timeout()).await?;
        self.service = Some(outcome.service);
        Some(outcome.result)
    }

    async fn fail_frame(&mut self, err: &ScanError) {
        warn!(scan_id = %self.scan_id, error = %err, "Scan failed");
        self.reap_reader().await;
        self.teardown().await;
        self.pass = 0;
    }

    async fn finish_frame(&mut self) -> ScanResult<ReadStatus> {
        self.state = SessionState::Draining;
        let result = self.reap_reader().await.unwrap_or_else(|| {
            Err(ScanError::Io(
                "reader task ended without returning the device".to_string(),
            ))
        });
        let delivered = self.frame.as_ref().map(|f| (f.delivered, f.shape.total_bytes()));
        self.teardown().await;

        match result {
            Ok(stats) => {
                if let Some((delivered, expected)) = delivered {
                    if delivered != expected {
                        self.pass = 0;
                        return Err(ScanError::Io(format!(
                            "frame ended after {} of {} bytes",
                            delivered, expected
                        )));
                    }
                }
                self.advance_pass();
                info!(
                    scan_id = %self.scan_id,
                    reads = stats.reads,
                    bytes = stats.emitted_bytes,
                    "Scan complete"
                );
                Ok(ReadStatus::Eof)
            }
            Err(e) => {
                self.pass = 0;
                Err(e)
            }
        }
    }

    fn advance_pass(&mut self) {
        let passes = self.options.mode().passes();
        self.pass = if self.options.mode() == ColorMode::ColorThreePass && self.pass + 1 < passes {
            self.pass + 1
        } else {
            0
        };
    }
}

#[async_trait]
impl ScanDevice for ScanSession {
    fn descriptor(&self) -> &DeviceDescriptor {
        &self.descriptor
    }

    fn option_descriptors(&self) -> Vec<OptionDescriptor> {
        self.options.descriptors()
    }

    fn get_option(&self, id: OptionId) -> ScanResult<OptionValue> {
        Ok(self.options.get(id))
    }

    fn set_option(&mut self, id: OptionId, value: OptionValue) -> ScanResult<ReloadHints> {
        if self.closed {
            return Err(ScanError::InvalidRequest("session is closed".to_string()));
        }
        if !self.state.is_idle() {
            return Err(ScanError::Busy);
        }
        let hints = self.options.set(id, value)?;
        debug!(option = %id, value = %self.options.get(id), "Option set");
        self.state = SessionState::Configuring;
        self.pass = 0;
        Ok(hints)
    }

    fn resolve_parameters(&self) -> ScanResult<Shape> {
        self.plan().map(|(_, plan)| plan.shape)
    }

    async fn start(&mut self) -> ScanResult<()> {
        if self.closed {
            return Err(ScanError::InvalidRequest("session is closed".to_string()));
        }
        if !self.state.is_idle() {
            return Err(ScanError::Busy);
        }
        let (request, plan) = self.plan()?;

        self.scan_id = Uuid::new_v4();
        self.state = SessionState::Started;
        let span = info_span!("scan", scan_id = %self.scan_id, device = %self.descriptor.name);
        match self.start_frame(request, plan).instrument(span).await {
            Ok(()) => Ok(()),
            Err(e) => {
                self.fail_frame(&e).await;
                Err(e)
            }
        }
    }

    async fn read(&mut self, buf: &mut [u8]) -> ScanResult<ReadStatus> {
        if !matches!(self.state, SessionState::Scanning) {
            self.cancel().await;
            return Err(ScanError::Cancelled);
        }

        loop {
            if let Some(frame) = self.frame.as_mut() {
                if !frame.pending.is_empty() || buf.is_empty() {
                    return Ok(ReadStatus::Data(frame.copy_to(buf)));
                }
            }

            let polled = match self.reader.as_mut() {
                None => Polled::Closed,
                Some(reader) if self.non_blocking => reader.try_recv(),
                Some(reader) => match reader.recv().await {
                    Some(chunk) => Polled::Chunk(chunk),
                    None => Polled::Closed,
                },
            };

            match polled {
                Polled::Chunk(Ok(bytes)) => {
                    if let Some(frame) = self.frame.as_mut() {
                        frame.pending = bytes;
                    }
                }
                Polled::Chunk(Err(e)) => {
                    self.fail_frame(&e).await;
                    return Err(e);
                }
                Polled::Empty => return Ok(ReadStatus::WouldBlock),
                Polled::Closed => return self.finish_frame().await,
            }
        }
    }

    fn set_io_mode(&mut self, non_blocking: bool) -> ScanResult<()> {
        if self.state != SessionState::Scanning {
            return Err(ScanError::InvalidRequest(
                "I/O mode can only be changed while scanning".to_string(),
            ));
        }
        self.non_blocking = non_blocking;
        Ok(())
    }

    async fn cancel(&mut self) {
        if self.state.is_idle() {
            self.pass = 0;
            return;
        }

        self.state = SessionState::Cancelling;
        if let Some(handle) = self.reader.as_ref() {
            handle.cancel();
        }
        match self.reap_reader().await {
            Some(Ok(stats)) => debug!(reads = stats.reads, "Reader stopped"),
            Some(Err(e)) => debug!(error = %e, "Reader stopped"),
            None => {}
        }
        if let Some(service) = self.service.as_mut() {
            if let Err(e) = service.object_position(PositionAction::Unload).await {
                debug!(error = %e, "Reposition failed during cancel");
            }
        }
        self.teardown().await;
        self.pass = 0;
        info!(scan_id = %self.scan_id, "Scan cancelled");
    }

    async fn close(&mut self) {
        if self.closed {
            return;
        }
        self.cancel().await;
        if let Some(mut service) = self.service.take() {
            if let Err(e) = service.close().await {
                debug!(error = %e, "Close failed");
            }
        }
        self.closed = true;
        info!(device = %self.descriptor.name, "Scanner closed");
    }
}

impl std::fmt::Debug for ScanSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScanSession")
            .field("device", &self.descriptor.name)
            .field("state", &self.state)
            .field("pass", &self.pass)
            .field("scan_id", &self.scan_id)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SimulatedConfig;
    use crate::transport::SimulatedScanner;
    use pretty_assertions::assert_eq;

    async fn session(config: SimulatedConfig) -> (ScanSession, SimulatedScanner) {
        let scanner = SimulatedScanner::new(config);
        let session = ScanSession::open(
            "sim:test",
            Arc::new(scanner.clone()),
            ScanConfig::default(),
            OpcodeTable::default(),
        )
        .await
        .unwrap();
        (session, scanner)
    }

    fn small_area(session: &mut ScanSession) {
        session
            .set_option(OptionId::BrX, OptionValue::Fixed(10.0))
            .unwrap();
        session
            .set_option(OptionId::BrY, OptionValue::Fixed(10.0))
            .unwrap();
        session
            .set_option(OptionId::Resolution, OptionValue::Int(100))
            .unwrap();
    }

    #[tokio::test]
    async fn test_open_identifies_device() {
        let (session, _) = session(SimulatedConfig::default()).await;
        assert_eq!(session.descriptor().vendor, "SCANLINK");
        assert_eq!(session.state(), SessionState::Idle);
    }

    #[tokio::test]
    async fn test_set_option_moves_to_configuring() {
        let (mut session, _) = session(SimulatedConfig::default()).await;
        small_area(&mut session);
        assert_eq!(session.state(), SessionState::Configuring);
    }

    #[tokio::test]
    async fn test_options_rejected_while_scanning() {
        let (mut session, _) = session(SimulatedConfig::default()).await;
        small_area(&mut session);
        session.start().await.unwrap();
        assert_eq!(session.state(), SessionState::Scanning);

        let err = session
            .set_option(OptionId::Resolution, OptionValue::Int(200))
            .unwrap_err();
        assert_eq!(err, ScanError::Busy);
        assert_eq!(session.start().await.unwrap_err(), ScanError::Busy);

        session.cancel().await;
        assert_eq!(session.state(), SessionState::Idle);
    }

    #[tokio::test]
    async fn test_io_mode_only_while_scanning() {
        let (mut session, _) = session(SimulatedConfig::default()).await;
        assert!(matches!(
            session.set_io_mode(true),
            Err(ScanError::InvalidRequest(_))
        ));
    }

    #[tokio::test]
    async fn test_resolve_failure_leaves_session_unchanged() {
        let (mut session, scanner) = session(SimulatedConfig::default()).await;
        session
            .set_option(OptionId::TlX, OptionValue::Fixed(20.0))
            .unwrap();
        session
            .set_option(OptionId::BrX, OptionValue::Fixed(10.0))
            .unwrap();

        assert!(session.start().await.is_err());
        assert_eq!(session.state(), SessionState::Configuring);
        assert_eq!(scanner.scans_started(), 0);
        assert!(!scanner.is_reserved());
    }

    #[tokio::test]
    async fn test_read_when_idle_is_cancelled() {
        let (mut session, _) = session(SimulatedConfig::default()).await;
        let mut buf = [0u8; 16];
        assert_eq!(session.read(&mut buf).await.unwrap_err(), ScanError::Cancelled);
    }

    #[tokio::test]
    async fn test_frame_then_transport_reopened() {
        let (mut session, scanner) = session(SimulatedConfig::default()).await;
        small_area(&mut session);
        let shape = session.resolve_parameters().unwrap();

        for _ in 0..2 {
            session.start().await.unwrap();
            let mut buf = vec![0u8; 4096];
            let mut total = 0;
            loop {
                match session.read(&mut buf).await.unwrap() {
                    ReadStatus::Data(n) => total += n,
                    ReadStatus::Eof => break,
                    ReadStatus::WouldBlock => unreachable!(),
                }
            }
            assert_eq!(total, shape.total_bytes());
            assert_eq!(scanner.open_handles(), 0);
            assert!(!scanner.is_reserved());
        }
        assert_eq!(scanner.scans_started(), 2);
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let (mut session, scanner) = session(SimulatedConfig::default()).await;
        session.close().await;
        session.close().await;
        assert_eq!(scanner.open_handles(), 0);
        assert!(matches!(
            session.start().await,
            Err(ScanError::InvalidRequest(_))
        ));
    }
}
