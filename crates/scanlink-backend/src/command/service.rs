//! Command service: executes typed commands over a transport

use std::time::Duration;

use tracing::{debug, trace, warn};

use super::cdb::{
    CalibrationInfo, Command, Inquiry, InquiryData, ObjectPosition, PositionAction, ReadData,
    ReleaseUnit, RequestSense, ReserveUnit, Scan, SendData, SetWindow, TestUnitReady,
    WindowDescriptor, CALIBRATION_INFO_LEN, MAX_TRANSFER_LENGTH,
};
use super::{data_type, CommandError, OpcodeTable};
use crate::config::RetryConfig;
use crate::transport::{DeviceStatus, ScannerTransport, SenseData, TransportError};

/// Bounded retry budget for "device busy" answers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub interval: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&RetryConfig::default())
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        Self {
            attempts: config.attempts.max(1),
            interval: Duration::from_millis(config.interval_ms),
        }
    }
}

/// Owns one transport handle and speaks the scanner command set over it
///
/// CHECK CONDITION answers are classified here, once, through the
/// transport's classifier. Callers only ever see [`CommandError::Device`]
/// with a [`DeviceStatus`].
pub struct CommandService {
    transport: Box<dyn ScannerTransport>,
    opcodes: OpcodeTable,
}

impl CommandService {
    pub fn new(transport: Box<dyn ScannerTransport>) -> Self {
        Self::with_opcodes(transport, OpcodeTable::default())
    }

    /// Create a service with device-specific opcodes
    pub fn with_opcodes(transport: Box<dyn ScannerTransport>, opcodes: OpcodeTable) -> Self {
        Self { transport, opcodes }
    }

    pub fn opcodes(&self) -> &OpcodeTable {
        &self.opcodes
    }

    /// Largest data-in transfer both the transport and a READ length field accept
    pub fn max_transfer(&self) -> usize {
        self.transport.max_transfer().min(MAX_TRANSFER_LENGTH)
    }

    pub fn transport_name(&self) -> &str {
        self.transport.name()
    }

    /// Send one command and classify a failed completion
    async fn execute<C: Command + Sync>(&mut self, command: &C) -> Result<Vec<u8>, CommandError> {
        let opcode = self.opcodes.opcode(C::KIND);
        let cdb = command.cdb(opcode);
        let payload = command.payload();

        trace!(
            opcode = %format!("0x{:02X}", opcode),
            cdb = %hex::encode(&cdb),
            payload_len = payload.len(),
            "Sending command"
        );

        match self
            .transport
            .send(&cdb, &payload, command.response_len())
            .await
        {
            Ok(data) => Ok(data),
            Err(TransportError::DeviceBusy) => Err(CommandError::Device {
                opcode,
                status: DeviceStatus::Busy,
                sense: None,
            }),
            Err(TransportError::CheckCondition { sense }) => {
                let sense = match SenseData::parse(&sense) {
                    Some(sense) => sense,
                    None => self.request_sense().await?,
                };
                let status = self.transport.classify(&sense);
                if status == DeviceStatus::Good {
                    // Recovered errors complete the command
                    warn!(opcode = %format!("0x{:02X}", opcode), %sense, "Recovered error");
                    return Ok(Vec::new());
                }
                debug!(
                    opcode = %format!("0x{:02X}", opcode),
                    %sense,
                    %status,
                    "Command failed"
                );
                Err(CommandError::Device {
                    opcode,
                    status,
                    sense: Some(sense),
                })
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Fetch sense data for a CHECK CONDITION that arrived without autosense
    async fn request_sense(&mut self) -> Result<SenseData, CommandError> {
        let command = RequestSense;
        let cdb = command.cdb(self.opcodes.request_sense);
        let data = self
            .transport
            .send(&cdb, &[], command.response_len())
            .await?;
        SenseData::parse(&data)
            .ok_or_else(|| CommandError::InvalidResponse("sense data too short".to_string()))
    }

    /// TEST UNIT READY
    pub async fn test_unit_ready(&mut self) -> Result<(), CommandError> {
        self.execute(&TestUnitReady).await.map(|_| ())
    }

    /// Poll TEST UNIT READY until the device answers good
    ///
    /// Only a busy answer is retried; any other failure is returned at
    /// once. Exhausting the budget yields [`CommandError::NotReady`].
    /// Returns the number of attempts used.
    pub async fn wait_ready(&mut self, policy: &RetryPolicy) -> Result<u32, CommandError> {
        for attempt in 1..=policy.attempts {
            match self.test_unit_ready().await {
                Ok(()) => {
                    debug!(attempt, "Device ready");
                    return Ok(attempt);
                }
                Err(e) if e.is_busy() => {
                    trace!(attempt, "Device busy, waiting");
                    if attempt < policy.attempts {
                        tokio::time::sleep(policy.interval).await;
                    }
                }
                Err(e) => return Err(e),
            }
        }
        warn!(attempts = policy.attempts, "Device never became ready");
        Err(CommandError::NotReady {
            attempts: policy.attempts,
        })
    }

    /// INQUIRY
    pub async fn inquiry(&mut self) -> Result<InquiryData, CommandError> {
        let data = self.execute(&Inquiry::default()).await?;
        InquiryData::parse(&data)
    }

    /// RESERVE UNIT
    pub async fn reserve(&mut self) -> Result<(), CommandError> {
        self.execute(&ReserveUnit).await.map(|_| ())
    }

    /// RELEASE UNIT
    pub async fn release(&mut self) -> Result<(), CommandError> {
        self.execute(&ReleaseUnit).await.map(|_| ())
    }

    /// SET WINDOW
    pub async fn set_window(&mut self, window: &WindowDescriptor) -> Result<(), CommandError> {
        self.execute(&SetWindow { window: *window }).await.map(|_| ())
    }

    /// SCAN: commit the device to the current window
    pub async fn start_scan(&mut self) -> Result<(), CommandError> {
        self.execute(&Scan).await.map(|_| ())
    }

    /// READ image data; may return fewer bytes than requested
    pub async fn read_image(&mut self, length: usize) -> Result<Vec<u8>, CommandError> {
        check_length(length)?;
        self.execute(&ReadData::image(length)).await
    }

    /// READ shading reference lines
    pub async fn read_shading(&mut self, length: usize) -> Result<Vec<u8>, CommandError> {
        check_length(length)?;
        let command = ReadData {
            data_type: data_type::SHADING,
            qualifier: 0,
            length,
        };
        self.execute(&command).await
    }

    /// READ the device's calibration geometry record
    pub async fn read_calibration_info(&mut self) -> Result<CalibrationInfo, CommandError> {
        let command = ReadData {
            data_type: data_type::CALIBRATION_INFO,
            qualifier: 0,
            length: CALIBRATION_INFO_LEN,
        };
        let data = self.execute(&command).await?;
        CalibrationInfo::parse(&data)
    }

    /// SEND a shading correction profile for one color qualifier
    pub async fn send_shading(
        &mut self,
        qualifier: u16,
        data: Vec<u8>,
    ) -> Result<(), CommandError> {
        check_length(data.len())?;
        let command = SendData {
            data_type: data_type::SHADING,
            qualifier,
            data,
        };
        self.execute(&command).await.map(|_| ())
    }

    /// OBJECT POSITION
    pub async fn object_position(&mut self, action: PositionAction) -> Result<(), CommandError> {
        self.execute(&ObjectPosition { action }).await.map(|_| ())
    }

    /// Close the underlying transport
    pub async fn close(&mut self) -> Result<(), TransportError> {
        self.transport.close().await
    }
}

fn check_length(length: usize) -> Result<(), CommandError> {
    if length > MAX_TRANSFER_LENGTH {
        return Err(CommandError::TransferTooLarge { length });
    }
    Ok(())
}

impl std::fmt::Debug for CommandService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandService")
            .field("transport", &self.transport.name())
            .field("opcodes", &self.opcodes)
            .finish()
    }
}
