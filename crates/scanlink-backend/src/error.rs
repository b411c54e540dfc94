//! Error conversions into the caller taxonomy

use scanlink_core::ScanError;
use thiserror::Error;

use crate::command::CommandError;
use crate::transport::{DeviceStatus, TransportError};

/// Configuration loading errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config: {0}")]
    Io(String),

    #[error("Failed to parse config: {0}")]
    Parse(String),

    #[error("Invalid config: {0}")]
    Invalid(String),
}

impl From<DeviceStatus> for ScanError {
    fn from(status: DeviceStatus) -> Self {
        match status {
            DeviceStatus::Busy => ScanError::Busy,
            DeviceStatus::NoMedia => ScanError::NoMedia,
            DeviceStatus::CoverOpen => ScanError::CoverOpen,
            DeviceStatus::Jammed => ScanError::Jammed,
            DeviceStatus::InvalidRequest => {
                ScanError::InvalidRequest("device rejected the command".to_string())
            }
            DeviceStatus::Good | DeviceStatus::DeviceFault => {
                ScanError::Io(format!("device reported {}", status))
            }
        }
    }
}

impl From<TransportError> for ScanError {
    fn from(err: TransportError) -> Self {
        match err {
            TransportError::DeviceBusy => ScanError::Busy,
            TransportError::NotFound(name) => ScanError::DeviceNotFound(name),
            TransportError::Unsupported(msg) => ScanError::Unsupported(msg),
            other => ScanError::Io(other.to_string()),
        }
    }
}

impl From<CommandError> for ScanError {
    fn from(err: CommandError) -> Self {
        match err {
            CommandError::Device {
                status: DeviceStatus::InvalidRequest,
                ..
            } => ScanError::InvalidRequest(err.to_string()),
            CommandError::Device {
                status: DeviceStatus::DeviceFault,
                ..
            } => ScanError::Io(err.to_string()),
            CommandError::Device { status, .. } => status.into(),
            CommandError::NotReady { .. } => ScanError::Timeout,
            CommandError::Transport(e) => e.into(),
            CommandError::InvalidResponse(msg) => ScanError::Io(msg),
            CommandError::TransferTooLarge { .. } => ScanError::Io(err.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::SenseData;
    use rstest::rstest;

    fn device(status: DeviceStatus) -> CommandError {
        CommandError::Device {
            opcode: 0x1B,
            status,
            sense: Some(SenseData::new(0x02, 0x3A, 0x00)),
        }
    }

    #[rstest]
    #[case(DeviceStatus::Busy, "busy")]
    #[case(DeviceStatus::NoMedia, "no_media")]
    #[case(DeviceStatus::CoverOpen, "cover_open")]
    #[case(DeviceStatus::Jammed, "jammed")]
    #[case(DeviceStatus::InvalidRequest, "invalid_request")]
    #[case(DeviceStatus::DeviceFault, "io_error")]
    fn test_device_status_mapping(#[case] status: DeviceStatus, #[case] kind: &str) {
        let err: ScanError = device(status).into();
        assert_eq!(err.kind(), kind);
    }

    #[test]
    fn test_not_ready_is_timeout() {
        let err: ScanError = CommandError::NotReady { attempts: 10 }.into();
        assert_eq!(err, ScanError::Timeout);
    }

    #[test]
    fn test_transport_mapping() {
        let err: ScanError = CommandError::from(TransportError::Io("pipe".to_string())).into();
        assert!(matches!(err, ScanError::Io(_)));
        let err: ScanError = TransportError::NotFound("sim:x".to_string()).into();
        assert_eq!(err, ScanError::DeviceNotFound("sim:x".to_string()));
        let err: ScanError = TransportError::DeviceBusy.into();
        assert!(err.is_retryable());
    }

    #[test]
    fn test_device_error_message_carries_sense() {
        let msg = device(DeviceStatus::DeviceFault).to_string();
        assert!(msg.contains("0x1B"));
        assert!(msg.contains("asc 0x3A"));
    }
}
