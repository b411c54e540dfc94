//! Command layer errors

use thiserror::Error;

use crate::transport::{DeviceStatus, SenseData, TransportError};

#[derive(Debug, Error, Clone)]
pub enum CommandError {
    /// Device completed the command with a classified fault
    #[error("Command 0x{opcode:02X} failed: {status}{}", sense_suffix(.sense))]
    Device {
        opcode: u8,
        status: DeviceStatus,
        sense: Option<SenseData>,
    },

    /// Device stayed busy for the whole retry budget
    #[error("Device not ready after {attempts} attempts")]
    NotReady { attempts: u32 },

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    /// Length does not fit the 24-bit transfer length field
    #[error("Transfer of {length} bytes exceeds the command's length field")]
    TransferTooLarge { length: usize },
}

impl CommandError {
    /// Classified device status, if the device answered
    pub fn status(&self) -> Option<DeviceStatus> {
        match self {
            CommandError::Device { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Whether the device asked to retry later
    pub fn is_busy(&self) -> bool {
        self.status() == Some(DeviceStatus::Busy)
    }
}

fn sense_suffix(sense: &Option<SenseData>) -> String {
    sense.map(|s| format!(" ({})", s)).unwrap_or_default()
}
