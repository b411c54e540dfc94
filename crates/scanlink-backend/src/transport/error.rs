//! Transport layer errors

use thiserror::Error;

#[derive(Debug, Error, Clone)]
pub enum TransportError {
    #[error("Device not found: {0}")]
    NotFound(String),

    #[error("Open failed: {0}")]
    OpenFailed(String),

    #[error("Connection closed")]
    ConnectionClosed,

    /// Device answered with CHECK CONDITION; `sense` is the autosense data
    /// (empty when the transport does not collect it)
    #[error("Check condition (sense {})", hex::encode(.sense))]
    CheckCondition { sense: Vec<u8> },

    /// Device reported BUSY status for the command
    #[error("Device busy")]
    DeviceBusy,

    #[error("I/O failed: {0}")]
    Io(String),

    #[error("Timeout: {0}")]
    Timeout(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Transport not supported: {0}")]
    Unsupported(String),

    #[error("Protocol error: {0}")]
    ProtocolError(String),
}
