//! Common error types for scanner backends

use thiserror::Error;

/// Result type for scanner operations
pub type ScanResult<T> = Result<T, ScanError>;

/// Errors that can occur while driving a scanner
///
/// Device-specific fault reports are classified into these kinds once, at
/// the transport boundary. Callers never need per-device knowledge to act
/// on them.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ScanError {
    /// Device or session is busy; the caller may retry
    #[error("Device busy")]
    Busy,

    /// Retry budget exhausted while waiting for the device
    #[error("Timed out waiting for device")]
    Timeout,

    /// Document feeder is empty
    #[error("No document in feeder")]
    NoMedia,

    /// Scanner cover or feeder lid is open
    #[error("Scanner cover is open")]
    CoverOpen,

    /// Paper jam in the document feeder
    #[error("Document feeder jammed")]
    Jammed,

    /// Bad option value or command sequence (caller error)
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Transport or device failure
    #[error("I/O error: {0}")]
    Io(String),

    /// Buffer allocation failed
    #[error("Out of memory")]
    OutOfMemory,

    /// Scan was cancelled (normal terminal state)
    #[error("Scan cancelled")]
    Cancelled,

    /// No device registered under the given name
    #[error("Device not found: {0}")]
    DeviceNotFound(String),

    /// Requested feature is not supported by this device
    #[error("Not supported: {0}")]
    Unsupported(String),
}

impl ScanError {
    /// Whether the caller can retry the same call later
    pub fn is_retryable(&self) -> bool {
        matches!(self, ScanError::Busy)
    }

    /// Whether the error is an externally fixable feeder fault
    pub fn is_feeder_fault(&self) -> bool {
        matches!(
            self,
            ScanError::NoMedia | ScanError::CoverOpen | ScanError::Jammed
        )
    }

    /// Short stable name for logs and CLI output
    pub fn kind(&self) -> &'static str {
        match self {
            ScanError::Busy => "busy",
            ScanError::Timeout => "timeout",
            ScanError::NoMedia => "no_media",
            ScanError::CoverOpen => "cover_open",
            ScanError::Jammed => "jammed",
            ScanError::InvalidRequest(_) => "invalid_request",
            ScanError::Io(_) => "io_error",
            ScanError::OutOfMemory => "out_of_memory",
            ScanError::Cancelled => "cancelled",
            ScanError::DeviceNotFound(_) => "device_not_found",
            ScanError::Unsupported(_) => "unsupported",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_busy_is_retryable() {
        assert!(ScanError::Busy.is_retryable());
        assert!(!ScanError::Timeout.is_retryable());
        assert!(!ScanError::Io("x".to_string()).is_retryable());
        assert!(!ScanError::Cancelled.is_retryable());
    }

    #[test]
    fn test_feeder_faults() {
        assert!(ScanError::NoMedia.is_feeder_fault());
        assert!(ScanError::CoverOpen.is_feeder_fault());
        assert!(ScanError::Jammed.is_feeder_fault());
        assert!(!ScanError::Busy.is_feeder_fault());
    }
}
