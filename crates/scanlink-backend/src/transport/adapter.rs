//! Transport adapter traits

use async_trait::async_trait;

use super::{DeviceStatus, SenseData, TransportError};

/// One device's command channel
///
/// This trait abstracts the underlying bus (SCSI generic, USB bulk, a
/// simulator) and provides a uniform way to exchange command blocks. A
/// handle is owned by exactly one task at a time, so methods take
/// `&mut self` and the trait only needs `Send`.
#[async_trait]
pub trait ScannerTransport: Send {
    /// Send a command block and wait for its completion
    ///
    /// # Arguments
    /// * `cdb` - The command descriptor block
    /// * `payload` - Data-out bytes (empty for data-in commands)
    /// * `expected_len` - Maximum number of data-in bytes to accept
    ///
    /// # Returns
    /// The data-in bytes (possibly shorter than `expected_len`), or an
    /// error. A failed command surfaces as [`TransportError::CheckCondition`].
    async fn send(
        &mut self,
        cdb: &[u8],
        payload: &[u8],
        expected_len: usize,
    ) -> Result<Vec<u8>, TransportError>;

    /// Map a device fault report to a status kind
    ///
    /// Transports for devices with vendor-specific sense codes override
    /// this; the default follows the standard sense key/ASC table.
    fn classify(&self, sense: &SenseData) -> DeviceStatus {
        sense.classify()
    }

    /// Largest data-in transfer accepted in one command
    fn max_transfer(&self) -> usize;

    /// Name the handle was opened with
    fn name(&self) -> &str;

    /// Close the channel; further sends fail with `ConnectionClosed`
    async fn close(&mut self) -> Result<(), TransportError>;
}

/// Opens transport handles by device name
#[async_trait]
pub trait TransportProvider: Send + Sync {
    /// Open a new handle to the named device
    async fn open(&self, name: &str) -> Result<Box<dyn ScannerTransport>, TransportError>;
}
