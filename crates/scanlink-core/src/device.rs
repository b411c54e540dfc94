//! ScanDevice trait - the lifecycle every scanner backend exposes

use async_trait::async_trait;

use crate::error::ScanResult;
use crate::models::{
    DeviceDescriptor, OptionDescriptor, OptionId, OptionValue, ReadStatus, ReloadHints, Shape,
};

/// An opened scanner.
///
/// # Lifecycle
///
/// ```text
/// open → set_option* → start → read* → (Eof | cancel) → ... → close
/// ```
///
/// Configuration is rejected with `Busy` while a scan is running. A scan
/// that fails to start leaves the device released so `start` can be
/// retried without reopening.
#[async_trait]
pub trait ScanDevice: Send {
    /// Descriptor of the opened device
    fn descriptor(&self) -> &DeviceDescriptor;

    /// Descriptors of all options in their current state
    fn option_descriptors(&self) -> Vec<OptionDescriptor>;

    /// Current value of an option
    fn get_option(&self, id: OptionId) -> ScanResult<OptionValue>;

    /// Validate and store an option value
    fn set_option(&mut self, id: OptionId, value: OptionValue) -> ScanResult<ReloadHints>;

    /// Compute the output shape for the current configuration
    fn resolve_parameters(&self) -> ScanResult<Shape>;

    /// Start a scan (or the next pass of a multi-pass scan)
    async fn start(&mut self) -> ScanResult<()>;

    /// Copy scan data into `buf`
    async fn read(&mut self, buf: &mut [u8]) -> ScanResult<ReadStatus>;

    /// Switch between blocking and non-blocking `read`
    fn set_io_mode(&mut self, non_blocking: bool) -> ScanResult<()>;

    /// Abort the running scan; safe to call repeatedly
    async fn cancel(&mut self);

    /// Cancel any scan and release all resources
    async fn close(&mut self);
}
