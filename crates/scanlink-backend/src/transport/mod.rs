//! Transport layer for scanner communication
//!
//! This module provides the command channel abstraction:
//! - [`ScannerTransport`] - one open handle to a device
//! - [`TransportProvider`] - opens handles by name
//! - [`SimulatedScanner`] - an in-process scanner for tests and demos
//! - sense data classification into [`DeviceStatus`]
//!
//! # Example
//!
//! ```ignore
//! use scanlink_backend::transport::{create_provider, TransportProvider};
//! use scanlink_backend::config::TransportConfig;
//!
//! let provider = create_provider(&TransportConfig::default())?;
//! let mut handle = provider.open("sim:flatbed").await?;
//! let inquiry = handle.send(&[0x12, 0, 0, 0, 96, 0], &[], 96).await?;
//! ```

mod adapter;
pub mod error;
pub mod sense;
pub mod simulated;

pub use adapter::{ScannerTransport, TransportProvider};
pub use error::TransportError;
pub use sense::{DeviceStatus, SenseData};
pub use simulated::SimulatedScanner;

use std::sync::Arc;

use crate::config::TransportConfig;

/// Create a transport provider based on configuration
pub fn create_provider(
    config: &TransportConfig,
) -> Result<Arc<dyn TransportProvider>, TransportError> {
    match config {
        TransportConfig::Simulated(cfg) => Ok(Arc::new(SimulatedScanner::new(cfg.clone()))),
    }
}
