//! scanlink-backend - Scanner backend engine
//!
//! This crate drives command/response scanners (SCSI-style command blocks
//! over an arbitrary transport) through the scan lifecycle and turns raw
//! sensor output into calibrated, pixel-interleaved image data.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      DeviceRegistry                          │
//! │  enumerate / open                                           │
//! │                          │                                  │
//! │                    ┌─────┴─────┐                            │
//! │                    │ScanSession│  implements ScanDevice     │
//! │                    │ (state)   │                            │
//! │                    └─────┬─────┘                            │
//! │     ┌──────────┬─────────┼──────────────┐                   │
//! │ ┌───┴────┐ ┌───┴──────┐ ┌┴───────────┐ ┌┴────────────────┐  │
//! │ │geometry│ │calibrate │ │ReaderTask  │ │OptionTable      │  │
//! │ │resolver│ │controller│ │ + reorder  │ │(constraints)    │  │
//! │ └────────┘ └───┬──────┘ └┬───────────┘ └─────────────────┘  │
//! │                └────┬────┘                                  │
//! │               ┌─────┴────────┐                              │
//! │               │CommandService│ typed command blocks,        │
//! │               │              │ status classification        │
//! │               └─────┬────────┘                              │
//! │              ┌──────┴─────────┐                             │
//! │              │ScannerTransport│ (simulated / real bus)      │
//! │              └────────────────┘                             │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! The transport is owned by exactly one side at a time: the session while
//! configuring, the reader task while a scan streams. It moves into the
//! reader at `start` and comes back through the task's join result.

pub mod calibration;
pub mod command;
pub mod config;
pub mod error;
pub mod geometry;
pub mod model;
pub mod options;
pub mod reader;
pub mod registry;
pub mod reorder;
pub mod session;
pub mod transport;

pub use calibration::{CalibrationPolicy, CalibrationProfile};
pub use command::{CommandError, CommandService, OpcodeTable};
pub use config::{BackendConfig, DeviceConfig, ScanConfig, TransportConfig};
pub use model::{Capabilities, ModelFamily};
pub use registry::DeviceRegistry;
pub use reorder::{ColorReorder, ReorderConfig};
pub use session::{ScanSession, SessionState};
pub use transport::{
    create_provider, DeviceStatus, ScannerTransport, SenseData, SimulatedScanner,
    TransportError, TransportProvider,
};

// Re-export for convenience
pub use scanlink_core::{
    ColorMode, DeviceDescriptor, FrameFormat, OptionDescriptor, OptionId, OptionValue,
    ReadStatus, ReloadHints, ScanArea, ScanDevice, ScanError, ScanResult, ScanSource, Shape,
};
