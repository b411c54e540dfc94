//! Scenario tests for scanlink backends
//!
//! Every test drives a [`ScanSession`] against an in-process
//! [`SimulatedScanner`], so no hardware is needed:
//!
//! ```bash
//! cargo test -p scanlink-tests
//! ```
//!
//! # Test Structure
//!
//! - `scan_flow_test.rs` - Complete frames: reorder, calibration, modes
//! - `cancel_test.rs` - Cancellation, close and drop during a scan
//! - `start_failure_test.rs` - Ready polling, device faults, teardown
//! - `options_test.rs` - Option constraints and the device registry

use std::sync::Arc;
use std::time::Duration;

use scanlink_backend::config::{RetryConfig, SimulatedConfig};
use scanlink_backend::{OpcodeTable, ScanConfig, ScanSession, SimulatedScanner};
use scanlink_core::{OptionId, OptionValue, ReadStatus, ScanDevice, ScanResult};

/// Device name used for every bench
pub const DEVICE: &str = "sim:bench";

/// Scan settings with a short poll interval so failure paths finish fast
pub fn fast_scan_config() -> ScanConfig {
    ScanConfig {
        ready_poll: RetryConfig {
            attempts: 5,
            interval_ms: 1,
        },
        join_timeout_ms: 2000,
        ..ScanConfig::default()
    }
}

/// Simulated tri-linear sensor at 300 dpi optical
pub fn trilinear(distance: u8) -> SimulatedConfig {
    SimulatedConfig {
        optical_dpi: 300,
        ccd_distance: distance,
        ..SimulatedConfig::default()
    }
}

/// A session opened on its own simulated scanner
pub struct Bench {
    pub scanner: SimulatedScanner,
    pub session: ScanSession,
}

impl Bench {
    pub async fn open(config: SimulatedConfig) -> ScanResult<Self> {
        Self::with_scan_config(config, fast_scan_config()).await
    }

    pub async fn with_scan_config(config: SimulatedConfig, scan: ScanConfig) -> ScanResult<Self> {
        let scanner = SimulatedScanner::new(config);
        let session = open_on(&scanner, scan).await?;
        Ok(Self { scanner, session })
    }

    /// Set the scan rectangle in millimetres
    pub fn set_area(&mut self, x: f64, y: f64, width: f64, height: f64) -> ScanResult<()> {
        self.session
            .set_option(OptionId::BrX, OptionValue::Fixed(x + width))?;
        self.session
            .set_option(OptionId::BrY, OptionValue::Fixed(y + height))?;
        self.session.set_option(OptionId::TlX, OptionValue::Fixed(x))?;
        self.session.set_option(OptionId::TlY, OptionValue::Fixed(y))?;
        Ok(())
    }

    pub fn set_mode(&mut self, mode: &str) -> ScanResult<()> {
        self.session
            .set_option(OptionId::Mode, OptionValue::Str(mode.to_string()))
            .map(|_| ())
    }

    pub fn set_resolution(&mut self, dpi: i32) -> ScanResult<()> {
        self.session
            .set_option(OptionId::Resolution, OptionValue::Int(dpi))
            .map(|_| ())
    }

    /// Start a frame and read it to `Eof`
    pub async fn scan_frame(&mut self) -> ScanResult<Vec<u8>> {
        self.session.start().await?;
        read_to_eof(&mut self.session, 4096).await
    }
}

/// Open another session on an existing scanner
pub async fn open_on(scanner: &SimulatedScanner, scan: ScanConfig) -> ScanResult<ScanSession> {
    ScanSession::open(
        DEVICE,
        Arc::new(scanner.clone()),
        scan,
        OpcodeTable::default(),
    )
    .await
}

/// Read until `Eof` with `chunk`-sized buffers
pub async fn read_to_eof(session: &mut ScanSession, chunk: usize) -> ScanResult<Vec<u8>> {
    let mut data = Vec::new();
    let mut buf = vec![0u8; chunk];
    loop {
        match session.read(&mut buf).await? {
            ReadStatus::Data(n) => data.extend_from_slice(&buf[..n]),
            ReadStatus::WouldBlock => tokio::time::sleep(Duration::from_millis(1)).await,
            ReadStatus::Eof => return Ok(data),
        }
    }
}

/// Read exactly `len` bytes of the current frame
pub async fn read_exact(session: &mut ScanSession, len: usize) -> ScanResult<Vec<u8>> {
    let mut data = vec![0u8; len];
    let mut filled = 0;
    while filled < len {
        match session.read(&mut data[filled..]).await? {
            ReadStatus::Data(n) => filled += n,
            ReadStatus::WouldBlock => tokio::time::sleep(Duration::from_millis(1)).await,
            ReadStatus::Eof => break,
        }
    }
    data.truncate(filled);
    Ok(data)
}
