//! Backend configuration
//!
//! This module contains the configuration types for the scanner backend:
//! the device list, per-device transport settings, scan tuning and
//! opcode overrides. Every field has a default, so an empty file is a
//! valid configuration.
//!
//! ```toml
//! [[devices]]
//! name = "sim:flatbed"
//!
//! [devices.transport]
//! type = "simulated"
//! model = "FlatScan 1200"
//! ccd_distance = 8
//!
//! [devices.scan]
//! stripe_lines = 32
//!
//! [devices.scan.calibration]
//! policy = "last-line"
//!
//! [devices.opcode_overrides]
//! read = "0xC8"
//! ```

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::calibration::CalibrationPolicy;
use crate::error::ConfigError;

/// Top-level backend configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BackendConfig {
    /// Devices offered by the registry
    #[serde(default)]
    pub devices: Vec<DeviceConfig>,
}

impl BackendConfig {
    /// Load configuration from a TOML file
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::Io(format!("{}: {}", path.display(), e)))?;
        Self::from_toml_str(&content)
    }

    /// Parse configuration from TOML text
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Configuration with one simulated flatbed, used when no file is given
    pub fn simulated() -> Self {
        Self {
            devices: vec![DeviceConfig::default()],
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        let mut seen = std::collections::HashSet::new();
        for device in &self.devices {
            if device.name.trim().is_empty() {
                return Err(ConfigError::Invalid("device name is empty".to_string()));
            }
            if !seen.insert(device.name.as_str()) {
                return Err(ConfigError::Invalid(format!(
                    "duplicate device name: {}",
                    device.name
                )));
            }
            device.scan.validate(&device.name)?;
        }
        Ok(())
    }
}

/// One configured device
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceConfig {
    /// Registry name used to open the device
    #[serde(default = "default_device_name")]
    pub name: String,
    /// Transport configuration
    #[serde(default)]
    pub transport: TransportConfig,
    /// Scan tuning
    #[serde(default)]
    pub scan: ScanConfig,
    /// Opcode overrides for devices with a non-standard command set
    #[serde(default)]
    pub opcode_overrides: OpcodeOverrides,
}

fn default_device_name() -> String {
    "sim:flatbed".to_string()
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            name: default_device_name(),
            transport: TransportConfig::default(),
            scan: ScanConfig::default(),
            opcode_overrides: OpcodeOverrides::default(),
        }
    }
}

// =============================================================================
// Transport Configuration
// =============================================================================

/// Transport configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum TransportConfig {
    /// In-process simulated scanner
    Simulated(SimulatedConfig),
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self::Simulated(SimulatedConfig::default())
    }
}

/// Test image generated by the simulated scanner
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImagePattern {
    /// Every sample of document line `n` carries `n % 256`
    #[default]
    LineTag,
    /// Horizontal ramp, useful for viewing output
    Gradient,
}

/// Fault reported by the simulated scanner at the next SCAN
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SimulatedFault {
    NoMedia,
    CoverOpen,
    Jammed,
    HardwareError,
}

/// Simulated scanner configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimulatedConfig {
    #[serde(default = "default_vendor")]
    pub vendor: String,
    #[serde(default = "default_model")]
    pub model: String,
    /// Optical (sensor) resolution in dpi
    #[serde(default = "default_optical_dpi")]
    pub optical_dpi: u16,
    #[serde(default = "default_min_dpi")]
    pub min_dpi: u16,
    #[serde(default = "default_max_dpi")]
    pub max_dpi: u16,
    /// Coordinate base of window positions (dots per inch)
    #[serde(default = "default_base_dpi")]
    pub base_dpi: u16,
    /// Supported modes
    #[serde(default = "default_modes")]
    pub modes: Vec<scanlink_core::ColorMode>,
    /// CCD row distance at optical resolution; zero for single-row sensors
    #[serde(default)]
    pub ccd_distance: u8,
    /// Device leaves Y scaling to the host (reads at optical Y resolution)
    #[serde(default)]
    pub host_y_scaling: bool,
    /// Device needs host-side shading calibration before each scan
    #[serde(default = "default_true")]
    pub host_calibration: bool,
    /// Device answers READ calibration info
    #[serde(default = "default_true")]
    pub reports_calibration_info: bool,
    /// Shading is uploaded once per color
    #[serde(default)]
    pub per_color_shading: bool,
    #[serde(default)]
    pub supports_16bit: bool,
    /// Document feeder present
    #[serde(default)]
    pub adf: bool,
    /// Transparency unit present
    #[serde(default)]
    pub transparency: bool,
    /// Largest data-in transfer
    #[serde(default = "default_max_transfer")]
    pub max_transfer: usize,
    /// Number of TEST UNIT READY polls answered busy after reserve
    #[serde(default)]
    pub busy_polls: u32,
    /// Number of image READs answered busy after SCAN
    #[serde(default)]
    pub busy_reads: u32,
    /// Delay added to every command (milliseconds)
    #[serde(default)]
    pub latency_ms: u64,
    /// Extra delay added to every image READ (milliseconds)
    #[serde(default)]
    pub read_delay_ms: u64,
    /// Fail image READs with an I/O error after this many succeeded
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fail_after_reads: Option<u32>,
    /// Fault raised at SCAN, or at TEST UNIT READY for an open cover
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fault: Option<SimulatedFault>,
    #[serde(default)]
    pub pattern: ImagePattern,
    /// Shading reference lines reported in calibration info
    #[serde(default = "default_calibration_lines")]
    pub calibration_lines: u16,
    /// Return sense data with CHECK CONDITION; otherwise the host must
    /// issue REQUEST SENSE
    #[serde(default = "default_true")]
    pub autosense: bool,
    /// Opcodes the simulated device answers to
    #[serde(default)]
    pub opcode_overrides: OpcodeOverrides,
}

fn default_vendor() -> String {
    "SCANLINK".to_string()
}

fn default_model() -> String {
    "Simulated Flatbed".to_string()
}

fn default_optical_dpi() -> u16 {
    600
}

fn default_min_dpi() -> u16 {
    50
}

fn default_max_dpi() -> u16 {
    1200
}

fn default_base_dpi() -> u16 {
    1200
}

fn default_modes() -> Vec<scanlink_core::ColorMode> {
    use scanlink_core::ColorMode;
    vec![
        ColorMode::Lineart,
        ColorMode::Halftone,
        ColorMode::Gray,
        ColorMode::Color,
    ]
}

fn default_true() -> bool {
    true
}

fn default_max_transfer() -> usize {
    64 * 1024
}

fn default_calibration_lines() -> u16 {
    16
}

impl Default for SimulatedConfig {
    fn default() -> Self {
        Self {
            vendor: default_vendor(),
            model: default_model(),
            optical_dpi: default_optical_dpi(),
            min_dpi: default_min_dpi(),
            max_dpi: default_max_dpi(),
            base_dpi: default_base_dpi(),
            modes: default_modes(),
            ccd_distance: 0,
            host_y_scaling: false,
            host_calibration: true,
            reports_calibration_info: true,
            per_color_shading: false,
            supports_16bit: false,
            adf: false,
            transparency: false,
            max_transfer: default_max_transfer(),
            busy_polls: 0,
            busy_reads: 0,
            latency_ms: 0,
            read_delay_ms: 0,
            fail_after_reads: None,
            fault: None,
            pattern: ImagePattern::default(),
            calibration_lines: default_calibration_lines(),
            autosense: true,
            opcode_overrides: OpcodeOverrides::default(),
        }
    }
}

// =============================================================================
// Scan Configuration
// =============================================================================

/// Per-device scan tuning
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanConfig {
    /// Busy-retry budget for the ready poll and for bulk reads
    #[serde(default)]
    pub ready_poll: RetryConfig,
    /// Lines per bulk read (one scan stripe)
    #[serde(default = "default_stripe_lines")]
    pub stripe_lines: usize,
    /// Chunks buffered between the reader task and `read`
    #[serde(default = "default_channel_depth")]
    pub channel_depth: usize,
    /// Bound on waiting for the reader task to stop (milliseconds)
    #[serde(default = "default_join_timeout_ms")]
    pub join_timeout_ms: u64,
    #[serde(default)]
    pub calibration: CalibrationConfig,
    /// Resolution option quantum in dpi; zero accepts any value in range
    #[serde(default)]
    pub resolution_quant: u16,
}

fn default_stripe_lines() -> usize {
    64
}

fn default_channel_depth() -> usize {
    8
}

fn default_join_timeout_ms() -> u64 {
    5000
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            ready_poll: RetryConfig::default(),
            stripe_lines: default_stripe_lines(),
            channel_depth: default_channel_depth(),
            join_timeout_ms: default_join_timeout_ms(),
            calibration: CalibrationConfig::default(),
            resolution_quant: 0,
        }
    }
}

impl ScanConfig {
    pub fn join_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.join_timeout_ms)
    }

    fn validate(&self, device: &str) -> Result<(), ConfigError> {
        if self.stripe_lines == 0 {
            return Err(ConfigError::Invalid(format!(
                "{}: stripe_lines must be at least 1",
                device
            )));
        }
        if self.channel_depth == 0 {
            return Err(ConfigError::Invalid(format!(
                "{}: channel_depth must be at least 1",
                device
            )));
        }
        if self.ready_poll.attempts == 0 {
            return Err(ConfigError::Invalid(format!(
                "{}: ready_poll.attempts must be at least 1",
                device
            )));
        }
        Ok(())
    }
}

/// Retry budget
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_attempts")]
    pub attempts: u32,
    #[serde(default = "default_interval_ms")]
    pub interval_ms: u64,
}

fn default_attempts() -> u32 {
    50
}

fn default_interval_ms() -> u64 {
    100
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            attempts: default_attempts(),
            interval_ms: default_interval_ms(),
        }
    }
}

/// Shading calibration settings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CalibrationConfig {
    #[serde(default)]
    pub policy: CalibrationPolicy,
    /// Upload `max - value` instead of the reference
    #[serde(default)]
    pub invert: bool,
    /// Reference lines read when the device does not report its own count
    #[serde(default = "default_fallback_lines")]
    pub fallback_lines: u16,
}

fn default_fallback_lines() -> u16 {
    8
}

impl Default for CalibrationConfig {
    fn default() -> Self {
        Self {
            policy: CalibrationPolicy::default(),
            invert: false,
            fallback_lines: default_fallback_lines(),
        }
    }
}

/// Deserialize an optional opcode (supports "0x28" or 40)
fn deserialize_opcode<'de, D>(deserializer: D) -> Result<Option<u8>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    use serde::de::Error;

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum HexOrInt {
        Hex(String),
        Int(u8),
    }

    match Option::<HexOrInt>::deserialize(deserializer)? {
        None => Ok(None),
        Some(HexOrInt::Int(n)) => Ok(Some(n)),
        Some(HexOrInt::Hex(s)) => {
            let s = s.trim();
            let digits = s
                .strip_prefix("0x")
                .or_else(|| s.strip_prefix("0X"))
                .unwrap_or(s);
            u8::from_str_radix(digits, 16)
                .map(Some)
                .map_err(|e| D::Error::custom(format!("invalid opcode '{}': {}", s, e)))
        }
    }
}

/// Opcode overrides for devices with non-standard numbering
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpcodeOverrides {
    /// TEST UNIT READY (standard: 0x00)
    #[serde(
        default,
        deserialize_with = "deserialize_opcode",
        skip_serializing_if = "Option::is_none"
    )]
    pub test_unit_ready: Option<u8>,
    /// REQUEST SENSE (standard: 0x03)
    #[serde(
        default,
        deserialize_with = "deserialize_opcode",
        skip_serializing_if = "Option::is_none"
    )]
    pub request_sense: Option<u8>,
    /// INQUIRY (standard: 0x12)
    #[serde(
        default,
        deserialize_with = "deserialize_opcode",
        skip_serializing_if = "Option::is_none"
    )]
    pub inquiry: Option<u8>,
    /// RESERVE UNIT (standard: 0x16)
    #[serde(
        default,
        deserialize_with = "deserialize_opcode",
        skip_serializing_if = "Option::is_none"
    )]
    pub reserve_unit: Option<u8>,
    /// RELEASE UNIT (standard: 0x17)
    #[serde(
        default,
        deserialize_with = "deserialize_opcode",
        skip_serializing_if = "Option::is_none"
    )]
    pub release_unit: Option<u8>,
    /// SCAN (standard: 0x1B)
    #[serde(
        default,
        deserialize_with = "deserialize_opcode",
        skip_serializing_if = "Option::is_none"
    )]
    pub scan: Option<u8>,
    /// SET WINDOW (standard: 0x24)
    #[serde(
        default,
        deserialize_with = "deserialize_opcode",
        skip_serializing_if = "Option::is_none"
    )]
    pub set_window: Option<u8>,
    /// READ (standard: 0x28)
    #[serde(
        default,
        deserialize_with = "deserialize_opcode",
        skip_serializing_if = "Option::is_none"
    )]
    pub read: Option<u8>,
    /// SEND (standard: 0x2A)
    #[serde(
        default,
        deserialize_with = "deserialize_opcode",
        skip_serializing_if = "Option::is_none"
    )]
    pub send: Option<u8>,
    /// OBJECT POSITION (standard: 0x31)
    #[serde(
        default,
        deserialize_with = "deserialize_opcode",
        skip_serializing_if = "Option::is_none"
    )]
    pub object_position: Option<u8>,
}
