//! Device identification models

use serde::{Deserialize, Serialize};

/// A scanner known to a registry, as listed by `enumerate`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceDescriptor {
    /// Registry name used to open the device
    pub name: String,
    pub vendor: String,
    pub model: String,
    /// Device type string (e.g. "flatbed scanner")
    pub device_type: String,
}
