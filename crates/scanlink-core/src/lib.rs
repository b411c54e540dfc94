//! scanlink-core - Core traits and types for scanner backends
//!
//! This crate provides the caller-facing abstractions shared by every
//! scanner backend: the error taxonomy, geometry and mode models, option
//! descriptors and the [`ScanDevice`] lifecycle trait.

pub mod device;
pub mod error;
pub mod models;

pub use device::ScanDevice;
pub use error::{ScanError, ScanResult};
pub use models::*;
