//! Shared data models for scanner backends

mod device;
mod geometry;
mod option;

pub use device::*;
pub use geometry::*;
pub use option::*;
