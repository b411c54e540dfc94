//! Command implementations for scanlink

pub mod list;
pub mod options;
pub mod scan;

pub use list::list;
pub use options::options;
pub use scan::{scan, ScanArgs};
