//! List command - show configured scanners

use anyhow::Result;
use scanlink_backend::DeviceRegistry;

use crate::output::{DeviceRow, OutputContext};

/// List all attached scanners
pub fn list(registry: &DeviceRegistry, ctx: &OutputContext) -> Result<()> {
    let rows: Vec<DeviceRow> = registry
        .enumerate()
        .into_iter()
        .map(|d| DeviceRow {
            name: d.name,
            vendor: d.vendor,
            model: d.model,
            device_type: d.device_type,
        })
        .collect();

    ctx.print(&rows, "No scanners configured");
    Ok(())
}
