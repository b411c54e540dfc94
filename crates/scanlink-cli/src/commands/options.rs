//! Options command - show a scanner's options and current values

use anyhow::{Context, Result};
use scanlink_backend::DeviceRegistry;
use scanlink_core::{Constraint, ScanDevice, Unit};

use crate::output::{OptionRow, OutputContext};

fn describe_constraint(constraint: &Constraint) -> String {
    match constraint {
        Constraint::None => "-".to_string(),
        Constraint::Range { min, max, quant } if *quant > 0.0 => {
            format!("{}..{} step {}", min, max, quant)
        }
        Constraint::Range { min, max, .. } => format!("{}..{}", min, max),
        Constraint::WordList(words) => words
            .iter()
            .map(|w| w.to_string())
            .collect::<Vec<_>>()
            .join("|"),
        Constraint::StringList(items) => items.join("|"),
    }
}

fn unit_name(unit: Unit) -> &'static str {
    match unit {
        Unit::None => "",
        Unit::Bit => "bit",
        Unit::Mm => "mm",
        Unit::Dpi => "dpi",
    }
}

/// Show every option of `device`
pub async fn options(registry: &DeviceRegistry, device: &str, ctx: &OutputContext) -> Result<()> {
    let mut session = registry
        .open(device)
        .await
        .with_context(|| format!("Failed to open {}", device))?;

    let mut rows = Vec::new();
    for descriptor in session.option_descriptors() {
        let value = session.get_option(descriptor.id)?;
        rows.push(OptionRow {
            name: descriptor.id.name().to_string(),
            value: value.to_string(),
            unit: unit_name(descriptor.unit).to_string(),
            constraint: describe_constraint(&descriptor.constraint),
            active: descriptor.active,
        });
    }
    session.close().await;

    ctx.print(&rows, "Device has no options");
    Ok(())
}
