//! Terminal rendering for device and option listings

use clap::ValueEnum;
use colored::Colorize;
use serde::Serialize;
use tabled::{Table, Tabled};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// Aligned columns
    #[default]
    Table,
    /// Pretty-printed JSON array
    Json,
}

/// Where and how command results are written
///
/// Listings and the final scan summary go to stdout; adjustments and
/// failures go to stderr so a JSON listing stays parseable.
pub struct OutputContext {
    pub format: OutputFormat,
    pub quiet: bool,
}

impl OutputContext {
    pub fn new(format: OutputFormat, no_color: bool, quiet: bool) -> Self {
        if no_color {
            colored::control::set_override(false);
        }
        Self { format, quiet }
    }

    pub fn success(&self, msg: &str) {
        if self.quiet {
            return;
        }
        println!("{}", msg.green());
    }

    /// Report a value the device adjusted
    pub fn warn(&self, msg: &str) {
        eprintln!("{} {}", "warning:".yellow().bold(), msg);
    }

    pub fn error(&self, msg: &str) {
        eprintln!("{}", msg.red().bold());
    }

    /// Render rows; `empty` is shown instead of an empty table
    pub fn print<T: Tabled + Serialize>(&self, rows: &[T], empty: &str) {
        match self.format {
            OutputFormat::Json => match serde_json::to_string_pretty(rows) {
                Ok(json) => println!("{}", json),
                Err(e) => self.error(&format!("Cannot encode listing: {}", e)),
            },
            OutputFormat::Table if rows.is_empty() => {
                if !self.quiet {
                    println!("{}", empty.dimmed());
                }
            }
            OutputFormat::Table => println!("{}", Table::new(rows)),
        }
    }
}

/// One configured scanner
#[derive(Debug, Tabled, Serialize)]
pub struct DeviceRow {
    #[tabled(rename = "Device")]
    pub name: String,
    #[tabled(rename = "Vendor")]
    pub vendor: String,
    #[tabled(rename = "Model")]
    pub model: String,
    #[tabled(rename = "Kind")]
    pub device_type: String,
}

/// One option with its current value and constraint
#[derive(Debug, Tabled, Serialize)]
pub struct OptionRow {
    #[tabled(rename = "Option")]
    pub name: String,
    #[tabled(rename = "Current")]
    pub value: String,
    #[tabled(rename = "Unit")]
    pub unit: String,
    #[tabled(rename = "Allowed")]
    pub constraint: String,
    #[tabled(rename = "Settable", display_with = "display_active")]
    pub active: bool,
}

fn display_active(active: &bool) -> String {
    if *active { "yes" } else { "no" }.to_string()
}
