//! Scan command - run a scan into a PNM file

use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::Args;
use indicatif::{ProgressBar, ProgressStyle};
use scanlink_backend::{DeviceRegistry, ScanSession};
use scanlink_core::{OptionId, OptionValue, ReadStatus, ScanDevice};
use tracing::debug;

use crate::output::OutputContext;
use crate::pnm::{self, ScannedFrame};

/// Bytes requested per `read` call
const READ_BUFFER: usize = 32 * 1024;

#[derive(Debug, Args)]
pub struct ScanArgs {
    /// Scan mode: lineart, halftone, gray, color, color3pass
    #[arg(long)]
    mode: Option<String>,

    /// Resolution in dpi
    #[arg(long)]
    resolution: Option<i32>,

    /// Scan source: flatbed, adf, transparency
    #[arg(long)]
    source: Option<String>,

    /// Left edge in mm
    #[arg(long, default_value_t = 0.0)]
    x: f64,

    /// Top edge in mm
    #[arg(long, default_value_t = 0.0)]
    y: f64,

    /// Width in mm (defaults to the rest of the bed)
    #[arg(long)]
    width: Option<f64>,

    /// Height in mm (defaults to the rest of the bed)
    #[arg(long)]
    height: Option<f64>,

    /// Fast low-resolution scan
    #[arg(long)]
    preview: bool,

    /// Output file (.pbm, .pgm or .ppm)
    #[arg(short = 'O', long)]
    output: PathBuf,
}

fn set(
    session: &mut ScanSession,
    ctx: &OutputContext,
    id: OptionId,
    value: OptionValue,
) -> Result<()> {
    let requested = value.to_string();
    let hints = session
        .set_option(id, value)
        .with_context(|| format!("Invalid value {} for {}", requested, id))?;
    if hints.inexact {
        let stored = session.get_option(id)?;
        ctx.warn(&format!("{} adjusted from {} to {}", id, requested, stored));
    }
    Ok(())
}

fn apply(session: &mut ScanSession, args: &ScanArgs, ctx: &OutputContext) -> Result<()> {
    if let Some(source) = &args.source {
        set(session, ctx, OptionId::Source, OptionValue::Str(source.clone()))?;
    }
    if let Some(mode) = &args.mode {
        set(session, ctx, OptionId::Mode, OptionValue::Str(mode.clone()))?;
    }
    if let Some(resolution) = args.resolution {
        set(session, ctx, OptionId::Resolution, OptionValue::Int(resolution))?;
    }
    if args.preview {
        set(session, ctx, OptionId::Preview, OptionValue::Bool(true))?;
    }

    if let Some(width) = args.width {
        set(session, ctx, OptionId::BrX, OptionValue::Fixed(args.x + width))?;
    }
    if let Some(height) = args.height {
        set(session, ctx, OptionId::BrY, OptionValue::Fixed(args.y + height))?;
    }
    set(session, ctx, OptionId::TlX, OptionValue::Fixed(args.x))?;
    set(session, ctx, OptionId::TlY, OptionValue::Fixed(args.y))?;
    Ok(())
}

async fn read_frame(
    session: &mut ScanSession,
    total: usize,
    ctx: &OutputContext,
) -> Result<Vec<u8>> {
    let progress = if ctx.quiet {
        ProgressBar::hidden()
    } else {
        ProgressBar::new(total as u64)
    };
    progress.set_style(
        ProgressStyle::with_template("{bar:40} {bytes}/{total_bytes} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar()),
    );

    let mut data = Vec::with_capacity(total);
    let mut buf = vec![0u8; READ_BUFFER];
    loop {
        let polled = tokio::select! {
            status = session.read(&mut buf) => Some(status),
            _ = tokio::signal::ctrl_c() => None,
        };
        let Some(status) = polled else {
            progress.abandon_with_message("cancelled");
            session.cancel().await;
            bail!("Scan cancelled");
        };
        match status.context("Scan failed")? {
            ReadStatus::Data(n) => {
                data.extend_from_slice(&buf[..n]);
                progress.inc(n as u64);
            }
            ReadStatus::WouldBlock => tokio::task::yield_now().await,
            ReadStatus::Eof => break,
        }
    }
    progress.finish_and_clear();
    Ok(data)
}

/// Scan every frame of one image and write it to `args.output`
pub async fn scan(
    registry: &DeviceRegistry,
    device: &str,
    args: &ScanArgs,
    ctx: &OutputContext,
) -> Result<()> {
    let mut session = registry
        .open(device)
        .await
        .with_context(|| format!("Failed to open {}", device))?;

    let result = scan_frames(&mut session, args, ctx).await;
    session.close().await;
    let frames = result?;

    let image = pnm::encode(&frames)?;
    std::fs::write(&args.output, &image)
        .with_context(|| format!("Failed to write {}", args.output.display()))?;

    let shape = &frames[0].shape;
    ctx.success(&format!(
        "Wrote {} ({}x{}, {} frame{})",
        args.output.display(),
        shape.pixels_per_line,
        shape.lines,
        frames.len(),
        if frames.len() == 1 { "" } else { "s" }
    ));
    Ok(())
}

async fn scan_frames(
    session: &mut ScanSession,
    args: &ScanArgs,
    ctx: &OutputContext,
) -> Result<Vec<ScannedFrame>> {
    apply(session, args, ctx)?;

    let mut frames = Vec::new();
    loop {
        let shape = session.resolve_parameters()?;
        debug!(?shape, "Starting frame");
        session.start().await.context("Failed to start scan")?;
        let data = read_frame(session, shape.total_bytes(), ctx).await?;
        let last = shape.last_frame;
        frames.push(ScannedFrame { shape, data });
        if last {
            break;
        }
    }
    Ok(frames)
}
