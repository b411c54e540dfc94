//! Geometry and mode resolver
//!
//! Pure computation from the configured options to device-native units:
//! window dots at the coordinate base, output shape, and the raw transfer
//! the reader task must pull (including the reorder over-read).

use scanlink_core::{
    ColorMode, FrameFormat, ScanArea, ScanError, ScanResult, ScanSource, Shape, MM_PER_INCH,
};

use crate::command::{ImageComposition, WindowDescriptor};
use crate::model::{Capabilities, ModelFamily};
use crate::reorder::{ReorderConfig, YScaling};

/// Neutral brightness/threshold/contrast
const NEUTRAL: u8 = 0x80;

/// Configuration snapshot the resolver works from
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScanRequest {
    pub mode: ColorMode,
    pub source: ScanSource,
    pub resolution: u16,
    /// Bits per sample for gray and color modes
    pub depth: u8,
    pub area: ScanArea,
    pub preview: bool,
    /// Pass index of a three-pass color scan
    pub pass: usize,
}

/// Everything needed to run one frame
#[derive(Debug, Clone, PartialEq)]
pub struct ScanPlan {
    pub shape: Shape,
    pub window: WindowDescriptor,
    /// Bytes of one raw line as the device delivers it
    pub raw_bytes_per_line: usize,
    /// Raw lines the reader task must pull
    pub raw_lines: usize,
    pub reorder: Option<ReorderConfig>,
    /// Effective resolution (preview forces the minimum)
    pub resolution: u16,
}

/// Millimetres to base dots, rounded to nearest
pub fn mm_to_dots(mm: f64, base_dpi: u16) -> u32 {
    (mm / MM_PER_INCH * f64::from(base_dpi)).round().max(0.0) as u32
}

fn invalid(msg: impl Into<String>) -> ScanError {
    ScanError::InvalidRequest(msg.into())
}

/// Resolve a request against the device capabilities
pub fn resolve(
    caps: &Capabilities,
    family: ModelFamily,
    request: &ScanRequest,
) -> ScanResult<ScanPlan> {
    let mode = request.mode;
    if !caps.supports_mode(mode) {
        return Err(ScanError::Unsupported(format!("mode {}", mode)));
    }

    let resolution = if request.preview {
        caps.min_dpi
    } else {
        request.resolution
    };
    if resolution < caps.min_dpi || resolution > caps.max_dpi {
        return Err(invalid(format!(
            "resolution {} outside {}..={}",
            resolution, caps.min_dpi, caps.max_dpi
        )));
    }
    if resolution > caps.base_dpi {
        return Err(invalid(format!(
            "resolution {} above coordinate base {}",
            resolution, caps.base_dpi
        )));
    }

    let limit = caps
        .area_limit(request.source)
        .ok_or_else(|| ScanError::Unsupported(format!("source {}", request.source)))?;

    let base = caps.base_dpi;
    let ulx = mm_to_dots(request.area.tl_x, base);
    let uly = mm_to_dots(request.area.tl_y, base);
    if ulx >= limit.width || uly >= limit.length {
        return Err(invalid("scan area starts outside the bed"));
    }
    let width_dots = mm_to_dots(request.area.width_mm(), base).min(limit.width - ulx);
    let length_dots = mm_to_dots(request.area.height_mm(), base).min(limit.length - uly);

    let res = resolution as usize;
    let mut pixels = width_dots as usize * res / base as usize;
    if mode.is_bilevel() {
        pixels &= !7;
    }
    let lines = length_dots as usize * res / base as usize;
    if pixels == 0 || lines == 0 {
        return Err(invalid("scan area is empty at this resolution"));
    }

    let depth = if mode.is_bilevel() {
        1
    } else {
        match request.depth {
            8 => 8,
            16 if caps.supports_16bit => 16,
            other => return Err(invalid(format!("unsupported bit depth {}", other))),
        }
    };
    let bytes_per_sample = usize::from(depth.max(8) / 8);

    let bytes_per_line = if mode.is_bilevel() {
        pixels / 8
    } else {
        pixels * mode.channels_per_pass() * bytes_per_sample
    };

    let (format, last_frame) = match mode {
        ColorMode::Color => (FrameFormat::Rgb, true),
        ColorMode::ColorThreePass => {
            if request.pass >= mode.passes() {
                return Err(invalid(format!("pass {} out of range", request.pass)));
            }
            (
                FrameFormat::for_pass(request.pass),
                request.pass + 1 == mode.passes(),
            )
        }
        _ => (FrameFormat::Gray, true),
    };

    let shape = Shape {
        format,
        last_frame,
        pixels_per_line: pixels,
        bytes_per_line,
        lines,
        depth,
    };

    // Host Y scaling reads optical lines and only runs on the reorder path
    let host_y_scaling = caps.host_y_scaling
        && resolution < caps.optical_dpi
        && family.needs_reorder(caps, mode, caps.optical_dpi);
    let device_y_dpi = if host_y_scaling {
        caps.optical_dpi
    } else {
        resolution
    };

    let reorder = family
        .needs_reorder(caps, mode, device_y_dpi)
        .then(|| ReorderConfig {
            distance: family.line_distance(caps, device_y_dpi),
            pixels_per_line: pixels,
            bytes_per_sample,
            output_lines: lines,
            y_scaling: host_y_scaling.then_some(YScaling {
                target: resolution,
                optical: caps.optical_dpi,
            }),
        });
    let raw_lines = reorder.map_or(lines, |r| r.raw_lines());

    // Re-derive window extents so the device computes exactly our counts
    let window_width = (pixels * base as usize).div_ceil(res) as u32;
    let window_length = (raw_lines * base as usize).div_ceil(device_y_dpi as usize) as u32;

    let composition = match mode {
        ColorMode::Lineart => ImageComposition::Lineart,
        ColorMode::Halftone => ImageComposition::Halftone,
        ColorMode::Gray | ColorMode::ColorThreePass => ImageComposition::Gray,
        ColorMode::Color => ImageComposition::Color,
    };
    let color_filter = match mode {
        ColorMode::ColorThreePass => request.pass as u8 + 1,
        _ => 0,
    };

    let window = WindowDescriptor {
        x_resolution: resolution,
        y_resolution: device_y_dpi,
        ulx,
        uly,
        width: window_width,
        length: window_length,
        brightness: NEUTRAL,
        threshold: NEUTRAL,
        contrast: NEUTRAL,
        composition,
        bits_per_sample: depth,
        source: request.source.code(),
        color_filter,
        line_interleaved: reorder.is_some(),
        host_y_scaling,
    };

    Ok(ScanPlan {
        shape,
        window,
        raw_bytes_per_line: bytes_per_line,
        raw_lines,
        reorder,
        resolution,
    })
}
