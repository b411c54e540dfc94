//! Scan geometry, color mode and frame models

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ScanError;

/// Millimetres per inch, used for every mm <-> dot conversion
pub const MM_PER_INCH: f64 = 25.4;

/// Color mode of a scan
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColorMode {
    /// 1 bit per pixel, thresholded
    Lineart,
    /// 1 bit per pixel, dithered
    Halftone,
    /// One gray channel
    Gray,
    /// Single-pass RGB
    Color,
    /// RGB captured as three separate passes (red, green, blue)
    ColorThreePass,
}

impl ColorMode {
    /// Every mode, in option order
    pub const ALL: [ColorMode; 5] = [
        ColorMode::Lineart,
        ColorMode::Halftone,
        ColorMode::Gray,
        ColorMode::Color,
        ColorMode::ColorThreePass,
    ];

    /// Option string for this mode
    pub fn as_str(&self) -> &'static str {
        match self {
            ColorMode::Lineart => "Lineart",
            ColorMode::Halftone => "Halftone",
            ColorMode::Gray => "Gray",
            ColorMode::Color => "Color",
            ColorMode::ColorThreePass => "Color3Pass",
        }
    }

    /// Bi-level modes carry one bit per pixel
    pub fn is_bilevel(&self) -> bool {
        matches!(self, ColorMode::Lineart | ColorMode::Halftone)
    }

    /// Channels transferred per pass
    pub fn channels_per_pass(&self) -> usize {
        match self {
            ColorMode::Color => 3,
            _ => 1,
        }
    }

    /// Number of passes needed for one image
    pub fn passes(&self) -> usize {
        match self {
            ColorMode::ColorThreePass => 3,
            _ => 1,
        }
    }
}

impl fmt::Display for ColorMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ColorMode {
    type Err = ScanError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ColorMode::ALL
            .into_iter()
            .find(|m| m.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| ScanError::InvalidRequest(format!("unknown color mode: {}", s)))
    }
}

/// Optical path used for the scan
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScanSource {
    Flatbed,
    /// Automatic document feeder
    Adf,
    /// Transparency unit
    Transparency,
}

impl ScanSource {
    pub const ALL: [ScanSource; 3] = [
        ScanSource::Flatbed,
        ScanSource::Adf,
        ScanSource::Transparency,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ScanSource::Flatbed => "Flatbed",
            ScanSource::Adf => "ADF",
            ScanSource::Transparency => "Transparency",
        }
    }

    /// Source code carried in the window descriptor
    pub fn code(&self) -> u8 {
        match self {
            ScanSource::Flatbed => 0x00,
            ScanSource::Adf => 0x01,
            ScanSource::Transparency => 0x02,
        }
    }
}

impl fmt::Display for ScanSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ScanSource {
    type Err = ScanError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ScanSource::ALL
            .into_iter()
            .find(|src| src.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| ScanError::InvalidRequest(format!("unknown scan source: {}", s)))
    }
}

/// Requested scan rectangle in millimetres, relative to the source origin
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScanArea {
    pub tl_x: f64,
    pub tl_y: f64,
    pub br_x: f64,
    pub br_y: f64,
}

impl ScanArea {
    pub fn new(tl_x: f64, tl_y: f64, br_x: f64, br_y: f64) -> Self {
        Self {
            tl_x,
            tl_y,
            br_x,
            br_y,
        }
    }

    pub fn width_mm(&self) -> f64 {
        (self.br_x - self.tl_x).max(0.0)
    }

    pub fn height_mm(&self) -> f64 {
        (self.br_y - self.tl_y).max(0.0)
    }
}

/// Layout of the frame delivered by `read`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FrameFormat {
    Gray,
    /// Pixel-interleaved RGB
    Rgb,
    Red,
    Green,
    Blue,
}

impl FrameFormat {
    /// Frame delivered by pass `index` of a three-pass color scan
    pub fn for_pass(index: usize) -> Self {
        match index {
            0 => FrameFormat::Red,
            1 => FrameFormat::Green,
            _ => FrameFormat::Blue,
        }
    }

    pub fn channels(&self) -> usize {
        match self {
            FrameFormat::Rgb => 3,
            _ => 1,
        }
    }
}

/// Derived output shape of a scan (the scan parameters)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Shape {
    pub format: FrameFormat,
    /// Whether this frame completes the image
    pub last_frame: bool,
    pub pixels_per_line: usize,
    pub bytes_per_line: usize,
    pub lines: usize,
    /// Bits per sample
    pub depth: u8,
}

impl Shape {
    /// Total bytes delivered for this frame
    pub fn total_bytes(&self) -> usize {
        self.bytes_per_line * self.lines
    }
}

/// Outcome of a single `read` call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadStatus {
    /// `n` bytes were written into the caller's buffer
    Data(usize),
    /// The frame is complete
    Eof,
    /// Non-blocking mode and no data queued yet
    WouldBlock,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_color_mode_parse_roundtrip() {
        for mode in ColorMode::ALL {
            assert_eq!(mode.as_str().parse::<ColorMode>().ok(), Some(mode));
        }
        assert!("gray".parse::<ColorMode>().is_ok());
        assert!("sepia".parse::<ColorMode>().is_err());
    }

    #[test]
    fn test_three_pass_frames() {
        assert_eq!(FrameFormat::for_pass(0), FrameFormat::Red);
        assert_eq!(FrameFormat::for_pass(1), FrameFormat::Green);
        assert_eq!(FrameFormat::for_pass(2), FrameFormat::Blue);
        assert_eq!(ColorMode::ColorThreePass.passes(), 3);
        assert_eq!(ColorMode::ColorThreePass.channels_per_pass(), 1);
    }

    #[test]
    fn test_area_clamps_negative_extent() {
        let area = ScanArea::new(10.0, 10.0, 5.0, 20.0);
        assert_eq!(area.width_mm(), 0.0);
        assert_eq!(area.height_mm(), 10.0);
    }
}
