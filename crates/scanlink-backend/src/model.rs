//! Device capabilities and model family
//!
//! Capabilities are decoded once at open from the vendor-specific area of
//! the INQUIRY response. Every model-dependent decision is a method on
//! [`ModelFamily`] or [`Capabilities`].
//!
//! Capability block layout (34 bytes, big-endian, at INQUIRY offset 36):
//!
//! | offset | size | field |
//! |---|---|---|
//! | 0 | 1 | block version |
//! | 1 | 1 | mode bitmask (bit 0 lineart, 1 halftone, 2 gray, 3 color, 4 three-pass color) |
//! | 2 | 2 | optical resolution |
//! | 4 | 2 | minimum resolution |
//! | 6 | 2 | maximum resolution |
//! | 8 | 2 | coordinate base (dots per inch) |
//! | 10 | 4 | flatbed width (base dots) |
//! | 14 | 4 | flatbed length (base dots) |
//! | 18 | 4 | transparency width (0 = none) |
//! | 22 | 4 | transparency length |
//! | 26 | 1 | sources (bit 0 document feeder) |
//! | 27 | 1 | features (see `feature`) |
//! | 28 | 1 | CCD row distance at optical resolution |
//! | 30 | 4 | maximum transfer length |

use scanlink_core::{ColorMode, ScanArea, ScanSource, MM_PER_INCH};

use crate::command::{CommandError, InquiryData};

/// Length of the capability block
pub const CAPABILITY_BLOCK_LEN: usize = 34;

const CAPABILITY_VERSION: u8 = 1;

const SOURCE_ADF: u8 = 0x01;

/// Feature flag bits
pub mod feature {
    pub const HOST_CALIBRATION: u8 = 0x01;
    pub const CALIBRATION_INFO: u8 = 0x02;
    pub const HOST_Y_SCALING: u8 = 0x04;
    pub const PER_COLOR_SHADING: u8 = 0x08;
    pub const DEPTH_16: u8 = 0x10;
}

fn mode_bit(mode: ColorMode) -> u8 {
    match mode {
        ColorMode::Lineart => 0x01,
        ColorMode::Halftone => 0x02,
        ColorMode::Gray => 0x04,
        ColorMode::Color => 0x08,
        ColorMode::ColorThreePass => 0x10,
    }
}

/// Scan area limit of one source, in base dots
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AreaLimit {
    pub width: u32,
    pub length: u32,
}

/// What the device can do
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Capabilities {
    pub vendor: String,
    pub model: String,
    pub revision: String,
    pub modes: Vec<ColorMode>,
    pub optical_dpi: u16,
    pub min_dpi: u16,
    pub max_dpi: u16,
    /// Coordinate base for window positions
    pub base_dpi: u16,
    pub flatbed: AreaLimit,
    pub adf: bool,
    pub transparency: Option<AreaLimit>,
    pub host_calibration: bool,
    pub reports_calibration_info: bool,
    /// Device delivers optical Y resolution and the host drops lines
    pub host_y_scaling: bool,
    pub per_color_shading: bool,
    pub supports_16bit: bool,
    /// CCD row distance at optical resolution
    pub ccd_distance: u8,
    pub max_transfer: u32,
}

impl Capabilities {
    /// Decode from an INQUIRY response
    pub fn from_inquiry(inquiry: &InquiryData) -> Result<Self, CommandError> {
        let block = &inquiry.vendor_specific;
        if block.len() < CAPABILITY_BLOCK_LEN {
            return Err(CommandError::InvalidResponse(format!(
                "capability block too short: {} bytes",
                block.len()
            )));
        }
        if block[0] != CAPABILITY_VERSION {
            return Err(CommandError::InvalidResponse(format!(
                "unsupported capability block version {}",
                block[0]
            )));
        }

        let u16_at = |at: usize| u16::from_be_bytes([block[at], block[at + 1]]);
        let u32_at = |at: usize| {
            u32::from_be_bytes([block[at], block[at + 1], block[at + 2], block[at + 3]])
        };

        let modes: Vec<ColorMode> = ColorMode::ALL
            .into_iter()
            .filter(|m| block[1] & mode_bit(*m) != 0)
            .collect();
        if modes.is_empty() {
            return Err(CommandError::InvalidResponse(
                "device reports no scan modes".to_string(),
            ));
        }

        let base_dpi = u16_at(8);
        let (min_dpi, max_dpi) = (u16_at(4), u16_at(6));
        if base_dpi == 0 || min_dpi == 0 || min_dpi > max_dpi {
            return Err(CommandError::InvalidResponse(format!(
                "inconsistent resolutions: base {} min {} max {}",
                base_dpi, min_dpi, max_dpi
            )));
        }

        let tpu_width = u32_at(18);
        let features = block[27];

        Ok(Self {
            vendor: inquiry.vendor.clone(),
            model: inquiry.product.clone(),
            revision: inquiry.revision.clone(),
            modes,
            optical_dpi: u16_at(2),
            min_dpi,
            max_dpi,
            base_dpi,
            flatbed: AreaLimit {
                width: u32_at(10),
                length: u32_at(14),
            },
            adf: block[26] & SOURCE_ADF != 0,
            transparency: (tpu_width > 0).then(|| AreaLimit {
                width: tpu_width,
                length: u32_at(22),
            }),
            host_calibration: features & feature::HOST_CALIBRATION != 0,
            reports_calibration_info: features & feature::CALIBRATION_INFO != 0,
            host_y_scaling: features & feature::HOST_Y_SCALING != 0,
            per_color_shading: features & feature::PER_COLOR_SHADING != 0,
            supports_16bit: features & feature::DEPTH_16 != 0,
            ccd_distance: block[28],
            max_transfer: u32_at(30),
        })
    }

    /// Encode the capability block (device side)
    pub fn to_block(&self) -> Vec<u8> {
        let mut out = vec![0u8; CAPABILITY_BLOCK_LEN];
        out[0] = CAPABILITY_VERSION;
        out[1] = self.modes.iter().fold(0, |acc, m| acc | mode_bit(*m));
        out[2..4].copy_from_slice(&self.optical_dpi.to_be_bytes());
        out[4..6].copy_from_slice(&self.min_dpi.to_be_bytes());
        out[6..8].copy_from_slice(&self.max_dpi.to_be_bytes());
        out[8..10].copy_from_slice(&self.base_dpi.to_be_bytes());
        out[10..14].copy_from_slice(&self.flatbed.width.to_be_bytes());
        out[14..18].copy_from_slice(&self.flatbed.length.to_be_bytes());
        if let Some(tpu) = self.transparency {
            out[18..22].copy_from_slice(&tpu.width.to_be_bytes());
            out[22..26].copy_from_slice(&tpu.length.to_be_bytes());
        }
        if self.adf {
            out[26] |= SOURCE_ADF;
        }
        let flags = [
            (self.host_calibration, feature::HOST_CALIBRATION),
            (self.reports_calibration_info, feature::CALIBRATION_INFO),
            (self.host_y_scaling, feature::HOST_Y_SCALING),
            (self.per_color_shading, feature::PER_COLOR_SHADING),
            (self.supports_16bit, feature::DEPTH_16),
        ];
        out[27] = flags
            .into_iter()
            .filter(|(on, _)| *on)
            .fold(0, |acc, (_, bit)| acc | bit);
        out[28] = self.ccd_distance;
        out[30..34].copy_from_slice(&self.max_transfer.to_be_bytes());
        out
    }

    pub fn supports_mode(&self, mode: ColorMode) -> bool {
        self.modes.contains(&mode)
    }

    /// Sources this device offers
    pub fn sources(&self) -> Vec<ScanSource> {
        let mut sources = vec![ScanSource::Flatbed];
        if self.adf {
            sources.push(ScanSource::Adf);
        }
        if self.transparency.is_some() {
            sources.push(ScanSource::Transparency);
        }
        sources
    }

    /// Area limit of a source in base dots; the feeder shares the flatbed width
    pub fn area_limit(&self, source: ScanSource) -> Option<AreaLimit> {
        match source {
            ScanSource::Flatbed => Some(self.flatbed),
            ScanSource::Adf => self.adf.then_some(self.flatbed),
            ScanSource::Transparency => self.transparency,
        }
    }

    /// Maximum scan area of a source in millimetres
    pub fn max_area(&self, source: ScanSource) -> Option<ScanArea> {
        let limit = self.area_limit(source)?;
        let to_mm = |dots: u32| f64::from(dots) * MM_PER_INCH / f64::from(self.base_dpi);
        Some(ScanArea::new(0.0, 0.0, to_mm(limit.width), to_mm(limit.length)))
    }

    /// Model family derived from the capabilities
    pub fn family(&self) -> ModelFamily {
        if self.supports_mode(ColorMode::ColorThreePass) && !self.supports_mode(ColorMode::Color) {
            ModelFamily::ThreePass
        } else if self.ccd_distance > 0 {
            ModelFamily::TriLinear {
                distance: self.ccd_distance,
            }
        } else {
            ModelFamily::SingleRow
        }
    }

    /// Device type string for descriptors
    pub fn device_type(&self) -> String {
        if self.adf {
            "flatbed scanner with document feeder".to_string()
        } else {
            "flatbed scanner".to_string()
        }
    }
}

/// How a model's sensor delivers color
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelFamily {
    /// Monochrome or pixel-interleaved color from a single sensor row
    SingleRow,
    /// Three sensor rows `distance` optical lines apart, line-interleaved output
    TriLinear { distance: u8 },
    /// One color per pass through a filter
    ThreePass,
}

impl ModelFamily {
    /// Row distance in raw lines when the device delivers `y_dpi` lines per inch
    ///
    /// The optical distance scales by `y_dpi / optical` (floor). A host-scaled
    /// scan is delivered at optical resolution, so it keeps the full distance.
    pub fn line_distance(&self, caps: &Capabilities, y_dpi: u16) -> usize {
        match self {
            ModelFamily::TriLinear { distance } if caps.optical_dpi > 0 => {
                usize::from(*distance) * usize::from(y_dpi) / usize::from(caps.optical_dpi)
            }
            ModelFamily::TriLinear { distance } => usize::from(*distance),
            _ => 0,
        }
    }

    /// Whether color scans from this family need the reorder engine
    pub fn needs_reorder(&self, caps: &Capabilities, mode: ColorMode, y_dpi: u16) -> bool {
        mode == ColorMode::Color && self.line_distance(caps, y_dpi) > 0
    }
}
