//! Shading calibration controller
//!
//! Reads shading reference lines from the device, combines them into one
//! correction profile and uploads it before the scan starts. Failure at
//! any step aborts the scan; there is no partial calibration.

use std::fmt;
use std::str::FromStr;

use scanlink_core::{ColorMode, ScanError, ScanResult};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::command::{color_qualifier, CalibrationInfo, CommandError, CommandService};
use crate::config::CalibrationConfig;
use crate::geometry::ScanPlan;
use crate::model::Capabilities;

/// How reference lines are combined
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CalibrationPolicy {
    /// Per-sample mean over every reference line, rounded to nearest
    #[default]
    Average,
    /// The last reference line wins
    LastLine,
    /// Skip calibration
    Off,
}

impl CalibrationPolicy {
    pub const ALL: [CalibrationPolicy; 3] = [
        CalibrationPolicy::Average,
        CalibrationPolicy::LastLine,
        CalibrationPolicy::Off,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            CalibrationPolicy::Average => "average",
            CalibrationPolicy::LastLine => "last-line",
            CalibrationPolicy::Off => "off",
        }
    }
}

impl fmt::Display for CalibrationPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CalibrationPolicy {
    type Err = ScanError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        CalibrationPolicy::ALL
            .into_iter()
            .find(|p| p.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| ScanError::InvalidRequest(format!("unknown calibration policy: {}", s)))
    }
}

/// Shape of the shading reference
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReferenceGeometry {
    pub lines: usize,
    pub pixels: usize,
    pub channels: usize,
    pub bytes_per_sample: usize,
}

impl ReferenceGeometry {
    /// Geometry reported by the device
    pub fn from_device(info: &CalibrationInfo) -> Self {
        Self {
            lines: usize::from(info.lines),
            pixels: usize::from(info.pixels),
            channels: usize::from(info.channels.max(1)),
            bytes_per_sample: usize::from(info.bytes_per_sample.max(1)),
        }
    }

    /// Geometry derived from the scan window when the device reports none
    pub fn fallback(plan: &ScanPlan, mode: ColorMode, lines: u16) -> Self {
        Self {
            lines: usize::from(lines.max(1)),
            pixels: plan.shape.pixels_per_line,
            channels: mode.channels_per_pass(),
            bytes_per_sample: usize::from(plan.shape.depth.max(8) / 8),
        }
    }

    /// Samples in one reference line (all channels)
    pub fn samples_per_line(&self) -> usize {
        self.pixels * self.channels
    }

    pub fn line_bytes(&self) -> usize {
        self.samples_per_line() * self.bytes_per_sample
    }
}

/// Raw shading reference plus the settings used to reduce it
#[derive(Debug, Clone)]
pub struct CalibrationProfile {
    pub geometry: ReferenceGeometry,
    /// `lines` reference lines, pixel-interleaved, big-endian samples
    pub reference: Vec<u8>,
    pub invert: bool,
    pub policy: CalibrationPolicy,
}

impl CalibrationProfile {
    pub fn new(
        geometry: ReferenceGeometry,
        reference: Vec<u8>,
        invert: bool,
        policy: CalibrationPolicy,
    ) -> ScanResult<Self> {
        let expected = geometry.line_bytes() * geometry.lines;
        if geometry.lines == 0 || reference.len() != expected {
            return Err(ScanError::Io(format!(
                "shading reference has {} bytes, expected {}",
                reference.len(),
                expected
            )));
        }
        Ok(Self {
            geometry,
            reference,
            invert,
            policy,
        })
    }

    fn sample(&self, line: usize, index: usize) -> u32 {
        let bps = self.geometry.bytes_per_sample;
        let at = (line * self.geometry.samples_per_line() + index) * bps;
        self.reference[at..at + bps]
            .iter()
            .fold(0u32, |acc, b| (acc << 8) | u32::from(*b))
    }

    fn max_value(&self) -> u32 {
        (1u32 << (8 * self.geometry.bytes_per_sample.min(2))) - 1
    }

    /// Reduce the reference lines to one value per sample position
    pub fn combine(&self) -> Vec<u32> {
        let lines = self.geometry.lines;
        let max = self.max_value();
        (0..self.geometry.samples_per_line())
            .map(|index| {
                let value = match self.policy {
                    CalibrationPolicy::LastLine => self.sample(lines - 1, index),
                    _ => {
                        let sum: u64 = (0..lines)
                            .map(|line| u64::from(self.sample(line, index)))
                            .sum();
                        let n = lines as u64;
                        ((sum + n / 2) / n) as u32
                    }
                };
                let value = value.min(max);
                if self.invert {
                    max - value
                } else {
                    value
                }
            })
            .collect()
    }

    fn encode(&self, values: impl Iterator<Item = u32>) -> Vec<u8> {
        let bps = self.geometry.bytes_per_sample;
        let mut out = Vec::new();
        for value in values {
            let be = value.to_be_bytes();
            out.extend_from_slice(&be[4 - bps.min(4)..]);
        }
        out
    }

    /// Upload payloads: one per color when requested and possible,
    /// otherwise one combined profile
    pub fn uploads(&self, per_color: bool) -> Vec<(u16, Vec<u8>)> {
        let values = self.combine();
        let channels = self.geometry.channels;
        if per_color && channels == 3 {
            (0..channels)
                .map(|c| {
                    let plane = values.iter().skip(c).step_by(channels).copied();
                    (color_qualifier::for_plane(c), self.encode(plane))
                })
                .collect()
        } else {
            vec![(color_qualifier::ALL, self.encode(values.into_iter()))]
        }
    }
}

fn calibration_error(step: &str, err: CommandError) -> ScanError {
    ScanError::Io(format!("calibration {} failed: {}", step, err))
}

/// Whether a frame needs host calibration
pub fn required(caps: &Capabilities, policy: CalibrationPolicy, preview: bool) -> bool {
    caps.host_calibration && !preview && policy != CalibrationPolicy::Off
}

/// Acquire the reference, combine it and upload the profile
pub async fn calibrate(
    service: &mut CommandService,
    caps: &Capabilities,
    plan: &ScanPlan,
    mode: ColorMode,
    settings: &CalibrationConfig,
) -> ScanResult<CalibrationProfile> {
    let geometry = if caps.reports_calibration_info {
        let info = service
            .read_calibration_info()
            .await
            .map_err(|e| calibration_error("info", e))?;
        ReferenceGeometry::from_device(&info)
    } else {
        debug!(
            lines = settings.fallback_lines,
            "Device reports no calibration geometry, using fallback"
        );
        ReferenceGeometry::fallback(plan, mode, settings.fallback_lines)
    };

    let line_bytes = geometry.line_bytes();
    if line_bytes == 0 || geometry.lines == 0 {
        return Err(ScanError::Io("empty calibration geometry".to_string()));
    }
    let lines_per_read = (service.max_transfer() / line_bytes).max(1);

    let mut reference = Vec::with_capacity(line_bytes * geometry.lines);
    let mut remaining = geometry.lines;
    while remaining > 0 {
        let lines = remaining.min(lines_per_read);
        let chunk = service
            .read_shading(lines * line_bytes)
            .await
            .map_err(|e| calibration_error("reference read", e))?;
        if chunk.len() != lines * line_bytes {
            return Err(ScanError::Io(format!(
                "short shading read: {} of {} bytes",
                chunk.len(),
                lines * line_bytes
            )));
        }
        reference.extend_from_slice(&chunk);
        remaining -= lines;
    }

    let profile = CalibrationProfile::new(geometry, reference, settings.invert, settings.policy)?;
    for (qualifier, payload) in profile.uploads(caps.per_color_shading) {
        service
            .send_shading(qualifier, payload)
            .await
            .map_err(|e| calibration_error("upload", e))?;
    }

    info!(
        lines = geometry.lines,
        pixels = geometry.pixels,
        channels = geometry.channels,
        policy = %settings.policy,
        "Shading calibration uploaded"
    );
    Ok(profile)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn geometry(lines: usize, pixels: usize, channels: usize, bps: usize) -> ReferenceGeometry {
        ReferenceGeometry {
            lines,
            pixels,
            channels,
            bytes_per_sample: bps,
        }
    }

    #[test]
    fn test_average_rounds_to_nearest() {
        // Two lines: 10 and 11 average to 10.5 -> 11
        let profile = CalibrationProfile::new(
            geometry(2, 2, 1, 1),
            vec![10, 200, 11, 201],
            false,
            CalibrationPolicy::Average,
        )
        .unwrap();
        assert_eq!(profile.combine(), vec![11, 201]);
    }

    #[test]
    fn test_average_sixteen_bit_does_not_overflow() {
        let lines = 300;
        let reference: Vec<u8> = (0..lines).flat_map(|_| [0xFF, 0xFF]).collect();
        let profile = CalibrationProfile::new(
            geometry(lines, 1, 1, 2),
            reference,
            false,
            CalibrationPolicy::Average,
        )
        .unwrap();
        assert_eq!(profile.combine(), vec![0xFFFF]);
    }

    #[test]
    fn test_last_line_and_invert() {
        let profile = CalibrationProfile::new(
            geometry(2, 2, 1, 1),
            vec![1, 2, 30, 40],
            true,
            CalibrationPolicy::LastLine,
        )
        .unwrap();
        assert_eq!(profile.combine(), vec![225, 215]);
    }

    #[test]
    fn test_per_color_split() {
        // One line, two pixels, RGB
        let profile = CalibrationProfile::new(
            geometry(1, 2, 3, 1),
            vec![1, 2, 3, 4, 5, 6],
            false,
            CalibrationPolicy::Average,
        )
        .unwrap();
        let uploads = profile.uploads(true);
        assert_eq!(
            uploads,
            vec![
                (color_qualifier::RED, vec![1, 4]),
                (color_qualifier::GREEN, vec![2, 5]),
                (color_qualifier::BLUE, vec![3, 6]),
            ]
        );
        let combined = profile.uploads(false);
        assert_eq!(combined, vec![(color_qualifier::ALL, vec![1, 2, 3, 4, 5, 6])]);
    }

    #[test]
    fn test_length_mismatch_is_io_error() {
        let err = CalibrationProfile::new(
            geometry(2, 4, 1, 1),
            vec![0; 7],
            false,
            CalibrationPolicy::Average,
        )
        .unwrap_err();
        assert!(matches!(err, ScanError::Io(_)));
    }

    #[test]
    fn test_policy_names() {
        assert_eq!(
            "last-line".parse::<CalibrationPolicy>().unwrap(),
            CalibrationPolicy::LastLine
        );
        assert!("median".parse::<CalibrationPolicy>().is_err());
    }
}
