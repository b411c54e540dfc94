//! Option table: descriptors, constraint checking and current values

use scanlink_core::{
    ColorMode, Constraint, OptionDescriptor, OptionId, OptionValue, ReloadHints, ScanArea,
    ScanError, ScanResult, ScanSource, Unit, ValueType,
};

use crate::calibration::CalibrationPolicy;
use crate::config::ScanConfig;
use crate::geometry::ScanRequest;
use crate::model::Capabilities;

/// Resolution selected when the device allows it
const DEFAULT_RESOLUTION: u16 = 300;

/// Current option values of one session
#[derive(Debug, Clone)]
pub struct OptionTable {
    caps: Capabilities,
    resolution_quant: u16,
    mode: ColorMode,
    source: ScanSource,
    resolution: u16,
    depth: u8,
    preview: bool,
    area: ScanArea,
    calibration: CalibrationPolicy,
}

fn string_list<'a>(items: impl Iterator<Item = &'a str>) -> Constraint {
    Constraint::StringList(items.map(str::to_string).collect())
}

impl OptionTable {
    pub fn new(caps: &Capabilities, config: &ScanConfig) -> Self {
        let mode = if caps.supports_mode(ColorMode::Gray) {
            ColorMode::Gray
        } else {
            caps.modes.first().copied().unwrap_or(ColorMode::Gray)
        };
        let source = ScanSource::Flatbed;
        let area = caps
            .max_area(source)
            .unwrap_or_else(|| ScanArea::new(0.0, 0.0, 0.0, 0.0));
        Self {
            caps: caps.clone(),
            resolution_quant: config.resolution_quant,
            mode,
            source,
            resolution: DEFAULT_RESOLUTION.clamp(caps.min_dpi, caps.max_dpi),
            depth: 8,
            preview: false,
            area,
            calibration: config.calibration.policy,
        }
    }

    pub fn mode(&self) -> ColorMode {
        self.mode
    }

    pub fn calibration_policy(&self) -> CalibrationPolicy {
        self.calibration
    }

    /// Snapshot for the geometry resolver
    pub fn request(&self, pass: usize) -> ScanRequest {
        ScanRequest {
            mode: self.mode,
            source: self.source,
            resolution: self.resolution,
            depth: self.depth,
            area: self.area,
            preview: self.preview,
            pass,
        }
    }

    fn max_area(&self) -> ScanArea {
        self.caps
            .max_area(self.source)
            .unwrap_or_else(|| ScanArea::new(0.0, 0.0, 0.0, 0.0))
    }

    pub fn descriptor(&self, id: OptionId) -> OptionDescriptor {
        let max = self.max_area();
        let mm_range = |limit: f64| Constraint::Range {
            min: 0.0,
            max: limit,
            quant: 0.0,
        };
        let (title, description, value_type, unit, constraint, active) = match id {
            OptionId::Mode => (
                "Scan mode",
                "Color mode of the scan",
                ValueType::String,
                Unit::None,
                string_list(self.caps.modes.iter().map(|m| m.as_str())),
                true,
            ),
            OptionId::Source => (
                "Scan source",
                "Flatbed, document feeder or transparency unit",
                ValueType::String,
                Unit::None,
                string_list(self.caps.sources().iter().map(|s| s.as_str())),
                true,
            ),
            OptionId::Resolution => (
                "Scan resolution",
                "Resolution in dots per inch",
                ValueType::Int,
                Unit::Dpi,
                Constraint::Range {
                    min: f64::from(self.caps.min_dpi),
                    max: f64::from(self.caps.max_dpi),
                    quant: f64::from(self.resolution_quant),
                },
                !self.preview,
            ),
            OptionId::BitDepth => (
                "Bit depth",
                "Bits per sample",
                ValueType::Int,
                Unit::Bit,
                Constraint::WordList(if self.caps.supports_16bit {
                    vec![8, 16]
                } else {
                    vec![8]
                }),
                !self.mode.is_bilevel(),
            ),
            OptionId::Preview => (
                "Preview",
                "Fast low-resolution scan without calibration",
                ValueType::Bool,
                Unit::None,
                Constraint::None,
                true,
            ),
            OptionId::TlX => (
                "Top-left x",
                "Left edge of the scan area",
                ValueType::Fixed,
                Unit::Mm,
                mm_range(max.br_x),
                true,
            ),
            OptionId::TlY => (
                "Top-left y",
                "Top edge of the scan area",
                ValueType::Fixed,
                Unit::Mm,
                mm_range(max.br_y),
                true,
            ),
            OptionId::BrX => (
                "Bottom-right x",
                "Right edge of the scan area",
                ValueType::Fixed,
                Unit::Mm,
                mm_range(max.br_x),
                true,
            ),
            OptionId::BrY => (
                "Bottom-right y",
                "Bottom edge of the scan area",
                ValueType::Fixed,
                Unit::Mm,
                mm_range(max.br_y),
                true,
            ),
            OptionId::Calibration => (
                "Calibration",
                "How shading reference lines are combined",
                ValueType::String,
                Unit::None,
                string_list(CalibrationPolicy::ALL.iter().map(|p| p.as_str())),
                self.caps.host_calibration,
            ),
        };
        OptionDescriptor {
            id,
            title: title.to_string(),
            description: description.to_string(),
            value_type,
            unit,
            constraint,
            active,
        }
    }

    pub fn descriptors(&self) -> Vec<OptionDescriptor> {
        OptionId::ALL.into_iter().map(|id| self.descriptor(id)).collect()
    }

    pub fn get(&self, id: OptionId) -> OptionValue {
        match id {
            OptionId::Mode => OptionValue::Str(self.mode.as_str().to_string()),
            OptionId::Source => OptionValue::Str(self.source.as_str().to_string()),
            OptionId::Resolution => OptionValue::Int(i32::from(self.resolution)),
            OptionId::BitDepth => OptionValue::Int(i32::from(self.depth)),
            OptionId::Preview => OptionValue::Bool(self.preview),
            OptionId::TlX => OptionValue::Fixed(self.area.tl_x),
            OptionId::TlY => OptionValue::Fixed(self.area.tl_y),
            OptionId::BrX => OptionValue::Fixed(self.area.br_x),
            OptionId::BrY => OptionValue::Fixed(self.area.br_y),
            OptionId::Calibration => OptionValue::Str(self.calibration.as_str().to_string()),
        }
    }

    /// Validate against the declared constraint and store
    ///
    /// A rejected value leaves every option unchanged.
    pub fn set(&mut self, id: OptionId, value: OptionValue) -> ScanResult<ReloadHints> {
        let (value, inexact) = self.descriptor(id).validate(value)?;

        let hints = match id {
            OptionId::Mode => {
                self.mode = parse_str(&value)?;
                ReloadHints::options_and_params()
            }
            OptionId::Source => {
                self.source = parse_str(&value)?;
                self.clamp_area();
                ReloadHints::options_and_params()
            }
            OptionId::Resolution => {
                self.resolution = int_value(&value)?;
                ReloadHints::params()
            }
            OptionId::BitDepth => {
                self.depth = int_value(&value)?;
                ReloadHints::params()
            }
            OptionId::Preview => {
                self.preview = value.as_bool().unwrap_or(false);
                ReloadHints::options_and_params()
            }
            OptionId::TlX => {
                self.area.tl_x = fixed_value(&value)?;
                ReloadHints::params()
            }
            OptionId::TlY => {
                self.area.tl_y = fixed_value(&value)?;
                ReloadHints::params()
            }
            OptionId::BrX => {
                self.area.br_x = fixed_value(&value)?;
                ReloadHints::params()
            }
            OptionId::BrY => {
                self.area.br_y = fixed_value(&value)?;
                ReloadHints::params()
            }
            OptionId::Calibration => {
                self.calibration = parse_str(&value)?;
                ReloadHints::default()
            }
        };
        Ok(hints.with_inexact(inexact))
    }

    /// Keep the area inside the current source's limits
    fn clamp_area(&mut self) {
        let max = self.max_area();
        self.area.tl_x = self.area.tl_x.min(max.br_x);
        self.area.br_x = self.area.br_x.min(max.br_x);
        self.area.tl_y = self.area.tl_y.min(max.br_y);
        self.area.br_y = self.area.br_y.min(max.br_y);
    }
}

fn parse_str<T>(value: &OptionValue) -> ScanResult<T>
where
    T: std::str::FromStr<Err = ScanError>,
{
    value
        .as_str()
        .ok_or_else(|| ScanError::InvalidRequest("expected a string".to_string()))?
        .parse()
}

fn int_value<T: TryFrom<i32>>(value: &OptionValue) -> ScanResult<T> {
    value
        .as_int()
        .and_then(|v| T::try_from(v).ok())
        .ok_or_else(|| ScanError::InvalidRequest(format!("{} is not a valid integer", value)))
}

fn fixed_value(value: &OptionValue) -> ScanResult<f64> {
    value
        .as_fixed()
        .ok_or_else(|| ScanError::InvalidRequest(format!("{} is not a number", value)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::tests::trilinear_caps;
    use pretty_assertions::assert_eq;

    fn table() -> OptionTable {
        let config = ScanConfig {
            resolution_quant: 25,
            ..ScanConfig::default()
        };
        OptionTable::new(&trilinear_caps(8), &config)
    }

    #[test]
    fn test_defaults() {
        let table = table();
        assert_eq!(table.get(OptionId::Mode), OptionValue::Str("Gray".to_string()));
        assert_eq!(table.get(OptionId::Resolution), OptionValue::Int(300));
        assert_eq!(table.descriptors().len(), OptionId::ALL.len());
    }

    #[test]
    fn test_resolution_snaps_with_inexact_hint() {
        let mut table = table();
        let hints = table
            .set(OptionId::Resolution, OptionValue::Int(310))
            .unwrap();
        assert!(hints.inexact);
        assert!(hints.reload_params);
        assert!(!hints.reload_options);
        assert_eq!(table.get(OptionId::Resolution), OptionValue::Int(300));
    }

    #[test]
    fn test_out_of_range_leaves_value_unchanged() {
        let mut table = table();
        let err = table
            .set(OptionId::Resolution, OptionValue::Int(4800))
            .unwrap_err();
        assert!(matches!(err, ScanError::InvalidRequest(_)));
        assert_eq!(table.get(OptionId::Resolution), OptionValue::Int(300));

        assert!(table
            .set(OptionId::BrX, OptionValue::Fixed(500.0))
            .is_err());

        let before = table.get(OptionId::BrX);
        assert!(table
            .set(OptionId::BrX, OptionValue::Fixed(f64::NAN))
            .is_err());
        assert_eq!(table.get(OptionId::BrX), before);
    }

    #[test]
    fn test_mode_change_reloads_options() {
        let mut table = table();
        let hints = table
            .set(OptionId::Mode, OptionValue::Str("lineart".to_string()))
            .unwrap();
        assert!(hints.reload_options);
        assert_eq!(table.mode(), ColorMode::Lineart);
        assert!(!table.descriptor(OptionId::BitDepth).active);
        assert!(table.set(OptionId::BitDepth, OptionValue::Int(8)).is_err());

        assert!(table
            .set(OptionId::Mode, OptionValue::Str("Color3Pass".to_string()))
            .is_err());
    }

    #[test]
    fn test_source_change_clamps_area() {
        let mut caps = trilinear_caps(0);
        caps.transparency = Some(crate::model::AreaLimit {
            width: 2400,
            length: 6000,
        });
        let mut table = OptionTable::new(&caps, &ScanConfig::default());
        table
            .set(OptionId::Source, OptionValue::Str("Transparency".to_string()))
            .unwrap();
        let br_x = table.get(OptionId::BrX).as_fixed().unwrap();
        assert!((br_x - 50.8).abs() < 1e-9);
    }

    #[test]
    fn test_calibration_policy_option() {
        let mut table = table();
        let hints = table
            .set(OptionId::Calibration, OptionValue::Str("off".to_string()))
            .unwrap();
        assert_eq!(hints, ReloadHints::default());
        assert_eq!(table.calibration_policy(), CalibrationPolicy::Off);
    }
}
