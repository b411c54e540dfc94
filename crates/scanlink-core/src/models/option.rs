//! Option descriptors, values and constraint checking

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::ScanError;

/// Identifier of a configurable scan option
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OptionId {
    Mode,
    Source,
    Resolution,
    #[serde(rename = "depth")]
    BitDepth,
    Preview,
    TlX,
    TlY,
    BrX,
    BrY,
    /// Shading acquisition policy ("average", "last-line", "off")
    Calibration,
}

impl OptionId {
    pub const ALL: [OptionId; 10] = [
        OptionId::Mode,
        OptionId::Source,
        OptionId::Resolution,
        OptionId::BitDepth,
        OptionId::Preview,
        OptionId::TlX,
        OptionId::TlY,
        OptionId::BrX,
        OptionId::BrY,
        OptionId::Calibration,
    ];

    /// Stable option name
    pub fn name(&self) -> &'static str {
        match self {
            OptionId::Mode => "mode",
            OptionId::Source => "source",
            OptionId::Resolution => "resolution",
            OptionId::BitDepth => "depth",
            OptionId::Preview => "preview",
            OptionId::TlX => "tl-x",
            OptionId::TlY => "tl-y",
            OptionId::BrX => "br-x",
            OptionId::BrY => "br-y",
            OptionId::Calibration => "calibration",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        OptionId::ALL.into_iter().find(|id| id.name() == name)
    }
}

impl fmt::Display for OptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Type of an option's value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValueType {
    Bool,
    Int,
    /// Fractional value (millimetres)
    Fixed,
    String,
}

/// Physical unit of an option
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Unit {
    None,
    Bit,
    Mm,
    Dpi,
}

/// Option value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum OptionValue {
    Bool(bool),
    Int(i32),
    Fixed(f64),
    Str(String),
}

impl OptionValue {
    pub fn as_int(&self) -> Option<i32> {
        match self {
            OptionValue::Int(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_fixed(&self) -> Option<f64> {
        match self {
            OptionValue::Fixed(v) => Some(*v),
            OptionValue::Int(v) => Some(f64::from(*v)),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            OptionValue::Bool(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            OptionValue::Str(v) => Some(v),
            _ => None,
        }
    }

    fn matches(&self, value_type: ValueType) -> bool {
        matches!(
            (self, value_type),
            (OptionValue::Bool(_), ValueType::Bool)
                | (OptionValue::Int(_), ValueType::Int)
                | (OptionValue::Fixed(_), ValueType::Fixed)
                | (OptionValue::Int(_), ValueType::Fixed)
                | (OptionValue::Str(_), ValueType::String)
        )
    }
}

impl fmt::Display for OptionValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OptionValue::Bool(v) => write!(f, "{}", v),
            OptionValue::Int(v) => write!(f, "{}", v),
            OptionValue::Fixed(v) => write!(f, "{:.2}", v),
            OptionValue::Str(v) => f.write_str(v),
        }
    }
}

/// Declared constraint on an option's value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Constraint {
    None,
    /// Inclusive range; `quant` of zero means any value in range
    Range { min: f64, max: f64, quant: f64 },
    WordList(Vec<i32>),
    StringList(Vec<String>),
}

impl Constraint {
    /// Validate `value`, returning the stored value and whether it had to be
    /// adjusted to satisfy the constraint.
    pub fn apply(&self, value: OptionValue) -> Result<(OptionValue, bool), ScanError> {
        match (self, value) {
            (Constraint::None, value) => Ok((value, false)),
            (Constraint::Range { min, max, quant }, value) => {
                let raw = value.as_fixed().ok_or_else(|| {
                    ScanError::InvalidRequest("range constraint needs a number".to_string())
                })?;
                if !raw.is_finite() {
                    return Err(ScanError::InvalidRequest(format!(
                        "{} is not a finite number",
                        raw
                    )));
                }
                if raw < *min || raw > *max {
                    return Err(ScanError::InvalidRequest(format!(
                        "{} outside range {}..={}",
                        raw, min, max
                    )));
                }
                let snapped = if *quant > 0.0 {
                    (min + ((raw - min) / quant).round() * quant).min(*max)
                } else {
                    raw
                };
                let inexact = (snapped - raw).abs() > f64::EPSILON;
                let stored = match value {
                    OptionValue::Int(_) => OptionValue::Int(snapped.round() as i32),
                    _ => OptionValue::Fixed(snapped),
                };
                Ok((stored, inexact))
            }
            (Constraint::WordList(words), OptionValue::Int(v)) => {
                if words.contains(&v) {
                    Ok((OptionValue::Int(v), false))
                } else {
                    Err(ScanError::InvalidRequest(format!(
                        "{} not one of {:?}",
                        v, words
                    )))
                }
            }
            (Constraint::StringList(list), OptionValue::Str(v)) => list
                .iter()
                .find(|s| s.eq_ignore_ascii_case(&v))
                .map(|s| (OptionValue::Str(s.clone()), false))
                .ok_or_else(|| {
                    ScanError::InvalidRequest(format!("'{}' not one of {:?}", v, list))
                }),
            (constraint, value) => Err(ScanError::InvalidRequest(format!(
                "value {:?} does not fit constraint {:?}",
                value, constraint
            ))),
        }
    }
}

/// Description of a configurable option
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptionDescriptor {
    pub id: OptionId,
    pub title: String,
    pub description: String,
    pub value_type: ValueType,
    pub unit: Unit,
    pub constraint: Constraint,
    /// Inactive options cannot be set in the current configuration
    pub active: bool,
}

impl OptionDescriptor {
    /// Check type and constraint for a value about to be stored
    pub fn validate(&self, value: OptionValue) -> Result<(OptionValue, bool), ScanError> {
        if !self.active {
            return Err(ScanError::InvalidRequest(format!(
                "option {} is inactive",
                self.id
            )));
        }
        if !value.matches(self.value_type) {
            return Err(ScanError::InvalidRequest(format!(
                "option {} expects a {:?} value",
                self.id, self.value_type
            )));
        }
        let value = match (self.value_type, value) {
            (ValueType::Fixed, OptionValue::Int(v)) => OptionValue::Fixed(f64::from(v)),
            (_, value) => value,
        };
        self.constraint.apply(value)
    }
}

/// What the caller must refresh after `set_option`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReloadHints {
    /// The stored value differs from the requested one
    pub inexact: bool,
    /// Derived scan parameters changed
    pub reload_params: bool,
    /// Other options' descriptors changed
    pub reload_options: bool,
}

impl ReloadHints {
    pub fn params() -> Self {
        Self {
            reload_params: true,
            ..Self::default()
        }
    }

    pub fn options_and_params() -> Self {
        Self {
            reload_params: true,
            reload_options: true,
            ..Self::default()
        }
    }

    pub fn with_inexact(mut self, inexact: bool) -> Self {
        self.inexact = inexact;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn resolution_range() -> Constraint {
        Constraint::Range {
            min: 50.0,
            max: 1200.0,
            quant: 25.0,
        }
    }

    #[test]
    fn test_range_snaps_to_quantum() {
        let (value, inexact) = resolution_range().apply(OptionValue::Int(310)).unwrap();
        assert_eq!(value, OptionValue::Int(300));
        assert!(inexact);

        let (value, inexact) = resolution_range().apply(OptionValue::Int(300)).unwrap();
        assert_eq!(value, OptionValue::Int(300));
        assert!(!inexact);
    }

    #[test]
    fn test_range_rejects_out_of_bounds() {
        assert!(resolution_range().apply(OptionValue::Int(10)).is_err());
        assert!(resolution_range().apply(OptionValue::Int(2400)).is_err());
    }

    #[test]
    fn test_range_rejects_non_finite() {
        let area = Constraint::Range {
            min: 0.0,
            max: 215.9,
            quant: 0.0,
        };
        for raw in [f64::NAN, f64::INFINITY, f64::NEG_INFINITY] {
            let err = area.apply(OptionValue::Fixed(raw)).unwrap_err();
            assert!(matches!(err, ScanError::InvalidRequest(_)), "{} accepted", raw);
        }
    }

    #[test]
    fn test_string_list_is_case_insensitive() {
        let c = Constraint::StringList(vec!["Gray".to_string(), "Color".to_string()]);
        let (value, _) = c.apply(OptionValue::Str("color".to_string())).unwrap();
        assert_eq!(value, OptionValue::Str("Color".to_string()));
        assert!(c.apply(OptionValue::Str("Sepia".to_string())).is_err());
    }

    #[test]
    fn test_word_list() {
        let c = Constraint::WordList(vec![8, 16]);
        assert!(c.apply(OptionValue::Int(16)).is_ok());
        assert!(c.apply(OptionValue::Int(12)).is_err());
    }

    #[test]
    fn test_descriptor_rejects_wrong_type_and_inactive() {
        let mut desc = OptionDescriptor {
            id: OptionId::TlX,
            title: "Top-left x".to_string(),
            description: String::new(),
            value_type: ValueType::Fixed,
            unit: Unit::Mm,
            constraint: Constraint::Range {
                min: 0.0,
                max: 215.9,
                quant: 0.0,
            },
            active: true,
        };
        assert!(desc.validate(OptionValue::Str("1".to_string())).is_err());
        let (value, _) = desc.validate(OptionValue::Int(10)).unwrap();
        assert_eq!(value, OptionValue::Fixed(10.0));

        desc.active = false;
        assert!(desc.validate(OptionValue::Fixed(1.0)).is_err());
    }

    #[test]
    fn test_option_names_roundtrip() {
        for id in OptionId::ALL {
            assert_eq!(OptionId::from_name(id.name()), Some(id));
        }
    }

    #[test]
    fn test_json_shape() {
        for id in OptionId::ALL {
            let json = serde_json::to_string(&id).unwrap();
            assert_eq!(json, format!("\"{}\"", id.name()));
        }

        let value: OptionValue = serde_json::from_str("300").unwrap();
        assert_eq!(value, OptionValue::Int(300));
        let value: OptionValue = serde_json::from_str("25.4").unwrap();
        assert_eq!(value, OptionValue::Fixed(25.4));
        let value: OptionValue = serde_json::from_str("\"Color\"").unwrap();
        assert_eq!(value, OptionValue::Str("Color".to_string()));
    }
}
