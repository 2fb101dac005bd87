//! Validated argument values.
//!
//! Everything here is checked before a fragment is staged, so an out-of-range value
//! never reaches the wire.

use crate::error::{AppResult, DaqError};
use std::fmt;
use std::str::FromStr;

/// Highest pattern the 11-bit output connector accepts.
pub const MAX_IO_PATTERN: u16 = 0x7FF;

/// Check an integer against the output connector range.
pub fn validate_pattern(value: i64) -> AppResult<u16> {
    u16::try_from(value)
        .ok()
        .filter(|v| *v <= MAX_IO_PATTERN)
        .ok_or_else(|| {
            DaqError::Validation(format!(
                "IO pattern {value} outside 0-{MAX_IO_PATTERN}"
            ))
        })
}

/// Parse a decimal or `0b` binary literal into an output pattern.
pub fn parse_pattern(text: &str) -> AppResult<u16> {
    let text = text.trim();
    let parsed = match text.strip_prefix("0b").or_else(|| text.strip_prefix("0B")) {
        Some(bits) => i64::from_str_radix(&bits.replace('_', ""), 2),
        None => text.parse::<i64>(),
    };
    let value = parsed
        .map_err(|_| DaqError::Validation(format!("'{text}' is not a decimal or binary pattern")))?;
    validate_pattern(value)
}

/// DC voltage range selections.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VoltageRange {
    /// 100 mV
    Millivolts100,
    /// 1 V
    Volts1,
    /// 10 V
    Volts10,
    /// 100 V
    Volts100,
    /// 1000 V
    Volts1000,
    /// Auto-ranging
    Auto,
    /// Highest range
    Max,
    /// Lowest range
    Min,
    /// Power-on default
    Default,
}

impl VoltageRange {
    /// Argument for the range command, `None` for auto-ranging.
    pub fn token(&self) -> Option<&'static str> {
        match self {
            VoltageRange::Millivolts100 => Some("100E-3"),
            VoltageRange::Volts1 => Some("1"),
            VoltageRange::Volts10 => Some("10"),
            VoltageRange::Volts100 => Some("100"),
            VoltageRange::Volts1000 => Some("1000"),
            VoltageRange::Auto => None,
            VoltageRange::Max => Some("MAX"),
            VoltageRange::Min => Some("MIN"),
            VoltageRange::Default => Some("DEF"),
        }
    }
}

impl FromStr for VoltageRange {
    type Err = DaqError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized: String = s.chars().filter(|c| !c.is_whitespace()).collect();
        match normalized.to_ascii_uppercase().as_str() {
            "100MV" => Ok(VoltageRange::Millivolts100),
            "1V" => Ok(VoltageRange::Volts1),
            "10V" => Ok(VoltageRange::Volts10),
            "100V" => Ok(VoltageRange::Volts100),
            "1000V" => Ok(VoltageRange::Volts1000),
            "AUTO" => Ok(VoltageRange::Auto),
            "MAX" => Ok(VoltageRange::Max),
            "MIN" => Ok(VoltageRange::Min),
            "DEFAULT" | "DEF" => Ok(VoltageRange::Default),
            _ => Err(DaqError::Validation(format!(
                "voltage range '{s}' is not one of 100mV, 1V, 10V, 100V, 1000V, AUTO, MAX, MIN, DEFAULT"
            ))),
        }
    }
}

/// Integration speed presets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcquisitionSpeed {
    /// Longest integration
    Slow,
    /// Middle preset
    Medium,
    /// Shortest integration
    Fast,
}

impl AcquisitionSpeed {
    /// Device token; the instrument abbreviates MEDium.
    pub fn token(&self) -> &'static str {
        match self {
            AcquisitionSpeed::Slow => "SLOW",
            AcquisitionSpeed::Medium => "MED",
            AcquisitionSpeed::Fast => "FAST",
        }
    }
}

impl FromStr for AcquisitionSpeed {
    type Err = DaqError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "SLOW" => Ok(AcquisitionSpeed::Slow),
            "MEDIUM" | "MED" => Ok(AcquisitionSpeed::Medium),
            "FAST" => Ok(AcquisitionSpeed::Fast),
            _ => Err(DaqError::Validation(format!(
                "speed '{s}' is not one of SLOW, MEDIUM, FAST"
            ))),
        }
    }
}

impl fmt::Display for AcquisitionSpeed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.token())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pattern_bounds() {
        assert_eq!(validate_pattern(0).unwrap(), 0);
        assert_eq!(validate_pattern(2047).unwrap(), 2047);
        assert!(validate_pattern(2048).is_err());
        assert!(validate_pattern(-1).is_err());
    }

    #[test]
    fn test_parse_binary_and_decimal() {
        assert_eq!(parse_pattern("0b00000000101").unwrap(), 5);
        assert_eq!(parse_pattern("0b111_1111_1111").unwrap(), 2047);
        assert_eq!(parse_pattern(" 12 ").unwrap(), 12);
        assert!(parse_pattern("0b2").is_err());
        assert!(parse_pattern("0b100000000000").is_err());
        assert!(parse_pattern("ten").is_err());
    }

    #[test]
    fn test_voltage_range_parsing() {
        assert_eq!("10V".parse::<VoltageRange>().unwrap(), VoltageRange::Volts10);
        assert_eq!("100 mV".parse::<VoltageRange>().unwrap(), VoltageRange::Millivolts100);
        assert_eq!("auto".parse::<VoltageRange>().unwrap().token(), None);
        assert_eq!("DEFAULT".parse::<VoltageRange>().unwrap().token(), Some("DEF"));
        assert!("5V".parse::<VoltageRange>().is_err());
    }

    #[test]
    fn test_medium_is_abbreviated() {
        assert_eq!("MEDIUM".parse::<AcquisitionSpeed>().unwrap().token(), "MED");
        assert_eq!("med".parse::<AcquisitionSpeed>().unwrap().token(), "MED");
        assert!("TURBO".parse::<AcquisitionSpeed>().is_err());
    }
}
