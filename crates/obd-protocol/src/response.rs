//! Decoded OBD-II responses

use crate::commands::Command;
use serde::Serialize;
use std::fmt;

/// Physical unit of a decoded quantity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Unit {
    Percent,
    Celsius,
    Rpm,
    KilometersPerHour,
    Degrees,
    GramsPerSecond,
    Kilopascal,
    Volt,
    Second,
    Kilometer,
    Ratio,
    LitersPerHour,
}

impl Unit {
    /// Short symbol for display
    pub fn symbol(&self) -> &'static str {
        match self {
            Unit::Percent => "%",
            Unit::Celsius => "°C",
            Unit::Rpm => "rpm",
            Unit::KilometersPerHour => "km/h",
            Unit::Degrees => "°",
            Unit::GramsPerSecond => "g/s",
            Unit::Kilopascal => "kPa",
            Unit::Volt => "V",
            Unit::Second => "s",
            Unit::Kilometer => "km",
            Unit::Ratio => "ratio",
            Unit::LitersPerHour => "L/h",
        }
    }
}

/// Fuel system status (PID 0x03)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FuelStatus {
    OpenLoopTemp,
    ClosedLoopO2Sense,
    OpenLoopLoad,
    OpenLoopFailure,
    ClosedLoopFault,
}

impl FuelStatus {
    /// Decode the status byte of one fuel system. Exactly one bit must be set.
    pub fn from_bits(bits: u8) -> Option<Self> {
        match bits {
            0x01 => Some(FuelStatus::OpenLoopTemp),
            0x02 => Some(FuelStatus::ClosedLoopO2Sense),
            0x04 => Some(FuelStatus::OpenLoopLoad),
            0x08 => Some(FuelStatus::OpenLoopFailure),
            0x10 => Some(FuelStatus::ClosedLoopFault),
            _ => None,
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            FuelStatus::OpenLoopTemp => "Open loop due to insufficient engine temperature",
            FuelStatus::ClosedLoopO2Sense => {
                "Closed loop, using oxygen sensor feedback to determine fuel mix"
            }
            FuelStatus::OpenLoopLoad => {
                "Open loop due to engine load OR fuel cut due to deceleration"
            }
            FuelStatus::OpenLoopFailure => "Open loop due to system failure",
            FuelStatus::ClosedLoopFault => {
                "Closed loop, using at least one oxygen sensor but there is a fault in the feedback system"
            }
        }
    }
}

impl fmt::Display for FuelStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.description())
    }
}

/// A decoded value: numeric with a unit, or symbolic
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Value {
    Quantity { magnitude: f64, unit: Unit },
    FuelStatus(FuelStatus),
    /// Supported-PID bitmap, most significant bit is the lowest PID
    Bitmap(u32),
}

impl Value {
    pub fn quantity(magnitude: f64, unit: Unit) -> Self {
        Value::Quantity { magnitude, unit }
    }

    /// The bare number of a quantity, `None` for symbolic values
    pub fn magnitude(&self) -> Option<f64> {
        match self {
            Value::Quantity { magnitude, .. } => Some(*magnitude),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Quantity { magnitude, unit } => write!(f, "{} {}", magnitude, unit.symbol()),
            Value::FuelStatus(status) => status.fmt(f),
            Value::Bitmap(bits) => write!(f, "{:032b}", bits),
        }
    }
}

/// Response to a single command
#[derive(Debug, Clone, Serialize)]
pub struct Response {
    /// The command that was queried
    pub command: &'static Command,
    /// Decoded value, `None` when the vehicle gave no usable answer
    pub value: Option<Value>,
    /// Data bytes after the mode and PID echo
    pub raw_bytes: Vec<u8>,
    /// Timestamp when the response was received (Unix ms)
    pub timestamp_ms: u64,
}

impl Response {
    /// Decode raw data bytes for a command
    pub fn decode(command: &'static Command, raw_bytes: Vec<u8>, timestamp_ms: u64) -> Self {
        let value = command.decode(&raw_bytes);
        Self {
            command,
            value,
            raw_bytes,
            timestamp_ms,
        }
    }

    /// A response carrying no value
    pub fn null(command: &'static Command, timestamp_ms: u64) -> Self {
        Self {
            command,
            value: None,
            raw_bytes: Vec::new(),
            timestamp_ms,
        }
    }

    pub fn is_null(&self) -> bool {
        self.value.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands;

    #[test]
    fn test_fuel_status_bits() {
        assert_eq!(FuelStatus::from_bits(0x02), Some(FuelStatus::ClosedLoopO2Sense));
        assert_eq!(FuelStatus::from_bits(0x00), None);
        assert_eq!(FuelStatus::from_bits(0x03), None);
        assert_eq!(
            FuelStatus::OpenLoopFailure.to_string(),
            "Open loop due to system failure"
        );
    }

    #[test]
    fn test_value_magnitude() {
        let rpm = Value::quantity(1726.0, Unit::Rpm);
        assert_eq!(rpm.magnitude(), Some(1726.0));
        assert_eq!(rpm.to_string(), "1726 rpm");

        let status = Value::FuelStatus(FuelStatus::OpenLoopTemp);
        assert_eq!(status.magnitude(), None);
    }

    #[test]
    fn test_null_response() {
        let rpm = commands::by_name("RPM").unwrap();
        let response = Response::null(rpm, 0);
        assert!(response.is_null());
        assert!(response.raw_bytes.is_empty());

        let response = Response::decode(rpm, vec![0x1A, 0xF8], 0);
        assert!(!response.is_null());
    }
}
