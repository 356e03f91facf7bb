//! OBD-II Command Table
//!
//! Mode 01 commands with their decoding formulas. Names follow the usual
//! python-obd spelling (`RPM`, `THROTTLE_POS`, `COOLANT_TEMP`, ...), so
//! configuration written for other tools keeps working.

use crate::mode;
use crate::response::{FuelStatus, Unit, Value};
use serde::Serialize;
use std::fmt;
use std::hash::{Hash, Hasher};

/// How the data bytes of a response are turned into a [`Value`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decoder {
    /// Four bytes of supported-PID flags
    PidBitmap,
    /// A * 100 / 255
    Percent,
    /// (A - 128) * 100 / 128
    PercentCentered,
    /// A - 40
    Temperature,
    /// ((A * 256) + B) / 4
    Rpm,
    /// A
    Speed,
    /// A / 2 - 64
    TimingAdvance,
    /// ((A * 256) + B) / 100
    Maf,
    /// A
    Pressure,
    /// A * 3
    FuelPressure,
    /// A / 200, trim byte ignored
    O2Voltage,
    /// Status of fuel system 1
    FuelStatus,
    /// (A * 256) + B seconds
    Runtime,
    /// (A * 256) + B kilometers
    Distance,
    /// ((A * 256) + B) / 1000
    ModuleVoltage,
    /// ((A * 256) + B) * 100 / 255
    AbsoluteLoad,
    /// ((A * 256) + B) / 32768
    EquivRatio,
    /// ((A * 256) + B) / 20
    FuelRate,
}

impl Decoder {
    fn decode(&self, bytes: &[u8]) -> Option<Value> {
        let a = *bytes.first()? as f64;
        let word = || -> Option<f64> { Some(a * 256.0 + *bytes.get(1)? as f64) };

        let value = match self {
            Decoder::PidBitmap => {
                let raw: [u8; 4] = bytes.get(..4)?.try_into().ok()?;
                Value::Bitmap(u32::from_be_bytes(raw))
            }
            Decoder::Percent => Value::quantity(a * 100.0 / 255.0, Unit::Percent),
            Decoder::PercentCentered => {
                Value::quantity((a - 128.0) * 100.0 / 128.0, Unit::Percent)
            }
            Decoder::Temperature => Value::quantity(a - 40.0, Unit::Celsius),
            Decoder::Rpm => Value::quantity(word()? / 4.0, Unit::Rpm),
            Decoder::Speed => Value::quantity(a, Unit::KilometersPerHour),
            Decoder::TimingAdvance => Value::quantity(a / 2.0 - 64.0, Unit::Degrees),
            Decoder::Maf => Value::quantity(word()? / 100.0, Unit::GramsPerSecond),
            Decoder::Pressure => Value::quantity(a, Unit::Kilopascal),
            Decoder::FuelPressure => Value::quantity(a * 3.0, Unit::Kilopascal),
            Decoder::O2Voltage => Value::quantity(a / 200.0, Unit::Volt),
            Decoder::FuelStatus => Value::FuelStatus(FuelStatus::from_bits(bytes[0])?),
            Decoder::Runtime => Value::quantity(word()?, Unit::Second),
            Decoder::Distance => Value::quantity(word()?, Unit::Kilometer),
            Decoder::ModuleVoltage => Value::quantity(word()? / 1000.0, Unit::Volt),
            Decoder::AbsoluteLoad => Value::quantity(word()? * 100.0 / 255.0, Unit::Percent),
            Decoder::EquivRatio => Value::quantity(word()? / 32768.0, Unit::Ratio),
            Decoder::FuelRate => Value::quantity(word()? / 20.0, Unit::LitersPerHour),
        };
        Some(value)
    }
}

/// A diagnostic command the adapter can send
#[derive(Debug, Serialize)]
pub struct Command {
    pub name: &'static str,
    pub description: &'static str,
    pub mode: u8,
    pub pid: u8,
    /// Number of data bytes in a well-formed response
    pub bytes: usize,
    #[serde(skip)]
    pub decoder: Decoder,
}

impl Command {
    const fn current(
        name: &'static str,
        description: &'static str,
        pid: u8,
        bytes: usize,
        decoder: Decoder,
    ) -> Self {
        Self {
            name,
            description,
            mode: mode::CURRENT_DATA,
            pid,
            bytes,
            decoder,
        }
    }

    /// Request string sent to the adapter, e.g. `"010C"`
    pub fn request(&self) -> String {
        format!("{:02X}{:02X}", self.mode, self.pid)
    }

    /// Decode the data bytes that follow the mode and PID echo.
    /// Returns `None` for short or malformed payloads.
    pub fn decode(&self, bytes: &[u8]) -> Option<Value> {
        if bytes.len() < self.bytes {
            return None;
        }
        self.decoder.decode(bytes)
    }

    /// Whether this command is one of the supported-PID bitmaps
    pub fn is_bitmap(&self) -> bool {
        self.decoder == Decoder::PidBitmap
    }
}

impl PartialEq for Command {
    fn eq(&self, other: &Self) -> bool {
        self.mode == other.mode && self.pid == other.pid
    }
}

impl Eq for Command {}

impl Hash for Command {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.mode.hash(state);
        self.pid.hash(state);
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.name, self.description)
    }
}

/// All known Mode 01 commands, in PID order
pub static COMMANDS: &[Command] = &[
    Command::current("PIDS_A", "Supported PIDs [01-20]", 0x00, 4, Decoder::PidBitmap),
    Command::current("FUEL_STATUS", "Fuel System Status", 0x03, 2, Decoder::FuelStatus),
    Command::current("ENGINE_LOAD", "Calculated Engine Load", 0x04, 1, Decoder::Percent),
    Command::current("COOLANT_TEMP", "Engine Coolant Temperature", 0x05, 1, Decoder::Temperature),
    Command::current("SHORT_FUEL_TRIM_1", "Short Term Fuel Trim - Bank 1", 0x06, 1, Decoder::PercentCentered),
    Command::current("LONG_FUEL_TRIM_1", "Long Term Fuel Trim - Bank 1", 0x07, 1, Decoder::PercentCentered),
    Command::current("SHORT_FUEL_TRIM_2", "Short Term Fuel Trim - Bank 2", 0x08, 1, Decoder::PercentCentered),
    Command::current("LONG_FUEL_TRIM_2", "Long Term Fuel Trim - Bank 2", 0x09, 1, Decoder::PercentCentered),
    Command::current("FUEL_PRESSURE", "Fuel Pressure", 0x0A, 1, Decoder::FuelPressure),
    Command::current("INTAKE_PRESSURE", "Intake Manifold Pressure", 0x0B, 1, Decoder::Pressure),
    Command::current("RPM", "Engine RPM", 0x0C, 2, Decoder::Rpm),
    Command::current("SPEED", "Vehicle Speed", 0x0D, 1, Decoder::Speed),
    Command::current("TIMING_ADVANCE", "Timing Advance", 0x0E, 1, Decoder::TimingAdvance),
    Command::current("INTAKE_TEMP", "Intake Air Temp", 0x0F, 1, Decoder::Temperature),
    Command::current("MAF", "Air Flow Rate (MAF)", 0x10, 2, Decoder::Maf),
    Command::current("THROTTLE_POS", "Throttle Position", 0x11, 1, Decoder::Percent),
    Command::current("O2_B1S1", "O2: Bank 1 - Sensor 1 Voltage", 0x14, 2, Decoder::O2Voltage),
    Command::current("O2_B1S2", "O2: Bank 1 - Sensor 2 Voltage", 0x15, 2, Decoder::O2Voltage),
    Command::current("RUN_TIME", "Engine Run Time", 0x1F, 2, Decoder::Runtime),
    Command::current("PIDS_B", "Supported PIDs [21-40]", 0x20, 4, Decoder::PidBitmap),
    Command::current("DISTANCE_W_MIL", "Distance Traveled with MIL on", 0x21, 2, Decoder::Distance),
    Command::current("FUEL_LEVEL", "Fuel Level Input", 0x2F, 1, Decoder::Percent),
    Command::current("DISTANCE_SINCE_DTC_CLEAR", "Distance traveled since codes cleared", 0x31, 2, Decoder::Distance),
    Command::current("BAROMETRIC_PRESSURE", "Barometric Pressure", 0x33, 1, Decoder::Pressure),
    Command::current("PIDS_C", "Supported PIDs [41-60]", 0x40, 4, Decoder::PidBitmap),
    Command::current("CONTROL_MODULE_VOLTAGE", "Control module voltage", 0x42, 2, Decoder::ModuleVoltage),
    Command::current("ABSOLUTE_LOAD", "Absolute load value", 0x43, 2, Decoder::AbsoluteLoad),
    Command::current("COMMANDED_EQUIV_RATIO", "Commanded equivalence ratio", 0x44, 2, Decoder::EquivRatio),
    Command::current("RELATIVE_THROTTLE_POS", "Relative throttle position", 0x45, 1, Decoder::Percent),
    Command::current("AMBIANT_AIR_TEMP", "Ambient air temperature", 0x46, 1, Decoder::Temperature),
    Command::current("SHORT_O2_TRIM_B1", "Short term secondary O2 trim - Bank 1", 0x56, 2, Decoder::PercentCentered),
    Command::current("LONG_O2_TRIM_B1", "Long term secondary O2 trim - Bank 1", 0x57, 2, Decoder::PercentCentered),
    Command::current("OIL_TEMP", "Engine oil temperature", 0x5C, 1, Decoder::Temperature),
    Command::current("FUEL_RATE", "Engine fuel rate", 0x5E, 2, Decoder::FuelRate),
];

/// Look up a command by name, ignoring case
pub fn by_name(name: &str) -> Option<&'static Command> {
    COMMANDS.iter().find(|c| c.name.eq_ignore_ascii_case(name))
}

/// Look up a command by mode and PID
pub fn by_pid(mode: u8, pid: u8) -> Option<&'static Command> {
    COMMANDS.iter().find(|c| c.mode == mode && c.pid == pid)
}

/// Whether `pid` is flagged in the bitmap answered by the bitmap command at `base`
///
/// A bitmap at base `B` covers PIDs `B+1 ..= B+32`; the most significant bit
/// stands for `B+1`.
pub fn bitmap_contains(base: u8, bitmap: u32, pid: u8) -> bool {
    let offset = match pid.checked_sub(base) {
        Some(offset) if (1..=32).contains(&offset) => offset,
        _ => return false,
    };
    bitmap & (1 << (32 - offset as u32)) != 0
}

/// Commands covered by a bitmap that the vehicle flags as supported, in PID order
pub fn supported_in(base: u8, bitmap: u32) -> impl Iterator<Item = &'static Command> {
    COMMANDS.iter().filter(move |c| {
        c.mode == mode::CURRENT_DATA && bitmap_contains(base, bitmap, c.pid)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decode(name: &str, bytes: &[u8]) -> Option<Value> {
        by_name(name).unwrap().decode(bytes)
    }

    fn magnitude(name: &str, bytes: &[u8]) -> f64 {
        decode(name, bytes).and_then(|v| v.magnitude()).unwrap()
    }

    #[test]
    fn test_rpm_decode() {
        // 1A F8 => ((0x1A * 256) + 0xF8) / 4 = 6904 / 4 = 1726
        assert!((magnitude("RPM", &[0x1A, 0xF8]) - 1726.0).abs() < 0.01);
    }

    #[test]
    fn test_coolant_temp_decode() {
        // 0x73 = 115, so temp = 115 - 40 = 75°C
        assert!((magnitude("COOLANT_TEMP", &[0x73]) - 75.0).abs() < 0.01);
    }

    #[test]
    fn test_fuel_trim_decode() {
        assert!((magnitude("SHORT_FUEL_TRIM_1", &[0x80]) - 0.0).abs() < 0.01);
        // 0x90 = 144, so trim = (144-128)*100/128 = 12.5%
        assert!((magnitude("LONG_FUEL_TRIM_1", &[0x90]) - 12.5).abs() < 0.01);
    }

    #[test]
    fn test_timing_and_maf_decode() {
        // 0x8C = 140 => 70 - 64 = 6°
        assert!((magnitude("TIMING_ADVANCE", &[0x8C]) - 6.0).abs() < 0.01);
        // 0x01F4 = 500 => 5 g/s
        assert!((magnitude("MAF", &[0x01, 0xF4]) - 5.0).abs() < 0.01);
        assert!((magnitude("THROTTLE_POS", &[0xFF]) - 100.0).abs() < 0.01);
    }

    #[test]
    fn test_fuel_status_decode() {
        assert_eq!(
            decode("FUEL_STATUS", &[0x02, 0x00]),
            Some(Value::FuelStatus(FuelStatus::ClosedLoopO2Sense))
        );
        assert_eq!(decode("FUEL_STATUS", &[0x06, 0x00]), None);
    }

    #[test]
    fn test_short_payload_is_null() {
        assert_eq!(decode("RPM", &[0x1A]), None);
        assert_eq!(decode("PIDS_A", &[0xBE, 0x3F]), None);
    }

    #[test]
    fn test_lookup() {
        assert_eq!(by_name("rpm").unwrap().pid, 0x0C);
        assert_eq!(by_pid(0x01, 0x11).unwrap().name, "THROTTLE_POS");
        assert!(by_name("WARP_FACTOR").is_none());
        assert_eq!(by_name("RPM").unwrap().request(), "010C");
    }

    #[test]
    fn test_lap_timer_commands_present() {
        let names = [
            "RPM",
            "THROTTLE_POS",
            "ENGINE_LOAD",
            "TIMING_ADVANCE",
            "MAF",
            "COOLANT_TEMP",
            "INTAKE_TEMP",
            "SHORT_O2_TRIM_B1",
            "LONG_O2_TRIM_B1",
            "FUEL_STATUS",
        ];
        let missing: Vec<_> = names.iter().filter(|n| by_name(n).is_none()).collect();
        assert!(missing.is_empty(), "missing from table: {:?}", missing);
    }

    #[test]
    fn test_secondary_o2_trim_decode() {
        let short = by_name("short_o2_trim_b1").unwrap();
        assert_eq!((short.pid, short.bytes), (0x56, 2));
        assert_eq!(by_pid(0x01, 0x57).unwrap().name, "LONG_O2_TRIM_B1");
        // Bank 1 is byte A: 0x70 = 112 => (112-128)*100/128 = -12.5%
        assert!((magnitude("SHORT_O2_TRIM_B1", &[0x70, 0x80]) - -12.5).abs() < 0.01);
        assert_eq!(decode("LONG_O2_TRIM_B1", &[0x70]), None);
    }

    #[test]
    fn test_bitmap_contains() {
        // BE3FA813 is a common answer to 0100
        let bitmap = 0xBE3F_A813;
        assert!(bitmap_contains(0x00, bitmap, 0x01));
        assert!(!bitmap_contains(0x00, bitmap, 0x02));
        assert!(bitmap_contains(0x00, bitmap, 0x0C));
        assert!(bitmap_contains(0x00, bitmap, 0x20));
        assert!(!bitmap_contains(0x00, bitmap, 0x00));
        assert!(!bitmap_contains(0x20, bitmap, 0x0C));
    }

    #[test]
    fn test_supported_in() {
        let names: Vec<_> = supported_in(0x00, 0xBE3F_A813).map(|c| c.name).collect();
        assert!(names.contains(&"RPM"));
        assert!(names.contains(&"PIDS_B"));
        assert!(!names.contains(&"PIDS_A"));
        assert!(!names.contains(&"FUEL_LEVEL"));
    }

    #[test]
    fn test_table_is_pid_ordered() {
        assert!(COMMANDS.windows(2).all(|w| w[0].pid < w[1].pid));
    }
}
