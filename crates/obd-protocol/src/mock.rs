//! In-memory connection for tests and hardware-free runs

use crate::commands::{self, Command};
use crate::connection::{ConnectionStatus, ObdConnection};
use crate::error::ObdError;
use crate::response::{FuelStatus, Response, Unit, Value};
use async_trait::async_trait;
use std::collections::HashMap;
use std::time::Instant;
use tracing::{debug, info};

/// Connection that answers from a table of values
///
/// Supported commands without a value answer null. The query log records
/// every command name in the order it was asked.
pub struct MockConnection {
    status: ConnectionStatus,
    supported: Vec<&'static Command>,
    values: HashMap<&'static str, Value>,
    failing: Vec<&'static str>,
    /// Start of the RPM ramp when simulating a running engine
    started: Option<Instant>,
    queries: Vec<&'static str>,
}

impl MockConnection {
    /// A car-connected mock advertising `supported` and answering nothing yet
    pub fn new(supported: Vec<&'static Command>) -> Self {
        Self {
            status: ConnectionStatus::CarConnected,
            supported,
            values: HashMap::new(),
            failing: Vec::new(),
            started: None,
            queries: Vec::new(),
        }
    }

    /// A warm car at idle whose RPM ramps between 800 and 3500
    pub fn simulated() -> Self {
        info!("Creating simulated OBD connection");
        let supported = [
            "PIDS_A",
            "FUEL_STATUS",
            "ENGINE_LOAD",
            "COOLANT_TEMP",
            "SHORT_FUEL_TRIM_1",
            "LONG_FUEL_TRIM_1",
            "RPM",
            "SPEED",
            "TIMING_ADVANCE",
            "INTAKE_TEMP",
            "MAF",
            "THROTTLE_POS",
        ]
        .iter()
        .filter_map(|name| commands::by_name(name))
        .collect();

        let mut mock = Self::new(supported)
            .with_raw("PIDS_A", &[0xBE, 0x3F, 0xA8, 0x13])
            .with_value("FUEL_STATUS", Value::FuelStatus(FuelStatus::ClosedLoopO2Sense))
            .with_value("ENGINE_LOAD", Value::quantity(39.2, Unit::Percent))
            .with_value("COOLANT_TEMP", Value::quantity(88.0, Unit::Celsius))
            .with_value("SHORT_FUEL_TRIM_1", Value::quantity(1.6, Unit::Percent))
            .with_value("LONG_FUEL_TRIM_1", Value::quantity(-3.1, Unit::Percent))
            .with_value("SPEED", Value::quantity(40.0, Unit::KilometersPerHour))
            .with_value("TIMING_ADVANCE", Value::quantity(12.0, Unit::Degrees))
            .with_value("INTAKE_TEMP", Value::quantity(16.0, Unit::Celsius))
            .with_value("MAF", Value::quantity(7.5, Unit::GramsPerSecond))
            .with_value("THROTTLE_POS", Value::quantity(27.1, Unit::Percent));
        mock.started = Some(Instant::now());
        mock
    }

    /// Answer `name` with `value`
    pub fn with_value(mut self, name: &str, value: Value) -> Self {
        if let Some(command) = commands::by_name(name) {
            self.values.insert(command.name, value);
        }
        self
    }

    /// Answer `name` with whatever `bytes` decode to; malformed bytes answer null
    pub fn with_raw(mut self, name: &str, bytes: &[u8]) -> Self {
        if let Some(command) = commands::by_name(name) {
            match command.decode(bytes) {
                Some(value) => {
                    self.values.insert(command.name, value);
                }
                None => {
                    self.values.remove(command.name);
                }
            }
        }
        self
    }

    /// Make queries for `name` fail with a transport error
    pub fn with_failure(mut self, name: &str) -> Self {
        if let Some(command) = commands::by_name(name) {
            self.failing.push(command.name);
        }
        self
    }

    /// Switch the connection status, e.g. to simulate the car going away
    pub fn set_status(&mut self, status: ConnectionStatus) {
        self.status = status;
    }

    /// Command names queried so far, oldest first
    pub fn queries(&self) -> &[&'static str] {
        &self.queries
    }

    /// RPM following a ramp up, hold, ramp down, hold cycle
    fn simulated_rpm(started: Instant) -> f64 {
        const MIN_RPM: f64 = 800.0;
        const MAX_RPM: f64 = 3500.0;
        const RAMP_TIME: f64 = 4.0;
        const HOLD_TIME: f64 = 3.0;
        const CYCLE_TIME: f64 = 2.0 * (RAMP_TIME + HOLD_TIME);

        let phase = started.elapsed().as_secs_f64() % CYCLE_TIME;
        if phase < RAMP_TIME {
            MIN_RPM + (MAX_RPM - MIN_RPM) * (phase / RAMP_TIME)
        } else if phase < RAMP_TIME + HOLD_TIME {
            MAX_RPM
        } else if phase < 2.0 * RAMP_TIME + HOLD_TIME {
            let ramp_phase = phase - RAMP_TIME - HOLD_TIME;
            MAX_RPM - (MAX_RPM - MIN_RPM) * (ramp_phase / RAMP_TIME)
        } else {
            MIN_RPM
        }
    }
}

#[async_trait]
impl ObdConnection for MockConnection {
    fn status(&self) -> ConnectionStatus {
        self.status
    }

    fn supported_commands(&self) -> &[&'static Command] {
        &self.supported
    }

    async fn query(&mut self, command: &'static Command) -> Result<Response, ObdError> {
        self.queries.push(command.name);
        let now = crate::now_ms();

        if self.status != ConnectionStatus::CarConnected {
            return Err(ObdError::VehicleNotConnected);
        }
        if self.failing.contains(&command.name) {
            return Err(ObdError::Timeout(0));
        }

        let value = match (command.name, self.started) {
            ("RPM", Some(started)) => Some(Value::quantity(Self::simulated_rpm(started), Unit::Rpm)),
            _ => self.values.get(command.name).cloned(),
        };
        debug!("Mock {} -> {:?}", command.name, value);

        Ok(Response {
            command,
            value,
            raw_bytes: Vec::new(),
            timestamp_ms: now,
        })
    }
}
