//! OBD-II Client for ELM327 Adapters
//!
//! Provides async serial communication with OBD-II adapters.

use crate::commands::{self, Command};
use crate::connection::{ConnectionStatus, ObdConnection};
use crate::elm327::{self, Reply};
use crate::error::ObdError;
use crate::mode;
use crate::protocol::ObdProtocol;
use crate::response::{Response, Value};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio_serial::{SerialPortBuilderExt, SerialStream};
use tracing::{debug, info, warn};

/// Default timeout for OBD commands
const DEFAULT_TIMEOUT_MS: u64 = 2000;

/// Below this adapter voltage the OBD port is considered unpowered
const MIN_OBD_VOLTAGE: f64 = 6.0;

/// How long to listen for leftover bytes when draining the line
const DRAIN_WINDOW: Duration = Duration::from_millis(50);

/// Serial connection settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectOptions {
    /// Serial port device path (e.g., "/dev/ttyUSB0" or "COM3")
    pub device: String,
    /// Baud rate for serial communication
    pub baud_rate: u32,
    /// OBD protocol to use
    pub protocol: ObdProtocol,
    /// Append the expected response count to requests so the adapter
    /// returns as soon as the ECU has answered
    pub fast: bool,
    /// Command timeout in milliseconds
    pub timeout_ms: u64,
    /// Wake the adapter from low power mode before initializing
    pub start_low_power: bool,
}

impl Default for ConnectOptions {
    fn default() -> Self {
        Self {
            device: "/dev/ttyS3".to_string(),
            baud_rate: 38400,
            protocol: ObdProtocol::Auto,
            fast: true,
            timeout_ms: DEFAULT_TIMEOUT_MS,
            start_low_power: true,
        }
    }
}

impl ConnectOptions {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// OBD-II client for communicating with ELM327-compatible adapters
pub struct ObdClient<S = SerialStream> {
    stream: S,
    options: ConnectOptions,
    status: ConnectionStatus,
    /// Protocol reported by the adapter once the vehicle answered
    protocol: ObdProtocol,
    /// Adapter identification from `ATZ`
    elm_version: Option<String>,
    supported: Vec<&'static Command>,
}

impl ObdClient<SerialStream> {
    /// Open the serial port and initialize the adapter
    pub async fn open(options: ConnectOptions) -> Result<Self, ObdError> {
        info!(
            "Opening OBD adapter on {} at {} baud",
            options.device, options.baud_rate
        );

        let stream = tokio_serial::new(&options.device, options.baud_rate)
            .timeout(options.timeout())
            .open_native_async()?;

        Self::connect(stream, options).await
    }
}

impl<S> ObdClient<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    /// Initialize an adapter reachable through `stream`.
    ///
    /// Fails only when the adapter itself does not respond. A silent
    /// vehicle leaves the client at a lower [`ConnectionStatus`].
    pub async fn connect(stream: S, options: ConnectOptions) -> Result<Self, ObdError> {
        let protocol = options.protocol;
        let mut client = Self {
            stream,
            options,
            status: ConnectionStatus::NotConnected,
            protocol,
            elm_version: None,
            supported: Vec::new(),
        };
        client.initialize().await?;
        Ok(client)
    }

    async fn initialize(&mut self) -> Result<(), ObdError> {
        if self.options.start_low_power {
            debug!("Waking adapter from low power mode");
            self.stream.write_all(b" ").await?;
            tokio::time::sleep(Duration::from_secs(1)).await;
            self.drain().await;
        }

        let reset = self.send("ATZ").await.map_err(|e| {
            warn!("Adapter did not answer ATZ: {}", e);
            ObdError::AdapterNotResponding
        })?;
        self.elm_version = reset.iter().find(|l| l.contains("ELM")).cloned();
        info!(
            "Adapter reset: {}",
            self.elm_version.as_deref().unwrap_or("unknown version")
        );

        self.expect_ok("ATE0").await?;
        self.expect_ok("ATL0").await?;
        self.expect_ok("ATH0").await?;
        let select_protocol = self.options.protocol.to_elm_command();
        self.expect_ok(&select_protocol).await?;
        self.status = ConnectionStatus::ElmConnected;

        let voltage_reply = self.send("ATRV").await?;
        match elm327::parse_voltage(&voltage_reply) {
            Some(volts) if volts < MIN_OBD_VOLTAGE => {
                warn!("Adapter reports {:.1}V, OBD port is not powered", volts);
                return Ok(());
            }
            Some(volts) => debug!("Adapter voltage {:.1}V", volts),
            None => debug!("Adapter did not report a voltage"),
        }
        self.status = ConnectionStatus::ObdConnected;

        let Some(pids_a) = commands::by_pid(mode::CURRENT_DATA, 0x00) else {
            return Err(ObdError::UnknownCommand("PIDS_A".to_string()));
        };
        let bitmap = match self.request(pids_a, false).await?.value {
            Some(Value::Bitmap(bitmap)) => bitmap,
            _ => {
                warn!("Vehicle did not answer 0100, ignition may be off");
                return Ok(());
            }
        };
        self.status = ConnectionStatus::CarConnected;

        let dpn = self.send("ATDPN").await?;
        if let Some(protocol) = dpn.first().and_then(|l| ObdProtocol::from_dpn_reply(l)) {
            self.protocol = protocol;
        }
        info!("Vehicle connected using protocol {}", self.protocol);

        self.load_supported(pids_a, bitmap).await?;
        info!("Vehicle supports {} commands", self.supported.len());
        Ok(())
    }

    /// Walk the supported-PID bitmaps, following each one that the
    /// previous bitmap advertises.
    async fn load_supported(
        &mut self,
        pids_a: &'static Command,
        bitmap: u32,
    ) -> Result<(), ObdError> {
        self.supported = vec![pids_a];
        let mut next = Some((pids_a, bitmap));

        while let Some((base, bitmap)) = next.take() {
            let found: Vec<_> = commands::supported_in(base.pid, bitmap).collect();
            self.supported.extend(found.iter().copied());

            if let Some(&bitmap_cmd) = found.iter().find(|c| c.is_bitmap()) {
                match self.request(bitmap_cmd, false).await?.value {
                    Some(Value::Bitmap(bits)) => next = Some((bitmap_cmd, bits)),
                    _ => debug!("{} gave no bitmap", bitmap_cmd.name),
                }
            }
        }
        Ok(())
    }

    /// Send an OBD request and decode the reply
    async fn request(
        &mut self,
        command: &'static Command,
        fast: bool,
    ) -> Result<Response, ObdError> {
        let mut request = command.request();
        if fast && command.mode == mode::CURRENT_DATA {
            request.push('1');
        }

        let lines = self.send(&request).await?;
        let now = crate::now_ms();

        match elm327::classify(&lines) {
            Reply::Data(frames) => match elm327::payload_for(&frames, command.mode, command.pid) {
                Some(payload) => {
                    let response = Response::decode(command, payload.to_vec(), now);
                    if response.is_null() {
                        debug!("{}: malformed payload {:02X?}", command.name, payload);
                    }
                    Ok(response)
                }
                None => {
                    debug!("{}: no frame answered the request", command.name);
                    Ok(Response::null(command, now))
                }
            },
            Reply::NoData => {
                debug!("{}: NO DATA", command.name);
                Ok(Response::null(command, now))
            }
            Reply::BusFailure(message) => {
                warn!("{}: {}", command.name, message);
                if self.status > ConnectionStatus::ElmConnected {
                    self.status = ConnectionStatus::ElmConnected;
                }
                Ok(Response::null(command, now))
            }
            Reply::Unknown => Err(ObdError::Rejected(request)),
            Reply::Text(text) => Err(ObdError::unexpected(&request, &text)),
        }
    }

    async fn expect_ok(&mut self, command: &str) -> Result<(), ObdError> {
        let lines = self.send(command).await?;
        if lines.iter().any(|l| l.contains("OK")) {
            Ok(())
        } else {
            Err(ObdError::unexpected(command, &lines))
        }
    }

    /// Send a raw command line and return the reply lines.
    /// Any transport failure marks the client as disconnected.
    async fn send(&mut self, command: &str) -> Result<Vec<String>, ObdError> {
        debug!("TX: {}", command);
        match self.exchange(command).await {
            Ok(lines) => {
                debug!("RX: {:?}", lines);
                Ok(lines)
            }
            Err(e) => {
                warn!("Adapter I/O failed on {}: {}", command, e);
                self.status = ConnectionStatus::NotConnected;
                Err(e)
            }
        }
    }

    async fn exchange(&mut self, command: &str) -> Result<Vec<String>, ObdError> {
        self.stream.write_all(command.as_bytes()).await?;
        self.stream.write_all(b"\r").await?;
        self.stream.flush().await?;

        let timeout = self.options.timeout();
        let raw = tokio::time::timeout(timeout, self.read_until_prompt())
            .await
            .map_err(|_| ObdError::Timeout(self.options.timeout_ms))??;

        Ok(elm327::reply_lines(&raw, command))
    }

    async fn read_until_prompt(&mut self) -> Result<Vec<u8>, ObdError> {
        let mut raw = Vec::new();
        let mut buf = [0u8; 64];
        loop {
            let n = self.stream.read(&mut buf).await?;
            if n == 0 {
                return Err(ObdError::AdapterNotResponding);
            }
            raw.extend_from_slice(&buf[..n]);
            if raw.contains(&elm327::PROMPT) {
                return Ok(raw);
            }
        }
    }

    /// Discard whatever the adapter printed unprompted
    async fn drain(&mut self) {
        let mut buf = [0u8; 64];
        while let Ok(Ok(n)) = tokio::time::timeout(DRAIN_WINDOW, self.stream.read(&mut buf)).await {
            if n == 0 {
                break;
            }
        }
    }

    /// Put the adapter into low power mode (`ATLP`)
    pub async fn low_power(&mut self) -> Result<(), ObdError> {
        info!("Entering low power mode");
        let lines = self.send("ATLP").await?;
        if lines.iter().any(|l| l.contains("OK")) {
            self.status = ConnectionStatus::NotConnected;
            Ok(())
        } else {
            Err(ObdError::unexpected("ATLP", &lines))
        }
    }

    /// Protocol in use; the configured one until the vehicle reports its own
    pub fn protocol(&self) -> ObdProtocol {
        self.protocol
    }

    /// Adapter identification reported on reset, e.g. "ELM327 v1.5"
    pub fn elm_version(&self) -> Option<&str> {
        self.elm_version.as_deref()
    }
}

#[async_trait]
impl<S> ObdConnection for ObdClient<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    fn status(&self) -> ConnectionStatus {
        self.status
    }

    fn supported_commands(&self) -> &[&'static Command] {
        &self.supported
    }

    async fn query(&mut self, command: &'static Command) -> Result<Response, ObdError> {
        match self.status {
            ConnectionStatus::CarConnected => {}
            ConnectionStatus::NotConnected => return Err(ObdError::AdapterNotResponding),
            _ => return Err(ObdError::VehicleNotConnected),
        }
        let fast = self.options.fast;
        self.request(command, fast).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};
    use tokio::io::{duplex, DuplexStream};

    type RequestLog = Arc<Mutex<Vec<String>>>;

    /// Minimal ELM327 on the far end of a duplex pipe. `obd` answers OBD
    /// requests with the reply text (without prompt), `None` ends the session.
    fn spawn_adapter<F>(obd: F) -> DuplexStream
    where
        F: Fn(&str) -> Option<String> + Send + 'static,
    {
        spawn_adapter_with("12.6V", obd).0
    }

    /// Like [`spawn_adapter`], answering `ATRV` with `voltage` and logging
    /// every received line. A lone space before any command is the wake
    /// byte; it is logged as `WAKE` and answered with a banner.
    fn spawn_adapter_with<F>(voltage: &'static str, obd: F) -> (DuplexStream, RequestLog)
    where
        F: Fn(&str) -> Option<String> + Send + 'static,
    {
        let log = RequestLog::default();
        let received = log.clone();
        let (client, mut adapter) = duplex(1024);
        tokio::spawn(async move {
            let mut echo = true;
            let mut line = Vec::new();
            let mut byte = [0u8; 1];
            while let Ok(1) = adapter.read(&mut byte).await {
                if byte[0] == b' ' && line.is_empty() {
                    received.lock().unwrap().push("WAKE".to_string());
                    if adapter.write_all(b"ELM327 v1.5\r\r>").await.is_err() {
                        break;
                    }
                    continue;
                }
                if byte[0] != b'\r' {
                    line.push(byte[0]);
                    continue;
                }
                let command = String::from_utf8_lossy(&line).trim().to_uppercase();
                line.clear();
                received.lock().unwrap().push(command.clone());

                let reply = match command.as_str() {
                    "ATZ" => {
                        echo = true;
                        "ELM327 v1.5".to_string()
                    }
                    "ATE0" => {
                        echo = false;
                        "OK".to_string()
                    }
                    "ATRV" => voltage.to_string(),
                    "ATDPN" => "A6".to_string(),
                    c if c.starts_with("AT") => "OK".to_string(),
                    c => match obd(c) {
                        Some(reply) => reply,
                        None => break,
                    },
                };

                let mut out = String::new();
                if echo {
                    out.push_str(&command);
                    out.push('\r');
                }
                out.push_str(&reply);
                out.push_str("\r\r>");
                if adapter.write_all(out.as_bytes()).await.is_err() {
                    break;
                }
            }
        });
        (client, log)
    }

    fn options() -> ConnectOptions {
        ConnectOptions {
            device: "duplex".to_string(),
            fast: false,
            timeout_ms: 500,
            start_low_power: false,
            ..Default::default()
        }
    }

    fn car(request: &str) -> Option<String> {
        let reply = match request {
            "0100" => "41 00 BE 3F A8 13",
            "0120" => "41 20 80 00 00 01",
            "0140" => "41 40 40 00 00 00",
            "010C" => "41 0C 1A F8",
            "0111" => "NO DATA",
            "0105" => "41 05 73",
            "0121" => "41 21 00 10",
            _ => "NO DATA",
        };
        Some(reply.to_string())
    }

    #[tokio::test]
    async fn test_connect_and_discover_supported() {
        let client = ObdClient::connect(spawn_adapter(car), options()).await.unwrap();

        assert_eq!(client.status(), ConnectionStatus::CarConnected);
        assert_eq!(client.protocol(), ObdProtocol::Iso15765_4Can11bit500);
        assert_eq!(client.elm_version(), Some("ELM327 v1.5"));

        let names: Vec<_> = client.supported_commands().iter().map(|c| c.name).collect();
        assert_eq!(names.first(), Some(&"PIDS_A"));
        assert!(names.contains(&"RPM"));
        assert!(names.contains(&"PIDS_B"));
        assert!(names.contains(&"DISTANCE_W_MIL"));
        assert!(names.contains(&"PIDS_C"));
        assert!(names.contains(&"CONTROL_MODULE_VOLTAGE"));
    }

    #[tokio::test]
    async fn test_query_decodes_and_nulls() {
        let mut client = ObdClient::connect(spawn_adapter(car), options()).await.unwrap();

        let rpm = commands::by_name("RPM").unwrap();
        let response = client.query(rpm).await.unwrap();
        assert_eq!(response.value.and_then(|v| v.magnitude()), Some(1726.0));

        let throttle = commands::by_name("THROTTLE_POS").unwrap();
        assert!(client.query(throttle).await.unwrap().is_null());
    }

    #[tokio::test]
    async fn test_fast_mode_appends_response_count() {
        let adapter = spawn_adapter(|request| match request {
            "0100" => Some("41 00 BE 3F A8 13".to_string()),
            "010C1" => Some("41 0C 1A F8".to_string()),
            _ => Some("NO DATA".to_string()),
        });
        let mut client = ObdClient::connect(adapter, ConnectOptions { fast: true, ..options() })
            .await
            .unwrap();

        let rpm = commands::by_name("RPM").unwrap();
        assert!(!client.query(rpm).await.unwrap().is_null());
    }

    #[tokio::test]
    async fn test_silent_vehicle_is_not_car_connected() {
        let adapter = spawn_adapter(|_| Some("UNABLE TO CONNECT".to_string()));
        let mut client = ObdClient::connect(adapter, options()).await.unwrap();

        assert!(client.status() < ConnectionStatus::CarConnected);
        assert!(!client.is_connected());
        let rpm = commands::by_name("RPM").unwrap();
        assert!(matches!(
            client.query(rpm).await,
            Err(ObdError::VehicleNotConnected)
        ));
    }

    #[tokio::test]
    async fn test_bus_failure_downgrades_status() {
        let adapter = spawn_adapter(|request| match request {
            "0100" => Some("41 00 BE 3F A8 13".to_string()),
            "0120" => Some("NO DATA".to_string()),
            _ => Some("CAN ERROR".to_string()),
        });
        let mut client = ObdClient::connect(adapter, options()).await.unwrap();
        assert!(client.is_connected());

        let rpm = commands::by_name("RPM").unwrap();
        assert!(client.query(rpm).await.unwrap().is_null());
        assert_eq!(client.status(), ConnectionStatus::ElmConnected);
    }

    #[tokio::test]
    async fn test_rejected_request_is_an_error() {
        let adapter = spawn_adapter(|request| match request {
            "0100" => Some("41 00 BE 3F A8 13".to_string()),
            "0120" => Some("NO DATA".to_string()),
            _ => Some("?".to_string()),
        });
        let mut client = ObdClient::connect(adapter, options()).await.unwrap();

        let rpm = commands::by_name("RPM").unwrap();
        match client.query(rpm).await {
            Err(ObdError::Rejected(request)) => assert_eq!(request, "010C"),
            other => panic!("unexpected {:?}", other.map(|r| r.value)),
        }
        assert!(client.is_connected());
    }

    #[tokio::test]
    async fn test_closed_pipe_marks_not_connected() {
        let adapter = spawn_adapter(|request| match request {
            "0100" => Some("41 00 BE 3F A8 13".to_string()),
            "0120" => Some("NO DATA".to_string()),
            _ => None,
        });
        let mut client = ObdClient::connect(adapter, options()).await.unwrap();

        let rpm = commands::by_name("RPM").unwrap();
        assert!(client.query(rpm).await.is_err());
        assert_eq!(client.status(), ConnectionStatus::NotConnected);
        assert!(matches!(
            client.query(rpm).await,
            Err(ObdError::AdapterNotResponding)
        ));
    }

    #[tokio::test]
    async fn test_low_power() {
        let mut client = ObdClient::connect(spawn_adapter(car), options()).await.unwrap();
        client.low_power().await.unwrap();
        assert_eq!(client.status(), ConnectionStatus::NotConnected);
    }

    #[tokio::test]
    async fn test_low_power_start_wakes_adapter() {
        let (adapter, log) = spawn_adapter_with("12.6V", car);
        let client = ObdClient::connect(
            adapter,
            ConnectOptions {
                start_low_power: true,
                ..options()
            },
        )
        .await
        .unwrap();

        assert_eq!(client.status(), ConnectionStatus::CarConnected);
        // The wake banner is drained, so ATZ still gets its own reply
        assert_eq!(client.elm_version(), Some("ELM327 v1.5"));
        let log = log.lock().unwrap();
        assert_eq!(&log[..2], ["WAKE", "ATZ"]);
    }

    #[tokio::test]
    async fn test_low_voltage_stops_before_obd() {
        let (adapter, log) = spawn_adapter_with("4.1V", car);
        let mut client = ObdClient::connect(adapter, options()).await.unwrap();

        assert_eq!(client.status(), ConnectionStatus::ElmConnected);
        assert!(client.supported_commands().is_empty());
        let rpm = commands::by_name("RPM").unwrap();
        assert!(matches!(
            client.query(rpm).await,
            Err(ObdError::VehicleNotConnected)
        ));

        let log = log.lock().unwrap();
        assert_eq!(log.last().map(String::as_str), Some("ATRV"));
        assert!(!log.iter().any(|request| request == "0100"));
        assert!(!log.contains(&"WAKE".to_string()));
    }

    #[tokio::test]
    async fn test_silent_adapter_fails_to_connect() {
        let (client_end, _adapter_end) = duplex(64);
        let result = ObdClient::connect(
            client_end,
            ConnectOptions {
                timeout_ms: 50,
                ..options()
            },
        )
        .await;
        assert!(matches!(result, Err(ObdError::AdapterNotResponding)));
    }
}
