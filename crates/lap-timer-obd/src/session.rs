//! Connection lifecycle and the polling loop

use crate::config::PollSettings;
use crate::recorder::SweepRecorder;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use obd_poller::{PollError, RoundRobinPoller, WorkingSet};
use obd_protocol::{ConnectOptions, MockConnection, ObdClient, ObdConnection, ObdError, Response, Value};
use serde::Serialize;
use std::io::{self, Write};
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

/// Opens diagnostic sessions
#[async_trait]
pub trait Connector: Send {
    async fn connect(&mut self) -> Result<Box<dyn ObdConnection>, ObdError>;
}

/// Connects through an ELM327 adapter on a serial port
pub struct SerialConnector {
    options: ConnectOptions,
}

impl SerialConnector {
    pub fn new(options: ConnectOptions) -> Self {
        Self { options }
    }
}

#[async_trait]
impl Connector for SerialConnector {
    async fn connect(&mut self) -> Result<Box<dyn ObdConnection>, ObdError> {
        let client = ObdClient::open(self.options.clone()).await?;
        Ok(Box::new(client))
    }
}

/// Connects to a simulated car
pub struct SimulatedConnector;

#[async_trait]
impl Connector for SimulatedConnector {
    async fn connect(&mut self) -> Result<Box<dyn ObdConnection>, ObdError> {
        Ok(Box::new(MockConnection::simulated()))
    }
}

/// Keep connecting until the car answers
pub async fn connect_with_retry<K>(connector: &mut K, delay: Duration) -> Box<dyn ObdConnection>
where
    K: Connector + ?Sized,
{
    loop {
        match connector.connect().await {
            Ok(connection) if connection.is_connected() => {
                info!("Connected to the car");
                return connection;
            }
            Ok(connection) => warn!("Car not reachable: {}", connection.status()),
            Err(e) => warn!("Failed to connect: {}", e),
        }
        info!("Retrying in {}s", delay.as_secs());
        tokio::time::sleep(delay).await;
    }
}

/// A single reading as printed with `--json`
#[derive(Debug, Serialize)]
struct Reading<'a> {
    time: DateTime<Utc>,
    command: &'static str,
    value: Option<&'a Value>,
    text: Option<String>,
}

/// Where readings go: stdout-like text or JSON lines, plus an optional CSV
pub struct Output<W: Write> {
    out: W,
    json: bool,
    recorder: Option<SweepRecorder<Box<dyn Write + Send>>>,
}

impl<W: Write> Output<W> {
    pub fn new(out: W, json: bool) -> Self {
        Self {
            out,
            json,
            recorder: None,
        }
    }

    pub fn with_recorder(mut self, recorder: SweepRecorder<Box<dyn Write + Send>>) -> Self {
        self.recorder = Some(recorder);
        self
    }

    fn start(&mut self, working_set: &WorkingSet) -> io::Result<()> {
        if working_set.is_empty() {
            return Ok(());
        }
        if !self.json {
            writeln!(self.out, "Polling {}", working_set.names().join(", "))?;
        }
        match self.recorder.as_mut() {
            Some(recorder) => recorder.start(working_set),
            None => Ok(()),
        }
    }

    fn reading(&mut self, response: &Response) -> io::Result<()> {
        let time = timestamp(response.timestamp_ms);
        let name = response.command.name;

        if self.json {
            let reading = Reading {
                time,
                command: name,
                value: response.value.as_ref(),
                text: response.value.as_ref().map(Value::to_string),
            };
            serde_json::to_writer(&mut self.out, &reading)?;
            writeln!(self.out)?;
        } else {
            writeln!(self.out, "{}", describe(response))?;
        }

        match self.recorder.as_mut() {
            Some(recorder) => recorder.record(name, response.value.as_ref(), time),
            None => Ok(()),
        }
    }

    fn missed(&mut self, name: &str) -> io::Result<()> {
        match self.recorder.as_mut() {
            Some(recorder) => recorder.record(name, None, Utc::now()),
            None => Ok(()),
        }
    }

    pub fn into_inner(self) -> W {
        self.out
    }
}

fn timestamp(ms: u64) -> DateTime<Utc> {
    i64::try_from(ms)
        .ok()
        .and_then(DateTime::<Utc>::from_timestamp_millis)
        .unwrap_or_else(Utc::now)
}

/// `NAME: value`, with `null` for a missing value
pub fn describe(response: &Response) -> String {
    match &response.value {
        Some(value) => format!("{}: {}", response.command.name, value),
        None => format!("{}: null", response.command.name),
    }
}

/// Poll forever, or until `count` readings were delivered.
///
/// The session is dropped and rebuilt whenever the car goes away or no
/// command answers. Returns the number of readings delivered.
pub async fn poll<K, W>(
    connector: &mut K,
    settings: &PollSettings,
    count: Option<u64>,
    output: &mut Output<W>,
) -> anyhow::Result<u64>
where
    K: Connector + ?Sized,
    W: Write,
{
    let config = settings.poller_config();
    let delay = settings.reconnect_delay();
    let mut delivered = 0u64;

    if count == Some(0) {
        return Ok(0);
    }

    loop {
        let connection = connect_with_retry(connector, delay).await;
        match RoundRobinPoller::discover(connection, &config).await {
            Ok(mut poller) => {
                output.start(poller.working_set())?;

                let mut ticker = tokio::time::interval(settings.interval());
                ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
                loop {
                    ticker.tick().await;
                    match poller.get_data().await {
                        Ok(response) => {
                            debug!("{}", describe(&response));
                            output.reading(&response)?;
                            delivered += 1;
                            if Some(delivered) == count {
                                return Ok(delivered);
                            }
                        }
                        Err(PollError::Query { command, source }) => {
                            warn!("Query for {} failed: {}", command, source);
                            output.missed(command)?;
                        }
                        Err(e) => {
                            warn!("{}", e);
                            break;
                        }
                    }
                }
            }
            Err(e) => warn!("Discovery failed: {}", e),
        }

        info!("Reconnecting in {}s", delay.as_secs());
        tokio::time::sleep(delay).await;
    }
}

/// Query every supported command once and print the answers
pub async fn list<K, W>(connector: &mut K, out: &mut W) -> anyhow::Result<()>
where
    K: Connector + ?Sized,
    W: Write,
{
    let mut connection = connector.connect().await?;
    if !connection.is_connected() {
        anyhow::bail!("Car not reachable: {}", connection.status());
    }

    let supported = connection.supported_commands().to_vec();
    writeln!(out, "{} supported commands", supported.len())?;
    for command in supported {
        let answer = match connection.query(command).await {
            Ok(response) => describe(&response),
            Err(e) => format!("{}: {}", command.name, e),
        };
        writeln!(out, "{:<28} {}", answer, command.description)?;
    }
    Ok(())
}

/// Put the adapter on the serial port into low power mode
pub async fn low_power(options: ConnectOptions) -> anyhow::Result<()> {
    let mut client = ObdClient::open(options).await?;
    client.low_power().await?;
    info!("Adapter is in low power mode");
    Ok(())
}
