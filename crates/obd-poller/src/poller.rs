//! Round-Robin Poller Implementation

use obd_protocol::commands::{self, Command};
use obd_protocol::{ObdConnection, ObdError, Response};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

/// Outcomes of a poll that carry no response
#[derive(Debug, Error)]
pub enum PollError {
    /// The vehicle is not reachable right now
    #[error("No connection to the vehicle")]
    Disconnected,

    /// Discovery found no command that answers
    #[error("Vehicle answered none of the queried commands")]
    NoSupportedCommands,

    /// The connection failed while querying a command
    #[error("Query for {command} failed: {source}")]
    Query {
        command: &'static str,
        #[source]
        source: ObdError,
    },
}

/// Configuration for discovery
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PollerConfig {
    /// Command names to try, case-insensitive. Empty tries every
    /// supported command.
    pub watch: Vec<String>,
}

impl PollerConfig {
    fn wants(&self, command: &Command) -> bool {
        self.watch.is_empty()
            || self
                .watch
                .iter()
                .any(|name| name.eq_ignore_ascii_case(command.name))
    }
}

/// Commands that answered during discovery, in enumeration order
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WorkingSet {
    commands: Vec<&'static Command>,
}

impl WorkingSet {
    /// Query each supported command once and keep those with a non-null
    /// response. A failed query counts as null; nothing is retried.
    pub async fn discover<C>(connection: &mut C, config: &PollerConfig) -> Result<Self, PollError>
    where
        C: ObdConnection + ?Sized,
    {
        if !connection.is_connected() {
            warn!("Unable to connect to the car ({})", connection.status());
            return Err(PollError::Disconnected);
        }

        for name in &config.watch {
            if commands::by_name(name).is_none() {
                warn!("Ignoring unknown command {} in watch list", name);
            }
        }

        let candidates: Vec<&'static Command> = connection
            .supported_commands()
            .iter()
            .copied()
            .filter(|c| config.wants(c))
            .collect();
        info!("Trying {} supported commands", candidates.len());

        let mut working = Vec::with_capacity(candidates.len());
        for command in candidates {
            match connection.query(command).await {
                Ok(response) if !response.is_null() => {
                    debug!("{} answers", command.name);
                    working.push(command);
                }
                Ok(_) => debug!("{} returned null, excluded", command.name),
                Err(e) => debug!("{} query failed, excluded: {}", command.name, e),
            }
        }

        info!("Working set has {} commands", working.len());
        Ok(Self { commands: working })
    }

    /// Working set of already known answering commands
    pub fn from_commands(commands: Vec<&'static Command>) -> Self {
        Self { commands }
    }

    /// Number of commands in the rotation
    pub fn len(&self) -> usize {
        self.commands.len()
    }

    /// Check if no command answered
    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    /// Command at `index` in rotation order
    pub fn get(&self, index: usize) -> Option<&'static Command> {
        self.commands.get(index).copied()
    }

    /// Command names in rotation order
    pub fn names(&self) -> Vec<&'static str> {
        self.commands.iter().map(|c| c.name).collect()
    }
}

/// Polling session: owns the connection and rotates through the working set
///
/// Every poll takes `&mut self`, so a session has exactly one caller at a
/// time. Wrap it in a mutex to share it.
pub struct RoundRobinPoller<C> {
    connection: C,
    working_set: WorkingSet,
    cursor: usize,
}

impl<C: ObdConnection> RoundRobinPoller<C> {
    /// Run discovery on `connection` and start the rotation at its first command
    pub async fn discover(mut connection: C, config: &PollerConfig) -> Result<Self, PollError> {
        let working_set = WorkingSet::discover(&mut connection, config).await?;
        Ok(Self::with_working_set(connection, working_set))
    }

    /// Skip discovery and rotate through a known working set
    pub fn with_working_set(connection: C, working_set: WorkingSet) -> Self {
        Self {
            connection,
            working_set,
            cursor: 0,
        }
    }

    /// Query the command under the cursor, then advance the cursor.
    ///
    /// A disconnected session leaves the cursor where it is. A failed query
    /// still advances it.
    pub async fn get_data(&mut self) -> Result<Response, PollError> {
        if !self.connection.is_connected() {
            warn!("No connection to car");
            return Err(PollError::Disconnected);
        }

        let Some(command) = self.working_set.get(self.cursor) else {
            warn!("No supported commands to poll");
            return Err(PollError::NoSupportedCommands);
        };
        self.cursor = (self.cursor + 1) % self.working_set.len();

        self.connection
            .query(command)
            .await
            .map_err(|source| PollError::Query {
                command: command.name,
                source,
            })
    }

    /// Command the next [`get_data`](Self::get_data) will query
    pub fn next_command(&self) -> Option<&'static Command> {
        self.working_set.get(self.cursor)
    }

    /// Index of the next command to poll
    pub fn cursor(&self) -> usize {
        self.cursor
    }

    /// Commands being rotated through
    pub fn working_set(&self) -> &WorkingSet {
        &self.working_set
    }

    /// Connection owned by this session
    pub fn connection(&self) -> &C {
        &self.connection
    }

    /// Mutable access to the owned connection
    pub fn connection_mut(&mut self) -> &mut C {
        &mut self.connection
    }
}
