//! Connection seam shared by the serial client and the mock

use crate::commands::Command;
use crate::error::ObdError;
use crate::response::Response;
use async_trait::async_trait;
use serde::Serialize;
use std::fmt;

/// How far the connection to the vehicle got
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub enum ConnectionStatus {
    /// No adapter on the serial port
    NotConnected,
    /// Adapter answers AT commands
    ElmConnected,
    /// Adapter is powered by the OBD port
    ObdConnected,
    /// Vehicle answers OBD requests
    CarConnected,
}

impl fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ConnectionStatus::NotConnected => "Not Connected",
            ConnectionStatus::ElmConnected => "ELM Connected",
            ConnectionStatus::ObdConnected => "OBD Connected",
            ConnectionStatus::CarConnected => "Car Connected",
        })
    }
}

/// A diagnostic session that can be queried for commands
#[async_trait]
pub trait ObdConnection: Send {
    /// Current connection status
    fn status(&self) -> ConnectionStatus;

    /// Whether the vehicle itself is reachable
    fn is_connected(&self) -> bool {
        self.status() == ConnectionStatus::CarConnected
    }

    /// Commands the vehicle reports as supported, in PID order
    fn supported_commands(&self) -> &[&'static Command];

    /// Send one command and wait for the response. A vehicle that gives no
    /// usable answer yields a null [`Response`], not an error.
    async fn query(&mut self, command: &'static Command) -> Result<Response, ObdError>;
}

#[async_trait]
impl<T: ObdConnection + ?Sized> ObdConnection for Box<T> {
    fn status(&self) -> ConnectionStatus {
        (**self).status()
    }

    fn supported_commands(&self) -> &[&'static Command] {
        (**self).supported_commands()
    }

    async fn query(&mut self, command: &'static Command) -> Result<Response, ObdError> {
        (**self).query(command).await
    }
}
