//! ELM327 client errors

use thiserror::Error;

/// Errors raised while talking to the adapter or the vehicle
#[derive(Debug, Error)]
pub enum ObdError {
    /// Serial port could not be opened, read or written
    #[error("Serial port error: {0}")]
    SerialError(String),

    /// No prompt from the adapter within the command timeout
    #[error("No reply from adapter within {0}ms")]
    Timeout(u64),

    /// Reply that is neither data nor a known adapter message
    #[error("Unexpected reply to {command}: {reply}")]
    UnexpectedReply { command: String, reply: String },

    /// Adapter answered `?`
    #[error("Adapter rejected {0}")]
    Rejected(String),

    #[error("Unknown OBD protocol: {0}")]
    UnsupportedProtocol(String),

    #[error("Command {0} is not in the command table")]
    UnknownCommand(String),

    #[error("ELM327 adapter not responding")]
    AdapterNotResponding,

    /// Adapter is up but the vehicle does not answer
    #[error("Vehicle ignition is off or not connected")]
    VehicleNotConnected,
}

impl ObdError {
    pub(crate) fn unexpected(command: &str, lines: &[String]) -> Self {
        ObdError::UnexpectedReply {
            command: command.to_string(),
            reply: lines.join(" "),
        }
    }
}

impl From<std::io::Error> for ObdError {
    fn from(err: std::io::Error) -> Self {
        ObdError::SerialError(err.to_string())
    }
}

impl From<tokio_serial::Error> for ObdError {
    fn from(err: tokio_serial::Error) -> Self {
        ObdError::SerialError(err.to_string())
    }
}
