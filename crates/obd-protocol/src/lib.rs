//! OBD-II Protocol Implementation
//!
//! This crate provides async serial communication with ELM327-compatible
//! OBD-II adapters: the command table, response decoding, and the
//! [`ObdConnection`] seam that higher layers poll through.

mod client;
pub mod commands;
mod connection;
mod elm327;
mod error;
mod mock;
mod protocol;
mod response;

pub use client::{ConnectOptions, ObdClient};
pub use commands::{Command, Decoder};
pub use connection::{ConnectionStatus, ObdConnection};
pub use error::ObdError;
pub use mock::MockConnection;
pub use protocol::ObdProtocol;
pub use response::{FuelStatus, Response, Unit, Value};

/// OBD-II mode constants
pub mod mode {
    /// Current data
    pub const CURRENT_DATA: u8 = 0x01;

    /// Offset added to the request mode in a positive response
    pub const RESPONSE_OFFSET: u8 = 0x40;
}

pub(crate) fn now_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
