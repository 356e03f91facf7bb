//! OBD-II Protocol Definitions

use crate::error::ObdError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Supported OBD-II protocols
///
/// Deserializes from either the ELM327 protocol number (`"3"`, `"A"`) or the
/// kebab-case name (`"iso9141-2"`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum ObdProtocol {
    /// Automatic protocol detection
    #[default]
    Auto,
    /// SAE J1850 PWM (41.6 kbaud)
    J1850Pwm,
    /// SAE J1850 VPW (10.4 kbaud)
    J1850Vpw,
    /// ISO 9141-2 (10.4 kbaud, 5 baud init)
    Iso9141_2,
    /// ISO 14230-4 KWP (slow init, 10.4 kbaud)
    Iso14230_4Kwp,
    /// ISO 14230-4 KWP (fast init, 10.4 kbaud)
    Iso14230_4KwpFast,
    /// ISO 15765-4 CAN (11 bit ID, 500 kbaud)
    Iso15765_4Can11bit500,
    /// ISO 15765-4 CAN (29 bit ID, 500 kbaud)
    Iso15765_4Can29bit500,
    /// ISO 15765-4 CAN (11 bit ID, 250 kbaud)
    Iso15765_4Can11bit250,
    /// ISO 15765-4 CAN (29 bit ID, 250 kbaud)
    Iso15765_4Can29bit250,
    /// SAE J1939 CAN (29 bit ID, 250 kbaud)
    SaeJ1939,
    /// User defined CAN 1
    UserCan1,
    /// User defined CAN 2
    UserCan2,
}

const ALL: [ObdProtocol; 13] = [
    ObdProtocol::Auto,
    ObdProtocol::J1850Pwm,
    ObdProtocol::J1850Vpw,
    ObdProtocol::Iso9141_2,
    ObdProtocol::Iso14230_4Kwp,
    ObdProtocol::Iso14230_4KwpFast,
    ObdProtocol::Iso15765_4Can11bit500,
    ObdProtocol::Iso15765_4Can29bit500,
    ObdProtocol::Iso15765_4Can11bit250,
    ObdProtocol::Iso15765_4Can29bit250,
    ObdProtocol::SaeJ1939,
    ObdProtocol::UserCan1,
    ObdProtocol::UserCan2,
];

impl ObdProtocol {
    /// ELM327 protocol number, as used by `ATSP` and reported by `ATDPN`
    pub fn elm_id(&self) -> char {
        match self {
            ObdProtocol::Auto => '0',
            ObdProtocol::J1850Pwm => '1',
            ObdProtocol::J1850Vpw => '2',
            ObdProtocol::Iso9141_2 => '3',
            ObdProtocol::Iso14230_4Kwp => '4',
            ObdProtocol::Iso14230_4KwpFast => '5',
            ObdProtocol::Iso15765_4Can11bit500 => '6',
            ObdProtocol::Iso15765_4Can29bit500 => '7',
            ObdProtocol::Iso15765_4Can11bit250 => '8',
            ObdProtocol::Iso15765_4Can29bit250 => '9',
            ObdProtocol::SaeJ1939 => 'A',
            ObdProtocol::UserCan1 => 'B',
            ObdProtocol::UserCan2 => 'C',
        }
    }

    /// Look up a protocol by its ELM327 protocol number
    pub fn from_elm_id(id: char) -> Option<Self> {
        let id = id.to_ascii_uppercase();
        ALL.into_iter().find(|p| p.elm_id() == id)
    }

    /// Parse an `ATDPN` reply. A leading `A` marks a protocol that was
    /// found by automatic search, e.g. `"A6"`.
    pub fn from_dpn_reply(reply: &str) -> Option<Self> {
        let reply = reply.trim();
        let id = match reply.len() {
            1 => reply,
            2 if reply.starts_with(|c: char| c.eq_ignore_ascii_case(&'A')) => &reply[1..],
            _ => return None,
        };
        id.chars().next().and_then(Self::from_elm_id)
    }

    /// Get the ELM327 AT command for this protocol
    pub fn to_elm_command(&self) -> String {
        format!("ATSP{}", self.elm_id())
    }

    /// Kebab-case name used in configuration files
    pub fn name(&self) -> &'static str {
        match self {
            ObdProtocol::Auto => "auto",
            ObdProtocol::J1850Pwm => "j1850-pwm",
            ObdProtocol::J1850Vpw => "j1850-vpw",
            ObdProtocol::Iso9141_2 => "iso9141-2",
            ObdProtocol::Iso14230_4Kwp => "iso14230-4-kwp",
            ObdProtocol::Iso14230_4KwpFast => "iso14230-4-kwp-fast",
            ObdProtocol::Iso15765_4Can11bit500 => "iso15765-4-can-11bit-500",
            ObdProtocol::Iso15765_4Can29bit500 => "iso15765-4-can-29bit-500",
            ObdProtocol::Iso15765_4Can11bit250 => "iso15765-4-can-11bit-250",
            ObdProtocol::Iso15765_4Can29bit250 => "iso15765-4-can-29bit-250",
            ObdProtocol::SaeJ1939 => "sae-j1939",
            ObdProtocol::UserCan1 => "user-can-1",
            ObdProtocol::UserCan2 => "user-can-2",
        }
    }
}

impl fmt::Display for ObdProtocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for ObdProtocol {
    type Err = ObdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let mut chars = s.chars();
        if let (Some(id), None) = (chars.next(), chars.next()) {
            if let Some(protocol) = Self::from_elm_id(id) {
                return Ok(protocol);
            }
        }

        ALL.into_iter()
            .find(|p| p.name().eq_ignore_ascii_case(s))
            .ok_or_else(|| ObdError::UnsupportedProtocol(s.to_string()))
    }
}

impl TryFrom<String> for ObdProtocol {
    type Error = ObdError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<ObdProtocol> for String {
    fn from(protocol: ObdProtocol) -> Self {
        protocol.name().to_string()
    }
}
