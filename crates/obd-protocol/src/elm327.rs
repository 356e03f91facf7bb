//! ELM327 reply parsing

use crate::mode;

/// Prompt byte the adapter prints when it is ready for the next command
pub(crate) const PROMPT: u8 = b'>';

/// Replies that mean the adapter could not reach the vehicle bus
const BUS_FAILURES: &[&str] = &[
    "UNABLE TO CONNECT",
    "CAN ERROR",
    "BUS ERROR",
    "BUS BUSY",
    "FB ERROR",
    "DATA ERROR",
    "BUFFER FULL",
    "STOPPED",
    "ERROR",
];

/// Classified adapter reply
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Reply {
    /// One decoded frame per hex line
    Data(Vec<Vec<u8>>),
    /// Vehicle did not answer the request
    NoData,
    /// The bus could not be reached, carries the adapter's message
    BusFailure(String),
    /// Adapter did not understand the command
    Unknown,
    /// Anything else (AT replies, version strings)
    Text(Vec<String>),
}

/// Split a raw reply into trimmed, non-empty lines, dropping the prompt,
/// the command echo and progress chatter.
pub(crate) fn reply_lines(raw: &[u8], sent: &str) -> Vec<String> {
    String::from_utf8_lossy(raw)
        .split(|c: char| c == '\r' || c == '\n')
        .map(|line| line.trim().trim_end_matches(PROMPT as char).trim())
        .filter(|line| !line.is_empty())
        .filter(|line| !line.eq_ignore_ascii_case(sent))
        .filter(|line| !line.starts_with("SEARCHING"))
        .filter(|line| *line != "BUS INIT: ...OK" && *line != "BUS INIT: OK")
        .map(str::to_string)
        .collect()
}

fn parse_hex_line(line: &str) -> Option<Vec<u8>> {
    let compact: String = line.chars().filter(|c| !c.is_whitespace()).collect();
    if compact.is_empty() || compact.len() % 2 != 0 {
        return None;
    }
    if !compact.chars().all(|c| c.is_ascii_hexdigit()) {
        return None;
    }

    (0..compact.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(&compact[i..i + 2], 16).ok())
        .collect()
}

/// Classify the lines returned by [`reply_lines`]
pub(crate) fn classify(lines: &[String]) -> Reply {
    if lines.iter().any(|l| l == "NO DATA") {
        return Reply::NoData;
    }
    if let Some(failure) = lines.iter().find(|l| {
        BUS_FAILURES.iter().any(|f| l.as_str() == *f) || l.starts_with("BUS INIT:")
    }) {
        return Reply::BusFailure(failure.clone());
    }
    if lines.iter().any(|l| l == "?") {
        return Reply::Unknown;
    }
    if lines.is_empty() {
        return Reply::Text(Vec::new());
    }

    let frames: Option<Vec<Vec<u8>>> = lines.iter().map(|l| parse_hex_line(l)).collect();
    match frames {
        Some(frames) => Reply::Data(frames),
        None => Reply::Text(lines.to_vec()),
    }
}

/// Find the payload answering `request_mode`/`pid` among the frames.
/// With several ECUs answering, the first matching frame wins.
pub(crate) fn payload_for(frames: &[Vec<u8>], request_mode: u8, pid: u8) -> Option<&[u8]> {
    let response_mode = request_mode + mode::RESPONSE_OFFSET;
    frames
        .iter()
        .find(|f| f.len() >= 2 && f[0] == response_mode && f[1] == pid)
        .map(|f| &f[2..])
}

/// Parse an `ATRV` reply such as `"12.6V"`
pub(crate) fn parse_voltage(lines: &[String]) -> Option<f64> {
    lines
        .iter()
        .find_map(|l| l.trim_end_matches(|c: char| c == 'V' || c == 'v').trim().parse::<f64>().ok())
}
