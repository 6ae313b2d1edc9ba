//! Command requests and line classification

use super::error::EngineError;
use std::time::Duration;
use tokio::sync::oneshot;

/// Ctrl-Z, terminates PDU input after a prompt
pub const CTRL_Z: char = '\u{1a}';

/// Commands the engine has to wait for a `>` prompt on
const PROMPT_COMMANDS: [&str; 1] = ["AT+CMGS"];

const URC_PREFIXES: [&str; 8] = [
    "+CMTI:",
    "+CREG:",
    "RING",
    "+CLCC:",
    "NO CARRIER",
    "BUSY",
    "NO ANSWER",
    "NO DIALTONE",
];

/// One queued command. The reply channel is used exactly once.
#[derive(Debug)]
pub struct CommandRequest {
    pub command: String,
    pub timeout: Duration,
    /// Suppress TX/RX tracing
    pub silent: bool,
    pub reply: oneshot::Sender<Result<String, EngineError>>,
}

/// Bytes written to the port for `command`
pub fn encode_command(command: &str) -> Vec<u8> {
    if command.ends_with(CTRL_Z) {
        command.as_bytes().to_vec()
    } else {
        let mut bytes = Vec::with_capacity(command.len() + 2);
        bytes.extend_from_slice(command.as_bytes());
        bytes.extend_from_slice(b"\r\n");
        bytes
    }
}

/// Whether a `>` prompt completes `command`
pub fn expects_prompt(command: &str) -> bool {
    let upper = command.trim_start().to_ascii_uppercase();
    PROMPT_COMMANDS.iter().any(|p| upper.starts_with(p))
}

pub fn is_urc(line: &str) -> bool {
    URC_PREFIXES.iter().any(|p| line.starts_with(p))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineKind {
    Ok,
    Error,
    Other,
}

pub fn classify(line: &str) -> LineKind {
    if line == "OK" {
        LineKind::Ok
    } else if line.contains("ERROR") {
        LineKind::Error
    } else {
        LineKind::Other
    }
}
