//! Protocol engine errors

use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum EngineError {
    /// Transport failure; the engine stops
    #[error("port I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("command {command:?} timed out after {timeout:?}")]
    Timeout { command: String, timeout: Duration },

    /// The modem answered with an `ERROR` line; carries everything received
    #[error("modem error: {0}")]
    ModemError(String),

    #[error("engine did not answer within the enqueue window")]
    EnqueueTimeout,

    #[error("engine stopped")]
    Stopped,

    #[error("invalid dial number: {0:?}")]
    InvalidDialNumber(String),

    #[error("call already in progress")]
    CallInProgress,

    #[error("modem busy")]
    Busy,

    #[error("invalid PDU: {0}")]
    InvalidPdu(String),
}

impl EngineError {
    /// Errors after which the engine no longer accepts commands
    pub fn is_fatal(&self) -> bool {
        matches!(self, EngineError::Io(_) | EngineError::Stopped)
    }
}
