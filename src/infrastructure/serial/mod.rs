//! Serial modem protocol: framing, the per-port engine and port management

pub mod command;
pub mod engine;
pub mod error;
pub mod framer;
mod identify;
pub mod manager;
pub mod operations;
pub mod parse;
mod poller;
#[cfg(test)]
mod testing;

pub use engine::{EngineContext, ModemEngine, Transport, UacStatus, ENQUEUE_MARGIN};
pub use error::EngineError;
pub use framer::{Frame, LineFramer};
pub use manager::{PortLister, PortManager, PortOpener, SerialPorts};
pub use operations::is_valid_dial_number;
