//! Infrastructure layer - Technical implementations
//!
//! This layer contains:
//! - Serial port engines speaking the modem AT dialect
//! - USB identity resolution for serial ports
//! - Audio devices and the call audio bridge
//! - WebRTC sessions and browser signaling
//! - Repository implementations

pub mod media;
pub mod persistence;
pub mod protocols;
pub mod serial;
pub mod usb;
