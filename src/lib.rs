//! modemhub - serial cellular modem gateway with browser voice calls
//!
//! Layered the Domain-Driven Design way:
//! - domain: modem identity, call state and the ports engines publish to
//! - infrastructure: serial engines, USB audio and WebRTC sessions
//! - application: call orchestration across a modem and its browser session
//! - interface: HTTP and WebSocket API

pub mod application;
pub mod config;
pub mod domain;
pub mod infrastructure;
pub mod interface;

// Re-export commonly used types
pub use domain::shared::error::DomainError;
pub use domain::shared::result::Result;
