//! Domain layer - modem identity, call state and the ports they publish to
//!
//! This layer contains:
//! - Shared kernel: identity value objects and domain errors
//! - Modem context: the modem entity, operator directory and repository ports
//! - Call context: the call line aggregate and its events

pub mod call;
pub mod modem;
pub mod shared;

// Re-export commonly used types
pub use shared::{DomainError, Result};
