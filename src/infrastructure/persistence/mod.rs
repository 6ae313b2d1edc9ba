//! Persistence implementations

pub mod memory;

pub use memory::{InMemoryIdentityRegistry, InMemoryModemRepository, LoggingSmsSink};
