//! Application layer - Use cases and application services
//!
//! This layer orchestrates domain objects and infrastructure to fulfill use
//! cases. It's responsible for:
//! - Coordinating a modem engine with its call session
//! - Tearing sessions down when calls end
//! - Mapping failures to use-case level errors

pub mod call_service;

pub use call_service::{CallService, CallServiceError, CallStatus};
