//! Modem bounded context - identity, status and the ports engines publish to

pub mod entity;
pub mod operator;
pub mod repository;

pub use entity::{Modem, ModemStatus};
pub use operator::OperatorDirectory;
pub use repository::{IdentityRegistry, ModemRepository, SmsSink};
