//! Call bounded context - voice call state of a modem

pub mod aggregate;
pub mod event;
pub mod notification;
pub mod value_object;

pub use aggregate::CallLine;
pub use event::CallEvent;
pub use notification::CallNotification;
pub use value_object::{CallSnapshot, CallState};
