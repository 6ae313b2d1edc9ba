//! USB identity resolution for serial ports

pub mod error;
pub mod resolver;
pub mod sysfs;

pub use error::UsbError;
pub use resolver::{platform_resolver, TargetHintResolver, UsbDeviceInfo, UsbResolver};
pub use sysfs::SysfsUsbResolver;
