//! Audio path errors

use thiserror::Error;

#[derive(Error, Debug)]
pub enum AudioError {
    #[error("invalid audio config: {0}")]
    InvalidConfig(String),

    #[error("no audio devices found")]
    NoDevices,

    #[error("no matching audio device (input found: {input}, output found: {output})")]
    NoMatchingDevice { input: bool, output: bool },

    #[error("USB resolution failed: {0}")]
    Usb(#[from] crate::infrastructure::usb::UsbError),

    /// No data within the device read window; callers retry
    #[error("audio device read timed out")]
    Timeout,

    #[error("audio backend error: {0}")]
    Backend(String),

    #[error("audio path closed")]
    Closed,

    #[error("audio backend not available in this build")]
    Unavailable,
}
