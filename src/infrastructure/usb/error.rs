//! USB resolution errors

use thiserror::Error;

#[derive(Error, Debug)]
pub enum UsbError {
    #[error("empty port name")]
    EmptyPort,

    #[error("failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("USB device root not found from {0}")]
    NotFound(String),

    #[error("USB identity resolution is not supported for {0}")]
    Unsupported(String),

    #[error("invalid USB id: {0:?}")]
    InvalidId(String),
}
