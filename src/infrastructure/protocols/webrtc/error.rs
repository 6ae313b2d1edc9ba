//! Call session errors

use crate::infrastructure::media::AudioError;
use crate::infrastructure::usb::UsbError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SessionError {
    #[error("webrtc session not initialized for {0}")]
    NotInitialized(String),

    #[error("webrtc not connected for {0}")]
    NotConnected(String),

    #[error("webrtc error: {0}")]
    WebRtc(#[from] webrtc::Error),

    #[error("audio error: {0}")]
    Audio(AudioError),

    #[error("usb error: {0}")]
    Usb(#[from] UsbError),

    #[error("invalid webrtc configuration: {0}")]
    Config(String),

    #[error("signaling error: {0}")]
    Signaling(String),
}

impl From<AudioError> for SessionError {
    fn from(err: AudioError) -> Self {
        match err {
            AudioError::Usb(usb) => SessionError::Usb(usb),
            other => SessionError::Audio(other),
        }
    }
}
