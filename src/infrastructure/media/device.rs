//! Audio device abstraction
//!
//! Device I/O is blocking and frame-oriented: the capture loop asks for one
//! full frame, the playback loop hands over one full frame. Implementations
//! pace themselves on the device clock.

use super::error::AudioError;
use std::sync::Arc;

/// An enumerated audio endpoint
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioDeviceInfo {
    pub name: String,
    pub max_input_channels: u16,
    pub max_output_channels: u16,
}

impl AudioDeviceInfo {
    pub fn can_capture(&self) -> bool {
        self.max_input_channels > 0
    }

    pub fn can_play(&self) -> bool {
        self.max_output_channels > 0
    }
}

/// Mono 16-bit stream parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamParams {
    pub sample_rate: u32,
    pub frame_samples: usize,
}

pub trait AudioInput: Send {
    /// Fill `frame` completely. [`AudioError::Timeout`] means retry.
    fn read_frame(&mut self, frame: &mut [i16]) -> Result<(), AudioError>;
}

pub trait AudioOutput: Send {
    /// Queue `frame` for playback, blocking while the device is saturated
    fn write_frame(&mut self, frame: &[i16]) -> Result<(), AudioError>;
}

pub trait AudioHost: Send + Sync {
    fn devices(&self) -> Result<Vec<AudioDeviceInfo>, AudioError>;

    fn open_input(
        &self,
        device: &AudioDeviceInfo,
        params: StreamParams,
    ) -> Result<Box<dyn AudioInput>, AudioError>;

    fn open_output(
        &self,
        device: &AudioDeviceInfo,
        params: StreamParams,
    ) -> Result<Box<dyn AudioOutput>, AudioError>;
}

/// Host used when the crate is built without an audio backend
#[derive(Debug, Default, Clone, Copy)]
pub struct UnavailableHost;

impl AudioHost for UnavailableHost {
    fn devices(&self) -> Result<Vec<AudioDeviceInfo>, AudioError> {
        Err(AudioError::Unavailable)
    }

    fn open_input(
        &self,
        _device: &AudioDeviceInfo,
        _params: StreamParams,
    ) -> Result<Box<dyn AudioInput>, AudioError> {
        Err(AudioError::Unavailable)
    }

    fn open_output(
        &self,
        _device: &AudioDeviceInfo,
        _params: StreamParams,
    ) -> Result<Box<dyn AudioOutput>, AudioError> {
        Err(AudioError::Unavailable)
    }
}

/// The default host for this build
pub fn default_host() -> Arc<dyn AudioHost> {
    #[cfg(feature = "uac")]
    {
        Arc::new(super::cpal_host::CpalHost::default())
    }
    #[cfg(not(feature = "uac"))]
    {
        Arc::new(UnavailableHost)
    }
}
