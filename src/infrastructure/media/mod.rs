//! Media processing implementations

pub mod bridge;
pub mod codec;
#[cfg(feature = "uac")]
pub mod cpal_host;
pub mod device;
pub mod error;
pub mod picker;
pub mod ring_buffer;

pub use bridge::{AudioBridge, AudioSink, CAPTURE_QUEUE_FRAMES};
pub use codec::{G711Type, PcmaCodec, PcmuCodec};
pub use device::{default_host, AudioDeviceInfo, AudioHost, AudioInput, AudioOutput, StreamParams, UnavailableHost};
pub use error::AudioError;
pub use picker::{pick_devices, score_device, select_devices, DeviceHints, DeviceSelection};
pub use ring_buffer::RingBuffer;
