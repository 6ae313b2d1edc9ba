//! Audio Bridge between a modem's USB audio interface and the network
//!
//! Two blocking loops run on dedicated threads:
//! - capture: device frames into a bounded queue drained by the uplink
//! - playback: ring buffer (filled from the network) into the device

use super::device::{AudioHost, AudioInput, AudioOutput, StreamParams};
use super::error::AudioError;
use super::picker::select_devices;
use super::ring_buffer::RingBuffer;
use crate::config::AudioConfig;
use crate::domain::shared::value_objects::ModemTarget;
use crate::infrastructure::usb::UsbResolver;
use metrics::counter;
use parking_lot::Mutex;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Capture frames buffered ahead of the uplink
pub const CAPTURE_QUEUE_FRAMES: usize = 128;

const RETRY_DELAY: Duration = Duration::from_millis(20);

/// Receives decoded network audio
pub type AudioSink = Arc<dyn Fn(&[i16]) + Send + Sync>;

struct Devices {
    input: Box<dyn AudioInput>,
    output: Box<dyn AudioOutput>,
}

/// Audio Bridge
///
/// Created stopped; [`start`](Self::start) launches both loops and
/// [`close`](Self::close) stops them exactly once.
pub struct AudioBridge {
    label: String,
    capture_samples: usize,
    playback_samples: usize,
    ring: Arc<RingBuffer>,
    devices: Mutex<Option<Devices>>,
    capture_tx: mpsc::Sender<Vec<i16>>,
    capture_rx: Mutex<Option<mpsc::Receiver<Vec<i16>>>>,
    cancel: CancellationToken,
    threads: Mutex<Vec<JoinHandle<()>>>,
}

impl AudioBridge {
    /// Only mono 16-bit PCM at a positive rate is supported
    pub fn validate(config: &AudioConfig) -> Result<(), AudioError> {
        if config.channels != 1 {
            return Err(AudioError::InvalidConfig(format!(
                "channels must be 1, got {}",
                config.channels
            )));
        }
        if config.bits_per_sample != 16 {
            return Err(AudioError::InvalidConfig(format!(
                "bits_per_sample must be 16, got {}",
                config.bits_per_sample
            )));
        }
        if config.sample_rate == 0 {
            return Err(AudioError::InvalidConfig("sample_rate must be positive".into()));
        }
        if config.capture_frame_samples() == 0 || config.playback_frame_samples() == 0 {
            return Err(AudioError::InvalidConfig("chunk length too short".into()));
        }
        Ok(())
    }

    /// Pick and open the devices belonging to `target`
    pub fn open(
        config: &AudioConfig,
        target: &ModemTarget,
        host: &dyn AudioHost,
        resolver: &dyn UsbResolver,
    ) -> Result<Self, AudioError> {
        Self::validate(config)?;
        let selection = select_devices(host, resolver, target, &config.device_keyword)?;

        let input = host.open_input(
            &selection.input,
            StreamParams {
                sample_rate: config.sample_rate,
                frame_samples: config.capture_frame_samples(),
            },
        )?;
        let output = host.open_output(
            &selection.output,
            StreamParams {
                sample_rate: config.sample_rate,
                frame_samples: config.playback_frame_samples(),
            },
        )?;

        Self::with_devices(&target.port_name, config, input, output)
    }

    /// Bridge over already opened devices
    pub fn with_devices(
        label: &str,
        config: &AudioConfig,
        input: Box<dyn AudioInput>,
        output: Box<dyn AudioOutput>,
    ) -> Result<Self, AudioError> {
        Self::validate(config)?;
        let (capture_tx, capture_rx) = mpsc::channel(CAPTURE_QUEUE_FRAMES);

        Ok(Self {
            label: label.to_string(),
            capture_samples: config.capture_frame_samples(),
            playback_samples: config.playback_frame_samples(),
            ring: Arc::new(RingBuffer::new(config.ring_capacity())),
            devices: Mutex::new(Some(Devices { input, output })),
            capture_tx,
            capture_rx: Mutex::new(Some(capture_rx)),
            cancel: CancellationToken::new(),
            threads: Mutex::new(Vec::new()),
        })
    }

    /// Launch the capture and playback loops
    pub fn start(&self) -> Result<(), AudioError> {
        if self.cancel.is_cancelled() {
            return Err(AudioError::Closed);
        }
        let Some(devices) = self.devices.lock().take() else {
            // Already running
            return Ok(());
        };

        let capture = {
            let label = self.label.clone();
            let tx = self.capture_tx.clone();
            let cancel = self.cancel.clone();
            let samples = self.capture_samples;
            let input = devices.input;
            std::thread::Builder::new()
                .name("audio-capture".into())
                .spawn(move || capture_loop(&label, input, samples, tx, cancel))
                .map_err(|e| AudioError::Backend(e.to_string()))?
        };
        self.threads.lock().push(capture);

        let playback = {
            let label = self.label.clone();
            let ring = Arc::clone(&self.ring);
            let cancel = self.cancel.clone();
            let samples = self.playback_samples;
            let output = devices.output;
            std::thread::Builder::new()
                .name("audio-playback".into())
                .spawn(move || playback_loop(&label, output, samples, ring, cancel))
                .map_err(|e| AudioError::Backend(e.to_string()))
        };
        match playback {
            Ok(handle) => {
                self.threads.lock().push(handle);
                info!("[{}] Audio bridge started", self.label);
                Ok(())
            }
            Err(e) => {
                self.close();
                Err(e)
            }
        }
    }

    /// Hand the capture queue to the uplink; only the first caller gets it
    pub fn take_capture_frames(&self) -> Option<mpsc::Receiver<Vec<i16>>> {
        self.capture_rx.lock().take()
    }

    /// Queue network audio for playback
    pub fn push_from_network(&self, samples: &[i16]) {
        self.ring.write(samples);
    }

    /// Sink that feeds this bridge's playback buffer
    pub fn sink(&self) -> AudioSink {
        let ring = Arc::clone(&self.ring);
        Arc::new(move |samples: &[i16]| ring.write(samples))
    }

    pub fn is_closed(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Stop both loops and wait for them; later calls do nothing
    ///
    /// Blocks until the device threads exit, so call it off the async runtime.
    pub fn close(&self) {
        if self.cancel.is_cancelled() {
            return;
        }
        self.cancel.cancel();
        self.ring.close();
        self.devices.lock().take();

        let threads: Vec<JoinHandle<()>> = self.threads.lock().drain(..).collect();
        for thread in threads {
            if thread.join().is_err() {
                warn!("[{}] Audio thread panicked", self.label);
            }
        }
        info!("[{}] Audio bridge closed", self.label);
    }
}

impl Drop for AudioBridge {
    fn drop(&mut self) {
        self.close();
    }
}

fn capture_loop(
    label: &str,
    mut input: Box<dyn AudioInput>,
    frame_samples: usize,
    tx: mpsc::Sender<Vec<i16>>,
    cancel: CancellationToken,
) {
    let mut frame = vec![0i16; frame_samples];
    while !cancel.is_cancelled() {
        match input.read_frame(&mut frame) {
            Ok(()) => match tx.try_send(frame.clone()) {
                Ok(()) => {}
                Err(TrySendError::Full(_)) => {
                    counter!("audio_capture_frames_dropped_total").increment(1);
                }
                Err(TrySendError::Closed(_)) => break,
            },
            Err(AudioError::Timeout) => {}
            Err(AudioError::Closed) => break,
            Err(e) => {
                debug!("[{}] Capture read failed: {}", label, e);
                std::thread::sleep(RETRY_DELAY);
            }
        }
    }
    debug!("[{}] Capture loop exited", label);
}

fn playback_loop(
    label: &str,
    mut output: Box<dyn AudioOutput>,
    frame_samples: usize,
    ring: Arc<RingBuffer>,
    cancel: CancellationToken,
) {
    let mut frame = vec![0i16; frame_samples];
    while !cancel.is_cancelled() {
        let Some(read) = ring.read_partial(&mut frame) else {
            break;
        };
        frame[read..].fill(0);
        match output.write_frame(&frame) {
            Ok(()) => {}
            Err(AudioError::Closed) => break,
            Err(e) => {
                debug!("[{}] Playback write failed: {}", label, e);
                std::thread::sleep(RETRY_DELAY);
            }
        }
    }
    debug!("[{}] Playback loop exited", label);
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingInput {
        next: i16,
    }

    impl AudioInput for CountingInput {
        fn read_frame(&mut self, frame: &mut [i16]) -> Result<(), AudioError> {
            std::thread::sleep(Duration::from_millis(2));
            for slot in frame.iter_mut() {
                *slot = self.next;
                self.next = self.next.wrapping_add(1);
            }
            Ok(())
        }
    }

    struct RecordingOutput {
        frames: Arc<Mutex<Vec<Vec<i16>>>>,
    }

    impl AudioOutput for RecordingOutput {
        fn write_frame(&mut self, frame: &[i16]) -> Result<(), AudioError> {
            std::thread::sleep(Duration::from_millis(2));
            self.frames.lock().push(frame.to_vec());
            Ok(())
        }
    }

    struct FailingInput(Arc<AtomicUsize>);

    impl AudioInput for FailingInput {
        fn read_frame(&mut self, _frame: &mut [i16]) -> Result<(), AudioError> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Err(AudioError::Backend("unplugged".into()))
        }
    }

    fn small_config() -> AudioConfig {
        AudioConfig {
            capture_chunk_ms: 1,
            playback_chunk_ms: 1,
            ..AudioConfig::default()
        }
    }

    #[test]
    fn test_validate_rejects_unsupported_formats() {
        let stereo = AudioConfig {
            channels: 2,
            ..AudioConfig::default()
        };
        assert!(matches!(
            AudioBridge::validate(&stereo),
            Err(AudioError::InvalidConfig(_))
        ));

        let eight_bit = AudioConfig {
            bits_per_sample: 8,
            ..AudioConfig::default()
        };
        assert!(AudioBridge::validate(&eight_bit).is_err());

        let no_rate = AudioConfig {
            sample_rate: 0,
            ..AudioConfig::default()
        };
        assert!(AudioBridge::validate(&no_rate).is_err());
        assert!(AudioBridge::validate(&AudioConfig::default()).is_ok());
    }

    #[tokio::test]
    async fn test_capture_frames_reach_queue() {
        let frames = Arc::new(Mutex::new(Vec::new()));
        let bridge = AudioBridge::with_devices(
            "test",
            &small_config(),
            Box::new(CountingInput { next: 0 }),
            Box::new(RecordingOutput {
                frames: frames.clone(),
            }),
        )
        .unwrap();

        let mut rx = bridge.take_capture_frames().unwrap();
        assert!(bridge.take_capture_frames().is_none());
        bridge.start().unwrap();

        let first = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(first.len(), 8);
        assert_eq!(first, (0..8).collect::<Vec<i16>>());

        tokio::task::spawn_blocking(move || bridge.close())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_network_audio_is_played_zero_padded() {
        let frames = Arc::new(Mutex::new(Vec::new()));
        let bridge = AudioBridge::with_devices(
            "test",
            &small_config(),
            Box::new(CountingInput { next: 0 }),
            Box::new(RecordingOutput {
                frames: frames.clone(),
            }),
        )
        .unwrap();
        bridge.start().unwrap();
        (bridge.sink())(&[7, 7, 7]);

        let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
        loop {
            let found = frames
                .lock()
                .iter()
                .any(|f| f.as_slice() == [7, 7, 7, 0, 0, 0, 0, 0]);
            if found {
                break;
            }
            assert!(tokio::time::Instant::now() < deadline, "frame never played");
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        tokio::task::spawn_blocking(move || {
            bridge.close();
            bridge.close();
            assert!(bridge.is_closed());
            assert!(matches!(bridge.start(), Err(AudioError::Closed)));
        })
        .await
        .unwrap();
    }

    #[test]
    fn test_capture_errors_are_retried() {
        let reads = Arc::new(AtomicUsize::new(0));
        let bridge = AudioBridge::with_devices(
            "test",
            &small_config(),
            Box::new(FailingInput(reads.clone())),
            Box::new(RecordingOutput {
                frames: Arc::new(Mutex::new(Vec::new())),
            }),
        )
        .unwrap();
        bridge.start().unwrap();
        std::thread::sleep(Duration::from_millis(100));
        bridge.close();

        assert!(reads.load(Ordering::SeqCst) >= 2);
    }
}
