//! `cpal` audio backend
//!
//! `cpal::Stream` is not `Send`, so each stream lives on its own thread and
//! exchanges samples with the bridge through a condvar-guarded queue.

use super::device::{AudioDeviceInfo, AudioHost, AudioInput, AudioOutput, StreamParams};
use super::error::AudioError;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

const DEVICE_WAIT: Duration = Duration::from_millis(200);
const STREAM_PARK: Duration = Duration::from_millis(100);

pub struct CpalHost {
    host: cpal::Host,
}

impl Default for CpalHost {
    fn default() -> Self {
        Self {
            host: cpal::default_host(),
        }
    }
}

fn max_channels<I>(configs: Result<I, cpal::SupportedStreamConfigsError>) -> u16
where
    I: Iterator<Item = cpal::SupportedStreamConfigRange>,
{
    configs
        .map(|configs| configs.map(|c| c.channels()).max().unwrap_or(0))
        .unwrap_or(0)
}

impl CpalHost {
    fn find_device(&self, name: &str) -> Result<cpal::Device, AudioError> {
        find_device(&self.host, name)
    }
}

fn find_device(host: &cpal::Host, name: &str) -> Result<cpal::Device, AudioError> {
    host.devices()
        .map_err(|e| AudioError::Backend(e.to_string()))?
        .find(|d| d.name().map(|n| n == name).unwrap_or(false))
        .ok_or_else(|| AudioError::Backend(format!("device {} disappeared", name)))
}

fn stream_config(params: StreamParams) -> cpal::StreamConfig {
    cpal::StreamConfig {
        channels: 1,
        sample_rate: cpal::SampleRate(params.sample_rate),
        buffer_size: cpal::BufferSize::Default,
    }
}

/// Samples shared between a device callback and the bridge thread
struct SampleQueue {
    samples: Mutex<VecDeque<i16>>,
    changed: Condvar,
    limit: usize,
}

impl SampleQueue {
    fn new(limit: usize) -> Arc<Self> {
        Arc::new(Self {
            samples: Mutex::new(VecDeque::with_capacity(limit)),
            changed: Condvar::new(),
            limit,
        })
    }
}

/// Keeps a stream alive on its own thread until dropped
struct StreamThread {
    stop: CancellationToken,
    thread: Option<JoinHandle<()>>,
}

impl StreamThread {
    fn spawn<F>(label: String, build: F) -> Result<Self, AudioError>
    where
        F: FnOnce() -> Result<cpal::Stream, AudioError> + Send + 'static,
    {
        let stop = CancellationToken::new();
        let (ready_tx, ready_rx) = tokio::sync::oneshot::channel();
        let thread_stop = stop.clone();

        let thread = std::thread::Builder::new()
            .name(format!("audio-{}", label))
            .spawn(move || {
                let stream = match build().and_then(|s| {
                    s.play().map_err(|e| AudioError::Backend(e.to_string()))?;
                    Ok(s)
                }) {
                    Ok(stream) => {
                        let _ = ready_tx.send(Ok(()));
                        stream
                    }
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };
                while !thread_stop.is_cancelled() {
                    std::thread::park_timeout(STREAM_PARK);
                }
                drop(stream);
                debug!("Audio stream {} released", label);
            })
            .map_err(|e| AudioError::Backend(e.to_string()))?;

        let mut handle = Self {
            stop,
            thread: Some(thread),
        };
        match ready_rx.blocking_recv() {
            Ok(Ok(())) => Ok(handle),
            Ok(Err(e)) => {
                handle.join();
                Err(e)
            }
            Err(_) => {
                handle.join();
                Err(AudioError::Backend("audio stream thread exited".into()))
            }
        }
    }

    fn join(&mut self) {
        self.stop.cancel();
        if let Some(thread) = self.thread.take() {
            thread.thread().unpark();
            let _ = thread.join();
        }
    }
}

impl Drop for StreamThread {
    fn drop(&mut self) {
        self.join();
    }
}

struct CpalInput {
    queue: Arc<SampleQueue>,
    _stream: StreamThread,
}

impl AudioInput for CpalInput {
    fn read_frame(&mut self, frame: &mut [i16]) -> Result<(), AudioError> {
        let mut samples = self.queue.samples.lock();
        while samples.len() < frame.len() {
            if self
                .queue
                .changed
                .wait_for(&mut samples, DEVICE_WAIT)
                .timed_out()
                && samples.len() < frame.len()
            {
                return Err(AudioError::Timeout);
            }
        }
        for (slot, sample) in frame.iter_mut().zip(samples.drain(..frame.len())) {
            *slot = sample;
        }
        Ok(())
    }
}

struct CpalOutput {
    queue: Arc<SampleQueue>,
    _stream: StreamThread,
}

impl AudioOutput for CpalOutput {
    fn write_frame(&mut self, frame: &[i16]) -> Result<(), AudioError> {
        let mut samples = self.queue.samples.lock();
        while samples.len() + frame.len() > self.queue.limit {
            if self
                .queue
                .changed
                .wait_for(&mut samples, DEVICE_WAIT)
                .timed_out()
            {
                return Err(AudioError::Timeout);
            }
        }
        samples.extend(frame.iter().copied());
        Ok(())
    }
}

impl AudioHost for CpalHost {
    fn devices(&self) -> Result<Vec<AudioDeviceInfo>, AudioError> {
        let devices = self
            .host
            .devices()
            .map_err(|e| AudioError::Backend(e.to_string()))?;
        Ok(devices
            .filter_map(|device| {
                let name = device.name().ok()?;
                Some(AudioDeviceInfo {
                    name,
                    max_input_channels: max_channels(device.supported_input_configs()),
                    max_output_channels: max_channels(device.supported_output_configs()),
                })
            })
            .collect())
    }

    fn open_input(
        &self,
        device: &AudioDeviceInfo,
        params: StreamParams,
    ) -> Result<Box<dyn AudioInput>, AudioError> {
        // Validate up front so the error surfaces before a thread is spawned
        self.find_device(&device.name)?;

        let queue = SampleQueue::new(params.sample_rate as usize);
        let callback_queue = Arc::clone(&queue);
        let name = device.name.clone();
        let stream = StreamThread::spawn("capture".into(), move || {
            let host = cpal::default_host();
            let device = find_device(&host, &name)?;
            device
                .build_input_stream(
                    &stream_config(params),
                    move |data: &[i16], _: &cpal::InputCallbackInfo| {
                        let mut samples = callback_queue.samples.lock();
                        samples.extend(data.iter().copied());
                        let excess = samples.len().saturating_sub(callback_queue.limit);
                        samples.drain(..excess);
                        callback_queue.changed.notify_all();
                    },
                    move |err| warn!("Capture stream error: {}", err),
                    None,
                )
                .map_err(|e| AudioError::Backend(e.to_string()))
        })?;

        Ok(Box::new(CpalInput {
            queue,
            _stream: stream,
        }))
    }

    fn open_output(
        &self,
        device: &AudioDeviceInfo,
        params: StreamParams,
    ) -> Result<Box<dyn AudioOutput>, AudioError> {
        self.find_device(&device.name)?;

        let queue = SampleQueue::new(params.frame_samples.max(1) * 2);
        let callback_queue = Arc::clone(&queue);
        let name = device.name.clone();
        let stream = StreamThread::spawn("playback".into(), move || {
            let host = cpal::default_host();
            let device = find_device(&host, &name)?;
            device
                .build_output_stream(
                    &stream_config(params),
                    move |data: &mut [i16], _: &cpal::OutputCallbackInfo| {
                        let mut samples = callback_queue.samples.lock();
                        for slot in data.iter_mut() {
                            *slot = samples.pop_front().unwrap_or(0);
                        }
                        callback_queue.changed.notify_all();
                    },
                    move |err| warn!("Playback stream error: {}", err),
                    None,
                )
                .map_err(|e| AudioError::Backend(e.to_string()))
        })?;

        Ok(Box::new(CpalOutput {
            queue,
            _stream: stream,
        }))
    }
}
