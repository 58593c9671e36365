//! Audio capture from microphone

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, SampleRate, Stream, StreamConfig};

use super::vad::{SAMPLE_RATE, UtteranceDetector, VadSettings};
use crate::{AdapterError, Error, Result};

/// How often the capture loop drains the input buffer
const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Captures audio from the default input device
///
/// The cpal stream is not `Send`; an `AudioCapture` lives on the blocking
/// thread that records with it.
pub struct AudioCapture {
    device: Device,
    config: StreamConfig,
    buffer: Arc<Mutex<Vec<f32>>>,
    stream: Option<Stream>,
}

impl AudioCapture {
    /// Open the default input device at 16 kHz mono
    ///
    /// # Errors
    ///
    /// Returns error if audio device cannot be opened
    pub fn new() -> Result<Self> {
        let host = cpal::default_host();

        let device = host
            .default_input_device()
            .ok_or_else(|| Error::Audio("no input device available".to_string()))?;

        let supported_config = device
            .supported_input_configs()
            .map_err(|e| Error::Audio(e.to_string()))?
            .find(|c| {
                c.channels() == 1
                    && c.min_sample_rate() <= SampleRate(SAMPLE_RATE)
                    && c.max_sample_rate() >= SampleRate(SAMPLE_RATE)
            })
            .ok_or_else(|| Error::Audio("no suitable audio config found".to_string()))?;

        let config = supported_config
            .with_sample_rate(SampleRate(SAMPLE_RATE))
            .config();

        tracing::debug!(
            device = device.name().unwrap_or_default(),
            sample_rate = SAMPLE_RATE,
            "audio capture initialized"
        );

        Ok(Self {
            device,
            config,
            buffer: Arc::new(Mutex::new(Vec::new())),
            stream: None,
        })
    }

    /// Start capturing audio
    ///
    /// # Errors
    ///
    /// Returns error if capture fails
    pub fn start(&mut self) -> Result<()> {
        if self.stream.is_some() {
            return Ok(());
        }

        let buffer = Arc::clone(&self.buffer);
        let stream = self
            .device
            .build_input_stream(
                &self.config,
                move |data: &[f32], _: &cpal::InputCallbackInfo| {
                    if let Ok(mut buf) = buffer.lock() {
                        buf.extend_from_slice(data);
                    }
                },
                |err| {
                    tracing::error!(error = %err, "audio capture error");
                },
                None,
            )
            .map_err(|e| Error::Audio(e.to_string()))?;

        stream.play().map_err(|e| Error::Audio(e.to_string()))?;
        self.stream = Some(stream);

        tracing::debug!("audio capture started");
        Ok(())
    }

    /// Stop capturing audio
    pub fn stop(&mut self) {
        if self.stream.take().is_some() {
            tracing::debug!("audio capture stopped");
        }
    }

    /// Take the samples captured since the last call
    #[must_use]
    pub fn take_buffer(&self) -> Vec<f32> {
        self.buffer
            .lock()
            .map(|mut buf| std::mem::take(&mut *buf))
            .unwrap_or_default()
    }

    /// Record until the detector reports a complete utterance
    ///
    /// Blocks the calling thread. Gives up with `Timeout` if no speech starts
    /// within `silence_timeout`, cuts the utterance at `max_utterance`, and
    /// returns `Cancelled` as soon as `stop` is set.
    ///
    /// # Errors
    ///
    /// Returns `Device` if the stream cannot be started
    pub fn record_utterance(
        &mut self,
        vad: VadSettings,
        silence_timeout: Duration,
        max_utterance: Duration,
        stop: &AtomicBool,
    ) -> std::result::Result<Vec<f32>, AdapterError> {
        let mut detector = UtteranceDetector::new(vad);
        self.start()
            .map_err(|e| AdapterError::Device(e.to_string()))?;
        let _ = self.take_buffer();

        let started = Instant::now();
        let result = loop {
            if stop.load(Ordering::Relaxed) {
                break Err(AdapterError::Cancelled);
            }

            std::thread::sleep(POLL_INTERVAL);

            if detector.process(&self.take_buffer()) {
                break Ok(detector.take_utterance());
            }

            let elapsed = started.elapsed();
            if !detector.is_listening() && elapsed > silence_timeout {
                break Err(AdapterError::Timeout);
            }
            if elapsed > max_utterance {
                tracing::debug!("utterance cut at maximum length");
                break Ok(detector.take_utterance());
            }
        };

        self.stop();
        result
    }
}
