//! Microphone and speaker speech driver

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use super::capture::AudioCapture;
use super::playback::AudioPlayback;
use super::stt::{SpeechToText, samples_to_wav};
use super::tts::TextToSpeech;
use super::vad::{SAMPLE_RATE, VadSettings};
use super::SpeechIo;
use crate::AdapterError;

/// Live speech driver: cpal capture, remote STT/TTS, cpal playback
///
/// Device work runs on blocking threads; each call owns a stop flag that is
/// raised when the cancellation token fires so the thread unwinds promptly.
pub struct AudioSpeech {
    stt: SpeechToText,
    tts: TextToSpeech,
    vad: VadSettings,
    silence_timeout: Duration,
    max_utterance: Duration,
}

impl AudioSpeech {
    /// Open the audio devices and build the driver
    ///
    /// # Errors
    ///
    /// Returns `Audio` if no usable input or output device is present
    pub fn new(
        stt: SpeechToText,
        tts: TextToSpeech,
        vad: VadSettings,
        silence_timeout: Duration,
        max_utterance: Duration,
    ) -> crate::Result<Self> {
        AudioCapture::new()?;
        AudioPlayback::new()?;

        Ok(Self {
            stt,
            tts,
            vad,
            silence_timeout,
            max_utterance,
        })
    }
}

/// Run `work` on a blocking thread, raising its stop flag on cancellation
async fn run_blocking<T, F>(cancel: &CancellationToken, work: F) -> Result<T, AdapterError>
where
    T: Send + 'static,
    F: FnOnce(&AtomicBool) -> Result<T, AdapterError> + Send + 'static,
{
    let stop = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&stop);
    let handle = tokio::task::spawn_blocking(move || work(&flag));

    tokio::select! {
        biased;
        () = cancel.cancelled() => {
            stop.store(true, Ordering::Relaxed);
            Err(AdapterError::Cancelled)
        }
        joined = handle => joined.map_err(|e| AdapterError::Device(format!("audio thread failed: {e}")))?,
    }
}

#[async_trait]
impl SpeechIo for AudioSpeech {
    fn name(&self) -> &'static str {
        "audio"
    }

    async fn capture_utterance(
        &mut self,
        cancel: &CancellationToken,
    ) -> Result<String, AdapterError> {
        let (vad, silence, max) = (self.vad, self.silence_timeout, self.max_utterance);
        let samples = run_blocking(cancel, move |stop| {
            let mut capture = AudioCapture::new().map_err(|e| AdapterError::Device(e.to_string()))?;
            capture.record_utterance(vad, silence, max, stop)
        })
        .await?;

        let wav = samples_to_wav(&samples, SAMPLE_RATE).map_err(AdapterError::from)?;
        let transcript = tokio::select! {
            biased;
            () = cancel.cancelled() => return Err(AdapterError::Cancelled),
            result = self.stt.transcribe(&wav) => result.map_err(AdapterError::from)?,
        };

        if transcript.is_empty() {
            return Err(AdapterError::Timeout);
        }
        Ok(transcript)
    }

    async fn speak(&mut self, text: &str, cancel: &CancellationToken) -> Result<(), AdapterError> {
        let audio = tokio::select! {
            biased;
            () = cancel.cancelled() => return Err(AdapterError::Cancelled),
            result = self.tts.synthesize(text) => result.map_err(AdapterError::from)?,
        };

        run_blocking(cancel, move |stop| {
            let playback =
                AudioPlayback::new().map_err(|e| AdapterError::Device(e.to_string()))?;
            playback.play_mp3(&audio, stop)
        })
        .await
    }
}
