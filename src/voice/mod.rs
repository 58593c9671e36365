//! Speech I/O
//!
//! Capture-to-text and text-to-speech as two independent, cancellable
//! operations behind [`SpeechIo`]. The console driver is always available;
//! the microphone/speaker driver needs the `audio` feature.

#[cfg(feature = "audio")]
mod audio;
#[cfg(feature = "audio")]
mod capture;
mod console;
#[cfg(feature = "audio")]
mod playback;
mod stt;
mod tts;
mod vad;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

#[cfg(feature = "audio")]
pub use audio::AudioSpeech;
#[cfg(feature = "audio")]
pub use capture::AudioCapture;
pub use console::ConsoleSpeech;
#[cfg(feature = "audio")]
pub use playback::AudioPlayback;
pub use stt::{SpeechToText, samples_to_wav};
pub use tts::{TextToSpeech, strip_markup};
pub use vad::{SAMPLE_RATE, UtteranceDetector, VadSettings};

use crate::AdapterError;

/// Speech capture and synthesis for one conversation
#[async_trait]
pub trait SpeechIo: Send {
    /// Short name used in logs
    fn name(&self) -> &'static str;

    /// Listen for one utterance and return its transcript
    ///
    /// # Errors
    ///
    /// Returns `Timeout` when nobody spoke within the silence timeout,
    /// `Device` on capture or recognition failure and `Cancelled` when
    /// `cancel` fires.
    async fn capture_utterance(&mut self, cancel: &CancellationToken)
    -> Result<String, AdapterError>;

    /// Say `text` out loud, returning once playback has finished
    ///
    /// # Errors
    ///
    /// Returns `Device` on synthesis or playback failure and `Cancelled` when
    /// `cancel` fires.
    async fn speak(&mut self, text: &str, cancel: &CancellationToken) -> Result<(), AdapterError>;
}
