//! End-of-utterance detection
//!
//! Energy-based voice activity detection over 16 kHz mono samples. The
//! detector waits for speech, accumulates it, and reports the utterance as
//! complete once enough speech has been followed by enough silence.

/// Sample rate for capture and detection (16kHz for speech)
pub const SAMPLE_RATE: u32 = 16000;

/// Thresholds for [`UtteranceDetector`]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VadSettings {
    /// Minimum RMS energy to count a chunk as speech
    pub energy_threshold: f32,
    /// Minimum speech before an utterance can complete (0.3s)
    pub min_speech_samples: usize,
    /// Trailing silence that ends an utterance (0.8s)
    pub silence_samples: usize,
}

impl Default for VadSettings {
    fn default() -> Self {
        Self {
            energy_threshold: 0.03,
            min_speech_samples: 4800,
            silence_samples: 12800,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DetectorState {
    /// Waiting for speech
    Idle,
    /// Speech started, accumulating
    Listening,
    /// Speech followed by silence
    Complete,
}

/// Detects where an utterance ends
pub struct UtteranceDetector {
    settings: VadSettings,
    state: DetectorState,
    speech_buffer: Vec<f32>,
    speech_samples: usize,
    silence_counter: usize,
}

impl UtteranceDetector {
    #[must_use]
    pub const fn new(settings: VadSettings) -> Self {
        Self {
            settings,
            state: DetectorState::Idle,
            speech_buffer: Vec::new(),
            speech_samples: 0,
            silence_counter: 0,
        }
    }

    /// Feed a chunk of samples
    ///
    /// Returns true once the utterance is complete. Further chunks are
    /// ignored until [`reset`](Self::reset) or [`take_utterance`](Self::take_utterance).
    pub fn process(&mut self, samples: &[f32]) -> bool {
        let energy = calculate_energy(samples);
        let is_speech = energy > self.settings.energy_threshold;

        match self.state {
            DetectorState::Idle => {
                if is_speech {
                    self.state = DetectorState::Listening;
                    self.speech_buffer.clear();
                    self.speech_buffer.extend_from_slice(samples);
                    self.speech_samples = samples.len();
                    self.silence_counter = 0;
                    tracing::trace!(energy, "speech detected, listening");
                }
            }
            DetectorState::Listening => {
                self.speech_buffer.extend_from_slice(samples);

                if is_speech {
                    self.speech_samples += samples.len();
                    self.silence_counter = 0;
                } else {
                    self.silence_counter += samples.len();
                }

                if self.silence_counter > self.settings.silence_samples {
                    if self.speech_samples > self.settings.min_speech_samples {
                        tracing::debug!(samples = self.speech_buffer.len(), "utterance complete");
                        self.state = DetectorState::Complete;
                    } else {
                        // a click or cough, not speech
                        tracing::trace!("speech too short, resetting");
                        self.reset();
                    }
                }
            }
            DetectorState::Complete => {}
        }

        self.state == DetectorState::Complete
    }

    /// Whether speech has started
    #[must_use]
    pub fn is_listening(&self) -> bool {
        self.state == DetectorState::Listening
    }

    /// Take the completed utterance, resetting the detector
    pub fn take_utterance(&mut self) -> Vec<f32> {
        self.state = DetectorState::Idle;
        self.speech_samples = 0;
        self.silence_counter = 0;
        std::mem::take(&mut self.speech_buffer)
    }

    pub fn reset(&mut self) {
        self.state = DetectorState::Idle;
        self.speech_buffer.clear();
        self.speech_samples = 0;
        self.silence_counter = 0;
    }
}

/// Calculate RMS energy of audio samples
#[allow(clippy::cast_precision_loss)]
fn calculate_energy(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }

    let sum_squares: f32 = samples.iter().map(|s| s * s).sum();
    (sum_squares / samples.len() as f32).sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;

    const CHUNK: usize = 1600;

    fn settings() -> VadSettings {
        VadSettings {
            energy_threshold: 0.03,
            min_speech_samples: 3200,
            silence_samples: 3200,
        }
    }

    #[test]
    fn test_energy_calculation() {
        let silence = vec![0.0f32; 100];
        assert!(calculate_energy(&silence) < 0.001);

        let loud = vec![0.5f32; 100];
        assert!(calculate_energy(&loud) > 0.4);
    }

    #[test]
    fn silence_alone_never_completes() {
        let mut detector = UtteranceDetector::new(settings());
        for _ in 0..20 {
            assert!(!detector.process(&[0.0; CHUNK]));
        }
        assert!(!detector.is_listening());
    }

    #[test]
    fn speech_then_silence_completes() {
        let mut detector = UtteranceDetector::new(settings());

        for _ in 0..3 {
            assert!(!detector.process(&[0.5; CHUNK]));
        }
        assert!(detector.is_listening());

        assert!(!detector.process(&[0.0; CHUNK]));
        assert!(!detector.process(&[0.0; CHUNK]));
        assert!(detector.process(&[0.0; CHUNK]));

        let utterance = detector.take_utterance();
        assert_eq!(utterance.len(), 6 * CHUNK);
        assert!(!detector.is_listening());
    }

    #[test]
    fn short_blip_is_discarded() {
        let mut detector = UtteranceDetector::new(settings());

        detector.process(&[0.5; 100]);
        for _ in 0..3 {
            assert!(!detector.process(&[0.0; CHUNK]));
        }
        assert!(!detector.is_listening());
    }
}
