//! Configuration management
//!
//! Resolved once at startup with precedence CLI > environment > file >
//! defaults, validated, and passed to the supervisor. Nothing is re-read
//! while sessions run.

pub mod file;

use std::path::{Path, PathBuf};
use std::time::Duration;

use secrecy::SecretString;

use crate::flow::{ClosingMessages, FlowPolicy, GreetingSource, RetryPolicy};
use crate::session::{Identity, SessionMode};
use crate::{Error, Result};

pub use file::{ConfigFile, config_file_path, load_config_file, parse_config_file};

/// Identity used when no camera is in play and none is configured
pub const DEFAULT_IDENTITY: &str = "guest";

/// Kindroid configuration
#[derive(Debug)]
pub struct Config {
    /// Live backend or local stub
    pub mode: SessionMode,

    /// Start a new session after each one ends
    pub restart: bool,

    pub hardware: HardwareConfig,
    pub identity: IdentityConfig,
    pub speech: SpeechConfig,
    pub backend: BackendConfig,
    pub output: OutputConfig,
    pub flow: FlowConfig,
}

/// What to do when an enabled device cannot be initialized
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MissingDevicePolicy {
    /// Disable the feature and carry on
    #[default]
    Degrade,
    /// Refuse to start
    Fail,
}

impl std::str::FromStr for MissingDevicePolicy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "degrade" => Ok(Self::Degrade),
            "fail" => Ok(Self::Fail),
            other => Err(Error::Config(format!(
                "hardware.on_missing_device must be \"degrade\" or \"fail\", got {other:?}"
            ))),
        }
    }
}

/// Hardware enablement
#[derive(Debug, Clone)]
pub struct HardwareConfig {
    pub enable_printer: bool,
    pub enable_camera: bool,
    pub on_missing_device: MissingDevicePolicy,
}

/// Identity resolver configuration
#[derive(Debug, Clone)]
pub struct IdentityConfig {
    /// Scanner device, `-` for stdin
    pub scanner: Option<PathBuf>,
    /// Identity used when the camera is disabled or missing
    pub fixed: Identity,
    pub poll_interval: Duration,
    /// Window in which a repeated code is ignored
    pub debounce: Duration,
    /// Supervisor deadline for `AwaitingIdentity`
    pub timeout: Option<Duration>,
}

/// Which speech driver to construct
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SpeechDriver {
    /// Lines on stdin/stdout
    #[default]
    Console,
    /// Microphone and speaker (requires the `audio` feature)
    Audio,
}

impl std::str::FromStr for SpeechDriver {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "console" => Ok(Self::Console),
            "audio" => Ok(Self::Audio),
            other => Err(Error::Config(format!(
                "speech.driver must be \"console\" or \"audio\", got {other:?}"
            ))),
        }
    }
}

/// Speech I/O configuration
#[derive(Debug)]
pub struct SpeechConfig {
    pub driver: SpeechDriver,
    /// Transcription language
    pub language: String,
    /// How long to wait for the visitor to start speaking
    pub silence_timeout: Duration,
    /// Longest utterance recorded in one capture
    pub max_utterance: Duration,
    pub stt_model: String,
    pub tts_model: String,
    pub tts_voice: String,
    pub tts_speed: f32,
    /// OpenAI-compatible API root for STT and TTS
    pub api_base_url: String,
    /// From `OPENAI_API_KEY` or the file
    pub api_key: Option<SecretString>,
}

/// Dialogue backend configuration
#[derive(Debug)]
pub struct BackendConfig {
    pub url: String,
    pub path: String,
    /// Bearer token, from `KINDROID_BACKEND_TOKEN` or the file
    pub token: Option<SecretString>,
    /// Per-request timeout
    pub timeout: Duration,
    pub retry: RetryPolicy,
    /// Canned reply used by the test-mode stub
    pub stub_reply: String,
}

/// Output device configuration
#[derive(Debug, Clone)]
pub struct OutputConfig {
    pub printer: Option<PathBuf>,
    pub printer_width: usize,
    pub feed_lines: u8,
    pub display: bool,
}

/// Conversation flow configuration
#[derive(Debug, Clone)]
pub struct FlowConfig {
    pub greeting: GreetingSource,
    pub closing: ClosingMessages,
    pub capture_attempts: u32,
    pub closing_timeout: Duration,
}

impl Config {
    /// Load the config file and environment
    ///
    /// `force_test` comes from the `--test` flag and wins over both.
    ///
    /// # Errors
    ///
    /// Returns error if the file cannot be read or the result is invalid
    pub fn load(path: Option<&Path>, force_test: bool) -> Result<Self> {
        let file = file::load_config_file(path)?;
        let mut config = Self::resolve(file, |key| std::env::var(key).ok())?;

        if force_test {
            config.mode = SessionMode::Test;
        }

        config.validate()?;
        Ok(config)
    }

    /// Overlay `file` and the environment (via `env`) on defaults
    ///
    /// # Errors
    ///
    /// Returns error on unparsable enumerated values
    pub fn resolve(file: ConfigFile, env: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let test_mode = env("KINDROID_TEST_MODE")
            .map(|v| parse_flag("KINDROID_TEST_MODE", &v))
            .transpose()?
            .or(file.test_mode)
            .unwrap_or(false);
        let mode = if test_mode {
            SessionMode::Test
        } else {
            SessionMode::Live
        };

        let hw = file.hardware;
        let hardware = HardwareConfig {
            enable_printer: hw.enable_printer.unwrap_or(true),
            enable_camera: hw.enable_camera.unwrap_or(false),
            on_missing_device: hw
                .on_missing_device
                .as_deref()
                .map(str::parse)
                .transpose()?
                .unwrap_or_default(),
        };

        let id = file.identity;
        let fixed = id
            .fixed
            .as_deref()
            .map_or_else(|| Identity::from_code(DEFAULT_IDENTITY), Identity::from_code)
            .ok_or_else(|| Error::Config("identity.fixed must not be blank".to_string()))?;
        let identity = IdentityConfig {
            scanner: id.scanner,
            fixed,
            poll_interval: Duration::from_millis(id.poll_interval_ms.unwrap_or(200)),
            debounce: Duration::from_millis(id.debounce_ms.unwrap_or(5000)),
            timeout: id
                .timeout_secs
                .filter(|&s| s > 0)
                .map(Duration::from_secs),
        };

        let sp = file.speech;
        let speech = SpeechConfig {
            driver: sp.driver.as_deref().map(str::parse).transpose()?.unwrap_or_default(),
            language: sp.language.unwrap_or_else(|| "de".to_string()),
            silence_timeout: Duration::from_secs(sp.silence_timeout_secs.unwrap_or(8)),
            max_utterance: Duration::from_secs(sp.max_utterance_secs.unwrap_or(30)),
            stt_model: sp.stt_model.unwrap_or_else(|| "whisper-1".to_string()),
            tts_model: sp.tts_model.unwrap_or_else(|| "tts-1".to_string()),
            tts_voice: sp.tts_voice.unwrap_or_else(|| "alloy".to_string()),
            tts_speed: sp.tts_speed.unwrap_or(1.0),
            api_base_url: sp
                .api_base_url
                .unwrap_or_else(|| "https://api.openai.com/v1".to_string()),
            api_key: env("OPENAI_API_KEY").or(sp.api_key).map(SecretString::from),
        };

        let be = file.backend;
        let defaults = RetryPolicy::default();
        let backend = BackendConfig {
            url: env("KINDROID_BACKEND_URL").or(be.url).unwrap_or_default(),
            path: be.path.unwrap_or_else(|| "/chat".to_string()),
            token: env("KINDROID_BACKEND_TOKEN").or(be.token).map(SecretString::from),
            timeout: Duration::from_secs(be.timeout_secs.unwrap_or(30)),
            retry: RetryPolicy {
                max_attempts: be.retry_attempts.unwrap_or(defaults.max_attempts),
                base_delay: be
                    .retry_base_delay_ms
                    .map_or(defaults.base_delay, Duration::from_millis),
                max_delay: be
                    .retry_max_delay_ms
                    .map_or(defaults.max_delay, Duration::from_millis),
            },
            stub_reply: be
                .stub_reply
                .unwrap_or_else(|| "Du hast gesagt: {user}".to_string()),
        };

        let out = file.output;
        let output = OutputConfig {
            printer: out.printer,
            printer_width: out.printer_width.unwrap_or(32),
            feed_lines: out.feed_lines.unwrap_or(4),
            display: out.display.unwrap_or(true),
        };

        let fl = file.flow;
        let greeting = match fl.greeting.as_deref().map(str::trim) {
            None | Some("none") => GreetingSource::None,
            Some("backend") => GreetingSource::Backend,
            Some("fixed") => GreetingSource::Fixed(fl.greeting_text.clone().ok_or_else(|| {
                Error::Config("flow.greeting = \"fixed\" needs flow.greeting_text".to_string())
            })?),
            Some(other) => {
                return Err(Error::Config(format!(
                    "flow.greeting must be \"none\", \"fixed\" or \"backend\", got {other:?}"
                )));
            }
        };
        let flow = FlowConfig {
            greeting,
            closing: ClosingMessages {
                farewell: fl.farewell,
                no_input: fl.no_input_message,
                backend_failure: fl.backend_failure_message,
            },
            capture_attempts: fl.capture_attempts.unwrap_or(3),
            closing_timeout: Duration::from_secs(fl.closing_timeout_secs.unwrap_or(10)),
        };

        Ok(Self {
            mode,
            restart: file.restart.unwrap_or(true),
            hardware,
            identity,
            speech,
            backend,
            output,
            flow,
        })
    }

    /// Reject configurations that cannot run
    ///
    /// # Errors
    ///
    /// Returns `Config` describing the first problem found
    pub fn validate(&self) -> Result<()> {
        let invalid = |msg: &str| Err(Error::Config(msg.to_string()));

        if self.flow.capture_attempts == 0 {
            return invalid("flow.capture_attempts must be at least 1");
        }
        if self.backend.retry.max_attempts == 0 {
            return invalid("backend.retry_attempts must be at least 1");
        }
        if self.backend.timeout.is_zero() {
            return invalid("backend.timeout_secs must be positive");
        }
        if self.speech.silence_timeout.is_zero() || self.speech.max_utterance.is_zero() {
            return invalid("speech timeouts must be positive");
        }
        if self.identity.poll_interval.is_zero() {
            return invalid("identity.poll_interval_ms must be positive");
        }
        if self.flow.closing_timeout.is_zero() {
            return invalid("flow.closing_timeout_secs must be positive");
        }
        if self.mode == SessionMode::Live && self.backend.url.trim().is_empty() {
            return invalid("backend.url (or KINDROID_BACKEND_URL) is required in live mode");
        }
        if self.hardware.enable_camera && self.identity.scanner.is_none() {
            return invalid("hardware.enable_camera needs identity.scanner");
        }
        if self.hardware.enable_printer
            && self.hardware.on_missing_device == MissingDevicePolicy::Fail
            && self.output.printer.is_none()
        {
            return invalid("hardware.enable_printer needs output.printer");
        }
        Ok(())
    }

    /// The per-session policy handed to the flow engine
    #[must_use]
    pub fn flow_policy(&self) -> FlowPolicy {
        FlowPolicy {
            greeting: self.flow.greeting.clone(),
            closing: self.flow.closing.clone(),
            capture_attempts: self.flow.capture_attempts,
            backend_retry: self.backend.retry.clone(),
            identity_poll_interval: self.identity.poll_interval,
            closing_timeout: self.flow.closing_timeout,
        }
    }
}

fn parse_flag(name: &str, value: &str) -> Result<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" | "" => Ok(false),
        other => Err(Error::Config(format!("{name}: expected a boolean, got {other:?}"))),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use secrecy::ExposeSecret;

    use super::*;

    fn env(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_resolve_to_live_mode_without_backend() {
        let config = Config::resolve(ConfigFile::default(), env(&[])).unwrap();

        assert_eq!(config.mode, SessionMode::Live);
        assert!(config.restart);
        assert_eq!(config.identity.fixed.as_str(), DEFAULT_IDENTITY);
        assert_eq!(config.speech.language, "de");
        assert_eq!(config.backend.retry.max_attempts, 3);
        assert!(config.validate().is_err(), "live mode needs a backend url");
    }

    #[test]
    fn test_mode_defaults_are_valid() {
        let config =
            Config::resolve(ConfigFile::default(), env(&[("KINDROID_TEST_MODE", "1")])).unwrap();
        assert_eq!(config.mode, SessionMode::Test);
        config.validate().unwrap();
    }

    #[test]
    fn env_overrides_file() {
        let file = parse_config_file(
            "test_mode = true\n[backend]\nurl = \"http://file\"\ntoken = \"from-file\"",
        )
        .unwrap();
        let config = Config::resolve(
            file,
            env(&[
                ("KINDROID_TEST_MODE", "false"),
                ("KINDROID_BACKEND_URL", "http://env"),
            ]),
        )
        .unwrap();

        assert_eq!(config.mode, SessionMode::Live);
        assert_eq!(config.backend.url, "http://env");
        assert_eq!(
            config.backend.token.as_ref().map(|t| t.expose_secret().to_string()),
            Some("from-file".to_string())
        );
    }

    #[test]
    fn zero_retries_are_rejected() {
        let file = parse_config_file("test_mode = true\n[backend]\nretry_attempts = 0").unwrap();
        let config = Config::resolve(file, env(&[])).unwrap();
        assert!(matches!(config.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn camera_without_scanner_is_rejected() {
        let file = parse_config_file("test_mode = true\n[hardware]\nenable_camera = true").unwrap();
        let config = Config::resolve(file, env(&[])).unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn fixed_greeting_needs_text() {
        let file = parse_config_file("[flow]\ngreeting = \"fixed\"").unwrap();
        assert!(Config::resolve(file, env(&[])).is_err());

        let file =
            parse_config_file("[flow]\ngreeting = \"fixed\"\ngreeting_text = \"Hallo\"").unwrap();
        let config = Config::resolve(file, env(&[])).unwrap();
        assert_eq!(config.flow.greeting, GreetingSource::Fixed("Hallo".to_string()));
    }

    #[test]
    fn bad_enumerations_are_config_errors() {
        let file = parse_config_file("[hardware]\non_missing_device = \"panic\"").unwrap();
        assert!(matches!(Config::resolve(file, env(&[])), Err(Error::Config(_))));

        let bad_flag = Config::resolve(ConfigFile::default(), env(&[("KINDROID_TEST_MODE", "maybe")]));
        assert!(bad_flag.is_err());
    }

    #[test]
    fn flow_policy_carries_bounds() {
        let file = parse_config_file(
            "test_mode = true\n[backend]\nretry_attempts = 5\n[flow]\ncapture_attempts = 2\nfarewell = \"Tschüss\"",
        )
        .unwrap();
        let policy = Config::resolve(file, env(&[])).unwrap().flow_policy();

        assert_eq!(policy.capture_attempts, 2);
        assert_eq!(policy.backend_retry.max_attempts, 5);
        assert_eq!(policy.closing.farewell.as_deref(), Some("Tschüss"));
    }
}
