//! TOML configuration file loading
//!
//! Supports `~/.config/kindroid/config.toml` as the persistent config source.
//! All fields are optional; the file is a partial overlay on top of defaults.

use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::{Error, Result};

/// Top-level TOML configuration file schema
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConfigFile {
    /// Use the local stub instead of the dialogue backend
    pub test_mode: Option<bool>,

    /// Start a new session after each one ends
    pub restart: Option<bool>,

    #[serde(default)]
    pub hardware: HardwareFileConfig,

    #[serde(default)]
    pub identity: IdentityFileConfig,

    #[serde(default)]
    pub speech: SpeechFileConfig,

    #[serde(default)]
    pub backend: BackendFileConfig,

    #[serde(default)]
    pub output: OutputFileConfig,

    #[serde(default)]
    pub flow: FlowFileConfig,
}

/// Which devices to bring up and what to do when they are missing
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct HardwareFileConfig {
    pub enable_printer: Option<bool>,
    pub enable_camera: Option<bool>,
    /// "degrade" or "fail"
    pub on_missing_device: Option<String>,
}

/// Identity resolver configuration
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct IdentityFileConfig {
    /// Device emitting one scanned code per line ("-" for stdin)
    pub scanner: Option<PathBuf>,
    /// Identity used when no camera is in play
    pub fixed: Option<String>,
    pub poll_interval_ms: Option<u64>,
    pub debounce_ms: Option<u64>,
    /// Give up waiting for a code after this long (0 waits forever)
    pub timeout_secs: Option<u64>,
}

/// Speech I/O configuration
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SpeechFileConfig {
    /// "console" or "audio"
    pub driver: Option<String>,
    /// Transcription language (e.g. "de")
    pub language: Option<String>,
    pub silence_timeout_secs: Option<u64>,
    pub max_utterance_secs: Option<u64>,
    /// STT model (e.g. "whisper-1")
    pub stt_model: Option<String>,
    /// TTS model (e.g. "tts-1")
    pub tts_model: Option<String>,
    /// TTS voice identifier (e.g. "alloy")
    pub tts_voice: Option<String>,
    /// TTS speed multiplier
    pub tts_speed: Option<f32>,
    /// OpenAI-compatible API root
    pub api_base_url: Option<String>,
    pub api_key: Option<String>,
}

/// Dialogue backend configuration
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BackendFileConfig {
    pub url: Option<String>,
    pub path: Option<String>,
    pub token: Option<String>,
    pub timeout_secs: Option<u64>,
    /// Total attempts per backend call
    pub retry_attempts: Option<u32>,
    pub retry_base_delay_ms: Option<u64>,
    pub retry_max_delay_ms: Option<u64>,
    /// Canned reply used in test mode
    pub stub_reply: Option<String>,
}

/// Output device configuration
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct OutputFileConfig {
    /// Printer serial device
    pub printer: Option<PathBuf>,
    /// Characters per printed line
    pub printer_width: Option<usize>,
    /// Lines fed after each job
    pub feed_lines: Option<u8>,
    /// Show expressions on the display
    pub display: Option<bool>,
}

/// Conversation flow configuration
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FlowFileConfig {
    /// "none", "fixed" or "backend"
    pub greeting: Option<String>,
    pub greeting_text: Option<String>,
    pub capture_attempts: Option<u32>,
    pub closing_timeout_secs: Option<u64>,
    pub farewell: Option<String>,
    pub no_input_message: Option<String>,
    pub backend_failure_message: Option<String>,
}

/// Load the TOML config file
///
/// An explicit `path` must exist. Without one the default location is used,
/// and a missing default file yields `ConfigFile::default()`.
///
/// # Errors
///
/// Returns error if the file cannot be read or parsed
pub fn load_config_file(path: Option<&Path>) -> Result<ConfigFile> {
    let (path, required) = match path {
        Some(path) => (path.to_path_buf(), true),
        None => match config_file_path() {
            Some(path) => (path, false),
            None => return Ok(ConfigFile::default()),
        },
    };

    if !path.exists() {
        if required {
            return Err(Error::Config(format!(
                "config file not found: {}",
                path.display()
            )));
        }
        tracing::debug!(path = %path.display(), "no config file, using defaults");
        return Ok(ConfigFile::default());
    }

    let content = std::fs::read_to_string(&path)?;
    let config = parse_config_file(&content)
        .map_err(|e| Error::Config(format!("{}: {e}", path.display())))?;

    tracing::info!(path = %path.display(), "loaded config file");
    Ok(config)
}

/// Parse config file contents
///
/// # Errors
///
/// Returns error on malformed TOML or unknown keys
pub fn parse_config_file(content: &str) -> Result<ConfigFile> {
    Ok(toml::from_str(content)?)
}

/// Return the config file path: `~/.config/kindroid/config.toml`
#[must_use]
pub fn config_file_path() -> Option<PathBuf> {
    directories::BaseDirs::new().map(|d| d.config_dir().join("kindroid").join("config.toml"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_is_all_defaults() {
        let file = parse_config_file("").unwrap();
        assert!(file.test_mode.is_none());
        assert!(file.backend.url.is_none());
    }

    #[test]
    fn parses_sections() {
        let file = parse_config_file(
            r#"
            test_mode = true

            [hardware]
            enable_printer = false
            on_missing_device = "fail"

            [identity]
            scanner = "/dev/ttyACM0"
            debounce_ms = 3000

            [flow]
            greeting = "fixed"
            greeting_text = "Hallo!"
            "#,
        )
        .unwrap();

        assert_eq!(file.test_mode, Some(true));
        assert_eq!(file.hardware.enable_printer, Some(false));
        assert_eq!(file.hardware.on_missing_device.as_deref(), Some("fail"));
        assert_eq!(file.identity.scanner, Some(PathBuf::from("/dev/ttyACM0")));
        assert_eq!(file.flow.greeting_text.as_deref(), Some("Hallo!"));
    }

    #[test]
    fn unknown_keys_are_rejected() {
        assert!(parse_config_file("[backend]\nurll = \"x\"").is_err());
    }

    #[test]
    fn explicit_missing_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope.toml");
        assert!(matches!(load_config_file(Some(&missing)), Err(Error::Config(_))));
    }

    #[test]
    fn explicit_file_is_loaded() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "restart = false\n[output]\nfeed_lines = 6\n").unwrap();

        let file = load_config_file(Some(&path)).unwrap();
        assert_eq!(file.restart, Some(false));
        assert_eq!(file.output.feed_lines, Some(6));
    }
}
