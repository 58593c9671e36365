//! Adapter construction
//!
//! Turns the configuration into concrete adapters once, at startup. Enabled
//! devices that fail to initialize either degrade (the feature is disabled
//! and its directives report `DeviceAbsent`) or abort startup, as chosen by
//! `hardware.on_missing_device`. Either way the decision is made here and
//! never in the middle of a conversation.

use std::fmt;
use std::path::Path;
use std::sync::Arc;

use secrecy::{ExposeSecret, SecretString};

use crate::backend::{DialogueBackend, HttpBackend, StubBackend};
use crate::config::{Config, MissingDevicePolicy, SpeechDriver};
use crate::flow::Adapters;
use crate::identity::{Debounced, FixedResolver, IdentityResolver, LineScanner};
use crate::output::{EscPosPrinter, Face, LoggedFace, OutputDevice, OutputRouter};
use crate::session::SessionMode;
use crate::voice::{ConsoleSpeech, SpeechIo};
use crate::{Error, Result};

/// How one adapter slot ended up being filled
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Slot {
    /// Constructed as configured
    Active(String),
    /// Turned off by configuration
    Disabled,
    /// Enabled but unavailable; running without it
    Degraded(String),
}

impl fmt::Display for Slot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Active(what) => f.write_str(what),
            Self::Disabled => f.write_str("disabled"),
            Self::Degraded(why) => write!(f, "degraded ({why})"),
        }
    }
}

/// The adapters a configuration resolves to
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdapterPlan {
    pub identity: Slot,
    pub speech: Slot,
    pub backend: Slot,
    pub printer: Slot,
    pub display: Slot,
}

impl AdapterPlan {
    /// What `config` asks for, without touching any device
    #[must_use]
    pub fn intended(config: &Config) -> Self {
        let identity = match (&config.identity.scanner, config.hardware.enable_camera) {
            (Some(path), true) => Slot::Active(format!("scanner {}", path.display())),
            _ => Slot::Active(format!("fixed {}", config.identity.fixed)),
        };

        let printer = match (&config.output.printer, config.hardware.enable_printer) {
            (_, false) => Slot::Disabled,
            (Some(path), true) => Slot::Active(format!("escpos {}", path.display())),
            (None, true) => Slot::Degraded("no printer path".to_string()),
        };

        Self {
            identity,
            speech: Slot::Active(speech_name(config.speech.driver).to_string()),
            backend: backend_slot(config),
            printer,
            display: if config.output.display {
                Slot::Active("log".to_string())
            } else {
                Slot::Disabled
            },
        }
    }
}

impl fmt::Display for AdapterPlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "identity: {}", self.identity)?;
        writeln!(f, "speech:   {}", self.speech)?;
        writeln!(f, "backend:  {}", self.backend)?;
        writeln!(f, "printer:  {}", self.printer)?;
        write!(f, "display:  {}", self.display)
    }
}

/// Construct every adapter for `config`
///
/// # Errors
///
/// Returns `Config` for settings that cannot be honoured at all, and
/// `Device` when an enabled device is missing under the `fail` policy
pub async fn build_adapters(config: &Config) -> Result<(Adapters, AdapterPlan)> {
    let policy = config.hardware.on_missing_device;

    let (resolver, identity) = build_resolver(config, policy).await?;
    let (speech, speech_slot) = build_speech(config)?;
    let backend = build_backend(config)?;
    let (printer, printer_slot) = build_printer(config, policy).await?;

    let (face, display): (Option<Box<dyn Face>>, Slot) = if config.output.display {
        (Some(Box::new(LoggedFace::default())), Slot::Active("log".to_string()))
    } else {
        (None, Slot::Disabled)
    };

    let plan = AdapterPlan {
        identity,
        speech: speech_slot,
        backend: backend_slot(config),
        printer: printer_slot,
        display,
    };

    let adapters = Adapters {
        resolver,
        speech,
        backend,
        output: OutputRouter::new(printer, face),
    };
    Ok((adapters, plan))
}

/// Apply the missing-device policy to a failed device
fn degrade_or_fail(policy: MissingDevicePolicy, device: &str, error: &Error) -> Result<Slot> {
    match policy {
        MissingDevicePolicy::Fail => Err(Error::Device(format!("{device}: {error}"))),
        MissingDevicePolicy::Degrade => {
            tracing::warn!(device, error = %error, "device unavailable, running without it");
            Ok(Slot::Degraded(error.to_string()))
        }
    }
}

async fn build_resolver(
    config: &Config,
    policy: MissingDevicePolicy,
) -> Result<(Box<dyn IdentityResolver>, Slot)> {
    let fixed = || -> Box<dyn IdentityResolver> {
        Box::new(FixedResolver::new(config.identity.fixed.clone()))
    };

    if !config.hardware.enable_camera {
        return Ok((fixed(), Slot::Active(format!("fixed {}", config.identity.fixed))));
    }

    let Some(path) = &config.identity.scanner else {
        let error = Error::Config("no scanner path".to_string());
        return Ok((fixed(), degrade_or_fail(policy, "camera", &error)?));
    };

    match LineScanner::open(path).await {
        Ok(scanner) => Ok((
            Box::new(Debounced::new(scanner, config.identity.debounce)),
            Slot::Active(format!("scanner {}", path.display())),
        )),
        Err(e) => Ok((fixed(), degrade_or_fail(policy, "camera", &e)?)),
    }
}

/// Construct the configured speech driver alone
///
/// # Errors
///
/// Returns `Config` for unusable speech settings, and `Device` when the
/// audio devices are missing under the `fail` policy
pub fn build_speech(config: &Config) -> Result<(Box<dyn SpeechIo>, Slot)> {
    let policy = config.hardware.on_missing_device;
    let console = || -> Box<dyn SpeechIo> {
        Box::new(ConsoleSpeech::stdio(config.speech.silence_timeout))
    };

    if config.speech.driver == SpeechDriver::Console {
        if config.hardware.enable_camera
            && config.identity.scanner.as_deref() == Some(Path::new("-"))
        {
            return Err(Error::Config(
                "console speech and a stdin scanner cannot share stdin".to_string(),
            ));
        }
        return Ok((console(), Slot::Active("console".to_string())));
    }

    match build_audio_speech(config) {
        Ok(speech) => Ok((speech, Slot::Active("audio".to_string()))),
        Err(e @ Error::Config(_)) => Err(e),
        Err(e) => Ok((console(), degrade_or_fail(policy, "audio", &e)?)),
    }
}

#[cfg(feature = "audio")]
fn build_audio_speech(config: &Config) -> Result<Box<dyn SpeechIo>> {
    use crate::voice::{AudioSpeech, SpeechToText, TextToSpeech, VadSettings};

    let speech = &config.speech;
    let key = || {
        speech
            .api_key
            .as_ref()
            .map(|k| SecretString::from(k.expose_secret().to_owned()))
            .ok_or_else(|| Error::Config("OPENAI_API_KEY required for audio speech".to_string()))
    };

    let stt = SpeechToText::new(&speech.api_base_url, key()?, &speech.stt_model, &speech.language)?;
    let tts = TextToSpeech::new(
        &speech.api_base_url,
        key()?,
        &speech.tts_voice,
        speech.tts_speed,
        &speech.tts_model,
    )?;

    let driver = AudioSpeech::new(
        stt,
        tts,
        VadSettings::default(),
        speech.silence_timeout,
        speech.max_utterance,
    )?;
    Ok(Box::new(driver))
}

#[cfg(not(feature = "audio"))]
fn build_audio_speech(_config: &Config) -> Result<Box<dyn SpeechIo>> {
    Err(Error::Config(
        "speech.driver = \"audio\" needs a build with the audio feature".to_string(),
    ))
}

fn build_backend(config: &Config) -> Result<Arc<dyn DialogueBackend>> {
    match config.mode {
        SessionMode::Test => {
            tracing::info!("test mode, using stub backend");
            Ok(Arc::new(StubBackend::new(config.backend.stub_reply.clone())))
        }
        SessionMode::Live => {
            let token = config
                .backend
                .token
                .as_ref()
                .map(|t| SecretString::from(t.expose_secret().to_owned()));
            let backend = HttpBackend::new(
                &config.backend.url,
                &config.backend.path,
                config.backend.timeout,
                token,
            )?;
            Ok(Arc::new(backend))
        }
    }
}

async fn build_printer(
    config: &Config,
    policy: MissingDevicePolicy,
) -> Result<(Option<Box<dyn OutputDevice>>, Slot)> {
    if !config.hardware.enable_printer {
        return Ok((None, Slot::Disabled));
    }

    let Some(path) = &config.output.printer else {
        let error = Error::Config("no printer path".to_string());
        return Ok((None, degrade_or_fail(policy, "printer", &error)?));
    };

    match EscPosPrinter::open(path, config.output.printer_width, config.output.feed_lines).await {
        Ok(printer) => Ok((
            Some(Box::new(printer)),
            Slot::Active(format!("escpos {}", path.display())),
        )),
        Err(e) => Ok((None, degrade_or_fail(policy, "printer", &e)?)),
    }
}

const fn speech_name(driver: SpeechDriver) -> &'static str {
    match driver {
        SpeechDriver::Console => "console",
        SpeechDriver::Audio => "audio",
    }
}

fn backend_slot(config: &Config) -> Slot {
    match config.mode {
        SessionMode::Test => Slot::Active("stub".to_string()),
        SessionMode::Live => Slot::Active(format!(
            "http {}",
            crate::backend::join_url(&config.backend.url, &config.backend.path)
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ConfigFile, parse_config_file};

    fn config(toml: &str) -> Config {
        let file: ConfigFile = parse_config_file(toml).unwrap();
        Config::resolve(file, |_| None).unwrap()
    }

    #[test]
    fn plan_reflects_configuration() {
        let config = config(
            r#"
            test_mode = true
            [hardware]
            enable_printer = false
            [output]
            display = false
            "#,
        );

        let plan = AdapterPlan::intended(&config);
        assert_eq!(plan.backend, Slot::Active("stub".to_string()));
        assert_eq!(plan.printer, Slot::Disabled);
        assert_eq!(plan.display, Slot::Disabled);
        assert_eq!(plan.identity, Slot::Active("fixed guest".to_string()));
    }

    #[tokio::test]
    async fn missing_printer_degrades() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("lp0").display().to_string();
        let config = config(&format!(
            "test_mode = true\n[output]\nprinter = {missing:?}\n"
        ));

        let (adapters, plan) = build_adapters(&config).await.unwrap();
        assert!(!adapters.output.has_printer());
        assert!(matches!(plan.printer, Slot::Degraded(_)));
        assert_eq!(adapters.backend.name(), "stub");
    }

    #[tokio::test]
    async fn missing_printer_fails_fast_when_asked() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("lp0").display().to_string();
        let config = config(&format!(
            "test_mode = true\n[hardware]\non_missing_device = \"fail\"\n[output]\nprinter = {missing:?}\n"
        ));

        let result = build_adapters(&config).await;
        assert!(matches!(result, Err(Error::Device(_))));
    }

    #[tokio::test]
    async fn missing_scanner_falls_back_to_fixed_identity() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("ttyACM0").display().to_string();
        let config = config(&format!(
            "test_mode = true\n[hardware]\nenable_camera = true\nenable_printer = false\n[identity]\nscanner = {missing:?}\nfixed = \"13\"\n"
        ));

        let (mut adapters, plan) = build_adapters(&config).await.unwrap();
        assert!(matches!(plan.identity, Slot::Degraded(_)));
        assert_eq!(adapters.resolver.name(), "fixed");
        let polled = adapters.resolver.poll().await.unwrap();
        assert_eq!(polled.map(|i| i.to_string()), Some("13".to_string()));
    }
}
