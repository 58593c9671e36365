//! Error types for Kindroid

use thiserror::Error;

/// Result type alias for Kindroid operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised while loading configuration or constructing drivers
///
/// Anything surfacing as an [`Error`] before the first session starts is fatal:
/// the process exits without entering the conversation loop.
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// A required device could not be initialized
    #[error("device error: {0}")]
    Device(String),

    /// Audio error
    #[error("audio error: {0}")]
    Audio(String),

    /// Speech-to-text error
    #[error("STT error: {0}")]
    Stt(String),

    /// Text-to-speech error
    #[error("TTS error: {0}")]
    Tts(String),

    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP error
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// TOML parsing error
    #[error("toml error: {0}")]
    Toml(#[from] toml::de::Error),
}

/// Failure of a single adapter call made by the flow engine
///
/// Each variant maps to one handling rule: absent devices degrade, transient
/// failures are retried with a bound, cancellation unwinds to the closing step.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AdapterError {
    /// The device behind the adapter is not present or was disabled
    #[error("device absent: {0}")]
    DeviceAbsent(String),

    /// The device is present but the operation failed
    #[error("device error: {0}")]
    Device(String),

    /// The operation did not complete in time (includes silence timeouts)
    #[error("timed out")]
    Timeout,

    /// Transport-level failure talking to a remote service
    #[error("network error: {0}")]
    Network(String),

    /// The remote service answered with something unusable
    #[error("bad response: {0}")]
    BadResponse(String),

    /// The session's cancellation token fired
    #[error("cancelled")]
    Cancelled,
}

impl AdapterError {
    /// Whether a retry could plausibly succeed
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Device(_) | Self::Timeout | Self::Network(_) | Self::BadResponse(_)
        )
    }
}

impl From<reqwest::Error> for AdapterError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            Self::Timeout
        } else if e.is_decode() {
            Self::BadResponse(e.to_string())
        } else {
            Self::Network(e.to_string())
        }
    }
}

impl From<Error> for AdapterError {
    fn from(e: Error) -> Self {
        match e {
            Error::Http(e) => e.into(),
            Error::Serialization(e) => Self::BadResponse(e.to_string()),
            other => Self::Device(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_classification() {
        assert!(AdapterError::Timeout.is_transient());
        assert!(AdapterError::Network("reset".into()).is_transient());
        assert!(AdapterError::Device("jammed".into()).is_transient());
        assert!(!AdapterError::DeviceAbsent("printer".into()).is_transient());
        assert!(!AdapterError::Cancelled.is_transient());
    }

    #[test]
    fn driver_errors_become_device_errors() {
        let err: AdapterError = Error::Audio("no input device".into()).into();
        assert_eq!(err, AdapterError::Device("audio error: no input device".into()));
    }
}
