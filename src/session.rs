//! Session data model
//!
//! A [`Session`] is one interaction from identity resolution to conversation end.
//! Its turn history is append-only; only the flow engine holds it mutably.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Resolved visitor identifier used to address the dialogue backend
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Identity(String);

impl Identity {
    /// Build an identity from a scanned code, trimming surrounding whitespace
    ///
    /// Returns `None` for blank codes.
    #[must_use]
    pub fn from_code(code: &str) -> Option<Self> {
        let trimmed = code.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(Self(trimmed.to_string()))
        }
    }

    /// The identifier as sent to the backend
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Who produced a conversation turn
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Speaker {
    /// The visitor
    User,
    /// The robot
    Agent,
}

/// One utterance in the conversation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationTurn {
    pub speaker: Speaker,
    pub text: String,
    pub timestamp: DateTime<Utc>,
}

impl ConversationTurn {
    /// Create a turn stamped with the current time
    #[must_use]
    pub fn now(speaker: Speaker, text: impl Into<String>) -> Self {
        Self {
            speaker,
            text: text.into(),
            timestamp: Utc::now(),
        }
    }
}

/// Whether the session talks to the real backend or the local stub
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionMode {
    Live,
    Test,
}

impl fmt::Display for SessionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Live => write!(f, "live"),
            Self::Test => write!(f, "test"),
        }
    }
}

/// One interaction from identity resolution to conversation end
#[derive(Debug, Clone)]
pub struct Session {
    id: Uuid,
    mode: SessionMode,
    identity: Option<Identity>,
    turns: Vec<ConversationTurn>,
}

impl Session {
    /// Create an empty session with no identity yet
    #[must_use]
    pub fn new(mode: SessionMode) -> Self {
        Self {
            id: Uuid::new_v4(),
            mode,
            identity: None,
            turns: Vec::new(),
        }
    }

    #[must_use]
    pub const fn id(&self) -> Uuid {
        self.id
    }

    #[must_use]
    pub const fn mode(&self) -> SessionMode {
        self.mode
    }

    #[must_use]
    pub const fn identity(&self) -> Option<&Identity> {
        self.identity.as_ref()
    }

    /// Full turn history in the order turns were observed
    #[must_use]
    pub fn turns(&self) -> &[ConversationTurn] {
        &self.turns
    }

    /// Stamp the identity
    ///
    /// The first identity wins; later calls are ignored and return `false`.
    pub(crate) fn resolve(&mut self, identity: Identity) -> bool {
        if self.identity.is_some() {
            return false;
        }
        self.identity = Some(identity);
        true
    }

    /// Append a turn to the end of the history
    pub(crate) fn append(&mut self, speaker: Speaker, text: impl Into<String>) {
        self.turns.push(ConversationTurn::now(speaker, text));
    }
}
