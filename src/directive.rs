//! Side-effect directives returned alongside dialogue replies

use std::fmt;

use serde::{Deserialize, Serialize};

/// Face expression shown on the ancillary display
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Expression {
    /// Resting face between sessions
    Idle,
    /// Waiting for something slow (identity scan, startup)
    Loading,
    /// Microphone is open
    Listening,
    /// Waiting on the backend
    Thinking,
    /// Robot is talking
    Speaking,
    Smile,
    Star,
    Error,
}

impl fmt::Display for Expression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::Loading => "loading",
            Self::Listening => "listening",
            Self::Thinking => "thinking",
            Self::Speaking => "speaking",
            Self::Smile => "smile",
            Self::Star => "star",
            Self::Error => "error",
        };
        f.write_str(name)
    }
}

/// A side-effect instruction attached to a backend reply
///
/// Wire form is internally tagged, e.g. `{"type": "print", "text": "ticket #7"}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Directive {
    /// Print plain text on the thermal printer
    Print { text: String },
    /// Print a scannable code carrying `data`
    PrintCode { data: String },
    /// Show an expression on the display
    Express { expression: Expression },
    /// Close the conversation after this reply
    End,
}

impl Directive {
    /// Short name used in logs
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Print { .. } => "print",
            Self::PrintCode { .. } => "print_code",
            Self::Express { .. } => "express",
            Self::End => "end",
        }
    }

    #[must_use]
    pub const fn is_end(&self) -> bool {
        matches!(self, Self::End)
    }
}
