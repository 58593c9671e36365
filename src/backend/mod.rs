//! Dialogue backend clients
//!
//! The flow engine sends the full turn history plus the visitor identity and
//! receives reply text with optional [`Directive`]s. [`HttpBackend`] talks to
//! the remote LLM-backed service; [`StubBackend`] answers locally in test mode
//! through the identical interface.

mod http;
mod stub;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

pub use http::HttpBackend;
pub(crate) use http::join_url;
pub use stub::StubBackend;

use crate::AdapterError;
use crate::directive::Directive;
use crate::session::{ConversationTurn, Identity};

/// A structured backend response
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackendReply {
    /// Text to speak to the visitor
    #[serde(rename = "reply")]
    pub text: String,

    /// Side effects to apply, in order
    #[serde(default)]
    pub directives: Vec<Directive>,
}

impl BackendReply {
    /// A reply with no directives
    #[must_use]
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            directives: Vec::new(),
        }
    }

    /// Whether an end-of-session directive is present
    #[must_use]
    pub fn ends_session(&self) -> bool {
        self.directives.iter().any(Directive::is_end)
    }
}

/// Client for the service producing the robot's replies
#[async_trait]
pub trait DialogueBackend: Send + Sync {
    /// Short name used in logs
    fn name(&self) -> &'static str;

    /// Request the next reply for `turns`
    ///
    /// An empty `turns` slice asks for an opening line.
    ///
    /// # Errors
    ///
    /// Returns `Network`, `Timeout` or `BadResponse` on failure and
    /// `Cancelled` when `cancel` fires first.
    async fn send(
        &self,
        identity: &Identity,
        turns: &[ConversationTurn],
        cancel: &CancellationToken,
    ) -> Result<BackendReply, AdapterError>;
}
