//! Local stand-in backend for test mode

use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use super::{BackendReply, DialogueBackend};
use crate::AdapterError;
use crate::session::{ConversationTurn, Identity, Speaker};

/// Placeholder replaced by the visitor's latest utterance
const USER_PLACEHOLDER: &str = "{user}";

/// Deterministic backend answering with a canned reply and no directives
///
/// The canned text may contain `{user}`, which is replaced by the most recent
/// user turn. No network access happens.
#[derive(Debug)]
pub struct StubBackend {
    canned: String,
    calls: AtomicUsize,
}

impl StubBackend {
    #[must_use]
    pub fn new(canned: impl Into<String>) -> Self {
        Self {
            canned: canned.into(),
            calls: AtomicUsize::new(0),
        }
    }

    /// Number of requests answered so far
    #[must_use]
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl DialogueBackend for StubBackend {
    fn name(&self) -> &'static str {
        "stub"
    }

    async fn send(
        &self,
        identity: &Identity,
        turns: &[ConversationTurn],
        cancel: &CancellationToken,
    ) -> Result<BackendReply, AdapterError> {
        if cancel.is_cancelled() {
            return Err(AdapterError::Cancelled);
        }
        self.calls.fetch_add(1, Ordering::Relaxed);

        let last_user = turns
            .iter()
            .rev()
            .find(|t| t.speaker == Speaker::User)
            .map_or("", |t| t.text.as_str());
        let text = self.canned.replace(USER_PLACEHOLDER, last_user);

        tracing::debug!(%identity, reply = %text, "stub backend replied");
        Ok(BackendReply::text(text))
    }
}
