//! HTTP dialogue backend

use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use secrecy::{ExposeSecret, SecretString};
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use super::{BackendReply, DialogueBackend};
use crate::session::{ConversationTurn, Identity};
use crate::{AdapterError, Error, Result};

/// Request body posted for every turn
#[derive(Serialize)]
struct TurnRequest<'a> {
    identity: &'a Identity,
    turns: &'a [ConversationTurn],
}

/// Talks to the remote LLM-backed dialogue service over JSON/HTTP
pub struct HttpBackend {
    client: reqwest::Client,
    url: String,
    token: Option<SecretString>,
}

impl HttpBackend {
    /// Create a client posting to `base_url` joined with `path`
    ///
    /// # Errors
    ///
    /// Returns `Config` if the URL is empty or the HTTP client cannot be built
    pub fn new(
        base_url: &str,
        path: &str,
        timeout: Duration,
        token: Option<SecretString>,
    ) -> Result<Self> {
        if base_url.trim().is_empty() {
            return Err(Error::Config("backend base URL required".to_string()));
        }

        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::Config(format!("failed to build HTTP client: {e}")))?;

        let url = join_url(base_url, path);
        tracing::debug!(url = %url, ?timeout, "dialogue backend configured");

        Ok(Self { client, url, token })
    }

    /// The endpoint turns are posted to
    #[must_use]
    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl DialogueBackend for HttpBackend {
    fn name(&self) -> &'static str {
        "http"
    }

    async fn send(
        &self,
        identity: &Identity,
        turns: &[ConversationTurn],
        cancel: &CancellationToken,
    ) -> std::result::Result<BackendReply, AdapterError> {
        let body = TurnRequest { identity, turns };
        let mut request = self.client.post(&self.url).json(&body);
        if let Some(token) = &self.token {
            request = request.bearer_auth(token.expose_secret());
        }

        tracing::debug!(url = %self.url, turns = turns.len(), "sending turn to backend");

        let response = tokio::select! {
            biased;
            () = cancel.cancelled() => return Err(AdapterError::Cancelled),
            response = request.send() => response.map_err(|e| {
                tracing::warn!(error = %e, "backend request failed");
                AdapterError::from(e)
            })?,
        };

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::warn!(status = %status, body = %body, "backend error");
            return Err(classify_status(status, &body));
        }

        let reply: BackendReply = tokio::select! {
            biased;
            () = cancel.cancelled() => return Err(AdapterError::Cancelled),
            parsed = response.json::<BackendReply>() => parsed.map_err(|e| {
                tracing::warn!(error = %e, "failed to parse backend reply");
                AdapterError::BadResponse(e.to_string())
            })?,
        };

        if reply.text.trim().is_empty() && reply.directives.is_empty() {
            return Err(AdapterError::BadResponse("empty reply".to_string()));
        }

        tracing::debug!(
            reply = %reply.text,
            directives = reply.directives.len(),
            "backend replied"
        );
        Ok(reply)
    }
}

/// Map an unsuccessful status to the error taxonomy
///
/// Rate limits and server errors are transport trouble worth a retry; other
/// statuses mean the service rejected what we sent.
fn classify_status(status: StatusCode, body: &str) -> AdapterError {
    if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
        AdapterError::Network(format!("backend returned {status}"))
    } else if status == StatusCode::REQUEST_TIMEOUT || status == StatusCode::GATEWAY_TIMEOUT {
        AdapterError::Timeout
    } else {
        AdapterError::BadResponse(format!("backend returned {status}: {body}"))
    }
}

pub(crate) fn join_url(base: &str, path: &str) -> String {
    let base = base.trim_end_matches('/');
    let path = path.trim_start_matches('/');
    if path.is_empty() {
        base.to_string()
    } else {
        format!("{base}/{path}")
    }
}
