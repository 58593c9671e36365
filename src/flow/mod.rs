//! Conversation flow engine
//!
//! The state machine that sequences one [`Session`]:
//!
//! ```text
//! AwaitingIdentity → Greeting → AwaitingUserInput → ProcessingReply
//!     → ApplyingDirectives → (AwaitingUserInput | Ending) → Ended
//! ```
//!
//! Each [`FlowEngine::step`] runs one state to completion and awaits at most
//! one adapter call at a time. Every such call observes the session's soft
//! cancellation token; a cancelled call unwinds to `Ending` so a closing
//! message can still be spoken, unless the hard token has fired too.

mod retry;

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

pub use retry::RetryPolicy;

use crate::AdapterError;
use crate::backend::{BackendReply, DialogueBackend};
use crate::directive::Expression;
use crate::identity::{self, IdentityResolver};
use crate::output::{OutputDevice, OutputRouter};
use crate::session::{ConversationTurn, Session, Speaker};
use crate::supervisor::Cancellation;
use crate::voice::SpeechIo;

/// Observable state of the flow engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FlowState {
    AwaitingIdentity,
    Greeting,
    AwaitingUserInput,
    ProcessingReply,
    ApplyingDirectives,
    Ending,
    Ended,
}

impl fmt::Display for FlowState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::AwaitingIdentity => "awaiting_identity",
            Self::Greeting => "greeting",
            Self::AwaitingUserInput => "awaiting_user_input",
            Self::ProcessingReply => "processing_reply",
            Self::ApplyingDirectives => "applying_directives",
            Self::Ending => "ending",
            Self::Ended => "ended",
        };
        f.write_str(name)
    }
}

/// Why a session ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EndReason {
    /// The backend sent an end directive
    Completed,
    /// First-tier termination request
    Cancelled,
    /// Second-tier termination request
    HardStop,
    /// Nobody presented a code in time
    IdentityTimeout,
    /// The visitor stayed silent through every capture attempt
    NoInput,
    /// A speech or identity device kept failing or disappeared
    Device,
    /// The speech input is gone for good (microphone unplugged, stdin closed)
    InputLost,
    /// The backend could not be reached
    Network,
    /// The backend did not answer in time
    Timeout,
    /// The backend answered with something unusable
    BadResponse,
}

impl EndReason {
    /// Whether the session ended because something went wrong
    #[must_use]
    pub const fn is_failure(self) -> bool {
        matches!(
            self,
            Self::NoInput
                | Self::Device
                | Self::InputLost
                | Self::Network
                | Self::Timeout
                | Self::BadResponse
        )
    }

    fn from_backend(error: &AdapterError) -> Self {
        match error {
            AdapterError::Timeout => Self::Timeout,
            AdapterError::BadResponse(_) => Self::BadResponse,
            AdapterError::Cancelled => Self::Cancelled,
            AdapterError::Network(_) | AdapterError::Device(_) | AdapterError::DeviceAbsent(_) => {
                Self::Network
            }
        }
    }
}

impl fmt::Display for EndReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Completed => "completed",
            Self::Cancelled => "cancelled",
            Self::HardStop => "hard_stop",
            Self::IdentityTimeout => "identity_timeout",
            Self::NoInput => "no_input",
            Self::Device => "device",
            Self::InputLost => "input_lost",
            Self::Network => "network",
            Self::Timeout => "timeout",
            Self::BadResponse => "bad_response",
        };
        f.write_str(name)
    }
}

/// Where the opening line comes from
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum GreetingSource {
    /// No opening line; the visitor speaks first
    #[default]
    None,
    /// A configured line
    Fixed(String),
    /// Ask the backend with an empty history
    Backend,
}

/// Lines spoken while a session ends, by end reason
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClosingMessages {
    /// After a termination request
    pub farewell: Option<String>,
    /// After every capture attempt came back empty
    pub no_input: Option<String>,
    /// After the backend retries ran out
    pub backend_failure: Option<String>,
}

/// Bounds and wording for one session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlowPolicy {
    pub greeting: GreetingSource,
    pub closing: ClosingMessages,
    /// Capture attempts before giving up on the visitor
    pub capture_attempts: u32,
    pub backend_retry: RetryPolicy,
    /// Cadence of identity polls
    pub identity_poll_interval: Duration,
    /// Upper bound on speaking the closing message
    pub closing_timeout: Duration,
}

impl Default for FlowPolicy {
    fn default() -> Self {
        Self {
            greeting: GreetingSource::None,
            closing: ClosingMessages::default(),
            capture_attempts: 3,
            backend_retry: RetryPolicy::default(),
            identity_poll_interval: Duration::from_millis(200),
            closing_timeout: Duration::from_secs(10),
        }
    }
}

/// The collaborators a session talks to
pub struct Adapters {
    pub resolver: Box<dyn IdentityResolver>,
    pub speech: Box<dyn SpeechIo>,
    pub backend: Arc<dyn DialogueBackend>,
    pub output: OutputRouter,
}

/// Result of a finished session
#[derive(Debug, Clone)]
pub struct SessionOutcome {
    pub session: Session,
    pub reason: EndReason,
    /// Every state entered, in order, starting with `AwaitingIdentity`
    pub transitions: Vec<FlowState>,
}

#[derive(Debug, Clone)]
enum Phase {
    AwaitingIdentity,
    Greeting,
    AwaitingUserInput { failures: u32 },
    ProcessingReply,
    ApplyingDirectives { reply: BackendReply },
    Ending { reason: EndReason, message: Option<String> },
    Ended { reason: EndReason },
}

impl Phase {
    const fn state(&self) -> FlowState {
        match self {
            Self::AwaitingIdentity => FlowState::AwaitingIdentity,
            Self::Greeting => FlowState::Greeting,
            Self::AwaitingUserInput { .. } => FlowState::AwaitingUserInput,
            Self::ProcessingReply => FlowState::ProcessingReply,
            Self::ApplyingDirectives { .. } => FlowState::ApplyingDirectives,
            Self::Ending { .. } => FlowState::Ending,
            Self::Ended { .. } => FlowState::Ended,
        }
    }
}

/// Drives one session through its states
///
/// The engine is the only writer of the session's identity and turns.
pub struct FlowEngine<'a> {
    session: Session,
    phase: Phase,
    transitions: Vec<FlowState>,
    policy: &'a FlowPolicy,
    adapters: &'a mut Adapters,
    cancel: Cancellation,
}

impl<'a> FlowEngine<'a> {
    #[must_use]
    pub fn new(
        session: Session,
        policy: &'a FlowPolicy,
        adapters: &'a mut Adapters,
        cancel: Cancellation,
    ) -> Self {
        Self {
            session,
            phase: Phase::AwaitingIdentity,
            transitions: vec![FlowState::AwaitingIdentity],
            policy,
            adapters,
            cancel,
        }
    }

    #[must_use]
    pub const fn state(&self) -> FlowState {
        self.phase.state()
    }

    #[must_use]
    pub const fn session(&self) -> &Session {
        &self.session
    }

    /// States entered so far, starting with `AwaitingIdentity`
    #[must_use]
    pub fn transitions(&self) -> &[FlowState] {
        &self.transitions
    }

    /// Why the session ended, once it has
    #[must_use]
    pub const fn end_reason(&self) -> Option<EndReason> {
        match self.phase {
            Phase::Ending { reason, .. } | Phase::Ended { reason } => Some(reason),
            _ => None,
        }
    }

    /// Run one state to completion and return the state entered
    ///
    /// Stepping an ended engine is a no-op.
    pub async fn step(&mut self) -> FlowState {
        if matches!(self.phase, Phase::Ended { .. }) {
            return FlowState::Ended;
        }

        let next = if self.cancel.is_hard_stopped() && !matches!(self.phase, Phase::Ending { .. }) {
            self.ending(EndReason::HardStop)
        } else {
            match self.phase {
                Phase::AwaitingIdentity => self.await_identity().await,
                Phase::Greeting => self.greet().await,
                Phase::AwaitingUserInput { failures } => self.await_user_input(failures).await,
                Phase::ProcessingReply => self.process_reply().await,
                Phase::ApplyingDirectives { ref reply } => {
                    let reply = reply.clone();
                    self.apply_directives(reply).await
                }
                Phase::Ending { reason, ref message } => {
                    let message = message.clone();
                    self.finish(reason, message).await
                }
                Phase::Ended { .. } => return FlowState::Ended,
            }
        };

        self.transition(next);
        self.state()
    }

    /// End the session from outside, skipping ahead to `Ending`
    ///
    /// Used by the supervisor when its own deadline expires. Ignored once
    /// the engine is already ending.
    pub fn end(&mut self, reason: EndReason) {
        if matches!(self.phase, Phase::Ending { .. } | Phase::Ended { .. }) {
            return;
        }
        let next = self.ending(reason);
        self.transition(next);
    }

    /// Step until `Ended`
    pub async fn run(mut self) -> SessionOutcome {
        while self.step().await != FlowState::Ended {}
        self.into_outcome()
    }

    /// Finish the session as it stands
    #[must_use]
    pub fn into_outcome(self) -> SessionOutcome {
        let reason = self.end_reason().unwrap_or(EndReason::HardStop);
        SessionOutcome {
            session: self.session,
            reason,
            transitions: self.transitions,
        }
    }

    fn transition(&mut self, next: Phase) {
        let from = self.phase.state();
        let to = next.state();
        tracing::debug!(session = %self.session.id(), %from, %to, "transition");
        self.phase = next;
        self.transitions.push(to);
    }

    async fn await_identity(&mut self) -> Phase {
        self.adapters.output.cue(Expression::Loading);

        let resolved = identity::watch(
            self.adapters.resolver.as_mut(),
            self.policy.identity_poll_interval,
            &self.cancel.soft,
        )
        .await;

        match resolved {
            Ok(identity) => {
                if !self.session.resolve(identity) {
                    tracing::debug!("identity already stamped");
                }
                Phase::Greeting
            }
            Err(AdapterError::Cancelled) => self.cancelled(),
            Err(e) => {
                tracing::warn!(error = %e, "identity resolver unavailable");
                self.ending(EndReason::Device)
            }
        }
    }

    async fn greet(&mut self) -> Phase {
        let policy = self.policy;
        let opening = match &policy.greeting {
            GreetingSource::None => return Phase::AwaitingUserInput { failures: 0 },
            GreetingSource::Fixed(text) => BackendReply::text(text.clone()),
            GreetingSource::Backend => {
                self.adapters.output.cue(Expression::Thinking);
                match self.request_reply(&[]).await {
                    Ok(reply) => reply,
                    Err(AdapterError::Cancelled) => return self.cancelled(),
                    Err(e) => {
                        tracing::warn!(error = %e, "backend greeting failed, skipping");
                        return Phase::AwaitingUserInput { failures: 0 };
                    }
                }
            }
        };

        if !opening.text.trim().is_empty() {
            self.session.append(Speaker::Agent, opening.text.clone());
        }
        // an opening line carries directives like any other reply
        self.apply_directives(opening).await
    }

    async fn await_user_input(&mut self, failures: u32) -> Phase {
        self.adapters.output.cue(Expression::Listening);

        let captured = match self.adapters.speech.capture_utterance(&self.cancel.soft).await {
            Ok(text) if text.trim().is_empty() => Err(AdapterError::Timeout),
            other => other,
        };

        match captured {
            Ok(text) => {
                tracing::info!(session = %self.session.id(), text = %text, "visitor said");
                self.session.append(Speaker::User, text);
                Phase::ProcessingReply
            }
            Err(AdapterError::Cancelled) => self.cancelled(),
            Err(AdapterError::DeviceAbsent(device)) => {
                tracing::warn!(%device, "speech input unavailable");
                self.ending(EndReason::InputLost)
            }
            Err(e) => {
                let failures = failures + 1;
                tracing::warn!(error = %e, attempt = failures, "capture failed");
                if failures < self.policy.capture_attempts {
                    Phase::AwaitingUserInput { failures }
                } else if e == AdapterError::Timeout {
                    self.ending(EndReason::NoInput)
                } else {
                    self.ending(EndReason::Device)
                }
            }
        }
    }

    async fn process_reply(&mut self) -> Phase {
        self.adapters.output.cue(Expression::Thinking);

        let turns = self.session.turns().to_vec();
        match self.request_reply(&turns).await {
            Ok(reply) => {
                if !reply.text.trim().is_empty() {
                    self.session.append(Speaker::Agent, reply.text.clone());
                }
                Phase::ApplyingDirectives { reply }
            }
            Err(AdapterError::Cancelled) => self.cancelled(),
            Err(e) => {
                tracing::warn!(error = %e, "backend retries exhausted");
                self.ending(EndReason::from_backend(&e))
            }
        }
    }

    async fn apply_directives(&mut self, reply: BackendReply) -> Phase {
        // end directives only take effect after everything else
        for directive in reply.directives.iter().filter(|d| !d.is_end()) {
            let applied = suspend(&self.cancel.soft, self.adapters.output.apply(directive)).await;
            match applied {
                Ok(()) => tracing::debug!(kind = directive.kind(), "directive applied"),
                Err(AdapterError::Cancelled) => return self.cancelled(),
                Err(e) => tracing::warn!(kind = directive.kind(), error = %e, "directive failed"),
            }
        }

        if reply.ends_session() {
            let message = Some(reply.text).filter(|t| !t.trim().is_empty());
            return Phase::Ending {
                reason: EndReason::Completed,
                message,
            };
        }

        if let Err(AdapterError::Cancelled) = self.speak(&reply.text).await {
            return self.cancelled();
        }
        Phase::AwaitingUserInput { failures: 0 }
    }

    async fn finish(&mut self, reason: EndReason, message: Option<String>) -> Phase {
        let message = message.filter(|_| {
            self.session.identity().is_some() && !self.cancel.is_hard_stopped()
        });

        if let Some(text) = message {
            self.adapters.output.cue(Expression::Speaking);
            // soft may already be cancelled; only the hard stop cuts the closing line
            let closing = self.cancel.hard.child_token();
            let spoken = tokio::time::timeout(
                self.policy.closing_timeout,
                self.adapters.speech.speak(&text, &closing),
            )
            .await;

            match spoken {
                Ok(Ok(())) => {}
                Ok(Err(e)) => tracing::debug!(error = %e, "closing message not spoken"),
                Err(_) => tracing::debug!("closing message timed out"),
            }
        }

        self.adapters.output.cue(Expression::Idle);
        let reason = if self.cancel.is_hard_stopped() {
            EndReason::HardStop
        } else {
            reason
        };
        Phase::Ended { reason }
    }

    /// Send `turns` to the backend, retrying with backoff
    async fn request_reply(
        &mut self,
        turns: &[ConversationTurn],
    ) -> Result<BackendReply, AdapterError> {
        let Some(identity) = self.session.identity().cloned() else {
            return Err(AdapterError::BadResponse("no identity resolved".to_string()));
        };
        let retry = &self.policy.backend_retry;
        let backend = Arc::clone(&self.adapters.backend);

        let mut calls = 0;
        loop {
            calls += 1;
            match backend.send(&identity, turns, &self.cancel.soft).await {
                Ok(reply) => return Ok(reply),
                Err(AdapterError::Cancelled) => return Err(AdapterError::Cancelled),
                Err(e) if e.is_transient() && retry.allows_another(calls) => {
                    let pause = retry.pause_after(calls);
                    tracing::warn!(
                        backend = backend.name(),
                        error = %e,
                        calls,
                        ?pause,
                        "backend call failed, retrying"
                    );
                    suspend(&self.cancel.soft, async {
                        tokio::time::sleep(pause).await;
                        Ok(())
                    })
                    .await?;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Speak a line; failures other than cancellation are logged and ignored
    async fn speak(&mut self, text: &str) -> Result<(), AdapterError> {
        if text.trim().is_empty() {
            return Ok(());
        }

        self.adapters.output.cue(Expression::Speaking);
        match self.adapters.speech.speak(text, &self.cancel.soft).await {
            Err(AdapterError::Cancelled) => Err(AdapterError::Cancelled),
            Err(e) => {
                tracing::warn!(error = %e, "speech output failed");
                Ok(())
            }
            Ok(()) => Ok(()),
        }
    }

    fn cancelled(&self) -> Phase {
        if self.cancel.is_hard_stopped() {
            self.ending(EndReason::HardStop)
        } else {
            self.ending(EndReason::Cancelled)
        }
    }

    fn ending(&self, reason: EndReason) -> Phase {
        let closing = &self.policy.closing;
        let message = match reason {
            EndReason::Cancelled => closing.farewell.clone(),
            EndReason::NoInput => closing.no_input.clone(),
            EndReason::Network | EndReason::Timeout | EndReason::BadResponse => {
                closing.backend_failure.clone()
            }
            EndReason::Completed
            | EndReason::HardStop
            | EndReason::IdentityTimeout
            | EndReason::Device
            | EndReason::InputLost => None,
        };
        Phase::Ending { reason, message }
    }
}

/// Await `operation` unless `cancel` fires first
async fn suspend<T, F>(
    cancel: &tokio_util::sync::CancellationToken,
    operation: F,
) -> Result<T, AdapterError>
where
    F: Future<Output = Result<T, AdapterError>>,
{
    tokio::select! {
        biased;
        () = cancel.cancelled() => Err(AdapterError::Cancelled),
        result = operation => result,
    }
}
