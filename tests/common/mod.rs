//! Shared test doubles
//!
//! Scripted adapters that record what the flow engine asked of them.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

use kindroid::AdapterError;
use kindroid::backend::{BackendReply, DialogueBackend};
use kindroid::directive::{Directive, Expression};
use kindroid::flow::Adapters;
use kindroid::identity::IdentityResolver;
use kindroid::output::{Face, OutputDevice, OutputRouter};
use kindroid::session::{ConversationTurn, Identity, Speaker};
use kindroid::voice::SpeechIo;

/// Shared, inspectable log
pub type Log<T> = Arc<Mutex<Vec<T>>>;

fn log<T>() -> Log<T> {
    Arc::new(Mutex::new(Vec::new()))
}

/// Snapshot of a log
pub fn entries<T: Clone>(log: &Log<T>) -> Vec<T> {
    log.lock().unwrap().clone()
}

pub fn identity(code: &str) -> Identity {
    Identity::from_code(code).expect("non-blank code")
}

/// Turns as `(speaker, text)` pairs
pub fn turn_texts(turns: &[ConversationTurn]) -> Vec<(Speaker, String)> {
    turns.iter().map(|t| (t.speaker, t.text.clone())).collect()
}

/// Resolver replaying scripted poll results, then seeing nobody
pub struct ScriptedResolver {
    polls: VecDeque<Result<Option<Identity>, AdapterError>>,
}

impl ScriptedResolver {
    pub fn new(polls: Vec<Result<Option<Identity>, AdapterError>>) -> Self {
        Self {
            polls: polls.into(),
        }
    }

    /// Empty frame first, then `code`
    pub fn presenting(code: &str) -> Self {
        Self::new(vec![Ok(None), Ok(Some(identity(code)))])
    }

    /// Never sees anyone
    pub fn nobody() -> Self {
        Self::new(Vec::new())
    }
}

#[async_trait]
impl IdentityResolver for ScriptedResolver {
    fn name(&self) -> &'static str {
        "scripted"
    }

    async fn poll(&mut self) -> Result<Option<Identity>, AdapterError> {
        self.polls.pop_front().unwrap_or(Ok(None))
    }
}

/// What the visitor does on the next capture
#[derive(Debug, Clone)]
pub enum Hear {
    Say(String),
    Fail(AdapterError),
    /// Stay silent until cancelled
    Hang,
}

pub fn say(text: &str) -> Hear {
    Hear::Say(text.to_string())
}

/// Speech I/O replaying a visitor script and recording spoken lines
///
/// Once the script runs out, capture reports the microphone as absent.
pub struct ScriptedSpeech {
    script: VecDeque<Hear>,
    spoken: Log<String>,
    hang_on: Option<String>,
    deaf: bool,
    listening: Arc<Notify>,
    stuck: Arc<Notify>,
}

impl ScriptedSpeech {
    pub fn new(script: Vec<Hear>) -> Self {
        Self {
            script: script.into(),
            spoken: log(),
            hang_on: None,
            deaf: false,
            listening: Arc::new(Notify::new()),
            stuck: Arc::new(Notify::new()),
        }
    }

    /// Block forever (until cancelled) when asked to speak `text`
    #[must_use]
    pub fn hang_on(mut self, text: &str) -> Self {
        self.hang_on = Some(text.to_string());
        self
    }

    /// Keep hanging on the `hang_on` line even after cancellation
    #[must_use]
    pub fn deaf_to_cancel(mut self) -> Self {
        self.deaf = true;
        self
    }

    /// Lines spoken to completion
    pub fn spoken(&self) -> Log<String> {
        Arc::clone(&self.spoken)
    }

    /// Signalled whenever a capture starts hanging
    pub fn listening(&self) -> Arc<Notify> {
        Arc::clone(&self.listening)
    }

    /// Signalled when the `hang_on` line starts
    pub fn stuck(&self) -> Arc<Notify> {
        Arc::clone(&self.stuck)
    }
}

#[async_trait]
impl SpeechIo for ScriptedSpeech {
    fn name(&self) -> &'static str {
        "scripted"
    }

    async fn capture_utterance(&mut self, cancel: &CancellationToken) -> Result<String, AdapterError> {
        if cancel.is_cancelled() {
            return Err(AdapterError::Cancelled);
        }
        match self.script.pop_front() {
            Some(Hear::Say(text)) => Ok(text),
            Some(Hear::Fail(e)) => Err(e),
            Some(Hear::Hang) => {
                self.listening.notify_one();
                cancel.cancelled().await;
                Err(AdapterError::Cancelled)
            }
            None => Err(AdapterError::DeviceAbsent("script exhausted".to_string())),
        }
    }

    async fn speak(&mut self, text: &str, cancel: &CancellationToken) -> Result<(), AdapterError> {
        if cancel.is_cancelled() {
            return Err(AdapterError::Cancelled);
        }
        if self.hang_on.as_deref() == Some(text) {
            self.stuck.notify_one();
            if self.deaf {
                std::future::pending::<()>().await;
            }
            cancel.cancelled().await;
            return Err(AdapterError::Cancelled);
        }
        self.spoken.lock().unwrap().push(text.to_string());
        Ok(())
    }
}

/// What the backend does on the next request
#[derive(Debug, Clone)]
pub enum Answer {
    Reply(BackendReply),
    Fail(AdapterError),
    /// Never answer; only cancellation returns
    Hang,
}

pub fn reply(text: &str) -> Answer {
    Answer::Reply(BackendReply::text(text))
}

pub fn reply_with(text: &str, directives: Vec<Directive>) -> Answer {
    Answer::Reply(BackendReply {
        text: text.to_string(),
        directives,
    })
}

/// Backend replaying scripted answers and recording each request's turns
///
/// Answers "ok" once the script runs out.
pub struct ScriptedBackend {
    answers: Mutex<VecDeque<Answer>>,
    requests: Log<Vec<ConversationTurn>>,
    entered: Arc<Notify>,
}

impl ScriptedBackend {
    pub fn new(answers: Vec<Answer>) -> Self {
        Self {
            answers: Mutex::new(answers.into()),
            requests: log(),
            entered: Arc::new(Notify::new()),
        }
    }

    pub fn requests(&self) -> Log<Vec<ConversationTurn>> {
        Arc::clone(&self.requests)
    }

    /// Signalled whenever a request starts hanging
    pub fn entered(&self) -> Arc<Notify> {
        Arc::clone(&self.entered)
    }
}

#[async_trait]
impl DialogueBackend for ScriptedBackend {
    fn name(&self) -> &'static str {
        "scripted"
    }

    async fn send(
        &self,
        _identity: &Identity,
        turns: &[ConversationTurn],
        cancel: &CancellationToken,
    ) -> Result<BackendReply, AdapterError> {
        self.requests.lock().unwrap().push(turns.to_vec());
        let next = self.answers.lock().unwrap().pop_front();

        match next {
            Some(Answer::Reply(reply)) => Ok(reply),
            Some(Answer::Fail(e)) => Err(e),
            Some(Answer::Hang) => {
                self.entered.notify_one();
                cancel.cancelled().await;
                Err(AdapterError::Cancelled)
            }
            None => Ok(BackendReply::text("ok")),
        }
    }
}

/// Printer that records every directive it accepts
pub struct RecordingPrinter {
    log: Log<Directive>,
}

#[async_trait]
impl OutputDevice for RecordingPrinter {
    fn name(&self) -> &'static str {
        "recording"
    }

    async fn apply(&mut self, directive: &Directive) -> Result<(), AdapterError> {
        self.log.lock().unwrap().push(directive.clone());
        Ok(())
    }
}

/// Face that records every expression shown
pub struct RecordingFace {
    log: Log<Expression>,
}

impl Face for RecordingFace {
    fn show(&mut self, expression: Expression) -> Result<(), AdapterError> {
        self.log.lock().unwrap().push(expression);
        Ok(())
    }
}

/// Output logs of a rig
pub struct Outputs {
    pub printed: Log<Directive>,
    pub shown: Log<Expression>,
}

/// A router with a recording face, and a recording printer if `printer`
pub fn outputs(printer: bool) -> (OutputRouter, Outputs) {
    let printed = log();
    let shown = log();

    let device: Option<Box<dyn OutputDevice>> = printer.then(|| {
        Box::new(RecordingPrinter {
            log: Arc::clone(&printed),
        }) as Box<dyn OutputDevice>
    });
    let face: Box<dyn Face> = Box::new(RecordingFace {
        log: Arc::clone(&shown),
    });

    (
        OutputRouter::new(device, Some(face)),
        Outputs { printed, shown },
    )
}

/// Assemble adapters from scripted parts
pub fn adapters(
    resolver: impl IdentityResolver + 'static,
    speech: ScriptedSpeech,
    backend: Arc<dyn DialogueBackend>,
    output: OutputRouter,
) -> Adapters {
    Adapters {
        resolver: Box::new(resolver),
        speech: Box::new(speech),
        backend,
        output,
    }
}
