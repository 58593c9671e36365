//! Session supervisor
//!
//! Owns the run loop: creates one [`Session`] at a time, drives it through a
//! [`FlowEngine`], applies the supervisor-side identity deadline, and decides
//! whether to start another session. It is the only component that knows
//! about process lifecycle; adapters are built once up front by [`wiring`].

mod shutdown;
pub mod wiring;

use std::time::Duration;

use tokio::time::Instant;

pub use crate::flow::Adapters;
pub use shutdown::{Cancellation, Escalation, Shutdown, TerminationRequest, listen};
pub use wiring::{AdapterPlan, build_adapters};

use crate::config::Config;
use crate::flow::{EndReason, FlowEngine, FlowPolicy, FlowState, SessionOutcome};
use crate::session::{Session, SessionMode};

/// How long adapters get to unwind once the hard stop has fired
pub const HARD_STOP_GRACE: Duration = Duration::from_millis(500);

/// How the supervisor runs sessions
#[derive(Debug, Clone)]
pub struct SupervisorOptions {
    pub mode: SessionMode,
    /// Start a new session after each one ends
    pub restart: bool,
    /// Deadline for resolving an identity, none to wait forever
    pub identity_timeout: Option<Duration>,
    pub policy: FlowPolicy,
}

impl SupervisorOptions {
    #[must_use]
    pub fn from_config(config: &Config) -> Self {
        Self {
            mode: config.mode,
            restart: config.restart,
            identity_timeout: config.identity.timeout,
            policy: config.flow_policy(),
        }
    }
}

/// What a run of the supervisor did
#[derive(Debug)]
pub struct RunSummary {
    /// Sessions started
    pub sessions: usize,
    /// The most recent session
    pub last: Option<SessionOutcome>,
}

impl RunSummary {
    /// Whether the run ended with the hard stop
    #[must_use]
    pub fn hard_stopped(&self) -> bool {
        self.last
            .as_ref()
            .is_some_and(|o| o.reason == EndReason::HardStop)
    }
}

/// Runs sessions until done or stopped
pub struct Supervisor {
    options: SupervisorOptions,
    adapters: Adapters,
    shutdown: Shutdown,
}

impl Supervisor {
    #[must_use]
    pub const fn new(options: SupervisorOptions, adapters: Adapters, shutdown: Shutdown) -> Self {
        Self {
            options,
            adapters,
            shutdown,
        }
    }

    /// Handle for delivering termination requests
    #[must_use]
    pub fn shutdown(&self) -> Shutdown {
        self.shutdown.clone()
    }

    /// Run sessions until one ends without restart, or the hard stop
    pub async fn run(&mut self) -> RunSummary {
        let mut summary = RunSummary {
            sessions: 0,
            last: None,
        };

        tracing::info!(
            mode = %self.options.mode,
            restart = self.options.restart,
            backend = self.adapters.backend.name(),
            speech = self.adapters.speech.name(),
            resolver = self.adapters.resolver.name(),
            "supervisor started"
        );

        while !self.shutdown.is_stopped() {
            let outcome = self.run_session().await;
            summary.sessions += 1;

            // a lost input or identity source would end every further session the same way
            let source_gone = outcome.reason == EndReason::InputLost
                || (outcome.reason == EndReason::Device && outcome.session.identity().is_none());
            let stop = outcome.reason == EndReason::HardStop || !self.options.restart || source_gone;
            if source_gone && self.options.restart {
                tracing::error!(reason = %outcome.reason, "input source gone, not restarting");
            }
            summary.last = Some(outcome);

            if stop {
                break;
            }
        }

        tracing::info!(sessions = summary.sessions, "supervisor stopped");
        summary
    }

    /// Run like [`Supervisor::run`], but abandon the current session once the
    /// hard stop has been pending for `grace`
    ///
    /// Returns `None` when an adapter ignored cancellation for that long.
    pub async fn run_until_stopped(&mut self, grace: Duration) -> Option<RunSummary> {
        let shutdown = self.shutdown.clone();
        let deadline = async {
            shutdown.stopped().await;
            tokio::time::sleep(grace).await;
        };

        tokio::select! {
            biased;
            summary = self.run() => Some(summary),
            () = deadline => {
                tracing::warn!(?grace, "adapters still busy after the hard stop, abandoning session");
                None
            }
        }
    }

    /// Run exactly one session to `Ended`
    pub async fn run_session(&mut self) -> SessionOutcome {
        let cancel = self.shutdown.begin_session();
        let session = Session::new(self.options.mode);
        let id = session.id();
        tracing::info!(session = %id, mode = %self.options.mode, "session started");

        let mut engine = FlowEngine::new(session, &self.options.policy, &mut self.adapters, cancel);

        if let Some(limit) = self.options.identity_timeout {
            let deadline = Instant::now() + limit;
            while engine.state() == FlowState::AwaitingIdentity {
                if tokio::time::timeout_at(deadline, engine.step()).await.is_err() {
                    tracing::info!(session = %id, ?limit, "no identity presented in time");
                    engine.end(EndReason::IdentityTimeout);
                }
            }
        }

        let outcome = engine.run().await;
        let turns = outcome.session.turns().len();
        if outcome.reason.is_failure() {
            tracing::warn!(session = %id, reason = %outcome.reason, turns, "session ended");
        } else {
            tracing::info!(session = %id, reason = %outcome.reason, turns, "session ended");
        }
        outcome
    }
}
