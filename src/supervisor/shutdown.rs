//! Two-tier termination
//!
//! A first [`TerminationRequest::Interrupt`] only cancels the current
//! session's soft token: the in-flight adapter call unwinds and the flow
//! engine still gets to say goodbye. A second interrupt during the same
//! session, or any [`TerminationRequest::Terminate`], cancels the hard token
//! and the whole process stops without further attempts.

use std::sync::{Arc, Mutex, PoisonError};

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// A request to stop, as delivered by a signal or a caller
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminationRequest {
    /// Interactive interrupt (SIGINT, Ctrl-C)
    Interrupt,
    /// Unconditional stop (SIGTERM)
    Terminate,
}

/// What a termination request ended up doing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Escalation {
    /// The current session was asked to wind down
    Soft,
    /// The process is stopping
    Hard,
}

/// Cancellation tokens handed to one session
///
/// `soft` is a child of `hard`, so a hard stop also cancels everything
/// waiting on the soft token.
#[derive(Debug, Clone)]
pub struct Cancellation {
    pub soft: CancellationToken,
    pub hard: CancellationToken,
}

impl Cancellation {
    /// Fresh, unlinked tokens, for driving an engine outside a supervisor
    #[must_use]
    pub fn detached() -> Self {
        let hard = CancellationToken::new();
        Self {
            soft: hard.child_token(),
            hard,
        }
    }

    #[must_use]
    pub fn is_hard_stopped(&self) -> bool {
        self.hard.is_cancelled()
    }
}

#[derive(Debug)]
struct SessionSlot {
    soft: CancellationToken,
}

/// Process-wide termination state shared by the supervisor and signal listener
#[derive(Debug, Clone)]
pub struct Shutdown {
    hard: CancellationToken,
    current: Arc<Mutex<SessionSlot>>,
}

impl Default for Shutdown {
    fn default() -> Self {
        Self::new()
    }
}

impl Shutdown {
    #[must_use]
    pub fn new() -> Self {
        let hard = CancellationToken::new();
        let soft = hard.child_token();
        Self {
            hard,
            current: Arc::new(Mutex::new(SessionSlot { soft })),
        }
    }

    /// Tokens for a new session
    ///
    /// Replaces the previous session's soft token, which also resets the
    /// interrupt escalation.
    #[must_use]
    pub fn begin_session(&self) -> Cancellation {
        let soft = self.hard.child_token();
        let mut slot = self.current.lock().unwrap_or_else(PoisonError::into_inner);
        slot.soft = soft.clone();
        Cancellation {
            soft,
            hard: self.hard.clone(),
        }
    }

    /// Apply a termination request
    pub fn request(&self, request: TerminationRequest) -> Escalation {
        let slot = self.current.lock().unwrap_or_else(PoisonError::into_inner);

        let escalation = match request {
            TerminationRequest::Interrupt if !slot.soft.is_cancelled() => {
                slot.soft.cancel();
                Escalation::Soft
            }
            TerminationRequest::Interrupt | TerminationRequest::Terminate => {
                self.hard.cancel();
                Escalation::Hard
            }
        };

        match escalation {
            Escalation::Soft => {
                tracing::info!(?request, "termination requested, cancelling current session");
            }
            Escalation::Hard => tracing::warn!(?request, "stopping immediately"),
        }
        escalation
    }

    /// Whether the hard stop has been requested
    #[must_use]
    pub fn is_stopped(&self) -> bool {
        self.hard.is_cancelled()
    }

    /// Wait for the hard stop
    pub async fn stopped(&self) {
        self.hard.cancelled().await;
    }

    /// The process-wide hard token
    #[must_use]
    pub fn hard_token(&self) -> CancellationToken {
        self.hard.clone()
    }
}

/// Forward process signals to `shutdown` until the hard stop
///
/// SIGINT maps to [`TerminationRequest::Interrupt`], SIGTERM to
/// [`TerminationRequest::Terminate`].
///
/// # Errors
///
/// Returns error if the signal handlers cannot be installed
pub fn listen(shutdown: Shutdown) -> std::io::Result<JoinHandle<()>> {
    #[cfg(unix)]
    let mut terminate = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;

    Ok(tokio::spawn(async move {
        loop {
            #[cfg(unix)]
            let request = tokio::select! {
                () = shutdown.stopped() => break,
                interrupt = tokio::signal::ctrl_c() => match interrupt {
                    Ok(()) => TerminationRequest::Interrupt,
                    Err(e) => {
                        tracing::error!(error = %e, "interrupt handler failed");
                        break;
                    }
                },
                _ = terminate.recv() => TerminationRequest::Terminate,
            };

            #[cfg(not(unix))]
            let request = tokio::select! {
                () = shutdown.stopped() => break,
                interrupt = tokio::signal::ctrl_c() => match interrupt {
                    Ok(()) => TerminationRequest::Interrupt,
                    Err(e) => {
                        tracing::error!(error = %e, "interrupt handler failed");
                        break;
                    }
                },
            };

            if shutdown.request(request) == Escalation::Hard {
                break;
            }
        }
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_interrupt_is_soft_second_is_hard() {
        let shutdown = Shutdown::new();
        let tokens = shutdown.begin_session();

        assert_eq!(shutdown.request(TerminationRequest::Interrupt), Escalation::Soft);
        assert!(tokens.soft.is_cancelled());
        assert!(!tokens.hard.is_cancelled());

        assert_eq!(shutdown.request(TerminationRequest::Interrupt), Escalation::Hard);
        assert!(tokens.is_hard_stopped());
        assert!(shutdown.is_stopped());
    }

    #[test]
    fn terminate_is_always_hard() {
        let shutdown = Shutdown::new();
        let tokens = shutdown.begin_session();

        assert_eq!(shutdown.request(TerminationRequest::Terminate), Escalation::Hard);
        assert!(tokens.soft.is_cancelled(), "soft follows hard");
        assert!(tokens.hard.is_cancelled());
    }

    #[test]
    fn new_session_resets_escalation() {
        let shutdown = Shutdown::new();
        let first = shutdown.begin_session();
        shutdown.request(TerminationRequest::Interrupt);

        let second = shutdown.begin_session();
        assert!(first.soft.is_cancelled());
        assert!(!second.soft.is_cancelled());

        assert_eq!(shutdown.request(TerminationRequest::Interrupt), Escalation::Soft);
        assert!(!shutdown.is_stopped());
    }

    #[tokio::test]
    async fn stopped_resolves_after_hard_stop() {
        let shutdown = Shutdown::new();
        let waiter = shutdown.clone();
        let handle = tokio::spawn(async move { waiter.stopped().await });

        shutdown.request(TerminationRequest::Terminate);
        handle.await.unwrap();
    }
}
