//! Identity resolution
//!
//! Turns scanned codes into a stable [`Identity`]. Resolvers are polled on a
//! fixed cadence by [`watch`] while the flow engine awaits an identity; that
//! loop is the only background polling in the system.

mod debounce;
mod scanner;

use std::time::Duration;

use async_trait::async_trait;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

pub use debounce::Debounced;
pub use scanner::LineScanner;

use crate::AdapterError;
use crate::session::Identity;

/// Source of visitor identities
#[async_trait]
pub trait IdentityResolver: Send {
    /// Short name used in logs
    fn name(&self) -> &'static str;

    /// Return the identity currently in view, if any
    ///
    /// Must not block for longer than a single frame read and must be safe to
    /// call repeatedly.
    ///
    /// # Errors
    ///
    /// Returns `DeviceAbsent` when the source is gone for good; other errors
    /// are treated as transient by [`watch`].
    async fn poll(&mut self) -> Result<Option<Identity>, AdapterError>;

    /// Forget codes read before the current session started waiting
    fn reset(&mut self) {}
}

/// Resolver that always yields the same configured identity
#[derive(Debug, Clone)]
pub struct FixedResolver {
    identity: Identity,
}

impl FixedResolver {
    #[must_use]
    pub const fn new(identity: Identity) -> Self {
        Self { identity }
    }
}

#[async_trait]
impl IdentityResolver for FixedResolver {
    fn name(&self) -> &'static str {
        "fixed"
    }

    async fn poll(&mut self) -> Result<Option<Identity>, AdapterError> {
        Ok(Some(self.identity.clone()))
    }
}

/// Poll `resolver` every `interval` until it yields an identity
///
/// No overall timeout is applied here; callers that want one wrap this
/// future themselves.
///
/// # Errors
///
/// Returns `Cancelled` when `cancel` fires and `DeviceAbsent` when the
/// resolver reports its source is gone.
pub async fn watch(
    resolver: &mut dyn IdentityResolver,
    interval: Duration,
    cancel: &CancellationToken,
) -> Result<Identity, AdapterError> {
    resolver.reset();

    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    tracing::debug!(resolver = resolver.name(), ?interval, "waiting for identity");

    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => return Err(AdapterError::Cancelled),
            _ = ticker.tick() => {}
        }

        let polled = tokio::select! {
            biased;
            () = cancel.cancelled() => return Err(AdapterError::Cancelled),
            polled = resolver.poll() => polled,
        };

        match polled {
            Ok(Some(identity)) => {
                tracing::info!(resolver = resolver.name(), %identity, "identity resolved");
                return Ok(identity);
            }
            Ok(None) => {}
            Err(e @ (AdapterError::Cancelled | AdapterError::DeviceAbsent(_))) => return Err(e),
            Err(e) => {
                tracing::warn!(resolver = resolver.name(), error = %e, "identity poll failed");
            }
        }
    }
}
