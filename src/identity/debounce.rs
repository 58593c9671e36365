//! Debouncing of repeated code reads

use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;

use super::IdentityResolver;
use crate::AdapterError;
use crate::session::Identity;

/// Suppresses an identical code read again within `window` of its last read
///
/// A code held in front of the camera keeps refreshing the window, so it only
/// resolves again once it has been out of view for a full window.
pub struct Debounced<R> {
    inner: R,
    window: Duration,
    last: Option<(Identity, Instant)>,
}

impl<R: IdentityResolver> Debounced<R> {
    pub const fn new(inner: R, window: Duration) -> Self {
        Self {
            inner,
            window,
            last: None,
        }
    }
}

#[async_trait]
impl<R: IdentityResolver> IdentityResolver for Debounced<R> {
    fn name(&self) -> &'static str {
        self.inner.name()
    }

    async fn poll(&mut self) -> Result<Option<Identity>, AdapterError> {
        let Some(identity) = self.inner.poll().await? else {
            return Ok(None);
        };

        let now = Instant::now();
        if let Some((last, seen)) = &mut self.last {
            if *last == identity && now.duration_since(*seen) < self.window {
                *seen = now;
                tracing::trace!(%identity, "suppressed repeated read");
                return Ok(None);
            }
        }

        self.last = Some((identity.clone(), now));
        Ok(Some(identity))
    }

    fn reset(&mut self) {
        self.inner.reset();
    }
}
