//! Line-oriented code scanner
//!
//! Reads decoded codes from a device that emits one code per line: a
//! keyboard-wedge scanner, a camera decoder process writing to a FIFO, or
//! stdin. Reading happens on a background task so [`IdentityResolver::poll`]
//! never blocks.

use std::path::Path;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use super::IdentityResolver;
use crate::session::Identity;
use crate::{AdapterError, Error, Result};

/// Identity resolver fed by a line-oriented code source
pub struct LineScanner {
    codes: mpsc::UnboundedReceiver<String>,
    reader: JoinHandle<()>,
}

impl LineScanner {
    /// Open a scanner device path, or stdin when `path` is `-`
    ///
    /// # Errors
    ///
    /// Returns `Device` if the path cannot be opened
    pub async fn open(path: &Path) -> Result<Self> {
        if path == Path::new("-") {
            tracing::info!("reading identity codes from stdin");
            return Ok(Self::from_reader(tokio::io::stdin()));
        }

        let file = tokio::fs::File::open(path).await.map_err(|e| {
            Error::Device(format!("cannot open scanner {}: {e}", path.display()))
        })?;

        tracing::info!(path = %path.display(), "scanner opened");
        Ok(Self::from_reader(file))
    }

    /// Start reading codes from any async byte source
    pub fn from_reader<R>(source: R) -> Self
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        let (tx, rx) = mpsc::unbounded_channel();

        let reader = tokio::spawn(async move {
            let mut lines = BufReader::new(source).lines();
            loop {
                match lines.next_line().await {
                    Ok(Some(line)) => {
                        tracing::trace!(code = %line, "code read");
                        if tx.send(line).is_err() {
                            break;
                        }
                    }
                    Ok(None) => {
                        tracing::warn!("scanner stream ended");
                        break;
                    }
                    Err(e) => {
                        tracing::error!(error = %e, "scanner read failed");
                        break;
                    }
                }
            }
        });

        Self { codes: rx, reader }
    }
}

impl Drop for LineScanner {
    fn drop(&mut self) {
        self.reader.abort();
    }
}

#[async_trait]
impl IdentityResolver for LineScanner {
    fn name(&self) -> &'static str {
        "scanner"
    }

    async fn poll(&mut self) -> std::result::Result<Option<Identity>, AdapterError> {
        let mut latest = None;
        loop {
            match self.codes.try_recv() {
                Ok(code) => {
                    if let Some(identity) = Identity::from_code(&code) {
                        latest = Some(identity);
                    }
                }
                Err(mpsc::error::TryRecvError::Empty) => return Ok(latest),
                Err(mpsc::error::TryRecvError::Disconnected) => {
                    return if latest.is_some() {
                        Ok(latest)
                    } else {
                        Err(AdapterError::DeviceAbsent("scanner closed".to_string()))
                    };
                }
            }
        }
    }

    fn reset(&mut self) {
        while self.codes.try_recv().is_ok() {}
    }
}
