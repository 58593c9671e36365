//! Console speech driver
//!
//! Reads utterances as lines of text and prints what the robot says. Used on
//! machines without audio hardware and for walking through a flow by hand.

use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader, Lines};
use tokio_util::sync::CancellationToken;

use super::SpeechIo;
use crate::AdapterError;

/// Speech driver backed by a text stream
pub struct ConsoleSpeech<R, W> {
    lines: Lines<R>,
    out: W,
    silence_timeout: Duration,
}

impl ConsoleSpeech<BufReader<tokio::io::Stdin>, tokio::io::Stdout> {
    /// Console driver on stdin/stdout
    #[must_use]
    pub fn stdio(silence_timeout: Duration) -> Self {
        Self::new(
            BufReader::new(tokio::io::stdin()),
            tokio::io::stdout(),
            silence_timeout,
        )
    }
}

impl<R, W> ConsoleSpeech<R, W>
where
    R: AsyncBufRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    pub fn new(reader: R, out: W, silence_timeout: Duration) -> Self {
        Self {
            lines: reader.lines(),
            out,
            silence_timeout,
        }
    }

    async fn write_line(&mut self, line: &str) -> Result<(), AdapterError> {
        self.out
            .write_all(line.as_bytes())
            .await
            .and(self.out.write_all(b"\n").await)
            .and(self.out.flush().await)
            .map_err(|e| AdapterError::Device(format!("console write failed: {e}")))
    }
}

#[async_trait]
impl<R, W> SpeechIo for ConsoleSpeech<R, W>
where
    R: AsyncBufRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    fn name(&self) -> &'static str {
        "console"
    }

    async fn capture_utterance(
        &mut self,
        cancel: &CancellationToken,
    ) -> Result<String, AdapterError> {
        let line = tokio::select! {
            biased;
            () = cancel.cancelled() => return Err(AdapterError::Cancelled),
            line = tokio::time::timeout(self.silence_timeout, self.lines.next_line()) => line,
        };

        match line {
            Err(_) => Err(AdapterError::Timeout),
            Ok(Ok(Some(text))) if text.trim().is_empty() => Err(AdapterError::Timeout),
            Ok(Ok(Some(text))) => Ok(text.trim().to_string()),
            Ok(Ok(None)) => Err(AdapterError::DeviceAbsent("console input closed".to_string())),
            Ok(Err(e)) => Err(AdapterError::Device(format!("console read failed: {e}"))),
        }
    }

    async fn speak(&mut self, text: &str, cancel: &CancellationToken) -> Result<(), AdapterError> {
        if cancel.is_cancelled() {
            return Err(AdapterError::Cancelled);
        }
        self.write_line(&format!("robot> {text}")).await
    }
}
