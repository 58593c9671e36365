//! ESC/POS thermal printer
//!
//! Jobs are encoded up front and written to the printer's serial device in
//! one go. The port's baud rate is set outside the process (udev/stty).

use std::path::Path;

use async_trait::async_trait;
use tokio::io::{AsyncWrite, AsyncWriteExt};

use super::OutputDevice;
use crate::directive::Directive;
use crate::{AdapterError, Error, Result};

/// Receipt mode, sent once when the port is opened
const RECEIPT_MODE: [u8; 7] = [0x1F, 0x2F, 0x0B, 0x00, 0x01, 0x00, 0x00];

/// Label verification, sent once after receipt mode
const LABEL_VERIFICATION: [u8; 2] = [0x1F, 0x63];

/// ESC @
const INITIALIZE: [u8; 2] = [0x1B, 0x40];

/// ESC a 0
const ALIGN_LEFT: [u8; 3] = [0x1B, 0x61, 0x00];

/// ESC a 1
const ALIGN_CENTER: [u8; 3] = [0x1B, 0x61, 0x01];

/// QR module size (dots per module)
const QR_MODULE_SIZE: u8 = 10;

/// Largest payload a QR symbol can hold in byte mode
const QR_MAX_BYTES: usize = 7089;

/// Thermal printer speaking ESC/POS over a byte sink
pub struct EscPosPrinter<W = tokio::fs::File> {
    sink: W,
    width: usize,
    feed_lines: u8,
}

impl EscPosPrinter<tokio::fs::File> {
    /// Open the printer's serial device and put it in receipt mode
    ///
    /// # Errors
    ///
    /// Returns `Device` if the device cannot be opened or initialized
    pub async fn open(path: &Path, width: usize, feed_lines: u8) -> Result<Self> {
        let file = tokio::fs::OpenOptions::new()
            .write(true)
            .open(path)
            .await
            .map_err(|e| Error::Device(format!("cannot open printer {}: {e}", path.display())))?;

        let printer = Self::with_sink(file, width, feed_lines)
            .await
            .map_err(|e| Error::Device(format!("printer setup failed: {e}")))?;

        tracing::info!(path = %path.display(), width, "printer ready");
        Ok(printer)
    }
}

impl<W: AsyncWrite + Unpin + Send> EscPosPrinter<W> {
    /// Wrap an already-open sink and send the setup sequence
    ///
    /// # Errors
    ///
    /// Returns `Device` if the setup bytes cannot be written
    pub async fn with_sink(
        mut sink: W,
        width: usize,
        feed_lines: u8,
    ) -> std::result::Result<Self, AdapterError> {
        for command in [&RECEIPT_MODE[..], &LABEL_VERIFICATION[..]] {
            write_all(&mut sink, command).await?;
            // the controller drops bytes sent right after a mode switch
            tokio::time::sleep(std::time::Duration::from_millis(200)).await;
        }

        Ok(Self {
            sink,
            width: width.max(8),
            feed_lines,
        })
    }

    /// Consume the printer, returning the sink
    pub fn into_inner(self) -> W {
        self.sink
    }

    async fn print_job(&mut self, mut job: Vec<u8>) -> std::result::Result<(), AdapterError> {
        job.extend_from_slice(&feed(self.feed_lines));
        write_all(&mut self.sink, &job).await?;
        tracing::debug!(bytes = job.len(), "print job sent");
        Ok(())
    }
}

#[async_trait]
impl<W: AsyncWrite + Unpin + Send> OutputDevice for EscPosPrinter<W> {
    fn name(&self) -> &'static str {
        "printer"
    }

    async fn apply(&mut self, directive: &Directive) -> std::result::Result<(), AdapterError> {
        match directive {
            Directive::Print { text } => {
                let job = encode_text(text, self.width);
                self.print_job(job).await
            }
            Directive::PrintCode { data } => {
                let job = encode_code(data)?;
                self.print_job(job).await
            }
            Directive::Express { .. } | Directive::End => Ok(()),
        }
    }
}

async fn write_all<W: AsyncWrite + Unpin>(
    sink: &mut W,
    bytes: &[u8],
) -> std::result::Result<(), AdapterError> {
    sink.write_all(bytes)
        .await
        .map_err(|e| AdapterError::Device(format!("printer write failed: {e}")))?;
    sink.flush()
        .await
        .map_err(|e| AdapterError::Device(format!("printer flush failed: {e}")))
}

/// Encode left-aligned text wrapped to `width` columns
#[must_use]
pub fn encode_text(text: &str, width: usize) -> Vec<u8> {
    let mut out = ALIGN_LEFT.to_vec();
    for line in wrap(text, width) {
        out.extend(line.chars().map(cp437));
        out.push(b'\n');
    }
    out
}

/// Encode a centered QR code carrying `data`
///
/// # Errors
///
/// Returns `Device` if `data` does not fit in a single symbol
pub fn encode_code(data: &str) -> std::result::Result<Vec<u8>, AdapterError> {
    let payload: Vec<u8> = data
        .chars()
        .map(|c| if c.is_ascii() { c as u8 } else { b'?' })
        .collect();
    if payload.len() > QR_MAX_BYTES {
        return Err(AdapterError::Device(format!(
            "code payload too long: {} bytes",
            payload.len()
        )));
    }

    // pL + pH * 256 counts the payload plus the three header bytes of fn 80
    let stored = payload.len() + 3;
    #[allow(clippy::cast_possible_truncation)]
    let (p_l, p_h) = ((stored % 256) as u8, (stored / 256) as u8);

    let mut out = INITIALIZE.to_vec();
    out.extend_from_slice(&[0x1D, 0x28, 0x6B, 0x03, 0x00, 0x31, 0x43, QR_MODULE_SIZE]);
    out.extend_from_slice(&[0x1D, 0x28, 0x6B, 0x03, 0x00, 0x31, 0x45, 0x30]);
    out.extend_from_slice(&[0x1D, 0x28, 0x6B, p_l, p_h, 0x31, 0x50, 0x30]);
    out.extend_from_slice(&payload);
    out.extend_from_slice(&ALIGN_CENTER);
    out.extend_from_slice(&[0x1D, 0x28, 0x6B, 0x03, 0x00, 0x31, 0x51, 0x30]);
    out.extend_from_slice(b"\n\n\n");
    Ok(out)
}

/// ESC d n
const fn feed(lines: u8) -> [u8; 3] {
    [0x1B, 0x64, lines]
}

/// Map a character to code page 437, `?` when unmapped
fn cp437(c: char) -> u8 {
    match c {
        c if c.is_ascii() => c as u8,
        'ü' => 0x81,
        'é' => 0x82,
        'ä' => 0x84,
        'ö' => 0x94,
        'Ä' => 0x8E,
        'Ö' => 0x99,
        'Ü' => 0x9A,
        'ß' => 0xE1,
        '°' => 0xF8,
        _ => b'?',
    }
}

/// Greedy word wrap; words longer than a line are split
fn wrap(text: &str, width: usize) -> Vec<String> {
    let mut lines = Vec::new();

    for paragraph in text.lines() {
        let mut current = String::new();
        let mut current_len = 0;

        for word in paragraph.split_whitespace() {
            let mut word: Vec<char> = word.chars().collect();

            while word.len() > width {
                if current_len > 0 {
                    lines.push(std::mem::take(&mut current));
                    current_len = 0;
                }
                let rest = word.split_off(width);
                lines.push(word.into_iter().collect());
                word = rest;
            }

            let needed = if current_len == 0 { word.len() } else { current_len + 1 + word.len() };
            if needed > width {
                lines.push(std::mem::take(&mut current));
                current_len = 0;
            }
            if current_len > 0 {
                current.push(' ');
                current_len += 1;
            }
            current.extend(word.iter());
            current_len += word.len();
        }

        lines.push(current);
    }

    lines
}
