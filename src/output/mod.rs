//! Output devices
//!
//! Printer and expression display sit behind [`OutputRouter`], which routes
//! each [`Directive`] to the device able to apply it. Devices disabled by
//! configuration or missing at startup are simply absent: their directives
//! fail with `DeviceAbsent`, which the flow engine treats as non-fatal.

mod face;
mod printer;

use async_trait::async_trait;

pub use face::{Face, LoggedFace};
pub use printer::{EscPosPrinter, encode_code, encode_text};

use crate::AdapterError;
use crate::directive::{Directive, Expression};

/// A device that can apply directives
#[async_trait]
pub trait OutputDevice: Send {
    /// Short name used in logs
    fn name(&self) -> &'static str;

    /// Apply one directive
    ///
    /// # Errors
    ///
    /// Returns `DeviceAbsent` when the device is not present and `Device` when
    /// the device failed.
    async fn apply(&mut self, directive: &Directive) -> Result<(), AdapterError>;
}

/// Routes directives to the printer or face, whichever is present
#[derive(Default)]
pub struct OutputRouter {
    printer: Option<Box<dyn OutputDevice>>,
    face: Option<Box<dyn Face>>,
}

impl OutputRouter {
    #[must_use]
    pub fn new(printer: Option<Box<dyn OutputDevice>>, face: Option<Box<dyn Face>>) -> Self {
        Self { printer, face }
    }

    /// Router with no devices attached
    #[must_use]
    pub fn none() -> Self {
        Self::default()
    }

    #[must_use]
    pub const fn has_printer(&self) -> bool {
        self.printer.is_some()
    }

    #[must_use]
    pub const fn has_face(&self) -> bool {
        self.face.is_some()
    }

    /// Show an expression without waiting on the device
    ///
    /// Cues accompany state changes and are best-effort.
    pub fn cue(&mut self, expression: Expression) {
        if let Some(face) = &mut self.face {
            if let Err(e) = face.show(expression) {
                tracing::debug!(%expression, error = %e, "expression cue failed");
            }
        }
    }
}

#[async_trait]
impl OutputDevice for OutputRouter {
    fn name(&self) -> &'static str {
        "router"
    }

    async fn apply(&mut self, directive: &Directive) -> Result<(), AdapterError> {
        match directive {
            Directive::Print { .. } | Directive::PrintCode { .. } => match &mut self.printer {
                Some(printer) => printer.apply(directive).await,
                None => Err(AdapterError::DeviceAbsent("printer".to_string())),
            },
            Directive::Express { expression } => match &mut self.face {
                Some(face) => face.show(*expression),
                None => Err(AdapterError::DeviceAbsent("display".to_string())),
            },
            Directive::End => Ok(()),
        }
    }
}
