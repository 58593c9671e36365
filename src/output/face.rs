//! Expression display

use crate::AdapterError;
use crate::directive::Expression;

/// An animated face showing the robot's mood
///
/// `show` must return immediately; animation runs on the device's own clock.
pub trait Face: Send {
    /// Switch to `expression`
    ///
    /// # Errors
    ///
    /// Returns `Device` if the display rejected the change
    fn show(&mut self, expression: Expression) -> Result<(), AdapterError>;
}

/// Face that records expression changes in the log
///
/// Stands in for the animation window on headless units.
#[derive(Debug, Default)]
pub struct LoggedFace {
    current: Option<Expression>,
}

impl LoggedFace {
    #[must_use]
    pub const fn current(&self) -> Option<Expression> {
        self.current
    }
}

impl Face for LoggedFace {
    fn show(&mut self, expression: Expression) -> Result<(), AdapterError> {
        if self.current != Some(expression) {
            tracing::info!(%expression, "face");
            self.current = Some(expression);
        }
        Ok(())
    }
}
