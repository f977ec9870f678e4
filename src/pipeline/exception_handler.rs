//! Exception handlers.
//!
//! A processor routes every non-alert handler failure here and then keeps
//! consuming at the next sequence. An exception handler that itself fails
//! ends the processor loop: its error is not caught.

use crate::pipeline::{PipelineError, Result};

/// Receives errors raised by an [`EventHandler`].
///
/// [`EventHandler`]: crate::pipeline::EventHandler
pub trait ExceptionHandler<T>: Send {
    /// Handle a failure while processing `sequence`. `event` is the slot
    /// being processed, or `None` when the failure came from an alarm tick.
    ///
    /// Return `Ok(())` to let the processor skip the event and continue;
    /// return an error to shut the processor down.
    fn handle(&mut self, error: &PipelineError, sequence: i64, event: Option<&T>) -> Result<()>;
}

/// Exception handler that logs the failure and continues.
#[derive(Debug, Default)]
pub struct LoggingExceptionHandler;

impl LoggingExceptionHandler {
    pub fn new() -> Self {
        Self
    }
}

impl<T: std::fmt::Debug> ExceptionHandler<T> for LoggingExceptionHandler {
    fn handle(&mut self, error: &PipelineError, sequence: i64, event: Option<&T>) -> Result<()> {
        tracing::error!(sequence, ?event, %error, "event handler failed, skipping event");
        Ok(())
    }
}
