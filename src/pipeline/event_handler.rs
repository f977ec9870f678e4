//! Event handler contract.

use crate::pipeline::Result;

/// Consumer-side callback driven by a processor loop.
///
/// `on_event` is called at most once per sequence with `Some(event)`, in
/// ascending sequence order. When the processor's idle-tick interval is
/// configured, it is additionally called once per loop iteration with
/// `None`, an alarm tick that lets the handler run timer-driven work even
/// while the buffer is idle. Handlers must treat `None` as "no event", not
/// as end of stream.
///
/// `batch_size` is the number of events in the batch returned by the
/// current wait (0 for alarm ticks); `end_of_batch` marks the last event of
/// that batch, which is the natural point to flush any work the handler
/// accumulated across the batch.
///
/// Returning an error does not stop the pipeline: the error is routed to
/// the processor's exception handler and consumption resumes at the next
/// sequence. Returning [`PipelineError::Alert`] requests a clean shutdown
/// of the processor loop.
///
/// [`PipelineError::Alert`]: crate::pipeline::PipelineError::Alert
pub trait EventHandler<T>: Send {
    /// Called once before the processing loop starts.
    fn on_start(&mut self) {}

    /// Called once after the processing loop exits.
    fn on_shutdown(&mut self) {}

    /// Process one event (or an alarm tick when `event` is `None`).
    fn on_event(
        &mut self,
        sequence: i64,
        batch_size: i64,
        end_of_batch: bool,
        event: Option<&mut T>,
    ) -> Result<()>;
}
