//! Event translators.
//!
//! A translator writes event data into a preallocated slot for a given
//! sequence. Translation is infallible by signature: once a sequence is
//! claimed it will be published, so a consumer can never stall waiting on a
//! claim that was abandoned halfway. Translators that can fail must resolve
//! the failure before mutating the slot.

/// Writes data into a claimed slot.
pub trait EventTranslator<T>: Send + Sync {
    /// Populate `event` for `sequence`. The slot is preallocated and owned
    /// exclusively by the caller for the duration of the call; do not retain
    /// references to it.
    fn translate_to(&self, event: &mut T, sequence: i64);
}

/// Translator backed by a closure.
pub struct ClosureEventTranslator<F> {
    translator_fn: F,
}

impl<F> ClosureEventTranslator<F> {
    pub fn new(translator_fn: F) -> Self {
        Self { translator_fn }
    }
}

impl<T, F> EventTranslator<T> for ClosureEventTranslator<F>
where
    F: Fn(&mut T, i64) + Send + Sync,
{
    fn translate_to(&self, event: &mut T, sequence: i64) {
        (self.translator_fn)(event, sequence);
    }
}

/// Convenience constructor for a closure translator.
pub fn event_translator<T, F>(translator_fn: F) -> ClosureEventTranslator<F>
where
    F: Fn(&mut T, i64) + Send + Sync,
{
    ClosureEventTranslator::new(translator_fn)
}
