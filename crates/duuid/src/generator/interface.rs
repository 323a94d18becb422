use crate::error::Result;

/// A source of unique IDs for one worker.
///
/// Implementations are shared across consumer threads by reference.
pub trait IdGenerator: Send + Sync {
    /// Returns the next ID.
    ///
    /// # Errors
    ///
    /// - [`Error::GeneratorClosed`] once closed and, for buffered
    ///   generators, drained.
    /// - [`Error::EpochExceeded`] when the day offset no longer fits.
    /// - [`Error::SequenceExhausted`] when the sequence ran out on a frozen
    ///   clock.
    ///
    /// [`Error::GeneratorClosed`]: crate::Error::GeneratorClosed
    /// [`Error::EpochExceeded`]: crate::Error::EpochExceeded
    /// [`Error::SequenceExhausted`]: crate::Error::SequenceExhausted
    fn next_id(&self) -> Result<u64>;

    /// Stops issuing new IDs. Idempotent.
    fn close(&self);

    fn is_closed(&self) -> bool;
}
