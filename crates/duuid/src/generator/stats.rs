/// Counters describing a generator's activity since it started.
///
/// A growing `empty_polls` alongside few `pauses` means the producer is
/// falling behind its consumers.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct GeneratorStats {
    /// IDs computed. Equals `consumed` in synchronous mode.
    pub produced: u64,
    /// IDs handed to callers.
    pub consumed: u64,
    /// `next_id()` calls that found the ring buffer empty on first try.
    pub empty_polls: u64,
    /// Times the producer paused at the fill threshold.
    pub pauses: u64,
}

impl GeneratorStats {
    /// IDs produced but not yet handed out.
    pub const fn buffered(&self) -> u64 {
        self.produced.saturating_sub(self.consumed)
    }
}
