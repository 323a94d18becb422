use core::fmt;

use crate::allocator::{AllocatorBackend, BackendError};

/// A result type defaulting to the crate's [`Error`].
pub type Result<T, E = Error> = core::result::Result<T, E>;

/// The bit field an out-of-range value was destined for.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Field {
    WorkerId,
    DayOffset,
    Sequence,
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::WorkerId => "worker id",
            Self::DayOffset => "day offset",
            Self::Sequence => "sequence",
        })
    }
}

/// All errors that `duuid` can produce.
///
/// Layout and range errors are never corrected silently: a malformed ID
/// format breaks cluster-wide uniqueness, so they fail fast. Allocation errors
/// surface once, from the startup call. [`Error::GeneratorClosed`] is the only
/// variant callers should expect during an orderly shutdown.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    /// The bit widths do not describe a valid 64-bit layout.
    ///
    /// Raised at configuration time; prevents startup.
    #[error("invalid id layout: {reason}")]
    InvalidLayout { reason: String },

    /// A non-layout configuration value is unusable (ring buffer capacity,
    /// fill factor, randomized start ceiling, unregistered backend, ...).
    #[error("invalid configuration: {reason}")]
    InvalidConfig { reason: String },

    /// A field value exceeded its bit width.
    ///
    /// This is an internal bug rather than a runtime condition.
    #[error("{field} {value} exceeds the maximum of {max}")]
    OutOfRange { field: Field, value: u64, max: u64 },

    /// The day offset no longer fits the layout: the generator's designed
    /// lifetime has elapsed.
    #[error("day offset {day_offset} exceeds the maximum of {max}")]
    EpochExceeded { day_offset: u64, max: u64 },

    /// The sequence for `day_offset` ran out and the clock stopped moving
    /// while waiting for the next day.
    #[error("sequence exhausted for day offset {day_offset}")]
    SequenceExhausted { day_offset: u64 },

    /// The worker id backend could not hand out an identity.
    #[error("worker id allocation failed on the {backend} backend: {source}")]
    AllocationFailed {
        backend: AllocatorBackend,
        #[source]
        source: BackendError,
    },

    /// The operating system refused to start the producer thread.
    #[error("failed to spawn the producer thread: {reason}")]
    ProducerSpawn { reason: String },

    /// `next_id()` was called after `close()` and the buffer is drained.
    #[error("generator is closed")]
    GeneratorClosed,
}

