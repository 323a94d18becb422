use core::time::Duration;
use std::thread;

use crate::{
    error::{Error, Result},
    layout::IdLayout,
    rand::RandSource,
    time::{DayEpoch, TimeSource},
};

/// Everything needed to turn clock readings into IDs for one worker.
#[derive(Clone, Copy, Debug)]
pub struct WorkerSettings {
    pub worker_id: u64,
    pub layout: IdLayout,
    pub epoch: DayEpoch,
    pub start: SequenceStart,
    /// How often a caller blocked on sequence exhaustion re-reads the clock.
    pub exhaustion_poll: Duration,
}

impl WorkerSettings {
    /// Packs `cursor` into an ID for this worker.
    #[inline]
    pub fn encode(&self, cursor: SequenceCursor) -> Result<u64> {
        self.layout
            .combine(self.worker_id, cursor.day_offset, cursor.sequence)
    }

    /// Recovers the cursor an ID was built from.
    #[inline]
    pub const fn cursor_of(&self, id: u64) -> SequenceCursor {
        let parts = self.layout.decompose(id);
        SequenceCursor {
            day_offset: parts.day_offset,
            sequence: parts.sequence,
        }
    }

    /// Fails unless the worker id fits the layout.
    pub fn check_worker_id(&self) -> Result<()> {
        self.layout.combine(self.worker_id, 0, 0).map(|_| ())
    }
}

/// How the sequence restarts when the day offset advances.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SequenceStart {
    /// Every day starts at sequence 0.
    Zero,
    /// Every day starts at a pseudo-random sequence in `0..ceiling`, so the
    /// first IDs of a day are not trivially predictable.
    Randomized { ceiling: u64 },
}

impl SequenceStart {
    /// Returns the first sequence of a new day.
    #[inline]
    pub fn initial(&self, rng: &impl RandSource) -> u64 {
        match *self {
            Self::Zero => 0,
            Self::Randomized { ceiling } if ceiling > 1 => rng.rand() % ceiling,
            Self::Randomized { .. } => 0,
        }
    }
}

/// The `(day_offset, sequence)` pair of the last issued ID.
///
/// Owned exclusively by the ring buffer producer, or packed into the atomic
/// state of the synchronous generator.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SequenceCursor {
    pub day_offset: u64,
    pub sequence: u64,
}

/// The outcome of [`SequenceCursor::step`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CursorStep {
    /// The next pair to issue.
    Advanced(SequenceCursor),
    /// `day_offset` has no sequence room left; wait for the next day.
    Exhausted { day_offset: u64 },
}

impl SequenceCursor {
    /// Computes the pair that follows `current` given the observed day.
    ///
    /// - No previous pair, or a later day: start the day at `start()`.
    /// - Same day: increment the sequence, or report exhaustion at
    ///   `max_sequence`.
    /// - Earlier day (the clock moved backwards): keep the current day and
    ///   continue its sequence, so no pair is ever issued twice.
    #[inline]
    pub fn step(
        current: Option<Self>,
        observed_day: u64,
        max_sequence: u64,
        start: impl FnOnce() -> u64,
    ) -> CursorStep {
        match current {
            Some(cursor) if observed_day <= cursor.day_offset => {
                if cursor.sequence < max_sequence {
                    CursorStep::Advanced(Self {
                        day_offset: cursor.day_offset,
                        sequence: cursor.sequence + 1,
                    })
                } else {
                    CursorStep::Exhausted {
                        day_offset: cursor.day_offset,
                    }
                }
            }
            _ => CursorStep::Advanced(Self {
                day_offset: observed_day,
                sequence: start().min(max_sequence),
            }),
        }
    }
}

/// Why [`wait_for_next_day`] returned without an error.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum TickWait {
    NextDay,
    Cancelled,
}

/// Blocks the calling thread until the clock reports a day after
/// `day_offset`.
///
/// The clock is re-read every `poll`. If it has not moved at all between two
/// reads it is considered frozen and the exhaustion becomes fatal.
pub(crate) fn wait_for_next_day<T: TimeSource + ?Sized>(
    clock: &T,
    epoch: &DayEpoch,
    day_offset: u64,
    poll: Duration,
    cancelled: impl Fn() -> bool,
) -> Result<TickWait> {
    #[cfg(feature = "tracing")]
    tracing::warn!(day_offset, "sequence exhausted, waiting for the next day");

    let mut last = clock.current_millis();
    loop {
        if cancelled() {
            return Ok(TickWait::Cancelled);
        }
        thread::sleep(poll);

        let now = clock.current_millis();
        if epoch.current_day_offset(now)? > day_offset {
            #[cfg(feature = "tracing")]
            tracing::info!(day_offset, "day rolled over, sequence available again");
            return Ok(TickWait::NextDay);
        }
        if now == last {
            #[cfg(feature = "tracing")]
            tracing::error!(day_offset, now, "clock frozen while the sequence is exhausted");
            return Err(Error::SequenceExhausted { day_offset });
        }
        last = now;
    }
}
