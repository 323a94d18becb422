use core::hint;

use crossbeam_utils::CachePadded;
use portable_atomic::{AtomicBool, AtomicU64, Ordering};
#[cfg(feature = "tracing")]
use tracing::instrument;

use crate::{
    error::{Error, Result},
    generator::IdGenerator,
    rand::RandSource,
    sequence::{CursorStep, SequenceCursor, TickWait, WorkerSettings, wait_for_next_day},
    time::TimeSource,
};

/// Never a valid ID: the sign bit is set.
const UNSTARTED: u64 = u64::MAX;

/// A lock-free generator without a background thread.
///
/// The last issued ID is the whole state, kept in one [`AtomicU64`]. Each
/// call decodes it into a cursor, steps the cursor, and publishes the new ID
/// with a compare-and-swap, retrying when another thread won the race. Suited
/// to low-rate deployments where a dedicated producer thread is not worth it.
///
/// A caller that hits sequence exhaustion blocks until the next day, like
/// the buffered producer does.
pub struct AtomicGenerator<T, R> {
    state: CachePadded<AtomicU64>,
    settings: WorkerSettings,
    clock: T,
    rng: R,
    issued: AtomicU64,
    closed: AtomicBool,
}

impl<T, R> AtomicGenerator<T, R> {
    pub const fn settings(&self) -> &WorkerSettings {
        &self.settings
    }

    /// Number of IDs handed out so far.
    pub fn issued(&self) -> u64 {
        self.issued.load(Ordering::Relaxed)
    }

    /// Makes every later call fail with [`Error::GeneratorClosed`], including
    /// callers blocked on sequence exhaustion.
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

impl<T, R> AtomicGenerator<T, R>
where
    T: TimeSource,
    R: RandSource,
{
    /// # Errors
    ///
    /// Returns [`Error::OutOfRange`] if the worker id does not fit the layout.
    pub fn new(settings: WorkerSettings, clock: T, rng: R) -> Result<Self> {
        settings.check_worker_id()?;
        Ok(Self {
            state: CachePadded::new(AtomicU64::new(UNSTARTED)),
            settings,
            clock,
            rng,
            issued: AtomicU64::new(0),
            closed: AtomicBool::new(false),
        })
    }

    #[cfg_attr(feature = "tracing", instrument(level = "trace", skip(self)))]
    pub fn try_next_id(&self) -> Result<u64> {
        let settings = &self.settings;
        let max_sequence = settings.layout.max_sequence();

        loop {
            if self.is_closed() {
                return Err(Error::GeneratorClosed);
            }

            let current_raw = self.state.load(Ordering::Acquire);
            let current = (current_raw != UNSTARTED).then(|| settings.cursor_of(current_raw));
            let day = settings
                .epoch
                .current_day_offset(self.clock.current_millis())?;

            match SequenceCursor::step(current, day, max_sequence, || {
                settings.start.initial(&self.rng)
            }) {
                CursorStep::Advanced(next) => {
                    let next_raw = settings.encode(next)?;
                    if self
                        .state
                        .compare_exchange(
                            current_raw,
                            next_raw,
                            Ordering::AcqRel,
                            Ordering::Relaxed,
                        )
                        .is_ok()
                    {
                        self.issued.fetch_add(1, Ordering::Relaxed);
                        return Ok(next_raw);
                    }
                    // Another thread published first; recompute from its state.
                    hint::spin_loop();
                }
                CursorStep::Exhausted { day_offset } => {
                    let waited = wait_for_next_day(
                        &self.clock,
                        &settings.epoch,
                        day_offset,
                        settings.exhaustion_poll,
                        || self.is_closed(),
                    )?;
                    if waited == TickWait::Cancelled {
                        return Err(Error::GeneratorClosed);
                    }
                }
            }
        }
    }
}

impl<T, R> IdGenerator for AtomicGenerator<T, R>
where
    T: TimeSource + Send + Sync,
    R: RandSource + Send + Sync,
{
    fn next_id(&self) -> Result<u64> {
        self.try_next_id()
    }

    fn close(&self) {
        Self::close(self);
    }

    fn is_closed(&self) -> bool {
        Self::is_closed(self)
    }
}
