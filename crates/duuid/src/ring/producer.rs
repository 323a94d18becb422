use core::time::Duration;
use std::{
    sync::{Arc, OnceLock},
    thread::{self, JoinHandle, Thread},
};

use crossbeam_utils::Backoff;
use parking_lot::Mutex;
use portable_atomic::{AtomicBool, AtomicU8, AtomicU64, Ordering};

use crate::{
    error::{Error, Result},
    rand::RandSource,
    ring::{RingBuffer, RingWriter},
    sequence::{CursorStep, SequenceCursor, TickWait, WorkerSettings, wait_for_next_day},
    time::TimeSource,
};

/// How long a paused producer parks once spinning has stopped paying off.
/// Consumers unpark it early when occupancy drops below the threshold.
const PAUSE_PARK: Duration = Duration::from_millis(1);

/// Lifecycle of the background producer.
///
/// ```text
/// CREATED -> FILLING <-> PAUSED -> STOPPED
/// ```
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ProducerState {
    Created = 0,
    Filling = 1,
    Paused = 2,
    Stopped = 3,
}

impl ProducerState {
    const fn from_u8(raw: u8) -> Self {
        match raw {
            0 => Self::Created,
            1 => Self::Filling,
            2 => Self::Paused,
            _ => Self::Stopped,
        }
    }
}

#[derive(Debug, Default)]
struct ProducerShared {
    state: AtomicU8,
    stop: AtomicBool,
    fatal: OnceLock<Error>,
    produced: AtomicU64,
    pauses: AtomicU64,
}

impl ProducerShared {
    fn state(&self) -> ProducerState {
        ProducerState::from_u8(self.state.load(Ordering::Acquire))
    }

    fn set_state(&self, state: ProducerState) {
        self.state.store(state as u8, Ordering::Release);
    }

    fn is_stop_requested(&self) -> bool {
        self.stop.load(Ordering::Acquire)
    }
}

/// Marks the producer stopped however the fill loop exits, including by
/// panic, so consumers never wait on a dead thread.
struct StoppedOnDrop(Arc<ProducerShared>);

impl Drop for StoppedOnDrop {
    fn drop(&mut self) {
        self.0.set_state(ProducerState::Stopped);
    }
}

/// The single background thread that keeps a [`RingBuffer`] filled with
/// pre-computed IDs for one worker.
///
/// The thread is spawned on construction and runs until [`stop`] is called
/// or the producer hits a fatal error (epoch exceeded, sequence exhausted
/// on a frozen clock). IDs already in the buffer stay consumable after the
/// thread has exited.
///
/// [`stop`]: RingBufferProducer::stop
#[derive(Debug)]
pub struct RingBufferProducer {
    shared: Arc<ProducerShared>,
    ring: Arc<RingBuffer>,
    threshold: usize,
    thread: Thread,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl RingBufferProducer {
    /// Spawns the producer thread.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidConfig`] if the fill factor is outside `(0, 1]`.
    /// - [`Error::OutOfRange`] if the worker id does not fit the layout.
    /// - [`Error::ProducerSpawn`] if the thread cannot be started.
    pub fn spawn<T, R>(
        settings: WorkerSettings,
        fill_factor: f64,
        writer: RingWriter,
        clock: T,
        rng: R,
    ) -> Result<Self>
    where
        T: TimeSource + Send + 'static,
        R: RandSource + Send + 'static,
    {
        settings.check_worker_id()?;
        let ring = Arc::clone(writer.ring());
        let threshold = fill_threshold(ring.capacity(), fill_factor)?;
        let shared = Arc::new(ProducerShared::default());

        let fill = FillLoop {
            settings,
            writer,
            clock,
            rng,
            shared: Arc::clone(&shared),
            threshold,
            cursor: None,
            pending: None,
        };
        let handle = thread::Builder::new()
            .name(format!("duuid-producer-{}", settings.worker_id))
            .spawn(move || fill.run())
            .map_err(|e| Error::ProducerSpawn {
                reason: e.to_string(),
            })?;

        Ok(Self {
            shared,
            ring,
            threshold,
            thread: handle.thread().clone(),
            handle: Mutex::new(Some(handle)),
        })
    }

    pub fn state(&self) -> ProducerState {
        self.shared.state()
    }

    pub fn is_stopped(&self) -> bool {
        self.state() == ProducerState::Stopped
    }

    /// The error that stopped the producer, if it did not stop on request.
    pub fn fatal(&self) -> Option<&Error> {
        self.shared.fatal.get()
    }

    /// Occupancy at or above which the producer pauses.
    pub const fn threshold(&self) -> usize {
        self.threshold
    }

    pub fn ring(&self) -> &Arc<RingBuffer> {
        &self.ring
    }

    /// Total IDs pushed into the buffer so far.
    pub fn produced(&self) -> u64 {
        self.shared.produced.load(Ordering::Relaxed)
    }

    /// Number of FILLING -> PAUSED transitions so far.
    pub fn pauses(&self) -> u64 {
        self.shared.pauses.load(Ordering::Relaxed)
    }

    /// Called by consumers after taking an ID: resumes a parked producer as
    /// soon as occupancy falls below the threshold.
    #[inline]
    pub fn notify_consumed(&self) {
        if self.shared.state() == ProducerState::Paused && self.ring.len() < self.threshold {
            self.thread.unpark();
        }
    }

    /// Stops the producer and waits for its thread to exit.
    ///
    /// Idempotent. Buffered IDs are left in place for consumers to drain.
    pub fn stop(&self) {
        self.shared.stop.store(true, Ordering::Release);
        self.thread.unpark();

        let Some(handle) = self.handle.lock().take() else {
            return;
        };
        if handle.join().is_err() {
            #[cfg(feature = "tracing")]
            tracing::error!("producer thread panicked");
        }
    }
}

impl Drop for RingBufferProducer {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Converts a fill factor into the occupancy at which the producer pauses.
///
/// # Errors
///
/// Returns [`Error::InvalidConfig`] unless `fill_factor` is in `(0, 1]`.
pub fn fill_threshold(capacity: usize, fill_factor: f64) -> Result<usize> {
    if !(fill_factor > 0.0 && fill_factor <= 1.0) {
        return Err(Error::InvalidConfig {
            reason: format!("fill factor {fill_factor} must be in (0, 1]"),
        });
    }
    let threshold = (capacity as f64 * fill_factor).ceil() as usize;
    Ok(threshold.clamp(1, capacity))
}

/// State owned by the producer thread.
struct FillLoop<T, R> {
    settings: WorkerSettings,
    writer: RingWriter,
    clock: T,
    rng: R,
    shared: Arc<ProducerShared>,
    threshold: usize,
    cursor: Option<SequenceCursor>,
    /// An ID computed but not yet accepted by the buffer. Kept so the stream
    /// stays strictly increasing.
    pending: Option<u64>,
}

impl<T, R> FillLoop<T, R>
where
    T: TimeSource,
    R: RandSource,
{
    fn run(mut self) {
        let _stopped = StoppedOnDrop(Arc::clone(&self.shared));
        self.shared.set_state(ProducerState::Filling);

        #[cfg(feature = "tracing")]
        tracing::debug!(
            worker_id = self.settings.worker_id,
            capacity = self.writer.ring().capacity(),
            threshold = self.threshold,
            "producer started"
        );

        let backoff = Backoff::new();
        while !self.shared.is_stop_requested() {
            if self.writer.ring().len() >= self.threshold {
                if self.shared.state() != ProducerState::Paused {
                    self.shared.set_state(ProducerState::Paused);
                    self.shared.pauses.fetch_add(1, Ordering::Relaxed);
                }
                if backoff.is_completed() {
                    thread::park_timeout(PAUSE_PARK);
                } else {
                    backoff.snooze();
                }
                continue;
            }
            if self.shared.state() == ProducerState::Paused {
                self.shared.set_state(ProducerState::Filling);
                backoff.reset();
            }

            let id = match self.pending.take() {
                Some(id) => id,
                None => match self.next_id() {
                    Ok(Some(id)) => id,
                    Ok(None) => break,
                    Err(e) => {
                        #[cfg(feature = "tracing")]
                        tracing::error!(error = %e, "producer stopped on a fatal error");
                        let _ = self.shared.fatal.set(e);
                        break;
                    }
                },
            };

            match self.writer.push(id) {
                Ok(()) => {
                    self.shared.produced.fetch_add(1, Ordering::Relaxed);
                }
                Err(id) => {
                    // A consumer claimed the slot but has not released it yet.
                    self.pending = Some(id);
                    backoff.snooze();
                }
            }
        }

        #[cfg(feature = "tracing")]
        tracing::debug!(
            worker_id = self.settings.worker_id,
            produced = self.shared.produced.load(Ordering::Relaxed),
            "producer stopped"
        );
    }

    /// Computes the next ID, blocking across a sequence exhaustion until the
    /// next day. Returns `None` if a stop was requested while blocked.
    fn next_id(&mut self) -> Result<Option<u64>> {
        let settings = self.settings;
        let max_sequence = settings.layout.max_sequence();

        loop {
            let day = settings
                .epoch
                .current_day_offset(self.clock.current_millis())?;
            let rng = &self.rng;
            match SequenceCursor::step(self.cursor, day, max_sequence, || {
                settings.start.initial(rng)
            }) {
                CursorStep::Advanced(next) => {
                    self.cursor = Some(next);
                    return settings.encode(next).map(Some);
                }
                CursorStep::Exhausted { day_offset } => {
                    let shared = &self.shared;
                    let waited = wait_for_next_day(
                        &self.clock,
                        &settings.epoch,
                        day_offset,
                        settings.exhaustion_poll,
                        || shared.is_stop_requested(),
                    )?;
                    if waited == TickWait::Cancelled {
                        return Ok(None);
                    }
                }
            }
        }
    }
}
