use core::hint;
use std::sync::Arc;

use crossbeam_utils::{Backoff, CachePadded};
use portable_atomic::{AtomicBool, AtomicU64, Ordering};

use crate::{
    config::ConsumerWait,
    error::{Error, Result},
    generator::IdGenerator,
    rand::RandSource,
    ring::{RingBuffer, RingBufferProducer},
    sequence::WorkerSettings,
    time::TimeSource,
};

/// Empty polls within one call after which the buffer counts as stalled.
const STALL_POLLS: u32 = 1 << 14;

/// Consumer side of the buffered pipeline: pops IDs that a
/// [`RingBufferProducer`] pre-computed into a [`RingBuffer`].
///
/// After [`close`](IdGenerator::close) the producer is stopped but IDs
/// already buffered are still handed out; once they are drained every call
/// fails with [`Error::GeneratorClosed`]. If the producer dies on its own
/// (epoch exceeded, sequence exhausted on a frozen clock), callers drain the
/// buffer and then receive that error.
#[derive(Debug)]
pub struct BufferedGenerator {
    ring: Arc<RingBuffer>,
    producer: RingBufferProducer,
    wait: ConsumerWait,
    consumed: CachePadded<AtomicU64>,
    empty_polls: AtomicU64,
    /// Set by the first consumer to hit [`STALL_POLLS`], cleared by the next
    /// successful pop. One warning per episode, however many consumers wait.
    stalled: AtomicBool,
    closed: AtomicBool,
}

impl BufferedGenerator {
    /// Allocates the ring buffer and spawns its producer.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] for a bad capacity or fill factor,
    /// [`Error::OutOfRange`] for a worker id beyond the layout, and
    /// [`Error::ProducerSpawn`] if the thread cannot start.
    pub fn start<T, R>(
        settings: WorkerSettings,
        capacity: usize,
        fill_factor: f64,
        wait: ConsumerWait,
        clock: T,
        rng: R,
    ) -> Result<Self>
    where
        T: TimeSource + Send + 'static,
        R: RandSource + Send + 'static,
    {
        let (writer, ring) = RingBuffer::with_capacity(capacity)?;
        let producer = RingBufferProducer::spawn(settings, fill_factor, writer, clock, rng)?;
        Ok(Self {
            ring,
            producer,
            wait,
            consumed: CachePadded::new(AtomicU64::new(0)),
            empty_polls: AtomicU64::new(0),
            stalled: AtomicBool::new(false),
            closed: AtomicBool::new(false),
        })
    }

    pub const fn producer(&self) -> &RingBufferProducer {
        &self.producer
    }

    pub const fn ring(&self) -> &Arc<RingBuffer> {
        &self.ring
    }

    pub fn consumed(&self) -> u64 {
        self.consumed.load(Ordering::Relaxed)
    }

    pub fn empty_polls(&self) -> u64 {
        self.empty_polls.load(Ordering::Relaxed)
    }

    /// Whether some consumer has found the buffer empty for a sustained
    /// stretch and no ID has been handed out since.
    pub fn is_stalled(&self) -> bool {
        self.stalled.load(Ordering::Acquire)
    }

    #[inline]
    fn take(&self) -> Option<u64> {
        let id = self.ring.pop()?;
        self.consumed.fetch_add(1, Ordering::Relaxed);
        self.producer.notify_consumed();
        if self.stalled.load(Ordering::Relaxed) {
            self.stalled.store(false, Ordering::Release);
            #[cfg(feature = "tracing")]
            tracing::info!("ring buffer refilled");
        }
        Some(id)
    }

    pub fn try_next_id(&self) -> Result<u64> {
        if let Some(id) = self.take() {
            return Ok(id);
        }
        self.empty_polls.fetch_add(1, Ordering::Relaxed);

        let backoff = Backoff::new();
        let mut polls: u32 = 0;
        loop {
            if self.producer.is_stopped() {
                // Catch IDs pushed just before the producer exited.
                if let Some(id) = self.take() {
                    return Ok(id);
                }
                if self.closed.load(Ordering::Acquire) {
                    return Err(Error::GeneratorClosed);
                }
                return Err(self
                    .producer
                    .fatal()
                    .cloned()
                    .unwrap_or(Error::GeneratorClosed));
            }

            match self.wait {
                ConsumerWait::Spin => hint::spin_loop(),
                ConsumerWait::Backoff => backoff.snooze(),
            }
            if let Some(id) = self.take() {
                return Ok(id);
            }

            polls = polls.saturating_add(1);
            if polls == STALL_POLLS && !self.stalled.swap(true, Ordering::AcqRel) {
                #[cfg(feature = "tracing")]
                tracing::warn!(
                    state = ?self.producer.state(),
                    capacity = self.ring.capacity(),
                    "ring buffer stayed empty, producer is falling behind"
                );
            }
        }
    }
}

impl IdGenerator for BufferedGenerator {
    fn next_id(&self) -> Result<u64> {
        self.try_next_id()
    }

    fn close(&self) {
        self.closed.store(true, Ordering::Release);
        self.producer.stop();
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}
