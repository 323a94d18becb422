use std::sync::Arc;

use crossbeam_utils::{Backoff, CachePadded};
use portable_atomic::{AtomicU64, Ordering};

use crate::{
    config::MAX_RING_BUFFER_CAPACITY,
    error::{Error, Result},
};

/// One cell of the ring.
///
/// `stamp` tells producer and consumers whose turn it is: a slot at position
/// `pos` is writable when `stamp == pos` and readable when
/// `stamp == pos + 1`. Consumers release it for the next lap by storing
/// `pos + capacity`.
#[derive(Debug)]
struct Slot {
    stamp: AtomicU64,
    value: AtomicU64,
}

/// A bounded single-producer/multi-consumer queue of pre-built IDs.
///
/// Indices grow monotonically and are masked into the slot array, which is
/// why the capacity must be a power of two. No lock is taken on either side:
/// the producer publishes a slot with a release store of its stamp, and
/// consumers claim slots by advancing `head` with a compare-and-swap, so IDs
/// leave the buffer in exactly the order they entered it.
///
/// The producing half is the unique [`RingWriter`] returned by
/// [`RingBuffer::with_capacity`]; the buffer itself is shared by consumers.
#[derive(Debug)]
pub struct RingBuffer {
    slots: Box<[Slot]>,
    mask: u64,
    head: CachePadded<AtomicU64>,
    tail: CachePadded<AtomicU64>,
}

/// The single producing half of a [`RingBuffer`].
///
/// Not `Clone`: owning the writer is what makes the buffer single-producer.
#[derive(Debug)]
pub struct RingWriter {
    ring: Arc<RingBuffer>,
    tail: u64,
}

impl RingBuffer {
    /// Creates an empty buffer and its writer.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] unless `capacity` is a power of two
    /// and at least 2.
    pub fn with_capacity(capacity: usize) -> Result<(RingWriter, Arc<Self>)> {
        if capacity < 2 || !capacity.is_power_of_two() || capacity > MAX_RING_BUFFER_CAPACITY {
            return Err(Error::InvalidConfig {
                reason: format!(
                    "ring buffer capacity {capacity} must be a power of two in 2..={MAX_RING_BUFFER_CAPACITY}"
                ),
            });
        }

        let slots = (0..capacity as u64)
            .map(|pos| Slot {
                stamp: AtomicU64::new(pos),
                value: AtomicU64::new(0),
            })
            .collect();

        let ring = Arc::new(Self {
            slots,
            mask: capacity as u64 - 1,
            head: CachePadded::new(AtomicU64::new(0)),
            tail: CachePadded::new(AtomicU64::new(0)),
        });
        let writer = RingWriter {
            ring: Arc::clone(&ring),
            tail: 0,
        };
        Ok((writer, ring))
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Number of IDs currently buffered.
    ///
    /// A snapshot: concurrent pops and pushes may change it immediately.
    pub fn len(&self) -> usize {
        let head = self.head.load(Ordering::Acquire);
        let tail = self.tail.load(Ordering::Acquire);
        tail.saturating_sub(head) as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Takes the oldest buffered ID, or `None` if the buffer is empty.
    ///
    /// Safe to call from any number of threads at once.
    pub fn pop(&self) -> Option<u64> {
        let backoff = Backoff::new();
        let mut head = self.head.load(Ordering::Relaxed);

        loop {
            let slot = &self.slots[(head & self.mask) as usize];
            let stamp = slot.stamp.load(Ordering::Acquire);
            let lag = stamp.wrapping_sub(head.wrapping_add(1)) as i64;

            if lag == 0 {
                match self.head.compare_exchange_weak(
                    head,
                    head.wrapping_add(1),
                    Ordering::SeqCst,
                    Ordering::Relaxed,
                ) {
                    Ok(_) => {
                        let value = slot.value.load(Ordering::Relaxed);
                        slot.stamp
                            .store(head.wrapping_add(self.mask + 1), Ordering::Release);
                        return Some(value);
                    }
                    Err(current) => {
                        head = current;
                        backoff.spin();
                    }
                }
            } else if lag < 0 {
                // The producer has not filled this lap yet.
                return None;
            } else {
                // Another consumer already took this slot.
                backoff.spin();
                head = self.head.load(Ordering::Relaxed);
            }
        }
    }
}

impl RingWriter {
    /// Appends `value` at the tail.
    ///
    /// # Errors
    ///
    /// Hands `value` back if its slot has not yet been released by the
    /// consumer of the previous lap (the buffer is full).
    pub fn push(&mut self, value: u64) -> core::result::Result<(), u64> {
        let ring = &*self.ring;
        let slot = &ring.slots[(self.tail & ring.mask) as usize];
        if slot.stamp.load(Ordering::Acquire) != self.tail {
            return Err(value);
        }

        slot.value.store(value, Ordering::Relaxed);
        slot.stamp.store(self.tail.wrapping_add(1), Ordering::Release);
        self.tail = self.tail.wrapping_add(1);
        ring.tail.store(self.tail, Ordering::Release);
        Ok(())
    }

    pub fn ring(&self) -> &Arc<RingBuffer> {
        &self.ring
    }
}
