use core::time::Duration;

use chrono::NaiveDate;

use crate::{
    allocator::AllocatorBackend,
    error::{Error, Result},
    layout::IdLayout,
    ring::fill_threshold,
    sequence::SequenceStart,
    time::{DEFAULT_EPOCH, DayEpoch},
};

/// How `next_id()` obtains IDs.
#[cfg_attr(
    feature = "serde",
    derive(serde::Serialize, serde::Deserialize),
    serde(rename_all = "kebab-case")
)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum GeneratorMode {
    /// A background producer keeps a ring buffer filled; callers pop.
    #[default]
    Buffered,
    /// No background thread; callers advance a shared atomic cursor.
    Synchronous,
}

/// Largest ring buffer a generator will allocate.
pub const MAX_RING_BUFFER_CAPACITY: usize = 1 << 30;

/// What a consumer does while the ring buffer is momentarily empty.
#[cfg_attr(
    feature = "serde",
    derive(serde::Serialize, serde::Deserialize),
    serde(rename_all = "kebab-case")
)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum ConsumerWait {
    /// Busy-spin with a CPU relax hint.
    Spin,
    /// Spin, then yield the thread as the wait grows.
    #[default]
    Backoff,
}

/// Everything that shapes a [`DuuidGenerator`](crate::DuuidGenerator).
///
/// Backend connection parameters are not part of this struct; they travel in
/// the [`IdentityInfo`](crate::IdentityInfo) bag handed to the allocator.
#[cfg_attr(
    feature = "serde",
    derive(serde::Serialize, serde::Deserialize),
    serde(default, deny_unknown_fields)
)]
#[derive(Clone, Debug, PartialEq)]
pub struct GeneratorConfig {
    pub worker_id_bits: u8,
    pub day_bits: u8,
    pub sequence_bits: u8,
    /// Day offset 0. Days are UTC calendar days.
    pub epoch: NaiveDate,
    pub mode: GeneratorMode,
    /// Must be a power of two no larger than [`MAX_RING_BUFFER_CAPACITY`].
    pub ring_buffer_capacity: usize,
    /// Target occupancy ratio in `(0, 1]` at which the producer pauses.
    pub fill_factor: f64,
    pub randomize_sequence_start: bool,
    /// Exclusive upper bound of a randomized day start. At most
    /// `max_sequence + 1`.
    pub random_start_ceiling: u64,
    pub consumer_wait: ConsumerWait,
    pub exhaustion_poll_ms: u64,
    pub allocator_backend: AllocatorBackend,
    pub allocation_timeout_ms: u64,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            worker_id_bits: IdLayout::DEFAULT.worker_id_bits(),
            day_bits: IdLayout::DEFAULT.day_bits(),
            sequence_bits: IdLayout::DEFAULT.sequence_bits(),
            epoch: DEFAULT_EPOCH,
            mode: GeneratorMode::Buffered,
            ring_buffer_capacity: 1 << 16,
            fill_factor: 0.5,
            randomize_sequence_start: false,
            random_start_ceiling: 1024,
            consumer_wait: ConsumerWait::Backoff,
            exhaustion_poll_ms: 10,
            allocator_backend: AllocatorBackend::Static,
            allocation_timeout_ms: 5_000,
        }
    }
}

impl GeneratorConfig {
    /// Checks every constraint and returns the layout to generate with.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidLayout`] if the bit widths do not sum to 63.
    /// - [`Error::InvalidConfig`] for an unusable capacity, fill factor,
    ///   random start ceiling, epoch, or zero duration.
    pub fn validate(&self) -> Result<IdLayout> {
        let layout = self.layout()?;
        DayEpoch::new(self.epoch, &layout)?;

        if self.mode == GeneratorMode::Buffered {
            if self.ring_buffer_capacity < 2
                || !self.ring_buffer_capacity.is_power_of_two()
                || self.ring_buffer_capacity > MAX_RING_BUFFER_CAPACITY
            {
                return Err(invalid(format!(
                    "ring_buffer_capacity {} must be a power of two in 2..={MAX_RING_BUFFER_CAPACITY}",
                    self.ring_buffer_capacity
                )));
            }
            fill_threshold(self.ring_buffer_capacity, self.fill_factor)?;
        }

        if self.randomize_sequence_start {
            let room = layout.max_sequence().saturating_add(1);
            if self.random_start_ceiling == 0 || self.random_start_ceiling > room {
                return Err(invalid(format!(
                    "random_start_ceiling {} must be in 1..={room}",
                    self.random_start_ceiling
                )));
            }
        }
        if self.exhaustion_poll_ms == 0 {
            return Err(invalid("exhaustion_poll_ms must be positive".to_owned()));
        }
        if self.allocation_timeout_ms == 0 {
            return Err(invalid("allocation_timeout_ms must be positive".to_owned()));
        }
        Ok(layout)
    }

    /// The layout described by the three bit widths.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidLayout`] if the widths do not sum to 63.
    pub fn layout(&self) -> Result<IdLayout> {
        IdLayout::new(self.worker_id_bits, self.day_bits, self.sequence_bits)
    }

    pub const fn sequence_start(&self) -> SequenceStart {
        if self.randomize_sequence_start {
            SequenceStart::Randomized {
                ceiling: self.random_start_ceiling,
            }
        } else {
            SequenceStart::Zero
        }
    }

    pub const fn exhaustion_poll(&self) -> Duration {
        Duration::from_millis(self.exhaustion_poll_ms)
    }

    pub const fn allocation_timeout(&self) -> Duration {
        Duration::from_millis(self.allocation_timeout_ms)
    }
}

fn invalid(reason: String) -> Error {
    Error::InvalidConfig { reason }
}
