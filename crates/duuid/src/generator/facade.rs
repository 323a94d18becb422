use core::fmt;

use parking_lot::Mutex;
use portable_atomic::{AtomicBool, Ordering};

use crate::{
    allocator::{IdentityInfo, WorkerIdAllocator, WorkerIdentity, allocate_with_timeout},
    config::{GeneratorConfig, GeneratorMode},
    error::Result,
    generator::{AtomicGenerator, BufferedGenerator, GeneratorStats, IdGenerator},
    layout::{DuuId, IdLayout, IdParts},
    rand::{RandSource, ThreadRandom},
    ring::ProducerState,
    sequence::WorkerSettings,
    time::{DayEpoch, SystemClock, TimeSource},
};

enum Engine<T, R> {
    Buffered(BufferedGenerator),
    Synchronous(AtomicGenerator<T, R>),
}

/// The public entry point: a worker identity plus the engine that turns it
/// into IDs.
///
/// Created with a [`GeneratorBuilder`], usually through
/// [`DuuidGenerator::start`], which allocates the worker id first. Share it
/// across threads by reference or in an [`Arc`](std::sync::Arc).
///
/// [`close`](Self::close) runs on drop, so the producer thread never
/// outlives its generator.
///
/// ```
/// use duuid::{DuuidGenerator, GeneratorConfig, WorkerIdentity};
///
/// let generator = DuuidGenerator::builder(GeneratorConfig::default())
///     .build(WorkerIdentity::new(5))
///     .unwrap();
/// let id = generator.next_duuid().unwrap();
/// assert_eq!(id.worker_id(), 5);
/// generator.close();
/// ```
pub struct DuuidGenerator<T = SystemClock, R = ThreadRandom> {
    engine: Engine<T, R>,
    identity: WorkerIdentity,
    settings: WorkerSettings,
    mode: GeneratorMode,
    allocator: Mutex<Option<Box<dyn WorkerIdAllocator>>>,
    closed: AtomicBool,
}

impl DuuidGenerator {
    pub fn builder(config: GeneratorConfig) -> GeneratorBuilder {
        GeneratorBuilder::new(config)
    }

    /// Allocates a worker id with `allocator` and starts a generator on the
    /// system clock.
    ///
    /// # Errors
    ///
    /// Configuration errors are reported before the allocator is contacted.
    /// See [`GeneratorBuilder::start`].
    pub async fn start<A>(config: GeneratorConfig, allocator: A, info: &IdentityInfo) -> Result<Self>
    where
        A: WorkerIdAllocator + 'static,
    {
        GeneratorBuilder::new(config).start(allocator, info).await
    }
}

impl<T, R> DuuidGenerator<T, R>
where
    T: TimeSource + Send + Sync + 'static,
    R: RandSource + Send + Sync + 'static,
{
    fn engine(&self) -> &dyn IdGenerator {
        match &self.engine {
            Engine::Buffered(g) => g,
            Engine::Synchronous(g) => g,
        }
    }

    /// Returns the next ID.
    ///
    /// # Errors
    ///
    /// See [`IdGenerator::next_id`].
    #[inline]
    pub fn next_id(&self) -> Result<u64> {
        self.engine().next_id()
    }

    /// Like [`next_id`](Self::next_id), as a typed view.
    ///
    /// # Errors
    ///
    /// See [`IdGenerator::next_id`].
    pub fn next_duuid(&self) -> Result<DuuId> {
        self.next_id()
            .map(|id| DuuId::from_raw(self.settings.layout, id))
    }
}

impl<T, R> DuuidGenerator<T, R> {
    /// Stops the producer and releases the allocator. Idempotent.
    ///
    /// Buffered IDs remain available until drained.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        match &self.engine {
            Engine::Buffered(g) => g.close(),
            Engine::Synchronous(g) => g.close(),
        }
        drop(self.allocator.lock().take());

        #[cfg(feature = "tracing")]
        tracing::info!(
            worker_id = self.identity.worker_id(),
            stats = ?self.stats(),
            "generator closed"
        );
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    pub const fn worker_identity(&self) -> WorkerIdentity {
        self.identity
    }

    pub const fn layout(&self) -> IdLayout {
        self.settings.layout
    }

    pub const fn epoch(&self) -> DayEpoch {
        self.settings.epoch
    }

    pub const fn mode(&self) -> GeneratorMode {
        self.mode
    }

    /// Splits an ID with this generator's layout.
    pub const fn decompose(&self, id: u64) -> IdParts {
        self.settings.layout.decompose(id)
    }

    /// Whether an allocator is still held, i.e. the generator was started
    /// through one and has not been closed.
    pub fn holds_allocator(&self) -> bool {
        self.allocator.lock().is_some()
    }

    pub fn stats(&self) -> GeneratorStats {
        match &self.engine {
            Engine::Buffered(g) => GeneratorStats {
                produced: g.producer().produced(),
                consumed: g.consumed(),
                empty_polls: g.empty_polls(),
                pauses: g.producer().pauses(),
            },
            Engine::Synchronous(g) => GeneratorStats {
                produced: g.issued(),
                consumed: g.issued(),
                empty_polls: 0,
                pauses: 0,
            },
        }
    }

    /// The producer's lifecycle state; `None` in synchronous mode.
    pub fn producer_state(&self) -> Option<ProducerState> {
        match &self.engine {
            Engine::Buffered(g) => Some(g.producer().state()),
            Engine::Synchronous(_) => None,
        }
    }

    /// The buffered engine, if this generator runs one.
    pub const fn buffered(&self) -> Option<&BufferedGenerator> {
        match &self.engine {
            Engine::Buffered(g) => Some(g),
            Engine::Synchronous(_) => None,
        }
    }
}

impl<T, R> IdGenerator for DuuidGenerator<T, R>
where
    T: TimeSource + Send + Sync + 'static,
    R: RandSource + Send + Sync + 'static,
{
    fn next_id(&self) -> Result<u64> {
        Self::next_id(self)
    }

    fn close(&self) {
        Self::close(self);
    }

    fn is_closed(&self) -> bool {
        Self::is_closed(self)
    }
}

impl<T, R> Drop for DuuidGenerator<T, R> {
    fn drop(&mut self) {
        self.close();
    }
}

impl<T, R> fmt::Debug for DuuidGenerator<T, R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DuuidGenerator")
            .field("identity", &self.identity)
            .field("layout", &self.settings.layout)
            .field("epoch", &self.settings.epoch.epoch())
            .field("mode", &self.mode)
            .field("closed", &self.closed.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

/// Assembles a [`DuuidGenerator`] from a [`GeneratorConfig`], with the clock
/// and random source swappable for tests.
pub struct GeneratorBuilder<T = SystemClock, R = ThreadRandom> {
    config: GeneratorConfig,
    clock: T,
    rng: R,
}

impl GeneratorBuilder {
    pub fn new(config: GeneratorConfig) -> Self {
        Self {
            config,
            clock: SystemClock,
            rng: ThreadRandom,
        }
    }
}

impl<T, R> GeneratorBuilder<T, R>
where
    T: TimeSource + Send + Sync + 'static,
    R: RandSource + Send + Sync + 'static,
{
    pub fn clock<C>(self, clock: C) -> GeneratorBuilder<C, R> {
        GeneratorBuilder {
            config: self.config,
            clock,
            rng: self.rng,
        }
    }

    pub fn rng<G>(self, rng: G) -> GeneratorBuilder<T, G> {
        GeneratorBuilder {
            config: self.config,
            clock: self.clock,
            rng,
        }
    }

    pub const fn config(&self) -> &GeneratorConfig {
        &self.config
    }

    /// Validates the configuration and reads the clock once, so a generator
    /// whose epoch has elapsed never starts.
    fn preflight(&self) -> Result<(IdLayout, DayEpoch)> {
        let layout = self.config.validate()?;
        let epoch = DayEpoch::new(self.config.epoch, &layout)?;
        if let Err(e) = epoch.current_day_offset(self.clock.current_millis()) {
            #[cfg(feature = "tracing")]
            tracing::error!(error = %e, epoch = %self.config.epoch, "refusing to start");
            return Err(e);
        }
        Ok((layout, epoch))
    }

    /// Starts a generator for an identity obtained elsewhere.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidLayout`] / [`Error::InvalidConfig`] if the
    ///   configuration does not validate or the clock reads before the epoch.
    /// - [`Error::EpochExceeded`] if the clock is already past the last
    ///   representable day.
    /// - [`Error::OutOfRange`] if the worker id does not fit the layout.
    /// - [`Error::ProducerSpawn`] if the producer thread cannot start.
    ///
    /// [`Error::InvalidLayout`]: crate::Error::InvalidLayout
    /// [`Error::InvalidConfig`]: crate::Error::InvalidConfig
    /// [`Error::EpochExceeded`]: crate::Error::EpochExceeded
    /// [`Error::OutOfRange`]: crate::Error::OutOfRange
    /// [`Error::ProducerSpawn`]: crate::Error::ProducerSpawn
    pub fn build(self, identity: WorkerIdentity) -> Result<DuuidGenerator<T, R>> {
        let (layout, epoch) = self.preflight()?;
        let config = self.config;
        let settings = WorkerSettings {
            worker_id: identity.worker_id(),
            layout,
            epoch,
            start: config.sequence_start(),
            exhaustion_poll: config.exhaustion_poll(),
        };
        settings.check_worker_id()?;

        let engine = match config.mode {
            GeneratorMode::Buffered => Engine::Buffered(BufferedGenerator::start(
                settings,
                config.ring_buffer_capacity,
                config.fill_factor,
                config.consumer_wait,
                self.clock,
                self.rng,
            )?),
            GeneratorMode::Synchronous => {
                Engine::Synchronous(AtomicGenerator::new(settings, self.clock, self.rng)?)
            }
        };

        #[cfg(feature = "tracing")]
        tracing::info!(
            worker_id = identity.worker_id(),
            mode = ?config.mode,
            layout = ?layout,
            epoch = %config.epoch,
            "generator started"
        );

        Ok(DuuidGenerator {
            engine,
            identity,
            settings,
            mode: config.mode,
            allocator: Mutex::new(None),
            closed: AtomicBool::new(false),
        })
    }

    /// Allocates a worker id, bounded by the configured allocation timeout,
    /// and starts a generator with it. The allocator is held until
    /// [`DuuidGenerator::close`].
    ///
    /// No ID is generated without a successful allocation.
    ///
    /// # Errors
    ///
    /// Configuration and clock errors as in [`build`](Self::build), checked
    /// before the allocator is contacted, and [`Error::AllocationFailed`] if allocation
    /// fails or times out.
    ///
    /// [`Error::AllocationFailed`]: crate::Error::AllocationFailed
    pub async fn start<A>(self, allocator: A, info: &IdentityInfo) -> Result<DuuidGenerator<T, R>>
    where
        A: WorkerIdAllocator + 'static,
    {
        self.preflight()?;
        let identity =
            allocate_with_timeout(&allocator, info, self.config.allocation_timeout()).await?;
        let generator = self.build(identity)?;
        *generator.allocator.lock() = Some(Box::new(allocator));
        Ok(generator)
    }
}

impl<T, R> fmt::Debug for GeneratorBuilder<T, R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GeneratorBuilder")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
