use core::time::Duration;
use std::{
    collections::HashSet,
    sync::{
        Arc,
        atomic::{AtomicU64, AtomicUsize, Ordering},
    },
    thread,
    time::Instant,
};

use futures::{FutureExt, future::BoxFuture};

use crate::{
    allocator::{
        AllocatorBackend, AllocatorRegistry, BackendError, IdentityInfo, MemoryLeaseStore,
        StaticAllocator, WorkerIdAllocator, WorkerIdentity, params,
    },
    config::{ConsumerWait, GeneratorConfig, GeneratorMode},
    error::Error,
    generator::{DuuidGenerator, GeneratorBuilder},
    layout::IdLayout,
    rand::RandSource,
    ring::ProducerState,
    time::{MILLIS_PER_DAY, TimeSource},
};

/// 2025-01-01T00:00:00Z, day offset 0 of the default epoch.
const EPOCH_MILLIS: u64 = 20_089 * MILLIS_PER_DAY;

const fn day(offset: u64) -> u64 {
    EPOCH_MILLIS + offset * MILLIS_PER_DAY
}

#[derive(Clone, Debug, Default)]
struct MockClock(Arc<AtomicU64>);

impl MockClock {
    fn at(millis: u64) -> Self {
        Self(Arc::new(AtomicU64::new(millis)))
    }

    fn set(&self, millis: u64) {
        self.0.store(millis, Ordering::SeqCst);
    }
}

impl TimeSource for MockClock {
    fn current_millis(&self) -> u64 {
        self.0.load(Ordering::SeqCst)
    }
}

/// Advances one millisecond per read, so a waiting producer never sees a
/// frozen clock.
#[derive(Clone, Debug)]
struct TickingClock(Arc<AtomicU64>);

impl TickingClock {
    fn at(millis: u64) -> Self {
        Self(Arc::new(AtomicU64::new(millis)))
    }

    fn set(&self, millis: u64) {
        self.0.store(millis, Ordering::SeqCst);
    }
}

impl TimeSource for TickingClock {
    fn current_millis(&self) -> u64 {
        self.0.fetch_add(1, Ordering::SeqCst)
    }
}

/// Moves forward by `step` on every read.
struct SteppingClock {
    now: AtomicU64,
    step: u64,
}

impl TimeSource for SteppingClock {
    fn current_millis(&self) -> u64 {
        self.now.fetch_add(self.step, Ordering::SeqCst)
    }
}

struct FixedRand(u64);

impl RandSource for FixedRand {
    fn rand(&self) -> u64 {
        self.0
    }
}

fn sync_config() -> GeneratorConfig {
    GeneratorConfig {
        mode: GeneratorMode::Synchronous,
        exhaustion_poll_ms: 1,
        ..GeneratorConfig::default()
    }
}

fn buffered_config(capacity: usize, fill_factor: f64) -> GeneratorConfig {
    GeneratorConfig {
        ring_buffer_capacity: capacity,
        fill_factor,
        exhaustion_poll_ms: 1,
        ..GeneratorConfig::default()
    }
}

/// 8 sequences per day.
fn tiny_sequence(config: GeneratorConfig) -> GeneratorConfig {
    GeneratorConfig {
        worker_id_bits: 40,
        day_bits: 20,
        sequence_bits: 3,
        ..config
    }
}

fn wait_until(what: &str, mut cond: impl FnMut() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(10);
    while !cond() {
        assert!(Instant::now() < deadline, "timed out waiting for {what}");
        thread::sleep(Duration::from_millis(1));
    }
}

fn run_ids_increment_within_a_day(config: GeneratorConfig) {
    let generator = GeneratorBuilder::new(config)
        .clock(MockClock::at(day(100) + 1_000))
        .build(WorkerIdentity::new(5))
        .unwrap();

    for expected in 0..3 {
        let id = generator.next_duuid().unwrap();
        assert_eq!(id.worker_id(), 5);
        assert_eq!(id.day_offset(), 100);
        assert_eq!(id.sequence(), expected);
        assert_eq!(id.to_raw(), (5 << 40) | (100 << 25) | expected);
    }
}

#[test]
fn sync_ids_increment_within_a_day() {
    run_ids_increment_within_a_day(sync_config());
}

#[test]
fn buffered_ids_increment_within_a_day() {
    run_ids_increment_within_a_day(buffered_config(64, 0.5));
}

#[test]
fn sync_day_rollover_resets_sequence() {
    let clock = MockClock::at(day(101) - 1);
    let generator = GeneratorBuilder::new(sync_config())
        .clock(clock.clone())
        .build(WorkerIdentity::new(5))
        .unwrap();

    let mut before = generator.next_duuid().unwrap();
    for _ in 0..41 {
        before = generator.next_duuid().unwrap();
    }
    assert_eq!((before.day_offset(), before.sequence()), (100, 41));

    clock.set(day(101) + 1);
    let after = generator.next_duuid().unwrap();
    assert_eq!(after.day_offset(), before.day_offset() + 1);
    assert_eq!(after.sequence(), 0);
    assert!(after > before);
}

#[test]
fn buffered_day_rollover_resets_sequence() {
    let clock = MockClock::at(day(101) - 1);
    let generator = GeneratorBuilder::new(buffered_config(4, 1.0))
        .clock(clock.clone())
        .build(WorkerIdentity::new(5))
        .unwrap();

    let first = generator.next_duuid().unwrap();
    assert_eq!(first.day_offset(), 100);
    clock.set(day(101) + 1);

    // IDs buffered before midnight drain first, in order.
    let mut last = first;
    let rolled = loop {
        let id = generator.next_duuid().unwrap();
        assert!(id > last);
        if id.day_offset() == 101 {
            break id;
        }
        assert_eq!(id.day_offset(), 100);
        assert_eq!(id.sequence(), last.sequence() + 1);
        last = id;
    };
    assert_eq!(rolled.sequence(), 0);
}

#[test]
fn randomized_start_applies_to_every_day() {
    let clock = MockClock::at(day(7));
    let config = GeneratorConfig {
        randomize_sequence_start: true,
        random_start_ceiling: 100,
        ..sync_config()
    };
    let generator = GeneratorBuilder::new(config)
        .clock(clock.clone())
        .rng(FixedRand(1_234))
        .build(WorkerIdentity::new(1))
        .unwrap();

    assert_eq!(generator.next_duuid().unwrap().sequence(), 34);
    assert_eq!(generator.next_duuid().unwrap().sequence(), 35);

    clock.set(day(8));
    let id = generator.next_duuid().unwrap();
    assert_eq!((id.day_offset(), id.sequence()), (8, 34));
}

#[test]
fn clock_regression_keeps_the_newest_day() {
    let clock = MockClock::at(day(10));
    let generator = GeneratorBuilder::new(sync_config())
        .clock(clock.clone())
        .build(WorkerIdentity::new(1))
        .unwrap();

    let before = generator.next_duuid().unwrap();
    clock.set(day(9) + 500);
    let after = generator.next_duuid().unwrap();
    assert_eq!(after.day_offset(), 10);
    assert_eq!(after.sequence(), before.sequence() + 1);
}

#[test]
fn sync_exhaustion_on_frozen_clock_is_fatal() {
    let generator = GeneratorBuilder::new(tiny_sequence(sync_config()))
        .clock(MockClock::at(day(3)))
        .build(WorkerIdentity::new(1))
        .unwrap();

    for expected in 0..8 {
        assert_eq!(generator.next_duuid().unwrap().sequence(), expected);
    }
    assert_eq!(
        generator.next_id(),
        Err(Error::SequenceExhausted { day_offset: 3 })
    );
}

#[test]
fn sync_exhaustion_blocks_until_next_day() {
    let clock = SteppingClock {
        now: AtomicU64::new(day(3)),
        step: MILLIS_PER_DAY / 48,
    };
    let generator = GeneratorBuilder::new(tiny_sequence(sync_config()))
        .clock(Arc::new(clock))
        .build(WorkerIdentity::new(1))
        .unwrap();

    for expected in 0..8 {
        let id = generator.next_duuid().unwrap();
        assert_eq!((id.day_offset(), id.sequence()), (3, expected));
    }
    let id = generator.next_duuid().unwrap();
    assert_eq!((id.day_offset(), id.sequence()), (4, 0));
}

#[test]
fn buffered_exhaustion_drains_then_reports() {
    let generator = GeneratorBuilder::new(tiny_sequence(buffered_config(16, 1.0)))
        .clock(MockClock::at(day(3)))
        .build(WorkerIdentity::new(1))
        .unwrap();

    for expected in 0..8 {
        assert_eq!(generator.next_duuid().unwrap().sequence(), expected);
    }
    assert_eq!(
        generator.next_id(),
        Err(Error::SequenceExhausted { day_offset: 3 })
    );
    assert_eq!(generator.producer_state(), Some(ProducerState::Stopped));
    assert!(!generator.is_closed());
}

/// 8 representable days.
fn three_day_bits(config: GeneratorConfig) -> GeneratorConfig {
    GeneratorConfig {
        worker_id_bits: 40,
        day_bits: 3,
        sequence_bits: 20,
        ..config
    }
}

#[test]
fn stall_is_flagged_once_and_cleared_by_the_next_pop() {
    let clock = TickingClock::at(day(3));
    let generator = GeneratorBuilder::new(tiny_sequence(buffered_config(16, 1.0)))
        .clock(clock.clone())
        .build(WorkerIdentity::new(1))
        .unwrap();
    let buffered = generator.buffered().unwrap();

    for expected in 0..8 {
        assert_eq!(generator.next_duuid().unwrap().sequence(), expected);
    }
    assert!(!buffered.is_stalled());

    let rolled = thread::scope(|s| {
        let waiters: Vec<_> = (0..3).map(|_| s.spawn(|| generator.next_duuid())).collect();
        wait_until("stall", || buffered.is_stalled());
        assert_eq!(buffered.consumed(), 8);

        clock.set(day(4));
        waiters
            .into_iter()
            .map(|w| w.join().unwrap().unwrap())
            .collect::<Vec<_>>()
    });

    assert!(rolled.iter().all(|id| id.day_offset() == 4));
    assert!(!buffered.is_stalled());
}

#[test]
fn elapsed_epoch_refuses_to_start() {
    for config in [sync_config(), buffered_config(64, 0.5)] {
        let result = GeneratorBuilder::new(three_day_bits(config))
            .clock(MockClock::at(day(8)))
            .build(WorkerIdentity::new(1));
        assert_eq!(
            result.unwrap_err(),
            Error::EpochExceeded {
                day_offset: 8,
                max: 7
            }
        );
    }
}

#[test]
fn clock_before_epoch_refuses_to_start() {
    let result = GeneratorBuilder::new(sync_config())
        .clock(MockClock::at(EPOCH_MILLIS - 1))
        .build(WorkerIdentity::new(1));
    assert!(matches!(result, Err(Error::InvalidConfig { .. })));
}

#[test]
fn epoch_elapsing_while_running_is_reported() {
    let clock = MockClock::at(day(7));
    let generator = GeneratorBuilder::new(three_day_bits(sync_config()))
        .clock(clock.clone())
        .build(WorkerIdentity::new(1))
        .unwrap();
    assert_eq!(generator.next_duuid().unwrap().day_offset(), 7);

    clock.set(day(8));
    assert_eq!(
        generator.next_id(),
        Err(Error::EpochExceeded {
            day_offset: 8,
            max: 7
        })
    );
}

fn run_concurrent_ids_are_unique_and_gapless(config: GeneratorConfig) {
    const THREADS: usize = 8;
    const PER_THREAD: usize = 5_000;

    let ceiling = config
        .randomize_sequence_start
        .then_some(config.random_start_ceiling);
    let generator = GeneratorBuilder::new(config)
        .clock(MockClock::at(day(1)))
        .rng(FixedRand(1_234))
        .build(WorkerIdentity::new(9))
        .unwrap();

    let ids: Vec<u64> = thread::scope(|s| {
        let handles: Vec<_> = (0..THREADS)
            .map(|_| {
                s.spawn(|| {
                    (0..PER_THREAD)
                        .map(|_| generator.next_id().unwrap())
                        .collect::<Vec<_>>()
                })
            })
            .collect();
        handles
            .into_iter()
            .flat_map(|h| h.join().unwrap())
            .collect()
    });

    let unique: HashSet<u64> = ids.iter().copied().collect();
    assert_eq!(unique.len(), THREADS * PER_THREAD);

    let mut sequences: Vec<u64> = ids
        .iter()
        .map(|&id| generator.decompose(id).sequence)
        .collect();
    sequences.sort_unstable();
    let start = sequences[0];
    match ceiling {
        Some(ceiling) => assert!(start < ceiling, "start {start} not below {ceiling}"),
        None => assert_eq!(start, 0),
    }
    let expected: Vec<u64> = (start..start + (THREADS * PER_THREAD) as u64).collect();
    assert_eq!(sequences, expected);
    assert_eq!(generator.stats().consumed, (THREADS * PER_THREAD) as u64);
}

#[test]
fn sync_concurrent_ids_are_unique_and_gapless() {
    run_concurrent_ids_are_unique_and_gapless(sync_config());
}

#[test]
fn buffered_concurrent_ids_are_unique_and_gapless() {
    run_concurrent_ids_are_unique_and_gapless(buffered_config(1024, 0.5));
}

fn randomized(config: GeneratorConfig) -> GeneratorConfig {
    GeneratorConfig {
        randomize_sequence_start: true,
        random_start_ceiling: 1_000,
        ..config
    }
}

#[test]
fn sync_randomized_start_is_contiguous_below_ceiling() {
    run_concurrent_ids_are_unique_and_gapless(randomized(sync_config()));
}

#[test]
fn buffered_randomized_start_is_contiguous_below_ceiling() {
    run_concurrent_ids_are_unique_and_gapless(randomized(buffered_config(1024, 0.5)));
}

#[test]
fn buffered_spinning_consumers_are_unique() {
    let config = GeneratorConfig {
        consumer_wait: ConsumerWait::Spin,
        ..buffered_config(256, 0.75)
    };
    run_concurrent_ids_are_unique_and_gapless(config);
}

#[test]
fn producer_pauses_at_fill_threshold_and_resumes() {
    let generator = GeneratorBuilder::new(buffered_config(64, 0.5))
        .clock(MockClock::at(day(1)))
        .build(WorkerIdentity::new(1))
        .unwrap();
    let buffered = generator.buffered().unwrap();
    assert_eq!(buffered.producer().threshold(), 32);

    wait_until("first pause", || {
        generator.producer_state() == Some(ProducerState::Paused)
    });
    assert_eq!(buffered.ring().len(), 32);

    for _ in 0..5 {
        generator.next_id().unwrap();
    }
    wait_until("refill", || generator.stats().produced == 37);
    wait_until("second pause", || {
        generator.producer_state() == Some(ProducerState::Paused)
    });
    assert_eq!(buffered.ring().len(), 32);
    assert!(generator.stats().pauses >= 2);
}

#[test]
fn close_drains_buffer_then_fails() {
    let generator = GeneratorBuilder::new(buffered_config(64, 1.0))
        .clock(MockClock::at(day(1)))
        .build(WorkerIdentity::new(1))
        .unwrap();
    wait_until("full buffer", || generator.stats().produced == 64);

    generator.close();
    generator.close();
    assert!(generator.is_closed());
    assert_eq!(generator.producer_state(), Some(ProducerState::Stopped));

    let mut drained = Vec::new();
    let err = loop {
        match generator.next_id() {
            Ok(id) => drained.push(id),
            Err(e) => break e,
        }
    };
    assert_eq!(err, Error::GeneratorClosed);
    assert_eq!(drained.len(), 64);
    assert!(drained.windows(2).all(|w| w[0] < w[1]));
    assert_eq!(generator.next_id(), Err(Error::GeneratorClosed));
    assert_eq!(generator.stats().buffered(), 0);
}

#[test]
fn sync_close_fails_immediately() {
    let generator = GeneratorBuilder::new(sync_config())
        .clock(MockClock::at(day(1)))
        .build(WorkerIdentity::new(1))
        .unwrap();
    generator.next_id().unwrap();
    generator.close();
    assert_eq!(generator.next_id(), Err(Error::GeneratorClosed));
    assert_eq!(generator.producer_state(), None);
}

#[test]
fn worker_id_beyond_layout_is_rejected() {
    let result = GeneratorBuilder::new(sync_config())
        .clock(MockClock::at(day(1)))
        .build(WorkerIdentity::new(IdLayout::DEFAULT.max_worker_id() + 1));
    assert!(matches!(result, Err(Error::OutOfRange { .. })));
}

#[derive(Default)]
struct CountingAllocator {
    calls: AtomicUsize,
    never_completes: bool,
}

impl WorkerIdAllocator for CountingAllocator {
    fn backend(&self) -> AllocatorBackend {
        AllocatorBackend::Static
    }

    fn allocate<'a>(
        &'a self,
        _info: &'a IdentityInfo,
    ) -> BoxFuture<'a, crate::Result<WorkerIdentity>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.never_completes {
            futures::future::pending().boxed()
        } else {
            futures::future::ready(Ok(WorkerIdentity::new(11))).boxed()
        }
    }
}

#[tokio::test]
async fn start_allocates_then_releases_allocator_on_close() {
    let info = IdentityInfo::new("node-a");
    let generator = GeneratorBuilder::new(sync_config())
        .clock(MockClock::at(day(1)))
        .start(StaticAllocator::new(&IdLayout::DEFAULT).with_worker_id(3), &info)
        .await
        .unwrap();

    assert_eq!(generator.worker_identity().worker_id(), 3);
    assert!(generator.holds_allocator());
    assert_eq!(generator.next_duuid().unwrap().worker_id(), 3);

    generator.close();
    assert!(!generator.holds_allocator());
}

#[tokio::test]
async fn invalid_config_is_reported_before_allocation() {
    let allocator = Arc::new(CountingAllocator::default());
    let config = GeneratorConfig {
        sequence_bits: 26,
        ..sync_config()
    };

    let result = GeneratorBuilder::new(config)
        .start(Arc::clone(&allocator), &IdentityInfo::new("node-a"))
        .await;
    assert!(matches!(result, Err(Error::InvalidLayout { .. })));
    assert_eq!(allocator.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn elapsed_epoch_is_reported_before_allocation() {
    let allocator = Arc::new(CountingAllocator::default());
    let result = GeneratorBuilder::new(three_day_bits(sync_config()))
        .clock(MockClock::at(day(8)))
        .start(Arc::clone(&allocator), &IdentityInfo::new("node-a"))
        .await;
    assert!(matches!(result, Err(Error::EpochExceeded { .. })));
    assert_eq!(allocator.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn allocation_failure_prevents_startup() {
    let registry = AllocatorRegistry::new().register_lease_store(Arc::new(MemoryLeaseStore::new()));
    let allocator = registry
        .build(AllocatorBackend::LeaseStore, &IdLayout::DEFAULT)
        .unwrap();

    let result = DuuidGenerator::start(sync_config(), allocator, &IdentityInfo::new("node-a")).await;
    assert!(matches!(
        result,
        Err(Error::AllocationFailed {
            backend: AllocatorBackend::LeaseStore,
            source: BackendError::Settings { .. },
        })
    ));

    let info = IdentityInfo::new("node-a").with_param(params::ENDPOINTS, "http://a:2379");
    let allocator = registry
        .build(AllocatorBackend::LeaseStore, &IdLayout::DEFAULT)
        .unwrap();
    let generator = DuuidGenerator::start(sync_config(), allocator, &info)
        .await
        .unwrap();
    assert_eq!(generator.worker_identity().worker_id(), 0);
}

#[tokio::test]
async fn allocation_timeout_is_an_allocation_failure() {
    let allocator = CountingAllocator {
        never_completes: true,
        ..CountingAllocator::default()
    };
    let config = GeneratorConfig {
        allocation_timeout_ms: 20,
        ..sync_config()
    };

    let result = GeneratorBuilder::new(config)
        .start(allocator, &IdentityInfo::new("node-a"))
        .await;
    assert_eq!(
        result.unwrap_err(),
        Error::AllocationFailed {
            backend: AllocatorBackend::Static,
            source: BackendError::Timeout(Duration::from_millis(20)),
        }
    );
}
