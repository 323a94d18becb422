use std::time::{SystemTime, UNIX_EPOCH};

use crate::time::TimeSource;

/// The operating system's wall clock.
///
/// Day offsets are calendar days, so a wall clock is what the generator
/// needs; going backwards is tolerated by the sequence cursor, which never
/// moves to an earlier day.
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;

impl TimeSource for SystemClock {
    fn current_millis(&self) -> u64 {
        // A clock set before 1970 reads as the Unix epoch, which the day
        // epoch then reports as preceding its epoch date.
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|elapsed| elapsed.as_millis() as u64)
            .unwrap_or_default()
    }
}
