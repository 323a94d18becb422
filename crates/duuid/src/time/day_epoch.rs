use chrono::{DateTime, Days, NaiveDate, Utc};

use crate::{
    error::{Error, Result},
    layout::IdLayout,
};

/// Milliseconds in one UTC calendar day.
pub const MILLIS_PER_DAY: u64 = 86_400_000;

/// Default epoch date: Wednesday, January 1, 2025 (UTC).
pub const DEFAULT_EPOCH: NaiveDate = match NaiveDate::from_ymd_opt(2025, 1, 1) {
    Some(date) => date,
    None => panic!("invalid default epoch date"),
};

/// Maps wall-clock time to the day offset encoded in an ID.
///
/// Day 0 is the epoch date. Days are UTC calendar days, so every node in the
/// cluster rolls over at the same instant regardless of its local time zone.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DayEpoch {
    epoch: NaiveDate,
    epoch_unix_day: u64,
    max_day_offset: u64,
}

impl DayEpoch {
    /// Creates a day epoch anchored at `epoch` whose ceiling is the layout's
    /// maximum day offset.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] if the epoch date precedes
    /// 1970-01-01.
    pub fn new(epoch: NaiveDate, layout: &IdLayout) -> Result<Self> {
        let unix_epoch = DateTime::<Utc>::UNIX_EPOCH.date_naive();
        let days = epoch.signed_duration_since(unix_epoch).num_days();
        let epoch_unix_day = u64::try_from(days).map_err(|_| Error::InvalidConfig {
            reason: format!("epoch date {epoch} precedes the Unix epoch"),
        })?;
        Ok(Self {
            epoch,
            epoch_unix_day,
            max_day_offset: layout.max_day_offset(),
        })
    }

    pub const fn epoch(&self) -> NaiveDate {
        self.epoch
    }

    pub const fn max_day_offset(&self) -> u64 {
        self.max_day_offset
    }

    /// The calendar date a day offset stands for, if it is representable.
    pub fn date_of(&self, day_offset: u64) -> Option<NaiveDate> {
        if day_offset > self.max_day_offset {
            return None;
        }
        self.epoch.checked_add_days(Days::new(day_offset))
    }

    /// Returns the number of whole days between the epoch date and
    /// `now_millis`.
    ///
    /// # Errors
    ///
    /// - [`Error::EpochExceeded`] once the offset no longer fits the layout.
    /// - [`Error::InvalidConfig`] if the clock reads earlier than the epoch
    ///   date.
    #[inline]
    pub fn current_day_offset(&self, now_millis: u64) -> Result<u64> {
        let unix_day = now_millis / MILLIS_PER_DAY;
        let Some(day_offset) = unix_day.checked_sub(self.epoch_unix_day) else {
            return Err(self.cold_before_epoch(now_millis));
        };
        if day_offset > self.max_day_offset {
            return Err(Error::EpochExceeded {
                day_offset,
                max: self.max_day_offset,
            });
        }
        Ok(day_offset)
    }

    #[cold]
    #[inline(never)]
    fn cold_before_epoch(&self, now_millis: u64) -> Error {
        Error::InvalidConfig {
            reason: format!(
                "clock reads {now_millis} ms since the Unix epoch, before the epoch date {}",
                self.epoch
            ),
        }
    }
}
