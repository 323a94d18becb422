use crate::error::{Error, Field, Result};

/// Number of bits reserved for the sign. Always zero in a generated ID.
pub const SIGN_BITS: u8 = 1;

/// Total width of a generated ID.
pub const ID_BITS: u8 = 64;

/// The bit layout of a 64-bit ID.
///
/// ```text
///  Bit Index:  63      63 62                 D+S S+D-1            S S-1          0
///              +---------+--------------------+---------------------+------------+
///  Field:      | sign(1) | worker id (W)      | day offset (D)      | seq (S)    |
///              +---------+--------------------+---------------------+------------+
///              |<------------- MSB ------------ 64 bits ------------- LSB ------>|
/// ```
///
/// A layout is validated on construction and immutable afterwards, so every
/// component sharing it can rely on `1 + W + D + S == 64` and on each field
/// being at least one bit wide.
///
/// # Example
///
/// ```
/// use duuid::{IdLayout, IdParts};
///
/// let layout = IdLayout::DEFAULT;
/// let id = layout.combine(5, 100, 42).unwrap();
/// assert_eq!(id, (5 << 40) | (100 << 25) | 42);
/// assert_eq!(layout.decompose(id), IdParts { worker_id: 5, day_offset: 100, sequence: 42 });
/// ```
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct IdLayout {
    worker_id_bits: u8,
    day_bits: u8,
    sequence_bits: u8,
}

impl Default for IdLayout {
    fn default() -> Self {
        Self::DEFAULT
    }
}

impl IdLayout {
    /// 23 bits of worker id (~8.3M workers), 15 bits of day offset (~89
    /// years) and 25 bits of sequence (~33M IDs per worker per day).
    pub const DEFAULT: Self = Self {
        worker_id_bits: 23,
        day_bits: 15,
        sequence_bits: 25,
    };

    /// Creates a layout from explicit field widths.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidLayout`] unless every width is non-zero and
    /// the three widths plus the sign bit add up to exactly 64.
    pub fn new(worker_id_bits: u8, day_bits: u8, sequence_bits: u8) -> Result<Self> {
        let layout = Self {
            worker_id_bits,
            day_bits,
            sequence_bits,
        };
        layout.validate()?;
        Ok(layout)
    }

    /// Checks the layout invariants.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidLayout`] describing the first violated
    /// constraint.
    pub fn validate(&self) -> Result<()> {
        for (name, bits) in [
            ("worker id", self.worker_id_bits),
            ("day", self.day_bits),
            ("sequence", self.sequence_bits),
        ] {
            if bits == 0 {
                return Err(Error::InvalidLayout {
                    reason: format!("{name} bits must be greater than zero"),
                });
            }
        }

        let total = u16::from(SIGN_BITS)
            + u16::from(self.worker_id_bits)
            + u16::from(self.day_bits)
            + u16::from(self.sequence_bits);
        if total != u16::from(ID_BITS) {
            return Err(Error::InvalidLayout {
                reason: format!(
                    "1 sign bit + {} worker id bits + {} day bits + {} sequence bits = {total}, expected {ID_BITS}",
                    self.worker_id_bits, self.day_bits, self.sequence_bits
                ),
            });
        }
        Ok(())
    }

    pub const fn worker_id_bits(&self) -> u8 {
        self.worker_id_bits
    }

    pub const fn day_bits(&self) -> u8 {
        self.day_bits
    }

    pub const fn sequence_bits(&self) -> u8 {
        self.sequence_bits
    }

    /// Largest worker id this layout can encode (`2^W - 1`).
    pub const fn max_worker_id(&self) -> u64 {
        mask(self.worker_id_bits)
    }

    /// Largest day offset this layout can encode (`2^D - 1`).
    pub const fn max_day_offset(&self) -> u64 {
        mask(self.day_bits)
    }

    /// Largest sequence this layout can encode (`2^S - 1`).
    pub const fn max_sequence(&self) -> u64 {
        mask(self.sequence_bits)
    }

    /// Left shift applied to the day offset.
    pub const fn day_shift(&self) -> u32 {
        self.sequence_bits as u32
    }

    /// Left shift applied to the worker id.
    pub const fn worker_shift(&self) -> u32 {
        self.day_bits as u32 + self.sequence_bits as u32
    }

    /// Packs the three fields into an ID.
    ///
    /// The fields occupy exactly 63 bits, so the result is always a positive
    /// `i64` when reinterpreted as signed.
    ///
    /// # Errors
    ///
    /// Returns [`Error::OutOfRange`] if any field exceeds its maximum.
    #[inline]
    pub fn combine(&self, worker_id: u64, day_offset: u64, sequence: u64) -> Result<u64> {
        check(Field::WorkerId, worker_id, self.max_worker_id())?;
        check(Field::DayOffset, day_offset, self.max_day_offset())?;
        check(Field::Sequence, sequence, self.max_sequence())?;
        Ok((worker_id << self.worker_shift()) | (day_offset << self.day_shift()) | sequence)
    }

    /// Splits an ID back into its fields. The sign bit, if set, is ignored.
    #[inline]
    pub const fn decompose(&self, id: u64) -> IdParts {
        IdParts {
            worker_id: (id >> self.worker_shift()) & self.max_worker_id(),
            day_offset: (id >> self.day_shift()) & self.max_day_offset(),
            sequence: id & self.max_sequence(),
        }
    }
}

/// The decoded fields of an ID.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct IdParts {
    pub worker_id: u64,
    pub day_offset: u64,
    pub sequence: u64,
}

const fn mask(bits: u8) -> u64 {
    (1 << bits) - 1
}

#[inline]
fn check(field: Field, value: u64, max: u64) -> Result<()> {
    if value > max {
        return Err(cold_out_of_range(field, value, max));
    }
    Ok(())
}

#[cold]
#[inline(never)]
fn cold_out_of_range(field: Field, value: u64, max: u64) -> Error {
    Error::OutOfRange { field, value, max }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_layout_matches_documented_split() {
        let layout = IdLayout::DEFAULT;
        assert!(layout.validate().is_ok());
        assert_eq!(layout.max_worker_id(), (1 << 23) - 1);
        assert_eq!(layout.max_day_offset(), (1 << 15) - 1);
        assert_eq!(layout.max_sequence(), (1 << 25) - 1);
        assert_eq!(layout.day_shift(), 25);
        assert_eq!(layout.worker_shift(), 40);
    }

    #[test]
    fn combine_packs_fields_at_their_shifts() {
        let layout = IdLayout::DEFAULT;
        let id = layout.combine(5, 100, 42).unwrap();
        assert_eq!(id, (5 << 40) | (100 << 25) | 42);
        assert_eq!(
            layout.decompose(id),
            IdParts {
                worker_id: 5,
                day_offset: 100,
                sequence: 42
            }
        );
    }

    #[test]
    fn maximum_fields_stay_positive() {
        let layout = IdLayout::DEFAULT;
        let id = layout
            .combine(
                layout.max_worker_id(),
                layout.max_day_offset(),
                layout.max_sequence(),
            )
            .unwrap();
        assert_eq!(id, i64::MAX as u64);
        assert!(id as i64 > 0);
    }

    #[test]
    fn one_past_maximum_is_rejected_per_field() {
        let layout = IdLayout::DEFAULT;
        let (w, d, s) = (
            layout.max_worker_id(),
            layout.max_day_offset(),
            layout.max_sequence(),
        );

        assert_eq!(
            layout.combine(w + 1, d, s),
            Err(Error::OutOfRange {
                field: Field::WorkerId,
                value: w + 1,
                max: w
            })
        );
        assert!(matches!(
            layout.combine(w, d + 1, s),
            Err(Error::OutOfRange {
                field: Field::DayOffset,
                ..
            })
        ));
        assert!(matches!(
            layout.combine(w, d, s + 1),
            Err(Error::OutOfRange {
                field: Field::Sequence,
                ..
            })
        ));
    }

    #[test]
    fn round_trip_on_a_narrow_layout() {
        let layout = IdLayout::new(40, 20, 3).unwrap();
        for parts in [
            IdParts {
                worker_id: 0,
                day_offset: 0,
                sequence: 0,
            },
            IdParts {
                worker_id: layout.max_worker_id(),
                day_offset: 1,
                sequence: 7,
            },
            IdParts {
                worker_id: 123_456,
                day_offset: layout.max_day_offset(),
                sequence: 3,
            },
        ] {
            let id = layout
                .combine(parts.worker_id, parts.day_offset, parts.sequence)
                .unwrap();
            assert!(id as i64 >= 0);
            assert_eq!(layout.decompose(id), parts);
        }
    }

    #[test]
    fn decompose_ignores_sign_bit() {
        let layout = IdLayout::DEFAULT;
        let id = layout.combine(1, 2, 3).unwrap();
        assert_eq!(layout.decompose(id | (1 << 63)), layout.decompose(id));
    }

    #[test]
    fn invalid_layouts_are_rejected() {
        assert!(matches!(
            IdLayout::new(0, 38, 25),
            Err(Error::InvalidLayout { .. })
        ));
        assert!(matches!(
            IdLayout::new(23, 0, 40),
            Err(Error::InvalidLayout { .. })
        ));
        assert!(matches!(
            IdLayout::new(23, 40, 0),
            Err(Error::InvalidLayout { .. })
        ));
        assert!(matches!(
            IdLayout::new(23, 15, 24),
            Err(Error::InvalidLayout { .. })
        ));
        assert!(matches!(
            IdLayout::new(23, 15, 26),
            Err(Error::InvalidLayout { .. })
        ));
        assert!(matches!(
            IdLayout::new(200, 200, 200),
            Err(Error::InvalidLayout { .. })
        ));
    }
}
