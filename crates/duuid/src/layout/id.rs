use core::fmt;

use crate::layout::{IdLayout, IdParts};

/// A generated ID together with the layout that produced it.
///
/// The raw value is what travels over the wire; this view only adds field
/// accessors and formatting. Ordering follows the raw value, which for a
/// single worker is `(day_offset, sequence)` order.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DuuId {
    id: u64,
    layout: IdLayout,
}

impl DuuId {
    pub const fn from_raw(layout: IdLayout, id: u64) -> Self {
        Self { id, layout }
    }

    pub const fn to_raw(&self) -> u64 {
        self.id
    }

    pub const fn layout(&self) -> IdLayout {
        self.layout
    }

    pub const fn parts(&self) -> IdParts {
        self.layout.decompose(self.id)
    }

    pub const fn worker_id(&self) -> u64 {
        self.parts().worker_id
    }

    pub const fn day_offset(&self) -> u64 {
        self.parts().day_offset
    }

    pub const fn sequence(&self) -> u64 {
        self.parts().sequence
    }

    /// Returns the ID as a zero-padded 20-digit string, which sorts
    /// lexicographically in the same order as the raw value.
    pub fn to_padded_string(&self) -> String {
        format!("{:020}", self.id)
    }
}

impl From<DuuId> for u64 {
    fn from(id: DuuId) -> Self {
        id.id
    }
}

impl fmt::Display for DuuId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.id)
    }
}

impl fmt::Debug for DuuId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts = self.parts();
        write!(
            f,
            "DuuId {{ raw: 0x{:016x}, worker_id ({}): {}, day_offset ({}): {}, sequence ({}): {} }}",
            self.id,
            self.layout.worker_id_bits(),
            parts.worker_id,
            self.layout.day_bits(),
            parts.day_offset,
            self.layout.sequence_bits(),
            parts.sequence,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accessors_decode_fields() {
        let layout = IdLayout::DEFAULT;
        let id = DuuId::from_raw(layout, layout.combine(7, 365, 9).unwrap());
        assert_eq!(id.worker_id(), 7);
        assert_eq!(id.day_offset(), 365);
        assert_eq!(id.sequence(), 9);
        assert_eq!(u64::from(id), id.to_raw());
    }

    #[test]
    fn padded_string_sorts_like_raw() {
        let layout = IdLayout::DEFAULT;
        let small = DuuId::from_raw(layout, 42);
        let large = DuuId::from_raw(layout, layout.combine(1, 0, 0).unwrap());
        assert_eq!(small.to_padded_string(), "00000000000000000042");
        assert_eq!(small.to_padded_string().len(), 20);
        assert!(small.to_padded_string() < large.to_padded_string());
        assert!(small < large);
    }

    #[test]
    fn debug_shows_field_widths() {
        let layout = IdLayout::DEFAULT;
        let id = DuuId::from_raw(layout, layout.combine(5, 100, 42).unwrap());
        let rendered = format!("{id:?}");
        assert!(rendered.contains("worker_id (23): 5"));
        assert!(rendered.contains("day_offset (15): 100"));
        assert!(rendered.contains("sequence (25): 42"));
    }
}
