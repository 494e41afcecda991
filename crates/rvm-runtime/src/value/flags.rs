//! Packed value header. The low three bits of a [Flags] word hold the [ValueKind], the bits above
//! them hold the index. Indices are byte offsets into a heap and always a multiple of eight, so
//! the index is the masked word itself and never needs shifting.

use super::ValueKind;

/// Bit mask for extracting a [ValueKind] from a flags word.
pub const KIND_MASK: u64 = 0x0000_0000_0000_0007;

/// Bit mask for extracting a value index from a flags word.
pub const INDEX_MASK: u64 = 0x0fff_ffff_ffff_fff8;

/// Indicates that some value lacks an index.
pub const INDEX_NONE: u64 = 0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Flags(pub u64);

impl Flags {
    pub fn pack(kind: ValueKind, index: u64) -> Flags {
        debug_assert_eq!(index & !INDEX_MASK, 0, "index {index:#x} out of range");
        Flags((index & INDEX_MASK) | kind as u64)
    }

    pub fn kind(self) -> ValueKind {
        ValueKind::from_bits(self.0)
    }

    pub fn index(self) -> u64 {
        self.0 & INDEX_MASK
    }

    pub fn is_indexed(self) -> bool {
        self.index() != INDEX_NONE
    }

    pub fn to_le_bytes(self) -> [u8; 8] {
        self.0.to_le_bytes()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn kinds() -> impl Strategy<Value = ValueKind> {
        (0u64..8).prop_map(ValueKind::from_bits)
    }

    fn indices() -> impl Strategy<Value = u64> {
        (0u64..1 << 57).prop_map(|index| index << 3)
    }

    #[test]
    fn masks_do_not_overlap() {
        assert_eq!(KIND_MASK & INDEX_MASK, 0);
    }

    #[test]
    fn zero_index_is_unindexed() {
        let flags = Flags::pack(ValueKind::Number, INDEX_NONE);
        assert!(!flags.is_indexed());
        assert_eq!(flags.0, 2);
    }

    proptest! {
        #[test]
        fn kind_and_index_survive_packing(kind in kinds(), index in indices()) {
            let flags = Flags::pack(kind, index);
            prop_assert_eq!(flags.kind(), kind);
            prop_assert_eq!(flags.index(), index);
        }

        #[test]
        fn indexed_iff_index_is_nonzero(kind in kinds(), index in indices()) {
            let flags = Flags::pack(kind, index);
            prop_assert_eq!(flags.is_indexed(), flags.index() != 0);
        }
    }
}
