//! Variable-length payload slots and their verification (spec.md §4.4.5).
//!
//! Each variable-length field in a codegen-described type reserves an 8-byte
//! `{offset, size}` slot inside the fixed part of the payload; the actual
//! bytes are appended after the fixed part, in field order.

pub const VAR_SLOT_LEN: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VarSlot {
    pub offset: u32,
    pub size: u32,
}

/// Writes `slot` at byte offset `at` within `payload`.
pub fn write_slot_at(payload: &mut [u8], at: usize, slot: VarSlot) {
    payload[at..at + 4].copy_from_slice(&slot.offset.to_le_bytes());
    payload[at + 4..at + 8].copy_from_slice(&slot.size.to_le_bytes());
}

/// Reads the slot stored at byte offset `at` within `payload`.
pub fn read_slot_at(payload: &[u8], at: usize) -> VarSlot {
    let offset = u32::from_le_bytes(payload[at..at + 4].try_into().unwrap());
    let size = u32::from_le_bytes(payload[at + 4..at + 8].try_into().unwrap());
    VarSlot { offset, size }
}

/// Describes one variable-length field: where its `{offset,size}` slot lives
/// within the fixed part of the payload.
#[derive(Debug, Clone, Copy)]
pub struct VariableFieldLayout {
    pub slot_offset: usize,
}

/// Describes one field to serialize on the write path: its slot position in
/// the fixed part, plus the bytes to append after the fixed part.
pub struct VariableField<'a> {
    pub slot_offset: usize,
    pub data: &'a [u8],
}

/// Verifies that the variable regions described by `layout` form a monotone,
/// non-overlapping, within-frame sequence starting right after the fixed
/// part, per spec §4.4.5. `payload` is the full frame payload (fixed +
/// variable bytes); `fixed_len` is the size of the fixed part;
/// `payload_capacity` is `frame_length - header_size`.
pub fn verify_variable_regions(
    payload: &[u8],
    layout: &[VariableFieldLayout],
    fixed_len: usize,
    payload_capacity: usize,
) -> bool {
    if fixed_len > payload_capacity || fixed_len > payload.len() {
        return false;
    }
    let mut expected_next = fixed_len as u32;
    for field in layout {
        if field.slot_offset + VAR_SLOT_LEN > fixed_len {
            return false;
        }
        let slot = read_slot_at(payload, field.slot_offset);
        if slot.offset != expected_next {
            return false;
        }
        let end = match slot.offset.checked_add(slot.size) {
            Some(end) => end,
            None => return false,
        };
        if end as usize > payload_capacity {
            return false;
        }
        expected_next = end;
    }
    true
}


#[cfg(feature = "proptest")]
mod prop {
    use super::*;
    use proptest::collection;
    use proptest::prelude::*;

    proptest! {
        /// `write_slot_at` then `read_slot_at` must recover the same slot.
        #[test]
        fn slot_round_trips(offset in any::<u32>(), size in any::<u32>()) {
            let mut payload = [0u8; VAR_SLOT_LEN];
            write_slot_at(&mut payload, 0, VarSlot { offset, size });
            prop_assert_eq!(read_slot_at(&payload, 0), VarSlot { offset, size });
        }

        /// A run of contiguously laid-out fields always verifies, regardless
        /// of how many fields or how large each one is.
        #[test]
        fn contiguous_run_always_verifies(sizes in collection::vec(0u32..64, 1..8)) {
            let fixed_len = sizes.len() * VAR_SLOT_LEN;
            let mut payload = vec![0u8; fixed_len + sizes.iter().sum::<u32>() as usize];
            let mut cursor = fixed_len as u32;
            let mut layout = Vec::with_capacity(sizes.len());
            for (i, size) in sizes.iter().enumerate() {
                let slot_offset = i * VAR_SLOT_LEN;
                write_slot_at(&mut payload, slot_offset, VarSlot { offset: cursor, size: *size });
                layout.push(VariableFieldLayout { slot_offset });
                cursor += size;
            }
            prop_assert!(verify_variable_regions(&payload, &layout, fixed_len, payload.len()));
        }
    }
}
