//! Bump allocator embedded in a shared-memory region.
//!
//! Grounded on the prefix-header placement technique `shmc-region`'s sibling
//! (the teacher crate's `MsgRingHeader`/`IndexRingHeader`) uses to carve
//! typed state out of a flat byte buffer, generalized here to variable-size
//! allocations linked through offset pairs instead of a single fixed struct.
//!
//! The arena produces *offsets relative to the containing region*, never
//! pointers — shared memory is mapped at different addresses in different
//! processes, so only offsets are process-identity-independent (spec §9).

mod error;

pub use error::{ArenaError, ArenaResult};

use shmc_region::{align_up, REGION_HEADER_LEN};
use std::mem::size_of;

/// Alignment applied to the start of every individual allocation.
pub const ALLOC_ALIGNMENT: usize = 64;

/// Alignment applied to the boundary between the region header and the
/// arena's own control words / first allocation.
const ARENA_BASE_ALIGNMENT: usize = 256;

/// `{prev, next}` offsets the allocator writes immediately before every
/// allocation's returned offset.
const PREFIX_LEN: usize = size_of::<u32>() * 2;

/// `{free_cursor, last_allocated_offset}` control words, stored right after
/// the region header and before the 256-byte-aligned arena start.
const CONTROL_LEN: usize = size_of::<u32>() * 2;

/// Returns the first byte offset the arena may hand out when its control
/// words sit immediately after a plain region header (spec §4.2:
/// `start = align_256(sizeof(region_header))`).
pub fn arena_start() -> usize {
    arena_start_after(REGION_HEADER_LEN)
}

/// Returns the first byte offset the arena may hand out when its control
/// words are embedded at `control_offset` inside a larger composite region
/// (e.g. after a dictionary's offset table, in `shmc-config`).
pub fn arena_start_after(control_offset: usize) -> usize {
    align_up(control_offset + CONTROL_LEN, ARENA_BASE_ALIGNMENT)
}

/// A view of the bump allocator embedded in `region`.
///
/// Not `Sync`/thread-safe by design (spec §4.2, §5): callers serialize
/// access externally, as the shared-config dictionary's insert path does
/// with a CAS on the slot before ever touching the arena.
pub struct Arena<'a> {
    region: &'a mut [u8],
    control_offset: usize,
}

impl<'a> Arena<'a> {
    /// Initializes a fresh arena over `region`: free cursor at `arena_start`,
    /// no prior allocation. Must be called exactly once, when the host
    /// region is created.
    pub fn init(region: &'a mut [u8]) -> Self {
        Self::init_at(region, REGION_HEADER_LEN)
    }

    /// Initializes a fresh arena whose control words live at `control_offset`
    /// inside `region`, rather than immediately after a plain region header.
    pub fn init_at(region: &'a mut [u8], control_offset: usize) -> Self {
        let start = arena_start_after(control_offset);
        assert!(region.len() > start, "region too small to host an arena");
        let mut arena = Self {
            region,
            control_offset,
        };
        arena.store_control(start as u32, 0);
        arena
    }

    /// Wraps an already-initialized arena region (attach path).
    pub fn attach(region: &'a mut [u8]) -> Self {
        Self::attach_at(region, REGION_HEADER_LEN)
    }

    /// Wraps an already-initialized arena whose control words live at
    /// `control_offset` inside `region`.
    pub fn attach_at(region: &'a mut [u8], control_offset: usize) -> Self {
        Self {
            region,
            control_offset,
        }
    }

    fn end(&self) -> usize {
        self.region.len()
    }

    fn load_control(&self) -> (u32, u32) {
        let bytes = &self.region[self.control_offset..self.control_offset + CONTROL_LEN];
        let free_cursor = u32::from_le_bytes(bytes[0..4].try_into().unwrap());
        let last_allocated = u32::from_le_bytes(bytes[4..8].try_into().unwrap());
        (free_cursor, last_allocated)
    }

    fn store_control(&mut self, free_cursor: u32, last_allocated: u32) {
        let bytes = &mut self.region[self.control_offset..self.control_offset + CONTROL_LEN];
        bytes[0..4].copy_from_slice(&free_cursor.to_le_bytes());
        bytes[4..8].copy_from_slice(&last_allocated.to_le_bytes());
    }

    fn read_prefix(&self, data_offset: u32) -> (u32, u32) {
        let prefix_start = data_offset as usize - PREFIX_LEN;
        let bytes = &self.region[prefix_start..prefix_start + PREFIX_LEN];
        let prev = u32::from_le_bytes(bytes[0..4].try_into().unwrap());
        let next = u32::from_le_bytes(bytes[4..8].try_into().unwrap());
        (prev, next)
    }

    fn write_prefix(&mut self, prefix_start: usize, prev: u32, next: u32) {
        let bytes = &mut self.region[prefix_start..prefix_start + PREFIX_LEN];
        bytes[0..4].copy_from_slice(&prev.to_le_bytes());
        bytes[4..8].copy_from_slice(&next.to_le_bytes());
    }

    /// Returns the offset of the most recently completed allocation, or
    /// `None` if the arena is still empty.
    pub fn last_allocated_offset(&self) -> Option<u32> {
        let (_, last) = self.load_control();
        if last == 0 {
            None
        } else {
            Some(last)
        }
    }

    /// Bump-allocates `size` bytes, returning the offset of the user data
    /// (the `{prev, next}` prefix lives just before it and is skipped).
    ///
    /// Fails with [`ArenaError::OutOfMemory`] without mutating any state if
    /// the bumped cursor would cross the end of the host region.
    pub fn allocate(&mut self, size: usize) -> ArenaResult<u32> {
        let (free_cursor, last_allocated) = self.load_control();
        let prefix_start = align_up(free_cursor as usize, ALLOC_ALIGNMENT);
        let data_start = prefix_start + PREFIX_LEN;
        let new_cursor = data_start
            .checked_add(size)
            .expect("arena allocation size overflow");

        if new_cursor > self.end() {
            return Err(ArenaError::OutOfMemory {
                requested: size,
                available: self.end().saturating_sub(data_start),
            });
        }

        self.write_prefix(prefix_start, last_allocated, 0);

        if last_allocated != 0 {
            let prev_prefix_start = last_allocated as usize - PREFIX_LEN;
            let (prev_prev, _) = self.read_prefix(last_allocated);
            self.write_prefix(prev_prefix_start, prev_prev, data_start as u32);
        }

        self.store_control(new_cursor as u32, data_start as u32);
        Ok(data_start as u32)
    }

    /// Returns `(prev, next)` offsets recorded for the allocation at
    /// `data_offset`. Used by diagnostics walking the allocation list.
    pub fn links_of(&self, data_offset: u32) -> (u32, u32) {
        self.read_prefix(data_offset)
    }

    /// Immutable view of the user bytes for an allocation of `size` bytes
    /// starting at `data_offset`.
    pub fn data(&self, data_offset: u32, size: usize) -> &[u8] {
        let start = data_offset as usize;
        &self.region[start..start + size]
    }

    /// Mutable view of the user bytes for an allocation of `size` bytes
    /// starting at `data_offset`.
    pub fn data_mut(&mut self, data_offset: u32, size: usize) -> &mut [u8] {
        let start = data_offset as usize;
        &mut self.region[start..start + size]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn region(size: usize) -> Vec<u8> {
        vec![0u8; size]
    }

    #[test]
    fn first_allocation_starts_at_arena_base() {
        let mut backing = region(4096);
        let mut arena = Arena::init(&mut backing);
        let off = arena.allocate(16).unwrap();
        assert_eq!(off as usize, arena_start() + 8);
        assert_eq!(arena.last_allocated_offset(), Some(off));
    }

    #[test]
    fn allocations_link_prev_and_next() {
        let mut backing = region(4096);
        let mut arena = Arena::init(&mut backing);
        let a = arena.allocate(32).unwrap();
        let b = arena.allocate(32).unwrap();
        let c = arena.allocate(32).unwrap();

        let (a_prev, a_next) = arena.links_of(a);
        assert_eq!(a_prev, 0);
        assert_eq!(a_next, b);

        let (b_prev, b_next) = arena.links_of(b);
        assert_eq!(b_prev, a);
        assert_eq!(b_next, c);

        let (c_prev, c_next) = arena.links_of(c);
        assert_eq!(c_prev, b);
        assert_eq!(c_next, 0);
    }

    #[test]
    fn allocations_are_64_byte_aligned() {
        let mut backing = region(8192);
        let mut arena = Arena::init(&mut backing);
        for size in [1usize, 7, 63, 64, 65, 200] {
            let off = arena.allocate(size).unwrap();
            assert_eq!((off as usize - PREFIX_LEN) % ALLOC_ALIGNMENT, 0);
        }
    }

    #[test]
    fn allocate_fails_cleanly_when_region_exhausted() {
        let mut backing = region(512);
        let mut arena = Arena::init(&mut backing);
        let before = arena.load_control();
        let err = arena.allocate(4096).unwrap_err();
        assert!(matches!(err, ArenaError::OutOfMemory { .. }));
        assert_eq!(arena.load_control(), before, "failed allocation must not mutate state");
    }

    #[test]
    fn data_roundtrips_through_allocation() {
        let mut backing = region(4096);
        let mut arena = Arena::init(&mut backing);
        let off = arena.allocate(8).unwrap();
        arena.data_mut(off, 8).copy_from_slice(b"abcdefgh");
        assert_eq!(arena.data(off, 8), b"abcdefgh");
    }

    #[test]
    fn attach_sees_existing_allocations() {
        let mut backing = region(4096);
        let first_off;
        {
            let mut arena = Arena::init(&mut backing);
            first_off = arena.allocate(16).unwrap();
        }
        let mut arena = Arena::attach(&mut backing);
        let second_off = arena.allocate(16).unwrap();
        let (prev, _) = arena.links_of(second_off);
        assert_eq!(prev, first_off);
    }
}
