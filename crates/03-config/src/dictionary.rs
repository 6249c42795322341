//! Open-addressing dictionary mapping `(codegen_type_id, user_key)` to the
//! arena offset of a shared-config record (spec.md §4.3).
//!
//! The table itself lives at a fixed offset inside the host region; the
//! records it points to are bump-allocated out of an [`Arena`] that starts
//! right after the table. Table slots are reserve/publish, mirroring the
//! transport ring's reserve-then-commit convention: a writer first bump-
//! allocates and serializes its record (`reserve_slot`), then tries to CAS
//! its offset into the probed slot (`publish`). A losing writer's bytes stay
//! allocated but unreferenced — the arena has no `free`, so this is an
//! accepted, documented leak rather than a bug.

use crate::error::{ConfigError, ConfigResult};
use crate::record::{ConfigRecordHeader, CONFIG_RECORD_HEADER_LEN};
use shmc_arena::Arena;
use shmc_region::REGION_HEADER_LEN;
use std::sync::atomic::{AtomicU32, Ordering};

/// Default table size (spec.md §4.3).
pub const DEFAULT_TABLE_LEN: usize = 2048;

const SLOT_LEN: usize = std::mem::size_of::<u32>();

/// Per-type key comparison, supplied by the codegen layer for each config
/// type (spec.md §4.3's "compare key" predicate).
pub trait ConfigKey {
    /// Identifies which codegen type this key belongs to.
    fn codegen_type_index(&self) -> u32;

    /// The raw key bytes hashed and compared during probing.
    fn key_bytes(&self) -> &[u8];

    /// The full fixed+variable config body to store alongside the record
    /// header, serialized by the caller.
    fn body_bytes(&self) -> &[u8];

    /// Returns true if `stored_body` (the bytes immediately following a
    /// matching record header) represents the same key as `self`.
    fn matches_stored(&self, stored_body: &[u8]) -> bool {
        let key = self.key_bytes();
        stored_body.len() >= key.len() && &stored_body[..key.len()] == key
    }
}

/// FNV-1a-32 over the key bytes (spec.md §9: plain FNV-1a, no extra mixing).
pub fn fnv1a_32(bytes: &[u8]) -> u32 {
    const OFFSET_BASIS: u32 = 0x811c_9dc5;
    const PRIME: u32 = 0x0100_0193;
    let mut hash = OFFSET_BASIS;
    for &byte in bytes {
        hash ^= byte as u32;
        hash = hash.wrapping_mul(PRIME);
    }
    hash
}

/// Read-only snapshot of dictionary occupancy, for diagnostics.
///
/// Supplemental feature (not in any Non-goal): mirrors the port metrics
/// snapshot shape used elsewhere in the workspace.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DictionaryStats {
    pub table_len: usize,
    pub occupied_slots: usize,
    pub max_probe_depth: usize,
}

/// An empty slot was found during probing, but its record has not yet been
/// published into the table.
pub struct ReservedSlot {
    slot: usize,
    offset: u32,
}

/// A view of the shared-config dictionary embedded in a host region.
pub struct Dictionary<'a> {
    region: &'a mut [u8],
    table_offset: usize,
    table_len: usize,
}

impl<'a> Dictionary<'a> {
    /// Initializes a fresh dictionary whose table starts immediately after
    /// the plain region header: zeroes the table, then initializes the
    /// arena that follows it. Must be called exactly once, when the host
    /// region is created.
    pub fn init(region: &'a mut [u8], table_len: usize) -> Self {
        Self::init_at(region, REGION_HEADER_LEN, table_len)
    }

    /// Initializes a fresh dictionary whose table starts at `table_offset`
    /// inside `region`, rather than immediately after a plain region header
    /// (e.g. the global region, which prefixes the table with its own
    /// counters and two `channel_sync` blocks).
    pub fn init_at(region: &'a mut [u8], table_offset: usize, table_len: usize) -> Self {
        let table_end = table_offset + table_len * SLOT_LEN;
        assert!(region.len() > table_end, "region too small for dictionary table");
        region[table_offset..table_end].fill(0);
        let _ = Arena::init_at(region, table_end);
        Self {
            region,
            table_offset,
            table_len,
        }
    }

    /// Wraps an already-initialized dictionary (attach path).
    pub fn attach(region: &'a mut [u8], table_len: usize) -> Self {
        Self::attach_at(region, REGION_HEADER_LEN, table_len)
    }

    /// Wraps an already-initialized dictionary whose table lives at
    /// `table_offset` inside `region`.
    pub fn attach_at(region: &'a mut [u8], table_offset: usize, table_len: usize) -> Self {
        Self {
            region,
            table_offset,
            table_len,
        }
    }

    fn table_end(&self) -> usize {
        self.table_offset + self.table_len * SLOT_LEN
    }

    fn slot_atomic(&self, index: usize) -> &AtomicU32 {
        let offset = self.table_offset + index * SLOT_LEN;
        // SAFETY: `offset` is within `self.region`, 4-byte aligned (`TABLE_OFFSET`
        // and `SLOT_LEN` are both multiples of 4), and the table's backing bytes
        // are never aliased as anything else for the dictionary's lifetime.
        unsafe { &*(self.region.as_ptr().add(offset) as *const AtomicU32) }
    }

    fn read_slot(&self, index: usize) -> u32 {
        self.slot_atomic(index).load(Ordering::Acquire)
    }

    fn record_body(&self, offset: u32) -> &[u8] {
        let start = offset as usize + CONFIG_RECORD_HEADER_LEN;
        &self.region[start..]
    }

    /// Public counterpart of [`Dictionary::record_body`], for callers that
    /// already have an offset from [`Dictionary::lookup`] or
    /// [`Dictionary::create_or_update`] and need to read back the stored
    /// record (e.g. to recover a value assigned by whichever writer won a
    /// publish race).
    pub fn stored_body(&self, offset: u32) -> &[u8] {
        self.record_body(offset)
    }

    fn record_header(&self, offset: u32) -> ConfigRecordHeader {
        let start = offset as usize;
        ConfigRecordHeader::read_le(&self.region[start..start + CONFIG_RECORD_HEADER_LEN])
    }

    /// Looks up `key`; returns `Ok(Some(offset))` on a matching occupied
    /// slot, `Ok(None)` if probing reaches an empty slot first.
    pub fn lookup(&self, key: &impl ConfigKey) -> ConfigResult<Option<u32>> {
        let start = fnv1a_32(key.key_bytes()) as usize % self.table_len;
        for probe in 0..self.table_len {
            let index = (start + probe) % self.table_len;
            let offset = self.read_slot(index);
            if offset == 0 {
                return Ok(None);
            }
            let header = self.record_header(offset);
            if header.codegen_type_index == key.codegen_type_index()
                && key.matches_stored(self.record_body(offset))
            {
                return Ok(Some(offset));
            }
        }
        Err(ConfigError::TableFull {
            probed: self.table_len,
        })
    }

    /// Bump-allocates and serializes a record for `key` at the first empty
    /// slot found while probing from `key`'s home slot. Does not touch the
    /// table — callers finish the insert with [`Dictionary::publish`].
    pub fn reserve_slot(&mut self, key: &impl ConfigKey) -> ConfigResult<ReservedSlot> {
        let start = fnv1a_32(key.key_bytes()) as usize % self.table_len;
        let table_end = self.table_end();
        for probe in 0..self.table_len {
            let index = (start + probe) % self.table_len;
            if self.read_slot(index) == 0 {
                let body = key.body_bytes();
                let record_len = CONFIG_RECORD_HEADER_LEN + body.len();
                let mut arena = Arena::attach_at(self.region, table_end);
                let offset = arena.allocate(record_len)?;
                let header = ConfigRecordHeader::new(offset, key.codegen_type_index());
                let dest = arena.data_mut(offset, record_len);
                header.write_le(&mut dest[..CONFIG_RECORD_HEADER_LEN]);
                dest[CONFIG_RECORD_HEADER_LEN..].copy_from_slice(body);
                return Ok(ReservedSlot { slot: index, offset });
            }
        }
        Err(ConfigError::TableFull {
            probed: self.table_len,
        })
    }

    /// Tries to publish a reserved record's offset into its slot via CAS.
    /// Returns `true` on success; `false` means another writer won the race
    /// and `slot.offset`'s bytes are now orphaned (spec.md §4.3).
    pub fn publish(&mut self, slot: &ReservedSlot) -> bool {
        self.slot_atomic(slot.slot)
            .compare_exchange(0, slot.offset, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Full create-or-update: probes for `key`, rebinding to a matching
    /// occupied slot, or reserving and publishing a new record. On a lost
    /// publish race, retries the probe from the contested slot as an
    /// occupied lookup, rebinding if the winner's key matches (spec.md
    /// §4.3's documented "losing writer leaks arena bytes" behavior).
    pub fn create_or_update(&mut self, key: &impl ConfigKey) -> ConfigResult<u32> {
        loop {
            let reserved = match self.reserve_slot(key) {
                Ok(reserved) => reserved,
                Err(ConfigError::TableFull { probed }) => {
                    // Every slot we saw was occupied; check once more for a match.
                    if let Some(offset) = self.lookup(key)? {
                        return Ok(offset);
                    }
                    tracing::warn!(probed, "dictionary table full, rejecting create_or_update");
                    return Err(ConfigError::TableFull { probed });
                }
                Err(other) => return Err(other),
            };

            if self.publish(&reserved) {
                return Ok(reserved.offset);
            }

            // Lost the race: the slot is now occupied. If the winner's key
            // matches ours, rebind to it; our own reservation is leaked.
            let winner_offset = self.read_slot(reserved.slot);
            let header = self.record_header(winner_offset);
            if header.codegen_type_index == key.codegen_type_index()
                && key.matches_stored(self.record_body(winner_offset))
            {
                return Ok(winner_offset);
            }
            // Someone else's key landed here first; keep probing past it.
        }
    }

    /// Read-only occupancy snapshot for diagnostics.
    ///
    /// `max_probe_depth` is the longest run of consecutive occupied slots
    /// (wrapping around the table), a proxy for worst-case probe length
    /// under linear probing without needing each record's original key.
    pub fn stats(&self) -> DictionaryStats {
        let occupied: Vec<bool> = (0..self.table_len)
            .map(|index| self.read_slot(index) != 0)
            .collect();
        let occupied_slots = occupied.iter().filter(|&&o| o).count();

        let mut max_probe_depth = 0;
        if occupied_slots > 0 && occupied_slots < self.table_len {
            let mut run = 0;
            // Walk twice around so a run that wraps past index 0 is counted once.
            for index in 0..self.table_len * 2 {
                if occupied[index % self.table_len] {
                    run += 1;
                    max_probe_depth = max_probe_depth.max(run);
                } else {
                    run = 0;
                }
            }
            max_probe_depth = max_probe_depth.min(self.table_len);
        } else if occupied_slots == self.table_len {
            max_probe_depth = self.table_len;
        }

        DictionaryStats {
            table_len: self.table_len,
            occupied_slots,
            max_probe_depth,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct TestKey {
        type_index: u32,
        key: Vec<u8>,
        body: Vec<u8>,
    }

    impl ConfigKey for TestKey {
        fn codegen_type_index(&self) -> u32 {
            self.type_index
        }
        fn key_bytes(&self) -> &[u8] {
            &self.key
        }
        fn body_bytes(&self) -> &[u8] {
            &self.body
        }
    }

    fn key(name: &str, value: &str) -> TestKey {
        TestKey {
            type_index: 1,
            key: name.as_bytes().to_vec(),
            body: value.as_bytes().to_vec(),
        }
    }

    fn region(size: usize) -> Vec<u8> {
        vec![0u8; size]
    }

    #[test]
    fn insert_then_lookup_round_trips() {
        let mut backing = region(1 << 16);
        let mut dict = Dictionary::init(&mut backing, 64);
        let k = key("max_threads", "8");
        let offset = dict.create_or_update(&k).unwrap();
        assert_eq!(dict.lookup(&k).unwrap(), Some(offset));
        assert_eq!(dict.record_body(offset), b"8");
    }

    #[test]
    fn lookup_on_empty_table_is_not_found() {
        let mut backing = region(1 << 16);
        let dict = Dictionary::init(&mut backing, 64);
        let k = key("anything", "");
        assert_eq!(dict.lookup(&k).unwrap(), None);
    }

    #[test]
    fn repeated_create_or_update_is_idempotent() {
        let mut backing = region(1 << 16);
        let mut dict = Dictionary::init(&mut backing, 64);
        let k = key("retry_count", "3");
        let first = dict.create_or_update(&k).unwrap();
        let second = dict.create_or_update(&k).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn losing_writer_rebinds_and_leaks_its_reservation() {
        let mut backing = region(1 << 16);
        let mut dict = Dictionary::init(&mut backing, 64);
        let k = key("shared_knob", "first");

        let a = dict.reserve_slot(&k).unwrap();
        let b = dict.reserve_slot(&k).unwrap();
        assert_eq!(a.slot, b.slot, "both writers target the same home slot");
        assert_ne!(a.offset, b.offset, "each writer gets its own arena allocation");

        assert!(dict.publish(&a));
        assert!(!dict.publish(&b), "second publish must lose the CAS race");

        let resolved = dict.create_or_update(&k).unwrap();
        assert_eq!(resolved, a.offset, "winner's record is the one the table resolves to");

        let stats = dict.stats();
        assert_eq!(stats.occupied_slots, 1, "only the winning slot is occupied");
    }

    #[test]
    fn distinct_keys_colliding_on_hash_still_resolve_independently() {
        let mut backing = region(1 << 16);
        let mut dict = Dictionary::init(&mut backing, 4);
        let a = key("alpha", "1");
        let b = key("beta", "2");
        let off_a = dict.create_or_update(&a).unwrap();
        let off_b = dict.create_or_update(&b).unwrap();
        assert_ne!(off_a, off_b);
        assert_eq!(dict.lookup(&a).unwrap(), Some(off_a));
        assert_eq!(dict.lookup(&b).unwrap(), Some(off_b));
    }

    #[test]
    fn table_full_without_a_match_is_reported() {
        let mut backing = region(1 << 20);
        let mut dict = Dictionary::init(&mut backing, 2);
        dict.create_or_update(&key("one", "1")).unwrap();
        dict.create_or_update(&key("two", "2")).unwrap();
        let err = dict.create_or_update(&key("three", "3")).unwrap_err();
        assert!(matches!(err, ConfigError::TableFull { .. }));
    }
}
