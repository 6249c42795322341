//! The four-counter `channel_sync` block (spec.md §3): `write_position`,
//! `read_position`, `free_position`, `reader_in_waiting_count`,
//! `active_reader_count`, and `terminate`, all mod-2^32 atomic counters.

use crate::shared::RawBuf;
use std::sync::atomic::Ordering;

/// Byte size of one `channel_sync` block.
pub const CHANNEL_SYNC_LEN: usize = 24;

const WRITE_POSITION: usize = 0;
const READ_POSITION: usize = 4;
const FREE_POSITION: usize = 8;
const READER_IN_WAITING_COUNT: usize = 12;
const ACTIVE_READER_COUNT: usize = 16;
const TERMINATE: usize = 20;

pub(crate) struct ChannelSync<'a> {
    bytes: RawBuf<'a>,
}

impl<'a> ChannelSync<'a> {
    pub(crate) fn init(block: &'a mut [u8]) -> Self {
        debug_assert_eq!(block.len(), CHANNEL_SYNC_LEN);
        block.fill(0);
        Self {
            bytes: RawBuf::new(block),
        }
    }

    pub(crate) fn attach(block: &'a mut [u8]) -> Self {
        debug_assert_eq!(block.len(), CHANNEL_SYNC_LEN);
        Self {
            bytes: RawBuf::new(block),
        }
    }

    pub(crate) fn write_position(&self) -> u32 {
        self.bytes.atomic_u32(WRITE_POSITION).load(Ordering::Relaxed)
    }

    pub(crate) fn cas_write_position(&self, current: u32, new: u32) -> bool {
        self.bytes
            .atomic_u32(WRITE_POSITION)
            .compare_exchange(current, new, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    pub(crate) fn set_write_position(&self, value: u32) {
        self.bytes.atomic_u32(WRITE_POSITION).store(value, Ordering::Relaxed);
    }

    /// The raw `write_position` word, used as a wakeup address: readers park
    /// on it and writers tickle it after publishing a frame.
    pub(crate) fn write_position_word(&self) -> &std::sync::atomic::AtomicU32 {
        self.bytes.atomic_u32(WRITE_POSITION)
    }

    pub(crate) fn read_position(&self) -> u32 {
        self.bytes.atomic_u32(READ_POSITION).load(Ordering::Acquire)
    }

    pub(crate) fn cas_read_position(&self, current: u32, new: u32) -> bool {
        self.bytes
            .atomic_u32(READ_POSITION)
            .compare_exchange(current, new, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    pub(crate) fn set_read_position(&self, value: u32) {
        self.bytes.atomic_u32(READ_POSITION).store(value, Ordering::Relaxed);
    }

    pub(crate) fn free_position(&self) -> u32 {
        self.bytes.atomic_u32(FREE_POSITION).load(Ordering::Acquire)
    }

    pub(crate) fn cas_free_position(&self, current: u32, new: u32) -> bool {
        self.bytes
            .atomic_u32(FREE_POSITION)
            .compare_exchange(current, new, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    pub(crate) fn set_free_position(&self, value: u32) {
        self.bytes.atomic_u32(FREE_POSITION).store(value, Ordering::Relaxed);
    }

    pub(crate) fn reader_in_waiting_count(&self) -> &std::sync::atomic::AtomicU32 {
        self.bytes.atomic_u32(READER_IN_WAITING_COUNT)
    }

    pub(crate) fn active_reader_count(&self) -> &std::sync::atomic::AtomicU32 {
        self.bytes.atomic_u32(ACTIVE_READER_COUNT)
    }

    pub(crate) fn terminate(&self) -> bool {
        self.bytes.atomic_u32(TERMINATE).load(Ordering::Acquire) != 0
    }

    pub(crate) fn set_terminate(&self, value: bool) {
        self.bytes
            .atomic_u32(TERMINATE)
            .store(value as u32, Ordering::Release);
    }
}
