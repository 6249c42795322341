//! The ring channel itself (spec.md §4.4): write path, read path, free
//! advancement, and crash recovery over a dedicated `S = 2^N`-byte region.

use crate::dispatch::DispatchTable;
use crate::error::{ChannelError, ChannelResult};
use crate::frame::{decode_length, encode_free, encode_incomplete, encode_ready, FrameHeaderView, FrameState, FRAME_HEADER_LEN, LINK_FRAME_TYPE_INDEX};
use crate::policy::{InvalidFrameReason, InvalidFramePolicy};
use crate::shared::RawBuf;
use crate::stats::{ChannelStats, ChannelStatsInner};
use crate::sync::{ChannelSync, CHANNEL_SYNC_LEN};
use crate::variable::{verify_variable_regions, write_slot_at, VarSlot, VariableField, VAR_SLOT_LEN};
use crate::wait::WaitPrimitive;
use std::sync::atomic::Ordering;
use std::sync::Arc;

/// Minimum ring size, chosen so a handful of small frames fit comfortably;
/// the hard requirement from spec §4.4 is only "power of two >= 4".
pub const MIN_RING_SIZE: usize = 64;

fn align_up_4(value: usize) -> usize {
    (value + 3) & !3
}

/// A single channel: a dedicated ring buffer region plus the `channel_sync`
/// counters that live in the host's global region.
///
/// Not generic over a borrowed lifetime on purpose: the ring is driven by
/// multiple OS threads with no locks, so every accessor takes `&self` and
/// synchronizes purely through atomics, the same design the workspace's
/// message ring uses for its own header counters.
pub struct Ring<'a> {
    buffer: RawBuf<'a>,
    sync: ChannelSync<'a>,
    wait: Arc<dyn WaitPrimitive>,
    policy: Arc<dyn InvalidFramePolicy>,
    dispatch: DispatchTable,
    stats: ChannelStatsInner,
}

// SAFETY: every mutable access to `buffer` and `sync` goes through atomics
// or is confined to a frame a caller has proven ownership of via a
// successful CAS; see `shared::RawBuf` and `sync::ChannelSync`.
unsafe impl<'a> Send for Ring<'a> {}
unsafe impl<'a> Sync for Ring<'a> {}

/// RAII marker for a thread that is inside a channel's dispatch loop,
/// maintaining `channel_sync.active_reader_count` (spec.md §3).
pub struct ReaderGuard<'a, 'b> {
    ring: &'b Ring<'a>,
}

impl<'a, 'b> Drop for ReaderGuard<'a, 'b> {
    fn drop(&mut self) {
        self.ring.sync.active_reader_count().fetch_sub(1, Ordering::AcqRel);
    }
}

impl<'a> Ring<'a> {
    fn validate_region_size(buffer: &[u8]) -> ChannelResult<()> {
        let size = buffer.len();
        if size < MIN_RING_SIZE || !size.is_power_of_two() {
            return Err(ChannelError::InvalidRegionSize {
                size,
                min: MIN_RING_SIZE,
            });
        }
        Ok(())
    }

    /// Initializes a fresh channel: zeroes the ring and the sync block.
    /// Must be called exactly once, when the channel region is created.
    pub fn init(
        buffer: &'a mut [u8],
        sync_block: &'a mut [u8],
        wait: Arc<dyn WaitPrimitive>,
        policy: Arc<dyn InvalidFramePolicy>,
        dispatch: DispatchTable,
    ) -> ChannelResult<Self> {
        Self::validate_region_size(buffer)?;
        assert_eq!(sync_block.len(), CHANNEL_SYNC_LEN);
        buffer.fill(0);
        Ok(Self {
            buffer: RawBuf::new(buffer),
            sync: ChannelSync::init(sync_block),
            wait,
            policy,
            dispatch,
            stats: ChannelStatsInner::default(),
        })
    }

    /// Wraps an already-initialized channel (attach path). Callers should
    /// follow up with [`Ring::initialize`] to recover from a crashed peer.
    pub fn attach(
        buffer: &'a mut [u8],
        sync_block: &'a mut [u8],
        wait: Arc<dyn WaitPrimitive>,
        policy: Arc<dyn InvalidFramePolicy>,
        dispatch: DispatchTable,
    ) -> ChannelResult<Self> {
        Self::validate_region_size(buffer)?;
        assert_eq!(sync_block.len(), CHANNEL_SYNC_LEN);
        Ok(Self {
            buffer: RawBuf::new(buffer),
            sync: ChannelSync::attach(sync_block),
            wait,
            policy,
            dispatch,
            stats: ChannelStatsInner::default(),
        })
    }

    fn ring_size(&self) -> usize {
        self.buffer.len()
    }

    fn margin(&self) -> usize {
        self.ring_size() - FRAME_HEADER_LEN
    }

    pub fn stats(&self) -> ChannelStats {
        self.stats.snapshot()
    }

    /// Registers the calling thread as an active reader for the lifetime of
    /// the returned guard (spec.md §3 `active_reader_count`).
    pub fn enter_reader<'b>(&'b self) -> ReaderGuard<'a, 'b> {
        self.sync.active_reader_count().fetch_add(1, Ordering::AcqRel);
        ReaderGuard { ring: self }
    }

    /// Sets `terminate` and wakes any reader currently blocked, per
    /// spec.md §4.5's drain sequence.
    pub fn terminate(&self) {
        self.sync.set_terminate(true);
        self.wait.wake_all(self.sync.write_position_word());
    }

    pub fn is_terminated(&self) -> bool {
        self.sync.terminate()
    }

    pub fn active_reader_count(&self) -> u32 {
        self.sync.active_reader_count().load(Ordering::Acquire)
    }

    // ---- write path (spec §4.4.1) ----

    pub fn write(
        &self,
        type_index: u32,
        type_hash: u64,
        fixed: &[u8],
        variable_fields: &[VariableField],
    ) -> ChannelResult<()> {
        if type_index == LINK_FRAME_TYPE_INDEX {
            return Err(ChannelError::ReservedTypeIndex);
        }
        let variable_len: usize = variable_fields.iter().map(|f| f.data.len()).sum();
        let payload_len = fixed.len() + variable_len;
        let frame_length = align_up_4(FRAME_HEADER_LEN + payload_len) as u32;
        let margin = self.margin() as u32;
        if frame_length > margin {
            return Err(ChannelError::PayloadTooLarge {
                requested: payload_len,
                ring_size: self.ring_size(),
                margin: self.margin(),
            });
        }

        let (offset, stored_length) = self.acquire_frame(frame_length)?;
        self.populate_real_frame(offset as usize, stored_length, type_index, type_hash, fixed, variable_fields);
        self.stats.record_write();

        if self.sync.reader_in_waiting_count().load(Ordering::Acquire) > 0 {
            self.wait.wake_all(self.sync.write_position_word());
        }
        Ok(())
    }

    /// Reserves a span for a frame of exactly `frame_length` bytes of real
    /// content, returning the byte offset within the ring where its header
    /// starts and the length actually stored in the header (>= `frame_length`
    /// when trailing padding had to be folded in, see below).
    fn acquire_frame(&self, frame_length: u32) -> ChannelResult<(u32, u32)> {
        loop {
            let free_position = self.sync.free_position();
            let write_position = self.sync.write_position();
            let margin = self.margin() as u32;

            if write_position.wrapping_sub(free_position) >= margin.wrapping_sub(frame_length) {
                if self.sync.terminate() {
                    return Err(ChannelError::Terminated);
                }
                self.advance_free_position();
                std::thread::yield_now();
                continue;
            }

            let ring_size = self.ring_size() as u32;
            let offset = write_position % ring_size;

            if offset + frame_length > ring_size {
                // Doesn't fit before the physical end: reserve exactly up
                // to the boundary as a link frame and retry from offset 0.
                let link_len = ring_size - offset;
                let reserved_end = write_position.wrapping_add(link_len);
                if self.sync.cas_write_position(write_position, reserved_end) {
                    self.populate_link_frame(offset as usize, link_len);
                    self.stats.record_link_frame();
                }
                continue;
            }

            // If the frame that fits right after this one wouldn't have
            // room for even its own header before the physical end, pad
            // this frame's own stored length to swallow that remainder —
            // there's no way to drop a second, separately-headered frame
            // into a gap smaller than a header. The real content written
            // still only occupies `frame_length` bytes; the rest is
            // trailing zero padding a reader skips as part of this frame.
            let next_write_position = write_position.wrapping_add(frame_length);
            let next_offset = next_write_position % ring_size;
            let padding = if next_offset != 0 && ring_size - next_offset < FRAME_HEADER_LEN as u32 {
                ring_size - next_offset
            } else {
                0
            };
            let stored_length = frame_length + padding;
            let reserved_end = write_position.wrapping_add(stored_length);

            if !self.sync.cas_write_position(write_position, reserved_end) {
                continue;
            }

            return Ok((offset, stored_length));
        }
    }

    fn populate_link_frame(&self, offset: usize, len: u32) {
        debug_assert!(len as usize >= FRAME_HEADER_LEN);
        let header = FrameHeaderView::at(&self.buffer, offset);
        header.store_length(encode_incomplete(len), Ordering::Relaxed);
        header.write_type_fields(LINK_FRAME_TYPE_INDEX, 0);
        let payload_len = len as usize - FRAME_HEADER_LEN;
        if payload_len > 0 {
            self.buffer.zero(offset + FRAME_HEADER_LEN, payload_len);
        }
        header.store_length(encode_ready(len), Ordering::Release);
    }

    fn populate_real_frame(
        &self,
        offset: usize,
        stored_length: u32,
        type_index: u32,
        type_hash: u64,
        fixed: &[u8],
        variable_fields: &[VariableField],
    ) {
        let header = FrameHeaderView::at(&self.buffer, offset);
        header.store_length(encode_incomplete(stored_length), Ordering::Relaxed);
        header.write_type_fields(type_index, type_hash);

        let payload_offset = header.payload_offset();
        self.buffer.write_bytes(payload_offset, fixed);

        let mut cursor = fixed.len() as u32;
        for field in variable_fields {
            let slot = VarSlot {
                offset: cursor,
                size: field.data.len() as u32,
            };
            let mut slot_bytes = [0u8; VAR_SLOT_LEN];
            write_slot_at(&mut slot_bytes, 0, slot);
            self.buffer.write_bytes(payload_offset + field.slot_offset, &slot_bytes);
            self.buffer.write_bytes(payload_offset + cursor as usize, field.data);
            cursor += field.data.len() as u32;
        }

        // Trailing bytes folded into `stored_length` as wrap padding (see
        // `acquire_frame`) carry no content of their own; clear them so a
        // reader never sees a previous lap's stale bytes there.
        let payload_capacity = stored_length as usize - FRAME_HEADER_LEN;
        if (cursor as usize) < payload_capacity {
            self.buffer.zero(payload_offset + cursor as usize, payload_capacity - cursor as usize);
        }

        header.store_length(encode_ready(stored_length), Ordering::Release);
    }

    // ---- read path (spec §4.4.2) ----

    /// Blocks until either one frame is dispatched (returns `Ok(true)`) or
    /// `terminate` is observed with nothing left to dispatch
    /// (returns `Ok(false)`).
    pub fn try_dispatch_one(&self) -> ChannelResult<bool> {
        loop {
            let read_position = self.sync.read_position();
            let ring_size = self.ring_size() as u32;
            let offset = (read_position % ring_size) as usize;
            let header = FrameHeaderView::at(&self.buffer, offset);
            let raw_length = header.load_length(Ordering::Acquire);

            if raw_length > 0 {
                let size = (raw_length as u32) & !1;
                let next_read_position = read_position.wrapping_add(size);
                if !self.sync.cas_read_position(read_position, next_read_position) {
                    std::thread::yield_now();
                    continue;
                }
                loop {
                    let cur = header.load_length(Ordering::Acquire);
                    if cur & 1 == 0 {
                        break;
                    }
                    std::hint::spin_loop();
                }
                self.dispatch_owned_frame(offset, size);
                self.stats.record_read();
                return Ok(true);
            }

            if self.sync.terminate() {
                return Ok(false);
            }

            // Increment-then-recheck-then-wait, in that order, to avoid the
            // lost-wakeup race (spec §4.4.2 step 4).
            self.sync.reader_in_waiting_count().fetch_add(1, Ordering::AcqRel);
            let still_raw = header.load_length(Ordering::Acquire);
            if still_raw != raw_length || self.sync.terminate() {
                self.sync.reader_in_waiting_count().fetch_sub(1, Ordering::AcqRel);
                continue;
            }
            let expected = self.sync.write_position_word().load(Ordering::Acquire);
            self.wait.wait(self.sync.write_position_word(), expected);
            self.sync.reader_in_waiting_count().fetch_sub(1, Ordering::AcqRel);
        }
    }

    fn dispatch_owned_frame(&self, offset: usize, size: u32) {
        let header = FrameHeaderView::at(&self.buffer, offset);
        let (type_index, type_hash) = header.read_type_fields();

        if type_index == LINK_FRAME_TYPE_INDEX {
            let payload_len = size as usize - FRAME_HEADER_LEN;
            if payload_len > 0 {
                self.buffer.zero(offset + FRAME_HEADER_LEN, payload_len);
            }
            header.store_length(encode_free(size), Ordering::Release);
            return;
        }

        if !self.validate_and_dispatch(offset, size, type_index, type_hash) {
            self.stats.record_dropped_invalid();
        }

        let payload_len = size as usize - FRAME_HEADER_LEN;
        if payload_len > 0 {
            self.buffer.zero(offset + FRAME_HEADER_LEN, payload_len);
        }
        header.store_length(encode_free(size), Ordering::Release);
    }

    fn validate_and_dispatch(&self, offset: usize, size: u32, type_index: u32, type_hash: u64) -> bool {
        let table_len = self.dispatch.len();
        if type_index == 0 || type_index as usize > table_len {
            self.policy.on_invalid_frame(InvalidFrameReason::TypeIndexOutOfRange { type_index, table_len });
            return false;
        }
        let entry = self.dispatch.get(type_index).expect("bounds checked above");
        if entry.type_hash != type_hash {
            self.policy.on_invalid_frame(InvalidFrameReason::TypeHashMismatch { type_index });
            return false;
        }
        if size as usize >= self.ring_size() {
            self.policy.on_invalid_frame(InvalidFrameReason::LengthExceedsRegion {
                length: size,
                region_size: self.ring_size(),
            });
            return false;
        }
        let payload_capacity = size as usize - FRAME_HEADER_LEN;
        let payload = self.buffer.read_bytes(offset + FRAME_HEADER_LEN, payload_capacity);
        if !verify_variable_regions(payload, entry.variable_fields, entry.fixed_len, payload_capacity) {
            self.policy.on_invalid_frame(InvalidFrameReason::VariableRegionVerificationFailed);
            return false;
        }
        (entry.callback)(payload);
        true
    }

    // ---- free advancement (spec §4.4.3) ----

    fn advance_free_position(&self) {
        loop {
            let free_position = self.sync.free_position();
            let read_position = self.sync.read_position();
            if free_position == read_position {
                return;
            }
            let ring_size = self.ring_size() as u32;
            let offset = (free_position % ring_size) as usize;
            let header = FrameHeaderView::at(&self.buffer, offset);
            let raw = header.load_length(Ordering::Acquire);
            if raw >= 0 {
                return;
            }
            let size = (-raw) as u32;
            let next_free_position = free_position.wrapping_add(size);
            self.sync.cas_free_position(free_position, next_free_position);
        }
    }

    // ---- recovery / re-initialization (spec §4.4.4) ----

    /// Tolerates a crashed prior peer: clears `terminate`, reclaims any
    /// free-marked prefix, converts stranded crashed-writer or stranded
    /// reader-done frames into skippable synthetic link frames, then resets
    /// `read_position` so a fresh reader starts from `free_position`.
    pub fn initialize(&self) {
        self.sync.set_terminate(false);
        self.advance_free_position();

        let ring_size = self.ring_size() as u32;
        let write_position = self.sync.write_position();
        let mut position = self.sync.free_position();

        while position != write_position {
            let offset = (position % ring_size) as usize;
            let header = FrameHeaderView::at(&self.buffer, offset);
            let raw = header.load_length(Ordering::Acquire);

            let size = match decode_length(raw) {
                FrameState::Empty => break,
                FrameState::Ready(size) => size,
                FrameState::WriterPopulating(size) | FrameState::ReaderDone(size) => {
                    let payload_len = size as usize - FRAME_HEADER_LEN;
                    if payload_len > 0 {
                        self.buffer.zero(offset + FRAME_HEADER_LEN, payload_len);
                    }
                    header.write_type_fields(LINK_FRAME_TYPE_INDEX, 0);
                    header.store_length(encode_ready(size), Ordering::Release);
                    size
                }
            };
            position = position.wrapping_add(size);
        }

        self.sync.set_read_position(self.sync.free_position());
    }
}
