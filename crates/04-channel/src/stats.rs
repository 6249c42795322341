//! Per-channel counters (supplemental feature from the original source, not
//! excluded by any Non-goal): frames written/read/dropped-invalid/link-frames
//! emitted, exposed as a read-only snapshot. Mirrors the shape of
//! `shmc-config`'s `DictionaryStats` and the workspace's port metrics
//! snapshot.

use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Default)]
pub(crate) struct ChannelStatsInner {
    frames_written: AtomicU64,
    frames_read: AtomicU64,
    frames_dropped_invalid: AtomicU64,
    link_frames_emitted: AtomicU64,
}

impl ChannelStatsInner {
    pub(crate) fn record_write(&self) {
        self.frames_written.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_read(&self) {
        self.frames_read.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_dropped_invalid(&self) {
        self.frames_dropped_invalid.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_link_frame(&self) {
        self.link_frames_emitted.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn snapshot(&self) -> ChannelStats {
        ChannelStats {
            frames_written: self.frames_written.load(Ordering::Relaxed),
            frames_read: self.frames_read.load(Ordering::Relaxed),
            frames_dropped_invalid: self.frames_dropped_invalid.load(Ordering::Relaxed),
            link_frames_emitted: self.link_frames_emitted.load(Ordering::Relaxed),
        }
    }
}

/// Read-only snapshot of a channel's lifetime counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ChannelStats {
    pub frames_written: u64,
    pub frames_read: u64,
    pub frames_dropped_invalid: u64,
    pub link_frames_emitted: u64,
}
