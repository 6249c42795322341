//! Wakeup capability (spec.md §9 "capability objects"): the read path parks
//! on `reader_in_waiting_count` plus the channel's `read_position` word
//! through a futex-like primitive instead of a fixed C++ template policy.
//!
//! Adapted from the workspace's native atomic-wait shim
//! (`transport/src/wait.rs`), generalized behind a trait so a context can
//! swap in a no-op spinning implementation where OS-level parking isn't
//! available or desired.

use std::sync::atomic::AtomicU32;

/// Parks and wakes readers blocked on a channel's wakeup word.
pub trait WaitPrimitive: Send + Sync {
    /// Blocks the caller until `atomic` no longer holds `expected`, or
    /// until woken. May return spuriously; callers re-check their
    /// condition in a loop (spec §4.4.2 step 4).
    fn wait(&self, atomic: &AtomicU32, expected: u32);

    /// Wakes at least one waiter parked on `atomic`.
    fn wake_one(&self, atomic: &AtomicU32);

    /// Wakes every waiter parked on `atomic`.
    fn wake_all(&self, atomic: &AtomicU32);
}

/// Futex-backed implementation for native targets, via the `atomic-wait`
/// crate (the same one the workspace's transport primitives use).
#[derive(Debug, Default, Clone, Copy)]
pub struct NativeWait;

#[cfg(not(target_arch = "wasm32"))]
impl WaitPrimitive for NativeWait {
    fn wait(&self, atomic: &AtomicU32, expected: u32) {
        atomic_wait::wait(atomic, expected);
    }

    fn wake_one(&self, atomic: &AtomicU32) {
        atomic_wait::wake_one(atomic as *const AtomicU32);
    }

    fn wake_all(&self, atomic: &AtomicU32) {
        atomic_wait::wake_all(atomic as *const AtomicU32);
    }
}

/// A wakeup primitive that never blocks: waiters spin-check and yield
/// instead. Useful for contexts that don't want OS-level parking (tests,
/// or single-core environments where futex syscalls dominate).
#[derive(Debug, Default, Clone, Copy)]
pub struct NoWakeup;

impl WaitPrimitive for NoWakeup {
    fn wait(&self, _atomic: &AtomicU32, _expected: u32) {
        std::thread::yield_now();
    }

    fn wake_one(&self, _atomic: &AtomicU32) {}

    fn wake_all(&self, _atomic: &AtomicU32) {}
}
