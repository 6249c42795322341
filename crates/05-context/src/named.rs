//! Named-mode construction (spec.md §4.5): the four regions live at
//! well-known paths under the configured socket folder.
//!
//! Native `atomic-wait` futex words work on any shared mapping regardless of
//! whether it has a name — the actual problem named mode has to solve is
//! detecting the *last detacher* so it can unlink the backing files. The
//! in-region `attached_process_count` counter handles the common decrement
//! path, but a process that crashes never runs its decrement. We therefore
//! also take an advisory `flock` on a small lockfile next to the mapped
//! files: the kernel releases a crashed process's lock automatically, so a
//! non-blocking exclusive-lock attempt at close time reliably answers "is
//! anyone else still attached", independent of whether every peer exited
//! cleanly. This is the Open Question resolution spec.md leaves to the
//! platform's named-semaphore equivalent, recorded in `DESIGN.md`.

use crate::config::CoreConfig;
use crate::error::{ContextError, ContextResult};
use shmc_region::Region;
use std::fs::{File, OpenOptions};
use std::os::fd::AsRawFd;
use std::path::{Path, PathBuf};

fn region_path(socket_folder: &Path, leaf: &str) -> PathBuf {
    socket_folder.join(leaf)
}

pub(crate) struct NamedPaths {
    pub(crate) global: PathBuf,
    pub(crate) control: PathBuf,
    pub(crate) feedback: PathBuf,
    pub(crate) shared_config: PathBuf,
    pub(crate) refcount_lock: PathBuf,
}

impl NamedPaths {
    pub(crate) fn new(socket_folder: &Path) -> Self {
        Self {
            global: region_path(socket_folder, "mlos.global.shm"),
            control: region_path(socket_folder, "mlos.control.shm"),
            feedback: region_path(socket_folder, "mlos.feedback.shm"),
            shared_config: region_path(socket_folder, "mlos.config.shm"),
            refcount_lock: region_path(socket_folder, "mlos.refcount.lock"),
        }
    }
}

/// An advisory shared lock held for as long as this process is attached to
/// the named resources; dropped (and thus released, even on crash, by the
/// kernel) when the process detaches.
pub(crate) struct RefcountLock {
    file: File,
}

impl RefcountLock {
    pub(crate) fn acquire(path: &Path) -> ContextResult<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(path)
            .map_err(ContextError::os)?;
        // SAFETY: `fd` is a valid, open file descriptor for the duration of
        // this call.
        let rc = unsafe { libc::flock(file.as_raw_fd(), libc::LOCK_SH) };
        if rc != 0 {
            return Err(ContextError::os(std::io::Error::last_os_error()));
        }
        Ok(Self { file })
    }

    /// Returns `true` if, at the moment of the call, this process appears to
    /// be the last one holding the shared lock (no other shared holder is
    /// currently preventing a non-blocking exclusive upgrade).
    pub(crate) fn is_last_holder(&self) -> bool {
        // SAFETY: `self.file` outlives this call.
        let rc = unsafe { libc::flock(self.file.as_raw_fd(), libc::LOCK_EX | libc::LOCK_NB) };
        rc == 0
    }
}

pub(crate) struct NamedRegions {
    pub(crate) global: Region,
    pub(crate) control: Region,
    pub(crate) feedback: Region,
    pub(crate) shared_config: Region,
    pub(crate) refcount: RefcountLock,
    pub(crate) created: bool,
}

/// Creates all four named regions fresh. Used by the process that first
/// brings up an agent.
pub(crate) fn create_all(config: &CoreConfig, global_size: usize) -> ContextResult<NamedRegions> {
    std::fs::create_dir_all(&config.socket_folder).map_err(ContextError::os)?;
    let paths = NamedPaths::new(&config.socket_folder);

    let global = Region::create_named(&paths.global, global_size)?;
    let control = Region::create_named(&paths.control, config.control_channel_size)?;
    let feedback = Region::create_named(&paths.feedback, config.feedback_channel_size)?;
    let shared_config = Region::create_named(&paths.shared_config, config.shared_config_memory_size)?;
    let refcount = RefcountLock::acquire(&paths.refcount_lock)?;

    Ok(NamedRegions {
        global,
        control,
        feedback,
        shared_config,
        refcount,
        created: true,
    })
}

/// Attaches to all four named regions created by another process.
pub(crate) fn attach_all(config: &CoreConfig) -> ContextResult<NamedRegions> {
    let paths = NamedPaths::new(&config.socket_folder);

    let global = Region::attach_named(&paths.global)?;
    let control = Region::attach_named(&paths.control)?;
    let feedback = Region::attach_named(&paths.feedback)?;
    let shared_config = Region::attach_named(&paths.shared_config)?;
    let refcount = RefcountLock::acquire(&paths.refcount_lock)?;

    Ok(NamedRegions {
        global,
        control,
        feedback,
        shared_config,
        refcount,
        created: false,
    })
}

/// Closes all four regions, unlinking the backing files only if
/// `refcount.is_last_holder()` says no other process is still attached. The
/// refcount lockfile itself is left in place even on last-detach cleanup —
/// harmless, since the next creator just reopens and re-locks the same path.
pub(crate) fn close_all(regions: NamedRegions) {
    let cleanup = regions.refcount.is_last_holder();
    regions.global.close(cleanup);
    regions.control.close(cleanup);
    regions.feedback.close(cleanup);
    regions.shared_config.close(cleanup);
}
