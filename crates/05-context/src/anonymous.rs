//! Anonymous-mode construction (spec.md §4.5 step 1): connect to an
//! already-running agent and receive its region descriptors, or create our
//! own anonymous mappings and wait for an agent to show up later.

use crate::config::CoreConfig;
use crate::error::{ContextError, ContextResult};
use crate::fd_exchange::request_region;
use crate::watcher::DescriptorWatcher;
use shmc_region::{Region, RegionType};
use std::os::fd::AsRawFd;
use std::os::unix::net::UnixStream;

pub(crate) struct AnonymousRegions {
    pub(crate) global: Region,
    pub(crate) control: Region,
    pub(crate) feedback: Region,
    pub(crate) shared_config: Region,
    /// `Some` once we created our own mappings and are waiting to hand them
    /// off to an agent that may appear later.
    pub(crate) watcher: Option<DescriptorWatcher>,
}

/// Builds the four regions for anonymous mode: by asking a live agent for
/// descriptors if one is already listening, or by creating our own shareable
/// anonymous mappings and arming the sentinel watcher otherwise.
pub(crate) fn construct(config: &CoreConfig, global_size: usize) -> ContextResult<AnonymousRegions> {
    match UnixStream::connect(config.socket_path()) {
        Ok(stream) => attach_via_agent(&stream),
        Err(_) => create_own_and_watch(config, global_size),
    }
}

fn attach_via_agent(stream: &UnixStream) -> ContextResult<AnonymousRegions> {
    let global = request_and_attach(stream, RegionType::Global)?;
    let control = request_and_attach(stream, RegionType::Control)?;
    let feedback = request_and_attach(stream, RegionType::Feedback)?;
    let shared_config = request_and_attach(stream, RegionType::SharedConfig)?;
    Ok(AnonymousRegions {
        global,
        control,
        feedback,
        shared_config,
        watcher: None,
    })
}

fn request_and_attach(stream: &UnixStream, region_type: RegionType) -> ContextResult<Region> {
    let (record, fd) = request_region(stream, region_type, 0)?;
    let fd = fd.ok_or(ContextError::RegionNotFound {
        region_type: region_type as u32,
        region_index: 0,
    })?;
    Region::from_raw_fd(fd, record.region_size as usize).map_err(ContextError::from)
}

fn create_own_and_watch(config: &CoreConfig, global_size: usize) -> ContextResult<AnonymousRegions> {
    let global = Region::create_anonymous_shareable(global_size, "mlos-global")?;
    let control = Region::create_anonymous_shareable(config.control_channel_size, "mlos-control")?;
    let feedback = Region::create_anonymous_shareable(config.feedback_channel_size, "mlos-feedback")?;
    let shared_config = Region::create_anonymous_shareable(config.shared_config_memory_size, "mlos-config")?;

    let descriptors = [
        (RegionType::Global, 0, global.as_raw_fd().expect("shareable"), global.len() as u64),
        (RegionType::Control, 0, control.as_raw_fd().expect("shareable"), control.len() as u64),
        (RegionType::Feedback, 0, feedback.as_raw_fd().expect("shareable"), feedback.len() as u64),
        (
            RegionType::SharedConfig,
            0,
            shared_config.as_raw_fd().expect("shareable"),
            shared_config.len() as u64,
        ),
    ];
    let watcher = DescriptorWatcher::spawn(config.clone(), descriptors);

    Ok(AnonymousRegions {
        global,
        control,
        feedback,
        shared_config,
        watcher: Some(watcher),
    })
}
