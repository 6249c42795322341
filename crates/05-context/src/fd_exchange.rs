//! Blocking FD exchange over a Unix-domain socket (spec.md §4.5, §6).
//!
//! Grounded on `bearcove-dodeca`'s `passfd`-based `fd_passing.rs`/
//! `integration-tests/fd_passing.rs`, adapted from its async/tokio style to
//! plain blocking `std::os::unix::net::UnixStream`, since this workspace's
//! channel and region layers are themselves synchronous.
//!
//! `passfd::FdPassingExt` only carries a descriptor (plus one dummy byte) per
//! call, so a request/response round trip here is two writes on the wire —
//! the fixed-size [`FdExchangeRecord`] first, then (when `contains_fd` is
//! set) the descriptor itself — rather than one combined `sendmsg`. This is
//! an Open Question resolution recorded in `DESIGN.md`.

use crate::error::{ContextError, ContextResult};
use crate::wire::{FdExchangeRecord, FD_EXCHANGE_RECORD_LEN};
use passfd::FdPassingExt;
use std::io::{Read, Write};
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};
use std::os::unix::net::UnixStream;

/// Requests the descriptor for `{region_type, index}` from an agent already
/// listening on `stream`, and reads back its reply.
pub fn request_region(
    stream: &UnixStream,
    region_type: shmc_region::RegionType,
    region_index: u32,
) -> ContextResult<(FdExchangeRecord, Option<OwnedFd>)> {
    let request = FdExchangeRecord::new(region_type, region_index, 0, false);
    send_record(stream, &request, None)?;
    recv_record(stream)
}

/// Sends one [`FdExchangeRecord`] over `stream`, followed by `fd` via
/// ancillary data when present.
pub fn send_record(stream: &UnixStream, record: &FdExchangeRecord, fd: Option<RawFd>) -> ContextResult<()> {
    let mut buf = [0u8; FD_EXCHANGE_RECORD_LEN];
    record.write_le(&mut buf);
    stream.write_all(&buf).map_err(ContextError::os)?;
    if let Some(fd) = fd {
        stream.as_raw_fd().send_fd(fd).map_err(ContextError::os)?;
    }
    Ok(())
}

/// Reads one [`FdExchangeRecord`] from `stream`, plus its descriptor via
/// ancillary data when `contains_fd` is set on the record.
pub fn recv_record(stream: &UnixStream) -> ContextResult<(FdExchangeRecord, Option<OwnedFd>)> {
    let mut buf = [0u8; FD_EXCHANGE_RECORD_LEN];
    stream.read_exact(&mut buf).map_err(ContextError::os)?;
    let record = FdExchangeRecord::read_le(&buf).map_err(ContextError::MalformedRecord)?;
    let fd = if record.contains_fd {
        let raw = stream.as_raw_fd().recv_fd().map_err(ContextError::os)?;
        // SAFETY: `recv_fd` returns a freshly received, uniquely owned
        // descriptor from the ancillary data of the message we just read.
        Some(unsafe { OwnedFd::from_raw_fd(raw) })
    } else {
        None
    };
    Ok((record, fd))
}

/// Sends all four regions' descriptors and sizes, in order, to a connecting
/// target process (spec.md §4.5 step 2's "sends all four descriptors").
pub fn send_all_regions(
    stream: &UnixStream,
    regions: [(shmc_region::RegionType, u32, RawFd, u64); 4],
) -> ContextResult<()> {
    for (region_type, index, fd, size) in regions {
        let record = FdExchangeRecord::new(region_type, index, size, true);
        send_record(stream, &record, Some(fd))?;
    }
    Ok(())
}
