//! Public endpoint of the messaging core (spec.md §4.5, §6): context
//! construction, FD exchange, and the two control messages the core itself
//! originates.
//!
//! The named/anonymous construction paths, FD exchange, and sentinel
//! watcher are all POSIX-specific (Unix-domain sockets, `memfd`, `flock`),
//! so they're gated behind `cfg(unix)` the same way `shmc-region` gates its
//! own named- and fd-backed constructors.

mod config;
mod control;
mod error;
mod wire;

#[cfg(unix)]
mod anonymous;
#[cfg(unix)]
mod context;
#[cfg(unix)]
mod fd_exchange;
#[cfg(unix)]
mod global;
#[cfg(unix)]
mod named;
#[cfg(unix)]
mod raw;
#[cfg(unix)]
mod watcher;

pub use config::{CoreConfig, DEFAULT_CHANNEL_SIZE, DEFAULT_DICTIONARY_ELEMENT_COUNT, DEFAULT_SHARED_CONFIG_MEMORY_SIZE};
pub use control::{
    RegisterSettingsAssemblyRequest, TerminateReaderThreadRequest, FIRST_CALLER_TYPE_INDEX,
    REGISTERED_SETTINGS_ASSEMBLY_CODEGEN_TYPE, REGISTER_SETTINGS_ASSEMBLY_TYPE_INDEX, TERMINATE_READER_THREAD_TYPE_INDEX,
};
pub use error::{ContextError, ContextResult};
pub use wire::{FdExchangeRecord, FD_EXCHANGE_RECORD_LEN};

#[cfg(unix)]
pub use context::{Context, ContextOptions};
#[cfg(unix)]
pub use fd_exchange::{recv_record, request_region, send_all_regions, send_record};
