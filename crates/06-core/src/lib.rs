//! Public facade of the messaging core: re-exports the layered crates'
//! surface behind one dependency, the way the teacher's `hub` crate
//! aggregates its services behind one orchestration entry point.
//!
//! Downstream embedders should depend on this crate only; `shmc-region`,
//! `shmc-arena`, `shmc-config`, `shmc-channel`, and `shmc-context` remain
//! independently usable for callers that need just one layer (e.g. a test
//! harness that only wants the arena allocator).

pub use shmc_arena::{ArenaError, ArenaResult, ALLOC_ALIGNMENT};
pub use shmc_channel::{
    ChannelError, ChannelResult, ChannelStats, DispatchEntry, DispatchTable, InvalidFramePolicy,
    InvalidFrameReason, LogAndContinue, NativeWait, NoWakeup, PanicOnInvalid, ReaderGuard, Ring,
    VariableField, VariableFieldLayout, WaitPrimitive, CHANNEL_SYNC_LEN, FRAME_HEADER_LEN,
    LINK_FRAME_TYPE_INDEX, MIN_RING_SIZE,
};
pub use shmc_config::{
    fnv1a_32, ConfigError, ConfigKey, ConfigRecordHeader, ConfigResult, Dictionary, DictionaryStats,
    ReservedSlot, CONFIG_RECORD_HEADER_LEN, DEFAULT_TABLE_LEN,
};
pub use shmc_context::{
    recv_record, request_region, send_all_regions, send_record, Context, ContextError, ContextOptions,
    ContextResult, CoreConfig, FdExchangeRecord, RegisterSettingsAssemblyRequest,
    TerminateReaderThreadRequest, DEFAULT_CHANNEL_SIZE, DEFAULT_DICTIONARY_ELEMENT_COUNT,
    DEFAULT_SHARED_CONFIG_MEMORY_SIZE, FD_EXCHANGE_RECORD_LEN, FIRST_CALLER_TYPE_INDEX,
    REGISTERED_SETTINGS_ASSEMBLY_CODEGEN_TYPE, REGISTER_SETTINGS_ASSEMBLY_TYPE_INDEX,
    TERMINATE_READER_THREAD_TYPE_INDEX,
};
pub use shmc_region::{align_up, is_pow2_at_least, Region, RegionError, RegionHeader, RegionId, RegionResult, RegionType};

mod error;
pub use error::CoreError;
