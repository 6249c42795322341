//! Aggregate error type for embedders who only want one `Result` alias
//! spanning every layer, mirroring the teacher's `FabricError` umbrella.

use thiserror::Error;

/// Union of every layer's error type. Most callers only ever see
/// [`shmc_context::ContextError`] variants, since `Context` is the facade's
/// main entry point, but the lower layers remain reachable for callers
/// using them directly (e.g. a standalone `Arena` in a test harness).
#[derive(Debug, Error)]
pub enum CoreError {
    #[error(transparent)]
    Region(#[from] shmc_region::RegionError),

    #[error(transparent)]
    Arena(#[from] shmc_arena::ArenaError),

    #[error(transparent)]
    Config(#[from] shmc_config::ConfigError),

    #[error(transparent)]
    Channel(#[from] shmc_channel::ChannelError),

    #[error(transparent)]
    Context(#[from] shmc_context::ContextError),
}
