//! Error surface for context construction, FD exchange, and control-channel
//! plumbing (spec.md §7's core error kinds, specialized to this crate).

use thiserror::Error;

pub type ContextResult<T> = Result<T, ContextError>;

/// Errors surfaced by `shmc-context`.
#[derive(Debug, Error)]
pub enum ContextError {
    #[error("region error: {0}")]
    Region(#[from] shmc_region::RegionError),

    #[error("shared-config error: {0}")]
    Config(#[from] shmc_config::ConfigError),

    #[error("channel error: {0}")]
    Channel(#[from] shmc_channel::ChannelError),

    /// No descriptor available from the agent for a requested region
    /// (spec.md §7 `NotFound`).
    #[error("agent has no descriptor for region {region_type:?}#{region_index}")]
    RegionNotFound { region_type: u32, region_index: u32 },

    /// A raw OS failure from a socket/fd/watch primitive (spec.md §7 `OsError`).
    #[error("os error ({code}): {message}")]
    Os { code: i32, message: String },

    /// The FD-exchange wire record received from a peer was truncated or
    /// otherwise malformed.
    #[error("malformed fd-exchange record: {0}")]
    MalformedRecord(String),

    /// An operation observed `terminate` and returned without completing
    /// (spec.md §7 `Aborted`).
    #[error("aborted: channel is terminating")]
    Aborted,
}

impl ContextError {
    pub(crate) fn os(err: std::io::Error) -> Self {
        ContextError::Os {
            code: err.raw_os_error().unwrap_or(-1),
            message: err.to_string(),
        }
    }
}
