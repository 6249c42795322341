use thiserror::Error;

pub type ArenaResult<T> = Result<T, ArenaError>;

/// Errors surfaced by the arena allocator.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum ArenaError {
    /// The bumped free cursor would cross the end of the host region.
    #[error("arena exhausted: requested {requested} bytes, {available} available")]
    OutOfMemory { requested: usize, available: usize },
}
