use thiserror::Error;

pub type ChannelResult<T> = Result<T, ChannelError>;

/// Errors surfaced by the ring channel.
#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("channel region size {size} is not a power of two >= {min}")]
    InvalidRegionSize { size: usize, min: usize },

    #[error("frame payload of {requested} bytes does not fit in a {ring_size}-byte ring (margin {margin})")]
    PayloadTooLarge {
        requested: usize,
        ring_size: usize,
        margin: usize,
    },

    #[error("channel terminated")]
    Terminated,

    #[error("codegen_type_index 0 is reserved for link frames")]
    ReservedTypeIndex,
}
