//! Error surface for the region crate.

use thiserror::Error;

/// Convenience alias for fallible region operations.
pub type RegionResult<T> = Result<T, RegionError>;

/// Errors surfaced by region creation, attach, and verification.
#[derive(Debug, Error)]
pub enum RegionError {
    /// The mapped bytes do not start with the expected region signature.
    #[error("region signature mismatch: expected {expected:#x}, found {found:#x}")]
    BadSignature { expected: u32, found: u32 },

    /// The header's declared size does not match the size of the observed mapping.
    #[error("region size mismatch: header declares {declared}, mapping is {observed}")]
    SizeMismatch { declared: u32, observed: u32 },

    /// `typed_view` was asked for a layout whose codegen type id does not match the header.
    #[error("region codegen type mismatch: expected {expected}, found {found}")]
    TypeMismatch { expected: u32, found: u32 },

    /// The peer holding the mapping is not the current local user.
    #[error("access denied: region owned by a different user")]
    AccessDenied,

    /// Allocation/mmap of the backing memory failed.
    #[error("failed to allocate region of {size} bytes: {reason}")]
    AllocationFailed { size: usize, reason: String },

    /// A raw OS failure from an underlying map/open/stat call.
    #[error("os error ({code}): {message}")]
    Os { code: i32, message: String },
}

impl RegionError {
    pub(crate) fn os(err: std::io::Error) -> Self {
        RegionError::Os {
            code: err.raw_os_error().unwrap_or(-1),
            message: err.to_string(),
        }
    }
}
