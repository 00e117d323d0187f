//! Error types for MSU buffer operations

use nix::errno::Errno;
use thiserror::Error;

/// Result type for buffer operations
pub type Result<T> = std::result::Result<T, MscError>;

/// Errors that can occur while managing an MSC buffer
///
/// None of these are fatal: every failing operation leaves the buffer in
/// the state it had before the call.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MscError {
    /// Backing storage could not be allocated; partial work was rolled back
    #[error("out of memory allocating {pages} page(s): {errno}")]
    NoMemory { pages: usize, errno: Errno },

    /// Structural change attempted while the buffer has users, or capture
    /// and streaming readers would overlap
    #[error("buffer busy")]
    Busy,

    /// Operation needs an allocated buffer and there is none
    #[error("no buffer configured")]
    NotReady,

    /// Operating mode outside the supported set
    #[error("unsupported mode {0}")]
    Unsupported(u32),

    /// Malformed request (sizes, offsets, window lists)
    #[error("invalid argument: {0}")]
    InvalidArgument(&'static str),

    /// Page offset outside the mapped buffer
    #[error("page offset {0} outside the buffer")]
    Fault(usize),
}

impl MscError {
    /// Errno equivalent, for callers that surface errors through a
    /// system-call style interface.
    pub fn errno(&self) -> Errno {
        match self {
            MscError::NoMemory { .. } => Errno::ENOMEM,
            MscError::Busy => Errno::EBUSY,
            MscError::NotReady => Errno::ENODEV,
            MscError::Unsupported(_) => Errno::EOPNOTSUPP,
            MscError::InvalidArgument(_) => Errno::EINVAL,
            MscError::Fault(_) => Errno::EFAULT,
        }
    }
}
