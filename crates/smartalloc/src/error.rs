//! Error types for `smartalloc`.
//!
//! Only resource exhaustion is reported through [`Error`]. Contract
//! violations (foreign addresses, sharing a unique allocation, reference
//! count overflow) are programmer errors and are caught by debug assertions
//! or abort the process.

use std::fmt;

/// Errors that can occur while creating an allocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// The allocator seam returned null for a block of this many bytes.
    OutOfMemory {
        /// Total block size that was requested from the seam.
        size: usize,
    },

    /// The requested payload is zero bytes long.
    ZeroSize,

    /// Header, metadata and payload sizes do not fit in `usize`.
    SizeOverflow,

    /// The value type needs a stronger alignment than a machine word.
    InvalidAlignment {
        /// The alignment the type requires.
        alignment: usize,
    },
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::OutOfMemory { size } => {
                write!(f, "Out of memory: failed to allocate {size} bytes")
            }
            Error::ZeroSize => write!(f, "Refusing to allocate a zero-sized payload"),
            Error::SizeOverflow => write!(f, "Allocation size overflows usize"),
            Error::InvalidAlignment { alignment } => {
                write!(f, "Unsupported alignment: {alignment} exceeds the word size")
            }
        }
    }
}

impl std::error::Error for Error {}

/// Result type for `smartalloc` operations.
pub type Result<T> = std::result::Result<T, Error>;
