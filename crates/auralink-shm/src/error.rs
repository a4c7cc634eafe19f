//! Error types for shared-memory ring construction and mapping.

use thiserror::Error;

/// Errors that can occur while constructing or mapping a [`crate::Shm`] region.
#[derive(Debug, Error)]
pub enum ShmError {
    /// The requested region is smaller than `2 * used_size` bytes.
    #[error("shm region too small: need at least {needed} bytes, got {got}")]
    RegionTooSmall {
        /// Minimum size required for the requested `used_size`.
        needed: usize,
        /// Size actually available.
        got: usize,
    },

    /// `used_size` is zero, which cannot hold a single frame.
    #[error("used_size must be greater than zero")]
    EmptyHalf,

    /// The server-state region's `state_version` did not match what the
    /// reader expected; the client must refuse to attach.
    #[error("server-state version mismatch: expected {expected}, found {found}")]
    VersionMismatch {
        /// Version the reader was built against.
        expected: u32,
        /// Version actually stored in the region.
        found: u32,
    },

    /// Failed to create or map the backing file for a POSIX shm segment.
    #[error("failed to map shm segment '{name}': {source}")]
    Mapping {
        /// The shm segment name (as passed to `shm_open`-equivalent).
        name: String,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
}

/// Convenience result type for shared-memory operations.
pub type Result<T> = std::result::Result<T, ShmError>;
