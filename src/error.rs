//! Error types for seismic.

use thiserror::Error;

/// Errors that can occur during index build, persistence, or search.
#[derive(Debug, Error)]
pub enum SparseError {
    /// I/O error (file operations, disk I/O).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Decoded data violates an invariant of the on-disk format
    /// (bad magic bytes, non-ascending doc ids, truncated record).
    /// The affected segment is unusable.
    #[error("corrupted index data: {0}")]
    Corruption(String),

    /// Checksum mismatch (data corruption detected).
    #[error("checksum mismatch: expected {expected:#010x}, got {actual:#010x}")]
    ChecksumMismatch { expected: u32, actual: u32 },

    /// Codec version is newer than this build understands.
    #[error("unsupported codec version {found} (supported up to {supported})")]
    Version { found: u32, supported: u32 },

    /// The cache manager refused a reservation; the write is dropped.
    #[error("memory budget exceeded: requested {requested} bytes, {available} available")]
    Budget { requested: u64, available: u64 },

    /// Internal bug surfaced as a fatal error (e.g. doc-id overflow
    /// during merge).
    #[error("invariant violated: {0}")]
    Invariant(String),

    /// Cooperative cancellation; partial results may still be valid.
    #[error("operation cancelled")]
    Cancelled,

    /// Invalid setting or field-mapping parameter.
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),
}

/// Result type alias for seismic operations.
pub type Result<T> = std::result::Result<T, SparseError>;
