//! Error types for SegStore
//!
//! Two layers of errors:
//! - [`ChunkError`]: raised by a chunk backend for a single physical chunk
//! - [`StorageError`]: raised by the segment-level API; backend failures are
//!   carried unchanged inside [`StorageError::BackendUnavailable`]

use thiserror::Error;

/// Result type alias using StorageError
pub type Result<T> = std::result::Result<T, StorageError>;

/// Result type alias for chunk backend calls
pub type ChunkResult<T> = std::result::Result<T, ChunkError>;

/// Errors reported by a [`ChunkStorage`](crate::chunk::ChunkStorage) backend
#[derive(Debug, Error)]
pub enum ChunkError {
    #[error("chunk already exists: {0}")]
    AlreadyExists(String),

    #[error("chunk not found: {0}")]
    NotFound(String),

    #[error("chunk is sealed: {0}")]
    Sealed(String),

    #[error("read out of range on chunk {name}: offset {offset} + length {length} > {chunk_length}")]
    OutOfRange {
        name: String,
        offset: u64,
        length: u64,
        chunk_length: u64,
    },

    #[error("invalid chunk name: {0}")]
    InvalidName(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Unified error type for segment operations
#[derive(Debug, Error)]
pub enum StorageError {
    // -------------------------------------------------------------------------
    // Segment Lifecycle Errors
    // -------------------------------------------------------------------------
    #[error("segment already exists: {0}")]
    AlreadyExists(String),

    #[error("segment not found: {0}")]
    NotFound(String),

    #[error("segment is sealed: {0}")]
    SealedSegment(String),

    #[error("segment is not sealed: {0}")]
    NotSealed(String),

    // -------------------------------------------------------------------------
    // Offset Errors
    // -------------------------------------------------------------------------
    #[error("bad offset for segment {segment}: offset {offset}, segment length {length}")]
    BadOffset {
        segment: String,
        offset: u64,
        length: u64,
    },

    #[error("segment {segment} is truncated at {start_offset}; offset {offset} is no longer readable")]
    Truncated {
        segment: String,
        offset: u64,
        start_offset: u64,
    },

    // -------------------------------------------------------------------------
    // Handle / Argument Errors
    // -------------------------------------------------------------------------
    #[error("handle for segment {0} is read-only")]
    ReadOnlyHandle(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    // -------------------------------------------------------------------------
    // Backend Errors
    // -------------------------------------------------------------------------
    #[error("backend unavailable: {0}")]
    BackendUnavailable(#[from] ChunkError),

    #[error("metadata corruption detected: {0}")]
    Corruption(String),

    // -------------------------------------------------------------------------
    // Serialization Errors
    // -------------------------------------------------------------------------
    #[error("serialization error: {0}")]
    Serialization(String),

    // -------------------------------------------------------------------------
    // Configuration Errors
    // -------------------------------------------------------------------------
    #[error("configuration error: {0}")]
    Config(String),

    // -------------------------------------------------------------------------
    // Dispatch Errors
    // -------------------------------------------------------------------------
    #[error("operation cancelled")]
    Cancelled,
}

impl From<bincode::Error> for StorageError {
    fn from(e: bincode::Error) -> Self {
        StorageError::Serialization(e.to_string())
    }
}
