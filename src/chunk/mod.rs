//! Chunk Backend Module
//!
//! The minimal physical storage contract the rolling layer is built on.
//!
//! ## Responsibilities
//! - Create, append to, read, seal and delete named byte blobs ("chunks")
//! - Answer existence and length queries
//! - Guarantee that a sealed chunk never changes length or content again
//!
//! Backends are never asked to rename a chunk or to exclude concurrent
//! writers; single-writer-per-segment is enforced above this layer.

mod filesystem;
mod memory;

use bytes::Bytes;

use crate::error::ChunkResult;

pub use filesystem::FileSystemChunkStorage;
pub use memory::{ChunkOp, InMemoryChunkStorage};

/// Physical chunk storage contract
///
/// All calls are blocking; the dispatch layer runs them on worker threads.
pub trait ChunkStorage: Send + Sync {
    /// Create an empty, unsealed chunk. Fails with `AlreadyExists` if present.
    fn create(&self, name: &str) -> ChunkResult<()>;

    /// Append `data` to an unsealed chunk, returning the new chunk length.
    fn append(&self, name: &str, data: &[u8]) -> ChunkResult<u64>;

    /// Read `length` bytes starting at `offset`. Fails with `OutOfRange` if the
    /// range runs past the end of the chunk.
    fn read(&self, name: &str, offset: u64, length: u64) -> ChunkResult<Bytes>;

    /// Make the chunk read-only. Sealing twice is not an error.
    fn seal(&self, name: &str) -> ChunkResult<()>;

    /// Remove the chunk.
    fn delete(&self, name: &str) -> ChunkResult<()>;

    fn exists(&self, name: &str) -> ChunkResult<bool>;

    fn length(&self, name: &str) -> ChunkResult<u64>;

    fn is_sealed(&self, name: &str) -> ChunkResult<bool>;
}

impl<T: ChunkStorage + ?Sized> ChunkStorage for std::sync::Arc<T> {
    fn create(&self, name: &str) -> ChunkResult<()> {
        (**self).create(name)
    }

    fn append(&self, name: &str, data: &[u8]) -> ChunkResult<u64> {
        (**self).append(name, data)
    }

    fn read(&self, name: &str, offset: u64, length: u64) -> ChunkResult<Bytes> {
        (**self).read(name, offset, length)
    }

    fn seal(&self, name: &str) -> ChunkResult<()> {
        (**self).seal(name)
    }

    fn delete(&self, name: &str) -> ChunkResult<()> {
        (**self).delete(name)
    }

    fn exists(&self, name: &str) -> ChunkResult<bool> {
        (**self).exists(name)
    }

    fn length(&self, name: &str) -> ChunkResult<u64> {
        (**self).length(name)
    }

    fn is_sealed(&self, name: &str) -> ChunkResult<bool> {
        (**self).is_sealed(name)
    }
}
