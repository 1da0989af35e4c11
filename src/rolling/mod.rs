//! Rolling Storage Module
//!
//! Maps one logical segment onto an ordered list of physical chunks.
//!
//! ## Responsibilities
//! - Roll over to a new chunk when the active one reaches its size limit
//! - Resolve logical offsets to (chunk index, chunk-local offset)
//! - Seal, concatenate (metadata only), truncate and delete segments
//! - Persist segment metadata next to the chunks and reload it on demand
//!
//! ## Layout of one segment in the backend
//! ```text
//! {segment}$header.0        ┐ alternating metadata slots
//! {segment}$header.1        ┘ (highest valid version wins)
//! {segment}$e{epoch}.chunk.0  [0 .. r)        sealed
//! {segment}$e{epoch}.chunk.1  [r .. 2r)       sealed
//! {segment}$e{epoch}.chunk.2  [2r .. length)  active
//! ```

pub mod header;
mod metadata;
mod storage;

use bytes::Bytes;

use crate::config::RollingPolicy;
use crate::error::Result;

pub use metadata::{ChunkDescriptor, SegmentMetadata};
pub use storage::RollingStorage;

/// Identity of an opened segment
///
/// Carries no length or sealed state; read those through `get_info`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SegmentHandle {
    name: String,
    read_only: bool,
}

impl SegmentHandle {
    pub fn writable(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            read_only: false,
        }
    }

    pub fn read_only(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            read_only: true,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_read_only(&self) -> bool {
        self.read_only
    }
}

/// Point-in-time view of a segment
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SegmentInfo {
    pub name: String,
    pub length: u64,
    pub start_offset: u64,
    pub sealed: bool,
    pub chunk_count: usize,
}

/// Synchronous, blocking segment storage
///
/// Implementations assume callers never run two operations on the same
/// segment at once; [`AsyncStorageWrapper`](crate::dispatch::AsyncStorageWrapper)
/// provides that guarantee.
pub trait SyncStorage: Send + Sync {
    /// Create a segment using the default rolling policy
    fn create(&self, name: &str) -> Result<SegmentHandle>;

    fn create_with_policy(&self, name: &str, policy: RollingPolicy) -> Result<SegmentHandle>;

    fn open_write(&self, name: &str) -> Result<SegmentHandle>;

    fn open_read(&self, name: &str) -> Result<SegmentHandle>;

    /// Append `data` at `offset`, which must equal the current length
    fn write(&self, handle: &SegmentHandle, offset: u64, data: &[u8]) -> Result<()>;

    fn read(&self, handle: &SegmentHandle, offset: u64, length: u64) -> Result<Bytes>;

    fn seal(&self, handle: &SegmentHandle) -> Result<()>;

    /// Move the chunks of every (sealed) source onto the end of `target`
    fn concat(&self, target: &SegmentHandle, sources: &[SegmentHandle]) -> Result<()>;

    fn truncate(&self, handle: &SegmentHandle, offset: u64) -> Result<()>;

    fn delete(&self, handle: &SegmentHandle) -> Result<()>;

    fn exists(&self, name: &str) -> Result<bool>;

    fn get_info(&self, name: &str) -> Result<SegmentInfo>;
}
