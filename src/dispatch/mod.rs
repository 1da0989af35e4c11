//! Dispatch Module
//!
//! Turns the blocking rolling engine into a non-blocking API.
//!
//! ## Architecture
//! - Shared worker pool executes blocking calls
//! - One FIFO per segment name keeps that segment's operations in order
//! - Every call returns a [`StorageFuture`]
//!
//! Operations on different segments run concurrently, bounded by the pool
//! size. Errors are passed through unchanged; nothing is retried here.

mod future;
mod pool;
mod wrapper;

use bytes::Bytes;

use crate::config::RollingPolicy;
use crate::rolling::{SegmentHandle, SegmentInfo};

pub use future::StorageFuture;
pub use pool::WorkerPool;
pub use wrapper::AsyncStorageWrapper;

/// The segment storage API exposed to the rest of the system
pub trait Storage: Send + Sync {
    fn create(&self, name: &str) -> StorageFuture<SegmentHandle>;

    fn create_with_policy(&self, name: &str, policy: RollingPolicy) -> StorageFuture<SegmentHandle>;

    fn open_write(&self, name: &str) -> StorageFuture<SegmentHandle>;

    fn open_read(&self, name: &str) -> StorageFuture<SegmentHandle>;

    fn write(&self, handle: &SegmentHandle, offset: u64, data: Bytes) -> StorageFuture<()>;

    fn read(&self, handle: &SegmentHandle, offset: u64, length: u64) -> StorageFuture<Bytes>;

    fn seal(&self, handle: &SegmentHandle) -> StorageFuture<()>;

    /// Queued behind other operations on `target`
    fn concat(&self, target: &SegmentHandle, sources: &[SegmentHandle]) -> StorageFuture<()>;

    fn truncate(&self, handle: &SegmentHandle, offset: u64) -> StorageFuture<()>;

    /// Operations still queued for the segment when this completes are cancelled
    fn delete(&self, handle: &SegmentHandle) -> StorageFuture<()>;

    fn exists(&self, name: &str) -> StorageFuture<bool>;

    fn get_info(&self, name: &str) -> StorageFuture<SegmentInfo>;
}
