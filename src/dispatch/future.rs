//! Storage futures
//!
//! The promise half handed back by the dispatch layer. Resolved by a worker
//! thread once the queued operation has run.

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use futures::channel::oneshot;
use futures::FutureExt;

use crate::error::{Result, StorageError};

/// Pending result of a storage operation
///
/// Resolves to `Err(StorageError::Cancelled)` if the operation was dropped
/// before it ran.
#[must_use = "storage operations report their outcome through the future"]
pub struct StorageFuture<T> {
    receiver: oneshot::Receiver<Result<T>>,
}

impl<T> StorageFuture<T> {
    pub(crate) fn new(receiver: oneshot::Receiver<Result<T>>) -> Self {
        Self { receiver }
    }

    /// A future that is already resolved
    pub fn ready(result: Result<T>) -> Self {
        let (sender, receiver) = oneshot::channel();
        let _ = sender.send(result);
        Self { receiver }
    }

    /// Block the calling thread until the operation completes
    ///
    /// Must not be called from a worker of the pool the operation runs on.
    pub fn wait(self) -> Result<T> {
        futures::executor::block_on(self)
    }
}

impl<T> Future for StorageFuture<T> {
    type Output = Result<T>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match self.receiver.poll_unpin(cx) {
            Poll::Ready(Ok(result)) => Poll::Ready(result),
            Poll::Ready(Err(oneshot::Canceled)) => Poll::Ready(Err(StorageError::Cancelled)),
            Poll::Pending => Poll::Pending,
        }
    }
}
