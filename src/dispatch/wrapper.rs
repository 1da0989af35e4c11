//! Async Storage Wrapper
//!
//! Runs blocking [`SyncStorage`] calls on a shared [`WorkerPool`] while
//! keeping every segment's operations in submission order.
//!
//! ## Ordering protocol
//! - Each segment name has a FIFO of pending jobs and a `running` flag
//! - Submitting pushes onto the FIFO; if nobody is draining it, a drain task
//!   is queued on the pool
//! - A drain task runs exactly one job, then re-queues itself if more jobs
//!   are pending, so busy segments share the pool fairly with quiet ones
//! - A concat is pushed onto the target's and every source's FIFO in one
//!   step, and runs only once it has reached the head of all of them. A
//!   queue whose head is such a job parks until the job has run.
//!
//! The queue map lock is never held while a job runs.

use std::collections::{HashMap, HashSet, VecDeque};
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use bytes::Bytes;
use futures::channel::oneshot;
use parking_lot::Mutex;

use crate::config::RollingPolicy;
use crate::error::{Result, StorageError};
use crate::rolling::{SegmentHandle, SegmentInfo, SyncStorage};

use super::future::StorageFuture;
use super::pool::WorkerPool;
use super::Storage;

/// What a finished job means for the rest of its queue
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Outcome {
    Done,
    SegmentDeleted,
}

/// Resolves the caller's future with a finished job's result
type Completion = Box<dyn FnOnce() + Send>;

/// A queued operation with its promise
trait Job: Send {
    /// Run the operation; its future stays pending until the completion runs
    fn run(self: Box<Self>) -> (Outcome, Completion);
    fn cancel(self: Box<Self>);
}

struct Operation<T, F> {
    op: F,
    sender: oneshot::Sender<Result<T>>,
    deletes_segment: bool,
}

impl<T, F> Job for Operation<T, F>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T> + Send + 'static,
{
    fn run(self: Box<Self>) -> (Outcome, Completion) {
        let Operation {
            op,
            sender,
            deletes_segment,
        } = *self;

        let result = op();
        let outcome = if deletes_segment && result.is_ok() {
            Outcome::SegmentDeleted
        } else {
            Outcome::Done
        };
        let complete: Completion = Box::new(move || {
            // The caller may have dropped its future
            let _ = sender.send(result);
        });
        (outcome, complete)
    }

    fn cancel(self: Box<Self>) {
        let _ = self.sender.send(Err(StorageError::Cancelled));
    }
}

/// A job that has to reach the head of several segment queues
struct JointJob {
    state: Mutex<JointState>,
}

struct JointState {
    /// Queues that have not reached the job yet
    waiting: usize,

    /// Set when the job was cancelled out of one of its queues
    cancelled: bool,

    /// Queues parked on the job
    parked: Vec<String>,

    job: Option<Box<dyn Job>>,
}

/// A joint job whose queues have all arrived
struct ReadyJoint {
    job: Box<dyn Job>,
    cancelled: bool,
    parked: Vec<String>,
}

impl JointJob {
    fn new(job: Box<dyn Job>, queues: usize) -> Self {
        Self {
            state: Mutex::new(JointState {
                waiting: queues,
                cancelled: false,
                parked: Vec::new(),
                job: Some(job),
            }),
        }
    }

    /// Record one queue reaching the job
    ///
    /// `parked` names the queue now waiting on it; `None` means the job was
    /// cancelled out of that queue instead. Returns the job once every queue
    /// has arrived.
    fn arrive(&self, parked: Option<&str>) -> Option<ReadyJoint> {
        let mut state = self.state.lock();
        state.waiting -= 1;
        match parked {
            Some(segment) => state.parked.push(segment.to_string()),
            None => state.cancelled = true,
        }
        if state.waiting > 0 {
            return None;
        }
        let job = state.job.take()?;
        Some(ReadyJoint {
            job,
            cancelled: state.cancelled,
            parked: std::mem::take(&mut state.parked),
        })
    }
}

enum Entry {
    Single(Box<dyn Job>),
    Joint(Arc<JointJob>),
}

#[derive(Default)]
struct SegmentQueue {
    pending: VecDeque<Entry>,
    running: bool,
}

struct Dispatcher<S> {
    storage: Arc<S>,
    pool: Arc<WorkerPool>,
    queues: Mutex<HashMap<String, SegmentQueue>>,
}

impl<S: SyncStorage + 'static> Dispatcher<S> {
    fn submit<T, F>(self: &Arc<Self>, segment: &str, deletes_segment: bool, op: F) -> StorageFuture<T>
    where
        T: Send + 'static,
        F: FnOnce(&S) -> Result<T> + Send + 'static,
    {
        let (job, future) = self.job(deletes_segment, op);
        self.enqueue(&[segment.to_string()], job);
        future
    }

    /// Queue one job on several segments at once
    fn submit_joint<T, F>(self: &Arc<Self>, segments: &[String], op: F) -> StorageFuture<T>
    where
        T: Send + 'static,
        F: FnOnce(&S) -> Result<T> + Send + 'static,
    {
        let mut seen = HashSet::new();
        let segments: Vec<String> = segments
            .iter()
            .filter(|segment| seen.insert(segment.as_str()))
            .cloned()
            .collect();

        let (job, future) = self.job(false, op);
        self.enqueue(&segments, job);
        future
    }

    fn job<T, F>(&self, deletes_segment: bool, op: F) -> (Box<dyn Job>, StorageFuture<T>)
    where
        T: Send + 'static,
        F: FnOnce(&S) -> Result<T> + Send + 'static,
    {
        let (sender, receiver) = oneshot::channel();
        let storage = Arc::clone(&self.storage);
        let job: Box<dyn Job> = Box::new(Operation {
            op: move || op(&storage),
            sender,
            deletes_segment,
        });
        (job, StorageFuture::new(receiver))
    }

    /// Push `job` onto every listed queue under one lock acquisition
    ///
    /// Holding the lock across all pushes gives any two joint jobs the same
    /// relative order in every queue they share, so they cannot wait on each
    /// other.
    fn enqueue(self: &Arc<Self>, segments: &[String], job: Box<dyn Job>) {
        let entries: Vec<Entry> = match segments.len() {
            1 => vec![Entry::Single(job)],
            n => {
                let joint = Arc::new(JointJob::new(job, n));
                (0..n).map(|_| Entry::Joint(Arc::clone(&joint))).collect()
            }
        };

        let mut start = Vec::new();
        {
            let mut queues = self.queues.lock();
            for (segment, entry) in segments.iter().zip(entries) {
                let queue = queues.entry(segment.clone()).or_default();
                queue.pending.push_back(entry);
                if !std::mem::replace(&mut queue.running, true) {
                    start.push(segment.clone());
                }
            }
        }

        for segment in start {
            self.schedule(segment);
        }
    }

    fn schedule(self: &Arc<Self>, segment: String) {
        let dispatcher = Arc::clone(self);
        let key = segment.clone();
        if self.pool.execute(move || dispatcher.run_next(key)).is_err() {
            tracing::warn!(
                "Worker pool is shut down, cancelling queued operations for {}",
                segment
            );
            self.cancel_queue(&segment);
        }
    }

    fn run_next(self: &Arc<Self>, segment: String) {
        let entry = {
            let mut queues = self.queues.lock();
            match queues.get_mut(&segment).and_then(|q| q.pending.pop_front()) {
                Some(entry) => entry,
                None => {
                    queues.remove(&segment);
                    return;
                }
            }
        };

        let job = match entry {
            Entry::Single(job) => job,
            Entry::Joint(joint) => {
                // Parked until the last of the job's queues reaches it
                if let Some(ready) = joint.arrive(Some(&segment)) {
                    self.finish_joint(ready);
                }
                return;
            }
        };

        let (outcome, complete) = self.execute(&segment, job);

        // Only jobs queued before the delete resolves are cancelled
        if outcome == Outcome::SegmentDeleted {
            self.cancel_pending(&segment);
        }
        complete();

        self.resume(&segment);
    }

    /// Run a job, treating a panic as a finished job with no result
    ///
    /// A panicking job drops its sender, which the caller sees as Cancelled.
    fn execute(&self, segment: &str, job: Box<dyn Job>) -> (Outcome, Completion) {
        panic::catch_unwind(AssertUnwindSafe(|| job.run())).unwrap_or_else(|_| {
            tracing::error!("Operation on segment {} panicked", segment);
            let nothing: Completion = Box::new(|| ());
            (Outcome::Done, nothing)
        })
    }

    fn finish_joint(self: &Arc<Self>, ready: ReadyJoint) {
        let ReadyJoint {
            job,
            cancelled,
            parked,
        } = ready;

        if cancelled {
            job.cancel();
        } else {
            let (_, complete) = self.execute(&parked.join(", "), job);
            complete();
        }

        for segment in &parked {
            self.resume(segment);
        }
    }

    /// Keep draining `segment` if jobs are pending, else drop its queue
    fn resume(self: &Arc<Self>, segment: &str) {
        let more = {
            let mut queues = self.queues.lock();
            match queues.get(segment) {
                Some(queue) if !queue.pending.is_empty() => true,
                _ => {
                    queues.remove(segment);
                    false
                }
            }
        };
        if more {
            self.schedule(segment.to_string());
        }
    }

    /// Reject everything queued behind a completed delete
    fn cancel_pending(self: &Arc<Self>, segment: &str) {
        let cancelled: Vec<Entry> = match self.queues.lock().get_mut(segment) {
            Some(queue) => queue.pending.drain(..).collect(),
            None => Vec::new(),
        };
        if !cancelled.is_empty() {
            tracing::debug!(
                "Segment {} deleted, cancelling {} queued operation(s)",
                segment,
                cancelled.len()
            );
        }
        for entry in cancelled {
            self.cancel_entry(entry);
        }
    }

    fn cancel_queue(self: &Arc<Self>, segment: &str) {
        let removed = self.queues.lock().remove(segment);
        if let Some(queue) = removed {
            for entry in queue.pending {
                self.cancel_entry(entry);
            }
        }
    }

    fn cancel_entry(self: &Arc<Self>, entry: Entry) {
        match entry {
            Entry::Single(job) => job.cancel(),
            Entry::Joint(joint) => {
                if let Some(ready) = joint.arrive(None) {
                    self.finish_joint(ready);
                }
            }
        }
    }
}

/// Non-blocking, per-segment-ordered front end for a [`SyncStorage`]
pub struct AsyncStorageWrapper<S: SyncStorage + 'static> {
    dispatcher: Arc<Dispatcher<S>>,
}

impl<S: SyncStorage + 'static> AsyncStorageWrapper<S> {
    pub fn new(storage: S, pool: Arc<WorkerPool>) -> Self {
        Self::from_shared(Arc::new(storage), pool)
    }

    /// Wrap a storage that is also used elsewhere
    pub fn from_shared(storage: Arc<S>, pool: Arc<WorkerPool>) -> Self {
        Self {
            dispatcher: Arc::new(Dispatcher {
                storage,
                pool,
                queues: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// The wrapped synchronous storage
    pub fn inner(&self) -> &Arc<S> {
        &self.dispatcher.storage
    }

    pub fn pool(&self) -> &Arc<WorkerPool> {
        &self.dispatcher.pool
    }

    /// Operations waiting (not yet started) for a segment
    pub fn pending_operations(&self, segment: &str) -> usize {
        self.dispatcher
            .queues
            .lock()
            .get(segment)
            .map(|q| q.pending.len())
            .unwrap_or(0)
    }
}

impl<S: SyncStorage + 'static> Storage for AsyncStorageWrapper<S> {
    fn create(&self, name: &str) -> StorageFuture<SegmentHandle> {
        let owned = name.to_string();
        self.dispatcher
            .submit(name, false, move |s| s.create(&owned))
    }

    fn create_with_policy(&self, name: &str, policy: RollingPolicy) -> StorageFuture<SegmentHandle> {
        let owned = name.to_string();
        self.dispatcher
            .submit(name, false, move |s| s.create_with_policy(&owned, policy))
    }

    fn open_write(&self, name: &str) -> StorageFuture<SegmentHandle> {
        let owned = name.to_string();
        self.dispatcher
            .submit(name, false, move |s| s.open_write(&owned))
    }

    fn open_read(&self, name: &str) -> StorageFuture<SegmentHandle> {
        let owned = name.to_string();
        self.dispatcher
            .submit(name, false, move |s| s.open_read(&owned))
    }

    fn write(&self, handle: &SegmentHandle, offset: u64, data: Bytes) -> StorageFuture<()> {
        let handle = handle.clone();
        let name = handle.name().to_string();
        self.dispatcher
            .submit(&name, false, move |s| s.write(&handle, offset, &data))
    }

    fn read(&self, handle: &SegmentHandle, offset: u64, length: u64) -> StorageFuture<Bytes> {
        let handle = handle.clone();
        let name = handle.name().to_string();
        self.dispatcher
            .submit(&name, false, move |s| s.read(&handle, offset, length))
    }

    fn seal(&self, handle: &SegmentHandle) -> StorageFuture<()> {
        let handle = handle.clone();
        let name = handle.name().to_string();
        self.dispatcher.submit(&name, false, move |s| s.seal(&handle))
    }

    fn concat(&self, target: &SegmentHandle, sources: &[SegmentHandle]) -> StorageFuture<()> {
        let target = target.clone();
        let sources = sources.to_vec();
        let segments: Vec<String> = std::iter::once(&target)
            .chain(&sources)
            .map(|h| h.name().to_string())
            .collect();
        self.dispatcher
            .submit_joint(&segments, move |s| s.concat(&target, &sources))
    }

    fn truncate(&self, handle: &SegmentHandle, offset: u64) -> StorageFuture<()> {
        let handle = handle.clone();
        let name = handle.name().to_string();
        self.dispatcher
            .submit(&name, false, move |s| s.truncate(&handle, offset))
    }

    fn delete(&self, handle: &SegmentHandle) -> StorageFuture<()> {
        let handle = handle.clone();
        let name = handle.name().to_string();
        self.dispatcher.submit(&name, true, move |s| s.delete(&handle))
    }

    fn exists(&self, name: &str) -> StorageFuture<bool> {
        let owned = name.to_string();
        self.dispatcher.submit(name, false, move |s| s.exists(&owned))
    }

    fn get_info(&self, name: &str) -> StorageFuture<SegmentInfo> {
        let owned = name.to_string();
        self.dispatcher
            .submit(name, false, move |s| s.get_info(&owned))
    }
}
