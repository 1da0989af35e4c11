//! Worker Pool
//!
//! Fixed-size pool of named threads fed through a crossbeam channel. One pool
//! is meant to be shared by every storage adapter in the process.

use std::panic::{self, AssertUnwindSafe};
use std::thread::{self, JoinHandle};

use crossbeam::channel::{unbounded, Receiver, Sender};
use parking_lot::{Mutex, RwLock};

use crate::error::{Result, StorageError};

type Task = Box<dyn FnOnce() + Send + 'static>;

/// Bounded set of threads executing blocking storage calls
pub struct WorkerPool {
    /// Task queue; `None` once the pool has been shut down
    sender: RwLock<Option<Sender<Task>>>,

    /// Worker thread handles, drained on shutdown
    workers: Mutex<Vec<JoinHandle<()>>>,

    size: usize,
}

impl WorkerPool {
    /// Start a pool with `size` worker threads
    pub fn new(size: usize) -> Result<Self> {
        if size == 0 {
            return Err(StorageError::Config(
                "worker pool needs at least one thread".to_string(),
            ));
        }

        let (sender, receiver) = unbounded::<Task>();
        let mut workers = Vec::with_capacity(size);
        for id in 0..size {
            let receiver = receiver.clone();
            let handle = thread::Builder::new()
                .name(format!("segstore-worker-{}", id))
                .spawn(move || worker_loop(receiver))
                .map_err(|e| StorageError::Config(format!("failed to spawn worker {}: {}", id, e)))?;
            workers.push(handle);
        }

        tracing::debug!("Started worker pool with {} threads", size);
        Ok(Self {
            sender: RwLock::new(Some(sender)),
            workers: Mutex::new(workers),
            size,
        })
    }

    /// Number of worker threads
    pub fn size(&self) -> usize {
        self.size
    }

    /// Queue a task; fails with `Cancelled` once the pool is shut down
    pub fn execute<F>(&self, task: F) -> Result<()>
    where
        F: FnOnce() + Send + 'static,
    {
        let sender = self.sender.read();
        match sender.as_ref() {
            Some(sender) => sender
                .send(Box::new(task))
                .map_err(|_| StorageError::Cancelled),
            None => Err(StorageError::Cancelled),
        }
    }

    pub fn is_shutdown(&self) -> bool {
        self.sender.read().is_none()
    }

    /// Stop accepting tasks, let queued tasks finish, and join the workers
    pub fn shutdown(&self) {
        let sender = self.sender.write().take();
        if sender.is_none() {
            return;
        }
        drop(sender);

        let current = thread::current().id();
        let workers: Vec<JoinHandle<()>> = self.workers.lock().drain(..).collect();
        for worker in workers {
            // A worker dropping the last pool reference cannot join itself
            if worker.thread().id() == current {
                continue;
            }
            if worker.join().is_err() {
                tracing::error!("Worker thread exited with a panic");
            }
        }
        tracing::debug!("Worker pool shut down");
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn worker_loop(receiver: Receiver<Task>) {
    for task in receiver.iter() {
        if panic::catch_unwind(AssertUnwindSafe(task)).is_err() {
            tracing::error!("Task panicked on {:?}", thread::current().name());
        }
    }
}
