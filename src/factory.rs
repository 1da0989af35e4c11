//! Storage Factory
//!
//! Wires a chunk backend, the rolling engine and the async wrapper into one
//! [`Storage`] handle. Callers only ever see the `Storage` trait object.
//!
//! ```text
//! backend ──▶ RollingStorage ──▶ AsyncStorageWrapper ──▶ Arc<dyn Storage>
//! ```
//!
//! A factory builds its adapter once and hands out clones of it, so every
//! caller shares one metadata cache and one set of segment queues.
//!
//! A factory that was never initialized uses `StorageConfig::default()` and
//! its own worker pool. Bad settings do not fail here; the returned adapter
//! reports them on its first operation.

use std::sync::Arc;

use bytes::Bytes;
use parking_lot::Mutex;

use crate::chunk::{ChunkStorage, FileSystemChunkStorage, InMemoryChunkStorage};
use crate::config::{BackendConfig, RollingPolicy, StorageConfig};
use crate::dispatch::{AsyncStorageWrapper, Storage, StorageFuture, WorkerPool};
use crate::error::{Result, StorageError};
use crate::rolling::{RollingStorage, SegmentHandle, SegmentInfo};

/// Builds storage adapters for one kind of backend
pub trait StorageFactory: Send + Sync {
    /// Backend identifier
    fn name(&self) -> &'static str;

    /// Re-bind configuration and executor before first use
    fn initialize(&mut self, config: StorageConfig, executor: Arc<WorkerPool>);

    /// Compose backend, rolling engine and async wrapper
    fn create_storage_adapter(&self) -> Arc<dyn Storage>;
}

/// Pick the factory matching `config.backend`
pub fn storage_factory(config: StorageConfig) -> Box<dyn StorageFactory> {
    match config.backend {
        BackendConfig::InMemory => Box::new(InMemoryStorageFactory::with_config(config, None)),
        BackendConfig::FileSystem { .. } => {
            Box::new(FileSystemStorageFactory::with_config(config, None))
        }
    }
}

// =============================================================================
// Shared Wiring
// =============================================================================

/// Configuration and executor state common to every factory
#[derive(Default)]
struct FactoryCore {
    config: StorageConfig,

    /// Executor supplied by the caller
    executor: Option<Arc<WorkerPool>>,

    /// Pool created on demand when no executor was supplied
    owned_pool: Mutex<Option<Arc<WorkerPool>>>,

    /// Adapter handed out by every `create_storage_adapter` call
    adapter: Mutex<Option<Arc<dyn Storage>>>,
}

impl FactoryCore {
    fn new(config: StorageConfig, executor: Option<Arc<WorkerPool>>) -> Self {
        Self {
            config,
            executor,
            owned_pool: Mutex::new(None),
            adapter: Mutex::new(None),
        }
    }

    fn initialize(&mut self, config: StorageConfig, executor: Arc<WorkerPool>) {
        self.config = config;
        self.executor = Some(executor);
        *self.adapter.get_mut() = None;
    }

    fn executor(&self) -> Result<Arc<WorkerPool>> {
        if let Some(executor) = &self.executor {
            return Ok(Arc::clone(executor));
        }

        let mut owned = self.owned_pool.lock();
        if let Some(pool) = owned.as_ref() {
            return Ok(Arc::clone(pool));
        }
        let pool = Arc::new(WorkerPool::new(self.config.worker_threads)?);
        *owned = Some(Arc::clone(&pool));
        Ok(pool)
    }

    /// The shared adapter, built over `backend()` on first use
    fn adapter<C, B>(&self, backend: B) -> Arc<dyn Storage>
    where
        C: ChunkStorage + 'static,
        B: FnOnce() -> C,
    {
        let mut adapter = self.adapter.lock();
        if let Some(existing) = adapter.as_ref() {
            return Arc::clone(existing);
        }
        let built = self.build(backend()).unwrap_or_else(unavailable);
        *adapter = Some(Arc::clone(&built));
        built
    }

    fn build<C: ChunkStorage + 'static>(&self, backend: C) -> Result<Arc<dyn Storage>> {
        self.config.validate()?;
        let executor = self.executor()?;
        let rolling = RollingStorage::new(backend, self.config.rolling_policy());
        Ok(Arc::new(AsyncStorageWrapper::new(rolling, executor)))
    }
}

// =============================================================================
// Filesystem Factory
// =============================================================================

/// Factory for adapters over [`FileSystemChunkStorage`]
#[derive(Default)]
pub struct FileSystemStorageFactory {
    core: FactoryCore,
}

impl FileSystemStorageFactory {
    /// Factory using default configuration until `initialize` is called
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(config: StorageConfig, executor: Option<Arc<WorkerPool>>) -> Self {
        Self {
            core: FactoryCore::new(config, executor),
        }
    }
}

impl StorageFactory for FileSystemStorageFactory {
    fn name(&self) -> &'static str {
        "FILESYSTEM"
    }

    fn initialize(&mut self, config: StorageConfig, executor: Arc<WorkerPool>) {
        self.core.initialize(config, executor);
    }

    fn create_storage_adapter(&self) -> Arc<dyn Storage> {
        let root = match &self.core.config.backend {
            BackendConfig::FileSystem { root } => root.clone(),
            other => {
                return unavailable(StorageError::Config(format!(
                    "filesystem factory cannot use backend {:?}",
                    other
                )))
            }
        };

        self.core.adapter(|| {
            tracing::debug!("Creating filesystem storage adapter at {}", root.display());
            FileSystemChunkStorage::new(root)
        })
    }
}

// =============================================================================
// In-Memory Factory
// =============================================================================

/// Factory for adapters over one shared [`InMemoryChunkStorage`]
///
/// Every call returns the same adapter over the same chunks.
#[derive(Default)]
pub struct InMemoryStorageFactory {
    core: FactoryCore,
    backend: Arc<InMemoryChunkStorage>,
}

impl InMemoryStorageFactory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(config: StorageConfig, executor: Option<Arc<WorkerPool>>) -> Self {
        Self {
            core: FactoryCore::new(config, executor),
            backend: Arc::new(InMemoryChunkStorage::new()),
        }
    }

    /// The backend shared by all adapters from this factory
    pub fn backend(&self) -> &Arc<InMemoryChunkStorage> {
        &self.backend
    }
}

impl StorageFactory for InMemoryStorageFactory {
    fn name(&self) -> &'static str {
        "INMEMORY"
    }

    fn initialize(&mut self, config: StorageConfig, executor: Arc<WorkerPool>) {
        self.core.initialize(config, executor);
    }

    fn create_storage_adapter(&self) -> Arc<dyn Storage> {
        self.core.adapter(|| Arc::clone(&self.backend))
    }
}

// =============================================================================
// Deferred Failure
// =============================================================================

fn unavailable(error: StorageError) -> Arc<dyn Storage> {
    tracing::warn!("Storage adapter unusable: {}", error);
    Arc::new(UnavailableStorage {
        reason: error.to_string(),
    })
}

/// Adapter standing in for one that could not be built
struct UnavailableStorage {
    reason: String,
}

impl UnavailableStorage {
    fn fail<T>(&self) -> StorageFuture<T> {
        StorageFuture::ready(Err(StorageError::Config(self.reason.clone())))
    }
}

impl Storage for UnavailableStorage {
    fn create(&self, _name: &str) -> StorageFuture<SegmentHandle> {
        self.fail()
    }

    fn create_with_policy(&self, _name: &str, _policy: RollingPolicy) -> StorageFuture<SegmentHandle> {
        self.fail()
    }

    fn open_write(&self, _name: &str) -> StorageFuture<SegmentHandle> {
        self.fail()
    }

    fn open_read(&self, _name: &str) -> StorageFuture<SegmentHandle> {
        self.fail()
    }

    fn write(&self, _handle: &SegmentHandle, _offset: u64, _data: Bytes) -> StorageFuture<()> {
        self.fail()
    }

    fn read(&self, _handle: &SegmentHandle, _offset: u64, _length: u64) -> StorageFuture<Bytes> {
        self.fail()
    }

    fn seal(&self, _handle: &SegmentHandle) -> StorageFuture<()> {
        self.fail()
    }

    fn concat(&self, _target: &SegmentHandle, _sources: &[SegmentHandle]) -> StorageFuture<()> {
        self.fail()
    }

    fn truncate(&self, _handle: &SegmentHandle, _offset: u64) -> StorageFuture<()> {
        self.fail()
    }

    fn delete(&self, _handle: &SegmentHandle) -> StorageFuture<()> {
        self.fail()
    }

    fn exists(&self, _name: &str) -> StorageFuture<bool> {
        self.fail()
    }

    fn get_info(&self, _name: &str) -> StorageFuture<SegmentInfo> {
        self.fail()
    }
}
