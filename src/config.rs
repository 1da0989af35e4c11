//! Configuration for SegStore
//!
//! Centralized configuration with sensible defaults. A `StorageConfig` is
//! built once and handed to a factory; nothing here is process-global.

use std::path::PathBuf;

use crate::error::{Result, StorageError};

/// Main configuration for a storage adapter
#[derive(Debug, Clone)]
pub struct StorageConfig {
    // -------------------------------------------------------------------------
    // Rolling Configuration
    // -------------------------------------------------------------------------
    /// Default maximum chunk length (in bytes) before the active chunk is
    /// sealed and a new one is started. Segments created with an explicit
    /// [`RollingPolicy`] override this.
    pub rollover_size: u64,

    // -------------------------------------------------------------------------
    // Dispatch Configuration
    // -------------------------------------------------------------------------
    /// Worker threads for the pool a factory creates when no executor was
    /// supplied through `initialize`
    pub worker_threads: usize,

    // -------------------------------------------------------------------------
    // Backend Configuration
    // -------------------------------------------------------------------------
    /// Which chunk backend to construct
    pub backend: BackendConfig,
}

/// Chunk backend selection and connection parameters
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendConfig {
    /// Process-local chunk store (tests, embedding)
    InMemory,

    /// Chunks stored as files under a root directory
    /// Internal structure:
    ///   {root}/
    ///     ├── {segment}$header.0 / .1   (metadata slots)
    ///     └── {segment}$e{epoch}.chunk.{n}  (payload chunks)
    FileSystem { root: PathBuf },
}

/// Per-segment rolling policy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RollingPolicy {
    /// Maximum length of a single chunk
    pub max_chunk_length: u64,
}

impl RollingPolicy {
    /// A policy that never rolls over (one chunk per segment)
    pub const NO_ROLLING: RollingPolicy = RollingPolicy {
        max_chunk_length: u64::MAX,
    };

    pub fn new(max_chunk_length: u64) -> Self {
        Self { max_chunk_length }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            rollover_size: 128 * 1024 * 1024, // 128 MB
            worker_threads: 8,
            backend: BackendConfig::FileSystem {
                root: PathBuf::from("./segstore_data"),
            },
        }
    }
}

impl StorageConfig {
    /// Create a new config builder
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::default()
    }

    /// Check the values a factory relies on
    pub fn validate(&self) -> Result<()> {
        if self.rollover_size == 0 {
            return Err(StorageError::Config(
                "rollover_size must be greater than zero".to_string(),
            ));
        }
        if self.worker_threads == 0 {
            return Err(StorageError::Config(
                "worker_threads must be greater than zero".to_string(),
            ));
        }
        if let BackendConfig::FileSystem { root } = &self.backend {
            if root.as_os_str().is_empty() {
                return Err(StorageError::Config(
                    "filesystem backend root must not be empty".to_string(),
                ));
            }
        }
        Ok(())
    }

    /// Default rolling policy derived from `rollover_size`
    pub fn rolling_policy(&self) -> RollingPolicy {
        RollingPolicy::new(self.rollover_size)
    }
}

/// Builder for StorageConfig
#[derive(Default)]
pub struct ConfigBuilder {
    config: StorageConfig,
}

impl ConfigBuilder {
    /// Set the default rollover size (in bytes)
    pub fn rollover_size(mut self, size: u64) -> Self {
        self.config.rollover_size = size;
        self
    }

    /// Set the worker thread count for factory-owned pools
    pub fn worker_threads(mut self, count: usize) -> Self {
        self.config.worker_threads = count;
        self
    }

    /// Use the in-memory backend
    pub fn in_memory(mut self) -> Self {
        self.config.backend = BackendConfig::InMemory;
        self
    }

    /// Use the filesystem backend rooted at `root`
    pub fn filesystem_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.config.backend = BackendConfig::FileSystem { root: root.into() };
        self
    }

    pub fn build(self) -> StorageConfig {
        self.config
    }
}
