//! # SegStore
//!
//! Durable-tier storage for append-only segments:
//! - Segments rolled over onto immutable chunks of bounded size
//! - Pluggable chunk backends (no rename or exclusive-write support needed)
//! - Metadata-only concat, logical truncation, crash-consistent headers
//! - Non-blocking API with per-segment operation ordering
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     Arc<dyn Storage>                         │
//! │              (built by a StorageFactory)                     │
//! └─────────────────────┬───────────────────────────────────────┘
//!                       │ futures
//! ┌─────────────────────▼───────────────────────────────────────┐
//! │                 AsyncStorageWrapper                          │
//! │     (per-segment FIFO, shared WorkerPool)                    │
//! └─────────────────────┬───────────────────────────────────────┘
//!                       │ blocking calls
//! ┌─────────────────────▼───────────────────────────────────────┐
//! │                   RollingStorage                             │
//! │   (segment → ordered chunks, headers, rollover)              │
//! └─────────────────────┬───────────────────────────────────────┘
//!                       │
//!          ┌────────────┴────────────┐
//!          ▼                         ▼
//!   ┌─────────────┐          ┌──────────────┐
//!   │  In-Memory  │          │  FileSystem  │
//!   │   Chunks    │          │    Chunks    │
//!   └─────────────┘          └──────────────┘
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod config;

pub mod chunk;
pub mod rolling;
pub mod dispatch;
pub mod factory;

// =============================================================================
// Public API Re-exports
// =============================================================================

pub use error::{ChunkError, Result, StorageError};
pub use config::{BackendConfig, RollingPolicy, StorageConfig};
pub use chunk::ChunkStorage;
pub use rolling::{RollingStorage, SegmentHandle, SegmentInfo, SyncStorage};
pub use dispatch::{AsyncStorageWrapper, Storage, StorageFuture, WorkerPool};
pub use factory::{storage_factory, StorageFactory};

// =============================================================================
// Version Info
// =============================================================================

/// Current version of SegStore
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
