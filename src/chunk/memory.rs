//! In-memory chunk backend
//!
//! HashMap-backed chunk store with RwLock for concurrency. Supports fault
//! injection so callers can exercise failure paths.

use std::collections::HashMap;

use bytes::Bytes;
use parking_lot::{Mutex, RwLock};

use crate::error::{ChunkError, ChunkResult};

use super::ChunkStorage;

/// Backend operations that can be made to fail on purpose
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChunkOp {
    Create,
    Append,
    Read,
    Seal,
    Delete,
}

#[derive(Debug, Default)]
struct MemChunk {
    data: Vec<u8>,
    sealed: bool,
}

/// Process-local chunk store
#[derive(Debug, Default)]
pub struct InMemoryChunkStorage {
    /// Chunk name → contents
    chunks: RwLock<HashMap<String, MemChunk>>,

    /// Remaining injected failures per operation
    faults: Mutex<HashMap<ChunkOp, usize>>,
}

impl InMemoryChunkStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `count` calls of `op` fail with an I/O error
    pub fn fail_next(&self, op: ChunkOp, count: usize) {
        self.faults.lock().insert(op, count);
    }

    /// Drop every pending injected failure
    pub fn clear_faults(&self) {
        self.faults.lock().clear();
    }

    /// Number of chunks currently stored (header slots included)
    pub fn chunk_count(&self) -> usize {
        self.chunks.read().len()
    }

    /// Sorted names of all stored chunks
    pub fn chunk_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.chunks.read().keys().cloned().collect();
        names.sort();
        names
    }

    fn check_fault(&self, op: ChunkOp, name: &str) -> ChunkResult<()> {
        let mut faults = self.faults.lock();
        if let Some(remaining) = faults.get_mut(&op) {
            if *remaining > 0 {
                *remaining -= 1;
                return Err(ChunkError::Io(std::io::Error::new(
                    std::io::ErrorKind::Other,
                    format!("injected {:?} failure on {}", op, name),
                )));
            }
        }
        Ok(())
    }
}

impl ChunkStorage for InMemoryChunkStorage {
    fn create(&self, name: &str) -> ChunkResult<()> {
        self.check_fault(ChunkOp::Create, name)?;
        let mut chunks = self.chunks.write();
        if chunks.contains_key(name) {
            return Err(ChunkError::AlreadyExists(name.to_string()));
        }
        chunks.insert(name.to_string(), MemChunk::default());
        Ok(())
    }

    fn append(&self, name: &str, data: &[u8]) -> ChunkResult<u64> {
        self.check_fault(ChunkOp::Append, name)?;
        let mut chunks = self.chunks.write();
        let chunk = chunks
            .get_mut(name)
            .ok_or_else(|| ChunkError::NotFound(name.to_string()))?;
        if chunk.sealed {
            return Err(ChunkError::Sealed(name.to_string()));
        }
        chunk.data.extend_from_slice(data);
        Ok(chunk.data.len() as u64)
    }

    fn read(&self, name: &str, offset: u64, length: u64) -> ChunkResult<Bytes> {
        self.check_fault(ChunkOp::Read, name)?;
        let chunks = self.chunks.read();
        let chunk = chunks
            .get(name)
            .ok_or_else(|| ChunkError::NotFound(name.to_string()))?;
        let chunk_length = chunk.data.len() as u64;
        let end = offset.checked_add(length).filter(|end| *end <= chunk_length);
        match end {
            Some(end) => Ok(Bytes::copy_from_slice(
                &chunk.data[offset as usize..end as usize],
            )),
            None => Err(ChunkError::OutOfRange {
                name: name.to_string(),
                offset,
                length,
                chunk_length,
            }),
        }
    }

    fn seal(&self, name: &str) -> ChunkResult<()> {
        self.check_fault(ChunkOp::Seal, name)?;
        let mut chunks = self.chunks.write();
        let chunk = chunks
            .get_mut(name)
            .ok_or_else(|| ChunkError::NotFound(name.to_string()))?;
        chunk.sealed = true;
        Ok(())
    }

    fn delete(&self, name: &str) -> ChunkResult<()> {
        self.check_fault(ChunkOp::Delete, name)?;
        match self.chunks.write().remove(name) {
            Some(_) => Ok(()),
            None => Err(ChunkError::NotFound(name.to_string())),
        }
    }

    fn exists(&self, name: &str) -> ChunkResult<bool> {
        Ok(self.chunks.read().contains_key(name))
    }

    fn length(&self, name: &str) -> ChunkResult<u64> {
        self.chunks
            .read()
            .get(name)
            .map(|c| c.data.len() as u64)
            .ok_or_else(|| ChunkError::NotFound(name.to_string()))
    }

    fn is_sealed(&self, name: &str) -> ChunkResult<bool> {
        self.chunks
            .read()
            .get(name)
            .map(|c| c.sealed)
            .ok_or_else(|| ChunkError::NotFound(name.to_string()))
    }
}
