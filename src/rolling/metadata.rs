//! Segment metadata
//!
//! The persisted description of a segment: its ordered chunk list plus the
//! logical length, truncation point and sealed flag. Chunks are addressed by
//! index into `chunks`; insertion order is physical order is offset order.

use serde::{Deserialize, Serialize};

use super::SegmentInfo;

/// One physical chunk backing a contiguous range of a segment
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkDescriptor {
    /// Backend chunk name
    pub name: String,

    /// Logical segment offset of the chunk's first byte
    pub start_offset: u64,

    /// Committed length; bytes past this in the backend are never read
    pub length: u64,

    /// Sealed chunks never grow again
    pub sealed: bool,
}

impl ChunkDescriptor {
    /// Logical offset one past the chunk's last byte
    pub fn end_offset(&self) -> u64 {
        self.start_offset + self.length
    }
}

/// Metadata record for one segment
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SegmentMetadata {
    /// Segment name
    pub name: String,

    /// Creation nonce; keeps chunk names unique across delete/re-create
    pub epoch: u64,

    /// Maximum chunk length for this segment
    pub rollover_size: u64,

    /// Chunks in offset order
    pub chunks: Vec<ChunkDescriptor>,

    /// Logical length (offset of the next append)
    pub length: u64,

    /// Truncation point; reads below it fail
    pub start_offset: u64,

    pub sealed: bool,

    /// Index used for the next chunk name (never reused)
    pub next_chunk_index: u64,

    /// Header version this record was last persisted with
    pub version: u64,

    /// Set on a concat source once its chunks are being handed to a target
    pub merged_into: Option<String>,
}

impl SegmentMetadata {
    pub fn new(name: &str, epoch: u64, rollover_size: u64) -> Self {
        Self {
            name: name.to_string(),
            epoch,
            rollover_size,
            chunks: Vec::new(),
            length: 0,
            start_offset: 0,
            sealed: false,
            next_chunk_index: 0,
            version: 0,
            merged_into: None,
        }
    }

    /// Allocate the name for the next chunk of this segment
    pub fn allocate_chunk_name(&mut self) -> String {
        let name = format!(
            "{}$e{}.chunk.{}",
            self.name, self.epoch, self.next_chunk_index
        );
        self.next_chunk_index += 1;
        name
    }

    /// Index of the chunk that may still be appended to, if any
    pub fn active_chunk_index(&self) -> Option<usize> {
        match self.chunks.last() {
            Some(last) if !last.sealed => Some(self.chunks.len() - 1),
            _ => None,
        }
    }

    /// Offset where the first retained chunk begins
    ///
    /// Equals `length` when no chunks are retained.
    pub fn first_chunk_start(&self) -> u64 {
        self.chunks
            .first()
            .map(|c| c.start_offset)
            .unwrap_or(self.length)
    }

    /// Index of the chunk containing `offset`
    ///
    /// `offset` must lie within `[first_chunk_start, length)`.
    pub fn chunk_index_for(&self, offset: u64) -> Option<usize> {
        let idx = self.chunks.partition_point(|c| c.end_offset() <= offset);
        self.chunks
            .get(idx)
            .filter(|c| c.start_offset <= offset)
            .map(|_| idx)
    }

    /// Check the structural invariants of the chunk list
    pub fn verify(&self) -> Result<(), String> {
        let total: u64 = self.chunks.iter().map(|c| c.length).sum();
        if self.first_chunk_start() + total != self.length {
            return Err(format!(
                "segment {}: first chunk start {} + chunk lengths {} != length {}",
                self.name,
                self.first_chunk_start(),
                total,
                self.length
            ));
        }

        for pair in self.chunks.windows(2) {
            if pair[0].end_offset() != pair[1].start_offset {
                return Err(format!(
                    "segment {}: gap between chunk {} and {}",
                    self.name, pair[0].name, pair[1].name
                ));
            }
        }

        let last = self.chunks.len().saturating_sub(1);
        for (i, chunk) in self.chunks.iter().enumerate() {
            if !chunk.sealed && (i != last || self.sealed) {
                return Err(format!(
                    "segment {}: chunk {} is unsealed but not the active chunk",
                    self.name, chunk.name
                ));
            }
        }

        let below_retained = !self.chunks.is_empty() && self.start_offset < self.first_chunk_start();
        if self.start_offset > self.length || below_retained {
            return Err(format!(
                "segment {}: start offset {} outside retained range",
                self.name, self.start_offset
            ));
        }

        Ok(())
    }

    pub fn info(&self) -> SegmentInfo {
        SegmentInfo {
            name: self.name.clone(),
            length: self.length,
            start_offset: self.start_offset,
            sealed: self.sealed,
            chunk_count: self.chunks.len(),
        }
    }
}
