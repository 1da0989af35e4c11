//! Rolling Storage Engine
//!
//! Implements segment semantics on top of a [`ChunkStorage`] backend.
//!
//! ## Commit protocol
//! Every mutating operation works on a private copy of the segment metadata:
//! 1. Issue all backend calls for the operation against the copy
//! 2. Persist the copy as the next header version
//! 3. Swap the copy into the in-memory map
//!
//! If any step fails, the in-memory map keeps the previous record, chunks
//! created by the attempt are deleted, and an active chunk that the attempt
//! already appended to is retired (marked sealed at its committed length) so
//! stray bytes past that length can never become readable.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use bytes::{Bytes, BytesMut};
use parking_lot::RwLock;

use crate::chunk::ChunkStorage;
use crate::config::RollingPolicy;
use crate::error::{ChunkError, Result, StorageError};

use super::header;
use super::metadata::{ChunkDescriptor, SegmentMetadata};
use super::{SegmentHandle, SegmentInfo, SyncStorage};

/// Backend side effects of an operation that has not been committed yet
#[derive(Debug, Default)]
struct Attempt {
    /// Chunks created by this attempt
    created: Vec<String>,

    /// Whether the attempt appended to or sealed the active chunk
    touched_active: bool,
}

/// Maps logical segments onto rolling chunks
///
/// ## Concurrency:
/// - `segments`: RwLock held only for lookups and commits, never across
///   backend calls
/// - Operations on one segment must not overlap; the dispatch layer
///   serializes them per segment name
pub struct RollingStorage<C: ChunkStorage> {
    /// Physical chunk backend
    chunks: C,

    /// Rolling policy for segments created without an explicit one
    default_policy: RollingPolicy,

    /// Segment name → last committed metadata
    segments: RwLock<HashMap<String, Arc<SegmentMetadata>>>,

    /// Last epoch handed out (keeps epochs strictly increasing)
    last_epoch: AtomicU64,
}

impl<C: ChunkStorage> RollingStorage<C> {
    pub fn new(chunks: C, default_policy: RollingPolicy) -> Self {
        Self {
            chunks,
            default_policy,
            segments: RwLock::new(HashMap::new()),
            last_epoch: AtomicU64::new(0),
        }
    }

    /// The underlying chunk backend
    pub fn chunk_storage(&self) -> &C {
        &self.chunks
    }

    pub fn default_policy(&self) -> RollingPolicy {
        self.default_policy
    }

    /// Snapshot of a segment's full metadata (chunk list included)
    pub fn metadata(&self, name: &str) -> Result<SegmentMetadata> {
        Ok((*self.require(name)?).clone())
    }

    /// Number of segments currently held in memory
    pub fn cached_segment_count(&self) -> usize {
        self.segments.read().len()
    }

    // =========================================================================
    // Metadata Lookup
    // =========================================================================

    fn lookup(&self, name: &str) -> Result<Option<Arc<SegmentMetadata>>> {
        if let Some(meta) = self.segments.read().get(name) {
            return Ok(Some(Arc::clone(meta)));
        }

        let loaded = match self.load(name)? {
            Some(meta) => meta,
            None => return Ok(None),
        };

        let mut segments = self.segments.write();
        let entry = segments
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(loaded));
        Ok(Some(Arc::clone(entry)))
    }

    fn require(&self, name: &str) -> Result<Arc<SegmentMetadata>> {
        self.lookup(name)?
            .ok_or_else(|| StorageError::NotFound(name.to_string()))
    }

    fn require_writable(&self, handle: &SegmentHandle) -> Result<Arc<SegmentMetadata>> {
        if handle.is_read_only() {
            return Err(StorageError::ReadOnlyHandle(handle.name().to_string()));
        }
        self.require(handle.name())
    }

    fn commit(&self, meta: SegmentMetadata) {
        self.segments
            .write()
            .insert(meta.name.clone(), Arc::new(meta));
    }

    // =========================================================================
    // Header Persistence
    // =========================================================================

    /// The newest decodable header of a segment, as stored
    ///
    /// The highest valid version wins. Slots that fail to decode are skipped;
    /// if slots exist but none decodes, the segment is reported corrupt.
    fn latest_header(&self, name: &str) -> Result<Option<SegmentMetadata>> {
        let mut best: Option<SegmentMetadata> = None;
        let mut found_slot = false;

        for slot in 0..header::HEADER_SLOTS {
            let slot_name = header::slot_name(name, slot);
            if !self.chunks.exists(&slot_name)? {
                continue;
            }
            found_slot = true;

            match self.read_header_slot(&slot_name) {
                Ok(meta) if meta.name == name => {
                    if best.as_ref().map_or(true, |b| meta.version > b.version) {
                        best = Some(meta);
                    }
                }
                Ok(meta) => {
                    tracing::warn!(
                        "Header slot {} belongs to segment {}, ignoring",
                        slot_name,
                        meta.name
                    );
                }
                Err(e @ StorageError::BackendUnavailable(_)) => return Err(e),
                Err(e) => {
                    tracing::warn!("Ignoring unreadable header slot {}: {}", slot_name, e);
                }
            }
        }

        match best {
            Some(meta) => Ok(Some(meta)),
            None if found_slot => Err(StorageError::Corruption(format!(
                "no valid header for segment {}",
                name
            ))),
            None => Ok(None),
        }
    }

    /// Load a segment's metadata from its header slots and recover it
    fn load(&self, name: &str) -> Result<Option<SegmentMetadata>> {
        let mut meta = match self.latest_header(name)? {
            Some(meta) => meta,
            None => return Ok(None),
        };

        if let Some(target) = meta.merged_into.clone() {
            if self.merge_completed(&meta, &target)? {
                tracing::debug!(
                    "Segment {} was concatenated into {}, removing leftover header",
                    name,
                    target
                );
                self.delete_headers_quietly(name);
                return Ok(None);
            }
            tracing::warn!(
                "Segment {} was marked for concat into {} but the concat never completed",
                name,
                target
            );
            meta.merged_into = None;
        }

        self.reconcile_active_chunk(&mut meta)?;
        tracing::debug!(
            "Loaded segment {} (version {}, length {}, {} chunks)",
            name,
            meta.version,
            meta.length,
            meta.chunks.len()
        );
        Ok(Some(meta))
    }

    fn read_header_slot(&self, slot_name: &str) -> Result<SegmentMetadata> {
        let length = self.chunks.length(slot_name)?;
        let frame = self.chunks.read(slot_name, 0, length)?;
        header::decode(&frame)
    }

    /// Whether a source marked for concat already lives inside its target
    fn merge_completed(&self, source: &SegmentMetadata, target: &str) -> Result<bool> {
        let first = match source.chunks.first() {
            Some(first) => first,
            None => return Ok(true),
        };

        let owned_by_target = match self.lookup(target)? {
            Some(target) => target.chunks.iter().any(|c| c.name == first.name),
            None => true,
        };
        Ok(owned_by_target || !self.chunks.exists(&first.name)?)
    }

    /// Retire the active chunk if the backend holds bytes past its header length
    fn reconcile_active_chunk(&self, meta: &mut SegmentMetadata) -> Result<()> {
        let idx = match meta.active_chunk_index() {
            Some(idx) => idx,
            None => return Ok(()),
        };

        let chunk = &mut meta.chunks[idx];
        let actual = self.chunks.length(&chunk.name)?;
        if actual < chunk.length {
            return Err(StorageError::Corruption(format!(
                "chunk {} holds {} bytes, header records {}",
                chunk.name, actual, chunk.length
            )));
        }
        if actual > chunk.length {
            tracing::warn!(
                "Chunk {} has {} uncommitted bytes, retiring it",
                chunk.name,
                actual - chunk.length
            );
            chunk.sealed = true;
        }
        Ok(())
    }

    /// Write `meta` as the next header version
    ///
    /// The frame is committed once its append succeeds; sealing the slot
    /// afterwards is best effort.
    fn persist(&self, meta: &mut SegmentMetadata) -> Result<()> {
        meta.version += 1;
        let frame = header::encode(meta)?;
        let slot = header::slot_name(&meta.name, header::slot_for_version(meta.version));

        self.delete_chunk_if_present(&slot)?;
        self.chunks.create(&slot)?;
        if let Err(e) = self.chunks.append(&slot, &frame) {
            if let Err(cleanup) = self.chunks.delete(&slot) {
                tracing::warn!("Failed to remove partial header slot {}: {}", slot, cleanup);
            }
            return Err(e.into());
        }
        if let Err(e) = self.chunks.seal(&slot) {
            tracing::warn!("Header slot {} written but not sealed: {}", slot, e);
        }

        tracing::trace!(
            "Persisted header for {} (version {}, {} bytes)",
            meta.name,
            meta.version,
            frame.len()
        );
        Ok(())
    }

    fn clear_headers(&self, name: &str) -> Result<()> {
        for slot in 0..header::HEADER_SLOTS {
            self.delete_chunk_if_present(&header::slot_name(name, slot))?;
        }
        Ok(())
    }

    fn delete_headers_quietly(&self, name: &str) {
        if let Err(e) = self.clear_headers(name) {
            tracing::warn!("Failed to remove header of segment {}: {}", name, e);
        }
    }

    /// Create a chunk under a name newly allocated for `segment`
    ///
    /// Chunk indices are never reused, so a chunk already holding the name was
    /// either left by an operation whose header never got written, or
    /// committed through a newer header than the one this engine holds. Only
    /// the first kind is replaced.
    fn create_fresh_chunk(&self, segment: &str, name: &str) -> Result<()> {
        match self.chunks.create(name) {
            Err(ChunkError::AlreadyExists(_)) => {
                let committed = self
                    .latest_header(segment)?
                    .map_or(false, |meta| meta.chunks.iter().any(|c| c.name == name));
                if committed {
                    return Err(StorageError::Corruption(format!(
                        "chunk {} is committed by a newer header of segment {}",
                        name, segment
                    )));
                }
                tracing::warn!("Replacing orphaned chunk {}", name);
                self.chunks.delete(name)?;
                self.chunks.create(name)?;
                Ok(())
            }
            other => other.map_err(StorageError::from),
        }
    }

    fn delete_chunk_if_present(&self, name: &str) -> Result<()> {
        match self.chunks.delete(name) {
            Ok(()) | Err(ChunkError::NotFound(_)) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    // =========================================================================
    // Commit / Rollback
    // =========================================================================

    /// Persist and commit `meta`, or undo the attempt's side effects
    fn apply(
        &self,
        current: &SegmentMetadata,
        mut meta: SegmentMetadata,
        attempt: Attempt,
        staged: Result<()>,
    ) -> Result<()> {
        match staged.and_then(|()| self.persist(&mut meta)) {
            Ok(()) => {
                self.commit(meta);
                Ok(())
            }
            Err(e) => {
                self.rollback(current, attempt);
                Err(e)
            }
        }
    }

    fn rollback(&self, current: &SegmentMetadata, attempt: Attempt) {
        for name in &attempt.created {
            if let Err(e) = self.delete_chunk_if_present(name) {
                tracing::warn!("Failed to remove chunk {} after aborted operation: {}", name, e);
            }
        }

        if !attempt.touched_active {
            return;
        }

        let mut retired = current.clone();
        if let Some(idx) = retired.active_chunk_index() {
            let chunk = &mut retired.chunks[idx];
            tracing::debug!(
                "Retiring chunk {} of segment {} at length {}",
                chunk.name,
                current.name,
                chunk.length
            );
            if let Err(e) = self.chunks.seal(&chunk.name) {
                tracing::warn!("Failed to seal retired chunk {}: {}", chunk.name, e);
            }
            chunk.sealed = true;
            self.commit(retired);
        }
    }

    // =========================================================================
    // Operation Staging
    // =========================================================================

    /// Spread `data` over the active chunk and as many new chunks as needed
    ///
    /// New chunks are created and filled before the active chunk is touched.
    fn stage_write(
        &self,
        meta: &mut SegmentMetadata,
        data: &[u8],
        attempt: &mut Attempt,
    ) -> Result<()> {
        let limit = meta.rollover_size.max(1);
        let active = meta.active_chunk_index();
        let room = active
            .map(|idx| limit.saturating_sub(meta.chunks[idx].length))
            .unwrap_or(0);
        let head_len = room.min(data.len() as u64) as usize;
        let (head, tail) = data.split_at(head_len);

        let piece_len = usize::try_from(limit).unwrap_or(usize::MAX);
        let mut next_offset = meta.length + head_len as u64;
        let mut fresh: Vec<ChunkDescriptor> = Vec::new();
        for piece in tail.chunks(piece_len) {
            let name = meta.allocate_chunk_name();
            self.create_fresh_chunk(&meta.name, &name)?;
            attempt.created.push(name.clone());
            self.chunks.append(&name, piece)?;
            tracing::trace!("Rolled segment {} over to chunk {}", meta.name, name);

            fresh.push(ChunkDescriptor {
                name,
                start_offset: next_offset,
                length: piece.len() as u64,
                sealed: false,
            });
            next_offset += piece.len() as u64;
        }

        // Every new chunk but the last is already full
        let full = fresh.len().saturating_sub(1);
        for chunk in &mut fresh[..full] {
            self.chunks.seal(&chunk.name)?;
            chunk.sealed = true;
        }

        if let Some(idx) = active {
            if !head.is_empty() {
                attempt.touched_active = true;
                self.chunks.append(&meta.chunks[idx].name, head)?;
                meta.chunks[idx].length += head.len() as u64;
            }
            if !fresh.is_empty() {
                attempt.touched_active = true;
                self.chunks.seal(&meta.chunks[idx].name)?;
                meta.chunks[idx].sealed = true;
            }
        }

        meta.chunks.extend(fresh);
        meta.length += data.len() as u64;
        Ok(())
    }

    fn stage_seal_active(&self, meta: &mut SegmentMetadata, attempt: &mut Attempt) -> Result<()> {
        if let Some(idx) = meta.active_chunk_index() {
            attempt.touched_active = true;
            self.chunks.seal(&meta.chunks[idx].name)?;
            meta.chunks[idx].sealed = true;
        }
        Ok(())
    }

    /// Mark each source as handed over, then move its chunks onto `meta`
    fn stage_concat(
        &self,
        meta: &mut SegmentMetadata,
        sources: &[Arc<SegmentMetadata>],
        marked: &mut Vec<SegmentMetadata>,
        attempt: &mut Attempt,
    ) -> Result<()> {
        for source in sources {
            let mut handed_over = (**source).clone();
            handed_over.merged_into = Some(meta.name.clone());
            self.persist(&mut handed_over)?;
            marked.push(handed_over);
        }

        self.stage_seal_active(meta, attempt)?;

        for source in sources {
            let base = meta.length;
            meta.chunks.extend(source.chunks.iter().map(|chunk| ChunkDescriptor {
                name: chunk.name.clone(),
                start_offset: base + chunk.start_offset,
                length: chunk.length,
                sealed: true,
            }));
            meta.length += source.length;
        }
        Ok(())
    }

    /// Undo the handed-over marks of an aborted concat
    fn unmark_sources(&self, marked: Vec<SegmentMetadata>) {
        for mut source in marked {
            source.merged_into = None;
            match self.persist(&mut source) {
                Ok(()) => self.commit(source),
                Err(e) => tracing::warn!(
                    "Failed to clear concat mark on segment {}: {}",
                    source.name,
                    e
                ),
            }
        }
    }

    fn next_epoch(&self) -> u64 {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos() as u64)
            .unwrap_or(0);
        let previous = self
            .last_epoch
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |last| {
                Some(now.max(last + 1))
            })
            .unwrap_or(0);
        now.max(previous + 1)
    }
}

impl<C: ChunkStorage> SyncStorage for RollingStorage<C> {
    fn create(&self, name: &str) -> Result<SegmentHandle> {
        self.create_with_policy(name, self.default_policy)
    }

    fn create_with_policy(&self, name: &str, policy: RollingPolicy) -> Result<SegmentHandle> {
        if name.is_empty() {
            return Err(StorageError::InvalidArgument(
                "segment name must not be empty".to_string(),
            ));
        }
        if policy.max_chunk_length == 0 {
            return Err(StorageError::InvalidArgument(format!(
                "rolling policy for {} must allow at least one byte per chunk",
                name
            )));
        }
        if self.lookup(name)?.is_some() {
            return Err(StorageError::AlreadyExists(name.to_string()));
        }

        // Leftovers of an earlier incarnation must not outrank the new header
        self.clear_headers(name)?;

        let mut meta = SegmentMetadata::new(name, self.next_epoch(), policy.max_chunk_length);
        self.persist(&mut meta)?;
        self.commit(meta);

        tracing::debug!(
            "Created segment {} (rollover {} bytes)",
            name,
            policy.max_chunk_length
        );
        Ok(SegmentHandle::writable(name))
    }

    fn open_write(&self, name: &str) -> Result<SegmentHandle> {
        self.require(name)?;
        Ok(SegmentHandle::writable(name))
    }

    fn open_read(&self, name: &str) -> Result<SegmentHandle> {
        self.require(name)?;
        Ok(SegmentHandle::read_only(name))
    }

    fn write(&self, handle: &SegmentHandle, offset: u64, data: &[u8]) -> Result<()> {
        let current = self.require_writable(handle)?;
        if current.sealed {
            return Err(StorageError::SealedSegment(current.name.clone()));
        }
        if offset != current.length {
            return Err(StorageError::BadOffset {
                segment: current.name.clone(),
                offset,
                length: current.length,
            });
        }
        if data.is_empty() {
            return Ok(());
        }

        let mut meta = (*current).clone();
        let mut attempt = Attempt::default();
        let staged = self.stage_write(&mut meta, data, &mut attempt);
        self.apply(&current, meta, attempt, staged)?;

        tracing::trace!(
            "Wrote {} bytes to {} at offset {}",
            data.len(),
            handle.name(),
            offset
        );
        Ok(())
    }

    fn read(&self, handle: &SegmentHandle, offset: u64, length: u64) -> Result<Bytes> {
        let meta = self.require(handle.name())?;
        if offset < meta.start_offset {
            return Err(StorageError::Truncated {
                segment: meta.name.clone(),
                offset,
                start_offset: meta.start_offset,
            });
        }

        let end = offset
            .checked_add(length)
            .filter(|end| *end <= meta.length)
            .ok_or_else(|| StorageError::BadOffset {
                segment: meta.name.clone(),
                offset,
                length: meta.length,
            })?;
        if length == 0 {
            return Ok(Bytes::new());
        }

        let first = meta.chunk_index_for(offset).ok_or_else(|| {
            StorageError::Corruption(format!(
                "segment {} has no chunk covering offset {}",
                meta.name, offset
            ))
        })?;

        let mut parts: Vec<Bytes> = Vec::new();
        let mut position = offset;
        for chunk in &meta.chunks[first..] {
            if position >= end {
                break;
            }
            let local = position - chunk.start_offset;
            let count = chunk.end_offset().min(end) - position;
            tracing::trace!(
                "Reading {} bytes from chunk {} at {}",
                count,
                chunk.name,
                local
            );
            parts.push(self.chunks.read(&chunk.name, local, count)?);
            position += count;
        }

        if parts.len() == 1 {
            return Ok(parts.remove(0));
        }
        let capacity = usize::try_from(length).map_err(|_| {
            StorageError::InvalidArgument(format!(
                "read of {} bytes does not fit in memory",
                length
            ))
        })?;
        let mut buf = BytesMut::with_capacity(capacity);
        for part in parts {
            buf.extend_from_slice(&part);
        }
        Ok(buf.freeze())
    }

    fn seal(&self, handle: &SegmentHandle) -> Result<()> {
        let current = self.require_writable(handle)?;
        if current.sealed {
            return Ok(());
        }

        let mut meta = (*current).clone();
        let mut attempt = Attempt::default();
        let staged = self.stage_seal_active(&mut meta, &mut attempt);
        meta.sealed = true;
        self.apply(&current, meta, attempt, staged)?;

        tracing::debug!("Sealed segment {} at length {}", current.name, current.length);
        Ok(())
    }

    fn concat(&self, target: &SegmentHandle, sources: &[SegmentHandle]) -> Result<()> {
        let current = self.require_writable(target)?;
        if current.sealed {
            return Err(StorageError::SealedSegment(current.name.clone()));
        }

        let mut seen = HashSet::new();
        let mut resolved = Vec::with_capacity(sources.len());
        for handle in sources {
            let name = handle.name();
            if name == current.name {
                return Err(StorageError::InvalidArgument(format!(
                    "cannot concat segment {} into itself",
                    name
                )));
            }
            if !seen.insert(name) {
                return Err(StorageError::InvalidArgument(format!(
                    "segment {} listed more than once in concat",
                    name
                )));
            }

            let source = self.require(name)?;
            if !source.sealed {
                return Err(StorageError::NotSealed(name.to_string()));
            }
            if source.start_offset > 0 {
                tracing::debug!(
                    "Refusing to concat {}: truncated at {}",
                    name,
                    source.start_offset
                );
                return Err(StorageError::NotSealed(name.to_string()));
            }
            resolved.push(source);
        }
        if resolved.is_empty() {
            return Ok(());
        }

        let mut meta = (*current).clone();
        let mut attempt = Attempt::default();
        let mut marked = Vec::new();
        let staged = self.stage_concat(&mut meta, &resolved, &mut marked, &mut attempt);

        if let Err(e) = staged.and_then(|()| self.persist(&mut meta)) {
            self.unmark_sources(marked);
            self.rollback(&current, attempt);
            return Err(e);
        }

        let new_length = meta.length;
        {
            let mut segments = self.segments.write();
            segments.insert(meta.name.clone(), Arc::new(meta));
            for source in &resolved {
                segments.remove(&source.name);
            }
        }
        for source in &resolved {
            self.delete_headers_quietly(&source.name);
        }

        tracing::debug!(
            "Concatenated {} segment(s) into {} (new length {})",
            resolved.len(),
            current.name,
            new_length
        );
        Ok(())
    }

    fn truncate(&self, handle: &SegmentHandle, offset: u64) -> Result<()> {
        let current = self.require_writable(handle)?;
        if offset > current.length {
            return Err(StorageError::BadOffset {
                segment: current.name.clone(),
                offset,
                length: current.length,
            });
        }
        if offset <= current.start_offset {
            tracing::trace!(
                "Truncate of {} to {} is behind start offset {}, ignoring",
                current.name,
                offset,
                current.start_offset
            );
            return Ok(());
        }

        let mut meta = (*current).clone();
        let keep_from = meta.chunks.partition_point(|c| c.end_offset() <= offset);
        let dropped: Vec<ChunkDescriptor> = meta.chunks.drain(..keep_from).collect();
        meta.start_offset = offset;
        self.apply(&current, meta, Attempt::default(), Ok(()))?;

        for chunk in &dropped {
            if let Err(e) = self.delete_chunk_if_present(&chunk.name) {
                tracing::warn!(
                    "Chunk {} truncated from {} but not deleted: {}",
                    chunk.name,
                    current.name,
                    e
                );
            }
        }

        tracing::debug!(
            "Truncated segment {} at {} ({} chunks dropped)",
            current.name,
            offset,
            dropped.len()
        );
        Ok(())
    }

    fn delete(&self, handle: &SegmentHandle) -> Result<()> {
        let current = self.require_writable(handle)?;

        for chunk in &current.chunks {
            self.delete_chunk_if_present(&chunk.name)?;
        }
        self.clear_headers(&current.name)?;
        self.segments.write().remove(&current.name);

        tracing::debug!(
            "Deleted segment {} ({} chunks)",
            current.name,
            current.chunks.len()
        );
        Ok(())
    }

    fn exists(&self, name: &str) -> Result<bool> {
        Ok(self.lookup(name)?.is_some())
    }

    fn get_info(&self, name: &str) -> Result<SegmentInfo> {
        Ok(self.require(name)?.info())
    }
}
