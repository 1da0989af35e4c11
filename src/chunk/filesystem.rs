//! Filesystem chunk backend
//!
//! One file per chunk under a root directory, the way HDFS-style stores lay
//! out segment files. A sealed chunk is a file whose permissions are
//! read-only; nothing else marks it.
//!
//! The root directory is created lazily on the first `create`, so an adapter
//! pointed at an unusable root only fails once it is actually used.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Component, Path, PathBuf};

use bytes::{Bytes, BytesMut};

use crate::error::{ChunkError, ChunkResult};

use super::ChunkStorage;

/// Chunk store backed by plain files
#[derive(Debug, Clone)]
pub struct FileSystemChunkStorage {
    /// Directory all chunk files live under
    root: PathBuf,
}

impl FileSystemChunkStorage {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Map a chunk name to its file path
    ///
    /// Names may contain `/` to form a hierarchy, but must stay under root.
    fn chunk_path(&self, name: &str) -> ChunkResult<PathBuf> {
        let relative = Path::new(name);
        let valid = !name.is_empty()
            && relative
                .components()
                .all(|c| matches!(c, Component::Normal(_)));
        if !valid {
            return Err(ChunkError::InvalidName(name.to_string()));
        }
        Ok(self.root.join(relative))
    }

    /// Metadata for an existing chunk file, mapping "missing" to `NotFound`
    fn chunk_metadata(&self, name: &str, path: &Path) -> ChunkResult<fs::Metadata> {
        match fs::metadata(path) {
            Ok(meta) if meta.is_file() => Ok(meta),
            Ok(_) => Err(ChunkError::NotFound(name.to_string())),
            Err(e) => Err(not_found_or_io(name, e)),
        }
    }
}

fn not_found_or_io(name: &str, e: io::Error) -> ChunkError {
    if e.kind() == io::ErrorKind::NotFound {
        ChunkError::NotFound(name.to_string())
    } else {
        ChunkError::Io(e)
    }
}

impl ChunkStorage for FileSystemChunkStorage {
    fn create(&self, name: &str) -> ChunkResult<()> {
        let path = self.chunk_path(name)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(file) => {
                file.sync_all()?;
                tracing::trace!("Created chunk file {}", path.display());
                Ok(())
            }
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                Err(ChunkError::AlreadyExists(name.to_string()))
            }
            Err(e) => Err(ChunkError::Io(e)),
        }
    }

    fn append(&self, name: &str, data: &[u8]) -> ChunkResult<u64> {
        let path = self.chunk_path(name)?;
        let meta = self.chunk_metadata(name, &path)?;
        if meta.permissions().readonly() {
            return Err(ChunkError::Sealed(name.to_string()));
        }

        let mut file = OpenOptions::new()
            .append(true)
            .open(&path)
            .map_err(|e| not_found_or_io(name, e))?;
        file.write_all(data)?;
        file.sync_data()?;

        Ok(file.metadata()?.len())
    }

    fn read(&self, name: &str, offset: u64, length: u64) -> ChunkResult<Bytes> {
        let path = self.chunk_path(name)?;
        let mut file = File::open(&path).map_err(|e| not_found_or_io(name, e))?;
        let chunk_length = file.metadata()?.len();

        let in_range = offset
            .checked_add(length)
            .map(|end| end <= chunk_length)
            .unwrap_or(false);
        if !in_range {
            return Err(ChunkError::OutOfRange {
                name: name.to_string(),
                offset,
                length,
                chunk_length,
            });
        }

        file.seek(SeekFrom::Start(offset))?;
        let mut buf = BytesMut::zeroed(length as usize);
        file.read_exact(&mut buf)?;
        Ok(buf.freeze())
    }

    fn seal(&self, name: &str) -> ChunkResult<()> {
        let path = self.chunk_path(name)?;
        let meta = self.chunk_metadata(name, &path)?;

        let mut permissions = meta.permissions();
        if !permissions.readonly() {
            permissions.set_readonly(true);
            fs::set_permissions(&path, permissions)?;
            tracing::trace!("Sealed chunk file {}", path.display());
        }
        Ok(())
    }

    #[allow(clippy::permissions_set_readonly_false)]
    fn delete(&self, name: &str) -> ChunkResult<()> {
        let path = self.chunk_path(name)?;
        let meta = self.chunk_metadata(name, &path)?;

        // Read-only files cannot be removed on every platform
        let mut permissions = meta.permissions();
        if permissions.readonly() {
            permissions.set_readonly(false);
            fs::set_permissions(&path, permissions)?;
        }

        fs::remove_file(&path).map_err(|e| not_found_or_io(name, e))?;
        tracing::trace!("Deleted chunk file {}", path.display());
        Ok(())
    }

    fn exists(&self, name: &str) -> ChunkResult<bool> {
        let path = self.chunk_path(name)?;
        Ok(path.is_file())
    }

    fn length(&self, name: &str) -> ChunkResult<u64> {
        let path = self.chunk_path(name)?;
        Ok(self.chunk_metadata(name, &path)?.len())
    }

    fn is_sealed(&self, name: &str) -> ChunkResult<bool> {
        let path = self.chunk_path(name)?;
        Ok(self.chunk_metadata(name, &path)?.permissions().readonly())
    }
}
