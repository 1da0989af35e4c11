//! Backend failures in the middle of an operation
//!
//! A failed operation must leave the committed metadata unchanged and must not
//! leave newly created chunks behind.

use segstore::chunk::ChunkOp;
use segstore::{StorageError, SyncStorage};

use crate::{assert_invariants, setup_storage};

fn payload_chunks(names: &[String]) -> usize {
    names.iter().filter(|n| n.contains(".chunk.")).count()
}

#[test]
fn test_failed_rollover_create_changes_nothing() {
    let (backend, storage) = setup_storage(4);
    let handle = storage.create("seg").unwrap();
    storage.write(&handle, 0, b"ab").unwrap();
    let before = storage.metadata("seg").unwrap();

    backend.fail_next(ChunkOp::Create, 1);
    let result = storage.write(&handle, 2, b"cdefgh");

    assert!(matches!(result, Err(StorageError::BackendUnavailable(_))));
    assert_eq!(storage.metadata("seg").unwrap(), before);
    assert_eq!(payload_chunks(&backend.chunk_names()), 1);

    storage.write(&handle, 2, b"cdefgh").unwrap();
    assert_eq!(&storage.read(&handle, 0, 8).unwrap()[..], b"abcdefgh");
    assert_invariants(&storage, "seg");
}

#[test]
fn test_failed_append_to_new_chunk_removes_it() {
    let (backend, storage) = setup_storage(4);
    let handle = storage.create("seg").unwrap();
    storage.write(&handle, 0, b"ab").unwrap();

    // The new chunk is filled before the active one is touched
    backend.fail_next(ChunkOp::Append, 1);
    assert!(storage.write(&handle, 2, b"cdefgh").is_err());

    let meta = storage.metadata("seg").unwrap();
    assert_eq!(meta.length, 2);
    assert_eq!(meta.chunks.len(), 1);
    assert!(!meta.chunks[0].sealed);
    assert_eq!(payload_chunks(&backend.chunk_names()), 1);
}

#[test]
fn test_failed_header_persist_keeps_old_length() {
    let (backend, storage) = setup_storage(16);
    let handle = storage.create("seg").unwrap();
    storage.write(&handle, 0, b"abc").unwrap();

    // A write that fits the active chunk creates only the header slot
    backend.fail_next(ChunkOp::Create, 1);
    assert!(storage.write(&handle, 3, b"def").is_err());

    let meta = storage.metadata("seg").unwrap();
    assert_eq!(meta.length, 3);
    assert!(meta.chunks[0].sealed, "touched chunk must be retired");
    assert!(matches!(storage.read(&handle, 0, 6), Err(StorageError::BadOffset { .. })));

    storage.write(&handle, 3, b"def").unwrap();
    assert_eq!(&storage.read(&handle, 0, 6).unwrap()[..], b"abcdef");
    assert_invariants(&storage, "seg");
}

#[test]
fn test_failed_seal_leaves_segment_open() {
    let (backend, storage) = setup_storage(16);
    let handle = storage.create("seg").unwrap();
    storage.write(&handle, 0, b"abc").unwrap();

    backend.fail_next(ChunkOp::Seal, 1);
    assert!(storage.seal(&handle).is_err());
    assert!(!storage.get_info("seg").unwrap().sealed);

    storage.seal(&handle).unwrap();
    assert!(storage.get_info("seg").unwrap().sealed);
    assert_invariants(&storage, "seg");
}

#[test]
fn test_failed_concat_keeps_sources() {
    let (backend, storage) = setup_storage(4);
    let target = storage.create("target").unwrap();
    storage.write(&target, 0, b"abc").unwrap();
    let source = storage.create("source").unwrap();
    storage.write(&source, 0, b"def").unwrap();
    storage.seal(&source).unwrap();

    backend.fail_next(ChunkOp::Create, 1);
    assert!(storage.concat(&target, &[source.clone()]).is_err());

    let source_meta = storage.metadata("source").unwrap();
    assert!(source_meta.merged_into.is_none());
    assert_eq!(storage.get_info("target").unwrap().length, 3);

    storage.concat(&target, &[source]).unwrap();
    assert_eq!(&storage.read(&target, 0, 6).unwrap()[..], b"abcdef");
}

#[test]
fn test_failed_truncate_keeps_prefix() {
    let (backend, storage) = setup_storage(4);
    let handle = storage.create("seg").unwrap();
    storage.write(&handle, 0, b"0123456789").unwrap();
    let chunks_before = backend.chunk_names();

    backend.fail_next(ChunkOp::Create, 1);
    assert!(storage.truncate(&handle, 6).is_err());

    assert_eq!(storage.get_info("seg").unwrap().start_offset, 0);
    assert_eq!(&storage.read(&handle, 0, 10).unwrap()[..], b"0123456789");
    assert_eq!(
        payload_chunks(&backend.chunk_names()),
        payload_chunks(&chunks_before)
    );
}

#[test]
fn test_failed_delete_keeps_segment() {
    let (backend, storage) = setup_storage(4);
    let handle = storage.create("seg").unwrap();
    storage.write(&handle, 0, b"abcdef").unwrap();

    backend.fail_next(ChunkOp::Delete, 1);
    assert!(storage.delete(&handle).is_err());
    assert!(storage.exists("seg").unwrap());
    assert_eq!(&storage.read(&handle, 0, 6).unwrap()[..], b"abcdef");

    storage.delete(&handle).unwrap();
    assert!(!storage.exists("seg").unwrap());
}
