use segstore::{SegmentHandle, StorageError, SyncStorage};

use crate::{assert_invariants, setup_storage, MemRolling};

// =============================================================================
// Helper Functions
// =============================================================================

/// Create `name`, fill it with `data` and seal it
fn sealed_segment(storage: &MemRolling, name: &str, data: &[u8]) -> SegmentHandle {
    let handle = storage.create(name).unwrap();
    storage.write(&handle, 0, data).unwrap();
    storage.seal(&handle).unwrap();
    handle
}

// =============================================================================
// Concat
// =============================================================================

#[test]
fn test_concat_appends_source_contents() {
    let (_backend, storage) = setup_storage(4);
    let target = storage.create("target").unwrap();
    storage.write(&target, 0, b"0123456").unwrap();
    let a = sealed_segment(&storage, "a", b"abcdef");
    let b = sealed_segment(&storage, "b", b"XY");

    storage.concat(&target, &[a, b]).unwrap();

    let info = storage.get_info("target").unwrap();
    assert_eq!(info.length, 15);
    assert!(!info.sealed);
    assert_eq!(&storage.read(&target, 0, 15).unwrap()[..], b"0123456abcdefXY");
    assert!(!storage.exists("a").unwrap());
    assert!(!storage.exists("b").unwrap());
    assert_invariants(&storage, "target");
}

#[test]
fn test_concat_moves_chunks_without_copying() {
    let (backend, storage) = setup_storage(4);
    let target = storage.create("target").unwrap();
    let source = sealed_segment(&storage, "source", b"0123456789");
    let source_chunks: Vec<String> = storage
        .metadata("source")
        .unwrap()
        .chunks
        .into_iter()
        .map(|c| c.name)
        .collect();
    let before = backend.chunk_count();

    storage.concat(&target, &[source]).unwrap();

    let target_chunks: Vec<String> = storage
        .metadata("target")
        .unwrap()
        .chunks
        .into_iter()
        .map(|c| c.name)
        .collect();
    assert_eq!(target_chunks, source_chunks);

    // Only the source header went away
    assert!(backend.chunk_count() < before);
    assert!(!backend.chunk_names().iter().any(|n| n.starts_with("source$header")));
}

#[test]
fn test_target_stays_writable_after_concat() {
    let (_backend, storage) = setup_storage(4);
    let target = storage.create("target").unwrap();
    storage.write(&target, 0, b"ab").unwrap();
    let source = sealed_segment(&storage, "source", b"cd");

    storage.concat(&target, &[source]).unwrap();
    storage.write(&target, 4, b"ef").unwrap();

    assert_eq!(&storage.read(&target, 0, 6).unwrap()[..], b"abcdef");
    let meta = storage.metadata("target").unwrap();
    assert_eq!(meta.chunks.len(), 3);
    assert_invariants(&storage, "target");
}

#[test]
fn test_concat_empty_sources() {
    let (_backend, storage) = setup_storage(4);
    let target = storage.create("target").unwrap();
    storage.write(&target, 0, b"abc").unwrap();
    let empty = sealed_segment(&storage, "empty", b"");

    storage.concat(&target, &[]).unwrap();
    storage.concat(&target, &[empty]).unwrap();

    assert_eq!(storage.get_info("target").unwrap().length, 3);
    assert!(!storage.exists("empty").unwrap());
}

#[test]
fn test_concat_unsealed_source_fails() {
    let (_backend, storage) = setup_storage(4);
    let target = storage.create("target").unwrap();
    let open = storage.create("open").unwrap();
    storage.write(&open, 0, b"abc").unwrap();

    assert!(matches!(
        storage.concat(&target, &[open]),
        Err(StorageError::NotSealed(_))
    ));
    assert!(storage.exists("open").unwrap());
    assert_eq!(storage.get_info("target").unwrap().length, 0);
}

#[test]
fn test_concat_into_sealed_target_fails() {
    let (_backend, storage) = setup_storage(4);
    let target = sealed_segment(&storage, "target", b"abc");
    let source = sealed_segment(&storage, "source", b"def");

    assert!(matches!(
        storage.concat(&target, &[source]),
        Err(StorageError::SealedSegment(_))
    ));
}

#[test]
fn test_concat_into_itself_fails() {
    let (_backend, storage) = setup_storage(4);
    let target = storage.create("target").unwrap();

    assert!(matches!(
        storage.concat(&target, &[target.clone()]),
        Err(StorageError::InvalidArgument(_))
    ));
}

#[test]
fn test_concat_duplicate_source_fails() {
    let (_backend, storage) = setup_storage(4);
    let target = storage.create("target").unwrap();
    let source = sealed_segment(&storage, "source", b"abc");

    assert!(matches!(
        storage.concat(&target, &[source.clone(), source]),
        Err(StorageError::InvalidArgument(_))
    ));
    assert!(storage.exists("source").unwrap());
}

#[test]
fn test_concat_missing_source_fails() {
    let (_backend, storage) = setup_storage(4);
    let target = storage.create("target").unwrap();
    let source = sealed_segment(&storage, "source", b"abc");

    let result = storage.concat(&target, &[source, SegmentHandle::read_only("ghost")]);

    assert!(matches!(result, Err(StorageError::NotFound(_))));
    assert!(storage.exists("source").unwrap());
    assert_eq!(storage.get_info("target").unwrap().length, 0);
}

#[test]
fn test_concat_truncated_source_fails() {
    let (_backend, storage) = setup_storage(4);
    let target = storage.create("target").unwrap();
    let source = storage.create("source").unwrap();
    storage.write(&source, 0, b"abcdef").unwrap();
    storage.truncate(&source, 2).unwrap();
    storage.seal(&source).unwrap();

    assert!(matches!(
        storage.concat(&target, &[source]),
        Err(StorageError::NotSealed(_))
    ));
}

// =============================================================================
// Truncate
// =============================================================================

#[test]
fn test_truncate_hides_prefix() {
    let (_backend, storage) = setup_storage(4);
    let handle = storage.create("seg").unwrap();
    storage.write(&handle, 0, b"0123456789").unwrap();

    storage.truncate(&handle, 6).unwrap();

    let info = storage.get_info("seg").unwrap();
    assert_eq!(info.start_offset, 6);
    assert_eq!(info.length, 10);
    assert!(matches!(
        storage.read(&handle, 5, 1),
        Err(StorageError::Truncated { offset: 5, start_offset: 6, .. })
    ));
    assert_eq!(&storage.read(&handle, 6, 4).unwrap()[..], b"6789");
    assert_invariants(&storage, "seg");
}

#[test]
fn test_truncate_deletes_whole_chunks_below_offset() {
    let (backend, storage) = setup_storage(4);
    let handle = storage.create("seg").unwrap();
    storage.write(&handle, 0, b"0123456789").unwrap();
    let first = storage.metadata("seg").unwrap().chunks[0].name.clone();

    storage.truncate(&handle, 6).unwrap();

    let meta = storage.metadata("seg").unwrap();
    assert_eq!(meta.chunks.len(), 2);
    assert_eq!(meta.chunks[0].start_offset, 4);
    assert!(!backend.chunk_names().contains(&first));
}

#[test]
fn test_truncate_is_monotonic() {
    let (_backend, storage) = setup_storage(4);
    let handle = storage.create("seg").unwrap();
    storage.write(&handle, 0, b"0123456789").unwrap();

    storage.truncate(&handle, 6).unwrap();
    storage.truncate(&handle, 3).unwrap();
    storage.truncate(&handle, 6).unwrap();

    assert_eq!(storage.get_info("seg").unwrap().start_offset, 6);
}

#[test]
fn test_truncate_past_length_fails() {
    let (_backend, storage) = setup_storage(4);
    let handle = storage.create("seg").unwrap();
    storage.write(&handle, 0, b"abc").unwrap();

    assert!(matches!(
        storage.truncate(&handle, 4),
        Err(StorageError::BadOffset { .. })
    ));
}

#[test]
fn test_truncate_everything_then_write() {
    let (backend, storage) = setup_storage(4);
    let handle = storage.create("seg").unwrap();
    storage.write(&handle, 0, b"0123456").unwrap();

    storage.truncate(&handle, 7).unwrap();

    let meta = storage.metadata("seg").unwrap();
    assert!(meta.chunks.is_empty());
    assert_eq!(meta.length, 7);
    assert_eq!(backend.chunk_names().iter().filter(|n| n.contains(".chunk.")).count(), 0);
    assert!(storage.read(&handle, 7, 0).unwrap().is_empty());

    storage.write(&handle, 7, b"xyz").unwrap();
    assert_eq!(&storage.read(&handle, 7, 3).unwrap()[..], b"xyz");
    assert_invariants(&storage, "seg");
}

#[test]
fn test_truncate_sealed_segment() {
    let (_backend, storage) = setup_storage(4);
    let handle = sealed_segment(&storage, "seg", b"0123456789");

    storage.truncate(&handle, 8).unwrap();

    assert_eq!(&storage.read(&handle, 8, 2).unwrap()[..], b"89");
    assert_invariants(&storage, "seg");
}
