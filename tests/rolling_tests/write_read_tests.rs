use segstore::{StorageError, SyncStorage};

use crate::{assert_invariants, setup_storage};

#[test]
fn test_write_then_read() {
    let (_backend, storage) = setup_storage(1024);
    let handle = storage.create("seg").unwrap();

    storage.write(&handle, 0, b"hello").unwrap();
    storage.write(&handle, 5, b" world").unwrap();

    assert_eq!(&storage.read(&handle, 0, 11).unwrap()[..], b"hello world");
    assert_eq!(&storage.read(&handle, 6, 5).unwrap()[..], b"world");
    assert_eq!(storage.get_info("seg").unwrap().length, 11);
}

#[test]
fn test_write_at_wrong_offset_fails() {
    let (_backend, storage) = setup_storage(1024);
    let handle = storage.create("seg").unwrap();
    storage.write(&handle, 0, b"abc").unwrap();

    let result = storage.write(&handle, 2, b"x");
    assert!(matches!(
        result,
        Err(StorageError::BadOffset { offset: 2, length: 3, .. })
    ));

    let result = storage.write(&handle, 4, b"x");
    assert!(matches!(result, Err(StorageError::BadOffset { .. })));

    // Nothing changed
    assert_eq!(storage.get_info("seg").unwrap().length, 3);
}

#[test]
fn test_empty_write_is_noop() {
    let (backend, storage) = setup_storage(4);
    let handle = storage.create("seg").unwrap();
    let before = backend.chunk_names();

    storage.write(&handle, 0, b"").unwrap();

    assert_eq!(backend.chunk_names(), before);
    assert_eq!(storage.get_info("seg").unwrap().length, 0);
}

#[test]
fn test_write_rolls_over() {
    // "abcdefgh" with r=5 lands in two chunks of 5 and 3 bytes
    let (_backend, storage) = setup_storage(5);
    let handle = storage.create("seg").unwrap();

    storage.write(&handle, 0, b"abcdefgh").unwrap();

    let meta = storage.metadata("seg").unwrap();
    assert_eq!(meta.chunks.len(), 2);
    assert_eq!(meta.chunks[0].length, 5);
    assert!(meta.chunks[0].sealed);
    assert_eq!(meta.chunks[1].start_offset, 5);
    assert_eq!(meta.chunks[1].length, 3);
    assert!(!meta.chunks[1].sealed);

    assert_eq!(&storage.read(&handle, 0, 8).unwrap()[..], b"abcdefgh");
    assert_invariants(&storage, "seg");
}

#[test]
fn test_single_write_spanning_many_chunks() {
    let (_backend, storage) = setup_storage(3);
    let handle = storage.create("seg").unwrap();
    storage.write(&handle, 0, b"a").unwrap();

    let data: Vec<u8> = (0u8..20).collect();
    storage.write(&handle, 1, &data).unwrap();

    let meta = storage.metadata("seg").unwrap();
    // 1 + 20 bytes at 3 per chunk
    assert_eq!(meta.chunks.len(), 7);
    assert_eq!(meta.length, 21);
    assert_invariants(&storage, "seg");

    let read = storage.read(&handle, 1, 20).unwrap();
    assert_eq!(&read[..], &data[..]);
}

#[test]
fn test_read_across_chunk_boundaries() {
    let (_backend, storage) = setup_storage(4);
    let handle = storage.create("seg").unwrap();
    storage.write(&handle, 0, b"0123456789AB").unwrap();

    assert_eq!(&storage.read(&handle, 2, 8).unwrap()[..], b"23456789");
    assert_eq!(&storage.read(&handle, 4, 4).unwrap()[..], b"4567");
    assert_eq!(&storage.read(&handle, 11, 1).unwrap()[..], b"B");
}

#[test]
fn test_read_past_end_fails() {
    let (_backend, storage) = setup_storage(4);
    let handle = storage.create("seg").unwrap();
    storage.write(&handle, 0, b"abc").unwrap();

    assert!(matches!(storage.read(&handle, 1, 3), Err(StorageError::BadOffset { .. })));
    assert!(matches!(storage.read(&handle, u64::MAX, 2), Err(StorageError::BadOffset { .. })));
}

#[test]
fn test_zero_length_read_at_end() {
    let (_backend, storage) = setup_storage(4);
    let handle = storage.create("seg").unwrap();
    storage.write(&handle, 0, b"abc").unwrap();

    assert!(storage.read(&handle, 3, 0).unwrap().is_empty());
}

#[test]
fn test_read_missing_segment_fails() {
    let (_backend, storage) = setup_storage(4);
    let handle = segstore::SegmentHandle::read_only("missing");
    assert!(matches!(storage.read(&handle, 0, 0), Err(StorageError::NotFound(_))));
}

#[test]
fn test_reader_sees_later_writes() {
    let (_backend, storage) = setup_storage(4);
    let writer = storage.create("seg").unwrap();
    let reader = storage.open_read("seg").unwrap();

    storage.write(&writer, 0, b"abcdef").unwrap();

    assert_eq!(&storage.read(&reader, 0, 6).unwrap()[..], b"abcdef");
}

#[test]
fn test_open_write_handle_continues_appending() {
    let (_backend, storage) = setup_storage(4);
    let first = storage.create("seg").unwrap();
    storage.write(&first, 0, b"abc").unwrap();

    let second = storage.open_write("seg").unwrap();
    storage.write(&second, 3, b"def").unwrap();

    assert_eq!(&storage.read(&first, 0, 6).unwrap()[..], b"abcdef");
}

#[test]
fn test_seal_seals_every_chunk() {
    let (backend, storage) = setup_storage(4);
    let handle = storage.create("seg").unwrap();
    storage.write(&handle, 0, b"0123456789").unwrap();

    storage.seal(&handle).unwrap();

    let meta = storage.metadata("seg").unwrap();
    assert!(meta.sealed);
    for chunk in &meta.chunks {
        assert!(chunk.sealed);
        assert!(segstore::ChunkStorage::is_sealed(&*backend, &chunk.name).unwrap());
    }
    assert_eq!(&storage.read(&handle, 0, 10).unwrap()[..], b"0123456789");
}

#[test]
fn test_per_segment_policy() {
    let (_backend, storage) = setup_storage(1024);
    let handle = storage
        .create_with_policy("small", segstore::RollingPolicy::new(2))
        .unwrap();

    storage.write(&handle, 0, b"abcdef").unwrap();

    assert_eq!(storage.get_info("small").unwrap().chunk_count, 3);
}

#[test]
fn test_no_rolling_policy_keeps_one_chunk() {
    let (_backend, storage) = setup_storage(4);
    let handle = storage
        .create_with_policy("big", segstore::RollingPolicy::NO_ROLLING)
        .unwrap();

    for i in 0..10u64 {
        storage.write(&handle, i * 8, b"12345678").unwrap();
    }

    let info = storage.get_info("big").unwrap();
    assert_eq!(info.chunk_count, 1);
    assert_eq!(info.length, 80);
}
