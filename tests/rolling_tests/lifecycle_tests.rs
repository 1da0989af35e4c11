use segstore::{SegmentHandle, StorageError, SyncStorage};

use crate::setup_storage;

#[test]
fn test_create_returns_writable_handle() {
    let (_backend, storage) = setup_storage(10);

    let handle = storage.create("seg").unwrap();

    assert_eq!(handle.name(), "seg");
    assert!(!handle.is_read_only());

    let info = storage.get_info("seg").unwrap();
    assert_eq!(info.length, 0);
    assert_eq!(info.start_offset, 0);
    assert!(!info.sealed);
    assert_eq!(info.chunk_count, 0);
}

#[test]
fn test_create_existing_fails() {
    let (_backend, storage) = setup_storage(10);
    storage.create("seg").unwrap();

    assert!(matches!(storage.create("seg"), Err(StorageError::AlreadyExists(_))));
}

#[test]
fn test_create_empty_name_fails() {
    let (_backend, storage) = setup_storage(10);
    assert!(matches!(storage.create(""), Err(StorageError::InvalidArgument(_))));
}

#[test]
fn test_create_with_zero_policy_fails() {
    let (_backend, storage) = setup_storage(10);
    assert!(matches!(
        storage.create_with_policy("seg", segstore::RollingPolicy::new(0)),
        Err(StorageError::InvalidArgument(_))
    ));
}

#[test]
fn test_create_persists_header() {
    let (backend, storage) = setup_storage(10);
    storage.create("seg").unwrap();

    assert_eq!(backend.chunk_names(), vec!["seg$header.1".to_string()]);
}

#[test]
fn test_exists() {
    let (_backend, storage) = setup_storage(10);

    assert!(!storage.exists("seg").unwrap());
    storage.create("seg").unwrap();
    assert!(storage.exists("seg").unwrap());
}

#[test]
fn test_open_missing_segment_fails() {
    let (_backend, storage) = setup_storage(10);

    assert!(matches!(storage.open_write("nope"), Err(StorageError::NotFound(_))));
    assert!(matches!(storage.open_read("nope"), Err(StorageError::NotFound(_))));
    assert!(matches!(storage.get_info("nope"), Err(StorageError::NotFound(_))));
}

#[test]
fn test_read_only_handle_rejects_mutations() {
    let (_backend, storage) = setup_storage(10);
    storage.create("seg").unwrap();
    let reader = storage.open_read("seg").unwrap();
    assert!(reader.is_read_only());

    assert!(matches!(storage.write(&reader, 0, b"x"), Err(StorageError::ReadOnlyHandle(_))));
    assert!(matches!(storage.seal(&reader), Err(StorageError::ReadOnlyHandle(_))));
    assert!(matches!(storage.truncate(&reader, 0), Err(StorageError::ReadOnlyHandle(_))));
    assert!(matches!(storage.delete(&reader), Err(StorageError::ReadOnlyHandle(_))));
    assert!(matches!(storage.concat(&reader, &[]), Err(StorageError::ReadOnlyHandle(_))));

    // Reads are fine
    assert_eq!(storage.read(&reader, 0, 0).unwrap().len(), 0);
}

#[test]
fn test_delete_removes_segment_and_chunks() {
    let (backend, storage) = setup_storage(4);
    let handle = storage.create("seg").unwrap();
    storage.write(&handle, 0, b"0123456789").unwrap();
    assert!(backend.chunk_count() > 1);

    storage.delete(&handle).unwrap();

    assert!(!storage.exists("seg").unwrap());
    assert_eq!(backend.chunk_count(), 0);
    assert!(matches!(storage.delete(&handle), Err(StorageError::NotFound(_))));
}

#[test]
fn test_delete_unknown_handle_fails() {
    let (_backend, storage) = setup_storage(10);
    let handle = SegmentHandle::writable("ghost");
    assert!(matches!(storage.delete(&handle), Err(StorageError::NotFound(_))));
}

#[test]
fn test_recreate_after_delete_starts_empty() {
    let (_backend, storage) = setup_storage(4);
    let handle = storage.create("seg").unwrap();
    storage.write(&handle, 0, b"old data").unwrap();
    storage.delete(&handle).unwrap();

    let handle = storage.create("seg").unwrap();
    assert_eq!(storage.get_info("seg").unwrap().length, 0);

    storage.write(&handle, 0, b"new").unwrap();
    assert_eq!(&storage.read(&handle, 0, 3).unwrap()[..], b"new");
}

#[test]
fn test_seal_is_idempotent() {
    let (_backend, storage) = setup_storage(10);
    let handle = storage.create("seg").unwrap();
    storage.write(&handle, 0, b"abc").unwrap();

    storage.seal(&handle).unwrap();
    storage.seal(&handle).unwrap();

    let info = storage.get_info("seg").unwrap();
    assert!(info.sealed);
    assert_eq!(info.length, 3);
    crate::assert_invariants(&storage, "seg");
}

#[test]
fn test_seal_empty_segment() {
    let (_backend, storage) = setup_storage(10);
    let handle = storage.create("seg").unwrap();

    storage.seal(&handle).unwrap();

    assert!(storage.get_info("seg").unwrap().sealed);
}

#[test]
fn test_write_after_seal_fails() {
    let (_backend, storage) = setup_storage(10);
    let handle = storage.create("seg").unwrap();
    storage.write(&handle, 0, b"abc").unwrap();
    storage.seal(&handle).unwrap();

    assert!(matches!(storage.write(&handle, 3, b"d"), Err(StorageError::SealedSegment(_))));
}
