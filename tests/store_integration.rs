//! Filesystem store integration tests

use chrono::NaiveDate;
use diskvault::{
    BufferDisk, CompressionMethod, DiskId, FsStore, HashAlgorithm, ManagedDisk, VaultError,
    SECTOR_SIZE,
};
use std::io::Read;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

fn day(text: &str) -> NaiveDate {
    NaiveDate::parse_from_str(text, "%Y-%m-%d").unwrap()
}

fn source(id: &str, data: Vec<u8>) -> Box<BufferDisk> {
    Box::new(BufferDisk::new(DiskId::new(id).unwrap(), data))
}

fn patterned(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 249) as u8).collect()
}

#[test]
fn test_session_issuance_same_day_and_across_days() {
    let dir = tempfile::tempdir().unwrap();
    let store = FsStore::open(dir.path()).unwrap();

    let first = store.new_session_on(day("2026-08-05")).unwrap();
    let second = store.new_session_on(day("2026-08-05")).unwrap();
    assert!(second > first);
    assert_eq!(first.index(), 1);
    assert_eq!(second.index(), 2);

    let next_day = store.new_session_on(day("2026-08-06")).unwrap();
    assert_eq!(next_day.index(), 1);
    assert!(next_day > second);
}

#[test]
fn test_session_counter_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    {
        let store = FsStore::open(dir.path()).unwrap();
        let s = store.new_session_on(day("2026-08-05")).unwrap();
        assert_eq!(s.index(), 1);
    }
    let store = FsStore::open(dir.path()).unwrap();
    let s = store.new_session_on(day("2026-08-05")).unwrap();
    assert_eq!(s.index(), 2);
}

#[test]
fn test_store_uuid_is_persistent() {
    let dir = tempfile::tempdir().unwrap();
    let first = FsStore::open(dir.path()).unwrap().uuid();
    let second = FsStore::open(dir.path()).unwrap().uuid();
    assert_eq!(first, second);
}

#[test]
fn test_empty_store_scenario() {
    // empty store -> put 1 MiB of zeros flat -> enumerate -> absent attribute
    let dir = tempfile::tempdir().unwrap();
    let store = FsStore::open(dir.path()).unwrap();
    assert!(store.enumerate().is_empty());

    let session = store.new_session_on(day("2026-08-05")).unwrap();
    let disk = ManagedDisk::flat(source("d1", vec![0u8; 1 << 20]), session.clone()).unwrap();
    let descriptor = store.put(disk).unwrap();

    let all = store.enumerate();
    assert_eq!(all.len(), 1);
    assert_eq!(all[0].disk().as_str(), "d1");
    assert_eq!(all[0].session(), &session);

    assert_eq!(store.get_attribute(&descriptor, "missing").unwrap(), None);
}

#[test]
fn test_duplicate_put_fails_and_leaves_store_unchanged() {
    let dir = tempfile::tempdir().unwrap();
    let store = FsStore::open(dir.path()).unwrap();
    let session = store.new_session_on(day("2026-08-05")).unwrap();

    let data = patterned(8 * SECTOR_SIZE);
    let first = ManagedDisk::flat(source("d1", data.clone()), session.clone()).unwrap();
    store.put(first).unwrap();
    assert_eq!(store.enumerate().len(), 1);

    let second = ManagedDisk::flat(source("d1", data), session).unwrap();
    assert!(matches!(
        store.put(second),
        Err(VaultError::AlreadyExists(_))
    ));
    assert_eq!(store.enumerate().len(), 1);
}

#[test]
fn test_concurrent_puts_of_distinct_disks_both_commit() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(FsStore::open(dir.path()).unwrap());

    let handles: Vec<_> = (0..2)
        .map(|thread_id| {
            let store = Arc::clone(&store);
            std::thread::spawn(move || {
                let data: Vec<u8> = (0..64 * SECTOR_SIZE)
                    .map(|_| rand::random::<u8>())
                    .collect();
                let session = store.new_session_on(day("2026-08-05")).unwrap();
                let disk = ManagedDisk::stream_optimized(
                    source(&format!("disk{thread_id}"), data.clone()),
                    session,
                    1,
                    CompressionMethod::Deflate,
                )
                .unwrap();
                let descriptor = store.put(disk).unwrap();
                (descriptor, data)
            })
        })
        .collect();

    let mut results = Vec::new();
    for handle in handles {
        results.push(handle.join().unwrap());
    }

    assert_eq!(store.enumerate().len(), 2);

    // both containers read back intact
    for (descriptor, data) in results {
        let disk = store.locate(&descriptor).unwrap();
        let mut out = Vec::new();
        disk.reader().unwrap().read_to_end(&mut out).unwrap();
        assert_eq!(out, data);
    }
}

#[test]
fn test_attributes_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let store = FsStore::open(dir.path()).unwrap();
    let session = store.new_session_on(day("2026-08-05")).unwrap();
    let disk = ManagedDisk::flat(source("d1", vec![1u8; 4 * SECTOR_SIZE]), session).unwrap();
    let descriptor = store.put(disk).unwrap();

    store
        .set_attribute(&descriptor, "case-number", b"2026-0042")
        .unwrap();
    store
        .set_attribute(&descriptor, "examiner", b"j. doe")
        .unwrap();
    assert_eq!(
        store.get_attribute(&descriptor, "case-number").unwrap(),
        Some(b"2026-0042".to_vec())
    );
    assert_eq!(
        store.list_attributes(&descriptor).unwrap(),
        vec!["case-number".to_string(), "examiner".to_string()]
    );

    // overwrite is allowed; attributes are independent blobs
    store
        .set_attribute(&descriptor, "examiner", b"k. smith")
        .unwrap();
    assert_eq!(
        store.get_attribute(&descriptor, "examiner").unwrap(),
        Some(b"k. smith".to_vec())
    );

    assert!(store
        .set_attribute(&descriptor, "bad/key", b"x")
        .is_err());
}

#[test]
fn test_file_hash_attribute_convention() {
    let dir = tempfile::tempdir().unwrap();
    let store = FsStore::open(dir.path()).unwrap();
    let session = store.new_session_on(day("2026-08-05")).unwrap();
    let disk = ManagedDisk::flat(source("d1", vec![0u8; SECTOR_SIZE]), session).unwrap();
    let descriptor = store.put(disk).unwrap();

    let records = vec![
        diskvault::filehash::FileHashRecord {
            hash: vec![0xab; 16],
            path: "/bin/sh".to_string(),
        },
        diskvault::filehash::FileHashRecord {
            hash: vec![0xcd; 16],
            path: "/etc/hosts".to_string(),
        },
    ];
    let key = "filehash.md5";
    assert!(diskvault::filehash::is_file_hash_key(key));
    store
        .set_attribute(&descriptor, key, &diskvault::filehash::format_records(&records))
        .unwrap();

    let value = store.get_attribute(&descriptor, key).unwrap().unwrap();
    assert_eq!(diskvault::filehash::parse_records(&value).unwrap(), records);
}

#[test]
fn test_attribute_on_unknown_descriptor_is_an_error() {
    let dir = tempfile::tempdir().unwrap();
    let store = FsStore::open(dir.path()).unwrap();
    let session = store.new_session_on(day("2026-08-05")).unwrap();
    let descriptor =
        diskvault::DiskDescriptor::new(DiskId::new("ghost").unwrap(), session);
    assert!(matches!(
        store.get_attribute(&descriptor, "k"),
        Err(VaultError::UnknownDescriptor(_))
    ));
    assert!(matches!(
        store.set_attribute(&descriptor, "k", b"v"),
        Err(VaultError::UnknownDescriptor(_))
    ));
}

#[test]
fn test_digest_is_deterministic_and_sized() {
    let dir = tempfile::tempdir().unwrap();
    let store = FsStore::open(dir.path()).unwrap();
    let session = store.new_session_on(day("2026-08-05")).unwrap();

    let grains = 24u64;
    let grain_sectors = 2u64;
    let data = patterned((grains * grain_sectors) as usize * SECTOR_SIZE);
    let disk = ManagedDisk::stream_optimized(
        source("d1", data),
        session,
        grain_sectors,
        CompressionMethod::Deflate,
    )
    .unwrap();
    let descriptor = store.put(disk).unwrap();

    let first = store.digest(&descriptor).unwrap();
    let second = store.digest(&descriptor).unwrap();
    assert_eq!(first, second);
    assert_eq!(first.len() as u64, grains);
    assert_eq!(first.algorithm(), HashAlgorithm::Sha1);

    // explicit algorithm bypasses the cached sha1 digest
    let md5 = store.digest_with(&descriptor, HashAlgorithm::Md5).unwrap();
    assert_eq!(md5.len() as u64, grains);
    assert_eq!(md5.algorithm(), HashAlgorithm::Md5);
}

#[test]
fn test_store_reload_reindexes_stored_disks() {
    let dir = tempfile::tempdir().unwrap();
    let data = patterned(16 * SECTOR_SIZE);
    let descriptor = {
        let store = FsStore::open(dir.path()).unwrap();
        let session = store.new_session_on(day("2026-08-05")).unwrap();
        let disk = ManagedDisk::stream_optimized(
            source("d1", data.clone()),
            session,
            1,
            CompressionMethod::Gzip,
        )
        .unwrap();
        store.put(disk).unwrap()
    };

    let store = FsStore::open(dir.path()).unwrap();
    assert_eq!(store.enumerate(), vec![descriptor.clone()]);

    let disk = store.locate(&descriptor).unwrap();
    let mut out = Vec::new();
    disk.reader().unwrap().read_to_end(&mut out).unwrap();
    assert_eq!(out, data);
}

#[test]
fn test_put_progress_reports_monotonic_totals() {
    let dir = tempfile::tempdir().unwrap();
    let store = FsStore::open(dir.path()).unwrap();
    let session = store.new_session_on(day("2026-08-05")).unwrap();
    let disk = ManagedDisk::flat(source("d1", patterned(256 * SECTOR_SIZE)), session).unwrap();

    let last_seen = AtomicU64::new(0);
    let calls = AtomicU64::new(0);
    store
        .put_with_progress(
            disk,
            &|written| {
                let previous = last_seen.swap(written, Ordering::SeqCst);
                assert!(written >= previous);
                calls.fetch_add(1, Ordering::SeqCst);
            },
            64 * SECTOR_SIZE as u64,
        )
        .unwrap();

    assert!(calls.load(Ordering::SeqCst) >= 2);
    // final report covers the whole container: data + header sector
    assert_eq!(
        last_seen.load(Ordering::SeqCst),
        257 * SECTOR_SIZE as u64
    );
}

#[test]
fn test_usable_space_reports_nonzero() {
    let dir = tempfile::tempdir().unwrap();
    let store = FsStore::open(dir.path()).unwrap();
    assert!(store.usable_space().unwrap() > 0);
}

#[test]
fn test_orphaned_temp_files_are_cleaned_on_open() {
    let dir = tempfile::tempdir().unwrap();
    {
        FsStore::open(dir.path()).unwrap();
    }
    let stray = dir.path().join("temp").join("d1_2026-08-05.1.part");
    std::fs::write(&stray, b"half-written").unwrap();

    let store = FsStore::open(dir.path()).unwrap();
    assert!(!stray.exists());
    assert!(store.enumerate().is_empty());
}

#[test]
fn test_store_trait_object_is_usable() {
    use diskvault::Store;

    let dir = tempfile::tempdir().unwrap();
    let store: Box<dyn Store> = Box::new(FsStore::open(dir.path()).unwrap());
    let session = store.new_session().unwrap();
    let disk = ManagedDisk::flat(source("d1", vec![0u8; SECTOR_SIZE]), session).unwrap();
    let descriptor = store.put(disk).unwrap();
    assert_eq!(store.enumerate(), vec![descriptor]);
}
