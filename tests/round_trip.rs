//! Container format round-trip and size-invariant tests

use diskvault::{
    BufferDisk, CompressionMethod, ContainerHeader, DiskId, ManagedDisk, VaultError, SECTOR_SIZE,
};
use std::io::{Read, Seek, SeekFrom};
use std::path::Path;

/// Deterministic non-uniform test pattern with embedded zero runs
fn patterned(len: usize) -> Vec<u8> {
    let mut data = vec![0u8; len];
    for (i, byte) in data.iter_mut().enumerate() {
        // leave every third 4KiB block zero to exercise sparse paths
        if (i / 4096) % 3 != 0 {
            *byte = (i % 251) as u8;
        }
    }
    data
}

fn source(id: &str, data: Vec<u8>) -> Box<BufferDisk> {
    Box::new(BufferDisk::new(DiskId::new(id).unwrap(), data))
}

fn session() -> diskvault::Session {
    let date = chrono::NaiveDate::from_ymd_opt(2026, 8, 5).unwrap();
    diskvault::Session::initial(uuid::Uuid::new_v4(), date)
}

/// Write an unmanaged-mode container to a file, reopen it managed
fn write_and_open(disk: &ManagedDisk, path: &Path) -> ManagedDisk {
    let mut file = std::fs::File::create(path).unwrap();
    let written = disk.write_to(&mut file).unwrap();
    drop(file);
    assert_eq!(written, std::fs::metadata(path).unwrap().len());
    ManagedDisk::open(path).unwrap()
}

fn read_all(disk: &ManagedDisk) -> Vec<u8> {
    let mut reader = disk.reader().unwrap();
    let mut out = Vec::new();
    reader.read_to_end(&mut out).unwrap();
    out
}

#[test]
fn test_stream_round_trip_with_partial_trailing_table() {
    // 600 one-sector grains: one full 512-entry table plus an 88-entry
    // trailing partial table.
    let data = patterned(600 * SECTOR_SIZE);
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("600.mdsk");

    let disk = ManagedDisk::stream_optimized(
        source("sda", data.clone()),
        session(),
        1,
        CompressionMethod::Deflate,
    )
    .unwrap();
    let stored = write_and_open(&disk, &path);

    assert_eq!(read_all(&stored), data);
}

#[test]
fn test_stream_round_trip_all_compression_methods() {
    let data = patterned(64 * SECTOR_SIZE);
    let dir = tempfile::tempdir().unwrap();

    for method in [
        CompressionMethod::None,
        CompressionMethod::Deflate,
        CompressionMethod::Gzip,
        CompressionMethod::Snappy,
    ] {
        let path = dir.path().join(format!("{method}.mdsk"));
        let disk =
            ManagedDisk::stream_optimized(source("sda", data.clone()), session(), 4, method)
                .unwrap();
        let stored = write_and_open(&disk, &path);
        assert_eq!(read_all(&stored), data, "{method} round trip failed");
    }
}

#[test]
fn test_stream_round_trip_multi_sector_grain() {
    let data = patterned(1024 * SECTOR_SIZE);
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("g128.mdsk");

    let disk = ManagedDisk::stream_optimized(
        source("sda", data.clone()),
        session(),
        128,
        CompressionMethod::Gzip,
    )
    .unwrap();
    let stored = write_and_open(&disk, &path);
    assert_eq!(read_all(&stored), data);
}

#[test]
fn test_ondisk_length_is_sector_multiple() {
    let data = patterned(100 * SECTOR_SIZE);
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("aligned.mdsk");

    let disk = ManagedDisk::stream_optimized(
        source("sda", data),
        session(),
        2,
        CompressionMethod::Snappy,
    )
    .unwrap();
    write_and_open(&disk, &path);

    let len = std::fs::metadata(&path).unwrap().len();
    assert_eq!(len % SECTOR_SIZE as u64, 0);
}

#[test]
fn test_flat_container_exact_size() {
    // 64 KiB source must produce exactly 64 KiB + one header sector.
    let data = vec![0xA5u8; 64 * 1024];
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("flat.mdsk");

    let disk = ManagedDisk::flat(source("sda", data.clone()), session()).unwrap();
    let stored = write_and_open(&disk, &path);

    let len = std::fs::metadata(&path).unwrap().len();
    assert_eq!(len, 64 * 1024 + SECTOR_SIZE as u64);
    assert_eq!(read_all(&stored), data);
}

#[test]
fn test_unaligned_source_rejected_before_io() {
    let data = vec![1u8; 1000];
    assert!(matches!(
        ManagedDisk::flat(source("sda", data.clone()), session()),
        Err(VaultError::NotSectorAligned(1000))
    ));
    assert!(matches!(
        ManagedDisk::stream_optimized(source("sda", data), session(), 1, CompressionMethod::None),
        Err(VaultError::NotGrainAligned { .. })
    ));

    // sector-aligned but not grain-aligned
    let data = vec![1u8; 3 * SECTOR_SIZE];
    assert!(matches!(
        ManagedDisk::stream_optimized(source("sda", data), session(), 2, CompressionMethod::None),
        Err(VaultError::NotGrainAligned { .. })
    ));
}

#[test]
fn test_grain_size_must_be_power_of_two() {
    let data = vec![1u8; 6 * SECTOR_SIZE];
    assert!(matches!(
        ManagedDisk::stream_optimized(source("sda", data), session(), 3, CompressionMethod::None),
        Err(VaultError::GrainSizeNotPowerOfTwo(3))
    ));
}

#[test]
fn test_zero_source_strictly_smaller_than_nonzero() {
    let dir = tempfile::tempdir().unwrap();
    let len = 512 * SECTOR_SIZE;

    let zero_path = dir.path().join("zero.mdsk");
    let zeros = ManagedDisk::stream_optimized(
        source("z", vec![0u8; len]),
        session(),
        1,
        CompressionMethod::Deflate,
    )
    .unwrap();
    write_and_open(&zeros, &zero_path);

    let full_path = dir.path().join("full.mdsk");
    let full = ManagedDisk::stream_optimized(
        source("f", patterned(len)),
        session(),
        1,
        CompressionMethod::Deflate,
    )
    .unwrap();
    write_and_open(&full, &full_path);

    let zero_len = std::fs::metadata(&zero_path).unwrap().len();
    let full_len = std::fs::metadata(&full_path).unwrap().len();
    assert!(
        zero_len < full_len,
        "zero container ({zero_len}) not smaller than populated ({full_len})"
    );

    // All-zero spans elide their grain tables too: header, directory
    // marker + directory, footer marker + footer, end-of-stream.
    let zero_reader_data = read_all(&ManagedDisk::open(&zero_path).unwrap());
    assert!(zero_reader_data.iter().all(|&b| b == 0));
    assert_eq!(zero_reader_data.len(), len);
}

#[test]
fn test_footer_locatable_at_end_minus_two_sectors() {
    let data = patterned(32 * SECTOR_SIZE);
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("footer.mdsk");

    let disk = ManagedDisk::stream_optimized(
        source("sda", data),
        session(),
        1,
        CompressionMethod::None,
    )
    .unwrap();
    write_and_open(&disk, &path);

    let mut file = std::fs::File::open(&path).unwrap();
    let len = file.metadata().unwrap().len();
    file.seek(SeekFrom::Start(len - 2 * SECTOR_SIZE as u64))
        .unwrap();
    let footer = ContainerHeader::read_from(&mut file).unwrap();
    assert_ne!(footer.gd_offset, 0);

    // leading header leaves the directory offset unset
    file.seek(SeekFrom::Start(0)).unwrap();
    let header = ContainerHeader::read_from(&mut file).unwrap();
    assert_eq!(header.gd_offset, 0);
    assert_eq!(header.uuid, footer.uuid);
}

#[test]
fn test_random_access_reads() {
    let data = patterned(256 * SECTOR_SIZE);
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("random.mdsk");

    let disk = ManagedDisk::stream_optimized(
        source("sda", data.clone()),
        session(),
        4,
        CompressionMethod::Deflate,
    )
    .unwrap();
    let stored = write_and_open(&disk, &path);
    let mut reader = stored.reader().unwrap();

    // sub-grain read in the middle
    let mut buf = vec![0u8; 100];
    reader.seek(SeekFrom::Start(5000)).unwrap();
    reader.read_exact(&mut buf).unwrap();
    assert_eq!(buf, &data[5000..5100]);

    // read spanning a grain boundary (grain = 2048 bytes)
    let mut buf = vec![0u8; 4096];
    reader.seek(SeekFrom::Start(2048 * 3 - 1000)).unwrap();
    reader.read_exact(&mut buf).unwrap();
    assert_eq!(buf, &data[2048 * 3 - 1000..2048 * 3 - 1000 + 4096]);

    // backwards seek, then a zero region
    reader.seek(SeekFrom::Start(0)).unwrap();
    let mut buf = vec![0u8; 4096];
    reader.read_exact(&mut buf).unwrap();
    assert_eq!(buf, &data[..4096]);

    // past-capacity reads return nothing
    reader.seek(SeekFrom::End(0)).unwrap();
    assert_eq!(reader.read(&mut buf).unwrap(), 0);
}

#[test]
fn test_reopened_source_bad_magic() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("junk.mdsk");
    std::fs::write(&path, vec![0x42u8; 4 * SECTOR_SIZE]).unwrap();
    assert!(matches!(
        ManagedDisk::open(&path),
        Err(VaultError::BadMagic)
    ));
}

#[test]
fn test_truncated_container_rejected() {
    let data = patterned(16 * SECTOR_SIZE);
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("trunc.mdsk");

    let disk = ManagedDisk::stream_optimized(
        source("sda", data),
        session(),
        1,
        CompressionMethod::None,
    )
    .unwrap();
    write_and_open(&disk, &path);

    // chop off the end-of-stream marker; the trailer no longer lines up
    let len = std::fs::metadata(&path).unwrap().len();
    let file = std::fs::OpenOptions::new().write(true).open(&path).unwrap();
    file.set_len(len - SECTOR_SIZE as u64).unwrap();
    drop(file);

    assert!(ManagedDisk::open(&path).is_err());
}
