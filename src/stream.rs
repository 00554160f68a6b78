//! Stream-optimized containers
//!
//! The sparse, grain-addressed variant. Written in one forward pass from a
//! live source, read back randomly through a two-level index:
//!
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │ sector 0: header (grain directory offset = 0)│
//! ├──────────────────────────────────────────────┤
//! │ per populated grain:                         │
//! │   12-byte grain marker (LBA, compressed len) │
//! │   compressed grain, zero-padded to a sector  │
//! ├──────────────────────────────────────────────┤
//! │ per populated table span:                    │
//! │   grain-table marker sector                  │
//! │   grain-table entries, sector-padded         │
//! ├──────────────────────────────────────────────┤
//! │ grain-directory marker sector                │
//! │ grain-directory entries, sector-padded       │
//! ├──────────────────────────────────────────────┤
//! │ footer marker sector                         │
//! │ footer (header copy, directory offset set)   │
//! │ end-of-stream marker sector                  │
//! └──────────────────────────────────────────────┘
//! ```
//!
//! Grain-table entries: 0 means the grain is all zeros and was not stored;
//! [`GRAIN_ENTRY_PARENT`] means the grain's content matches the logical
//! parent at the same grain index and the read delegates there; any other
//! value is the sector offset of the stored grain's marker. Grain-directory
//! entries: 0 means the whole covered span is zero and no table was
//! written, else the sector offset of the table data.

use crate::compression;
use crate::digest::{read_full, GrainDigest};
use crate::error::{Result, VaultError};
use crate::header::ContainerHeader;
use crate::sector::{sectors_covering, sectors_to_bytes, SECTOR_SIZE};
use crate::unmanaged::UnmanagedDisk;
use lru::LruCache;
use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::num::NonZeroUsize;
use std::sync::Arc;
use uuid::Uuid;

/// Entries per grain table
pub const GRAIN_TABLE_ENTRIES: u32 = 512;

/// Default grain size: 128 sectors, 64 KiB
pub const DEFAULT_GRAIN_SECTORS: u64 = 128;

/// Grain-table entry for an all-zero grain
pub const GRAIN_ENTRY_ZERO: u64 = 0;

/// Grain-table entry for a grain whose content matches the parent's
pub const GRAIN_ENTRY_PARENT: u64 = u64::MAX;

/// Grain marker: logical LBA (u64) + compressed length (u32)
const GRAIN_MARKER_SIZE: usize = 12;

/// Grain tables kept hot in the reader
const TABLE_CACHE_SIZE: usize = 32;

const ZERO_SECTOR: [u8; SECTOR_SIZE] = [0u8; SECTOR_SIZE];

/// Metadata marker type tag
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub(crate) enum MarkerType {
    EndOfStream = 0,
    GrainTable = 1,
    GrainDirectory = 2,
    Footer = 3,
}

impl MarkerType {
    fn from_u32(value: u32) -> Result<Self> {
        match value {
            0 => Ok(MarkerType::EndOfStream),
            1 => Ok(MarkerType::GrainTable),
            2 => Ok(MarkerType::GrainDirectory),
            3 => Ok(MarkerType::Footer),
            other => Err(VaultError::Corrupt(format!("unknown marker type {other}"))),
        }
    }
}

/// Sector-aligned metadata marker; always one full sector on disk
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Marker {
    /// Sectors covered by the structure that follows
    pub sectors: u64,
    pub marker_type: MarkerType,
}

impl Marker {
    pub fn new(marker_type: MarkerType, sectors: u64) -> Marker {
        Marker {
            sectors,
            marker_type,
        }
    }

    pub fn to_sector(self) -> [u8; SECTOR_SIZE] {
        let mut sector = [0u8; SECTOR_SIZE];
        sector[0..8].copy_from_slice(&self.sectors.to_le_bytes());
        // bytes 8..12: reserved size field, always 0
        sector[12..16].copy_from_slice(&(self.marker_type as u32).to_le_bytes());
        sector
    }

    pub fn from_sector(sector: &[u8]) -> Result<Marker> {
        if sector.len() < SECTOR_SIZE {
            return Err(VaultError::Corrupt("truncated metadata marker".to_string()));
        }
        let sectors = u64::from_le_bytes(sector[0..8].try_into().unwrap());
        let size = u32::from_le_bytes(sector[8..12].try_into().unwrap());
        if size != 0 {
            return Err(VaultError::Corrupt(format!(
                "metadata marker reserved size must be 0, got {size}"
            )));
        }
        let marker_type = MarkerType::from_u32(u32::from_le_bytes(sector[12..16].try_into().unwrap()))?;
        Ok(Marker {
            sectors,
            marker_type,
        })
    }

    fn write_to<W: Write + ?Sized>(self, out: &mut W) -> Result<()> {
        out.write_all(&self.to_sector())?;
        Ok(())
    }
}

fn is_zero(buf: &[u8]) -> bool {
    buf.iter().all(|&b| b == 0)
}

/// Write one stream-optimized container in a single forward pass.
///
/// Returns the total bytes written, always a whole number of sectors.
pub(crate) fn write_stream<W: Write + ?Sized>(
    header: &ContainerHeader,
    source: &dyn UnmanagedDisk,
    parent_digest: Option<&GrainDigest>,
    out: &mut W,
) -> Result<u64> {
    let grain_bytes = sectors_to_bytes(header.grain_sectors);
    let entries = header.table_entries as u64;
    let total_grains = header.capacity / header.grain_sectors;
    let total_tables = total_grains.div_ceil(entries);

    header.write_to(out)?;
    let mut next_sector: u64 = 1;

    let mut directory: Vec<u64> = Vec::with_capacity(total_tables as usize);
    let mut stream = source.open()?;
    let mut chunk = vec![0u8; (entries * grain_bytes) as usize];

    for table_index in 0..total_tables {
        let grains_in_table = entries.min(total_grains - table_index * entries);
        let chunk_len = (grains_in_table * grain_bytes) as usize;

        let got = read_full(stream.as_mut(), &mut chunk[..chunk_len])?;
        if got < chunk_len {
            return Err(VaultError::PartialRead {
                expected: sectors_to_bytes(header.capacity),
                got: table_index * entries * grain_bytes + got as u64,
            });
        }

        // An all-zero span writes nothing at all, not even its table.
        if is_zero(&chunk[..chunk_len]) {
            directory.push(0);
            continue;
        }

        let mut table = vec![GRAIN_ENTRY_ZERO; grains_in_table as usize];
        for g in 0..grains_in_table {
            let grain = &chunk[(g * grain_bytes) as usize..((g + 1) * grain_bytes) as usize];
            if is_zero(grain) {
                continue;
            }

            let grain_index = table_index * entries + g;
            if let Some(digest) = parent_digest {
                let hash = digest.algorithm().hash(grain);
                if digest.matches(grain_index as usize, &hash) {
                    table[g as usize] = GRAIN_ENTRY_PARENT;
                    continue;
                }
            }

            let lba = grain_index * header.grain_sectors;
            let compressed = compression::compress(grain, header.compression)?;
            out.write_all(&lba.to_le_bytes())?;
            out.write_all(&(compressed.len() as u32).to_le_bytes())?;
            out.write_all(&compressed)?;
            let written = GRAIN_MARKER_SIZE + compressed.len();
            out.write_all(&ZERO_SECTOR[..crate::sector::sector_padding(written)])?;

            table[g as usize] = next_sector;
            next_sector += sectors_covering(written as u64);
        }

        let table_sectors = sectors_covering(grains_in_table * 8);
        Marker::new(MarkerType::GrainTable, table_sectors).write_to(out)?;
        next_sector += 1;

        directory.push(next_sector);
        let mut table_bytes = 0usize;
        for entry in &table {
            out.write_all(&entry.to_le_bytes())?;
            table_bytes += 8;
        }
        out.write_all(&ZERO_SECTOR[..crate::sector::sector_padding(table_bytes)])?;
        next_sector += table_sectors;
    }

    let directory_sectors = sectors_covering(total_tables * 8);
    Marker::new(MarkerType::GrainDirectory, directory_sectors).write_to(out)?;
    next_sector += 1;

    let gd_offset = next_sector;
    let mut directory_bytes = 0usize;
    for entry in &directory {
        out.write_all(&entry.to_le_bytes())?;
        directory_bytes += 8;
    }
    out.write_all(&ZERO_SECTOR[..crate::sector::sector_padding(directory_bytes)])?;
    next_sector += directory_sectors;

    Marker::new(MarkerType::Footer, 1).write_to(out)?;
    next_sector += 1;

    let mut footer = header.clone();
    footer.gd_offset = gd_offset;
    footer.write_to(out)?;
    next_sector += 1;

    Marker::new(MarkerType::EndOfStream, 0).write_to(out)?;
    next_sector += 1;

    Ok(sectors_to_bytes(next_sector))
}

struct CurrentGrain {
    index: u64,
    /// `None` synthesizes zeros without holding a buffer
    data: Option<Vec<u8>>,
}

/// Random-access reader over a stored stream-optimized container.
///
/// Derives `(directory index, table index, offset in grain)` from the
/// logical position with shift/mask arithmetic, caches recently used grain
/// tables, and keeps the current grain decompressed so sub-grain reads
/// touch the disk once per grain.
pub struct StreamReader {
    file: File,
    header: ContainerHeader,
    directory: Vec<u64>,
    tables: LruCache<usize, Arc<Vec<u64>>>,
    current: Option<CurrentGrain>,
    parent: Option<Box<crate::container::DiskReader>>,
    pos: u64,
    len: u64,
    grain_shift: u32,
    total_grains: u64,
}

impl StreamReader {
    /// `header` must carry a resolved grain-directory offset (the footer's
    /// copy for a freshly written container).
    pub(crate) fn new(
        mut file: File,
        header: ContainerHeader,
        parent: Option<Box<crate::container::DiskReader>>,
    ) -> Result<StreamReader> {
        let grain_sectors = header.grain_sectors;
        if grain_sectors == 0 || !grain_sectors.is_power_of_two() {
            return Err(VaultError::GrainSizeNotPowerOfTwo(grain_sectors));
        }
        let entries = header.table_entries as u64;
        if entries == 0 || !entries.is_power_of_two() {
            return Err(VaultError::Corrupt(format!(
                "grain-table length {entries} is not a power of two"
            )));
        }
        if header.capacity % grain_sectors != 0 {
            return Err(VaultError::Corrupt(format!(
                "capacity {} is not a whole number of grains",
                header.capacity
            )));
        }
        if header.gd_offset == 0 {
            return Err(VaultError::Corrupt(
                "stream-optimized container has no grain directory offset".to_string(),
            ));
        }

        let grain_bytes = sectors_to_bytes(grain_sectors);
        let total_grains = header.capacity / grain_sectors;
        let total_tables = total_grains.div_ceil(entries) as usize;

        file.seek(SeekFrom::Start(sectors_to_bytes(header.gd_offset)))?;
        let mut raw = vec![0u8; total_tables * 8];
        let got = read_full(&mut file, &mut raw)?;
        if got < raw.len() {
            return Err(VaultError::Corrupt("truncated grain directory".to_string()));
        }
        let directory = raw
            .chunks_exact(8)
            .map(|c| u64::from_le_bytes(c.try_into().unwrap()))
            .collect();

        Ok(StreamReader {
            file,
            len: sectors_to_bytes(header.capacity),
            header,
            directory,
            tables: LruCache::new(NonZeroUsize::new(TABLE_CACHE_SIZE).unwrap()),
            current: None,
            parent,
            pos: 0,
            grain_shift: grain_bytes.trailing_zeros(),
            total_grains,
        })
    }

    /// Logical capacity in bytes
    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    fn load_table(&mut self, gd_index: usize, table_offset: u64) -> Result<Arc<Vec<u64>>> {
        if let Some(table) = self.tables.get(&gd_index) {
            return Ok(Arc::clone(table));
        }

        let entries = self.header.table_entries as u64;
        let count = entries.min(self.total_grains - gd_index as u64 * entries) as usize;
        self.file
            .seek(SeekFrom::Start(sectors_to_bytes(table_offset)))?;
        let mut raw = vec![0u8; count * 8];
        let got = read_full(&mut self.file, &mut raw)?;
        if got < raw.len() {
            return Err(VaultError::Corrupt(format!(
                "truncated grain table {gd_index}"
            )));
        }
        let table: Arc<Vec<u64>> = Arc::new(
            raw.chunks_exact(8)
                .map(|c| u64::from_le_bytes(c.try_into().unwrap()))
                .collect(),
        );
        self.tables.put(gd_index, Arc::clone(&table));
        Ok(table)
    }

    /// Load one grain's content; `None` means the grain reads as zeros
    fn load_grain(&mut self, grain_index: u64) -> Result<Option<Vec<u8>>> {
        let entries = self.header.table_entries as u64;
        let gd_index = (grain_index / entries) as usize;
        let gt_index = (grain_index % entries) as usize;

        let table_offset = self.directory[gd_index];
        if table_offset == 0 {
            return Ok(None);
        }

        let table = self.load_table(gd_index, table_offset)?;
        let grain_bytes = 1usize << self.grain_shift;

        match table[gt_index] {
            GRAIN_ENTRY_ZERO => Ok(None),
            GRAIN_ENTRY_PARENT => {
                let parent = self.parent.as_mut().ok_or_else(|| {
                    VaultError::UnresolvedParent(self.header.parent.unwrap_or_else(Uuid::nil))
                })?;
                parent.seek(SeekFrom::Start(grain_index << self.grain_shift))?;
                let mut data = vec![0u8; grain_bytes];
                let got = read_full(parent.as_mut(), &mut data)?;
                if got < grain_bytes {
                    return Err(VaultError::PartialRead {
                        expected: grain_bytes as u64,
                        got: got as u64,
                    });
                }
                Ok(Some(data))
            }
            marker_offset => {
                self.file
                    .seek(SeekFrom::Start(sectors_to_bytes(marker_offset)))?;
                let mut marker = [0u8; GRAIN_MARKER_SIZE];
                self.file.read_exact(&mut marker)?;
                let lba = u64::from_le_bytes(marker[0..8].try_into().unwrap());
                let compressed_len = u32::from_le_bytes(marker[8..12].try_into().unwrap()) as usize;

                if lba != grain_index * self.header.grain_sectors {
                    return Err(VaultError::Corrupt(format!(
                        "grain marker at sector {marker_offset} records LBA {lba}, expected {}",
                        grain_index * self.header.grain_sectors
                    )));
                }
                if compressed_len == 0 || compressed_len > 2 * grain_bytes + SECTOR_SIZE {
                    return Err(VaultError::Corrupt(format!(
                        "implausible compressed grain length {compressed_len}"
                    )));
                }

                let mut compressed = vec![0u8; compressed_len];
                self.file.read_exact(&mut compressed)?;
                let data =
                    compression::decompress(&compressed, self.header.compression, grain_bytes)?;
                Ok(Some(data))
            }
        }
    }
}

fn to_io(e: VaultError) -> io::Error {
    match e {
        VaultError::Io(inner) => inner,
        other => io::Error::new(io::ErrorKind::InvalidData, other),
    }
}

impl Read for StreamReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.pos >= self.len || buf.is_empty() {
            return Ok(0);
        }
        let grain_bytes = 1u64 << self.grain_shift;
        let grain_index = self.pos >> self.grain_shift;
        let within = (self.pos & (grain_bytes - 1)) as usize;
        let avail = (grain_bytes as usize - within)
            .min(buf.len())
            .min((self.len - self.pos) as usize);

        if self.current.as_ref().map(|c| c.index) != Some(grain_index) {
            let data = self.load_grain(grain_index).map_err(to_io)?;
            self.current = Some(CurrentGrain {
                index: grain_index,
                data,
            });
        }

        match &self.current.as_ref().unwrap().data {
            Some(data) => buf[..avail].copy_from_slice(&data[within..within + avail]),
            None => buf[..avail].fill(0),
        }
        self.pos += avail as u64;
        Ok(avail)
    }
}

impl Seek for StreamReader {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        self.pos = crate::flat::resolve_seek(pos, self.pos, self.len)?;
        Ok(self.pos)
    }
}
