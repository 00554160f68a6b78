//! Managed-disk containers
//!
//! A [`ManagedDisk`] is one logical capture in one of two closed variants,
//! dispatched on the header's type tag: flat, or stream-optimized. It lives
//! in exactly one of two modes:
//!
//! - **unmanaged mode**: wraps a live [`UnmanagedDisk`] plus the session it
//!   is being acquired under; the only useful operation is streaming it out
//!   once, forward, into a store;
//! - **managed mode**: loaded from an already-stored container file plus
//!   its parsed header; supports random-access reading and digesting.
//!
//! A container never transitions between modes in memory; the store builds
//! a fresh managed-mode object once the put commits.

use crate::compression::CompressionMethod;
use crate::descriptor::DiskDescriptor;
use crate::digest::GrainDigest;
use crate::error::{Result, VaultError};
use crate::flat::{write_flat, FlatReader};
use crate::header::{ContainerHeader, ContainerType, HEADER_SIZE};
use crate::sector::{is_sector_aligned, sectors_to_bytes, SECTOR_SIZE_U64};
use crate::session::Session;
use crate::stream::{write_stream, StreamReader, GRAIN_TABLE_ENTRIES};
use crate::unmanaged::UnmanagedDisk;
use serde::Serialize;
use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use uuid::Uuid;

enum DiskMode {
    Unmanaged(Box<dyn UnmanagedDisk>),
    Managed(PathBuf),
}

/// One logical disk capture, flat or stream-optimized
pub struct ManagedDisk {
    header: ContainerHeader,
    mode: DiskMode,
    parent: Option<Arc<ManagedDisk>>,
    parent_digest: Option<GrainDigest>,
}

impl ManagedDisk {
    /// Wrap a source as a flat container under `session`.
    ///
    /// The source length must be a whole number of sectors; anything else
    /// is rejected here, before any I/O.
    pub fn flat(source: Box<dyn UnmanagedDisk>, session: Session) -> Result<ManagedDisk> {
        let len = source.len();
        if !is_sector_aligned(len) {
            return Err(VaultError::NotSectorAligned(len));
        }
        let header = ContainerHeader {
            container_type: ContainerType::Flat,
            compression: CompressionMethod::None,
            uuid: Uuid::new_v4(),
            parent: None,
            disk_id: source.id().clone(),
            session,
            capacity: len / SECTOR_SIZE_U64,
            grain_sectors: 0,
            table_entries: 0,
            gd_offset: 0,
            rgd_offset: 0,
            data_offset: 1,
        };
        Ok(ManagedDisk {
            header,
            mode: DiskMode::Unmanaged(source),
            parent: None,
            parent_digest: None,
        })
    }

    /// Wrap a source as a stream-optimized container under `session`.
    ///
    /// `grain_sectors` must be a power of two; the source length must be a
    /// whole multiple of the grain size.
    pub fn stream_optimized(
        source: Box<dyn UnmanagedDisk>,
        session: Session,
        grain_sectors: u64,
        compression: CompressionMethod,
    ) -> Result<ManagedDisk> {
        if grain_sectors == 0 || !grain_sectors.is_power_of_two() {
            return Err(VaultError::GrainSizeNotPowerOfTwo(grain_sectors));
        }
        let len = source.len();
        let grain_bytes = sectors_to_bytes(grain_sectors);
        if !is_sector_aligned(len) || len % grain_bytes != 0 {
            return Err(VaultError::NotGrainAligned {
                len,
                grain: grain_sectors,
            });
        }
        let header = ContainerHeader {
            container_type: ContainerType::StreamOptimized,
            compression,
            uuid: Uuid::new_v4(),
            parent: None,
            disk_id: source.id().clone(),
            session,
            capacity: len / SECTOR_SIZE_U64,
            grain_sectors,
            table_entries: GRAIN_TABLE_ENTRIES,
            gd_offset: 0,
            rgd_offset: 0,
            data_offset: 1,
        };
        Ok(ManagedDisk {
            header,
            mode: DiskMode::Unmanaged(source),
            parent: None,
            parent_digest: None,
        })
    }

    /// Wrap a source as a differential stream-optimized container.
    ///
    /// `parent_uuid` names the logical parent capture and `parent_digest`
    /// its per-grain digest; any grain whose hash matches the parent's at
    /// the same index is elided from the output and recorded as a
    /// same-as-parent entry. This is how repeated acquisitions of a
    /// mostly-unchanged disk stay small.
    pub fn stream_optimized_with_parent(
        source: Box<dyn UnmanagedDisk>,
        session: Session,
        grain_sectors: u64,
        compression: CompressionMethod,
        parent_uuid: Uuid,
        parent_digest: GrainDigest,
    ) -> Result<ManagedDisk> {
        let mut disk = Self::stream_optimized(source, session, grain_sectors, compression)?;
        disk.header.parent = Some(parent_uuid);
        disk.parent_digest = Some(parent_digest);
        Ok(disk)
    }

    /// Load a stored container file, dispatching on the header's type tag.
    ///
    /// For stream-optimized containers the grain-directory offset is taken
    /// from the footer at `end-of-file minus two sectors`, and the terminal
    /// end-of-stream marker is checked.
    pub fn open(path: impl AsRef<Path>) -> Result<ManagedDisk> {
        let path = path.as_ref().to_path_buf();
        let mut file = File::open(&path)?;
        let mut header = ContainerHeader::read_from(&mut file)?;

        let file_len = file.metadata()?.len();
        if !is_sector_aligned(file_len) {
            return Err(VaultError::Corrupt(format!(
                "container file length {file_len} is not a whole number of sectors"
            )));
        }

        match header.container_type {
            ContainerType::Flat => {
                let expected = HEADER_SIZE as u64 + sectors_to_bytes(header.capacity);
                if file_len != expected {
                    return Err(VaultError::Corrupt(format!(
                        "flat container is {file_len} bytes, expected {expected}"
                    )));
                }
            }
            ContainerType::StreamOptimized => {
                if file_len < 4 * SECTOR_SIZE_U64 {
                    return Err(VaultError::Corrupt(
                        "stream-optimized container too short for its trailer".to_string(),
                    ));
                }
                file.seek(SeekFrom::Start(file_len - 2 * SECTOR_SIZE_U64))?;
                let footer = ContainerHeader::read_from(&mut file)?;
                if footer.uuid != header.uuid || footer.gd_offset == 0 {
                    return Err(VaultError::Corrupt(
                        "footer does not match the leading header".to_string(),
                    ));
                }
                header = footer;

                let mut last = [0u8; crate::sector::SECTOR_SIZE];
                file.read_exact(&mut last)?;
                let marker = crate::stream::Marker::from_sector(&last)?;
                if marker.marker_type != crate::stream::MarkerType::EndOfStream {
                    return Err(VaultError::Corrupt(
                        "container does not end with an end-of-stream marker".to_string(),
                    ));
                }
            }
        }

        Ok(ManagedDisk {
            header,
            mode: DiskMode::Managed(path),
            parent: None,
            parent_digest: None,
        })
    }

    pub fn header(&self) -> &ContainerHeader {
        &self.header
    }

    pub fn descriptor(&self) -> DiskDescriptor {
        self.header.descriptor()
    }

    /// Creation identity
    pub fn uuid(&self) -> Uuid {
        self.header.uuid
    }

    /// Creation identity of the logical parent, if any
    pub fn parent_uuid(&self) -> Option<Uuid> {
        self.header.parent
    }

    pub fn container_type(&self) -> ContainerType {
        self.header.container_type
    }

    /// Logical capacity in bytes
    pub fn capacity_bytes(&self) -> u64 {
        sectors_to_bytes(self.header.capacity)
    }

    /// Whether this container has been committed to a store
    pub fn is_stored(&self) -> bool {
        matches!(self.mode, DiskMode::Managed(_))
    }

    /// Path of the stored container file, once managed
    pub fn path(&self) -> Option<&Path> {
        match &self.mode {
            DiskMode::Managed(path) => Some(path),
            DiskMode::Unmanaged(_) => None,
        }
    }

    /// The resolved parent container, once wired by the store
    pub fn parent(&self) -> Option<&Arc<ManagedDisk>> {
        self.parent.as_ref()
    }

    pub(crate) fn set_parent(&mut self, parent: Arc<ManagedDisk>) {
        self.parent = Some(parent);
    }

    /// Stream this container out in one forward pass.
    ///
    /// Only meaningful in unmanaged mode; a stored container is immutable
    /// and refuses to be rewritten. Returns the bytes written, always a
    /// whole number of sectors.
    pub fn write_to<W: Write + ?Sized>(&self, out: &mut W) -> Result<u64> {
        let source = match &self.mode {
            DiskMode::Unmanaged(source) => source.as_ref(),
            DiskMode::Managed(_) => return Err(VaultError::AlreadyStored),
        };
        match self.header.container_type {
            ContainerType::Flat => write_flat(&self.header, source, out),
            ContainerType::StreamOptimized => {
                write_stream(&self.header, source, self.parent_digest.as_ref(), out)
            }
        }
    }

    /// Open a fresh random-access reader over the stored bytes.
    ///
    /// Each call returns an independent cursor; readers never share
    /// position state, so any number may be open concurrently. Requires
    /// managed mode.
    pub fn reader(&self) -> Result<DiskReader> {
        let path = match &self.mode {
            DiskMode::Managed(path) => path,
            DiskMode::Unmanaged(_) => return Err(VaultError::NotStored),
        };
        let file = File::open(path)?;
        match self.header.container_type {
            ContainerType::Flat => Ok(DiskReader::Flat(FlatReader::new(file, &self.header))),
            ContainerType::StreamOptimized => {
                let parent_reader = match &self.parent {
                    Some(parent) => Some(Box::new(parent.reader()?)),
                    None => None,
                };
                Ok(DiskReader::Stream(StreamReader::new(
                    file,
                    self.header.clone(),
                    parent_reader,
                )?))
            }
        }
    }

    /// Serializable summary for front ends
    pub fn info(&self) -> ContainerInfo {
        ContainerInfo {
            disk_id: self.header.disk_id.to_string(),
            session: self.header.session.to_string(),
            container_type: self.header.container_type.to_string(),
            uuid: self.header.uuid.to_string(),
            parent_uuid: self.header.parent.map(|u| u.to_string()),
            capacity_bytes: self.capacity_bytes(),
            grain_sectors: self.header.grain_sectors,
            compression: self.header.compression.to_string(),
        }
    }
}

/// Random-access cursor over a stored container, one per caller
pub enum DiskReader {
    Flat(FlatReader),
    Stream(StreamReader),
}

impl DiskReader {
    /// Logical capacity in bytes
    pub fn len(&self) -> u64 {
        match self {
            DiskReader::Flat(r) => r.len(),
            DiskReader::Stream(r) => r.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Read for DiskReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            DiskReader::Flat(r) => r.read(buf),
            DiskReader::Stream(r) => r.read(buf),
        }
    }
}

impl Seek for DiskReader {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        match self {
            DiskReader::Flat(r) => r.seek(pos),
            DiskReader::Stream(r) => r.seek(pos),
        }
    }
}

/// Flat summary of one container, for JSON front ends
#[derive(Debug, Clone, Serialize)]
pub struct ContainerInfo {
    pub disk_id: String,
    pub session: String,
    pub container_type: String,
    pub uuid: String,
    pub parent_uuid: Option<String>,
    pub capacity_bytes: u64,
    pub grain_sectors: u64,
    pub compression: String,
}

impl ContainerInfo {
    /// Render as pretty JSON
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}
