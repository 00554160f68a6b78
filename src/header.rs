//! Container header
//!
//! Every container starts with one fixed 512-byte header sector. The
//! stream-optimized variant duplicates it at the end of the file as a
//! footer, with the grain-directory offset back-filled once known, so a
//! reader can bootstrap from `end-of-file minus two sectors` without
//! parsing anything else first.

use crate::compression::CompressionMethod;
use crate::descriptor::{DiskDescriptor, DiskId};
use crate::error::{Result, VaultError};
use crate::sector::SECTOR_SIZE;
use crate::session::Session;
use std::io::{Read, Write};
use uuid::Uuid;

pub const MAGIC: [u8; 8] = *b"MDSK\x0d\x0a\x1a\x00";
pub const VERSION: u32 = 1;

/// Header size in bytes, one full sector
pub const HEADER_SIZE: usize = SECTOR_SIZE;

const DISK_ID_FIELD: usize = 64;
const SESSION_FIELD: usize = 64;

/// Container variant tag
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum ContainerType {
    /// Header followed by a verbatim copy of the source
    Flat = 1,
    /// Sparse, grain-addressed, compressed
    StreamOptimized = 2,
}

impl ContainerType {
    pub fn from_u16(value: u16) -> Result<Self> {
        match value {
            1 => Ok(ContainerType::Flat),
            2 => Ok(ContainerType::StreamOptimized),
            other => Err(VaultError::UnknownContainerType(other)),
        }
    }
}

impl std::fmt::Display for ContainerType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ContainerType::Flat => "flat",
            ContainerType::StreamOptimized => "stream-optimized",
        };
        f.write_str(name)
    }
}

/// Fixed 512-byte container preamble/footer
///
/// All integers little-endian. Sector-denominated fields: `capacity`,
/// `grain_sectors`, `gd_offset`, `rgd_offset`, `data_offset`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerHeader {
    /// Container variant
    pub container_type: ContainerType,

    /// Grain compression method (flat containers record `None`)
    pub compression: CompressionMethod,

    /// Creation identity of this container
    pub uuid: Uuid,

    /// Creation identity of the logical parent, if any
    pub parent: Option<Uuid>,

    /// Identity of the acquired source
    pub disk_id: DiskId,

    /// Acquisition session, full text form on disk
    pub session: Session,

    /// Logical capacity in sectors
    pub capacity: u64,

    /// Grain size in sectors (0 for flat)
    pub grain_sectors: u64,

    /// Entries per grain table (0 for flat)
    pub table_entries: u32,

    /// Sector offset of the grain directory; 0 in the leading header,
    /// back-filled in the footer
    pub gd_offset: u64,

    /// Sector offset of the redundant grain directory; reserved, written 0
    pub rgd_offset: u64,

    /// Sector offset of the first payload
    pub data_offset: u64,
}

impl ContainerHeader {
    /// Serialize to exactly [`HEADER_SIZE`] bytes, zero-padding reserved space
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(HEADER_SIZE);

        bytes.extend_from_slice(&MAGIC);
        bytes.extend_from_slice(&VERSION.to_le_bytes());
        bytes.extend_from_slice(&(self.container_type as u16).to_le_bytes());
        bytes.extend_from_slice(&self.compression.as_u16().to_le_bytes());
        bytes.extend_from_slice(self.uuid.as_bytes());
        bytes.extend_from_slice(self.parent.unwrap_or_else(Uuid::nil).as_bytes());

        let mut disk_field = [0u8; DISK_ID_FIELD];
        let disk_text = self.disk_id.as_str().as_bytes();
        disk_field[..disk_text.len()].copy_from_slice(disk_text);
        bytes.extend_from_slice(&disk_field);

        let mut session_field = [0u8; SESSION_FIELD];
        let session_text = self.session.to_string();
        session_field[..session_text.len()].copy_from_slice(session_text.as_bytes());
        bytes.extend_from_slice(&session_field);

        bytes.extend_from_slice(&self.capacity.to_le_bytes());
        bytes.extend_from_slice(&self.grain_sectors.to_le_bytes());
        bytes.extend_from_slice(&self.table_entries.to_le_bytes());
        bytes.extend_from_slice(&self.gd_offset.to_le_bytes());
        bytes.extend_from_slice(&self.rgd_offset.to_le_bytes());
        bytes.extend_from_slice(&self.data_offset.to_le_bytes());

        bytes.resize(HEADER_SIZE, 0);
        bytes
    }

    /// Deserialize from one header sector
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < HEADER_SIZE {
            return Err(VaultError::TruncatedHeader);
        }

        if bytes[0..8] != MAGIC {
            return Err(VaultError::BadMagic);
        }
        let mut offset = 8;

        let version = u32::from_le_bytes(bytes[offset..offset + 4].try_into().unwrap());
        if version != VERSION {
            return Err(VaultError::UnsupportedVersion(version));
        }
        offset += 4;

        let container_type =
            ContainerType::from_u16(u16::from_le_bytes(bytes[offset..offset + 2].try_into().unwrap()))?;
        offset += 2;

        let compression =
            CompressionMethod::from_u16(u16::from_le_bytes(bytes[offset..offset + 2].try_into().unwrap()))?;
        offset += 2;

        let uuid = Uuid::from_slice(&bytes[offset..offset + 16]).unwrap();
        offset += 16;

        let parent_raw = Uuid::from_slice(&bytes[offset..offset + 16]).unwrap();
        let parent = if parent_raw.is_nil() {
            None
        } else {
            Some(parent_raw)
        };
        offset += 16;

        let disk_id = DiskId::new(read_padded_str(&bytes[offset..offset + DISK_ID_FIELD])?)?;
        offset += DISK_ID_FIELD;

        let session: Session = read_padded_str(&bytes[offset..offset + SESSION_FIELD])?.parse()?;
        offset += SESSION_FIELD;

        let capacity = u64::from_le_bytes(bytes[offset..offset + 8].try_into().unwrap());
        offset += 8;
        let grain_sectors = u64::from_le_bytes(bytes[offset..offset + 8].try_into().unwrap());
        offset += 8;
        let table_entries = u32::from_le_bytes(bytes[offset..offset + 4].try_into().unwrap());
        offset += 4;
        let gd_offset = u64::from_le_bytes(bytes[offset..offset + 8].try_into().unwrap());
        offset += 8;
        let rgd_offset = u64::from_le_bytes(bytes[offset..offset + 8].try_into().unwrap());
        offset += 8;
        let data_offset = u64::from_le_bytes(bytes[offset..offset + 8].try_into().unwrap());

        Ok(ContainerHeader {
            container_type,
            compression,
            uuid,
            parent,
            disk_id,
            session,
            capacity,
            grain_sectors,
            table_entries,
            gd_offset,
            rgd_offset,
            data_offset,
        })
    }

    /// Read one header sector from a byte-oriented input
    pub fn read_from<R: Read + ?Sized>(reader: &mut R) -> Result<Self> {
        let mut buffer = [0u8; HEADER_SIZE];
        let mut filled = 0;
        while filled < HEADER_SIZE {
            let n = reader.read(&mut buffer[filled..])?;
            if n == 0 {
                return Err(VaultError::TruncatedHeader);
            }
            filled += n;
        }
        Self::from_bytes(&buffer)
    }

    /// Write one header sector to a byte-oriented output
    pub fn write_to<W: Write + ?Sized>(&self, writer: &mut W) -> Result<()> {
        writer.write_all(&self.to_bytes())?;
        Ok(())
    }

    /// The store key this container belongs under
    pub fn descriptor(&self) -> DiskDescriptor {
        DiskDescriptor::new(self.disk_id.clone(), self.session.clone())
    }
}

fn read_padded_str(field: &[u8]) -> Result<&str> {
    let end = field.iter().position(|&b| b == 0).unwrap_or(field.len());
    std::str::from_utf8(&field[..end])
        .map_err(|_| VaultError::Corrupt("non-UTF-8 text in header field".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn sample_header() -> ContainerHeader {
        let source = Uuid::new_v4();
        ContainerHeader {
            container_type: ContainerType::StreamOptimized,
            compression: CompressionMethod::Deflate,
            uuid: Uuid::new_v4(),
            parent: None,
            disk_id: DiskId::new("sda").unwrap(),
            session: Session::initial(source, NaiveDate::from_ymd_opt(2026, 8, 5).unwrap()),
            capacity: 2048,
            grain_sectors: 128,
            table_entries: 512,
            gd_offset: 0,
            rgd_offset: 0,
            data_offset: 1,
        }
    }

    #[test]
    fn test_header_serialization_round_trip() {
        let header = sample_header();
        let bytes = header.to_bytes();
        assert_eq!(bytes.len(), HEADER_SIZE);

        let parsed = ContainerHeader::from_bytes(&bytes).unwrap();
        assert_eq!(parsed, header);
    }

    #[test]
    fn test_parent_round_trip() {
        let mut header = sample_header();
        header.parent = Some(Uuid::new_v4());
        let parsed = ContainerHeader::from_bytes(&header.to_bytes()).unwrap();
        assert_eq!(parsed.parent, header.parent);
    }

    #[test]
    fn test_invalid_magic() {
        let mut bytes = sample_header().to_bytes();
        bytes[0..8].copy_from_slice(b"INVALID!");
        assert!(matches!(
            ContainerHeader::from_bytes(&bytes),
            Err(VaultError::BadMagic)
        ));
    }

    #[test]
    fn test_unsupported_version() {
        let mut bytes = sample_header().to_bytes();
        bytes[8..12].copy_from_slice(&99u32.to_le_bytes());
        assert!(matches!(
            ContainerHeader::from_bytes(&bytes),
            Err(VaultError::UnsupportedVersion(99))
        ));
    }

    #[test]
    fn test_truncated_header() {
        let bytes = sample_header().to_bytes();
        assert!(matches!(
            ContainerHeader::from_bytes(&bytes[..100]),
            Err(VaultError::TruncatedHeader)
        ));

        let mut short: &[u8] = &bytes[..300];
        assert!(matches!(
            ContainerHeader::read_from(&mut short),
            Err(VaultError::TruncatedHeader)
        ));
    }

    #[test]
    fn test_gd_offset_backfill_survives_round_trip() {
        let mut footer = sample_header();
        footer.gd_offset = 77;
        let parsed = ContainerHeader::from_bytes(&footer.to_bytes()).unwrap();
        assert_eq!(parsed.gd_offset, 77);
    }

    #[test]
    fn test_descriptor_from_header() {
        let header = sample_header();
        let descriptor = header.descriptor();
        assert_eq!(descriptor.disk().as_str(), "sda");
        assert_eq!(descriptor.session(), &header.session);
    }
}
