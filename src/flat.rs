//! Flat containers
//!
//! The trivial container variant: one header sector followed by a verbatim
//! copy of the source bytes. The source length must already be a whole
//! number of sectors; there is no padding rule for this variant, so an
//! unaligned source is rejected at construction.

use crate::digest::read_full;
use crate::error::{Result, VaultError};
use crate::header::{ContainerHeader, HEADER_SIZE};
use crate::unmanaged::UnmanagedDisk;
use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom, Write};

const COPY_BUFFER: usize = 64 * 1024;

/// Stream a flat container: header, then the source, verbatim
pub(crate) fn write_flat<W: Write + ?Sized>(
    header: &ContainerHeader,
    source: &dyn UnmanagedDisk,
    out: &mut W,
) -> Result<u64> {
    header.write_to(out)?;

    let len = source.len();
    let mut stream = source.open()?;
    let mut buffer = vec![0u8; COPY_BUFFER];
    let mut copied = 0u64;
    while copied < len {
        let want = ((len - copied) as usize).min(COPY_BUFFER);
        let got = read_full(stream.as_mut(), &mut buffer[..want])?;
        if got < want {
            return Err(VaultError::PartialRead {
                expected: len,
                got: copied + got as u64,
            });
        }
        out.write_all(&buffer[..want])?;
        copied += want as u64;
    }
    Ok(HEADER_SIZE as u64 + copied)
}

/// Random-access reader over a stored flat container.
///
/// Logical offset `n` lives at file offset `HEADER_SIZE + n`; reads below
/// the header boundary are never permitted.
pub struct FlatReader {
    file: File,
    len: u64,
    pos: u64,
}

impl FlatReader {
    pub(crate) fn new(file: File, header: &ContainerHeader) -> FlatReader {
        FlatReader {
            file,
            len: crate::sector::sectors_to_bytes(header.capacity),
            pos: 0,
        }
    }

    /// Logical capacity in bytes
    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

impl Read for FlatReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.pos >= self.len {
            return Ok(0);
        }
        let want = buf.len().min((self.len - self.pos) as usize);
        self.file
            .seek(SeekFrom::Start(HEADER_SIZE as u64 + self.pos))?;
        let n = self.file.read(&mut buf[..want])?;
        self.pos += n as u64;
        Ok(n)
    }
}

impl Seek for FlatReader {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        self.pos = resolve_seek(pos, self.pos, self.len)?;
        Ok(self.pos)
    }
}

/// Map a logical [`SeekFrom`] to an absolute position, rejecting negatives
pub(crate) fn resolve_seek(pos: SeekFrom, current: u64, len: u64) -> io::Result<u64> {
    let target = match pos {
        SeekFrom::Start(offset) => Some(offset),
        SeekFrom::Current(delta) => current.checked_add_signed(delta),
        SeekFrom::End(delta) => len.checked_add_signed(delta),
    };
    target.ok_or_else(|| {
        io::Error::new(
            io::ErrorKind::InvalidInput,
            "seek before the start of the container",
        )
    })
}
