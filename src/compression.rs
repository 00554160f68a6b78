//! Per-grain compression
//!
//! Grains are compressed independently so the reader can decompress exactly
//! one grain without touching its neighbours. The method is recorded in the
//! container header and applies to every stored grain in that container.

use crate::error::{Result, VaultError};
use std::fmt;
use std::io::{Read, Write};

/// Compression method for stored grains
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum CompressionMethod {
    /// Grains stored verbatim
    None = 0,
    /// Raw deflate
    Deflate = 1,
    /// Gzip-framed deflate
    Gzip = 2,
    /// Snappy raw block format
    Snappy = 3,
}

impl CompressionMethod {
    /// Parse the on-disk method tag; unknown tags are an error, never a default
    pub fn from_u16(value: u16) -> Result<Self> {
        match value {
            0 => Ok(CompressionMethod::None),
            1 => Ok(CompressionMethod::Deflate),
            2 => Ok(CompressionMethod::Gzip),
            3 => Ok(CompressionMethod::Snappy),
            other => Err(VaultError::UnknownCompression(other)),
        }
    }

    pub fn as_u16(self) -> u16 {
        self as u16
    }
}

impl fmt::Display for CompressionMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CompressionMethod::None => "none",
            CompressionMethod::Deflate => "deflate",
            CompressionMethod::Gzip => "gzip",
            CompressionMethod::Snappy => "snappy",
        };
        f.write_str(name)
    }
}

/// Compress one grain
pub fn compress(data: &[u8], method: CompressionMethod) -> Result<Vec<u8>> {
    match method {
        CompressionMethod::None => Ok(data.to_vec()),
        CompressionMethod::Deflate => {
            let mut encoder =
                flate2::write::DeflateEncoder::new(Vec::new(), flate2::Compression::default());
            encoder.write_all(data)?;
            Ok(encoder.finish()?)
        }
        CompressionMethod::Gzip => {
            let mut encoder =
                flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::default());
            encoder.write_all(data)?;
            Ok(encoder.finish()?)
        }
        CompressionMethod::Snappy => snap::raw::Encoder::new()
            .compress_vec(data)
            .map_err(|e| VaultError::Corrupt(format!("snappy compression failed: {e}"))),
    }
}

/// Decompress one grain, checking it expands to exactly `expected_len` bytes
pub fn decompress(data: &[u8], method: CompressionMethod, expected_len: usize) -> Result<Vec<u8>> {
    let out = match method {
        CompressionMethod::None => data.to_vec(),
        CompressionMethod::Deflate => {
            let mut decoder = flate2::read::DeflateDecoder::new(data);
            let mut out = Vec::with_capacity(expected_len);
            decoder.read_to_end(&mut out)?;
            out
        }
        CompressionMethod::Gzip => {
            let mut decoder = flate2::read::GzDecoder::new(data);
            let mut out = Vec::with_capacity(expected_len);
            decoder.read_to_end(&mut out)?;
            out
        }
        CompressionMethod::Snappy => snap::raw::Decoder::new()
            .decompress_vec(data)
            .map_err(|e| VaultError::Corrupt(format!("snappy decompression failed: {e}")))?,
    };
    if out.len() != expected_len {
        return Err(VaultError::Corrupt(format!(
            "grain decompressed to {} bytes, expected {}",
            out.len(),
            expected_len
        )));
    }
    Ok(out)
}
