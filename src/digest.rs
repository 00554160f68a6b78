//! Per-grain content digests
//!
//! A grain digest is the ordered sequence of content hashes for a
//! container, one per grain, in grain-index order. It backs post-write
//! verification and the parent-diff optimization: a re-acquisition may skip
//! storing any grain whose hash matches the parent's at the same index.
//!
//! Persisted form: one lowercase hex hash per line. The algorithm is
//! recovered from the hash width on load.

use crate::error::{Result, VaultError};
use md5::Md5;
use sha1::Sha1;
use sha2::{Digest, Sha256};
use std::io::{BufRead, BufReader, Read, Write};

/// Grain hash algorithm
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HashAlgorithm {
    /// 128-bit
    Md5,
    /// 160-bit, the default
    Sha1,
    /// 256-bit
    Sha256,
}

impl Default for HashAlgorithm {
    fn default() -> Self {
        HashAlgorithm::Sha1
    }
}

impl HashAlgorithm {
    /// Hash width in bytes
    pub fn digest_len(self) -> usize {
        match self {
            HashAlgorithm::Md5 => 16,
            HashAlgorithm::Sha1 => 20,
            HashAlgorithm::Sha256 => 32,
        }
    }

    /// Recover the algorithm from a persisted hash width
    pub fn from_digest_len(len: usize) -> Option<Self> {
        match len {
            16 => Some(HashAlgorithm::Md5),
            20 => Some(HashAlgorithm::Sha1),
            32 => Some(HashAlgorithm::Sha256),
            _ => None,
        }
    }

    /// Hash one grain
    pub fn hash(self, data: &[u8]) -> Vec<u8> {
        match self {
            HashAlgorithm::Md5 => Md5::digest(data).to_vec(),
            HashAlgorithm::Sha1 => Sha1::digest(data).to_vec(),
            HashAlgorithm::Sha256 => Sha256::digest(data).to_vec(),
        }
    }
}

/// Ordered per-grain hash sequence for one container
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GrainDigest {
    algorithm: HashAlgorithm,
    hashes: Vec<Vec<u8>>,
}

impl GrainDigest {
    /// Digest a logical byte stream grain by grain.
    ///
    /// Reads `len` bytes from `reader` in `grain_bytes` chunks and hashes
    /// each chunk independently. A final short chunk (possible only for
    /// flat containers, whose capacity need not be grain-aligned) is hashed
    /// as-is. A source that ends early is a [`VaultError::PartialRead`].
    pub fn compute<R: Read + ?Sized>(
        reader: &mut R,
        len: u64,
        grain_bytes: u64,
        algorithm: HashAlgorithm,
    ) -> Result<Self> {
        let mut hashes = Vec::new();
        let mut buffer = vec![0u8; grain_bytes as usize];
        let mut remaining = len;
        while remaining > 0 {
            let want = remaining.min(grain_bytes) as usize;
            let got = read_full(reader, &mut buffer[..want])?;
            if got < want {
                return Err(VaultError::PartialRead {
                    expected: len,
                    got: len - remaining + got as u64,
                });
            }
            hashes.push(algorithm.hash(&buffer[..want]));
            remaining -= want as u64;
        }
        Ok(GrainDigest { algorithm, hashes })
    }

    pub fn algorithm(&self) -> HashAlgorithm {
        self.algorithm
    }

    pub fn len(&self) -> usize {
        self.hashes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hashes.is_empty()
    }

    /// Hash at a grain index
    pub fn get(&self, grain_index: usize) -> Option<&[u8]> {
        self.hashes.get(grain_index).map(Vec::as_slice)
    }

    /// Whether the hash at `grain_index` equals `hash`
    pub fn matches(&self, grain_index: usize, hash: &[u8]) -> bool {
        self.get(grain_index) == Some(hash)
    }

    /// Persist as one hex hash per line
    pub fn write_to<W: Write + ?Sized>(&self, writer: &mut W) -> Result<()> {
        for hash in &self.hashes {
            writeln!(writer, "{}", hex::encode(hash))?;
        }
        Ok(())
    }

    /// Load a persisted digest, recovering the algorithm from hash width
    pub fn read_from<R: Read>(reader: R) -> Result<Self> {
        let mut hashes = Vec::new();
        let mut algorithm = None;
        for (line_no, line) in BufReader::new(reader).lines().enumerate() {
            let line = line?;
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            let hash = hex::decode(line)
                .map_err(|_| VaultError::DigestParse(format!("bad hex on line {}", line_no + 1)))?;
            let algo = HashAlgorithm::from_digest_len(hash.len()).ok_or_else(|| {
                VaultError::DigestParse(format!(
                    "unrecognized hash width {} on line {}",
                    hash.len(),
                    line_no + 1
                ))
            })?;
            match algorithm {
                None => algorithm = Some(algo),
                Some(existing) if existing != algo => {
                    return Err(VaultError::DigestParse(format!(
                        "mixed hash widths (line {})",
                        line_no + 1
                    )));
                }
                Some(_) => {}
            }
            hashes.push(hash);
        }
        let algorithm =
            algorithm.ok_or_else(|| VaultError::DigestParse("empty digest".to_string()))?;
        Ok(GrainDigest { algorithm, hashes })
    }
}

/// Read until `buf` is full or the stream ends; returns bytes read
pub(crate) fn read_full<R: Read + ?Sized>(reader: &mut R, buf: &mut [u8]) -> Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        let n = reader.read(&mut buf[filled..])?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    Ok(filled)
}
