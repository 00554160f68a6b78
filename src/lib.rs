//! DiskVault
//!
//! A managed-disk container format and filesystem-backed store for
//! acquiring and archiving whole-disk images for forensic use.
//!
//! ## Features
//!
//! - **Fixed 512-byte sectors**: every on-disk offset and length is
//!   sector-denominated, and every container is a whole number of sectors
//! - **Two container variants**: flat (header + verbatim copy) and
//!   stream-optimized (sparse, grain-addressed, per-grain compression)
//! - **Single-pass writing**: a stream-optimized container is written
//!   forward once from a live source and read back randomly via its
//!   grain directory / grain table index
//! - **Differential captures**: grains matching the parent's per-grain
//!   digest are elided and delegated at read time
//! - **Crash-safe store**: two-phase put (temp write, then rename + index
//!   update under the store lock) keeps visible state atomic
//! - **Sessions**: dated, indexed acquisition identifiers, issued
//!   monotonically per store
//!
//! ## Container file layout
//!
//! ```text
//! ┌────────────────────────────────────────────┐
//! │ Sector 0: header (512 B)                   │
//! │  - magic "MDSK", version, type tag         │
//! │  - uuid, parent uuid, disk id, session     │
//! │  - capacity, grain geometry, offsets       │
//! ├────────────────────────────────────────────┤
//! │ Flat: source bytes, verbatim               │
//! │ Stream-optimized: compressed grains,       │
//! │  grain tables, grain directory, footer,    │
//! │  end-of-stream marker (all sector-aligned) │
//! └────────────────────────────────────────────┘
//! ```
//!
//! ## Example
//!
//! ```rust,no_run
//! use diskvault::{BufferDisk, CompressionMethod, DiskId, FsStore, ManagedDisk};
//!
//! # fn main() -> diskvault::Result<()> {
//! let store = FsStore::open("/var/lib/diskvault")?;
//! let session = store.new_session()?;
//!
//! let source = BufferDisk::new(DiskId::new("sda")?, vec![0u8; 1 << 20]);
//! let disk = ManagedDisk::stream_optimized(
//!     Box::new(source),
//!     session,
//!     128,
//!     CompressionMethod::Deflate,
//! )?;
//!
//! let descriptor = store.put(disk)?;
//! let digest = store.digest(&descriptor)?;
//! println!("{} grains digested", digest.len());
//! # Ok(())
//! # }
//! ```

pub mod compression;
pub mod container;
pub mod descriptor;
pub mod digest;
pub mod error;
pub mod filehash;
pub mod flat;
pub mod header;
pub mod sector;
pub mod session;
pub mod store;
pub mod stream;
pub mod unmanaged;

// Re-export commonly used types
pub use compression::CompressionMethod;
pub use container::{ContainerInfo, DiskReader, ManagedDisk};
pub use descriptor::{DiskDescriptor, DiskId};
pub use digest::{GrainDigest, HashAlgorithm};
pub use error::{Result, VaultError};
pub use flat::FlatReader;
pub use header::{ContainerHeader, ContainerType, HEADER_SIZE, MAGIC, VERSION as FORMAT_VERSION};
pub use sector::SECTOR_SIZE;
pub use session::Session;
pub use store::{FsStore, Store};
pub use stream::{StreamReader, DEFAULT_GRAIN_SECTORS, GRAIN_TABLE_ENTRIES};
pub use unmanaged::{BufferDisk, FileDisk, UnmanagedDisk};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
