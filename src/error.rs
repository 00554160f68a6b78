use thiserror::Error;
use uuid::Uuid;

#[derive(Error, Debug)]
pub enum VaultError {
    #[error("invalid magic number in container header")]
    BadMagic,

    #[error("unsupported container format version: {0}")]
    UnsupportedVersion(u32),

    #[error("truncated container header")]
    TruncatedHeader,

    #[error("unknown container type tag: {0}")]
    UnknownContainerType(u16),

    #[error("unknown compression method tag: {0}")]
    UnknownCompression(u16),

    #[error("corrupt container: {0}")]
    Corrupt(String),

    #[error("source length {0} is not a whole number of sectors")]
    NotSectorAligned(u64),

    #[error("source length {len} is not a whole multiple of the grain size ({grain} sectors)")]
    NotGrainAligned { len: u64, grain: u64 },

    #[error("grain size must be a power-of-two sector count, got {0}")]
    GrainSizeNotPowerOfTwo(u64),

    #[error("invalid disk identity: {0}")]
    InvalidDiskId(String),

    #[error("invalid attribute key: {0}")]
    InvalidAttributeKey(String),

    #[error("invalid session text: {0}")]
    SessionParse(String),

    #[error("invalid grain digest: {0}")]
    DigestParse(String),

    #[error("invalid file hash record: {0}")]
    FileHashParse(String),

    #[error("disk already stored: {0}")]
    AlreadyExists(String),

    #[error("unknown descriptor: {0}")]
    UnknownDescriptor(String),

    #[error("short read: expected {expected} bytes, got {got}")]
    PartialRead { expected: u64, got: u64 },

    #[error("parent container {0} cannot be resolved")]
    UnresolvedParent(Uuid),

    #[error("container is not stored; random access requires a stored container")]
    NotStored,

    #[error("container is already stored")]
    AlreadyStored,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, VaultError>;
