//! Packfile reading.
//!
//! A pack is a concatenation of zlib-deflated objects behind a 12-byte
//! header, addressed either sequentially or — through the legacy pack-index
//! sidecar — by object id. Delta entries are described, not reconstructed:
//! a REF_DELTA exposes its base id and leaves resolution to the caller.

pub mod entry;
pub mod index;
pub mod pack;

use grit_hash::ObjectId;
use grit_object::ObjectType;

pub use entry::{parse_entry_header, PackedEntry};
pub use index::PackIndex;
pub use pack::PackFile;

/// Errors produced by pack operations.
#[derive(Debug, thiserror::Error)]
pub enum PackError {
    #[error("corrupt pack: {0}")]
    CorruptPack(String),

    #[error("corrupt pack index: {0}")]
    CorruptIndex(String),

    #[error("unsupported pack version: {0}")]
    UnsupportedVersion(u32),

    #[error("unsupported pack entry type {type_code} at offset {offset}")]
    UnsupportedEntryType { type_code: u8, offset: u64 },

    #[error("corrupt pack entry at offset {0}")]
    CorruptEntry(u64),

    #[error("inflated size mismatch at offset {offset}: expected {expected}, got {actual}")]
    SizeMismatch {
        offset: u64,
        expected: u64,
        actual: u64,
    },

    #[error(transparent)]
    Hash(#[from] grit_hash::HashError),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Kind of a packed entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PackedEntryKind {
    Commit,
    Tree,
    Blob,
    Tag,
    /// Delta whose base object is named by id. The payload is the delta
    /// script; applying it against the base is the caller's job.
    RefDelta { base: ObjectId },
}

impl PackedEntryKind {
    /// The object type for non-delta entries.
    pub fn object_type(&self) -> Option<ObjectType> {
        match self {
            Self::Commit => Some(ObjectType::Commit),
            Self::Tree => Some(ObjectType::Tree),
            Self::Blob => Some(ObjectType::Blob),
            Self::Tag => Some(ObjectType::Tag),
            Self::RefDelta { .. } => None,
        }
    }

    /// The 3-bit type code used in entry headers.
    pub fn type_code(&self) -> u8 {
        match self {
            Self::Commit => 1,
            Self::Tree => 2,
            Self::Blob => 3,
            Self::Tag => 4,
            Self::RefDelta { .. } => 7,
        }
    }
}

/// Pack format constants.
pub const PACK_SIGNATURE: &[u8; 4] = b"PACK";
pub const PACK_HEADER_SIZE: usize = 12;

/// Signature of the v2 pack index, which this reader rejects.
pub const IDX_V2_SIGNATURE: [u8; 4] = [0xff, 0x74, 0x4f, 0x63];
