//! Object model for the grit object database.
//!
//! This crate provides the object type tags, the loose-object header codec,
//! the [`FileMode`] bit patterns, and the mutable [`Tree`] directory model
//! with its git-compatible binary codec and ordering rules.

pub mod header;
mod mode;
mod tree;
mod visit;

pub use mode::FileMode;
pub use tree::{EntryRef, NoObjects, Tree, TreeReader};
pub use visit::{TreeVisitor, VisitFlags};

use bstr::BString;
use grit_hash::{HashError, ObjectId};

/// Errors produced by object parsing and tree manipulation.
#[derive(Debug, thiserror::Error)]
pub enum ObjectError {
    #[error("invalid object type: {0}")]
    InvalidType(BString),

    #[error("invalid object header: {0}")]
    InvalidHeader(String),

    #[error("corrupt tree at offset {offset}: {reason}")]
    CorruptTree { offset: usize, reason: String },

    #[error("invalid entry name: {0:?}")]
    InvalidEntryName(BString),

    #[error("entry already exists: {0}")]
    EntryExists(BString),

    #[error("missing object: {0}")]
    MissingObject(ObjectId),

    #[error("object {id} is a {actual}, expected {expected}")]
    TypeMismatch {
        id: ObjectId,
        expected: ObjectType,
        actual: ObjectType,
    },

    #[error("entry {0} has no object id")]
    MissingEntryId(BString),

    #[error("cannot unload a modified tree")]
    UnloadModified,

    #[error("cannot encode an unloaded tree")]
    EncodeUnloaded,

    #[error("entry is not a tree")]
    NotATree,

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Hash(#[from] HashError),
}

/// The four kinds of git objects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ObjectType {
    Blob,
    Tree,
    Commit,
    Tag,
}

impl ObjectType {
    /// Parse from the ASCII tag used in object headers.
    pub fn from_bytes(s: &[u8]) -> Result<Self, ObjectError> {
        match s {
            b"blob" => Ok(Self::Blob),
            b"tree" => Ok(Self::Tree),
            b"commit" => Ok(Self::Commit),
            b"tag" => Ok(Self::Tag),
            _ => Err(ObjectError::InvalidType(BString::from(s))),
        }
    }

    /// The canonical ASCII tag.
    pub fn as_bytes(&self) -> &'static [u8] {
        match self {
            Self::Blob => b"blob",
            Self::Tree => b"tree",
            Self::Commit => b"commit",
            Self::Tag => b"tag",
        }
    }

    /// The tag as a string.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Blob => "blob",
            Self::Tree => "tree",
            Self::Commit => "commit",
            Self::Tag => "tag",
        }
    }
}

impl std::fmt::Display for ObjectType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ObjectType {
    type Err = ObjectError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_bytes(s.as_bytes())
    }
}
