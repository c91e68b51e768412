use std::fmt;
use std::str::FromStr;

use crate::hex::{hex_decode, hex_to_string};
use crate::HashError;

/// Number of raw bytes in an object id.
pub const RAW_LEN: usize = 20;

/// A git object identifier — the SHA-1 of an object's content.
///
/// The id is an opaque 20-byte value. Ordering is unsigned lexicographic on
/// the raw bytes, which matches the sort order used by pack indexes. The
/// all-zero id is a sentinel meaning "no object" and never names real
/// content.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectId([u8; RAW_LEN]);

impl ObjectId {
    /// The zero id (all zeros), used to mean "absent".
    pub const ZERO: Self = Self([0u8; RAW_LEN]);

    /// Wrap a raw 20-byte digest.
    pub const fn from_raw(bytes: [u8; RAW_LEN]) -> Self {
        Self(bytes)
    }

    /// Create an id from a byte slice, which must be exactly 20 bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, HashError> {
        if bytes.len() != RAW_LEN {
            return Err(HashError::InvalidHashLength {
                expected: RAW_LEN,
                actual: bytes.len(),
            });
        }
        let mut raw = [0u8; RAW_LEN];
        raw.copy_from_slice(bytes);
        Ok(Self(raw))
    }

    /// Parse an id from its 40-character hex form.
    pub fn from_hex(hex: &str) -> Result<Self, HashError> {
        let mut raw = [0u8; RAW_LEN];
        hex_decode(hex, &mut raw)?;
        Ok(Self(raw))
    }

    /// The raw digest bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Whether this is the zero ("absent") id.
    pub fn is_zero(&self) -> bool {
        self.0.iter().all(|&b| b == 0)
    }

    /// The lowercase 40-character hex form.
    pub fn to_hex(&self) -> String {
        hex_to_string(&self.0)
    }

    /// The first byte of the id, used for fan-out table indexing.
    pub fn first_byte(&self) -> u8 {
        self.0[0]
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ObjectId({})", &self.to_hex()[..8])
    }
}

impl FromStr for ObjectId {
    type Err = HashError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_hex(s)
    }
}
