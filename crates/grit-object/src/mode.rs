//! File modes for tree entries and index entries.

use bstr::BString;

use crate::ObjectError;

/// The file modes git stores in tree objects and the index.
///
/// The wire form is an ASCII octal integer without leading zeros. Only these
/// five values are valid; anything else in a tree object is corruption.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FileMode {
    /// Regular file (100644).
    Regular,
    /// Executable file (100755).
    Executable,
    /// Symbolic link (120000).
    Symlink,
    /// Subdirectory (040000).
    Tree,
    /// Deleted or nonexistent entry (0).
    Missing,
}

impl FileMode {
    /// The raw mode bits.
    pub fn bits(&self) -> u32 {
        match self {
            Self::Regular => 0o100644,
            Self::Executable => 0o100755,
            Self::Symlink => 0o120000,
            Self::Tree => 0o40000,
            Self::Missing => 0,
        }
    }

    /// Create from exact raw bits; unknown values are `None`.
    pub fn from_bits(raw: u32) -> Option<Self> {
        match raw {
            0o100644 => Some(Self::Regular),
            0o100755 => Some(Self::Executable),
            0o120000 => Some(Self::Symlink),
            0o40000 => Some(Self::Tree),
            0 => Some(Self::Missing),
            _ => None,
        }
    }

    /// Whether raw mode bits are of this mode's kind.
    ///
    /// Unlike an exact equality test this extracts the object kind from the
    /// high bits and, for files, only the executable bits of the permission
    /// triple. The index stores full stat modes whose remaining permission
    /// bits carry no meaning for git.
    pub fn matches(&self, bits: u32) -> bool {
        match self {
            Self::Regular => bits & 0o170000 == 0o100000 && bits & 0o111 == 0,
            Self::Executable => bits & 0o170000 == 0o100000 && bits & 0o111 != 0,
            Self::Symlink => bits & 0o170000 == 0o120000,
            Self::Tree => bits & 0o170000 == 0o40000,
            Self::Missing => bits == 0,
        }
    }

    /// Serialize to octal ASCII without leading zeros (`b"40000"` for trees).
    pub fn as_octal(&self) -> BString {
        BString::from(format!("{:o}", self.bits()))
    }

    /// Is this a tree (directory)?
    pub fn is_tree(&self) -> bool {
        matches!(self, Self::Tree)
    }

    /// Is this a file blob (regular or executable)?
    pub fn is_file(&self) -> bool {
        matches!(self, Self::Regular | Self::Executable)
    }

    /// Is this a symlink?
    pub fn is_symlink(&self) -> bool {
        matches!(self, Self::Symlink)
    }
}

/// Parse an octal ASCII string to a raw mode value.
pub(crate) fn parse_octal(s: &[u8]) -> Result<u32, ObjectError> {
    if s.is_empty() {
        return Err(ObjectError::InvalidHeader("empty file mode".into()));
    }
    let mut val: u32 = 0;
    for &b in s {
        if !(b'0'..=b'7').contains(&b) {
            return Err(ObjectError::InvalidHeader(format!(
                "invalid octal digit in mode: {:?}",
                b as char
            )));
        }
        val = val
            .checked_mul(8)
            .and_then(|v| v.checked_add(u32::from(b - b'0')))
            .ok_or_else(|| ObjectError::InvalidHeader("file mode overflows".into()))?;
    }
    Ok(val)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bits_roundtrip() {
        for mode in [
            FileMode::Regular,
            FileMode::Executable,
            FileMode::Symlink,
            FileMode::Tree,
            FileMode::Missing,
        ] {
            assert_eq!(FileMode::from_bits(mode.bits()), Some(mode));
        }
    }

    #[test]
    fn from_bits_unknown() {
        assert_eq!(FileMode::from_bits(0o160000), None); // gitlink
        assert_eq!(FileMode::from_bits(0o100600), None);
    }

    #[test]
    fn octal_form_has_no_leading_zero() {
        assert_eq!(FileMode::Tree.as_octal(), "40000");
        assert_eq!(FileMode::Regular.as_octal(), "100644");
    }

    #[test]
    fn matches_ignores_permission_noise() {
        assert!(FileMode::Regular.matches(0o100644));
        assert!(FileMode::Regular.matches(0o100600));
        assert!(!FileMode::Regular.matches(0o100755));
        assert!(FileMode::Executable.matches(0o100755));
        assert!(FileMode::Executable.matches(0o100700));
        assert!(FileMode::Tree.matches(0o40000));
        assert!(FileMode::Symlink.matches(0o120000));
        assert!(FileMode::Missing.matches(0));
        assert!(!FileMode::Missing.matches(0o100644));
    }

    #[test]
    fn parse_octal_values() {
        assert_eq!(parse_octal(b"100644").unwrap(), 0o100644);
        assert_eq!(parse_octal(b"40000").unwrap(), 0o40000);
        assert!(parse_octal(b"").is_err());
        assert!(parse_octal(b"10o644").is_err());
        assert!(parse_octal(b"999").is_err());
    }

    #[test]
    fn predicates() {
        assert!(FileMode::Tree.is_tree());
        assert!(FileMode::Regular.is_file());
        assert!(FileMode::Executable.is_file());
        assert!(!FileMode::Symlink.is_file());
        assert!(FileMode::Symlink.is_symlink());
    }
}
