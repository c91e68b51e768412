//! Streaming SHA-1 computation.

use digest::Digest;

use crate::{HashError, ObjectId};

/// Incremental SHA-1 hasher with collision detection.
///
/// Data can be fed with [`update`](Hasher::update) or through the
/// [`std::io::Write`] implementation, then finalised into an [`ObjectId`].
/// The index writer and blob writer both stream their output through one of
/// these so the trailing digest never requires a second pass.
pub struct Hasher {
    inner: Box<sha1_checked::Sha1>,
}

impl Hasher {
    /// Create a fresh hasher.
    pub fn new() -> Self {
        Self {
            inner: Box::new(sha1_checked::Sha1::new()),
        }
    }

    /// Feed data into the hasher.
    pub fn update(&mut self, data: &[u8]) {
        self.inner.update(data);
    }

    /// Finalize and return the id.
    ///
    /// Fails if SHA-1 collision detection fires.
    pub fn finalize(self) -> Result<ObjectId, HashError> {
        let result = self.inner.try_finalize();
        if result.has_collision() {
            return Err(HashError::Collision);
        }
        let mut raw = [0u8; 20];
        raw.copy_from_slice(result.hash().as_slice());
        Ok(ObjectId::from_raw(raw))
    }

    /// Hash a buffer in one call.
    pub fn digest(data: &[u8]) -> Result<ObjectId, HashError> {
        let mut h = Self::new();
        h.update(data);
        h.finalize()
    }

    /// Hash a git object: `"{type} {len}\0{content}"`.
    pub fn hash_object(kind: &str, data: &[u8]) -> Result<ObjectId, HashError> {
        let mut h = Self::new();
        h.update(kind.as_bytes());
        h.update(b" ");
        h.update(data.len().to_string().as_bytes());
        h.update(b"\0");
        h.update(data);
        h.finalize()
    }
}

impl Default for Hasher {
    fn default() -> Self {
        Self::new()
    }
}

impl std::io::Write for Hasher {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.update(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}
