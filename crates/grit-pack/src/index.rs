//! Legacy (v1) pack index reading and lookup.
//!
//! The sidecar maps object ids to pack offsets. Format:
//!
//! ```text
//! Fanout:  256 × 4-byte big-endian cumulative counts by first id byte
//! Records: N × (4-byte offset, 20-byte id), sorted by id
//! Trailer: 20-byte pack checksum | 20-byte index checksum
//! ```
//!
//! The file size is fully determined by the object count; any deviation is
//! corruption. The v2 format (with its CRC table and 64-bit offsets) is
//! recognized by signature and rejected.

use std::path::{Path, PathBuf};

use grit_hash::ObjectId;
use memmap2::Mmap;

use crate::{PackError, IDX_V2_SIGNATURE};

const FANOUT_LEN: usize = 256 * 4;
const RECORD_LEN: usize = 4 + 20;
const TRAILER_LEN: usize = 40;

/// A memory-mapped v1 pack index.
#[derive(Debug)]
pub struct PackIndex {
    data: Mmap,
    num_objects: u32,
    idx_path: PathBuf,
}

impl PackIndex {
    /// Open a pack index file.
    pub fn open(idx_path: impl AsRef<Path>) -> Result<Self, PackError> {
        let idx_path = idx_path.as_ref().to_path_buf();
        let file = std::fs::File::open(&idx_path)?;
        let data = unsafe { Mmap::map(&file)? };

        if data.len() >= 4 && data[0..4] == IDX_V2_SIGNATURE {
            return Err(PackError::CorruptIndex(
                "pack index version 2 is not supported".into(),
            ));
        }
        if data.len() < FANOUT_LEN + TRAILER_LEN {
            return Err(PackError::CorruptIndex("file too small".into()));
        }

        let num_objects = read_u32(&data[FANOUT_LEN - 4..]);
        let expected = FANOUT_LEN + RECORD_LEN * num_objects as usize + TRAILER_LEN;
        if data.len() != expected {
            return Err(PackError::CorruptIndex(format!(
                "incorrect file size: {} bytes, expected {expected}",
                data.len()
            )));
        }

        Ok(Self {
            data,
            num_objects,
            idx_path,
        })
    }

    /// Look up an id, returning its pack offset.
    pub fn lookup(&self, id: &ObjectId) -> Option<u64> {
        let (mut low, mut high) = self.fanout_range(id.first_byte());
        let target = id.as_bytes();
        while low < high {
            let mid = low + (high - low) / 2;
            match self.oid_bytes_at(mid).cmp(target) {
                std::cmp::Ordering::Less => low = mid + 1,
                std::cmp::Ordering::Greater => high = mid,
                std::cmp::Ordering::Equal => return Some(self.offset_at(mid as u32)),
            }
        }
        None
    }

    /// The id at a sorted record position.
    pub fn oid_at(&self, index: u32) -> ObjectId {
        let mut raw = [0u8; 20];
        raw.copy_from_slice(self.oid_bytes_at(index as usize));
        ObjectId::from_raw(raw)
    }

    /// The pack offset at a sorted record position.
    pub fn offset_at(&self, index: u32) -> u64 {
        let pos = FANOUT_LEN + RECORD_LEN * index as usize;
        read_u32(&self.data[pos..]) as u64
    }

    /// Total number of objects in this index.
    pub fn num_objects(&self) -> u32 {
        self.num_objects
    }

    /// Path to the index file.
    pub fn path(&self) -> &Path {
        &self.idx_path
    }

    /// The pack checksum stored in the trailer.
    pub fn pack_checksum(&self) -> ObjectId {
        let start = self.data.len() - TRAILER_LEN;
        let mut raw = [0u8; 20];
        raw.copy_from_slice(&self.data[start..start + 20]);
        ObjectId::from_raw(raw)
    }

    /// The index's own trailing checksum.
    pub fn index_checksum(&self) -> ObjectId {
        let start = self.data.len() - 20;
        let mut raw = [0u8; 20];
        raw.copy_from_slice(&self.data[start..]);
        ObjectId::from_raw(raw)
    }

    /// Iterate all (id, offset) pairs in id order.
    pub fn iter(&self) -> PackIndexIter<'_> {
        PackIndexIter {
            index: self,
            pos: 0,
        }
    }

    /// The sorted-record window `[start, end)` for a first id byte.
    fn fanout_range(&self, first_byte: u8) -> (usize, usize) {
        let end = self.fanout_entry(first_byte) as usize;
        let start = if first_byte == 0 {
            0
        } else {
            self.fanout_entry(first_byte - 1) as usize
        };
        (start, end)
    }

    fn fanout_entry(&self, index: u8) -> u32 {
        read_u32(&self.data[index as usize * 4..])
    }

    fn oid_bytes_at(&self, index: usize) -> &[u8] {
        let start = FANOUT_LEN + RECORD_LEN * index + 4;
        &self.data[start..start + 20]
    }
}

/// Iterator over (id, offset) pairs in a pack index.
pub struct PackIndexIter<'a> {
    index: &'a PackIndex,
    pos: u32,
}

impl Iterator for PackIndexIter<'_> {
    type Item = (ObjectId, u64);

    fn next(&mut self) -> Option<Self::Item> {
        if self.pos >= self.index.num_objects {
            return None;
        }
        let item = (self.index.oid_at(self.pos), self.index.offset_at(self.pos));
        self.pos += 1;
        Some(item)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = (self.index.num_objects - self.pos) as usize;
        (remaining, Some(remaining))
    }
}

impl ExactSizeIterator for PackIndexIter<'_> {}

fn read_u32(data: &[u8]) -> u32 {
    u32::from_be_bytes([data[0], data[1], data[2], data[3]])
}
