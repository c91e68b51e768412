//! PackFile: reading `.pack` files with their `.idx` sidecar.

use std::io::Read;
use std::path::{Path, PathBuf};

use flate2::bufread::ZlibDecoder;
use grit_hash::ObjectId;
use memmap2::Mmap;
use tracing::debug;

use crate::entry::{parse_entry_header, PackedEntry};
use crate::index::PackIndex;
use crate::{PackError, PACK_HEADER_SIZE, PACK_SIGNATURE};

/// A memory-mapped packfile together with its index.
///
/// All access goes through `&self`; the map never moves, so random access
/// and iteration may be freely interleaved.
#[derive(Debug)]
pub struct PackFile {
    data: Mmap,
    index: PackIndex,
    pack_path: PathBuf,
    version: u32,
    num_objects: u32,
}

impl PackFile {
    /// Open a pack file and the `.idx` sidecar derived from its name.
    ///
    /// The pack must be version 2 or 3 and the sidecar a legacy v1 index
    /// whose object count agrees with the pack header.
    pub fn open(pack_path: impl AsRef<Path>) -> Result<Self, PackError> {
        let pack_path = pack_path.as_ref().to_path_buf();
        let idx_path = pack_path.with_extension("idx");

        let file = std::fs::File::open(&pack_path)?;
        let data = unsafe { Mmap::map(&file)? };

        if data.len() < PACK_HEADER_SIZE + 20 {
            return Err(PackError::CorruptPack("file too small".into()));
        }
        if &data[0..4] != PACK_SIGNATURE {
            return Err(PackError::CorruptPack("bad PACK signature".into()));
        }
        let version = read_u32(&data[4..]);
        if version != 2 && version != 3 {
            return Err(PackError::UnsupportedVersion(version));
        }
        let num_objects = read_u32(&data[8..]);

        let index = PackIndex::open(&idx_path)?;
        if index.num_objects() != num_objects {
            return Err(PackError::CorruptIndex(format!(
                "pack has {} objects but index has {}",
                num_objects,
                index.num_objects()
            )));
        }

        debug!(path = %pack_path.display(), version, objects = num_objects, "opened pack");
        Ok(Self {
            data,
            index,
            pack_path,
            version,
            num_objects,
        })
    }

    /// Pack format version (2 or 3).
    pub fn version(&self) -> u32 {
        self.version
    }

    /// Number of objects in this pack.
    pub fn num_objects(&self) -> u32 {
        self.num_objects
    }

    /// The pack index.
    pub fn index(&self) -> &PackIndex {
        &self.index
    }

    /// Path to the `.pack` file.
    pub fn path(&self) -> &Path {
        &self.pack_path
    }

    /// Whether the pack contains the given id.
    pub fn contains(&self, id: &ObjectId) -> bool {
        self.index.lookup(id).is_some()
    }

    /// Describe the object with the given id, with type and inflated size
    /// parsed. `Ok(None)` when the id is not in this pack.
    pub fn get(&self, id: &ObjectId) -> Result<Option<PackedEntry>, PackError> {
        match self.index.lookup(id) {
            Some(offset) => self.entry_at(offset).map(Some),
            None => Ok(None),
        }
    }

    /// Parse the entry header at a known pack offset.
    pub fn entry_at(&self, offset: u64) -> Result<PackedEntry, PackError> {
        let body_end = self.data.len().saturating_sub(20);
        if offset < PACK_HEADER_SIZE as u64 || offset >= body_end as u64 {
            return Err(PackError::CorruptEntry(offset));
        }
        parse_entry_header(&self.data[offset as usize..body_end], offset)
    }

    /// Inflate an entry's payload: object content, or the delta script for
    /// a REF_DELTA.
    pub fn inflate(&self, entry: &PackedEntry) -> Result<Vec<u8>, PackError> {
        let compressed = &self.data[entry.data_offset as usize..];
        let mut decoder = ZlibDecoder::new(compressed);
        let mut payload = Vec::with_capacity(entry.size as usize);
        decoder
            .read_to_end(&mut payload)
            .map_err(|_| PackError::CorruptEntry(entry.offset))?;
        if payload.len() as u64 != entry.size {
            return Err(PackError::SizeMismatch {
                offset: entry.offset,
                expected: entry.size,
                actual: payload.len() as u64,
            });
        }
        Ok(payload)
    }

    /// Iterate all entries in pack order.
    ///
    /// The iterator works without the consumer reading any payloads: each
    /// step drains the previous entry's zlib stream on a scratch buffer to
    /// find where the next header starts. Skipping that step would misparse
    /// compressed tail bytes as a header.
    pub fn entries(&self) -> Entries<'_> {
        Entries {
            pack: self,
            next_offset: PACK_HEADER_SIZE as u64,
            remaining: self.num_objects,
        }
    }

    /// Measure the compressed length of an entry's zlib stream.
    fn compressed_span(&self, entry: &PackedEntry) -> Result<u64, PackError> {
        let compressed = &self.data[entry.data_offset as usize..];
        let mut decoder = ZlibDecoder::new(compressed);
        let mut scratch = [0u8; 1024];
        loop {
            match decoder.read(&mut scratch) {
                Ok(0) => break,
                Ok(_) => {}
                Err(_) => return Err(PackError::CorruptEntry(entry.offset)),
            }
        }
        Ok(decoder.total_in())
    }
}

/// Iterator over the entries of a pack, in file order.
pub struct Entries<'a> {
    pack: &'a PackFile,
    next_offset: u64,
    remaining: u32,
}

impl Iterator for Entries<'_> {
    type Item = Result<PackedEntry, PackError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.remaining == 0 {
            return None;
        }
        self.remaining -= 1;

        let entry = match self.pack.entry_at(self.next_offset) {
            Ok(entry) => entry,
            Err(e) => {
                self.remaining = 0;
                return Some(Err(e));
            }
        };
        match self.pack.compressed_span(&entry) {
            Ok(span) => self.next_offset = entry.data_offset + span,
            Err(e) => {
                self.remaining = 0;
                return Some(Err(e));
            }
        }
        Some(Ok(entry))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.remaining as usize, Some(self.remaining as usize))
    }
}

fn read_u32(data: &[u8]) -> u32 {
    u32::from_be_bytes([data[0], data[1], data[2], data[3]])
}
