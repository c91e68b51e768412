//! Index file reading (format version 2).

use bstr::BString;
use grit_hash::ObjectId;

use crate::entry::IndexEntry;
use crate::{IndexError, Stage, INDEX_SIGNATURE};

/// Offset of the path bytes inside an on-disk entry: ctime(8) + mtime(8) +
/// dev(4) + ino(4) + mode(4) + uid(4) + gid(4) + size(4) + sha(20) +
/// flags(2).
const ENTRY_FIXED_LEN: usize = 62;

/// Total on-disk size of an entry, NUL-padded to the next 8-byte boundary
/// past the name.
pub(crate) fn entry_size(name_len: usize) -> usize {
    (ENTRY_FIXED_LEN + name_len + 8) & !7
}

/// Parse a whole index file into its entries.
///
/// The trailing content digest is not verified; a corrupt tail surfaces as
/// an out-of-bounds record instead. Extension data after the entries (such
/// as the tree cache) is ignored and will be dropped on the next write.
pub(crate) fn parse_index(data: &[u8]) -> Result<Vec<IndexEntry>, IndexError> {
    if data.len() < 12 {
        return Err(IndexError::Corrupt("index file too short".into()));
    }
    if &data[0..4] != INDEX_SIGNATURE {
        return Err(IndexError::Corrupt(format!(
            "bad index signature: {:02x?}",
            &data[0..4]
        )));
    }
    let version = read_u32(&data[4..]);
    if version != 2 {
        return Err(IndexError::Corrupt(format!(
            "unknown index version (or corrupt index): {version}"
        )));
    }
    let entry_count = read_u32(&data[8..]) as usize;
    let content_end = data.len().saturating_sub(20);

    let mut entries = Vec::with_capacity(entry_count.min(1 << 16));
    let mut cursor = 12;
    for _ in 0..entry_count {
        let (entry, next) = parse_entry(data, cursor, content_end)?;
        entries.push(entry);
        cursor = next;
    }
    Ok(entries)
}

fn parse_entry(
    data: &[u8],
    start: usize,
    content_end: usize,
) -> Result<(IndexEntry, usize), IndexError> {
    if start + ENTRY_FIXED_LEN > content_end {
        return Err(IndexError::Corrupt(format!(
            "truncated index entry at offset {start}"
        )));
    }

    let oid = ObjectId::from_bytes(&data[start + 40..start + 60])
        .map_err(|_| IndexError::Corrupt(format!("bad object id at offset {start}")))?;
    let flags = read_u16(&data[start + 60..]);
    let name_len = (flags & 0x0FFF) as usize;

    let name_start = start + ENTRY_FIXED_LEN;
    if name_start + name_len > content_end {
        return Err(IndexError::Corrupt(format!(
            "entry name runs past end of index at offset {start}"
        )));
    }
    let path = BString::from(&data[name_start..name_start + name_len]);

    let entry = IndexEntry {
        path,
        oid,
        mode_bits: read_u32(&data[start + 24..]),
        ctime_secs: read_u32(&data[start..]),
        ctime_nsecs: read_u32(&data[start + 4..]),
        mtime_secs: read_u32(&data[start + 8..]),
        mtime_nsecs: read_u32(&data[start + 12..]),
        dev: read_u32(&data[start + 16..]),
        ino: read_u32(&data[start + 20..]),
        uid: read_u32(&data[start + 28..]),
        gid: read_u32(&data[start + 32..]),
        size: read_u32(&data[start + 36..]),
        stage: Stage::from_bits((flags >> 12) as u8),
        assume_valid: flags & 0x8000 != 0,
        update_needed: flags & 0x4000 != 0,
    };

    Ok((entry, start + entry_size(name_len)))
}

fn read_u32(data: &[u8]) -> u32 {
    u32::from_be_bytes([data[0], data[1], data[2], data[3]])
}

fn read_u16(data: &[u8]) -> u16 {
    u16::from_be_bytes([data[0], data[1]])
}
