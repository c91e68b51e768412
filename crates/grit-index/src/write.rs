//! Index file writing and the tree materialization of staged entries.

use std::fs::{self, File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

use bstr::{BString, ByteSlice};
use grit_hash::hasher::Hasher;
use grit_hash::ObjectId;
use grit_object::{EntryRef, FileMode, NoObjects, Tree};
use grit_repo::Repository;
use tracing::debug;

use crate::entry::IndexEntry;
use crate::read::entry_size;
use crate::{IndexError, Stage, INDEX_SIGNATURE};

/// Guard for the index writer's on-disk protocol.
///
/// Holds `<index>.lock`, created exclusively, for as long as the write is
/// in flight; the body goes to `<index>.tmp` which is renamed over the
/// index on success. Dropping the guard removes the lock it created and any
/// leftover temp file. A lock owned by another writer is never touched:
/// contention fails before a guard exists.
pub(crate) struct IndexLock {
    lock_path: PathBuf,
    tmp_path: PathBuf,
}

impl IndexLock {
    pub(crate) fn acquire(index_path: &Path) -> Result<Self, IndexError> {
        let lock_path = PathBuf::from(format!("{}.lock", index_path.display()));
        let tmp_path = PathBuf::from(format!("{}.tmp", index_path.display()));

        OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&lock_path)
            .map_err(|e| {
                if e.kind() == io::ErrorKind::AlreadyExists {
                    IndexError::IndexInUse {
                        path: lock_path.clone(),
                    }
                } else {
                    IndexError::Io(e)
                }
            })?;

        Ok(Self {
            lock_path,
            tmp_path,
        })
    }

    pub(crate) fn tmp_path(&self) -> &Path {
        &self.tmp_path
    }
}

impl Drop for IndexLock {
    fn drop(&mut self) {
        let _ = fs::remove_file(&self.lock_path);
        if self.tmp_path.exists() {
            let _ = fs::remove_file(&self.tmp_path);
        }
    }
}

/// Write all entries to the index file, atomically replacing it.
///
/// Every emitted byte is fed through a streaming SHA-1 whose digest becomes
/// the file trailer.
pub(crate) fn write_index(entries: &[IndexEntry], index_path: &Path) -> Result<(), IndexError> {
    let lock = IndexLock::acquire(index_path)?;

    let mut hasher = Hasher::new();
    let mut out = BufWriter::new(File::create(lock.tmp_path())?);

    let mut buf = Vec::with_capacity(4096);
    buf.extend_from_slice(INDEX_SIGNATURE);
    buf.extend_from_slice(&2u32.to_be_bytes());
    buf.extend_from_slice(&(entries.len() as u32).to_be_bytes());
    hasher.update(&buf);
    out.write_all(&buf)?;

    for entry in entries {
        buf.clear();
        write_entry(&mut buf, entry);
        hasher.update(&buf);
        out.write_all(&buf)?;
    }

    let digest = hasher.finalize()?;
    out.write_all(digest.as_bytes())?;

    let file = out.into_inner().map_err(|e| IndexError::Io(e.into_error()))?;
    file.sync_all()?;
    drop(file);

    if index_path.exists() {
        fs::remove_file(index_path)?;
    }
    fs::rename(lock.tmp_path(), index_path)?;
    debug!(entries = entries.len(), path = %index_path.display(), "wrote index");

    drop(lock);
    Ok(())
}

/// Serialize one entry in the v2 on-disk layout.
fn write_entry(buf: &mut Vec<u8>, entry: &IndexEntry) {
    let start = buf.len();

    buf.extend_from_slice(&entry.ctime_secs.to_be_bytes());
    buf.extend_from_slice(&entry.ctime_nsecs.to_be_bytes());
    buf.extend_from_slice(&entry.mtime_secs.to_be_bytes());
    buf.extend_from_slice(&entry.mtime_nsecs.to_be_bytes());
    buf.extend_from_slice(&entry.dev.to_be_bytes());
    buf.extend_from_slice(&entry.ino.to_be_bytes());
    buf.extend_from_slice(&entry.mode_bits.to_be_bytes());
    buf.extend_from_slice(&entry.uid.to_be_bytes());
    buf.extend_from_slice(&entry.gid.to_be_bytes());
    buf.extend_from_slice(&entry.size.to_be_bytes());
    buf.extend_from_slice(entry.oid.as_bytes());

    let name_len = entry.path.len().min(0x0FFF);
    let mut flags = name_len as u16;
    flags |= (entry.stage.bits() as u16) << 12;
    if entry.assume_valid {
        flags |= 0x8000;
    }
    if entry.update_needed {
        flags |= 0x4000;
    }
    buf.extend_from_slice(&flags.to_be_bytes());

    buf.extend_from_slice(&entry.path);
    buf.resize(start + entry_size(entry.path.len()), 0);
}

/// Build and store the tree hierarchy described by the staged entries,
/// returning the root tree id.
///
/// Entries arrive in index order, which keeps each directory's entries
/// contiguous, so a stack of open trees suffices: when the common path
/// prefix with the previous entry shrinks, the deeper trees are finished
/// and written; missing intermediate trees are opened on the way back down.
pub(crate) fn write_tree_from_index(
    entries: &[IndexEntry],
    repo: &Repository,
) -> Result<ObjectId, IndexError> {
    let mut tree = Tree::new();
    let mut stack: Vec<EntryRef> = vec![tree.root()];
    let mut prev: Vec<BString> = Vec::new();

    for entry in entries {
        if entry.stage != Stage::Normal {
            continue;
        }
        let components: Vec<BString> = entry
            .path
            .split(|&b| b == b'/')
            .map(BString::from)
            .collect();

        let common = prev
            .iter()
            .zip(&components)
            .take_while(|(a, b)| a == b)
            .count();

        while stack.len() > common + 1 {
            if let Some(finished) = stack.pop() {
                repo.write_tree(&mut tree, finished)?;
            }
        }
        while stack.len() < components.len() {
            let name = components[stack.len() - 1].as_bstr();
            let open = stack[stack.len() - 1];
            let sub = match tree.subtree_of(open, name, &NoObjects)? {
                Some(existing) => existing,
                None => tree.insert_tree(open, name)?,
            };
            stack.push(sub);
        }

        let leaf_name = components[components.len() - 1].as_bstr();
        let executable = FileMode::Executable.matches(entry.mode_bits);
        let open = stack[stack.len() - 1];
        tree.insert_file(open, leaf_name, entry.oid, executable)?;

        prev = components;
    }

    while let Some(finished) = stack.pop() {
        repo.write_tree(&mut tree, finished)?;
    }
    let root = tree.root();
    Ok(repo.write_tree(&mut tree, root)?)
}
