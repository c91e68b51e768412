//! The staging area: a binary index file bridging working tree and object
//! database.
//!
//! The index maps working-directory-relative paths (raw bytes, sorted as
//! unsigned bytes) to blob ids plus a stat cache. Reading and writing use
//! the version-2 on-disk format; writing replaces the file atomically under
//! an exclusive-creation lock.

mod entry;
mod read;
mod write;

use std::path::{Path, PathBuf};
use std::time::SystemTime;

use bstr::{BStr, ByteSlice};
use grit_hash::ObjectId;
use grit_object::{EntryRef, FileMode, ObjectError, Tree};
use grit_repo::{fs as wtfs, RepoError, Repository};
use tracing::debug;

pub use entry::IndexEntry;

/// Magic bytes at the start of every index file.
pub(crate) const INDEX_SIGNATURE: &[u8; 4] = b"DIRC";

/// Errors produced by index operations.
#[derive(Debug, thiserror::Error)]
pub enum IndexError {
    #[error("corrupt index: {0}")]
    Corrupt(String),

    #[error("index file is in use: {path}")]
    IndexInUse { path: PathBuf },

    #[error("cannot write an index holding unmerged entries")]
    UnmergedStage,

    #[error("short write checking out {path}")]
    ShortWrite { path: PathBuf },

    #[error(transparent)]
    Object(#[from] ObjectError),

    #[error(transparent)]
    Repo(#[from] RepoError),

    #[error(transparent)]
    Hash(#[from] grit_hash::HashError),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Merge stage of an index entry, a 2-bit field in the flags word.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    /// Merged (stage 0): the only stage a writable index may contain.
    Normal,
    /// Common ancestor version in a conflict (stage 1).
    Base,
    /// Our version in a conflict (stage 2).
    Ours,
    /// Their version in a conflict (stage 3).
    Theirs,
}

impl Stage {
    pub fn bits(&self) -> u8 {
        match self {
            Stage::Normal => 0,
            Stage::Base => 1,
            Stage::Ours => 2,
            Stage::Theirs => 3,
        }
    }

    pub fn from_bits(bits: u8) -> Self {
        match bits & 0x3 {
            0 => Stage::Normal,
            1 => Stage::Base,
            2 => Stage::Ours,
            _ => Stage::Theirs,
        }
    }
}

/// The index: an ordered map from path keys to entries, plus the
/// bookkeeping needed to decide when the on-disk file must be reread.
pub struct Index {
    path: PathBuf,
    entries: Vec<IndexEntry>,
    /// Entries were added, removed, or re-hashed since the last read/write.
    changed: bool,
    /// Only cached stat data moved; content is unchanged.
    stat_dirty: bool,
    /// Mtime of the on-disk file when it was last read.
    last_cache_time: Option<SystemTime>,
}

impl Index {
    /// The index of a repository, at `<gitdir>/index`. Nothing is read
    /// until [`read`](Self::read) is called.
    pub fn new(repo: &Repository) -> Self {
        Self::at(repo.index_path())
    }

    /// An index backed by an arbitrary file path.
    pub fn at(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            entries: Vec::new(),
            changed: false,
            stat_dirty: false,
            last_cache_time: None,
        }
    }

    /// Whether in-memory state differs from what was last read or written.
    pub fn is_changed(&self) -> bool {
        self.changed || self.stat_dirty
    }

    /// Load the index file. A missing file yields an empty index.
    pub fn read(&mut self) -> Result<(), IndexError> {
        self.changed = false;
        self.stat_dirty = false;
        if !self.path.exists() {
            self.entries.clear();
            self.last_cache_time = None;
            return Ok(());
        }
        let data = std::fs::read(&self.path)?;
        self.entries = read::parse_index(&data)?;
        self.last_cache_time = std::fs::metadata(&self.path)?.modified().ok();
        debug!(entries = self.entries.len(), path = %self.path.display(), "read index");
        Ok(())
    }

    /// Reload only if the backing file's mtime moved since the last read.
    pub fn reread_if_necessary(&mut self) -> Result<(), IndexError> {
        if self.path.exists() {
            let mtime = std::fs::metadata(&self.path)?.modified().ok();
            if mtime != self.last_cache_time {
                self.read()?;
            }
        }
        Ok(())
    }

    /// Write the index atomically. Refuses while unmerged entries exist.
    pub fn write(&mut self) -> Result<(), IndexError> {
        self.check_write_ok()?;
        write::write_index(&self.entries, &self.path)?;
        self.changed = false;
        self.stat_dirty = false;
        Ok(())
    }

    fn check_write_ok(&self) -> Result<(), IndexError> {
        if self.entries.iter().any(|e| e.stage() != Stage::Normal) {
            return Err(IndexError::UnmergedStage);
        }
        Ok(())
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the index holds no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// All entries in ascending unsigned-byte key order.
    pub fn members(&self) -> &[IndexEntry] {
        &self.entries
    }

    /// Look up an entry by its path key.
    pub fn entry(&self, path: &BStr) -> Option<&IndexEntry> {
        self.lookup(path).ok().map(|at| &self.entries[at])
    }

    /// Mutable lookup, for flag changes such as assume-valid.
    pub fn entry_mut(&mut self, path: &BStr) -> Option<&mut IndexEntry> {
        match self.lookup(path) {
            Ok(at) => {
                self.changed = true;
                Some(&mut self.entries[at])
            }
            Err(_) => None,
        }
    }

    fn lookup(&self, key: &BStr) -> Result<usize, usize> {
        self.entries
            .binary_search_by(|e| e.path.as_slice().cmp(key.as_bytes()))
    }

    /// Insert or replace an entry, keeping key order.
    pub fn upsert(&mut self, entry: IndexEntry) -> &IndexEntry {
        self.changed = true;
        match self.lookup(entry.path()) {
            Ok(at) => {
                self.entries[at] = entry;
                &self.entries[at]
            }
            Err(at) => {
                self.entries.insert(at, entry);
                &self.entries[at]
            }
        }
    }

    /// Stage the content of a working-tree file, writing its blob and
    /// upserting the entry for its workdir-relative path.
    pub fn add(
        &mut self,
        workdir: &Path,
        file: &Path,
        repo: &Repository,
    ) -> Result<&IndexEntry, IndexError> {
        let key = grit_repo::path::strip_work_dir(workdir, file)?;
        match self.lookup(key.as_ref()) {
            Ok(at) => {
                if self.entries[at].update(file, repo)? {
                    self.changed = true;
                } else {
                    self.stat_dirty = true;
                }
                Ok(&self.entries[at])
            }
            Err(at) => {
                let entry = IndexEntry::from_file(key, file, Stage::Normal, repo)?;
                self.entries.insert(at, entry);
                self.changed = true;
                Ok(&self.entries[at])
            }
        }
    }

    /// Remove the entry for a working-tree file. Returns whether one
    /// existed.
    pub fn remove(&mut self, workdir: &Path, file: &Path) -> Result<bool, IndexError> {
        let key = grit_repo::path::strip_work_dir(workdir, file)?;
        match self.lookup(key.as_ref()) {
            Ok(at) => {
                self.entries.remove(at);
                self.changed = true;
                Ok(true)
            }
            Err(_) => Ok(false),
        }
    }

    /// Populate the index from a tree, replacing matching paths. Every
    /// blob and symlink becomes a stage-0 entry with its size read from the
    /// object store.
    pub fn read_tree(&mut self, tree: &mut Tree, repo: &Repository) -> Result<(), IndexError> {
        let root = tree.root();
        self.read_tree_at(tree, root, repo)
    }

    fn read_tree_at(
        &mut self,
        tree: &mut Tree,
        at: EntryRef,
        repo: &Repository,
    ) -> Result<(), IndexError> {
        for member in tree.members(at, repo)? {
            if tree.is_subtree(member) {
                self.read_tree_at(tree, member, repo)?;
            } else {
                self.add_tree_entry(tree, member, repo)?;
            }
        }
        Ok(())
    }

    /// Upsert a stage-0 entry for a single tree leaf.
    pub fn add_tree_entry(
        &mut self,
        tree: &Tree,
        entry: EntryRef,
        repo: &Repository,
    ) -> Result<&IndexEntry, IndexError> {
        let full_name = tree.full_name(entry);
        let id = tree
            .id(entry)
            .ok_or_else(|| ObjectError::MissingEntryId(full_name.clone()))?;
        let size = repo.open_blob(&id)?.size() as u32;
        let mode_bits = tree.mode(entry).bits();
        Ok(self.upsert(IndexEntry::from_blob(full_name, id, mode_bits, size)))
    }

    /// Build and store the tree hierarchy of all staged entries, returning
    /// the root tree id. Refuses while unmerged entries exist.
    pub fn write_tree(&mut self, repo: &Repository) -> Result<ObjectId, IndexError> {
        self.check_write_ok()?;
        write::write_tree_from_index(&self.entries, repo)
    }

    /// Write every stage-0 entry's blob content into the working tree.
    pub fn checkout(&mut self, workdir: &Path, repo: &Repository) -> Result<(), IndexError> {
        for at in 0..self.entries.len() {
            if self.entries[at].stage() != Stage::Normal {
                continue;
            }
            self.checkout_at(at, workdir, repo)?;
        }
        debug!(entries = self.entries.len(), workdir = %workdir.display(), "checked out index");
        Ok(())
    }

    /// Check out a single entry by path key.
    pub fn checkout_entry(
        &mut self,
        workdir: &Path,
        path: &BStr,
        repo: &Repository,
    ) -> Result<(), IndexError> {
        match self.lookup(path) {
            Ok(at) => self.checkout_at(at, workdir, repo),
            Err(_) => Ok(()),
        }
    }

    fn checkout_at(
        &mut self,
        at: usize,
        workdir: &Path,
        repo: &Repository,
    ) -> Result<(), IndexError> {
        use std::io::Write;

        let entry = &self.entries[at];
        let loader = repo.open_blob(&entry.oid())?;
        let file = entry::work_path(workdir, entry.path());

        if let Some(parent) = file.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let _ = std::fs::remove_file(&file);

        let mut out = std::fs::File::create(&file)?;
        out.write_all(loader.bytes())
            .map_err(|_| IndexError::ShortWrite { path: file.clone() })?;
        out.sync_all()?;
        drop(out);

        if repo.config().file_mode() && wtfs::supports_executable() {
            let executable = FileMode::Executable.matches(self.entries[at].mode_bits());
            wtfs::set_executable(&file, executable)?;
        }

        // Stamp the entry from the file just written so it does not
        // immediately read back as modified.
        let meta = std::fs::metadata(&file)?;
        self.entries[at].restamp(&meta);
        self.stat_dirty = true;
        Ok(())
    }

    /// The path of the backing file.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Compare two path keys the way the index orders them: unsigned bytes,
/// shorter key first on a shared prefix.
pub fn compare_keys(a: &BStr, b: &BStr) -> std::cmp::Ordering {
    a.cmp(b)
}
