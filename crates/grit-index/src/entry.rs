//! Index entries and their working-tree synchronization state.

use std::fs::Metadata;
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;

use bstr::{BStr, BString, ByteSlice};
use grit_hash::ObjectId;
use grit_object::FileMode;
use grit_repo::{fs as wtfs, Repository};

use crate::{IndexError, Stage};

/// A single entry in the index.
///
/// Carries the cached stat data of the working-tree file it was created
/// from, the blob id of its content, and the flag bits of the on-disk
/// format. The stat cache is what makes modification detection cheap: as
/// long as size and mtime agree with the filesystem, the content is assumed
/// unchanged.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexEntry {
    pub(crate) path: BString,
    pub(crate) oid: ObjectId,
    pub(crate) mode_bits: u32,
    pub(crate) ctime_secs: u32,
    pub(crate) ctime_nsecs: u32,
    pub(crate) mtime_secs: u32,
    pub(crate) mtime_nsecs: u32,
    pub(crate) dev: u32,
    pub(crate) ino: u32,
    pub(crate) uid: u32,
    pub(crate) gid: u32,
    pub(crate) size: u32,
    pub(crate) stage: Stage,
    pub(crate) assume_valid: bool,
    pub(crate) update_needed: bool,
}

impl IndexEntry {
    /// An entry for a known blob with empty stat data, as produced when
    /// populating the index from a tree rather than from the filesystem.
    pub fn from_blob(
        path: impl Into<BString>,
        oid: ObjectId,
        mode_bits: u32,
        size: u32,
    ) -> Self {
        Self {
            path: path.into(),
            oid,
            mode_bits,
            ctime_secs: 0,
            ctime_nsecs: 0,
            mtime_secs: 0,
            mtime_nsecs: 0,
            dev: 0,
            ino: 0,
            uid: 0,
            gid: 0,
            size,
            stage: Stage::Normal,
            assume_valid: false,
            update_needed: false,
        }
    }

    /// Create an entry from a working-tree file: stats the file, stores its
    /// content as a blob, and stamps the stat cache.
    pub(crate) fn from_file(
        path: BString,
        file: &Path,
        stage: Stage,
        repo: &Repository,
    ) -> Result<Self, IndexError> {
        let meta = std::fs::metadata(file)?;
        let (mtime_secs, mtime_nsecs) = mtime_of(&meta);
        let (dev, ino, uid, gid) = stat_ids(&meta);

        let mode_bits = if repo.config().file_mode() && wtfs::is_executable(file) {
            FileMode::Executable.bits()
        } else {
            FileMode::Regular.bits()
        };

        let oid = repo.write_blob_file(file)?;

        Ok(Self {
            path,
            oid,
            mode_bits,
            ctime_secs: mtime_secs,
            ctime_nsecs: mtime_nsecs,
            mtime_secs,
            mtime_nsecs,
            dev,
            ino,
            uid,
            gid,
            size: meta.len() as u32,
            stage,
            assume_valid: false,
            update_needed: false,
        })
    }

    /// The same entry at a different merge stage.
    pub fn with_stage(mut self, stage: Stage) -> Self {
        self.stage = stage;
        self
    }

    /// The working-directory-relative path key.
    pub fn path(&self) -> &BStr {
        self.path.as_bstr()
    }

    /// The blob id of the staged content.
    pub fn oid(&self) -> ObjectId {
        self.oid
    }

    /// Raw file mode bits.
    pub fn mode_bits(&self) -> u32 {
        self.mode_bits
    }

    /// The merge stage.
    pub fn stage(&self) -> Stage {
        self.stage
    }

    /// Cached size, truncated to 32 bits as on disk.
    pub fn size(&self) -> u32 {
        self.size
    }

    /// Cached mtime as (seconds, nanoseconds).
    pub fn mtime(&self) -> (u32, u32) {
        (self.mtime_secs, self.mtime_nsecs)
    }

    /// Whether tools should assume the entry matches the working tree.
    pub fn assume_valid(&self) -> bool {
        self.assume_valid
    }

    pub fn set_assume_valid(&mut self, assume_valid: bool) {
        self.assume_valid = assume_valid;
    }

    /// Whether the entry is flagged for an unconditional content check.
    pub fn update_needed(&self) -> bool {
        self.update_needed
    }

    pub fn set_update_needed(&mut self, update_needed: bool) {
        self.update_needed = update_needed;
    }

    /// Invalidate the cached mtime so the next modification check cannot
    /// take the fast path. Test hook.
    pub fn force_recheck(&mut self) {
        self.mtime_secs = u32::MAX;
        self.mtime_nsecs = u32::MAX;
    }

    /// Refresh stat data and re-hash the content if the file looks changed
    /// in the working tree. Returns whether anything moved.
    pub fn update(&mut self, file: &Path, repo: &Repository) -> Result<bool, IndexError> {
        let meta = std::fs::metadata(file)?;
        let (mtime_secs, mtime_nsecs) = mtime_of(&meta);

        let mut changed = (self.mtime_secs, self.mtime_nsecs) != (mtime_secs, mtime_nsecs);
        self.mtime_secs = mtime_secs;
        self.mtime_nsecs = mtime_nsecs;

        if self.size != meta.len() as u32 {
            changed = true;
        }
        if repo.config().file_mode() && wtfs::supports_executable() {
            let exec_now = wtfs::is_executable(file);
            if exec_now != FileMode::Executable.matches(self.mode_bits) {
                self.mode_bits = if exec_now {
                    FileMode::Executable.bits()
                } else {
                    FileMode::Regular.bits()
                };
                changed = true;
            }
        }

        if changed {
            self.size = meta.len() as u32;
            self.oid = repo.write_blob_file(file)?;
        }
        Ok(changed)
    }

    /// Whether the working-tree file differs from this entry.
    ///
    /// Decision ladder: the assume-valid bit wins, then the update-needed
    /// bit, then existence, mode coherence, size, and mtime. An mtime
    /// mismatch alone is conservatively reported as modified unless
    /// `force_content_check` asks for a re-hash.
    pub fn is_modified(
        &self,
        workdir: &Path,
        force_content_check: bool,
        repo: &Repository,
    ) -> Result<bool, IndexError> {
        if self.assume_valid {
            return Ok(false);
        }
        if self.update_needed {
            return Ok(true);
        }

        let file = work_path(workdir, self.path.as_bstr());
        let meta = match std::fs::symlink_metadata(&file) {
            Ok(meta) => meta,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(true),
            Err(e) => return Err(IndexError::Io(e)),
        };

        let file_mode = repo.config().file_mode();
        let exec_bits = FileMode::Executable.bits() ^ FileMode::Regular.bits();
        if file_mode && FileMode::Executable.matches(self.mode_bits) {
            if wtfs::supports_executable() && !wtfs::is_executable(&file) {
                return Ok(true);
            }
        } else if FileMode::Regular.matches(self.mode_bits & !exec_bits) {
            if !meta.is_file() {
                return Ok(true);
            }
            if file_mode && wtfs::supports_executable() && wtfs::is_executable(&file) {
                return Ok(true);
            }
        } else if FileMode::Symlink.matches(self.mode_bits) {
            return Ok(true);
        } else if FileMode::Tree.matches(self.mode_bits) {
            if !meta.is_dir() {
                return Ok(true);
            }
        } else {
            return Ok(true);
        }

        if meta.len() as u32 != self.size {
            return Ok(true);
        }

        // A stored mtime without a nanosecond part came from a filesystem
        // that records whole seconds only; round the probe to match.
        let (fs_secs, mut fs_nsecs) = mtime_of(&meta);
        if self.mtime_nsecs == 0 {
            fs_nsecs = 0;
        }
        if (fs_secs, fs_nsecs) != (self.mtime_secs, self.mtime_nsecs) {
            if !force_content_check {
                return Ok(true);
            }
            let fresh = repo.hash_blob_file(&file)?;
            return Ok(fresh != self.oid);
        }
        Ok(false)
    }

    /// Re-stamp ctime and mtime from the file just written during checkout,
    /// so the entry does not immediately read as modified.
    pub(crate) fn restamp(&mut self, meta: &Metadata) {
        let (secs, nsecs) = mtime_of(meta);
        self.mtime_secs = secs;
        self.mtime_nsecs = nsecs;
        self.ctime_secs = secs;
        self.ctime_nsecs = nsecs;
    }
}

/// Join a path key onto the working directory.
pub(crate) fn work_path(workdir: &Path, key: &BStr) -> PathBuf {
    #[cfg(unix)]
    {
        use std::os::unix::ffi::OsStrExt;
        workdir.join(std::ffi::OsStr::from_bytes(key))
    }
    #[cfg(not(unix))]
    {
        workdir.join(String::from_utf8_lossy(key).as_ref())
    }
}

fn mtime_of(meta: &Metadata) -> (u32, u32) {
    match meta
        .modified()
        .ok()
        .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
    {
        Some(d) => (d.as_secs() as u32, d.subsec_nanos()),
        None => (0, 0),
    }
}

#[cfg(unix)]
fn stat_ids(meta: &Metadata) -> (u32, u32, u32, u32) {
    use std::os::unix::fs::MetadataExt;
    (
        meta.dev() as u32,
        meta.ino() as u32,
        meta.uid(),
        meta.gid(),
    )
}

#[cfg(not(unix))]
fn stat_ids(_meta: &Metadata) -> (u32, u32, u32, u32) {
    (0, 0, 0, 0)
}
