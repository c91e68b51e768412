//! Writing objects into the loose store.
//!
//! Objects are hashed over `"{type} {len}\0{payload}"`, deflated into a
//! temp file in the objects directory, and renamed into their fan-out
//! location. Writes of existing objects are no-ops: the store is
//! content-addressed, so a same-id file is the same content.

use std::fs::{self, File};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use flate2::write::ZlibEncoder;
use flate2::Compression;
use grit_hash::hasher::Hasher;
use grit_hash::ObjectId;
use grit_object::{header, ObjectType};
use tracing::trace;

use crate::{RepoError, Repository};

impl Repository {
    /// Store a payload with the given type. Returns the id.
    pub fn write_object(&self, kind: ObjectType, payload: &[u8]) -> Result<ObjectId, RepoError> {
        let hdr = header::write_header(kind, payload.len());

        let id = {
            let mut hasher = Hasher::new();
            hasher.update(&hdr);
            hasher.update(payload);
            hasher.finalize()?
        };

        if self.contains(&id) {
            return Ok(id);
        }

        let tmp = temp_path(self.objects_dir());
        let file = File::create(&tmp)?;
        let mut encoder = ZlibEncoder::new(file, Compression::default());
        encoder.write_all(&hdr)?;
        encoder.write_all(payload)?;
        encoder.finish()?;

        self.place_object(&tmp, &id)?;
        trace!(%id, %kind, "stored loose object");
        Ok(id)
    }

    /// Store a blob from an in-memory buffer.
    pub fn write_blob(&self, data: &[u8]) -> Result<ObjectId, RepoError> {
        self.write_object(ObjectType::Blob, data)
    }

    /// Store a blob by streaming a working-tree file through the hasher and
    /// the deflater, without buffering the content.
    pub fn write_blob_file(&self, file: impl AsRef<Path>) -> Result<ObjectId, RepoError> {
        let file = file.as_ref();
        let len = fs::metadata(file)?.len();
        let mut src = File::open(file)?;

        let hdr = header::write_header(ObjectType::Blob, len as usize);
        let mut hasher = Hasher::new();
        hasher.update(&hdr);

        let tmp = temp_path(self.objects_dir());
        let out = File::create(&tmp)?;
        let mut encoder = ZlibEncoder::new(out, Compression::default());
        encoder.write_all(&hdr)?;

        let mut copied: u64 = 0;
        let mut chunk = [0u8; 8192];
        loop {
            let n = src.read(&mut chunk)?;
            if n == 0 {
                break;
            }
            hasher.update(&chunk[..n]);
            encoder.write_all(&chunk[..n])?;
            copied += n as u64;
        }
        encoder.finish()?;

        if copied != len {
            let _ = fs::remove_file(&tmp);
            return Err(RepoError::StreamLength {
                expected: len,
                actual: copied,
            });
        }

        let id = hasher.finalize()?;
        if self.contains(&id) {
            let _ = fs::remove_file(&tmp);
            return Ok(id);
        }
        self.place_object(&tmp, &id)?;
        Ok(id)
    }

    /// Hash a working-tree file as a blob without storing anything.
    pub fn hash_blob_file(&self, file: impl AsRef<Path>) -> Result<ObjectId, RepoError> {
        let file = file.as_ref();
        let len = fs::metadata(file)?.len();
        let mut src = File::open(file)?;

        let mut hasher = Hasher::new();
        hasher.update(&header::write_header(ObjectType::Blob, len as usize));

        let mut copied: u64 = 0;
        let mut chunk = [0u8; 8192];
        loop {
            let n = src.read(&mut chunk)?;
            if n == 0 {
                break;
            }
            hasher.update(&chunk[..n]);
            copied += n as u64;
        }
        if copied != len {
            return Err(RepoError::StreamLength {
                expected: len,
                actual: copied,
            });
        }
        Ok(hasher.finalize()?)
    }

    /// Move a finished temp file into its fan-out location.
    fn place_object(&self, tmp: &Path, id: &ObjectId) -> Result<(), RepoError> {
        let final_path = self.object_path(id);
        if let Some(parent) = final_path.parent() {
            fs::create_dir_all(parent)?;
        }

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(tmp, fs::Permissions::from_mode(0o444))?;
        }

        match fs::rename(tmp, &final_path) {
            Ok(()) => Ok(()),
            Err(_) if final_path.exists() => {
                // Another writer won the race; content is identical.
                let _ = fs::remove_file(tmp);
                Ok(())
            }
            Err(e) => {
                let _ = fs::remove_file(tmp);
                Err(RepoError::Io(e))
            }
        }
    }
}

fn temp_path(objects_dir: &Path) -> PathBuf {
    let tag = std::process::id()
        ^ std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .subsec_nanos();
    objects_dir.join(format!("tmp_obj_{tag:08x}"))
}
