//! Repository facade for the grit object database.
//!
//! Provides loose object reads and writes under `<gitdir>/objects`, typed
//! blob/tree access, the lazy tree mapping consumed by the tree model, the
//! in-memory configuration store, and the working-directory path helpers
//! the index relies on.

mod blob;
mod config;
pub mod fs;
pub mod path;

use std::fs as stdfs;
use std::path::{Path, PathBuf};

use flate2::read::ZlibDecoder;
use grit_hash::ObjectId;
use grit_object::{header, EntryRef, ObjectError, ObjectType, Tree, TreeReader};
use std::io::Read;
use tracing::debug;

pub use config::Config;

/// Errors produced by repository operations.
#[derive(Debug, thiserror::Error)]
pub enum RepoError {
    #[error("not a git repository: {0}")]
    NotARepository(PathBuf),

    #[error("missing object: {0}")]
    MissingObject(ObjectId),

    #[error("object {id} is a {actual}, expected {expected}")]
    TypeMismatch {
        id: ObjectId,
        expected: ObjectType,
        actual: ObjectType,
    },

    #[error("file {0} is outside the working directory")]
    OutsideWorkDir(PathBuf),

    #[error("file changed while hashing: expected {expected} bytes, read {actual}")]
    StreamLength { expected: u64, actual: u64 },

    #[error(transparent)]
    Object(#[from] ObjectError),

    #[error(transparent)]
    Hash(#[from] grit_hash::HashError),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// A fully inflated object read from the repository.
#[derive(Debug)]
pub struct ObjectLoader {
    kind: ObjectType,
    data: Vec<u8>,
}

impl ObjectLoader {
    /// The object's type tag.
    pub fn kind(&self) -> ObjectType {
        self.kind
    }

    /// Payload size in bytes.
    pub fn size(&self) -> u64 {
        self.data.len() as u64
    }

    /// The payload, without the object header.
    pub fn bytes(&self) -> &[u8] {
        &self.data
    }

    /// Consume the loader, returning the payload.
    pub fn into_bytes(self) -> Vec<u8> {
        self.data
    }
}

/// Handle to a git directory and its loose object store.
#[derive(Debug)]
pub struct Repository {
    git_dir: PathBuf,
    objects_dir: PathBuf,
    config: Config,
}

impl Repository {
    /// Open an existing git directory.
    pub fn open(git_dir: impl AsRef<Path>) -> Result<Self, RepoError> {
        let git_dir = git_dir.as_ref().to_path_buf();
        let objects_dir = git_dir.join("objects");
        if !objects_dir.is_dir() {
            return Err(RepoError::NotARepository(git_dir));
        }
        Ok(Self {
            git_dir,
            objects_dir,
            config: Config::new(),
        })
    }

    /// Create the object-store skeleton at `git_dir` and open it.
    pub fn init(git_dir: impl AsRef<Path>) -> Result<Self, RepoError> {
        stdfs::create_dir_all(git_dir.as_ref().join("objects"))?;
        debug!(git_dir = %git_dir.as_ref().display(), "initialized repository");
        Self::open(git_dir)
    }

    /// The git directory this repository was opened on.
    pub fn directory(&self) -> &Path {
        &self.git_dir
    }

    /// Where the index file for this repository lives.
    pub fn index_path(&self) -> PathBuf {
        self.git_dir.join("index")
    }

    /// The repository configuration.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Mutable access to the configuration, for programmatic overrides.
    pub fn config_mut(&mut self) -> &mut Config {
        &mut self.config
    }

    pub(crate) fn objects_dir(&self) -> &Path {
        &self.objects_dir
    }

    pub(crate) fn object_path(&self, id: &ObjectId) -> PathBuf {
        let hex = id.to_hex();
        self.objects_dir.join(&hex[..2]).join(&hex[2..])
    }

    /// Whether an object with this id exists in the store.
    pub fn contains(&self, id: &ObjectId) -> bool {
        self.object_path(id).is_file()
    }

    fn read_loose(&self, id: &ObjectId) -> Result<Option<(ObjectType, Vec<u8>)>, ObjectError> {
        let compressed = match stdfs::read(self.object_path(id)) {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(ObjectError::Io(e)),
        };

        let mut decoder = ZlibDecoder::new(&compressed[..]);
        let mut raw = Vec::new();
        decoder.read_to_end(&mut raw)?;

        let (kind, size, header_len) = header::parse_header(&raw)?;
        let payload = raw.split_off(header_len);
        if payload.len() != size {
            return Err(ObjectError::InvalidHeader(format!(
                "declared size {size} but payload is {} bytes",
                payload.len()
            )));
        }
        Ok(Some((kind, payload)))
    }

    /// Read any object by id. `Ok(None)` when the object does not exist.
    pub fn open_object(&self, id: &ObjectId) -> Result<Option<ObjectLoader>, RepoError> {
        Ok(self
            .read_loose(id)?
            .map(|(kind, data)| ObjectLoader { kind, data }))
    }

    fn open_typed(&self, id: &ObjectId, expected: ObjectType) -> Result<ObjectLoader, RepoError> {
        let loader = self
            .open_object(id)?
            .ok_or(RepoError::MissingObject(*id))?;
        if loader.kind() != expected {
            return Err(RepoError::TypeMismatch {
                id: *id,
                expected,
                actual: loader.kind(),
            });
        }
        Ok(loader)
    }

    /// Read a blob, verifying the type tag.
    pub fn open_blob(&self, id: &ObjectId) -> Result<ObjectLoader, RepoError> {
        self.open_typed(id, ObjectType::Blob)
    }

    /// Read a tree, verifying the type tag.
    pub fn open_tree(&self, id: &ObjectId) -> Result<ObjectLoader, RepoError> {
        self.open_typed(id, ObjectType::Tree)
    }

    /// A lazy tree bound to this repository: content loads on first access.
    pub fn map_tree(&self, id: &ObjectId) -> Tree {
        Tree::with_id(*id)
    }

    /// Serialize and store a subtree whose children all carry ids, stamping
    /// the node's own id. A clean subtree short-circuits to its stored id.
    pub fn write_tree(&self, tree: &mut Tree, entry: EntryRef) -> Result<ObjectId, RepoError> {
        if let Some(id) = tree.id(entry) {
            return Ok(id);
        }
        let payload = tree.encode(entry)?;
        let id = self.write_object(ObjectType::Tree, &payload)?;
        tree.set_id(entry, id);
        Ok(id)
    }
}

impl TreeReader for Repository {
    fn read_tree(&self, id: &ObjectId) -> Result<Option<Vec<u8>>, ObjectError> {
        match self.read_loose(id)? {
            Some((ObjectType::Tree, payload)) => Ok(Some(payload)),
            Some((actual, _)) => Err(ObjectError::TypeMismatch {
                id: *id,
                expected: ObjectType::Tree,
                actual,
            }),
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bstr::BStr;

    #[test]
    fn open_missing_directory_fails() {
        let dir = tempfile::tempdir().unwrap();
        let err = Repository::open(dir.path().join("absent")).unwrap_err();
        assert!(matches!(err, RepoError::NotARepository(_)));
    }

    #[test]
    fn blob_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let repo = Repository::init(dir.path()).unwrap();

        let id = repo.write_blob(b"hello world\n").unwrap();
        assert_eq!(id.to_hex(), "3b18e512dba79e4c8300dd08aeb37f8e728b8dad");
        assert!(repo.contains(&id));

        let loader = repo.open_blob(&id).unwrap();
        assert_eq!(loader.kind(), ObjectType::Blob);
        assert_eq!(loader.bytes(), b"hello world\n");
        assert_eq!(loader.size(), 12);
    }

    #[test]
    fn open_object_absent_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let repo = Repository::init(dir.path()).unwrap();
        let absent = ObjectId::from_hex("0123456789abcdef0123456789abcdef01234567").unwrap();
        assert!(repo.open_object(&absent).unwrap().is_none());
        assert!(matches!(
            repo.open_blob(&absent).unwrap_err(),
            RepoError::MissingObject(_)
        ));
    }

    #[test]
    fn open_blob_on_tree_is_type_mismatch() {
        let dir = tempfile::tempdir().unwrap();
        let repo = Repository::init(dir.path()).unwrap();
        let id = repo.write_object(ObjectType::Tree, b"").unwrap();
        let err = repo.open_blob(&id).unwrap_err();
        assert!(matches!(err, RepoError::TypeMismatch { .. }));
    }

    #[test]
    fn tree_write_and_map_back() {
        let dir = tempfile::tempdir().unwrap();
        let repo = Repository::init(dir.path()).unwrap();

        let blob = repo.write_blob(b"content\n").unwrap();
        let mut tree = Tree::new();
        let root = tree.root();
        tree.insert_file(root, BStr::new("a.txt"), blob, false)
            .unwrap();
        let tree_id = repo.write_tree(&mut tree, root).unwrap();
        assert_eq!(tree.id(root), Some(tree_id));

        let mut mapped = repo.map_tree(&tree_id);
        let mapped_root = mapped.root();
        assert!(!mapped.is_loaded(mapped_root));
        let members = mapped.members(mapped_root, &repo).unwrap();
        assert_eq!(members.len(), 1);
        assert_eq!(mapped.name(members[0]), "a.txt");
        assert_eq!(mapped.id(members[0]), Some(blob));
    }

    #[test]
    fn write_tree_requires_child_ids() {
        let dir = tempfile::tempdir().unwrap();
        let repo = Repository::init(dir.path()).unwrap();
        let mut tree = Tree::new();
        let root = tree.root();
        tree.add_file(BStr::new("dirty"), &grit_object::NoObjects)
            .unwrap();
        let err = repo.write_tree(&mut tree, root).unwrap_err();
        assert!(matches!(
            err,
            RepoError::Object(ObjectError::MissingEntryId(_))
        ));
    }

    #[test]
    fn index_path_under_git_dir() {
        let dir = tempfile::tempdir().unwrap();
        let repo = Repository::init(dir.path()).unwrap();
        assert_eq!(repo.index_path(), dir.path().join("index"));
        assert_eq!(repo.directory(), dir.path());
    }
}
