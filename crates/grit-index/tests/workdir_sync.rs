//! End-to-end scenarios against a real working directory and repository:
//! staging, modification detection, tree materialization, and checkout.

use std::fs;
use std::path::Path;

use bstr::BStr;
use grit_hash::ObjectId;
use grit_index::{Index, IndexEntry, IndexError, Stage};
use grit_object::FileMode;
use grit_repo::Repository;

/// `git hash-object -t tree /dev/null`
const EMPTY_TREE: &str = "4b825dc642cb6eb9a060e54bf8d69288fbee4904";

struct Fixture {
    _dir: tempfile::TempDir,
    repo: Repository,
    workdir: std::path::PathBuf,
}

fn fixture() -> Fixture {
    let dir = tempfile::tempdir().unwrap();
    let workdir = dir.path().join("work");
    fs::create_dir_all(&workdir).unwrap();
    let repo = Repository::init(dir.path().join("work/.git")).unwrap();
    Fixture {
        _dir: dir,
        repo,
        workdir,
    }
}

fn write_file(workdir: &Path, rel: &str, content: &[u8]) -> std::path::PathBuf {
    let path = workdir.join(rel);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).unwrap();
    }
    fs::write(&path, content).unwrap();
    path
}

#[test]
fn add_stages_blob_and_stat_cache() {
    let fx = fixture();
    let file = write_file(&fx.workdir, "hello.txt", b"hello world\n");

    let mut index = Index::new(&fx.repo);
    let entry = index.add(&fx.workdir, &file, &fx.repo).unwrap();

    assert_eq!(entry.path(), "hello.txt");
    assert_eq!(
        entry.oid().to_hex(),
        "3b18e512dba79e4c8300dd08aeb37f8e728b8dad"
    );
    assert_eq!(entry.size(), 12);
    assert!(fx.repo.contains(&entry.oid()));
    assert!(index.is_changed());

    // Freshly staged content is not modified.
    let entry = index.entry(BStr::new(b"hello.txt")).unwrap();
    assert!(!entry.is_modified(&fx.workdir, false, &fx.repo).unwrap());
}

#[test]
fn add_in_subdirectory_uses_slash_key() {
    let fx = fixture();
    let file = write_file(&fx.workdir, "src/lib.rs", b"pub fn hello() {}\n");

    let mut index = Index::new(&fx.repo);
    let entry = index.add(&fx.workdir, &file, &fx.repo).unwrap();
    assert_eq!(entry.path(), "src/lib.rs");
}

#[test]
fn missing_working_file_reads_modified() {
    let fx = fixture();
    let file = write_file(&fx.workdir, "gone.txt", b"x");

    let mut index = Index::new(&fx.repo);
    index.add(&fx.workdir, &file, &fx.repo).unwrap();
    fs::remove_file(&file).unwrap();

    let entry = index.entry(BStr::new(b"gone.txt")).unwrap();
    assert!(entry.is_modified(&fx.workdir, false, &fx.repo).unwrap());
}

#[test]
fn size_change_reads_modified() {
    let fx = fixture();
    let file = write_file(&fx.workdir, "grow.txt", b"short");

    let mut index = Index::new(&fx.repo);
    index.add(&fx.workdir, &file, &fx.repo).unwrap();
    fs::write(&file, b"much longer content").unwrap();

    let entry = index.entry(BStr::new(b"grow.txt")).unwrap();
    assert!(entry.is_modified(&fx.workdir, false, &fx.repo).unwrap());
}

#[test]
fn assume_valid_suppresses_detection() {
    let fx = fixture();
    let file = write_file(&fx.workdir, "pinned.txt", b"v1");

    let mut index = Index::new(&fx.repo);
    index.add(&fx.workdir, &file, &fx.repo).unwrap();
    fs::write(&file, b"completely different").unwrap();

    let entry = index.entry_mut(BStr::new(b"pinned.txt")).unwrap();
    entry.set_assume_valid(true);
    let entry = index.entry(BStr::new(b"pinned.txt")).unwrap();
    assert!(!entry.is_modified(&fx.workdir, false, &fx.repo).unwrap());
}

#[test]
fn update_needed_forces_detection() {
    let fx = fixture();
    let file = write_file(&fx.workdir, "watched.txt", b"v1");

    let mut index = Index::new(&fx.repo);
    index.add(&fx.workdir, &file, &fx.repo).unwrap();

    let entry = index.entry_mut(BStr::new(b"watched.txt")).unwrap();
    entry.set_update_needed(true);
    let entry = index.entry(BStr::new(b"watched.txt")).unwrap();
    assert!(entry.is_modified(&fx.workdir, false, &fx.repo).unwrap());
}

#[test]
fn forced_content_check_rehashes() {
    let fx = fixture();
    let file = write_file(&fx.workdir, "same.txt", b"stable content");

    let mut index = Index::new(&fx.repo);
    index.add(&fx.workdir, &file, &fx.repo).unwrap();

    // Invalidate the cached mtime: the conservative answer flips to
    // modified, but a forced re-hash sees identical content.
    let entry = index.entry_mut(BStr::new(b"same.txt")).unwrap();
    entry.force_recheck();
    let entry = index.entry(BStr::new(b"same.txt")).unwrap();
    assert!(entry.is_modified(&fx.workdir, false, &fx.repo).unwrap());
    assert!(!entry.is_modified(&fx.workdir, true, &fx.repo).unwrap());
}

#[test]
fn remove_unstages() {
    let fx = fixture();
    let file = write_file(&fx.workdir, "tmp.txt", b"x");

    let mut index = Index::new(&fx.repo);
    index.add(&fx.workdir, &file, &fx.repo).unwrap();
    assert!(index.remove(&fx.workdir, &file).unwrap());
    assert!(!index.remove(&fx.workdir, &file).unwrap());
    assert!(index.is_empty());
}

#[test]
fn empty_index_materializes_the_empty_tree() {
    let fx = fixture();
    let mut index = Index::new(&fx.repo);
    let root = index.write_tree(&fx.repo).unwrap();
    assert_eq!(root.to_hex(), EMPTY_TREE);
}

#[test]
fn write_tree_builds_nested_hierarchy() {
    let fx = fixture();
    let mut index = Index::new(&fx.repo);
    for (rel, content) in [
        ("a.txt", b"a\n".as_slice()),
        ("dir/b.txt", b"b\n"),
        ("dir/sub/c.txt", b"c\n"),
        ("zz.txt", b"z\n"),
    ] {
        let file = write_file(&fx.workdir, rel, content);
        index.add(&fx.workdir, &file, &fx.repo).unwrap();
    }

    let root_id = index.write_tree(&fx.repo).unwrap();

    let mut tree = fx.repo.map_tree(&root_id);
    let root = tree.root();
    let members = tree.members(root, &fx.repo).unwrap();
    let names: Vec<String> = members.iter().map(|&m| tree.name(m).to_string()).collect();
    assert_eq!(names, vec!["a.txt", "dir", "zz.txt"]);

    let c = tree
        .find_blob(BStr::new("dir/sub/c.txt"), &fx.repo)
        .unwrap()
        .expect("nested leaf present");
    let blob = fx.repo.open_blob(&tree.id(c).unwrap()).unwrap();
    assert_eq!(blob.bytes(), b"c\n");

    // The intermediate trees were stored as real objects.
    let dir_entry = tree.find_tree(BStr::new("dir"), &fx.repo).unwrap().unwrap();
    assert!(fx.repo.contains(&tree.id(dir_entry).unwrap()));
}

#[test]
fn write_tree_refuses_unmerged_entries() {
    let fx = fixture();
    let mut index = Index::new(&fx.repo);

    let entry = IndexEntry::from_blob(
        "conflict.txt",
        ObjectId::from_hex("0123456789abcdef0123456789abcdef01234567").unwrap(),
        FileMode::Regular.bits(),
        0,
    )
    .with_stage(Stage::Ours);
    index.upsert(entry);

    assert!(matches!(
        index.write_tree(&fx.repo).unwrap_err(),
        IndexError::UnmergedStage
    ));
    assert!(matches!(
        index.write().unwrap_err(),
        IndexError::UnmergedStage
    ));
}

#[test]
fn checkout_restores_content_and_restamps() {
    let fx = fixture();
    let file = write_file(&fx.workdir, "doc/readme.md", b"# title\n");

    let mut index = Index::new(&fx.repo);
    index.add(&fx.workdir, &file, &fx.repo).unwrap();

    // Wreck the working tree, then restore it from the index.
    fs::remove_file(&file).unwrap();
    fs::remove_dir(fx.workdir.join("doc")).unwrap();

    index.checkout(&fx.workdir, &fx.repo).unwrap();
    assert_eq!(fs::read(&file).unwrap(), b"# title\n");

    // Restamped timestamps keep the entry clean.
    let entry = index.entry(BStr::new(b"doc/readme.md")).unwrap();
    assert!(!entry.is_modified(&fx.workdir, false, &fx.repo).unwrap());
}

#[test]
fn read_tree_populates_index_from_snapshot() {
    let fx = fixture();
    let mut staging = Index::new(&fx.repo);
    for rel in ["x.txt", "lib/y.txt"] {
        let file = write_file(&fx.workdir, rel, rel.as_bytes());
        staging.add(&fx.workdir, &file, &fx.repo).unwrap();
    }
    let root_id = staging.write_tree(&fx.repo).unwrap();

    // A fresh index filled from the stored tree sees the same paths.
    let mut restored = Index::new(&fx.repo);
    let mut tree = fx.repo.map_tree(&root_id);
    restored.read_tree(&mut tree, &fx.repo).unwrap();

    assert_eq!(restored.len(), 2);
    let keys: Vec<String> = restored
        .members()
        .iter()
        .map(|e| e.path().to_string())
        .collect();
    assert_eq!(keys, vec!["lib/y.txt", "x.txt"]);

    let y = restored.entry(BStr::new(b"lib/y.txt")).unwrap();
    assert_eq!(y.size() as usize, "lib/y.txt".len());
    assert_eq!(y.mtime(), (0, 0));
}

#[cfg(unix)]
#[test]
fn executable_bit_tracked_when_filemode_on() {
    use grit_repo::fs as wtfs;

    let fx = fixture();
    let file = write_file(&fx.workdir, "run.sh", b"#!/bin/sh\n");
    wtfs::set_executable(&file, true).unwrap();

    let mut index = Index::new(&fx.repo);
    let entry = index.add(&fx.workdir, &file, &fx.repo).unwrap();
    assert!(FileMode::Executable.matches(entry.mode_bits()));

    // Dropping the bit in the working tree is drift.
    wtfs::set_executable(&file, false).unwrap();
    let entry = index.entry(BStr::new(b"run.sh")).unwrap();
    assert!(entry.is_modified(&fx.workdir, false, &fx.repo).unwrap());
}

#[cfg(unix)]
#[test]
fn executable_bit_ignored_when_filemode_off() {
    use grit_repo::fs as wtfs;

    let fx = fixture();
    let mut repo = fx.repo;
    repo.config_mut().set_boolean("core", None, "filemode", false);

    let file = write_file(&fx.workdir, "run.sh", b"#!/bin/sh\n");
    let mut index = Index::new(&repo);
    let entry = index.add(&fx.workdir, &file, &repo).unwrap();
    assert!(FileMode::Regular.matches(entry.mode_bits()));

    wtfs::set_executable(&file, true).unwrap();
    let entry = index.entry(BStr::new(b"run.sh")).unwrap();
    assert!(!entry.is_modified(&fx.workdir, false, &repo).unwrap());
}

#[cfg(unix)]
#[test]
fn checkout_applies_executable_bit() {
    use grit_repo::fs as wtfs;

    let fx = fixture();
    let file = write_file(&fx.workdir, "tool", b"#!/bin/sh\nexit 0\n");
    wtfs::set_executable(&file, true).unwrap();

    let mut index = Index::new(&fx.repo);
    index.add(&fx.workdir, &file, &fx.repo).unwrap();

    fs::remove_file(&file).unwrap();
    index.checkout(&fx.workdir, &fx.repo).unwrap();
    assert!(wtfs::is_executable(&file));
}
