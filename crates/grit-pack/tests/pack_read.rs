//! Reading hand-assembled packs with their v1 index sidecars.

use std::io::Write;
use std::path::{Path, PathBuf};

use flate2::write::ZlibEncoder;
use flate2::Compression;
use grit_hash::hasher::Hasher;
use grit_hash::ObjectId;
use grit_object::ObjectType;
use grit_pack::entry::encode_entry_header;
use grit_pack::{PackError, PackFile, PackedEntryKind};

fn deflate(content: &[u8]) -> Vec<u8> {
    let mut out = Vec::new();
    let mut encoder = ZlibEncoder::new(&mut out, Compression::default());
    encoder.write_all(content).unwrap();
    encoder.finish().unwrap();
    out
}

fn build_v1_index(entries: &[(ObjectId, u32)]) -> Vec<u8> {
    let mut sorted: Vec<_> = entries.to_vec();
    sorted.sort_by(|a, b| a.0.cmp(&b.0));

    let mut buf = Vec::new();
    let mut fanout = [0u32; 256];
    for (oid, _) in &sorted {
        fanout[oid.first_byte() as usize] += 1;
    }
    for i in 1..256 {
        fanout[i] += fanout[i - 1];
    }
    for count in fanout {
        buf.extend_from_slice(&count.to_be_bytes());
    }
    for (oid, offset) in &sorted {
        buf.extend_from_slice(&offset.to_be_bytes());
        buf.extend_from_slice(oid.as_bytes());
    }
    buf.extend_from_slice(&[0u8; 40]);
    buf
}

fn build_pack(
    dir: &Path,
    version: u32,
    objects: &[(ObjectType, &[u8])],
) -> (PathBuf, Vec<ObjectId>, Vec<u64>) {
    let pack_path = dir.join("fixture.pack");
    let idx_path = dir.join("fixture.idx");

    let mut pack = Vec::new();
    pack.extend_from_slice(b"PACK");
    pack.extend_from_slice(&version.to_be_bytes());
    pack.extend_from_slice(&(objects.len() as u32).to_be_bytes());

    let mut ids = Vec::new();
    let mut offsets = Vec::new();
    let mut records = Vec::new();
    for (obj_type, content) in objects {
        let offset = pack.len() as u64;
        let type_code = match obj_type {
            ObjectType::Commit => 1,
            ObjectType::Tree => 2,
            ObjectType::Blob => 3,
            ObjectType::Tag => 4,
        };
        pack.extend_from_slice(&encode_entry_header(type_code, content.len() as u64));
        pack.extend_from_slice(&deflate(content));

        let oid = Hasher::hash_object(obj_type.as_str(), content).unwrap();
        ids.push(oid);
        offsets.push(offset);
        records.push((oid, offset as u32));
    }

    let checksum = Hasher::digest(&pack).unwrap();
    pack.extend_from_slice(checksum.as_bytes());

    std::fs::write(&pack_path, &pack).unwrap();
    std::fs::write(&idx_path, build_v1_index(&records)).unwrap();
    (pack_path, ids, offsets)
}

#[test]
fn random_access_matches_index_offsets() {
    // Three objects of known ids and offsets: get() must land on each.
    let dir = tempfile::tempdir().unwrap();
    let objects = vec![
        (ObjectType::Blob, b"object one".as_slice()),
        (ObjectType::Blob, b"object two with more data".as_slice()),
        (ObjectType::Blob, b"object three".as_slice()),
    ];
    let (pack_path, ids, offsets) = build_pack(dir.path(), 2, &objects);
    let pack = PackFile::open(&pack_path).unwrap();

    for (i, (_, content)) in objects.iter().enumerate() {
        let entry = pack.get(&ids[i]).unwrap().expect("id present");
        assert_eq!(entry.offset, offsets[i]);
        assert_eq!(entry.size, content.len() as u64);
        assert_eq!(pack.inflate(&entry).unwrap(), *content);
    }

    let unknown = ObjectId::from_hex("ffffffffffffffffffffffffffffffffffffffff").unwrap();
    assert!(pack.get(&unknown).unwrap().is_none());
}

#[test]
fn version_three_is_accepted() {
    let dir = tempfile::tempdir().unwrap();
    let (pack_path, ids, _) = build_pack(dir.path(), 3, &[(ObjectType::Blob, b"v3 payload")]);
    let pack = PackFile::open(&pack_path).unwrap();
    assert_eq!(pack.version(), 3);
    let entry = pack.get(&ids[0]).unwrap().unwrap();
    assert_eq!(pack.inflate(&entry).unwrap(), b"v3 payload");
}

#[test]
fn header_only_iteration_visits_every_record() {
    // Property: advancing the iterator without touching payloads still
    // parses every header at its true offset.
    let dir = tempfile::tempdir().unwrap();
    let contents: Vec<Vec<u8>> = (0..20u8)
        .map(|i| vec![i; (i as usize + 1) * 37])
        .collect();
    let objects: Vec<(ObjectType, &[u8])> = contents
        .iter()
        .map(|c| (ObjectType::Blob, c.as_slice()))
        .collect();
    let (pack_path, _, offsets) = build_pack(dir.path(), 2, &objects);
    let pack = PackFile::open(&pack_path).unwrap();

    let seen_offsets: Vec<u64> = pack
        .entries()
        .map(|e| e.unwrap().offset)
        .collect();
    assert_eq!(seen_offsets, offsets);
}

#[test]
fn interleaved_iteration_and_random_access() {
    let dir = tempfile::tempdir().unwrap();
    let objects = vec![
        (ObjectType::Blob, b"alpha".as_slice()),
        (ObjectType::Blob, b"beta".as_slice()),
        (ObjectType::Blob, b"gamma".as_slice()),
    ];
    let (pack_path, ids, _) = build_pack(dir.path(), 2, &objects);
    let pack = PackFile::open(&pack_path).unwrap();

    let mut iter = pack.entries();
    let first = iter.next().unwrap().unwrap();
    assert_eq!(pack.inflate(&first).unwrap(), b"alpha");

    // Random access between iterator steps does not disturb the walk.
    let entry = pack.get(&ids[2]).unwrap().unwrap();
    assert_eq!(pack.inflate(&entry).unwrap(), b"gamma");

    let second = iter.next().unwrap().unwrap();
    assert_eq!(pack.inflate(&second).unwrap(), b"beta");
}

#[test]
fn missing_sidecar_is_an_error() {
    let dir = tempfile::tempdir().unwrap();
    let (pack_path, _, _) = build_pack(dir.path(), 2, &[(ObjectType::Blob, b"x")]);
    std::fs::remove_file(dir.path().join("fixture.idx")).unwrap();
    assert!(matches!(
        PackFile::open(&pack_path).unwrap_err(),
        PackError::Io(_)
    ));
}

#[test]
fn ref_delta_description_defers_resolution() {
    // The pack names the delta base; resolving it is the caller's job,
    // here simulated with a plain map lookup.
    let dir = tempfile::tempdir().unwrap();
    let pack_path = dir.path().join("fixture.pack");
    let idx_path = dir.path().join("fixture.idx");

    let base_content = b"base content for the delta";
    let base_oid = Hasher::hash_object("blob", base_content).unwrap();
    let delta_payload = b"(delta script)";

    let mut pack = Vec::new();
    pack.extend_from_slice(b"PACK");
    pack.extend_from_slice(&2u32.to_be_bytes());
    pack.extend_from_slice(&1u32.to_be_bytes());
    let delta_offset = pack.len() as u64;
    pack.extend_from_slice(&encode_entry_header(7, delta_payload.len() as u64));
    pack.extend_from_slice(base_oid.as_bytes());
    pack.extend_from_slice(&deflate(delta_payload));
    let checksum = Hasher::digest(&pack).unwrap();
    pack.extend_from_slice(checksum.as_bytes());
    std::fs::write(&pack_path, &pack).unwrap();

    let delta_oid = ObjectId::from_hex("1111111111111111111111111111111111111111").unwrap();
    std::fs::write(&idx_path, build_v1_index(&[(delta_oid, delta_offset as u32)])).unwrap();

    let pack = PackFile::open(&pack_path).unwrap();
    let entry = pack.get(&delta_oid).unwrap().unwrap();
    assert!(entry.is_delta());
    assert_eq!(entry.kind, PackedEntryKind::RefDelta { base: base_oid });

    let mut store = std::collections::HashMap::new();
    store.insert(base_oid, base_content.to_vec());
    let base = store.get(entry.base_id().unwrap()).expect("caller resolves");
    assert_eq!(base.as_slice(), base_content);
    assert_eq!(pack.inflate(&entry).unwrap(), delta_payload);
}
