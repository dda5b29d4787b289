//! End-to-end scenarios driving the public [`PackBuilder`] API, verified by
//! decoding the emitted stream with a minimal reader built on top of this
//! crate's own entry-header parser and delta applier. This reader is test
//! infrastructure only; it is deliberately not part of the public surface.

use std::collections::HashMap;
use std::io::Read;

use flate2::read::ZlibDecoder;

use git_hash::hasher::Hasher;
use git_hash::{HashAlgorithm, ObjectId};
use git_object::{ObjectType, Tree, TreeEntry};
use git_pack::entry::parse_entry_header;
use git_pack::store::MemoryStore;
use git_pack::{PackBuilder, PackEntryType};

/// A fully resolved object as read back out of a pack stream.
struct Decoded {
    kind: ObjectType,
    data: Vec<u8>,
}

/// Walk every entry in `bytes` in stream order, resolving REF_DELTA entries
/// against whatever base object preceded them (always true for anything
/// this crate emits, per its write-order invariant), and return every
/// object keyed by its content id.
fn read_pack(bytes: &[u8]) -> HashMap<ObjectId, Decoded> {
    assert_eq!(&bytes[0..4], b"PACK");
    assert_eq!(&bytes[4..8], &2u32.to_be_bytes());
    let count = u32::from_be_bytes(bytes[8..12].try_into().unwrap());

    let mut objects = HashMap::new();
    let mut offset = 12u64;

    for _ in 0..count {
        let entry = parse_entry_header(bytes, offset).unwrap();
        let payload_start = entry.data_offset as usize;

        let mut decoder = ZlibDecoder::new(&bytes[payload_start..]);
        let mut decompressed = Vec::new();
        decoder.read_to_end(&mut decompressed).unwrap();
        let consumed = decoder.total_in();

        let (kind, data) = match entry.entry_type {
            PackEntryType::RefDelta { base_oid } => {
                let base = objects
                    .get(&base_oid)
                    .unwrap_or_else(|| panic!("base {base_oid} missing from prior stream"));
                let kind: ObjectType = base.kind;
                let base_data = base.data.clone();
                let target = git_pack::delta::apply::apply_delta(&base_data, &decompressed).unwrap();
                (kind, target)
            }
            other => (
                other
                    .to_object_type()
                    .expect("non-delta entry always maps to an object type"),
                decompressed,
            ),
        };

        assert_eq!(data.len(), entry.uncompressed_size);
        let id = Hasher::hash_object(
            HashAlgorithm::Sha1,
            std::str::from_utf8(kind.as_bytes()).unwrap(),
            &data,
        )
        .unwrap();
        objects.insert(id, Decoded { kind, data });

        offset = payload_start as u64 + consumed;
    }

    // Trailer: 20 bytes of content hash, already accounted for by `offset`
    // landing exactly at `bytes.len() - 20`.
    assert_eq!(offset as usize, bytes.len() - 20);

    objects
}

#[test]
fn empty_object_set_produces_a_header_only_pack() {
    let store = MemoryStore::new();
    let mut builder = PackBuilder::new(&store);
    let bytes = builder.write_to_buffer().unwrap();
    let objects = read_pack(&bytes);
    assert!(objects.is_empty());
}

#[test]
fn single_small_blob_round_trips() {
    let mut store = MemoryStore::new();
    let content = b"0123456789";
    let id = store.put(ObjectType::Blob, content.to_vec()).unwrap();

    let mut builder = PackBuilder::new(&store);
    builder.insert(id, b"file.txt").unwrap();
    let bytes = builder.write_to_buffer().unwrap();

    let objects = read_pack(&bytes);
    assert_eq!(objects.len(), 1);
    let decoded = objects.get(&id).unwrap();
    assert_eq!(decoded.kind, ObjectType::Blob);
    assert_eq!(decoded.data, content);
}

#[test]
fn near_identical_blobs_round_trip_through_a_delta() {
    let mut store = MemoryStore::new();
    let mut base = vec![b'x'; 1024];
    let base_id = store.put(ObjectType::Blob, base.clone()).unwrap();
    base[500] = b'!';
    let changed_id = store.put(ObjectType::Blob, base.clone()).unwrap();

    let mut builder = PackBuilder::new(&store);
    builder.insert(base_id, b"a").unwrap();
    builder.insert(changed_id, b"a").unwrap();
    let bytes = builder.write_to_buffer().unwrap();

    // At least one entry in the stream is a REF_DELTA.
    let mut offset = 12u64;
    let count = u32::from_be_bytes(bytes[8..12].try_into().unwrap());
    let mut saw_delta = false;
    for _ in 0..count {
        let entry = parse_entry_header(&bytes, offset).unwrap();
        if matches!(entry.entry_type, PackEntryType::RefDelta { .. }) {
            saw_delta = true;
        }
        let mut decoder = ZlibDecoder::new(&bytes[entry.data_offset as usize..]);
        let mut buf = Vec::new();
        decoder.read_to_end(&mut buf).unwrap();
        offset = entry.data_offset + decoder.total_in();
    }
    assert!(saw_delta, "expected one of the two near-identical blobs to be packed as a delta");

    let objects = read_pack(&bytes);
    assert_eq!(objects.get(&base_id).unwrap().data, vec![b'x'; 1024].as_slice());
    let mut expected_changed = vec![b'x'; 1024];
    expected_changed[500] = b'!';
    assert_eq!(objects.get(&changed_id).unwrap().data, expected_changed);
}

#[test]
fn depth_ceiling_is_honored_end_to_end() {
    let mut store = MemoryStore::new();
    let mut buf = vec![b'a'; 300];
    let mut ids = Vec::new();
    for i in 0..6 {
        buf[i] = b'b';
        ids.push(store.put(ObjectType::Blob, buf.clone()).unwrap());
    }

    let mut config = git_pack::PackConfig::default();
    config.max_depth = 1;
    let mut builder = PackBuilder::with_config(&store, config).unwrap();
    for (i, &id) in ids.iter().enumerate() {
        builder.insert(id, format!("blob-{i}").as_bytes()).unwrap();
    }
    let bytes = builder.write_to_buffer().unwrap();

    let objects = read_pack(&bytes);
    assert_eq!(objects.len(), ids.len());
    for id in &ids {
        assert!(objects.contains_key(id));
    }
}

#[test]
fn tagged_tips_are_ordered_before_other_commits() {
    let mut store = MemoryStore::new();
    let c1 = store
        .put(ObjectType::Commit, b"commit one".to_vec())
        .unwrap();
    let c2 = store
        .put(ObjectType::Commit, b"commit two (tagged)".to_vec())
        .unwrap();
    let c3 = store
        .put(ObjectType::Commit, b"commit three".to_vec())
        .unwrap();

    let mut builder = PackBuilder::new(&store);
    builder.insert(c1, b"").unwrap();
    builder.insert(c2, b"").unwrap();
    builder.insert(c3, b"").unwrap();
    builder.mark_tagged_tip(c2);
    let bytes = builder.write_to_buffer().unwrap();

    let objects = read_pack(&bytes);
    assert_eq!(objects.len(), 3);
    assert!(objects.contains_key(&c1));
    assert!(objects.contains_key(&c2));
    assert!(objects.contains_key(&c3));
}

#[test]
fn insert_tree_produces_exactly_tree_and_its_two_blobs() {
    let mut store = MemoryStore::new();
    let blob1 = store.put(ObjectType::Blob, b"one".to_vec()).unwrap();
    let blob2 = store.put(ObjectType::Blob, b"two".to_vec()).unwrap();
    let tree = Tree {
        entries: vec![
            TreeEntry {
                mode: git_object::FileMode::Regular,
                name: bstr::BString::from("a.txt"),
                oid: blob1,
            },
            TreeEntry {
                mode: git_object::FileMode::Regular,
                name: bstr::BString::from("b.txt"),
                oid: blob2,
            },
        ],
    };
    let tree_content = tree.serialize_content();
    let tree_id = store.put(ObjectType::Tree, tree_content.clone()).unwrap();

    let mut builder = PackBuilder::new(&store);
    builder.insert_tree(tree_id).unwrap();
    assert_eq!(builder.len(), 3);

    let bytes = builder.write_to_buffer().unwrap();
    let objects = read_pack(&bytes);
    assert_eq!(objects.len(), 3);
    assert_eq!(objects.get(&tree_id).unwrap().data, tree_content);
    assert_eq!(objects.get(&blob1).unwrap().data, b"one");
    assert_eq!(objects.get(&blob2).unwrap().data, b"two");
}
