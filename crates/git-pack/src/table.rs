//! The object table: an append-only record store keyed by content hash.

use git_hash::collections::OidMap;
use git_hash::ObjectId;
use git_object::ObjectType;

/// Index of a [`Record`] within its owning [`ObjectTable`].
///
/// Using an index rather than a reference sidesteps invalidation when the
/// backing vector grows, and makes the write-order planner's cycle guard a
/// simple local mutation (see [`crate::write_order`]).
pub type RecordId = usize;

/// A single object's bookkeeping row.
///
/// Mirrors the per-object record described in the data model: identity and
/// metadata fixed at insertion, delta linkage populated by the search phase,
/// and scratch fields repopulated on every write-order/emit pass.
#[derive(Debug, Clone)]
pub struct Record {
    pub id: ObjectId,
    pub kind: ObjectType,
    pub size: usize,
    pub name_hash: u32,

    /// Object is too large to ever be delta'd (size > big_file_threshold).
    pub no_try_delta: bool,

    /// Chosen delta base, if any.
    pub delta_base: Option<RecordId>,
    /// Size of the delta payload, when `delta_base.is_some()`.
    pub delta_size: usize,
    /// Chain depth: 0 for a non-delta object, base.depth + 1 otherwise.
    pub depth: usize,
    /// Cached delta bytes, possibly already compressed (see `z_delta_size`).
    pub delta_data: Option<Vec<u8>>,
    /// Compressed length of `delta_data`, when it holds compressed bytes
    /// rather than raw delta instructions. Zero means "not compressed yet".
    pub z_delta_size: usize,

    /// Write-order planner scratch: child-list linkage (insertion-order
    /// stable among siblings), rebuilt on every write.
    pub delta_child: Option<RecordId>,
    pub delta_sibling: Option<RecordId>,
    /// Set when this record's id is a tag tip.
    pub tagged: bool,
    /// Set once this record has been placed into the write order.
    pub filled: bool,

    /// Emitter scratch: already streamed to the sink.
    pub written: bool,
    /// Emitter scratch: on the active recursion path (cycle guard).
    pub recursing: bool,
}

impl Record {
    fn new(id: ObjectId, kind: ObjectType, size: usize, name_hash: u32) -> Self {
        Self {
            id,
            kind,
            size,
            name_hash,
            no_try_delta: false,
            delta_base: None,
            delta_size: 0,
            depth: 0,
            delta_data: None,
            z_delta_size: 0,
            delta_child: None,
            delta_sibling: None,
            tagged: false,
            filled: false,
            written: false,
            recursing: false,
        }
    }

    /// Bytes currently charged against the global delta cache budget by
    /// this record's cached delta, if any.
    pub fn cached_delta_bytes(&self) -> usize {
        match &self.delta_data {
            Some(buf) if self.z_delta_size > 0 => self.z_delta_size,
            Some(buf) => buf.len(),
            None => 0,
        }
    }

    /// Reset the write-order/emit scratch fields ahead of a fresh write.
    pub fn reset_scratch(&mut self) {
        self.delta_child = None;
        self.delta_sibling = None;
        self.tagged = false;
        self.filled = false;
        self.written = false;
        self.recursing = false;
    }
}

/// Minimal record-by-id accessor the delta search runs against.
///
/// [`ObjectTable`] implements this directly for the single-worker path; the
/// parallel driver (`crate::parallel`) implements it over a per-segment
/// shard so each worker's writes stay confined to the records its segment
/// owns while the search algorithm itself stays unchanged.
pub trait RecordStore {
    fn get(&self, id: RecordId) -> &Record;
    fn get_mut(&mut self, id: RecordId) -> &mut Record;
}

/// Append-only store of [`Record`]s, unique by [`ObjectId`].
#[derive(Debug, Clone, Default)]
pub struct ObjectTable {
    records: Vec<Record>,
    index: OidMap<RecordId>,
}

impl RecordStore for ObjectTable {
    fn get(&self, id: RecordId) -> &Record {
        ObjectTable::get(self, id)
    }

    fn get_mut(&mut self, id: RecordId) -> &mut Record {
        ObjectTable::get_mut(self, id)
    }
}

impl ObjectTable {
    pub fn new() -> Self {
        Self {
            records: Vec::new(),
            index: OidMap::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn get(&self, id: RecordId) -> &Record {
        &self.records[id]
    }

    pub fn get_mut(&mut self, id: RecordId) -> &mut Record {
        &mut self.records[id]
    }

    pub fn find(&self, oid: &ObjectId) -> Option<RecordId> {
        self.index.get(oid).copied()
    }

    pub fn contains(&self, oid: &ObjectId) -> bool {
        self.index.contains_key(oid)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Record> {
        self.records.iter()
    }

    pub fn ids(&self) -> impl Iterator<Item = RecordId> {
        0..self.records.len()
    }

    /// Insert a new record. Returns `(id, true)` if newly inserted, or the
    /// existing id with `false` if the object was already present.
    ///
    /// The underlying vector grows geometrically (`Vec::push`'s amortized
    /// doubling already gives us "double with slack"); the id→index map is
    /// keyed by content hash so it never needs rehashing on growth — unlike
    /// a pointer-based index, a `RecordId` stays valid forever.
    pub fn insert(
        &mut self,
        id: ObjectId,
        kind: ObjectType,
        size: usize,
        name_hash: u32,
    ) -> (RecordId, bool) {
        if let Some(&existing) = self.index.get(&id) {
            return (existing, false);
        }
        let record_id = self.records.len();
        self.records.push(Record::new(id, kind, size, name_hash));
        self.index.insert(id, record_id);
        (record_id, true)
    }
}

/// Compute the 32-bit locality fingerprint of a path-name hint.
///
/// Iterates the hint's bytes skipping whitespace; for each non-space byte
/// `c`, folds `hash = (hash >> 2) + (c << 24)`. The last ~16 non-whitespace
/// bytes dominate the result, which is what clusters files sharing a suffix
/// (extensions, in practice) together under the candidate sort.
pub fn name_hash(hint: &[u8]) -> u32 {
    let mut hash: u32 = 0;
    for &c in hint {
        if c.is_ascii_whitespace() {
            continue;
        }
        hash = (hash >> 2).wrapping_add((c as u32) << 24);
    }
    hash
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_is_idempotent() {
        let mut table = ObjectTable::new();
        let id = ObjectId::from_hex("da39a3ee5e6b4b0d3255bfef95601890afd80709").unwrap();
        let (a, first) = table.insert(id, ObjectType::Blob, 10, 0);
        assert!(first);
        let (b, second) = table.insert(id, ObjectType::Blob, 10, 0);
        assert!(!second);
        assert_eq!(a, b);
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn distinct_ids_get_distinct_records() {
        let mut table = ObjectTable::new();
        let a = ObjectId::from_hex("0000000000000000000000000000000000000001").unwrap();
        let b = ObjectId::from_hex("0000000000000000000000000000000000000002").unwrap();
        let (ra, _) = table.insert(a, ObjectType::Blob, 1, 0);
        let (rb, _) = table.insert(b, ObjectType::Blob, 1, 0);
        assert_ne!(ra, rb);
        assert_eq!(table.len(), 2);
    }

    #[test]
    fn name_hash_is_whitespace_insensitive() {
        assert_eq!(name_hash(b"src/main.rs"), name_hash(b" src/main.rs "));
    }

    #[test]
    fn name_hash_empty_is_zero() {
        assert_eq!(name_hash(b""), 0);
        assert_eq!(name_hash(b"   "), 0);
    }

    #[test]
    fn name_hash_suffix_dominates() {
        // Two unrelated prefixes sharing a long suffix should hash close
        // together (the shift-by-2-fold makes the tail dominate). We assert
        // a weaker, deterministic property here: both differ from a record
        // with a wholly different suffix.
        let a = name_hash(b"aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa.rs");
        let b = name_hash(b"bbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbb.rs");
        let c = name_hash(b"bbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbb.txt");
        assert_eq!(a, b, "shared long suffix should hash identically");
        assert_ne!(b, c);
    }
}
