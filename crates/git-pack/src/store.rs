//! The backing object store collaborator.
//!
//! The builder never decides how an object's bytes are obtained; it only
//! calls [`ObjectStore::read`]. Everything else in this crate is written
//! against that trait so any store implementation — loose objects, another
//! pack, a network-backed cache — can plug in. [`MemoryStore`] is the
//! minimal concrete implementation used by this crate's own tests.

use std::collections::HashMap;

use git_hash::ObjectId;
use git_object::ObjectType;

use crate::PackError;

/// An object as read from the backing store: its kind and raw content bytes
/// (the object's content only, with no `"type size\0"` header).
#[derive(Debug, Clone)]
pub struct StoredObject {
    pub kind: ObjectType,
    pub data: Vec<u8>,
}

/// Read-only view onto wherever objects actually live.
///
/// Implementations are free to be lazy, cached, or networked; this builder
/// treats every call as potentially expensive and avoids calling it more
/// than once per object where the algorithm allows.
///
/// `Sync` is required so the parallel delta search (`crate::parallel`) can
/// share one `&dyn ObjectStore` across worker threads.
pub trait ObjectStore: Sync {
    /// Fetch an object's kind and content bytes by id.
    fn read(&self, id: &ObjectId) -> Result<StoredObject, PackError>;

    /// Cheap existence/size probe used when only metadata is needed.
    ///
    /// The default implementation falls back to a full `read`; stores that
    /// can answer this more cheaply (e.g. from an index) should override it.
    fn size_of(&self, id: &ObjectId) -> Result<usize, PackError> {
        Ok(self.read(id)?.data.len())
    }
}

/// A simple in-memory object store keyed by id, used for tests and as a
/// reference implementation of [`ObjectStore`].
#[derive(Debug, Default, Clone)]
pub struct MemoryStore {
    objects: HashMap<ObjectId, StoredObject>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Hash `data` as a `kind` object and insert it, returning its id.
    pub fn put(&mut self, kind: ObjectType, data: Vec<u8>) -> Result<ObjectId, PackError> {
        let id = git_hash::hasher::Hasher::hash_object(
            git_hash::HashAlgorithm::Sha1,
            std::str::from_utf8(kind.as_bytes()).expect("object type is ASCII"),
            &data,
        )?;
        self.objects.insert(id, StoredObject { kind, data });
        Ok(id)
    }

    pub fn contains(&self, id: &ObjectId) -> bool {
        self.objects.contains_key(id)
    }
}

impl ObjectStore for MemoryStore {
    fn read(&self, id: &ObjectId) -> Result<StoredObject, PackError> {
        self.objects
            .get(id)
            .cloned()
            .ok_or(PackError::StoreRead(*id))
    }
}
