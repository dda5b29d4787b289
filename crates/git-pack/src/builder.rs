//! The public entry point (§4.1, §6): [`PackBuilder`] owns an object table,
//! a store handle, and a config, and turns a set of inserted objects into a
//! written pack on demand.

use std::collections::HashSet;

use bstr::{BString, ByteVec};
use git_hash::ObjectId;
use git_object::Tree;

use crate::candidates::{build_candidate_list, compute_object_details};
use crate::config::PackConfig;
use crate::parallel::run_parallel_search;
use crate::search::run_delta_search_serial;
use crate::sink::{FileSink, Sink};
use crate::store::ObjectStore;
use crate::table::ObjectTable;
use crate::write_order::plan_write_order;
use crate::writer::write_pack;
use crate::PackError;

/// Builds a single pack from objects inserted through [`PackBuilder::insert`]
/// or [`PackBuilder::insert_tree`].
///
/// Preparation (candidate selection, delta search) and emission (write-order
/// planning, streaming) both run lazily on the first call to one of the
/// `write_to_*`/`send` methods, and are skipped on subsequent calls unless a
/// new object has been inserted since — the "done" flag described in §6.
pub struct PackBuilder<'s> {
    store: &'s dyn ObjectStore,
    table: ObjectTable,
    config: PackConfig,
    tagged_tips: HashSet<ObjectId>,
    done: bool,
}

impl<'s> PackBuilder<'s> {
    /// Open a builder against `store` with default configuration.
    pub fn new(store: &'s dyn ObjectStore) -> Self {
        // `PackConfig::default()` always validates; see its own test.
        Self::with_config(store, PackConfig::default()).expect("default config is always valid")
    }

    /// Open a builder against `store`, validating `config` up front.
    pub fn with_config(store: &'s dyn ObjectStore, config: PackConfig) -> Result<Self, PackError> {
        config.validate()?;
        Ok(Self {
            store,
            table: ObjectTable::new(),
            config,
            tagged_tips: HashSet::new(),
            done: false,
        })
    }

    /// `n == 0` autodetects CPU count; `n == 1` forces the serial path.
    pub fn set_worker_count(&mut self, n: usize) {
        self.config.worker_count = n;
    }

    /// Mark `id` as an annotated-tag target so write-order planning places
    /// it among the tagged tips (§4.5). Peeling through chained tags is not
    /// performed; see the crate's design notes.
    pub fn mark_tagged_tip(&mut self, id: ObjectId) {
        self.tagged_tips.insert(id);
        self.done = false;
    }

    /// Insert a single object by id. A no-op if already present.
    pub fn insert(&mut self, id: ObjectId, name_hint: &[u8]) -> Result<(), PackError> {
        if self.table.contains(&id) {
            return Ok(());
        }
        let object = self.store.read(&id)?;
        let size = object.data.len();
        let name_hash = crate::table::name_hash(name_hint);
        self.table.insert(id, object.kind, size, name_hash);
        self.done = false;
        Ok(())
    }

    /// Insert a tree and every object it transitively references, in
    /// pre-order, with name hints formed from the accumulated path prefix.
    pub fn insert_tree(&mut self, root_id: ObjectId) -> Result<(), PackError> {
        self.insert(root_id, b"")?;
        self.insert_tree_at(root_id, BString::new(Vec::new()))
    }

    fn insert_tree_at(&mut self, tree_id: ObjectId, prefix: BString) -> Result<(), PackError> {
        let object = self.store.read(&tree_id)?;
        let tree = Tree::parse(&object.data)?;
        for entry in tree.iter() {
            let mut hint = prefix.clone();
            if !hint.is_empty() {
                hint.push_str(b"/");
            }
            hint.push_str(&entry.name);
            self.insert(entry.oid, &hint)?;
            if entry.mode.is_tree() {
                self.insert_tree_at(entry.oid, hint)?;
            }
        }
        Ok(())
    }

    /// Run candidate selection and delta search if anything changed since
    /// the last call.
    fn prepare(&mut self) -> Result<(), PackError> {
        if self.done {
            return Ok(());
        }
        compute_object_details(&mut self.table, self.config.big_file_threshold);
        let candidates = build_candidate_list(&self.table);

        let worker_count = self.config.resolved_worker_count();
        if worker_count <= 1 {
            run_delta_search_serial(&mut self.table, &candidates, self.store, &self.config)?;
        } else {
            run_parallel_search(&mut self.table, &candidates, self.store, &self.config)?;
        }

        self.done = true;
        Ok(())
    }

    /// Plan write order and stream the pack to `sink`.
    fn emit(&mut self, sink: &mut dyn Sink) -> Result<ObjectId, PackError> {
        self.prepare()?;
        let order = plan_write_order(&mut self.table, &self.tagged_tips)?;
        write_pack(&mut self.table, &order, self.store, sink)
    }

    /// Build the pack and return it as an in-memory buffer.
    pub fn write_to_buffer(&mut self) -> Result<Vec<u8>, PackError> {
        let mut sink = crate::sink::BufferSink::new();
        self.emit(&mut sink)?;
        Ok(sink.into_inner())
    }

    /// Build the pack and publish it atomically at `path`.
    pub fn write_to_file(&mut self, path: impl AsRef<std::path::Path>) -> Result<ObjectId, PackError> {
        let mut sink = FileSink::create(path)?;
        self.emit(&mut sink)
    }

    /// Build the pack and stream it through any [`Sink`] (a network
    /// transport adapter, typically [`crate::sink::WriterSink`]).
    pub fn send(&mut self, sink: &mut dyn Sink) -> Result<ObjectId, PackError> {
        self.emit(sink)
    }

    /// Number of distinct objects currently inserted.
    pub fn len(&self) -> usize {
        self.table.len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }

    /// Release the delta cache and object table ahead of the builder's
    /// `Drop`, for callers that want deterministic early memory release
    /// (§6). The builder cannot be used afterwards.
    pub fn free(self) {
        drop(self);
    }
}
