//! The streaming pack writer (§4.6): header, per-object entries, trailer.
//!
//! Single-threaded by design (§5): every byte this module emits is fed to a
//! running hash in the exact order it reaches the sink, so the trailer is a
//! content hash over the whole stream.

use std::io::Write;

use flate2::write::ZlibEncoder;
use flate2::Compression;

use git_hash::hasher::Hasher;
use git_hash::{HashAlgorithm, ObjectId};

use crate::delta::compute::compute_delta;
use crate::entry::encode_entry_header;
use crate::sink::Sink;
use crate::store::ObjectStore;
use crate::table::{ObjectTable, RecordId};
use crate::{PackError, PACK_HEADER_SIZE, PACK_SIGNATURE, PACK_VERSION};

/// Stream `order` (as produced by [`crate::write_order::plan_write_order`])
/// to `sink` as a complete pack, returning the trailing content hash.
pub fn write_pack(
    table: &mut ObjectTable,
    order: &[RecordId],
    store: &dyn ObjectStore,
    sink: &mut dyn Sink,
) -> Result<ObjectId, PackError> {
    let mut hasher = Hasher::new(HashAlgorithm::Sha1);

    let mut header = [0u8; PACK_HEADER_SIZE];
    header[0..4].copy_from_slice(PACK_SIGNATURE);
    header[4..8].copy_from_slice(&PACK_VERSION.to_be_bytes());
    header[8..12].copy_from_slice(&(order.len() as u32).to_be_bytes());
    emit(sink, &mut hasher, &header)?;

    for &id in order {
        write_one(table, store, sink, &mut hasher, id)?;
    }

    let digest = hasher.finalize()?;
    sink.write(digest.as_bytes())?;
    sink.finish()?;
    Ok(digest)
}

fn emit(sink: &mut dyn Sink, hasher: &mut Hasher, bytes: &[u8]) -> Result<(), PackError> {
    sink.write(bytes)?;
    hasher.update(bytes);
    Ok(())
}

/// Write `id`, recursing into its delta base first so the base always
/// precedes the delta in the stream. Breaks cycles (which should only ever
/// arise transiently, never after a correctly prepared table) by rewriting
/// the offending record as a non-delta rather than erroring.
fn write_one(
    table: &mut ObjectTable,
    store: &dyn ObjectStore,
    sink: &mut dyn Sink,
    hasher: &mut Hasher,
    id: RecordId,
) -> Result<(), PackError> {
    if table.get(id).written {
        return Ok(());
    }

    table.get_mut(id).recursing = true;

    if let Some(base) = table.get(id).delta_base {
        if table.get(base).recursing {
            table.get_mut(id).delta_base = None;
        } else {
            write_one(table, store, sink, hasher, base)?;
        }
    }

    emit_record(table, store, sink, hasher, id)?;

    table.get_mut(id).written = true;
    table.get_mut(id).recursing = false;
    Ok(())
}

fn emit_record(
    table: &mut ObjectTable,
    store: &dyn ObjectStore,
    sink: &mut dyn Sink,
    hasher: &mut Hasher,
    id: RecordId,
) -> Result<(), PackError> {
    let delta_base = table.get(id).delta_base;

    let (type_num, uncompressed_size, base_id, payload) = match delta_base {
        Some(base) => {
            let base_oid = table.get(base).id;
            let delta_size = table.get(id).delta_size;
            let payload = delta_payload(table, store, base, id)?;
            if payload.raw.len() != delta_size {
                return Err(PackError::Invariant(format!(
                    "delta size changed between search ({}) and emission ({}) for {}",
                    delta_size,
                    payload.raw.len(),
                    table.get(id).id
                )));
            }
            (7u8, delta_size, Some(base_oid), payload)
        }
        None => {
            let rec = table.get(id);
            let obj = store.read(&rec.id)?;
            if obj.data.len() != rec.size {
                return Err(PackError::Invariant(format!(
                    "object {} size changed between metadata ({}) and read ({})",
                    rec.id,
                    rec.size,
                    obj.data.len()
                )));
            }
            let type_num = kind_type_num(rec.kind);
            (type_num, rec.size, None, Payload::raw(obj.data))
        }
    };

    let header = encode_entry_header(type_num, uncompressed_size as u64);
    emit(sink, hasher, &header)?;
    if let Some(base_oid) = base_id {
        emit(sink, hasher, base_oid.as_bytes())?;
    }

    let compressed = payload.into_compressed()?;
    emit(sink, hasher, &compressed)?;

    // Free the cached delta buffer now that it's been streamed.
    table.get_mut(id).delta_data = None;
    table.get_mut(id).z_delta_size = 0;

    Ok(())
}

/// Either an already-deflated cached delta, or raw bytes the writer still
/// needs to compress.
struct Payload {
    raw: Vec<u8>,
    precompressed: Option<Vec<u8>>,
}

impl Payload {
    fn raw(bytes: Vec<u8>) -> Self {
        Self {
            raw: bytes,
            precompressed: None,
        }
    }

    fn into_compressed(self) -> Result<Vec<u8>, PackError> {
        if let Some(z) = self.precompressed {
            return Ok(z);
        }
        let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(&self.raw)?;
        Ok(encoder.finish()?)
    }
}

/// Produce the delta payload for `id` against `base`: the cached bytes if
/// the search phase kept them (possibly already compressed), or a freshly
/// recomputed delta read straight from the store otherwise.
fn delta_payload(
    table: &mut ObjectTable,
    store: &dyn ObjectStore,
    base: RecordId,
    id: RecordId,
) -> Result<Payload, PackError> {
    let record = table.get(id);
    if let Some(cached) = &record.delta_data {
        return Ok(if record.z_delta_size > 0 {
            Payload {
                raw: Vec::new(),
                precompressed: Some(cached.clone()),
            }
        } else {
            Payload::raw(cached.clone())
        });
    }

    let base_obj = store.read(&table.get(base).id)?;
    let target_obj = store.read(&table.get(id).id)?;
    let delta = compute_delta(&base_obj.data, &target_obj.data);
    Ok(Payload::raw(delta))
}

fn kind_type_num(kind: git_object::ObjectType) -> u8 {
    match kind {
        git_object::ObjectType::Commit => 1,
        git_object::ObjectType::Tree => 2,
        git_object::ObjectType::Blob => 3,
        git_object::ObjectType::Tag => 4,
    }
}
