//! The sliding-window delta search (§4.3): for each candidate, try to delta
//! it against up to `W` previously-seen candidates with bounded chain depth.
//!
//! Generic over [`RecordStore`] so the exact same search runs two ways: the
//! serial path drives it directly against an [`ObjectTable`], while the
//! parallel driver (`crate::parallel`) drives one instance per segment
//! against a `Shard` that only sees its own slice of records. The
//! `cache_budget` accumulator is a `Mutex<u64>` for the same reason — the
//! serial caller just happens to be the only thread touching it.

use std::io::Write;
use std::sync::Mutex;

use flate2::write::ZlibEncoder;
use flate2::Compression;

use crate::config::PackConfig;
use crate::delta::compute::compute_delta;
use crate::store::ObjectStore;
use crate::table::{ObjectTable, RecordId, RecordStore};
use crate::PackError;

/// A populated window slot: the record under consideration, its
/// decompressed payload, and whatever the record's own state says about its
/// current chain depth.
struct Slot {
    record: RecordId,
    data: Vec<u8>,
}

/// Bookkeeping shared across the window: tracks payload bytes currently
/// resident so `window_memory_limit` can be enforced.
struct Window {
    slots: Vec<Option<Slot>>,
    idx: usize,
    count: usize,
    mem_usage: u64,
    memory_limit: u64,
}

impl Window {
    fn new(capacity: usize, memory_limit: u64) -> Self {
        let mut slots = Vec::with_capacity(capacity);
        slots.resize_with(capacity, || None);
        Self {
            slots,
            idx: 0,
            count: 0,
            mem_usage: 0,
            memory_limit,
        }
    }

    fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Evict the slot at `idx`, crediting its bytes back to `mem_usage`.
    fn evict_at(&mut self, idx: usize) {
        if let Some(slot) = self.slots[idx].take() {
            self.mem_usage = self.mem_usage.saturating_sub(slot.data.len() as u64);
            self.count = self.count.saturating_sub(1);
        }
    }

    fn install(&mut self, idx: usize, slot: Slot) {
        self.mem_usage += slot.data.len() as u64;
        self.slots[idx] = Some(slot);
        self.count += 1;
    }

    /// Trim the oldest slots first while over budget and more than one slot
    /// remains populated.
    ///
    /// The oldest slot is the one just ahead of the cursor (the next the
    /// cursor will overwrite); each eviction advances the victim one step
    /// closer to the cursor, so a single call can drop as many trailing
    /// slots as needed rather than only ever the first one.
    fn trim_to_budget(&mut self) {
        if self.memory_limit == 0 {
            return;
        }
        let cap = self.capacity();
        let mut victim = (self.idx + 1) % cap;
        while self.mem_usage > self.memory_limit && self.count > 1 {
            if self.slots[victim].is_some() {
                self.evict_at(victim);
            }
            if victim == self.idx {
                break;
            }
            victim = (victim + 1) % cap;
        }
    }

    /// Scan order most-recent-first, starting just behind the cursor.
    fn scan_order(&self) -> Vec<usize> {
        let cap = self.capacity();
        (1..cap).map(|step| (self.idx + cap - step) % cap).collect()
    }
}

/// Run the delta search over `candidates` in order, mutating `table` with
/// the chosen delta linkage for each record that found a base.
///
/// `cache_budget` is the running total of bytes currently cached across
/// every record this search can see, shared via a mutex so the parallel
/// driver's workers can all account against the same global limit.
pub fn run_delta_search<T: RecordStore>(
    table: &mut T,
    candidates: &[RecordId],
    store: &dyn ObjectStore,
    config: &PackConfig,
    cache_budget: &Mutex<u64>,
) -> Result<(), PackError> {
    let capacity = config.window + 1;
    let mut window = Window::new(capacity, config.window_memory_limit);

    for &po in candidates {
        window.evict_at(window.idx);

        let po_size = table.get(po).size;
        let po_kind = table.get(po).kind;
        let data = read_payload(store, table, po)?;
        window.install(window.idx, Slot { record: po, data });
        window.trim_to_budget();

        let depth_limit = check_delta_limit(table, po);
        let max_depth = config.max_depth as i64 - depth_limit as i64;
        if max_depth <= 0 {
            window.idx = (window.idx + 1) % window.capacity();
            continue;
        }
        let max_depth = max_depth as usize;

        let mut best_base: Option<usize> = None;
        for m_idx in window.scan_order() {
            let m_record = match &window.slots[m_idx] {
                Some(slot) => slot.record,
                None => continue,
            };
            if m_record == po {
                continue;
            }
            let outcome = try_delta(
                table,
                &window,
                po,
                po_kind,
                po_size,
                m_idx,
                m_record,
                max_depth,
                config,
                cache_budget,
            )?;
            match outcome {
                TryDeltaOutcome::DifferentKindOrTooDeep => break,
                TryDeltaOutcome::NoImprovement => continue,
                TryDeltaOutcome::Accepted => {
                    best_base = Some(m_idx);
                }
            }
        }

        if let Some(base_idx) = best_base {
            precompress_cached_delta(table, po, cache_budget);

            let record = table.get(po);
            if record.depth >= max_depth {
                window.evict_at(window.idx);
            } else {
                rotate_base_after_cursor(&mut window, base_idx);
            }
        }

        window.idx = (window.idx + 1) % window.capacity();
    }

    Ok(())
}

/// Depth of `record`'s deepest existing delta-child subtree (0 = itself).
///
/// Only sees linkage within `table`'s own records. When `table` is a
/// per-segment shard this is a deliberate narrowing: a delta child living in
/// another worker's segment cannot be observed here. Relinking only ever
/// happens in [`crate::write_order`] between search passes, so at search
/// time every record a segment can delta against already lives in that same
/// segment — see the parallel driver's module docs.
fn check_delta_limit<T: RecordStore>(table: &T, record: RecordId) -> usize {
    let mut depth = 0;
    let mut child = table.get(record).delta_child;
    while let Some(c) = child {
        depth = depth.max(1 + check_delta_limit(table, c));
        child = table.get(c).delta_sibling;
    }
    depth
}

enum TryDeltaOutcome {
    DifferentKindOrTooDeep,
    NoImprovement,
    Accepted,
}

#[allow(clippy::too_many_arguments)]
fn try_delta<T: RecordStore>(
    table: &mut T,
    window: &Window,
    n: RecordId,
    n_kind: git_object::ObjectType,
    n_size: usize,
    m_idx: usize,
    m: RecordId,
    max_depth: usize,
    config: &PackConfig,
    cache_budget: &Mutex<u64>,
) -> Result<TryDeltaOutcome, PackError> {
    let m_kind = table.get(m).kind;
    if n_kind != m_kind {
        return Ok(TryDeltaOutcome::DifferentKindOrTooDeep);
    }
    let m_depth = table.get(m).depth;
    if m_depth >= max_depth {
        return Ok(TryDeltaOutcome::NoImprovement);
    }

    let n_has_base = table.get(n).delta_base.is_some();
    let (base_size, ref_depth) = if !n_has_base {
        (n_size.saturating_div(2).saturating_sub(20) as u64, 1u64)
    } else {
        (table.get(n).delta_size as u64, table.get(n).depth as u64)
    };

    let denom = (max_depth as u64 + 1).saturating_sub(ref_depth).max(1);
    let numer = (max_depth as u64).saturating_sub(m_depth as u64);
    let max_size = base_size.saturating_mul(numer) / denom;
    if max_size == 0 {
        return Ok(TryDeltaOutcome::NoImprovement);
    }

    let m_size = table.get(m).size;
    if m_size < n_size && (n_size - m_size) as u64 >= max_size {
        return Ok(TryDeltaOutcome::NoImprovement);
    }
    if (n_size as u64) < (m_size as u64) / 32 {
        return Ok(TryDeltaOutcome::NoImprovement);
    }

    let source = match &window.slots[m_idx] {
        Some(slot) => &slot.data,
        None => return Ok(TryDeltaOutcome::NoImprovement),
    };
    let target = {
        // The target (`n`) is always the slot most recently installed at
        // `window.idx`; find it directly rather than re-reading the store.
        let mut found = None;
        for slot in window.slots.iter().flatten() {
            if slot.record == n {
                found = Some(&slot.data);
                break;
            }
        }
        match found {
            Some(d) => d,
            None => return Ok(TryDeltaOutcome::NoImprovement),
        }
    };

    let delta = compute_delta(source, target);
    if delta.len() as u64 > max_size {
        return Ok(TryDeltaOutcome::NoImprovement);
    }
    let delta_size = delta.len();

    if n_has_base {
        let current_size = table.get(n).delta_size;
        let current_depth = table.get(n).depth;
        let strictly_smaller = delta_size < current_size;
        let equal_and_shallower = delta_size == current_size && m_depth + 1 < current_depth;
        if !(strictly_smaller || equal_and_shallower) {
            return Ok(TryDeltaOutcome::NoImprovement);
        }
    }

    // Drop any previously cached delta for n.
    {
        let record = table.get_mut(n);
        if let Some(old) = record.delta_data.take() {
            let charged = if record.z_delta_size > 0 {
                record.z_delta_size as u64
            } else {
                old.len() as u64
            };
            let mut budget = cache_budget.lock().expect("cache budget mutex poisoned");
            *budget = budget.saturating_sub(charged);
            record.z_delta_size = 0;
        }
    }

    let should_cache = {
        let budget = cache_budget.lock().expect("cache budget mutex poisoned");
        *budget + delta_size as u64 <= config.max_delta_cache_size
            && (delta_size as u64 <= config.cache_max_small_delta_size
                || (source.len() as u64 >> 20) + (target.len() as u64 >> 21)
                    > (delta_size as u64 >> 10))
    };

    let record = table.get_mut(n);
    record.delta_base = Some(m);
    record.delta_size = delta_size;
    record.depth = m_depth + 1;
    if should_cache {
        let mut budget = cache_budget.lock().expect("cache budget mutex poisoned");
        *budget += delta_size as u64;
        record.delta_data = Some(delta);
    } else {
        record.delta_data = None;
    }

    Ok(TryDeltaOutcome::Accepted)
}

/// If `po` just became a delta and its delta bytes were cached, compress
/// them now and replace the cached buffer with the compressed form,
/// crediting the size difference back to `cache_budget`. Amortizing this
/// into the search phase means the parallel driver's workers do the
/// compression work instead of the single-threaded writer.
fn precompress_cached_delta<T: RecordStore>(table: &mut T, po: RecordId, cache_budget: &Mutex<u64>) {
    let record = table.get_mut(po);
    let Some(raw) = record.delta_data.take() else {
        return;
    };
    if record.z_delta_size > 0 {
        // Already compressed (shouldn't happen on a fresh accept, but stay
        // idempotent).
        record.delta_data = Some(raw);
        return;
    }

    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
    let compressed = match encoder.write_all(&raw).and_then(|_| encoder.finish()) {
        Ok(bytes) => bytes,
        Err(_) => {
            // Compression failed (out of memory, most likely): fall back to
            // discarding the cache entry rather than caching raw bytes the
            // writer would have to re-deflate anyway.
            let mut budget = cache_budget.lock().expect("cache budget mutex poisoned");
            *budget = budget.saturating_sub(raw.len() as u64);
            record.z_delta_size = 0;
            return;
        }
    };

    {
        let mut budget = cache_budget.lock().expect("cache budget mutex poisoned");
        *budget = budget.saturating_sub(raw.len() as u64);
        *budget += compressed.len() as u64;
    }
    record.z_delta_size = compressed.len();
    record.delta_data = Some(compressed);
}

fn read_payload<T: RecordStore>(
    store: &dyn ObjectStore,
    table: &T,
    record: RecordId,
) -> Result<Vec<u8>, PackError> {
    let rec = table.get(record);
    let obj = store.read(&rec.id)?;
    if obj.data.len() != rec.size {
        return Err(PackError::Invariant(format!(
            "object {} size changed between metadata ({}) and read ({})",
            rec.id,
            rec.size,
            obj.data.len()
        )));
    }
    Ok(obj.data)
}

/// Move the slot at `base_idx` to sit immediately after the cursor in the
/// circular scan order, so it is the first candidate examined on the next
/// draw. A swap is sufficient since scan order only depends on position
/// relative to `idx`.
fn rotate_base_after_cursor(window: &mut Window, base_idx: usize) {
    let target_idx = (window.idx + 1) % window.capacity();
    if target_idx == base_idx {
        return;
    }
    window.slots.swap(target_idx, base_idx);
}

/// Convenience wrapper for callers that don't need to share the budget
/// across threads: runs the search against a plain [`ObjectTable`] starting
/// from an empty cache, and returns the final tally.
pub fn run_delta_search_serial(
    table: &mut ObjectTable,
    candidates: &[RecordId],
    store: &dyn ObjectStore,
    config: &PackConfig,
) -> Result<u64, PackError> {
    let budget = Mutex::new(0u64);
    run_delta_search(table, candidates, store, config, &budget)?;
    Ok(*budget.lock().expect("cache budget mutex poisoned"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use git_object::ObjectType;

    fn setup(objects: &[&[u8]]) -> (MemoryStore, ObjectTable, Vec<RecordId>) {
        let mut store = MemoryStore::new();
        let mut table = ObjectTable::new();
        let mut ids = Vec::new();
        for (i, bytes) in objects.iter().enumerate() {
            let id = store.put(ObjectType::Blob, bytes.to_vec()).unwrap();
            let (rid, _) = table.insert(id, ObjectType::Blob, bytes.len(), i as u32);
            ids.push(rid);
        }
        (store, table, ids)
    }

    #[test]
    fn near_identical_blobs_produce_a_delta() {
        let mut base = vec![b'x'; 1024];
        let mut changed = base.clone();
        changed[10] = b'!';
        changed[500] = b'?';
        changed[900] = b'#';
        changed[1000] = b'@';

        let (store, mut table, ids) = setup(&[&base, &changed]);
        let config = PackConfig {
            window: 4,
            max_depth: 10,
            ..PackConfig::default()
        };
        run_delta_search_serial(&mut table, &ids, &store, &config).unwrap();

        let has_delta = ids.iter().any(|&id| table.get(id).delta_base.is_some());
        assert!(has_delta, "expected one of the two near-identical blobs to become a delta");
    }

    #[test]
    fn unrelated_objects_stay_undelta_ed() {
        let a = vec![1u8; 200];
        let b = vec![2u8; 200];
        let (store, mut table, ids) = setup(&[&a, &b]);
        let config = PackConfig {
            window: 4,
            max_depth: 10,
            ..PackConfig::default()
        };
        run_delta_search_serial(&mut table, &ids, &store, &config).unwrap();
        for &id in &ids {
            assert!(table.get(id).delta_base.is_none());
        }
    }

    #[test]
    fn depth_ceiling_is_respected() {
        // Build a chain of near-identical blobs; with max_depth=1 no record
        // should ever reach a depth greater than 1.
        let mut blobs = Vec::new();
        let mut buf = vec![b'a'; 300];
        blobs.push(buf.clone());
        for i in 0..4 {
            buf[i] = b'b';
            blobs.push(buf.clone());
        }
        let refs: Vec<&[u8]> = blobs.iter().map(|b| b.as_slice()).collect();
        let (store, mut table, ids) = setup(&refs);
        let config = PackConfig {
            window: 4,
            max_depth: 1,
            ..PackConfig::default()
        };
        run_delta_search_serial(&mut table, &ids, &store, &config).unwrap();
        for &id in &ids {
            assert!(table.get(id).depth <= 1);
        }
    }

    #[test]
    fn cache_budget_never_exceeds_configured_maximum() {
        let mut blobs = Vec::new();
        let mut buf = vec![b'z'; 600];
        for i in 0..6 {
            buf[i % buf.len()] = b'y';
            blobs.push(buf.clone());
        }
        let refs: Vec<&[u8]> = blobs.iter().map(|b| b.as_slice()).collect();
        let (store, mut table, ids) = setup(&refs);
        let config = PackConfig {
            window: 4,
            max_depth: 10,
            max_delta_cache_size: 100,
            ..PackConfig::default()
        };
        let used = run_delta_search_serial(&mut table, &ids, &store, &config).unwrap();
        assert!(used <= config.max_delta_cache_size);
        let sum: u64 = ids.iter().map(|&id| table.get(id).cached_delta_bytes() as u64).sum();
        assert!(sum <= config.max_delta_cache_size);
    }

    #[test]
    fn trim_to_budget_evicts_every_slot_needed_in_one_pass() {
        let mut window = Window::new(5, 100);
        window.idx = 0;
        for i in 1..5 {
            window.install(i, Slot { record: i, data: vec![0u8; 40] });
        }
        // 4 slots * 40 bytes = 160, well over the 100-byte limit; a single
        // trim call must drop enough slots to get back under budget rather
        // than stopping after the first eviction.
        window.trim_to_budget();
        assert!(window.mem_usage <= window.memory_limit);
        assert_eq!(window.count, 2, "expected two evictions in a single trim pass");
        assert_eq!(window.mem_usage, 80);
    }
}
