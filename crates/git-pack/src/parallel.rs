//! The parallel delta-search driver (§4.4): partition candidates into
//! segments, search each on its own worker, and rebalance load by handing
//! idle workers more of the queue rather than by splitting an already
//! in-flight segment.
//!
//! The reference algorithm this is modeled on lets every worker mutate a
//! single shared table directly, proving disjointness by construction (each
//! segment owns a contiguous, non-overlapping slice of records) rather than
//! by the type system. Rust has no way to express "these slices of one `Vec`
//! are disjoint" without `unsafe`, so instead each segment gets its own
//! [`Shard`]: an owned clone of just the records that segment's search can
//! see. Workers run [`crate::search::run_delta_search`] — unmodified —
//! against their shard, and the shards are merged back into the real
//! [`ObjectTable`] after every worker has finished.
//!
//! One consequence of the shard split: [`crate::search::check_delta_limit`]
//! only ever sees delta-child linkage within the current shard. That
//! linkage is only populated between write passes (by
//! [`crate::write_order::plan_write_order`]'s `relink_forest`, which runs
//! against the merged table, not a shard), so at search time it is always
//! empty for a freshly-built set of records and this narrowing has no
//! observable effect. It would only matter if a future caller tried to
//! re-run search on a table that had already been written once without an
//! intervening `reset_scratch` — which `plan_write_order` always performs.
//!
//! Work distribution is also a deliberate simplification: rather than a
//! live "steal half the busiest worker's remainder" protocol, the candidate
//! list is cut into more, smaller segments than there are workers and
//! pushed onto one shared queue; a worker that finishes its segment early
//! simply pulls the next one. With segments several times smaller than
//! `candidates.len() / worker_count`, this converges to the same outcome
//! (idle workers end up doing more total segments) without needing to
//! observe or preempt another thread's in-progress slice.

use std::collections::VecDeque;
use std::sync::Mutex;

use crate::config::PackConfig;
use crate::search::run_delta_search;
use crate::store::ObjectStore;
use crate::table::{ObjectTable, Record, RecordId, RecordStore};
use crate::PackError;

/// An owned, per-segment view of just the records a worker's search needs
/// to touch. Keyed by the same [`RecordId`]s the caller's candidate list
/// uses, via a local index rather than a shared one.
struct Shard {
    ids: Vec<RecordId>,
    records: Vec<Record>,
}

impl Shard {
    fn build(table: &ObjectTable, segment: &[RecordId]) -> Self {
        let mut ids = Vec::with_capacity(segment.len());
        let mut records = Vec::with_capacity(segment.len());
        for &id in segment {
            ids.push(id);
            records.push(table.get(id).clone());
        }
        Self { ids, records }
    }

    fn local(&self, id: RecordId) -> usize {
        self.ids
            .iter()
            .position(|&i| i == id)
            .expect("record id not present in this shard")
    }

    /// Write every record this shard touched back into `table`.
    fn merge_into(self, table: &mut ObjectTable) {
        for (id, record) in self.ids.into_iter().zip(self.records.into_iter()) {
            *table.get_mut(id) = record;
        }
    }
}

impl RecordStore for Shard {
    fn get(&self, id: RecordId) -> &Record {
        &self.records[self.local(id)]
    }

    fn get_mut(&mut self, id: RecordId) -> &mut Record {
        let idx = self.local(id);
        &mut self.records[idx]
    }
}

/// Split `candidates` into segments sized so there are several per worker,
/// folding any segment shorter than `2 * (window + 1)` into its successor
/// (too short a segment is not worth the thread dispatch and starves the
/// window of lookback candidates), and extending each cut point forward
/// past any run of records that share a `name_hash` so related objects
/// never end up split across a worker boundary.
fn build_segments(table: &ObjectTable, candidates: &[RecordId], worker_count: usize, window: usize) -> VecDeque<Vec<RecordId>> {
    const SEGMENTS_PER_WORKER: usize = 4;
    let total = candidates.len();
    let target_segments = (worker_count * SEGMENTS_PER_WORKER).min(total.max(1));
    let min_len = 2 * (window + 1);

    let mut cuts = Vec::new();
    let mut pos = 0usize;
    let mut segments_left = target_segments;
    while pos < total && segments_left > 0 {
        let remaining = total - pos;
        let share = (remaining / segments_left).max(1);
        let mut end = (pos + share).min(total);
        end = extend_to_hash_boundary(table, candidates, end);
        cuts.push(end);
        pos = end;
        segments_left -= 1;
    }
    if let Some(last) = cuts.last_mut() {
        *last = total;
    } else {
        cuts.push(total);
    }

    let mut segments: VecDeque<Vec<RecordId>> = VecDeque::new();
    let mut start = 0usize;
    for &end in &cuts {
        if end <= start {
            continue;
        }
        segments.push_back(candidates[start..end].to_vec());
        start = end;
    }

    // Fold undersized segments forward into their successor so every
    // dispatched segment gives its worker a full window's worth of
    // lookback, matching the window-capacity floor used by the serial path.
    let mut folded: VecDeque<Vec<RecordId>> = VecDeque::new();
    while let Some(mut seg) = segments.pop_front() {
        while seg.len() < min_len {
            match segments.pop_front() {
                Some(next) => seg.extend(next),
                None => break,
            }
        }
        folded.push_back(seg);
    }
    // The very last segment may still be short if the whole candidate list
    // is; fold it back into the previous one rather than leave a starved
    // worker with no lookback at all.
    if folded.len() > 1 {
        if let Some(last) = folded.pop_back() {
            if last.len() < min_len {
                let prev = folded.back_mut().expect("folded has at least one segment");
                prev.extend(last);
            } else {
                folded.push_back(last);
            }
        }
    }

    folded
}

fn extend_to_hash_boundary(table: &ObjectTable, candidates: &[RecordId], idx: usize) -> usize {
    if idx == 0 || idx >= candidates.len() {
        return idx;
    }
    let boundary_hash = table.get(candidates[idx - 1]).name_hash;
    let mut idx = idx;
    while idx < candidates.len() && table.get(candidates[idx]).name_hash == boundary_hash {
        idx += 1;
    }
    idx
}

/// Run the delta search across `worker_count` threads, merging every
/// worker's results back into `table` once all have finished.
///
/// Every worker thread reads through the same `store` reference
/// concurrently, which is sound because [`ObjectStore`] requires `Sync`.
/// Falls back to the serial path (see
/// [`crate::search::run_delta_search_serial`]) when there is only one
/// worker or too few candidates to make splitting worthwhile.
pub fn run_parallel_search(
    table: &mut ObjectTable,
    candidates: &[RecordId],
    store: &dyn ObjectStore,
    config: &PackConfig,
) -> Result<u64, PackError> {
    let worker_count = config.resolved_worker_count().max(1);
    let min_len = 2 * (config.window + 1);
    if worker_count <= 1 || candidates.len() < min_len {
        let budget = Mutex::new(0u64);
        run_delta_search(table, candidates, store, config, &budget)?;
        return Ok(*budget.lock().expect("cache budget mutex poisoned"));
    }

    let queue: Mutex<VecDeque<Vec<RecordId>>> =
        Mutex::new(build_segments(table, candidates, worker_count, config.window));
    let cache_budget: Mutex<u64> = Mutex::new(0);
    let results: Mutex<Vec<Result<Shard, PackError>>> = Mutex::new(Vec::new());

    let table_ref: &ObjectTable = table;
    std::thread::scope(|scope| {
        for _ in 0..worker_count {
            let queue = &queue;
            let cache_budget = &cache_budget;
            let results = &results;
            scope.spawn(move || loop {
                let segment = {
                    let mut q = queue.lock().expect("segment queue mutex poisoned");
                    q.pop_front()
                };
                let Some(segment) = segment else {
                    break;
                };
                let mut shard = Shard::build(table_ref, &segment);
                let outcome = run_delta_search(&mut shard, &segment, store, config, cache_budget)
                    .map(|_| shard);
                results
                    .lock()
                    .expect("results mutex poisoned")
                    .push(outcome);
            });
        }
    });

    let outcomes = results.into_inner().expect("results mutex poisoned");
    for outcome in outcomes {
        outcome?.merge_into(table);
    }

    Ok(*cache_budget.lock().expect("cache budget mutex poisoned"))
}
