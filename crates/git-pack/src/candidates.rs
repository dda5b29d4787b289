//! Candidate selection and ordering for the delta search (§4.2 of the
//! object-details/candidate-selection design).

use git_object::ObjectType;

use crate::table::{ObjectTable, RecordId};

/// Objects below this size are never worth delta-encoding.
pub const MIN_DELTA_CANDIDATE_SIZE: usize = 50;

/// Mark every record's `no_try_delta` flag from its size and the configured
/// big-file threshold.
pub fn compute_object_details(table: &mut ObjectTable, big_file_threshold: u64) {
    for id in table.ids() {
        let record = table.get_mut(id);
        record.no_try_delta = record.size as u64 > big_file_threshold;
    }
}

/// Build the ordered candidate list: every record at or above the minimum
/// delta size and not excluded as too big, sorted by (kind desc, name_hash
/// desc, size desc, insertion-order desc).
///
/// Kind grouping keeps delta search from ever crossing object kinds (a
/// wasted comparison since [`crate::search::try_delta`] rejects it anyway);
/// the name-hash/size/recency ordering is what clusters related paths and
/// prefers larger, newer objects as bases early in the sliding window.
pub fn build_candidate_list(table: &ObjectTable) -> Vec<RecordId> {
    let mut candidates: Vec<RecordId> = table
        .ids()
        .filter(|&id| {
            let record = table.get(id);
            record.size >= MIN_DELTA_CANDIDATE_SIZE && !record.no_try_delta
        })
        .collect();

    candidates.sort_by(|&a, &b| {
        let ra = table.get(a);
        let rb = table.get(b);
        kind_rank(rb.kind)
            .cmp(&kind_rank(ra.kind))
            .then(rb.name_hash.cmp(&ra.name_hash))
            .then(rb.size.cmp(&ra.size))
            .then(b.cmp(&a))
    });

    candidates
}

/// Stable numeric ordering used for the "kind descending" sort key.
/// The specific values only matter relative to each other.
fn kind_rank(kind: ObjectType) -> u8 {
    match kind {
        ObjectType::Tag => 3,
        ObjectType::Commit => 2,
        ObjectType::Tree => 1,
        ObjectType::Blob => 0,
    }
}
