//! Write-order planning (§4.5): lay out every record so bases precede their
//! deltas, tagged tips come first, and related objects stay close together.

use std::collections::HashSet;

use git_hash::ObjectId;
use git_object::ObjectType;

use crate::table::{ObjectTable, RecordId};
use crate::PackError;

/// Compute the emission order for every record currently in `table`.
///
/// `tagged_tips` enumerates the ids the external tag-tip collaborator
/// reports as annotated-tag targets; peeling through multiple tag layers is
/// not performed here (see the crate's design notes).
pub fn plan_write_order(
    table: &mut ObjectTable,
    tagged_tips: &HashSet<ObjectId>,
) -> Result<Vec<RecordId>, PackError> {
    for id in table.ids() {
        table.get_mut(id).reset_scratch();
    }
    relink_forest(table);
    for id in table.ids() {
        if tagged_tips.contains(&table.get(id).id) {
            table.get_mut(id).tagged = true;
        }
    }

    let mut order = Vec::with_capacity(table.len());
    let mut filled = vec![false; table.len()];

    // 1. Original insertion order up to the first tagged record.
    let mut first_tagged = None;
    for id in table.ids() {
        if table.get(id).tagged {
            first_tagged = Some(id);
            break;
        }
        push(&mut order, &mut filled, id);
    }

    // 2. All tagged records, in insertion order, from wherever they sit.
    if first_tagged.is_some() {
        for id in table.ids() {
            if table.get(id).tagged {
                push(&mut order, &mut filled, id);
            }
        }
    }

    // 3. Remaining commits and tags, in insertion order.
    for id in table.ids() {
        if filled[id] {
            continue;
        }
        let kind = table.get(id).kind;
        if matches!(kind, ObjectType::Commit | ObjectType::Tag) {
            push(&mut order, &mut filled, id);
        }
    }

    // 4. Remaining trees, in insertion order.
    for id in table.ids() {
        if filled[id] {
            continue;
        }
        if table.get(id).kind == ObjectType::Tree {
            push(&mut order, &mut filled, id);
        }
    }

    // 5. Everything else, visited as delta families.
    for id in table.ids() {
        if filled[id] {
            continue;
        }
        let root = delta_root(table, id);
        add_descendants_to_write_order(table, root, &mut order, &mut filled);
    }

    if order.len() != table.len() {
        return Err(PackError::Invariant(
            "invalid write order: emitted count does not match object table size".into(),
        ));
    }

    Ok(order)
}

fn push(order: &mut Vec<RecordId>, filled: &mut [bool], id: RecordId) {
    if !filled[id] {
        filled[id] = true;
        order.push(id);
    }
}

/// Re-link the child/sibling forest from each record's `delta_base`.
///
/// Iterating in reverse insertion order and prepending to the base's child
/// list means a forward walk of a child list yields original recency order.
fn relink_forest(table: &mut ObjectTable) {
    let ids: Vec<RecordId> = table.ids().collect();
    for &id in ids.iter().rev() {
        if let Some(base) = table.get(id).delta_base {
            let prior_head = table.get(base).delta_child;
            table.get_mut(id).delta_sibling = prior_head;
            table.get_mut(base).delta_child = Some(id);
        }
    }
}

/// Climb to the highest ancestor with no delta base.
fn delta_root(table: &ObjectTable, mut id: RecordId) -> RecordId {
    while let Some(base) = table.get(id).delta_base {
        id = base;
    }
    id
}

/// Depth-first visit of `root`'s delta family: the node, then each of its
/// siblings, before descending into its first child — implemented
/// iteratively with an explicit parent-backtrack stack to avoid recursion
/// depth bounded only by chain length.
fn add_descendants_to_write_order(
    table: &ObjectTable,
    root: RecordId,
    order: &mut Vec<RecordId>,
    filled: &mut [bool],
) {
    let mut stack = vec![root];
    while let Some(node) = stack.pop() {
        if filled[node] {
            continue;
        }
        filled[node] = true;
        order.push(node);

        if let Some(sibling) = table.get(node).delta_sibling {
            stack.push(sibling);
        }
        if let Some(child) = table.get(node).delta_child {
            stack.push(child);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use git_object::ObjectType;

    fn oid(byte: u8) -> ObjectId {
        let mut bytes = [0u8; 20];
        bytes[19] = byte;
        ObjectId::from_bytes(&bytes, git_hash::HashAlgorithm::Sha1).unwrap()
    }

    #[test]
    fn base_precedes_delta() {
        let mut table = ObjectTable::new();
        let (base, _) = table.insert(oid(1), ObjectType::Blob, 100, 0);
        let (child, _) = table.insert(oid(2), ObjectType::Blob, 100, 0);
        table.get_mut(child).delta_base = Some(base);

        let order = plan_write_order(&mut table, &HashSet::new()).unwrap();
        let base_pos = order.iter().position(|&r| r == base).unwrap();
        let child_pos = order.iter().position(|&r| r == child).unwrap();
        assert!(base_pos < child_pos);
    }

    #[test]
    fn coverage_matches_table_size() {
        let mut table = ObjectTable::new();
        for i in 0..5u8 {
            table.insert(oid(i), ObjectType::Blob, 100, 0);
        }
        let order = plan_write_order(&mut table, &HashSet::new()).unwrap();
        assert_eq!(order.len(), table.len());
        let unique: HashSet<_> = order.iter().collect();
        assert_eq!(unique.len(), order.len());
    }

    #[test]
    fn tagged_tip_ordering() {
        let mut table = ObjectTable::new();
        let (c1, _) = table.insert(oid(1), ObjectType::Commit, 100, 0);
        let (c2, _) = table.insert(oid(2), ObjectType::Commit, 100, 0);
        let (_t, _) = table.insert(oid(3), ObjectType::Tag, 100, 0);
        let (c3, _) = table.insert(oid(4), ObjectType::Commit, 100, 0);

        let mut tagged = HashSet::new();
        tagged.insert(table.get(c2).id);

        let order = plan_write_order(&mut table, &tagged).unwrap();
        // Untagged run stops at c2 (tagged): only c1 precedes it.
        assert_eq!(order[0], c1);
        assert_eq!(order[1], c2);
        // c3 and the tag follow among "remaining commits and tags".
        assert!(order.contains(&c3));
    }

    #[test]
    fn cyclic_delta_base_is_impossible_by_construction_but_family_visit_terminates() {
        let mut table = ObjectTable::new();
        let (a, _) = table.insert(oid(1), ObjectType::Blob, 100, 0);
        let (b, _) = table.insert(oid(2), ObjectType::Blob, 100, 0);
        table.get_mut(b).delta_base = Some(a);
        table.get_mut(a).delta_base = None;

        let order = plan_write_order(&mut table, &HashSet::new()).unwrap();
        assert_eq!(order.len(), 2);
    }
}
