use std::collections::HashMap;

use crate::model::{ChangedItem, Diff, Item, Snapshot};

/// Compare two snapshots keyed on item id.
///
/// - `added`: ids in `current` absent from `previous` (current order)
/// - `removed`: ids in `previous` absent from `current` (previous order)
/// - `changed`: ids in both whose title or date differs (current order)
///
/// Unchanged items are omitted, so an identical pair yields an empty diff.
pub fn diff(previous: &Snapshot, current: &Snapshot) -> Diff {
    let prev_by_id: HashMap<&str, &Item> =
        previous.items.iter().map(|i| (i.id.as_str(), i)).collect();
    let curr_by_id: HashMap<&str, &Item> =
        current.items.iter().map(|i| (i.id.as_str(), i)).collect();

    let added = current
        .items
        .iter()
        .filter(|i| !prev_by_id.contains_key(i.id.as_str()))
        .cloned()
        .collect();

    let removed = previous
        .items
        .iter()
        .filter(|i| !curr_by_id.contains_key(i.id.as_str()))
        .cloned()
        .collect();

    let changed = current
        .items
        .iter()
        .filter_map(|now| {
            let before = prev_by_id.get(now.id.as_str())?;
            if before.title == now.title && before.date == now.date {
                return None;
            }
            Some(ChangedItem {
                id: now.id.clone(),
                before: before.attrs(),
                after: now.attrs(),
            })
        })
        .collect();

    Diff {
        added,
        removed,
        changed,
    }
}
