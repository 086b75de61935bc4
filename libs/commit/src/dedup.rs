//! Last-write-wins deduplication of one optimizer run.

use std::collections::hash_map::Entry;
use std::collections::HashMap;

use crate::model::{IndexedCandidate, NaturalKey};

/// Deduplicated candidates, ordered by each survivor's original index.
#[derive(Debug, Default)]
pub struct Deduplicated {
    pub survivors: Vec<IndexedCandidate>,
    pub duplicates_removed: usize,
}

/// Collapses `candidates` to one entry per natural key.
///
/// For every key the survivor is the candidate with the greatest original
/// index. Pure: depends on nothing but its input.
pub fn deduplicate<I>(candidates: I) -> Deduplicated
where
    I: IntoIterator<Item = IndexedCandidate>,
{
    let mut by_key: HashMap<NaturalKey, IndexedCandidate> = HashMap::new();
    let mut seen = 0usize;

    for incoming in candidates {
        seen += 1;
        match by_key.entry(incoming.candidate.key()) {
            Entry::Vacant(slot) => {
                slot.insert(incoming);
            }
            Entry::Occupied(mut slot) => {
                if incoming.index >= slot.get().index {
                    slot.insert(incoming);
                }
            }
        }
    }

    let mut survivors: Vec<IndexedCandidate> = by_key.into_values().collect();
    survivors.sort_by_key(|c| c.index);

    Deduplicated {
        duplicates_removed: seen - survivors.len(),
        survivors,
    }
}
