//! Top-K operator (§4.6).
//!
//! Per `(window, outerKey)`, selects the K largest entries by total bytes,
//! breaking ties deterministically so the result does not depend on
//! combine/merge order (invariant 6).

use std::cmp::Ordering;
use std::collections::BinaryHeap;

use crate::bytes::BytesInOut;
use crate::key::CompoundKey;

/// Wraps `(key, bytes)` with the §4.6 comparator: primary total bytes
/// descending, secondary `bytes_in` descending, tertiary encoded key
/// ascending. `Ord` is defined so the natural (ascending) order ranks the
/// *worst* entry first — this lets a `BinaryHeap<Entry>` act as a bounded
/// min-heap of the current top-K, per the §4.6 memory bound.
#[derive(Debug, Clone)]
struct Entry {
    key: CompoundKey,
    bytes: BytesInOut,
}

impl PartialEq for Entry {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}
impl Eq for Entry {}

impl PartialOrd for Entry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Entry {
    /// Ascending-rank order: smallest (worst) entry compares least.
    fn cmp(&self, other: &Self) -> Ordering {
        self_rank(self)
            .cmp(&self_rank(other))
            .then_with(|| other.key.cmp(&self.key)) // tertiary is ascending on key, so reverse here
    }
}

/// `(total, bytes_in)` descending maps to an ascending tuple by negation is
/// not available for unsigned ints, so rank as a tuple compared directly and
/// let the caller reverse as needed.
fn self_rank(e: &Entry) -> (u64, u64) {
    (e.bytes.total(), e.bytes.bytes_in)
}

/// Bounded min-heap of size `k` tracking the current top-K for one
/// `(window, outerKey)` partition. `push` is the only mutator; call
/// `into_sorted` once the partition is complete.
pub struct TopK {
    k: usize,
    heap: BinaryHeap<std::cmp::Reverse<Entry>>,
}

impl TopK {
    pub fn new(k: usize) -> Self {
        TopK {
            k,
            heap: BinaryHeap::with_capacity(k.max(1)),
        }
    }

    pub fn push(&mut self, key: CompoundKey, bytes: BytesInOut) {
        if self.k == 0 {
            return;
        }
        let candidate = Entry { key, bytes };
        if self.heap.len() < self.k {
            self.heap.push(std::cmp::Reverse(candidate));
            return;
        }
        let should_replace = match self.heap.peek() {
            Some(std::cmp::Reverse(worst)) => candidate.cmp(worst) == Ordering::Greater,
            None => true,
        };
        if should_replace {
            self.heap.pop();
            self.heap.push(std::cmp::Reverse(candidate));
        }
    }

    /// Consume the heap, returning up to `k` `(key, bytes)` pairs sorted by
    /// the §4.6 comparator, best first.
    pub fn into_sorted(self) -> Vec<(CompoundKey, BytesInOut)> {
        let mut entries: Vec<Entry> = self.heap.into_iter().map(|std::cmp::Reverse(e)| e).collect();
        entries.sort_by(|a, b| b.cmp(a));
        entries.into_iter().map(|e| (e.key, e.bytes)).collect()
    }
}

/// Compute the top-K over a full in-memory set of `(key, bytes)` pairs —
/// convenience wrapper for pane firings, where the whole partition is
/// already materialised in the accumulator map.
pub fn compute_topk(entries: impl IntoIterator<Item = (CompoundKey, BytesInOut)>, k: usize) -> Vec<(CompoundKey, BytesInOut)> {
    let mut topk = TopK::new(k);
    for (key, bytes) in entries {
        topk.push(key, bytes);
    }
    topk.into_sorted()
}
