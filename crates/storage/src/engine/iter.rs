//! Snapshot-isolated iteration
//!
//! An iterator copies the admitted pairs while the caller holds the gate
//! exclusively, so it reflects one instant: writes made after `iterate`
//! returns are never observed, and closing the store does not invalidate an
//! iterator already handed out. Writers wait for the copy only; sorting into
//! ascending key order happens after the gate is released.

use strand_core::{is_expired, IterationOptions, KvIterator, KvPair, Result};

use super::types::MemStore;

pub(super) struct MaterializedIter {
    pairs: std::vec::IntoIter<KvPair>,
}

impl Iterator for MaterializedIter {
    type Item = Result<KvPair>;

    fn next(&mut self) -> Option<Self::Item> {
        self.pairs.next().map(Ok)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.pairs.size_hint()
    }
}

impl ExactSizeIterator for MaterializedIter {}

/// Copy every live pair admitted by `options`. Callers hold the gate
/// exclusively; ordering is left to [`into_iterator`].
pub(super) fn collect_admitted(store: &MemStore, options: &IterationOptions) -> Vec<KvPair> {
    let now = store.clock.epoch_seconds();
    store
        .data
        .iter()
        .filter(|entry| options.admits(entry.key()) && !is_expired(entry.expire_ts, now))
        .map(|entry| KvPair {
            key: entry.key().clone(),
            value: entry.value.clone(),
            expire_ts: entry.expire_ts,
        })
        .collect()
}

/// Sort a captured range into an iterator. Runs after the gate is released.
pub(super) fn into_iterator(mut pairs: Vec<KvPair>) -> KvIterator {
    pairs.sort_unstable_by(|a, b| a.key.cmp(&b.key));

    tracing::debug!(count = pairs.len(), "Materialized iterator");
    Box::new(MaterializedIter {
        pairs: pairs.into_iter(),
    })
}
