//! The storage contract
//!
//! [`KvStore`] is the engine interface every backend implements. The
//! replication and backup roles are separate capability traits which an
//! engine opts into; callers discover them through the `as_*` capability
//! checks on [`KvStore`] or receive them bundled in a [`CapabilitySet`].

use crate::errors::{Error, Result};
use crate::types::{ChangeRecord, IterationOptions, KvPair, MemoryUsage};
use std::fmt;
use std::io::Read;
use std::path::Path;
use std::sync::Arc;

/// Lazy, finite cursor over key/value pairs.
///
/// Dropping the iterator releases everything it holds, so abandoning a
/// traversal early is always safe.
pub type KvIterator = Box<dyn Iterator<Item = Result<KvPair>> + Send>;

/// Readable byte stream holding a whole-keyspace snapshot
pub type SnapshotReader = Box<dyn Read + Send>;

/// The key value store that backs every strand node
pub trait KvStore: Send + Sync {
    /// Upsert every pair. Pairs may carry an expiry in epoch seconds.
    fn put(&self, pairs: Vec<KvPair>) -> Result<()>;

    /// Bulk fetch. Absent keys are omitted from the result. During partial
    /// failures any successful results are discarded and an error is
    /// returned instead.
    fn get(&self, keys: &[&[u8]]) -> Result<Vec<KvPair>>;

    /// Remove a key. Removing an absent key succeeds.
    fn delete(&self, key: &[u8]) -> Result<()>;

    /// Atomically replace the value of `key` with `update` when it currently
    /// equals `expect`. An `expect` of `None` means the key must not exist.
    /// A mismatch returns `Ok(false)`.
    fn compare_and_set(&self, key: &[u8], expect: Option<&[u8]>, update: &[u8]) -> Result<bool>;

    /// Point-in-time representation of the entire keyspace
    fn get_snapshot(&self) -> Result<SnapshotReader>;

    /// Replace the entire keyspace with the one read from `snapshot`
    fn put_snapshot(&self, snapshot: &mut dyn Read) -> Result<()>;

    /// Traverse keys admitted by `options` in no guaranteed order.
    ///
    /// Engines choose their own consistency policy. An engine may capture the
    /// admitted range up front, which briefly excludes writers, or stream it
    /// lazily; either way a fresh call restarts the traversal.
    fn iterate(&self, options: IterationOptions) -> Result<KvIterator>;

    fn memory_usage(&self) -> Result<MemoryUsage>;

    /// Release the underlying resources. Calling it again is a no-op.
    fn close(&self) -> Result<()>;

    /// Single-key convenience over [`KvStore::get`]
    fn get_one(&self, key: &[u8]) -> Result<Option<KvPair>> {
        let mut pairs = self.get(&[key])?;
        Ok(pairs.pop())
    }

    fn as_backupable(&self) -> Option<&dyn Backupable> {
        None
    }

    fn as_propagator(&self) -> Option<&dyn ChangePropagator> {
        None
    }

    fn as_applier(&self) -> Option<&dyn ChangeApplier> {
        None
    }
}

/// Filesystem backup and restore of a whole store
pub trait Backupable: Send + Sync {
    /// Write the entire state of the store under `path`
    fn backup_to(&self, path: &Path) -> Result<()>;

    /// Build a brand-new store from a backup previously written by the same
    /// implementation. The store this is called on is left untouched.
    fn restore_from(&self, path: &Path) -> Result<CapabilitySet>;
}

/// Primary role: exposes committed changes for replicas to pull
pub trait ChangePropagator: Send + Sync {
    fn get_latest_committed_change_number(&self) -> Result<u64>;

    /// Up to `max_changes` records numbered above `from_change_number`, in
    /// strictly increasing order with no gaps. Empty when caught up.
    fn load_changes(&self, from_change_number: u64, max_changes: usize)
        -> Result<Vec<ChangeRecord>>;
}

/// Replica role: applies a primary's change log locally.
///
/// Callers must serialize calls to [`ChangeApplier::save_changes`].
pub trait ChangeApplier: Send + Sync {
    fn get_latest_applied_change_number(&self) -> Result<u64>;

    /// Apply `changes` in order, stopping at the first record that fails.
    fn save_changes(&self, changes: &[ChangeRecord]) -> ApplyOutcome;
}

/// Result of [`ChangeApplier::save_changes`]
#[derive(Debug)]
pub struct ApplyOutcome {
    /// Change number of the last record applied, or the prior applied
    /// number if nothing in the batch was applied
    pub last_applied: u64,
    /// Error raised by the first record that could not be applied
    pub error: Option<Error>,
}

impl ApplyOutcome {
    pub fn applied(last_applied: u64) -> Self {
        Self {
            last_applied,
            error: None,
        }
    }

    pub fn halted(last_applied: u64, error: Error) -> Self {
        Self {
            last_applied,
            error: Some(error),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }

    pub fn into_result(self) -> Result<u64> {
        match self.error {
            None => Ok(self.last_applied),
            Some(e) => Err(e),
        }
    }
}

/// A store together with whichever optional capabilities it offers
#[derive(Clone)]
pub struct CapabilitySet {
    pub store: Arc<dyn KvStore>,
    pub backupable: Option<Arc<dyn Backupable>>,
    pub propagator: Option<Arc<dyn ChangePropagator>>,
    pub applier: Option<Arc<dyn ChangeApplier>>,
}

impl CapabilitySet {
    pub fn new(store: Arc<dyn KvStore>) -> Self {
        Self {
            store,
            backupable: None,
            propagator: None,
            applier: None,
        }
    }

    /// Bundle an engine that implements every capability
    pub fn from_engine<E>(engine: Arc<E>) -> Self
    where
        E: KvStore + Backupable + ChangePropagator + ChangeApplier + 'static,
    {
        Self {
            store: engine.clone(),
            backupable: Some(engine.clone()),
            propagator: Some(engine.clone()),
            applier: Some(engine),
        }
    }

    #[must_use]
    pub fn with_backupable(mut self, backupable: Arc<dyn Backupable>) -> Self {
        self.backupable = Some(backupable);
        self
    }

    #[must_use]
    pub fn with_propagator(mut self, propagator: Arc<dyn ChangePropagator>) -> Self {
        self.propagator = Some(propagator);
        self
    }

    #[must_use]
    pub fn with_applier(mut self, applier: Arc<dyn ChangeApplier>) -> Self {
        self.applier = Some(applier);
        self
    }
}

impl fmt::Debug for CapabilitySet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CapabilitySet")
            .field("backupable", &self.backupable.is_some())
            .field("propagator", &self.propagator.is_some())
            .field("applier", &self.applier.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    /// A store that offers no optional capability and rejects everything
    struct ReadOnlyEmpty;

    impl KvStore for ReadOnlyEmpty {
        fn put(&self, _pairs: Vec<KvPair>) -> Result<()> {
            Err(Error::storage("put", "read-only"))
        }

        fn get(&self, _keys: &[&[u8]]) -> Result<Vec<KvPair>> {
            Ok(Vec::new())
        }

        fn delete(&self, _key: &[u8]) -> Result<()> {
            Ok(())
        }

        fn compare_and_set(&self, _key: &[u8], _expect: Option<&[u8]>, _update: &[u8]) -> Result<bool> {
            Ok(false)
        }

        fn get_snapshot(&self) -> Result<SnapshotReader> {
            Ok(Box::new(Cursor::new(Vec::new())))
        }

        fn put_snapshot(&self, _snapshot: &mut dyn Read) -> Result<()> {
            Err(Error::storage("put snapshot", "read-only"))
        }

        fn iterate(&self, _options: IterationOptions) -> Result<KvIterator> {
            Ok(Box::new(std::iter::empty()))
        }

        fn memory_usage(&self) -> Result<MemoryUsage> {
            Ok(MemoryUsage::new("empty"))
        }

        fn close(&self) -> Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_capability_checks_default_to_absent() {
        let store = ReadOnlyEmpty;
        assert!(store.as_backupable().is_none());
        assert!(store.as_propagator().is_none());
        assert!(store.as_applier().is_none());
        assert_eq!(store.get_one(b"k").unwrap(), None);
    }

    #[test]
    fn test_capability_set_without_extras() {
        let caps = CapabilitySet::new(Arc::new(ReadOnlyEmpty));
        assert!(caps.backupable.is_none());
        assert!(caps.propagator.is_none());
        assert!(caps.applier.is_none());
        assert_eq!(
            format!("{caps:?}"),
            "CapabilitySet { backupable: false, propagator: false, applier: false }"
        );
    }

    #[test]
    fn test_apply_outcome_into_result() {
        assert_eq!(ApplyOutcome::applied(12).into_result().unwrap(), 12);
        let halted = ApplyOutcome::halted(10, Error::replication_gap(11, 12));
        assert!(!halted.is_ok());
        assert_eq!(halted.last_applied, 10);
        assert!(halted.into_result().is_err());
    }
}
