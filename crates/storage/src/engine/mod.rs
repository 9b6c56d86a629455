//! Reference in-memory engine
//!
//! [`MemStore`] implements [`strand_core::KvStore`] together with every
//! optional capability:
//!
//! - keyspace in a `DashMap`, so point operations on different keys run in
//!   parallel
//! - striped per-key locks held across change-number assignment and the
//!   keyspace update, so log order per key equals apply order
//! - a whole-store gate taken exclusively by snapshots, snapshot loads and
//!   iterator materialisation
//! - a bounded change log serving replicas
//! - optional checkpoints under `data_dir`, written through the backup layout

mod backup;
mod builder;
mod iter;
mod kv;
mod locks;
mod replica;
mod types;

pub use builder::MemStoreBuilder;
pub use types::MemStore;

use crate::backup::{install_backup, BackupManifest};
use crate::config::StoreConfig;
use crate::snapshot::{self, Snapshot};
use std::path::Path;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use strand_core::{instrument, is_expired, CapabilitySet, Error, KvPair, Mutation, Result};

use types::StoredValue;

/// Directory under `data_dir` holding the latest checkpoint
pub const CHECKPOINT_DIR: &str = "checkpoint";

impl MemStore {
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    pub fn engine_name(&self) -> &str {
        &self.config.engine_name
    }

    /// Bundle this store with all of its capabilities
    pub fn into_capabilities(self: Arc<Self>) -> CapabilitySet {
        CapabilitySet::from_engine(self)
    }

    /// Write a checkpoint into `<data_dir>/checkpoint`.
    ///
    /// The checkpoint is staged beside the previous one and swapped in, so a
    /// crash leaves either the old or the new checkpoint in place.
    pub fn checkpoint(&self) -> Result<()> {
        instrument(&*self.metrics, "checkpoint", || {
            let Some(data_dir) = self.config.data_dir.as_deref() else {
                return Err(Error::configuration(
                    "checkpoint requires data_dir to be configured",
                ));
            };

            let snapshot = self.consistent_snapshot("checkpoint")?;
            self.write_backup(&data_dir.join(CHECKPOINT_DIR), &snapshot)?;

            tracing::info!(
                data_dir = %data_dir.display(),
                change_number = snapshot.change_number,
                entries = snapshot.pairs.len(),
                "Wrote checkpoint"
            );
            Ok(())
        })
    }

    /// Remove every expired key, returning how many were removed.
    ///
    /// Purges are local housekeeping and commit no change records; replicas
    /// expire the same keys on their own clock.
    pub fn purge_expired(&self) -> Result<usize> {
        instrument(&*self.metrics, "purge_expired", || {
            let _gate = self.gate.read();
            self.ensure_open("purge expired keys")?;

            let now = self.clock.epoch_seconds();
            let expired: Vec<Vec<u8>> = self
                .data
                .iter()
                .filter(|entry| is_expired(entry.value().expire_ts, now))
                .map(|entry| entry.key().clone())
                .collect();

            let mut removed = 0;
            for key in expired {
                let _stripes = self.stripes.lock([key.as_slice()]);
                if self
                    .data
                    .remove_if(&key, |_, v| is_expired(v.expire_ts, now))
                    .is_some()
                {
                    removed += 1;
                }
            }

            if removed > 0 {
                tracing::debug!(removed, "Purged expired keys");
            }
            Ok(removed)
        })
    }

    pub(super) fn ensure_open(&self, operation: &'static str) -> Result<()> {
        if self.is_closed() {
            Err(Error::closed(operation))
        } else {
            Ok(())
        }
    }

    pub(super) fn validate_key(&self, operation: &'static str, key: &[u8]) -> Result<()> {
        if key.is_empty() {
            return Err(Error::storage(operation, "key must not be empty"));
        }
        if key.len() > self.config.max_key_size {
            return Err(Error::storage(
                operation,
                format!(
                    "key of {} bytes exceeds the limit of {}",
                    key.len(),
                    self.config.max_key_size
                ),
            ));
        }
        Ok(())
    }

    pub(super) fn validate_value(&self, operation: &'static str, value: &[u8]) -> Result<()> {
        if value.len() > self.config.max_value_size {
            return Err(Error::storage(
                operation,
                format!(
                    "value of {} bytes exceeds the limit of {}",
                    value.len(),
                    self.config.max_value_size
                ),
            ));
        }
        Ok(())
    }

    pub(super) fn validate_mutation(&self, operation: &'static str, mutation: &Mutation) -> Result<()> {
        self.validate_key(operation, mutation.key())?;
        if let Mutation::Put { value, .. } = mutation {
            self.validate_value(operation, value)?;
        }
        Ok(())
    }

    /// The value of `key` unless it is absent or expired
    pub(super) fn live_value(&self, key: &[u8], now: u64) -> Option<StoredValue> {
        self.data
            .get(key)
            .filter(|entry| !is_expired(entry.expire_ts, now))
            .map(|entry| entry.value().clone())
    }

    /// Apply a mutation to the keyspace. Callers hold the key's stripe.
    pub(super) fn apply(&self, mutation: &Mutation) {
        match mutation {
            Mutation::Put {
                key,
                value,
                expire_ts,
            } => {
                self.data.insert(
                    key.clone(),
                    StoredValue {
                        value: value.clone(),
                        expire_ts: *expire_ts,
                    },
                );
            }
            Mutation::Delete { key } => {
                self.data.remove(key);
            }
        }
    }

    /// Commit a locally originated batch and return its change number.
    /// Nothing is applied unless the batch received a number.
    pub(super) fn commit(&self, mutations: Vec<Mutation>) -> Result<u64> {
        let _stripes = self.stripes.lock(mutations.iter().map(Mutation::key));
        let change_number = self.log.append(mutations.clone())?;
        for mutation in &mutations {
            self.apply(mutation);
        }
        Ok(change_number)
    }

    /// Live pairs sorted by key, with the change number they reflect.
    /// Callers hold the gate exclusively.
    pub(super) fn capture(&self) -> Snapshot {
        let now = self.clock.epoch_seconds();
        let mut pairs: Vec<KvPair> = self
            .data
            .iter()
            .filter(|entry| !is_expired(entry.expire_ts, now))
            .map(|entry| KvPair {
                key: entry.key().clone(),
                value: entry.value.clone(),
                expire_ts: entry.expire_ts,
            })
            .collect();
        pairs.sort_unstable_by(|a, b| a.key.cmp(&b.key));

        Snapshot {
            change_number: self.log.last(),
            pairs,
        }
    }

    /// Capture under the exclusive gate
    pub(super) fn consistent_snapshot(&self, operation: &'static str) -> Result<Snapshot> {
        let _gate = self.gate.write();
        self.ensure_open(operation)?;
        Ok(self.capture())
    }

    /// Encode `snapshot` and install it as a backup directory at `destination`
    pub(super) fn write_backup(&self, destination: &Path, snapshot: &Snapshot) -> Result<()> {
        let encoded = snapshot::encode(snapshot, &self.config.snapshot_compression)?;
        let manifest =
            BackupManifest::describe(&self.config.engine_name, self.clock.now(), snapshot, &encoded);
        install_backup(
            destination,
            &manifest,
            &encoded,
            &self.config.temp_prefix,
            &*self.clock,
        )
    }
}
