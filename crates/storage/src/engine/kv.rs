//! KvStore trait implementation

use crate::snapshot;
use std::io::{Cursor, Read};
use std::sync::atomic::Ordering;
use strand_core::{
    instrument, Backupable, ChangeApplier, ChangePropagator, Error, IterationOptions, KvIterator,
    KvPair, KvStore, MemoryUsage, Mutation, Result, SnapshotReader,
};

use super::iter::{collect_admitted, into_iterator};
use super::types::MemStore;

impl KvStore for MemStore {
    fn put(&self, pairs: Vec<KvPair>) -> Result<()> {
        instrument(&*self.metrics, "put", || {
            self.ensure_open("put")?;
            for pair in &pairs {
                self.validate_key("put", &pair.key)?;
                self.validate_value("put", &pair.value)?;
            }
            if pairs.is_empty() {
                return Ok(());
            }

            let _gate = self.gate.read();
            self.ensure_open("put")?;

            let count = pairs.len();
            let change_number = self.commit(pairs.into_iter().map(Mutation::from).collect())?;
            tracing::debug!(count, change_number, "Put batch");
            Ok(())
        })
    }

    fn get(&self, keys: &[&[u8]]) -> Result<Vec<KvPair>> {
        instrument(&*self.metrics, "get", || {
            self.ensure_open("get")?;
            for key in keys {
                self.validate_key("get", key)?;
            }

            let _gate = self.gate.read();
            self.ensure_open("get")?;

            let now = self.clock.epoch_seconds();
            Ok(keys
                .iter()
                .filter_map(|key| {
                    self.live_value(key, now).map(|stored| KvPair {
                        key: key.to_vec(),
                        value: stored.value,
                        expire_ts: stored.expire_ts,
                    })
                })
                .collect())
        })
    }

    fn delete(&self, key: &[u8]) -> Result<()> {
        instrument(&*self.metrics, "delete", || {
            self.ensure_open("delete")?;
            self.validate_key("delete", key)?;

            let _gate = self.gate.read();
            self.ensure_open("delete")?;

            let _stripes = self.stripes.lock([key]);
            if self.data.contains_key(key) {
                let change_number = self.log.append(vec![Mutation::Delete { key: key.to_vec() }])?;
                self.data.remove(key);
                tracing::debug!(change_number, "Deleted key");
            }
            Ok(())
        })
    }

    fn compare_and_set(&self, key: &[u8], expect: Option<&[u8]>, update: &[u8]) -> Result<bool> {
        instrument(&*self.metrics, "compare_and_set", || {
            self.ensure_open("compare and set")?;
            self.validate_key("compare and set", key)?;
            self.validate_value("compare and set", update)?;

            let _gate = self.gate.read();
            self.ensure_open("compare and set")?;

            let _stripes = self.stripes.lock([key]);
            let current = self.live_value(key, self.clock.epoch_seconds());
            let matches = match (expect, &current) {
                (None, None) => true,
                (Some(expected), Some(stored)) => expected == stored.value.as_slice(),
                _ => false,
            };
            if !matches {
                return Ok(false);
            }

            let mutation = Mutation::Put {
                key: key.to_vec(),
                value: update.to_vec(),
                expire_ts: None,
            };
            self.log.append(vec![mutation.clone()])?;
            self.apply(&mutation);
            Ok(true)
        })
    }

    fn get_snapshot(&self) -> Result<SnapshotReader> {
        instrument(&*self.metrics, "get_snapshot", || {
            let snapshot = self.consistent_snapshot("get snapshot")?;
            let encoded = snapshot::encode(&snapshot, &self.config.snapshot_compression)?;
            Ok(Box::new(Cursor::new(encoded)) as SnapshotReader)
        })
    }

    fn put_snapshot(&self, reader: &mut dyn Read) -> Result<()> {
        instrument(&*self.metrics, "put_snapshot", || {
            self.ensure_open("put snapshot")?;

            let snapshot = snapshot::decode(reader)?;
            for pair in &snapshot.pairs {
                self.validate_key("put snapshot", &pair.key)?;
                self.validate_value("put snapshot", &pair.value)?;
            }

            let _gate = self.gate.write();
            self.ensure_open("put snapshot")?;

            self.data.clear();
            self.log.reset(snapshot.change_number);
            let entries = snapshot.pairs.len();
            self.load_pairs(snapshot.pairs);

            tracing::info!(
                entries,
                change_number = snapshot.change_number,
                "Replaced keyspace from snapshot"
            );
            Ok(())
        })
    }

    fn iterate(&self, options: IterationOptions) -> Result<KvIterator> {
        instrument(&*self.metrics, "iterate", || {
            let pairs = {
                let _gate = self.gate.write();
                self.ensure_open("iterate")?;
                collect_admitted(self, &options)
            };
            Ok(into_iterator(pairs))
        })
    }

    fn memory_usage(&self) -> Result<MemoryUsage> {
        instrument(&*self.metrics, "memory_usage", || {
            let _gate = self.gate.read();
            self.ensure_open("report memory usage")?;

            let mut key_bytes = 0u64;
            let mut value_bytes = 0u64;
            let mut expiring = 0u64;
            for entry in self.data.iter() {
                key_bytes += entry.key().len() as u64;
                value_bytes += entry.value.len() as u64;
                if entry.expire_ts.is_some() {
                    expiring += 1;
                }
            }

            Ok(MemoryUsage::new(self.config.engine_name.clone())
                .with("keys", self.data.len() as u64)
                .with("key_bytes", key_bytes)
                .with("value_bytes", value_bytes)
                .with("expiring_keys", expiring)
                .with("change_log_records", self.log.len() as u64)
                .with("change_log_bytes", self.log.bytes()))
        })
    }

    fn close(&self) -> Result<()> {
        instrument(&*self.metrics, "close", || {
            if self.closed.swap(true, Ordering::AcqRel) {
                return Ok(());
            }

            if let Some(handle) = self.sweeper.lock().take() {
                handle.abort();
            }

            // Wait for in-flight operations, then drop the keyspace
            let _gate = self.gate.write();
            self.data.clear();
            self.data.shrink_to_fit();

            tracing::info!(engine = %self.config.engine_name, "Closed store");
            Ok(())
        })
    }

    fn as_backupable(&self) -> Option<&dyn Backupable> {
        Some(self)
    }

    fn as_propagator(&self) -> Option<&dyn ChangePropagator> {
        Some(self)
    }

    fn as_applier(&self) -> Option<&dyn ChangeApplier> {
        Some(self)
    }
}

impl MemStore {
    /// Fetch a single key, failing with a not-found error when absent
    pub fn require(&self, key: &[u8]) -> Result<KvPair> {
        self.get_one(key)?.ok_or_else(|| Error::not_found(key))
    }
}
