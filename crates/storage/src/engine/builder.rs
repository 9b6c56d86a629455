//! Store construction and checkpoint loading

use crate::backup::{has_manifest, read_backup};
use crate::changelog::ChangeLog;
use crate::config::StoreConfig;
use crate::snapshot::Snapshot;
use crate::sweeper::start_sweeper;
use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use std::path::Path;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use strand_core::{is_expired, Error, KvPair, MetricsSink, NoopMetrics, Result};
use strand_utils::{recover_interrupted_swap, system_clock, SharedClock};

use super::locks::{LockStripes, DEFAULT_STRIPES};
use super::types::{MemStore, StoredValue};
use super::CHECKPOINT_DIR;

/// Builder for [`MemStore`]
pub struct MemStoreBuilder {
    config: StoreConfig,
    clock: SharedClock,
    metrics: Arc<dyn MetricsSink>,
}

impl Default for MemStoreBuilder {
    fn default() -> Self {
        Self {
            config: StoreConfig::default(),
            clock: system_clock(),
            metrics: Arc::new(NoopMetrics),
        }
    }
}

impl MemStoreBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn config(mut self, config: StoreConfig) -> Self {
        self.config = config;
        self
    }

    pub fn clock(mut self, clock: SharedClock) -> Self {
        self.clock = clock;
        self
    }

    pub fn metrics(mut self, metrics: Arc<dyn MetricsSink>) -> Self {
        self.metrics = metrics;
        self
    }

    /// Open the store, loading the data-dir checkpoint when one exists.
    ///
    /// Starts the expiry sweeper when a sweep interval is configured and a
    /// tokio runtime is available.
    pub fn open(self) -> Result<Arc<MemStore>> {
        self.config.validate()?;

        let snapshot = match &self.config.data_dir {
            Some(dir) => load_checkpoint(dir)?,
            None => Snapshot::default(),
        };

        tracing::info!(
            engine = %self.config.engine_name,
            data_dir = ?self.config.data_dir,
            entries = snapshot.pairs.len(),
            change_number = snapshot.change_number,
            "Opened store"
        );
        Ok(MemStore::assemble(
            self.config,
            self.clock,
            self.metrics,
            snapshot,
        ))
    }
}

/// Read `<data_dir>/checkpoint`, finishing any swap a crash interrupted
fn load_checkpoint(data_dir: &Path) -> Result<Snapshot> {
    std::fs::create_dir_all(data_dir)
        .map_err(|e| Error::file_system(data_dir, "create data directory", e))?;

    let checkpoint = data_dir.join(CHECKPOINT_DIR);
    recover_interrupted_swap(&checkpoint)?;

    if has_manifest(&checkpoint) {
        let (_, snapshot) = read_backup(&checkpoint)?;
        Ok(snapshot)
    } else if checkpoint.exists() {
        Err(Error::restore(&checkpoint, "checkpoint directory has no manifest"))
    } else {
        Ok(Snapshot::default())
    }
}

impl MemStore {
    pub fn builder() -> MemStoreBuilder {
        MemStoreBuilder::new()
    }

    /// Open a store with the given configuration, the system clock and no metrics
    pub fn open(config: StoreConfig) -> Result<Arc<Self>> {
        MemStoreBuilder::new().config(config).open()
    }

    pub(super) fn assemble(
        config: StoreConfig,
        clock: SharedClock,
        metrics: Arc<dyn MetricsSink>,
        snapshot: Snapshot,
    ) -> Arc<Self> {
        let store = Arc::new(Self {
            log: ChangeLog::starting_at(config.change_log_capacity, snapshot.change_number),
            config,
            data: DashMap::new(),
            stripes: LockStripes::new(DEFAULT_STRIPES),
            gate: RwLock::new(()),
            closed: AtomicBool::new(false),
            sweeper: Mutex::new(None),
            clock,
            metrics,
        });
        store.load_pairs(snapshot.pairs);

        if let Some(interval) = store.config.sweep_interval() {
            match tokio::runtime::Handle::try_current() {
                Ok(_) => *store.sweeper.lock() = Some(start_sweeper(&store, interval)),
                Err(_) => tracing::warn!(
                    "No tokio runtime available; expired keys are only removed lazily"
                ),
            }
        }
        store
    }

    /// Insert pairs that have not yet expired. Callers hold the gate
    /// exclusively or own the store outright.
    pub(super) fn load_pairs(&self, pairs: Vec<KvPair>) {
        let now = self.clock.epoch_seconds();
        for pair in pairs {
            if is_expired(pair.expire_ts, now) {
                continue;
            }
            self.data.insert(
                pair.key,
                StoredValue {
                    value: pair.value,
                    expire_ts: pair.expire_ts,
                },
            );
        }
    }
}
