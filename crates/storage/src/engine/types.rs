//! Reference engine types

use crate::changelog::ChangeLog;
use crate::config::StoreConfig;
use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use strand_core::MetricsSink;
use strand_utils::SharedClock;
use tokio::task::JoinHandle;

use super::locks::LockStripes;

/// In-memory key/value engine implementing the whole storage contract
pub struct MemStore {
    pub(super) config: StoreConfig,
    /// Live keyspace
    pub(super) data: DashMap<Vec<u8>, StoredValue>,
    /// Per-key write ordering
    pub(super) stripes: LockStripes,
    /// Shared by point operations, exclusive for whole-store sections
    pub(super) gate: RwLock<()>,
    pub(super) log: ChangeLog,
    pub(super) closed: AtomicBool,
    pub(super) sweeper: Mutex<Option<JoinHandle<()>>>,
    pub(super) clock: SharedClock,
    pub(super) metrics: Arc<dyn MetricsSink>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct StoredValue {
    pub value: Vec<u8>,
    pub expire_ts: Option<u64>,
}

impl Drop for MemStore {
    fn drop(&mut self) {
        if let Some(handle) = self.sweeper.lock().take() {
            handle.abort();
        }
    }
}

impl std::fmt::Debug for MemStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemStore")
            .field("engine", &self.config.engine_name)
            .field("data_dir", &self.config.data_dir)
            .field("entry_count", &self.data.len())
            .field("last_change", &self.log.last())
            .finish()
    }
}
