//! Reference storage engine and replication plumbing for strand
//!
//! - [`engine::MemStore`]: in-memory engine implementing every storage
//!   capability
//! - [`replication`]: tokio loop moving changes from a primary to a replica
//! - [`backup`] and [`snapshot`]: on-disk formats shared by backups,
//!   checkpoints and the admin CLI
//! - [`metrics`]: prometheus and in-memory metrics sinks
//! - [`config`]: store configuration and loading

pub mod backup;
pub mod changelog;
pub mod config;
pub mod engine;
pub mod metrics;
pub mod replication;
pub mod snapshot;

mod sweeper;

pub use config::{CompressionConfig, ConfigSource, StoreConfig, StoreConfigBuilder, StoreConfigLoader};
pub use engine::{MemStore, MemStoreBuilder, CHECKPOINT_DIR};
pub use metrics::{PrometheusMetrics, RecordingMetrics};
pub use replication::{ReplicationHandle, ReplicationLoop, ReplicationProgress};
pub use snapshot::Snapshot;
