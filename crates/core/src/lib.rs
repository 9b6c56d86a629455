//! Core contract for strand storage engines
//!
//! This crate defines what every engine must provide:
//! - [`KvStore`], the point/bulk/CAS/snapshot/iteration engine interface
//! - the optional [`Backupable`], [`ChangePropagator`] and [`ChangeApplier`] capabilities
//! - the shared data model ([`KvPair`], [`ChangeRecord`], ...)
//! - the [`Error`] type and the injected [`MetricsSink`] boundary

pub mod errors;
pub mod metrics;
pub mod store;
pub mod types;

pub use errors::{Error, ErrorKind, Result};
pub use metrics::{instrument, MetricsSink, NoopMetrics};
pub use store::{
    ApplyOutcome, Backupable, CapabilitySet, ChangeApplier, ChangePropagator, KvIterator, KvStore,
    SnapshotReader,
};
pub use types::{is_expired, ChangeRecord, IterationOptions, KvPair, MemoryUsage, Mutation};
