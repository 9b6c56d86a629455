//! Primary and replica roles
//!
//! A store keeps one change sequence. On a primary it grows with every local
//! write; on a replica it grows by applying the primary's records under their
//! original numbers, so a promoted replica serves the same history.

use std::time::Instant;
use strand_core::{
    instrument, ApplyOutcome, ChangeApplier, ChangePropagator, ChangeRecord, Error, Mutation,
    Result,
};

use super::types::MemStore;

impl ChangePropagator for MemStore {
    fn get_latest_committed_change_number(&self) -> Result<u64> {
        instrument(&*self.metrics, "get_latest_committed_change_number", || {
            self.ensure_open("read committed change number")?;
            Ok(self.log.last())
        })
    }

    fn load_changes(&self, from_change_number: u64, max_changes: usize) -> Result<Vec<ChangeRecord>> {
        instrument(&*self.metrics, "load_changes", || {
            self.ensure_open("load changes")?;
            self.log.load(from_change_number, max_changes)
        })
    }
}

impl ChangeApplier for MemStore {
    fn get_latest_applied_change_number(&self) -> Result<u64> {
        instrument(&*self.metrics, "get_latest_applied_change_number", || {
            self.ensure_open("read applied change number")?;
            Ok(self.log.last())
        })
    }

    fn save_changes(&self, changes: &[ChangeRecord]) -> ApplyOutcome {
        let started = Instant::now();
        let outcome = self.apply_records(changes);
        self.metrics.observe("save_changes", started.elapsed());
        if !outcome.is_ok() {
            self.metrics.record_error("save_changes");
        }
        outcome
    }
}

impl MemStore {
    fn apply_records(&self, changes: &[ChangeRecord]) -> ApplyOutcome {
        let _gate = self.gate.read();
        if let Err(e) = self.ensure_open("save changes") {
            return ApplyOutcome::halted(self.log.last(), e);
        }

        for record in changes {
            let applied = self.log.last();
            if record.change_number <= applied {
                tracing::debug!(
                    change_number = record.change_number,
                    applied,
                    "Skipping already applied change"
                );
                continue;
            }

            if let Err(e) = self.apply_record(record) {
                tracing::warn!(
                    change_number = record.change_number,
                    applied,
                    error = %e,
                    "Stopped applying changes"
                );
                return ApplyOutcome::halted(applied, e);
            }
        }

        ApplyOutcome::applied(self.log.last())
    }

    /// Validate a whole record, then log and apply it under its stripes
    fn apply_record(&self, record: &ChangeRecord) -> Result<()> {
        let expected = self.log.last().checked_add(1).ok_or_else(|| {
            Error::storage("save changes", "change number space is exhausted")
        })?;
        if record.change_number != expected {
            return Err(Error::replication_gap(expected, record.change_number));
        }
        for mutation in &record.mutations {
            self.validate_mutation("save changes", mutation)?;
        }

        let _stripes = self.stripes.lock(record.mutations.iter().map(Mutation::key));
        self.log.append_numbered(record.clone())?;
        for mutation in &record.mutations {
            self.apply(mutation);
        }
        Ok(())
    }
}
