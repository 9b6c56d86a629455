//! Backupable trait implementation

use crate::backup::read_backup;
use std::path::Path;
use std::sync::Arc;
use strand_core::{instrument, Backupable, CapabilitySet, Error, Result};
use strand_utils::temp::parent_dir;

use super::builder::MemStoreBuilder;
use super::types::MemStore;
use super::CHECKPOINT_DIR;

impl Backupable for MemStore {
    fn backup_to(&self, path: &Path) -> Result<()> {
        instrument(&*self.metrics, "backup", || {
            let snapshot = self.consistent_snapshot("back up")?;

            let parent = parent_dir(path);
            std::fs::create_dir_all(&parent)
                .map_err(|e| Error::file_system(&parent, "create backup parent directory", e))?;
            self.write_backup(path, &snapshot)?;

            tracing::info!(
                path = %path.display(),
                change_number = snapshot.change_number,
                entries = snapshot.pairs.len(),
                "Wrote backup"
            );
            Ok(())
        })
    }

    /// Build a new store from the backup at `path`.
    ///
    /// With a `data_dir` configured the backup becomes the new checkpoint
    /// there, swapped in atomically, and the new store is opened from it.
    /// Without one the snapshot is loaded straight into a new in-memory
    /// store. This store is left as it was in both cases.
    fn restore_from(&self, path: &Path) -> Result<CapabilitySet> {
        instrument(&*self.metrics, "restore", || {
            self.ensure_open("restore")?;

            let (manifest, snapshot) = read_backup(path)?;
            for pair in &snapshot.pairs {
                self.validate_key("restore", &pair.key)
                    .and_then(|()| self.validate_value("restore", &pair.value))
                    .map_err(|e| Error::restore_from(path, e))?;
            }
            let entries = snapshot.pairs.len();

            let store: Arc<MemStore> = match &self.config.data_dir {
                Some(data_dir) => {
                    std::fs::create_dir_all(data_dir)
                        .map_err(|e| Error::file_system(data_dir, "create data directory", e))
                        .and_then(|()| self.write_backup(&data_dir.join(CHECKPOINT_DIR), &snapshot))
                        .map_err(|e| Error::restore_from(path, e))?;

                    MemStoreBuilder::new()
                        .config(self.config.clone())
                        .clock(Arc::clone(&self.clock))
                        .metrics(Arc::clone(&self.metrics))
                        .open()
                        .map_err(|e| Error::restore_from(path, e))?
                }
                None => MemStore::assemble(
                    self.config.clone(),
                    Arc::clone(&self.clock),
                    Arc::clone(&self.metrics),
                    snapshot,
                ),
            };

            tracing::info!(
                path = %path.display(),
                engine = %manifest.engine,
                created_at = %manifest.created_at,
                change_number = manifest.change_number,
                entries,
                "Restored store from backup"
            );
            Ok(store.into_capabilities())
        })
    }
}
