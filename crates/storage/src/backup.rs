//! Backup directory layout
//!
//! A backup (and a data-dir checkpoint, which uses the same layout) is a
//! directory holding:
//!
//! - `MANIFEST.json`: [`BackupManifest`], describing the snapshot file
//! - `snapshot.bin`: a snapshot stream (see [`crate::snapshot`])
//!
//! Directories are always written to a staging sibling first and then swapped
//! into place, so readers never observe a half-written backup.

use crate::snapshot::{self, Snapshot};
use chrono::{DateTime, Utc};
use crc32c::crc32c;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::Cursor;
use std::path::{Path, PathBuf};
use strand_core::{Error, Result};
use strand_utils::temp::parent_dir;
use strand_utils::{
    create_temp_dir, recover_interrupted_swap, remove_stale_temp_dirs, swap_dir, write_atomic,
    Clock,
};

pub const MANIFEST_FILE: &str = "MANIFEST.json";
pub const SNAPSHOT_FILE: &str = "snapshot.bin";
pub const BACKUP_FORMAT_VERSION: u32 = 1;

/// Staging directories older than this are leftovers of a crashed install
pub const STALE_STAGING_SECS: i64 = 3600;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackupManifest {
    pub format_version: u32,
    pub engine: String,
    pub created_at: DateTime<Utc>,
    pub change_number: u64,
    pub entry_count: u64,
    pub snapshot_file: String,
    pub snapshot_len: u64,
    pub snapshot_crc: u32,
}

impl BackupManifest {
    pub fn describe(
        engine: &str,
        created_at: DateTime<Utc>,
        snapshot: &Snapshot,
        encoded: &[u8],
    ) -> Self {
        Self {
            format_version: BACKUP_FORMAT_VERSION,
            engine: engine.to_string(),
            created_at,
            change_number: snapshot.change_number,
            entry_count: snapshot.pairs.len() as u64,
            snapshot_file: SNAPSHOT_FILE.to_string(),
            snapshot_len: encoded.len() as u64,
            snapshot_crc: crc32c(encoded),
        }
    }
}

/// Write `encoded` and its manifest into `dir`
fn write_backup_files(dir: &Path, manifest: &BackupManifest, encoded: &[u8]) -> Result<()> {
    write_atomic(&dir.join(&manifest.snapshot_file), encoded)?;
    let manifest_bytes = serde_json::to_vec_pretty(manifest)
        .map_err(|e| Error::serialization("encode", "backup manifest", e))?;
    write_atomic(&dir.join(MANIFEST_FILE), &manifest_bytes)
}

/// Stage a backup next to `destination` and swap it into place
pub fn install_backup(
    destination: &Path,
    manifest: &BackupManifest,
    encoded: &[u8],
    temp_prefix: &str,
    clock: &dyn Clock,
) -> Result<()> {
    if destination.exists() && !destination.is_dir() {
        return Err(Error::storage(
            "backup",
            format!("'{}' exists and is not a directory", destination.display()),
        ));
    }

    let parent = parent_dir(destination);
    recover_interrupted_swap(destination)?;
    remove_stale_temp_dirs(
        &parent,
        temp_prefix,
        clock,
        chrono::Duration::seconds(STALE_STAGING_SECS),
    )?;

    let staged = create_temp_dir(&parent, temp_prefix, clock)?;

    let result = write_backup_files(&staged, manifest, encoded)
        .and_then(|()| swap_dir(&staged, destination, clock));

    if result.is_err() && staged.exists() {
        if let Err(e) = fs::remove_dir_all(&staged) {
            tracing::warn!(staged = %staged.display(), error = %e, "Failed to remove staging directory");
        }
    }
    result
}

/// Whether `dir` looks like a backup or checkpoint
pub fn has_manifest(dir: &Path) -> bool {
    dir.join(MANIFEST_FILE).is_file()
}

pub fn read_manifest(dir: &Path) -> Result<BackupManifest> {
    let path = dir.join(MANIFEST_FILE);
    let content = fs::read(&path).map_err(|e| {
        Error::restore(
            dir,
            format!("cannot read manifest '{}': {e}", path.display()),
        )
    })?;

    let manifest: BackupManifest = serde_json::from_slice(&content)
        .map_err(|e| Error::restore(dir, format!("malformed manifest: {e}")))?;

    if manifest.format_version > BACKUP_FORMAT_VERSION {
        return Err(Error::restore(
            dir,
            format!(
                "unsupported backup format version {} (newest known is {BACKUP_FORMAT_VERSION})",
                manifest.format_version
            ),
        ));
    }
    if manifest.snapshot_file.contains(&['/', '\\'][..]) || manifest.snapshot_file.is_empty() {
        return Err(Error::restore(
            dir,
            format!("invalid snapshot file name '{}'", manifest.snapshot_file),
        ));
    }
    Ok(manifest)
}

/// Path of the snapshot file a manifest points at
pub fn snapshot_path(dir: &Path, manifest: &BackupManifest) -> PathBuf {
    dir.join(&manifest.snapshot_file)
}

/// Read the raw snapshot bytes of a backup after checking length and CRC
pub fn read_snapshot_bytes(dir: &Path, manifest: &BackupManifest) -> Result<Vec<u8>> {
    let path = snapshot_path(dir, manifest);
    let encoded = fs::read(&path).map_err(|e| {
        Error::restore(
            dir,
            format!("cannot read snapshot '{}': {e}", path.display()),
        )
    })?;

    if encoded.len() as u64 != manifest.snapshot_len {
        return Err(Error::restore(
            dir,
            format!(
                "snapshot length mismatch: manifest says {}, file has {}",
                manifest.snapshot_len,
                encoded.len()
            ),
        ));
    }
    let crc = crc32c(&encoded);
    if crc != manifest.snapshot_crc {
        return Err(Error::restore(
            dir,
            format!(
                "snapshot CRC mismatch: manifest says {:08x}, file has {crc:08x}",
                manifest.snapshot_crc
            ),
        ));
    }
    Ok(encoded)
}

/// Read, verify and decode a whole backup
pub fn read_backup(dir: &Path) -> Result<(BackupManifest, Snapshot)> {
    recover_interrupted_swap(dir).map_err(|e| Error::restore_from(dir, e))?;
    let manifest = read_manifest(dir)?;
    let encoded = read_snapshot_bytes(dir, &manifest)?;

    let snapshot =
        snapshot::decode(&mut Cursor::new(encoded)).map_err(|e| Error::restore_from(dir, e))?;

    if snapshot.change_number != manifest.change_number
        || snapshot.pairs.len() as u64 != manifest.entry_count
    {
        return Err(Error::restore(
            dir,
            format!(
                "manifest describes change {} with {} entries, snapshot holds change {} with {}",
                manifest.change_number,
                manifest.entry_count,
                snapshot.change_number,
                snapshot.pairs.len()
            ),
        ));
    }

    Ok((manifest, snapshot))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CompressionConfig;
    use strand_core::{ErrorKind, KvPair};
    use strand_utils::ManualClock;
    use tempfile::TempDir;

    fn write_sample(dest: &Path, clock: &ManualClock) -> Snapshot {
        let snapshot = Snapshot {
            change_number: 7,
            pairs: vec![KvPair::new("a", "1"), KvPair::new("b", "2")],
        };
        let encoded = snapshot::encode(&snapshot, &CompressionConfig::default()).unwrap();
        let manifest = BackupManifest::describe("memory", clock.now(), &snapshot, &encoded);
        install_backup(dest, &manifest, &encoded, ".stage-", clock).unwrap();
        snapshot
    }

    #[test]
    fn test_install_then_read() {
        let temp = TempDir::new().unwrap();
        let clock = ManualClock::at_epoch(1_792_398_615);
        let dest = temp.path().join("backup");

        let written = write_sample(&dest, &clock);
        let (manifest, snapshot) = read_backup(&dest).unwrap();

        assert_eq!(snapshot, written);
        assert_eq!(manifest.engine, "memory");
        assert_eq!(manifest.created_at, clock.now());
        // Only the installed backup remains; the staging dir was consumed
        assert_eq!(fs::read_dir(temp.path()).unwrap().count(), 1);
    }

    #[test]
    fn test_overwrite_existing_backup() {
        let temp = TempDir::new().unwrap();
        let clock = ManualClock::at_epoch(1_792_398_615);
        let dest = temp.path().join("backup");
        write_sample(&dest, &clock);
        write_sample(&dest, &clock);
        assert!(read_backup(&dest).is_ok());
        assert_eq!(fs::read_dir(temp.path()).unwrap().count(), 1);
    }

    #[test]
    fn test_tampered_snapshot_is_restore_error() {
        let temp = TempDir::new().unwrap();
        let clock = ManualClock::at_epoch(1_792_398_615);
        let dest = temp.path().join("backup");
        write_sample(&dest, &clock);

        let snap = dest.join(SNAPSHOT_FILE);
        let mut bytes = fs::read(&snap).unwrap();
        bytes[10] ^= 0x01;
        fs::write(&snap, bytes).unwrap();

        let err = read_backup(&dest).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Restore);
        assert!(err.to_string().contains("CRC mismatch"), "{err}");
    }

    #[test]
    fn test_missing_manifest_is_restore_error() {
        let temp = TempDir::new().unwrap();
        let err = read_backup(temp.path()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Restore);
        assert!(!has_manifest(temp.path()));
    }

    #[test]
    fn test_refuses_to_replace_a_file() {
        let temp = TempDir::new().unwrap();
        let clock = ManualClock::at_epoch(1_792_398_615);
        let dest = temp.path().join("backup");
        fs::write(&dest, b"not a dir").unwrap();

        let snapshot = Snapshot::default();
        let encoded = snapshot::encode(&snapshot, &CompressionConfig::default()).unwrap();
        let manifest = BackupManifest::describe("memory", clock.now(), &snapshot, &encoded);
        assert!(install_backup(&dest, &manifest, &encoded, ".stage-", &clock).is_err());
        assert_eq!(fs::read(&dest).unwrap(), b"not a dir");
    }

    #[test]
    fn test_read_recovers_backup_left_aside() {
        let temp = TempDir::new().unwrap();
        let clock = ManualClock::at_epoch(1_792_398_615);
        let dest = temp.path().join("backup");
        let written = write_sample(&dest, &clock);

        // Crash between moving the old backup aside and renaming the new one in
        fs::rename(&dest, temp.path().join(".backup.old-20261019083015-abcd1234")).unwrap();

        let (_, snapshot) = read_backup(&dest).unwrap();
        assert_eq!(snapshot, written);
        assert_eq!(fs::read_dir(temp.path()).unwrap().count(), 1);
    }

    #[test]
    fn test_install_sweeps_stale_staging_dirs() {
        let temp = TempDir::new().unwrap();
        let clock = ManualClock::at_epoch(1_792_398_615);
        let crashed = temp.path().join(".stage-20261019083015-abcd1234");
        fs::create_dir(&crashed).unwrap();
        fs::write(crashed.join(SNAPSHOT_FILE), b"partial").unwrap();

        // Still fresh: another install may own it
        write_sample(&temp.path().join("backup"), &clock);
        assert!(crashed.exists());

        clock.advance(chrono::Duration::hours(2));
        write_sample(&temp.path().join("backup"), &clock);
        assert!(!crashed.exists());
        assert_eq!(fs::read_dir(temp.path()).unwrap().count(), 1);
    }
}
