//! Atomic file writes and directory swaps
//!
//! Directories are replaced by renaming the old tree aside before the staged
//! tree is renamed into place. At no point is the old tree destroyed before
//! the new one exists, and [`recover_interrupted_swap`] repairs a destination
//! left missing by a crash between the two renames.

use crate::clock::Clock;
use crate::temp::{parent_dir, temp_name};
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use strand_core::{Error, Result};
use uuid::Uuid;

/// Write data to a file atomically by writing to a temporary file and renaming
pub fn write_atomic(path: &Path, content: &[u8]) -> Result<()> {
    let parent = parent_dir(path);

    fs::create_dir_all(&parent)
        .map_err(|e| Error::file_system(&parent, "create parent directory", e))?;

    // Same directory so the rename stays on one filesystem
    let temp_path = parent.join(format!(".{}.tmp", Uuid::new_v4()));

    let result = (|| -> Result<()> {
        let mut file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&temp_path)
            .map_err(|e| Error::file_system(&temp_path, "create temporary file", e))?;

        file.write_all(content)
            .map_err(|e| Error::file_system(&temp_path, "write to temporary file", e))?;

        file.sync_all()
            .map_err(|e| Error::file_system(&temp_path, "sync temporary file", e))?;

        Ok(())
    })();

    if result.is_err() {
        let _ = fs::remove_file(&temp_path);
        return result;
    }

    fs::rename(&temp_path, path).map_err(|e| {
        let _ = fs::remove_file(&temp_path);
        Error::file_system(path.to_path_buf(), "atomic rename", e)
    })?;

    Ok(())
}

fn aside_prefix(destination: &Path) -> String {
    let name = destination
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "dir".to_string());
    format!(".{name}.old-")
}

/// Move the directory at `staged` onto `destination`.
///
/// `staged` must be a sibling of `destination` (same filesystem). When the
/// final rename fails the previous destination is put back and the error is
/// returned.
pub fn swap_dir(staged: &Path, destination: &Path, clock: &dyn Clock) -> Result<()> {
    if !staged.is_dir() {
        return Err(Error::storage(
            "swap directory",
            format!("staged path '{}' is not a directory", staged.display()),
        ));
    }

    let parent = parent_dir(destination);

    if !destination.exists() {
        fs::create_dir_all(&parent)
            .map_err(|e| Error::file_system(&parent, "create parent directory", e))?;
        fs::rename(staged, destination)
            .map_err(|e| Error::file_system(destination, "rename staged directory", e))?;
        tracing::debug!(destination = %destination.display(), "Installed staged directory");
        return Ok(());
    }

    let aside = parent.join(temp_name(clock, &aside_prefix(destination)));

    fs::rename(destination, &aside)
        .map_err(|e| Error::file_system(destination, "move existing directory aside", e))?;

    if let Err(e) = fs::rename(staged, destination) {
        // Put the previous tree back so the destination stays valid
        if let Err(rollback) = fs::rename(&aside, destination) {
            tracing::error!(
                aside = %aside.display(),
                error = %rollback,
                "Failed to restore previous directory after swap failure"
            );
        }
        return Err(Error::file_system(destination, "rename staged directory", e));
    }

    if let Err(e) = fs::remove_dir_all(&aside) {
        tracing::warn!(aside = %aside.display(), error = %e, "Failed to remove replaced directory");
    }

    tracing::debug!(destination = %destination.display(), "Swapped staged directory into place");
    Ok(())
}

/// Repair the aftermath of a swap interrupted between its two renames.
///
/// If `destination` is missing, the newest aside copy is renamed back and
/// `true` is returned. Stale aside copies are removed either way.
pub fn recover_interrupted_swap(destination: &Path) -> Result<bool> {
    let parent = parent_dir(destination);
    let prefix = aside_prefix(destination);

    let entries = match fs::read_dir(&parent) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(false),
        Err(e) => return Err(Error::file_system(&parent, "scan for interrupted swaps", e)),
    };

    let mut asides: Vec<PathBuf> = entries
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_name().to_string_lossy().starts_with(&prefix))
        .map(|entry| entry.path())
        .collect();

    if asides.is_empty() {
        return Ok(false);
    }

    // Names embed a sortable timestamp
    asides.sort();

    let mut recovered = false;
    if !destination.exists() {
        if let Some(newest) = asides.pop() {
            fs::rename(&newest, destination)
                .map_err(|e| Error::file_system(&newest, "recover interrupted swap", e))?;
            tracing::info!(
                destination = %destination.display(),
                from = %newest.display(),
                "Recovered directory from interrupted swap"
            );
            recovered = true;
        }
    }

    for stale in asides {
        if let Err(e) = fs::remove_dir_all(&stale) {
            tracing::warn!(path = %stale.display(), error = %e, "Failed to remove stale swap leftover");
        }
    }

    Ok(recovered)
}
