//! Timestamped staging directories
//!
//! Names are `<prefix><YYYYMMDDHHMMSS>-<random>` so that staging areas sort by
//! creation time and never collide.

use crate::clock::Clock;
use chrono::{DateTime, Duration, NaiveDateTime, Utc};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use strand_core::{Error, Result};
use uuid::Uuid;

pub const TEMP_TIMESTAMP_FORMAT: &str = "%Y%m%d%H%M%S";

const MAX_ATTEMPTS: usize = 16;

/// Build a temp name from `prefix` and the clock's current time
pub fn temp_name(clock: &dyn Clock, prefix: &str) -> String {
    let stamp = clock.now().format(TEMP_TIMESTAMP_FORMAT);
    let suffix = Uuid::new_v4().simple().to_string();
    format!("{prefix}{stamp}-{}", &suffix[..8])
}

/// Create a fresh directory under `dir`
pub fn create_temp_dir(dir: &Path, prefix: &str, clock: &dyn Clock) -> Result<PathBuf> {
    fs::create_dir_all(dir).map_err(|e| Error::file_system(dir, "create parent directory", e))?;

    for _ in 0..MAX_ATTEMPTS {
        let candidate = dir.join(temp_name(clock, prefix));
        match fs::create_dir(&candidate) {
            Ok(()) => return Ok(candidate),
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => continue,
            Err(e) => return Err(Error::file_system(candidate, "create temporary directory", e)),
        }
    }

    Err(Error::storage(
        "create temporary directory",
        format!("exhausted {MAX_ATTEMPTS} names under '{}'", dir.display()),
    ))
}

/// Creation time embedded in `name`, when it was built by [`temp_name`]
/// with `prefix`
pub fn temp_created_at(name: &str, prefix: &str) -> Option<DateTime<Utc>> {
    let rest = name.strip_prefix(prefix)?;
    let (stamp, suffix) = rest.split_once('-')?;
    if suffix.len() != 8 || !suffix.chars().all(|c| c.is_ascii_hexdigit()) {
        return None;
    }
    NaiveDateTime::parse_from_str(stamp, TEMP_TIMESTAMP_FORMAT)
        .ok()
        .map(|naive| naive.and_utc())
}

/// Remove directories under `dir` named by [`temp_name`] with `prefix` that
/// are older than `max_age`, returning how many were removed
pub fn remove_stale_temp_dirs(
    dir: &Path,
    prefix: &str,
    clock: &dyn Clock,
    max_age: Duration,
) -> Result<usize> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(0),
        Err(e) => return Err(Error::file_system(dir, "scan for stale staging directories", e)),
    };

    let cutoff = clock.now() - max_age;
    let mut removed = 0;
    for entry in entries.filter_map(|entry| entry.ok()) {
        let name = entry.file_name().to_string_lossy().into_owned();
        let Some(created) = temp_created_at(&name, prefix) else {
            continue;
        };
        if created > cutoff || !entry.path().is_dir() {
            continue;
        }
        match fs::remove_dir_all(entry.path()) {
            Ok(()) => removed += 1,
            Err(e) => {
                tracing::warn!(path = %entry.path().display(), error = %e, "Failed to remove stale staging directory")
            }
        }
    }

    if removed > 0 {
        tracing::info!(dir = %dir.display(), removed, "Removed stale staging directories");
    }
    Ok(removed)
}

/// Parent directory of `path`, or `.` for bare names
pub fn parent_dir(path: &Path) -> PathBuf {
    match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    }
}
