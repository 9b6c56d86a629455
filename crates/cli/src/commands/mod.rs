use anyhow::{bail, Context, Result};
use clap::Subcommand;
use serde_json::json;
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};
use strand_core::{Backupable, KvStore};
use strand_storage::backup::{read_backup, read_manifest, read_snapshot_bytes, snapshot_path};
use strand_storage::snapshot::read_header;
use strand_storage::{MemStore, StoreConfig, CHECKPOINT_DIR};

#[derive(Subcommand)]
pub enum Commands {
    /// Print a backup's manifest and snapshot header as JSON
    Inspect {
        /// Backup directory
        backup: PathBuf,
    },

    /// Write a backup's snapshot stream to a file
    Export {
        /// Backup directory
        backup: PathBuf,

        /// Destination file
        #[arg(short, long)]
        out: PathBuf,
    },

    /// Install a backup as the checkpoint of a data directory
    Restore {
        /// Backup directory
        backup: PathBuf,

        /// Data directory to restore into (defaults to the configured one)
        #[arg(long)]
        data_dir: Option<PathBuf>,
    },

    /// Fully decode a backup and report its contents
    Verify {
        /// Backup directory
        backup: PathBuf,
    },
}

impl Commands {
    pub fn execute(self, config: StoreConfig, out: &mut dyn Write) -> Result<()> {
        match self {
            Commands::Inspect { backup } => inspect(&backup, out),
            Commands::Export { backup, out: file } => export(&backup, &file, out),
            Commands::Restore { backup, data_dir } => restore(&backup, data_dir, config, out),
            Commands::Verify { backup } => verify(&backup, out),
        }
    }
}

fn inspect(backup: &Path, out: &mut dyn Write) -> Result<()> {
    let manifest = read_manifest(backup)?;
    let snapshot_file = snapshot_path(backup, &manifest);
    let mut file = File::open(&snapshot_file)
        .with_context(|| format!("failed to open {}", snapshot_file.display()))?;
    let header = read_header(&mut file)?;

    let report = json!({
        "manifest": manifest,
        "snapshot": {
            "version": header.version(),
            "compressed": header.is_compressed(),
            "change_number": header.change_number,
            "entry_count": header.entry_count,
            "payload_len": header.payload_len,
            "payload_crc": format!("{:08x}", header.payload_crc),
        },
    });
    writeln!(out, "{}", serde_json::to_string_pretty(&report)?)?;
    Ok(())
}

fn export(backup: &Path, file: &Path, out: &mut dyn Write) -> Result<()> {
    let manifest = read_manifest(backup)?;
    let bytes = read_snapshot_bytes(backup, &manifest)?;
    strand_utils::write_atomic(file, &bytes)?;

    tracing::info!(backup = %backup.display(), out = %file.display(), "Exported snapshot");
    writeln!(out, "wrote {} bytes to {}", bytes.len(), file.display())?;
    Ok(())
}

fn restore(
    backup: &Path,
    data_dir: Option<PathBuf>,
    mut config: StoreConfig,
    out: &mut dyn Write,
) -> Result<()> {
    if let Some(dir) = data_dir {
        config.data_dir = Some(dir);
    }
    let Some(target) = config.data_dir.clone() else {
        bail!("no data directory given; pass --data-dir or set data_dir in the config");
    };

    // Validate the backup before opening anything under the data dir
    let (manifest, _) = read_backup(backup)?;

    let store = MemStore::open(config)?;
    let restored = store.restore_from(backup)?;
    restored.store.close()?;
    store.close()?;

    writeln!(
        out,
        "restored change {} ({} entries) into {}",
        manifest.change_number,
        manifest.entry_count,
        target.join(CHECKPOINT_DIR).display()
    )?;
    Ok(())
}

fn verify(backup: &Path, out: &mut dyn Write) -> Result<()> {
    let (manifest, snapshot) = read_backup(backup)?;
    writeln!(
        out,
        "ok: {} entries at change {} (engine {}, created {})",
        snapshot.pairs.len(),
        snapshot.change_number,
        manifest.engine,
        manifest.created_at.to_rfc3339()
    )?;
    Ok(())
}
