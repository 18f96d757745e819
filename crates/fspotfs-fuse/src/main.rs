//! fsfs - Mount an F-Spot photo database as a tag tree.
//!
//! Usage: fsfs [--fsdb <photos.db>] [--mount <mountpoint>] [--repeated]
//!
//! Settings not given on the command line come from
//! `~/.config/fspotfs/config.toml`.

use anyhow::{bail, Context, Result};
use clap::Parser;
use fspotfs_core::config::{home_dir, ConfigProvider};
use fspotfs_core::{AccessMode, Settings, SqliteStore, VfsCore, VfsOptions};
use fspotfs_fuse::{MountConfig, TagFs};
use std::path::{Path, PathBuf};
use std::sync::mpsc;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "fsfs")]
#[command(about = "Browse and extend an F-Spot photo collection as a tag tree")]
#[command(version)]
struct Cli {
    /// F-Spot database (relative paths are resolved against $HOME)
    #[arg(short = 'd', long = "fsdb", env = "FSPOTFS_DB")]
    fsdb: Option<PathBuf>,

    /// Mountpoint (default: ~/.photos)
    #[arg(short, long)]
    mount: Option<PathBuf>,

    /// Show photos in every tag they carry, not only the deepest one
    #[arg(short, long)]
    repeated: bool,

    /// Expected F-Spot database version
    #[arg(short = 'v', long = "dbversion", default_value = fspotfs_core::store::DEFAULT_DB_VERSION)]
    dbversion: String,

    /// Enable debug logging
    #[arg(short = 'l', long = "log", alias = "debug")]
    debug: bool,

    /// Mount as read-only (default: read-write)
    #[arg(long)]
    read_only: bool,

    /// Directory imported photos are copied into
    #[arg(long)]
    collection_root: Option<PathBuf>,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.debug { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter)),
        )
        .init();

    run(cli)
}

fn run(cli: Cli) -> Result<()> {
    validate_version(&cli.dbversion)?;

    let mut settings = Settings::load().context("Failed to load settings")?;
    if let Some(root) = cli.collection_root.clone() {
        settings.collection_root = Some(root);
    }

    let database = match &cli.fsdb {
        Some(path) => resolve_against_home(path)?,
        None => resolve_against_home(&settings.database_path()?)?,
    };
    let mountpoint = match cli.mount.clone().or_else(|| settings.mountpoint.clone()) {
        Some(path) => resolve_against_home(&path)?,
        None => home_dir()?.join(".photos"),
    };

    if !database.is_file() {
        bail!("Database does not exist: {}", database.display());
    }
    if !mountpoint.is_dir() {
        bail!(
            "Mountpoint does not exist or is not a directory: {}",
            mountpoint.display()
        );
    }

    let mut read_only = cli.read_only || settings.read_only;
    if !read_only && settings.collection_root().is_err() {
        warn!("No collection root configured, mounting read-only");
        read_only = true;
    }

    let store = SqliteStore::open(&database, settings.busy_timeout)
        .with_context(|| format!("Failed to open database {}", database.display()))?;
    store
        .check_version(&cli.dbversion)
        .context("Unsupported F-Spot database")?;

    let refresh = settings.refresh_interval;
    let options = VfsOptions {
        mode: if read_only {
            AccessMode::ReadOnly
        } else {
            AccessMode::ReadWrite
        },
        repeated: cli.repeated || settings.repeated,
        refresh_interval: (!refresh.is_zero()).then_some(refresh),
        ..VfsOptions::default()
    };
    let vfs = VfsCore::new(Arc::new(store), Arc::new(settings), options);

    let db_name = database
        .file_name()
        .map_or_else(|| "photos.db".to_string(), |n| n.to_string_lossy().to_string());
    let config = MountConfig::default()
        .read_only(read_only)
        .fs_name(format!("fspot:{db_name}"));

    info!(
        database = %database.display(),
        mount = %mountpoint.display(),
        read_only,
        "Mounting photo collection"
    );

    let (tx, rx) = mpsc::channel::<()>();
    ctrlc::set_handler(move || {
        let _ = tx.send(());
    })
    .context("Failed to set signal handler")?;

    let fs = TagFs::new(Arc::new(vfs), config.clone());
    let handle = fspotfs_fuse::mount(fs, &mountpoint, &config).context("Failed to mount filesystem")?;
    info!("Filesystem mounted at {} (press Ctrl+C to unmount)", mountpoint.display());

    match rx.recv() {
        Ok(()) => info!("Received interrupt signal, unmounting..."),
        Err(_) => warn!("Signal channel closed unexpectedly"),
    }

    drop(handle);
    info!("Filesystem unmounted");
    Ok(())
}

/// Every dot-separated component of the version must be a number.
fn validate_version(version: &str) -> Result<()> {
    if version.is_empty() || version.split('.').any(|part| part.parse::<u32>().is_err()) {
        bail!("Invalid database version '{version}': expected a number such as 17");
    }
    Ok(())
}

fn resolve_against_home(path: &Path) -> Result<PathBuf> {
    if path.is_absolute() {
        Ok(path.to_path_buf())
    } else {
        Ok(home_dir()?.join(path))
    }
}
