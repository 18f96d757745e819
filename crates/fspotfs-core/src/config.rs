//! Settings for locating the collection and its database.
//!
//! Settings are stored at `~/.config/fspotfs/config.toml` (XDG standard)
//! or `~/Library/Application Support/fspotfs/config.toml` on macOS.
//!
//! # Example configuration
//!
//! ```toml
//! collection_root = "/home/user/Photos"
//! dated_subdirectories = true
//! database = "/home/user/.config/f-spot/photos.db"
//! mountpoint = "/home/user/.photos"
//! refresh_interval = "2s"
//! busy_timeout = "5s"
//! ```
//!
//! The import pipeline only sees the [`ConfigProvider`] trait, so tests can
//! hand it a [`StaticConfig`] instead of a file on disk.

use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Default interval after which cached tag listings are re-read.
pub const DEFAULT_REFRESH_INTERVAL: Duration = Duration::from_secs(2);

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("No managed collection directory is configured")]
    MissingCollectionRoot,

    #[error("Could not determine home directory")]
    NoHomeDirectory,

    #[error("Failed to read config file {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Failed to parse config file {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

/// Source of the settings the import pipeline needs.
pub trait ConfigProvider: Send + Sync {
    /// Directory imported files are copied into.
    fn collection_root(&self) -> Result<PathBuf, ConfigError>;

    /// Whether imports go into `<root>/YYYY/MM/DD/`.
    fn dated_subdirectories(&self) -> bool;
}

/// A fixed configuration value.
#[derive(Debug, Clone, Default)]
pub struct StaticConfig {
    pub collection_root: Option<PathBuf>,
    pub dated_subdirectories: bool,
}

impl StaticConfig {
    pub fn new(collection_root: impl Into<PathBuf>) -> Self {
        Self {
            collection_root: Some(collection_root.into()),
            dated_subdirectories: false,
        }
    }

    #[must_use]
    pub fn dated(mut self, dated: bool) -> Self {
        self.dated_subdirectories = dated;
        self
    }
}

impl ConfigProvider for StaticConfig {
    fn collection_root(&self) -> Result<PathBuf, ConfigError> {
        self.collection_root
            .clone()
            .ok_or(ConfigError::MissingCollectionRoot)
    }

    fn dated_subdirectories(&self) -> bool {
        self.dated_subdirectories
    }
}

fn default_true() -> bool {
    true
}

fn default_refresh_interval() -> Duration {
    DEFAULT_REFRESH_INTERVAL
}

fn default_busy_timeout() -> Duration {
    crate::store::DEFAULT_BUSY_TIMEOUT
}

/// Contents of the settings file.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Settings {
    /// Managed collection directory for imports
    pub collection_root: Option<PathBuf>,

    /// Sort imports into dated subdirectories
    #[serde(default = "default_true")]
    pub dated_subdirectories: bool,

    /// F-Spot database file
    pub database: Option<PathBuf>,

    /// Default mountpoint
    pub mountpoint: Option<PathBuf>,

    /// Show photos in every tag they carry, not only the deepest one
    #[serde(default)]
    pub repeated: bool,

    /// Mount read-only by default
    #[serde(default)]
    pub read_only: bool,

    #[serde(default = "default_refresh_interval", with = "humantime_serde")]
    pub refresh_interval: Duration,

    /// How long to wait on a locked database
    #[serde(default = "default_busy_timeout", with = "humantime_serde")]
    pub busy_timeout: Duration,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            collection_root: None,
            dated_subdirectories: true,
            database: None,
            mountpoint: None,
            repeated: false,
            read_only: false,
            refresh_interval: DEFAULT_REFRESH_INTERVAL,
            busy_timeout: default_busy_timeout(),
        }
    }
}

impl Settings {
    /// Load settings from the default path, or return defaults if the file is absent.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(&config_path()?)
    }

    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;

        toml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// The configured database, or F-Spot's default location.
    pub fn database_path(&self) -> Result<PathBuf, ConfigError> {
        match &self.database {
            Some(path) => Ok(path.clone()),
            None => default_database_path(),
        }
    }
}

impl ConfigProvider for Settings {
    fn collection_root(&self) -> Result<PathBuf, ConfigError> {
        self.collection_root
            .clone()
            .ok_or(ConfigError::MissingCollectionRoot)
    }

    fn dated_subdirectories(&self) -> bool {
        self.dated_subdirectories
    }
}

fn base_dirs() -> Result<directories::BaseDirs, ConfigError> {
    directories::BaseDirs::new().ok_or(ConfigError::NoHomeDirectory)
}

/// Path of the settings file.
pub fn config_path() -> Result<PathBuf, ConfigError> {
    let base_dirs = base_dirs()?;

    #[cfg(target_os = "macos")]
    {
        Ok(base_dirs
            .home_dir()
            .join("Library/Application Support/fspotfs")
            .join("config.toml"))
    }

    #[cfg(not(target_os = "macos"))]
    {
        Ok(base_dirs.config_dir().join("fspotfs").join("config.toml"))
    }
}

/// F-Spot's own database location: `$XDG_CONFIG_HOME/f-spot/photos.db`.
pub fn default_database_path() -> Result<PathBuf, ConfigError> {
    Ok(base_dirs()?.config_dir().join("f-spot").join("photos.db"))
}

pub fn home_dir() -> Result<PathBuf, ConfigError> {
    Ok(base_dirs()?.home_dir().to_path_buf())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_empty_file_yields_defaults() {
        let settings: Settings = toml::from_str("").unwrap();
        assert!(settings.collection_root.is_none());
        assert!(settings.dated_subdirectories);
        assert!(!settings.repeated);
        assert_eq!(settings.refresh_interval, DEFAULT_REFRESH_INTERVAL);
    }

    #[test]
    fn test_parse_full_settings() {
        let settings: Settings = toml::from_str(
            r#"
            collection_root = "/srv/photos"
            dated_subdirectories = false
            database = "/srv/photos.db"
            repeated = true
            refresh_interval = "500ms"
            busy_timeout = "1s"
            "#,
        )
        .unwrap();

        assert_eq!(
            settings.collection_root().unwrap(),
            PathBuf::from("/srv/photos")
        );
        assert!(!settings.dated_subdirectories());
        assert!(settings.repeated);
        assert_eq!(settings.refresh_interval, Duration::from_millis(500));
        assert_eq!(settings.busy_timeout, Duration::from_secs(1));
        assert_eq!(
            settings.database_path().unwrap(),
            PathBuf::from("/srv/photos.db")
        );
    }

    #[test]
    fn test_missing_file_yields_defaults() {
        let dir = TempDir::new().unwrap();
        let settings = Settings::load_from(&dir.path().join("absent.toml")).unwrap();
        assert!(matches!(
            settings.collection_root(),
            Err(ConfigError::MissingCollectionRoot)
        ));
    }

    #[test]
    fn test_malformed_file_reports_path() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "refresh_interval = [").unwrap();

        let err = Settings::load_from(&path).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
        assert!(err.to_string().contains("config.toml"));
    }

    #[test]
    fn test_static_config() {
        let config = StaticConfig::new("/srv/photos").dated(true);
        assert_eq!(config.collection_root().unwrap(), PathBuf::from("/srv/photos"));
        assert!(config.dated_subdirectories());
        assert!(StaticConfig::default().collection_root().is_err());
    }
}
