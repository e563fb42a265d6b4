//! On-disk TOML configuration.
//!
//! The file is optional and never created automatically. Default location:
//! - Linux: `$XDG_CONFIG_HOME/bucketdrop/config.toml` or `~/.config/bucketdrop/config.toml`
//! - macOS: `~/Library/Application Support/bucketdrop/config.toml`
//! - Windows: `%APPDATA%/bucketdrop/config.toml`

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::{BackendKind, ConfigError};

/// Every field of the TOML file. Missing keys fall back to built-in defaults
/// when merged into a [`crate::Config`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FileConfig {
    pub source: Option<PathBuf>,
    pub bucket: Option<String>,
    pub project: Option<String>,
    pub impersonate_service_account: Option<String>,
    pub verbose: Option<bool>,
    pub debounce_ms: Option<u64>,
    pub stability_window_ms: Option<u64>,
    pub stability_poll_ms: Option<u64>,
    pub stability_timeout_ms: Option<u64>,
    pub max_concurrent_uploads: Option<usize>,
    pub shutdown_grace_ms: Option<u64>,
    pub notifications: Option<bool>,
    pub backend: Option<BackendKind>,
    pub local_root: Option<PathBuf>,
    pub credential_service: Option<String>,
    pub credential_account: Option<String>,
}

impl FileConfig {
    /// Parses a TOML file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let parsed = toml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        tracing::debug!(path = %path.display(), "configuration file loaded");
        Ok(parsed)
    }

    /// Loads `explicit` if given, otherwise the default path when it exists.
    ///
    /// An explicit path that does not exist is an error; a missing default
    /// file is not.
    pub fn discover(explicit: Option<&Path>) -> Result<Self, ConfigError> {
        if let Some(path) = explicit {
            return Self::load(path);
        }
        match default_config_path() {
            Some(path) if path.is_file() => Self::load(&path),
            _ => Ok(Self::default()),
        }
    }
}

/// Returns the platform-specific configuration directory for bucketdrop.
pub fn config_dir() -> Option<PathBuf> {
    #[cfg(target_os = "linux")]
    {
        if let Ok(xdg) = std::env::var("XDG_CONFIG_HOME")
            && !xdg.is_empty()
        {
            return Some(PathBuf::from(xdg).join("bucketdrop"));
        }
        std::env::var("HOME")
            .ok()
            .map(|home| PathBuf::from(home).join(".config").join("bucketdrop"))
    }

    #[cfg(target_os = "macos")]
    {
        std::env::var("HOME").ok().map(|home| {
            PathBuf::from(home)
                .join("Library")
                .join("Application Support")
                .join("bucketdrop")
        })
    }

    #[cfg(target_os = "windows")]
    {
        std::env::var("APPDATA")
            .ok()
            .map(|appdata| PathBuf::from(appdata).join("bucketdrop"))
    }

    #[cfg(not(any(target_os = "linux", target_os = "macos", target_os = "windows")))]
    {
        None
    }
}

/// Returns the default configuration file path.
pub fn default_config_path() -> Option<PathBuf> {
    config_dir().map(|dir| dir.join("config.toml"))
}
