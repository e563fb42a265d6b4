//! Daemon configuration.
//!
//! A [`Config`] is assembled once at startup from built-in defaults, an
//! optional TOML file ([`FileConfig`]) and command-line [`Overrides`], in that
//! order of precedence. After validation it is never mutated; components
//! receive it as `Arc<Config>`.

mod file;

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

pub use file::{FileConfig, config_dir, default_config_path};

/// Quiet period after the last event before a path is processed.
pub const DEFAULT_DEBOUNCE_MS: u64 = 1000;

/// How long a file's size must hold still before it is considered written.
pub const DEFAULT_STABILITY_WINDOW_MS: u64 = 500;

/// Interval between size polls during the stability wait.
pub const DEFAULT_STABILITY_POLL_MS: u64 = 100;

/// Upload attempts allowed past the stability wait at once.
pub const DEFAULT_MAX_CONCURRENT_UPLOADS: usize = 4;

/// How long shutdown waits for in-flight attempts.
pub const DEFAULT_SHUTDOWN_GRACE_MS: u64 = 1000;

/// Credential-store service name for the stored service-account key.
pub const DEFAULT_CREDENTIAL_SERVICE: &str = "bucketdrop-sa-key";

/// Credential-store account name for the stored service-account key.
pub const DEFAULT_CREDENTIAL_ACCOUNT: &str = "default";

/// Errors produced while building the configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("--source is required: specify the folder to monitor")]
    MissingSource,

    #[error("--bucket is required: specify the destination bucket")]
    MissingBucket,

    #[error("source folder '{0}' does not exist")]
    SourceNotFound(PathBuf),

    #[error("source '{0}' is not a directory")]
    SourceNotDirectory(PathBuf),

    #[error("failed to inspect source folder '{path}': {source}")]
    SourceInaccessible {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("stability poll interval must be greater than zero")]
    ZeroPollInterval,

    #[error("local backend requires local_root")]
    MissingLocalRoot,

    #[error("unknown backend '{0}' (expected 'gcs' or 'local')")]
    UnknownBackend(String),
}

/// Selects the object-store implementation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    #[default]
    Gcs,
    Local,
}

impl FromStr for BackendKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "gcs" => Ok(Self::Gcs),
            "local" => Ok(Self::Local),
            other => Err(ConfigError::UnknownBackend(other.to_string())),
        }
    }
}

/// Resolved object-store backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Backend {
    /// Google Cloud Storage JSON API.
    Gcs,
    /// A local directory standing in for the remote store.
    Local { root: PathBuf },
}

/// Values supplied on the command line. `None` / `false` means "not given".
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub source: Option<PathBuf>,
    pub bucket: Option<String>,
    pub project: Option<String>,
    pub impersonate_service_account: Option<String>,
    pub verbose: bool,
    pub debounce_ms: Option<u64>,
    pub stability_window_ms: Option<u64>,
    pub stability_poll_ms: Option<u64>,
    pub backend: Option<BackendKind>,
    pub local_root: Option<PathBuf>,
    pub no_notifications: bool,
}

/// Immutable daemon configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Directory being watched (non-recursive).
    pub source: PathBuf,
    /// Destination bucket.
    pub bucket: String,
    /// Quota/billing project sent with every request.
    pub project: Option<String>,
    /// Identity to impersonate when no stored key is available.
    pub impersonate_service_account: Option<String>,
    pub verbose: bool,
    pub debounce: Duration,
    pub stability_window: Duration,
    pub stability_poll: Duration,
    /// Upper bound on the stability wait; `None` waits forever.
    pub stability_timeout: Option<Duration>,
    /// 0 disables the cap.
    pub max_concurrent_uploads: usize,
    pub shutdown_grace: Duration,
    pub notifications: bool,
    pub backend: Backend,
    pub credential_service: String,
    pub credential_account: String,
}

impl Config {
    /// Creates a configuration with default tunables. Not validated.
    pub fn new(source: impl Into<PathBuf>, bucket: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            bucket: bucket.into(),
            project: None,
            impersonate_service_account: None,
            verbose: false,
            debounce: Duration::from_millis(DEFAULT_DEBOUNCE_MS),
            stability_window: Duration::from_millis(DEFAULT_STABILITY_WINDOW_MS),
            stability_poll: Duration::from_millis(DEFAULT_STABILITY_POLL_MS),
            stability_timeout: None,
            max_concurrent_uploads: DEFAULT_MAX_CONCURRENT_UPLOADS,
            shutdown_grace: Duration::from_millis(DEFAULT_SHUTDOWN_GRACE_MS),
            notifications: true,
            backend: Backend::Gcs,
            credential_service: DEFAULT_CREDENTIAL_SERVICE.into(),
            credential_account: DEFAULT_CREDENTIAL_ACCOUNT.into(),
        }
    }

    /// Merges defaults, file values and overrides, then validates.
    pub fn from_sources(file: FileConfig, cli: Overrides) -> Result<Self, ConfigError> {
        let source = cli.source.or(file.source).ok_or(ConfigError::MissingSource)?;
        let bucket = cli
            .bucket
            .or(file.bucket)
            .filter(|b| !b.is_empty())
            .ok_or(ConfigError::MissingBucket)?;

        let mut config = Config::new(source, bucket);
        config.project = non_empty(cli.project.or(file.project));
        config.impersonate_service_account =
            non_empty(cli.impersonate_service_account.or(file.impersonate_service_account));
        config.verbose = cli.verbose || file.verbose.unwrap_or(false);

        if let Some(ms) = cli.debounce_ms.or(file.debounce_ms) {
            config.debounce = Duration::from_millis(ms);
        }
        if let Some(ms) = cli.stability_window_ms.or(file.stability_window_ms) {
            config.stability_window = Duration::from_millis(ms);
        }
        if let Some(ms) = cli.stability_poll_ms.or(file.stability_poll_ms) {
            config.stability_poll = Duration::from_millis(ms);
        }
        config.stability_timeout = file.stability_timeout_ms.map(Duration::from_millis);
        if let Some(n) = file.max_concurrent_uploads {
            config.max_concurrent_uploads = n;
        }
        if let Some(ms) = file.shutdown_grace_ms {
            config.shutdown_grace = Duration::from_millis(ms);
        }
        config.notifications = !cli.no_notifications && file.notifications.unwrap_or(true);

        config.backend = match cli.backend.or(file.backend).unwrap_or_default() {
            BackendKind::Gcs => Backend::Gcs,
            BackendKind::Local => Backend::Local {
                root: cli
                    .local_root
                    .or(file.local_root)
                    .ok_or(ConfigError::MissingLocalRoot)?,
            },
        };
        if let Some(service) = non_empty(file.credential_service) {
            config.credential_service = service;
        }
        if let Some(account) = non_empty(file.credential_account) {
            config.credential_account = account;
        }

        config.validate()?;
        Ok(config)
    }

    /// Checks invariants that must hold before watching starts.
    ///
    /// The source directory is checked once here and never re-validated.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.source.as_os_str().is_empty() {
            return Err(ConfigError::MissingSource);
        }
        if self.bucket.is_empty() {
            return Err(ConfigError::MissingBucket);
        }
        match std::fs::metadata(&self.source) {
            Ok(meta) if meta.is_dir() => {}
            Ok(_) => return Err(ConfigError::SourceNotDirectory(self.source.clone())),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(ConfigError::SourceNotFound(self.source.clone()));
            }
            Err(source) => {
                return Err(ConfigError::SourceInaccessible {
                    path: self.source.clone(),
                    source,
                });
            }
        }
        if self.stability_poll.is_zero() {
            return Err(ConfigError::ZeroPollInterval);
        }
        Ok(())
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}
