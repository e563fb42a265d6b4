//! Command-line surface.

use std::path::PathBuf;

use bucketdrop_config::{BackendKind, Overrides};
use clap::Parser;

/// Reverse-DNS identifier reported by `--version`.
pub const BUNDLE_ID: &str = match option_env!("BUCKETDROP_BUNDLE_ID") {
    Some(id) => id,
    None => "dev.bucketdrop.daemon",
};

/// Watch a folder and move finished files into a cloud storage bucket.
#[derive(Debug, Parser)]
#[command(name = "bucketdrop", disable_version_flag = true)]
pub struct Cli {
    /// Folder to monitor for files
    #[arg(long, value_name = "DIR")]
    pub source: Option<PathBuf>,

    /// Destination bucket name
    #[arg(long)]
    pub bucket: Option<String>,

    /// Project billed for storage requests
    #[arg(long)]
    pub project: Option<String>,

    /// Service account to impersonate when no key is stored
    #[arg(long = "impersonate-sa", value_name = "EMAIL")]
    pub impersonate_sa: Option<String>,

    /// Log every state transition and skip decision
    #[arg(long, short)]
    pub verbose: bool,

    /// TOML configuration file
    #[arg(long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Quiet period after the last change before a file is processed
    #[arg(long, value_name = "MS")]
    pub debounce_ms: Option<u64>,

    /// How long a file's size must hold before it counts as written
    #[arg(long, value_name = "MS")]
    pub stability_window_ms: Option<u64>,

    /// How often the file size is sampled
    #[arg(long, value_name = "MS")]
    pub stability_poll_ms: Option<u64>,

    /// Object store backend
    #[arg(long, value_name = "gcs|local")]
    pub backend: Option<BackendKind>,

    /// Root directory for the local backend
    #[arg(long, value_name = "DIR")]
    pub local_root: Option<PathBuf>,

    /// Disable desktop notifications
    #[arg(long)]
    pub no_notifications: bool,

    /// Store a service account JSON key in the credential store and exit
    #[arg(long, value_name = "FILE")]
    pub set_sa_key_path: Option<PathBuf>,

    /// Print version and build information
    #[arg(long)]
    pub version: bool,
}

impl Cli {
    pub fn overrides(&self) -> Overrides {
        Overrides {
            source: self.source.clone(),
            bucket: self.bucket.clone(),
            project: self.project.clone(),
            impersonate_service_account: self.impersonate_sa.clone(),
            verbose: self.verbose,
            debounce_ms: self.debounce_ms,
            stability_window_ms: self.stability_window_ms,
            stability_poll_ms: self.stability_poll_ms,
            backend: self.backend,
            local_root: self.local_root.clone(),
            no_notifications: self.no_notifications,
        }
    }
}

pub fn version_text() -> String {
    format!(
        "bucketdrop {}\nBuild time: {}\nBundle identifier: {}",
        env!("CARGO_PKG_VERSION"),
        option_env!("BUCKETDROP_BUILD_TIME").unwrap_or("unknown"),
        BUNDLE_ID,
    )
}
