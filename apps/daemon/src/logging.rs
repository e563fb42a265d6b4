//! `tracing` subscriber setup.

use tracing_subscriber::EnvFilter;

/// Crates whose level follows the verbose flag.
const OWN_CRATES: [&str; 9] = [
    "bucketdrop",
    "bucketdrop_auth",
    "bucketdrop_config",
    "bucketdrop_debounce",
    "bucketdrop_notifier",
    "bucketdrop_pipeline",
    "bucketdrop_stability",
    "bucketdrop_store",
    "bucketdrop_watcher",
];

/// Default filter when `RUST_LOG` is not set.
///
/// Dependencies stay at `warn`; our own crates log at `info`, or `debug`
/// when verbose.
pub fn default_directives(verbose: bool) -> String {
    let level = if verbose { "debug" } else { "info" };
    let mut directives = vec!["warn".to_string()];
    directives.extend(OWN_CRATES.iter().map(|c| format!("{c}={level}")));
    directives.join(",")
}

pub fn init(verbose: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directives(verbose)));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}
